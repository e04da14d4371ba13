// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The resource table: a growable slot array of tagged resource records.
//!
//! Slots are chosen by the caller. The table never allocates them; it only
//! checks that a slot is free before it is filled and that a record has the
//! expected kind when it is read.

use crate::desc::{
    BlendStateDesc, BufferDesc, ClearState, DepthStencilDesc, InputLayoutDesc,
    RasterizerStateDesc, SamplerDesc, ShaderBinding, ShaderStage, TextureDesc,
};
use crate::handle::Handle;
use crate::native::{BufferId, SamplerId, ShaderId, TextureId};
use crate::targets::RenderTargetRecord;
use std::fmt;

/// A buffer resource.
#[derive(Debug, Clone)]
pub struct BufferRecord {
    /// Native buffer.
    pub id: BufferId,
    /// Creation parameters.
    pub desc: BufferDesc,
}

/// A texture resource.
#[derive(Debug, Clone)]
pub struct TextureRecord {
    /// Native texture.
    pub id: TextureId,
    /// Creation parameters.
    pub desc: TextureDesc,
}

/// A sampler resource.
#[derive(Debug, Clone)]
pub struct SamplerRecord {
    /// Native sampler.
    pub id: SamplerId,
    /// Creation parameters.
    pub desc: SamplerDesc,
}

/// A compiled shader.
#[derive(Debug, Clone)]
pub struct ShaderRecord {
    /// Native shader.
    pub id: ShaderId,
    /// Stage it was compiled for.
    pub stage: ShaderStage,
    /// Debug label.
    pub label: Option<String>,
    /// Reflected bindings.
    pub bindings: Vec<ShaderBinding>,
    /// Captured outputs for stream-out shaders.
    pub stream_out_outputs: Vec<String>,
}

/// Discriminant of a [`ResourceRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ResourceKind {
    Empty,
    Backbuffer,
    Buffer,
    Texture,
    RenderTarget,
    Sampler,
    RasterizerState,
    BlendState,
    DepthStencilState,
    ClearState,
    InputLayout,
    Shader,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Empty => "empty",
            ResourceKind::Backbuffer => "the backbuffer",
            ResourceKind::Buffer => "a buffer",
            ResourceKind::Texture => "a texture",
            ResourceKind::RenderTarget => "a render target",
            ResourceKind::Sampler => "a sampler",
            ResourceKind::RasterizerState => "a rasterizer state",
            ResourceKind::BlendState => "a blend state",
            ResourceKind::DepthStencilState => "a depth-stencil state",
            ResourceKind::ClearState => "a clear state",
            ResourceKind::InputLayout => "an input layout",
            ResourceKind::Shader => "a shader",
        };
        f.write_str(name)
    }
}

/// One slot of the resource table.
#[derive(Debug, Clone, Default)]
pub enum ResourceRecord {
    /// Unassigned slot.
    #[default]
    Empty,
    /// The default presentable target (colour or depth surface).
    Backbuffer,
    /// A buffer.
    Buffer(BufferRecord),
    /// A texture.
    Texture(TextureRecord),
    /// An off-screen render target.
    RenderTarget(RenderTargetRecord),
    /// A sampler.
    Sampler(SamplerRecord),
    /// A rasterizer state block.
    RasterizerState(RasterizerStateDesc),
    /// A blend state block.
    BlendState(BlendStateDesc),
    /// A depth-stencil state block.
    DepthStencilState(DepthStencilDesc),
    /// A clear state block.
    ClearState(ClearState),
    /// A vertex input layout.
    InputLayout(InputLayoutDesc),
    /// A compiled shader.
    Shader(ShaderRecord),
}

impl ResourceRecord {
    /// The kind of this record.
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceRecord::Empty => ResourceKind::Empty,
            ResourceRecord::Backbuffer => ResourceKind::Backbuffer,
            ResourceRecord::Buffer(_) => ResourceKind::Buffer,
            ResourceRecord::Texture(_) => ResourceKind::Texture,
            ResourceRecord::RenderTarget(_) => ResourceKind::RenderTarget,
            ResourceRecord::Sampler(_) => ResourceKind::Sampler,
            ResourceRecord::RasterizerState(_) => ResourceKind::RasterizerState,
            ResourceRecord::BlendState(_) => ResourceKind::BlendState,
            ResourceRecord::DepthStencilState(_) => ResourceKind::DepthStencilState,
            ResourceRecord::ClearState(_) => ResourceKind::ClearState,
            ResourceRecord::InputLayout(_) => ResourceKind::InputLayout,
            ResourceRecord::Shader(_) => ResourceKind::Shader,
        }
    }
}

fn wrong_kind(slot: Handle, expected: ResourceKind, found: ResourceKind) -> ! {
    panic!("resource {slot} is {found}, expected {expected}")
}

macro_rules! typed_accessors {
    ($($get:ident, $get_mut:ident => $variant:ident($ty:ty);)*) => {
        $(
            #[doc = concat!("Returns the `", stringify!($variant), "` record in `slot`, panicking on any other kind.")]
            pub fn $get(&self, slot: Handle) -> &$ty {
                match self.record(slot) {
                    ResourceRecord::$variant(record) => record,
                    other => wrong_kind(slot, ResourceKind::$variant, other.kind()),
                }
            }

            #[doc = concat!("Mutable variant of [`ResourceTable::", stringify!($get), "`].")]
            pub fn $get_mut(&mut self, slot: Handle) -> &mut $ty {
                match self.record_mut(slot) {
                    ResourceRecord::$variant(record) => record,
                    other => wrong_kind(slot, ResourceKind::$variant, other.kind()),
                }
            }
        )*
    };
}

/// Maps handles to resource records.
#[derive(Debug)]
pub struct ResourceTable {
    records: Vec<ResourceRecord>,
}

impl ResourceTable {
    /// Creates a table holding only the null slot.
    pub fn new() -> Self {
        Self {
            records: vec![ResourceRecord::Empty],
        }
    }

    /// Ensures `slot` is addressable. New entries start empty.
    pub fn grow(&mut self, slot: Handle) {
        if slot.index() >= self.records.len() {
            self.records
                .resize_with(slot.index() + 1, ResourceRecord::default);
        }
    }

    /// Number of addressable slots.
    pub fn capacity(&self) -> usize {
        self.records.len()
    }

    /// The kind stored in `slot`; out-of-range slots read as empty.
    pub fn kind(&self, slot: Handle) -> ResourceKind {
        self.records
            .get(slot.index())
            .map(ResourceRecord::kind)
            .unwrap_or(ResourceKind::Empty)
    }

    /// Returns `true` if `slot` holds a resource.
    pub fn is_live(&self, slot: Handle) -> bool {
        self.kind(slot) != ResourceKind::Empty
    }

    /// The record in `slot`. Panics if the slot was never grown into.
    pub fn record(&self, slot: Handle) -> &ResourceRecord {
        match self.records.get(slot.index()) {
            Some(record) => record,
            None => panic!(
                "resource {slot} is out of range (capacity {})",
                self.records.len()
            ),
        }
    }

    /// Mutable variant of [`ResourceTable::record`].
    pub fn record_mut(&mut self, slot: Handle) -> &mut ResourceRecord {
        let capacity = self.records.len();
        match self.records.get_mut(slot.index()) {
            Some(record) => record,
            None => panic!("resource {slot} is out of range (capacity {capacity})"),
        }
    }

    /// Stores `record` in a free slot, growing the table as needed.
    ///
    /// Panics if `slot` is null or already holds a live resource.
    pub fn insert(&mut self, slot: Handle, record: ResourceRecord) {
        assert!(!slot.is_null(), "slot 0 is reserved for the null resource");
        self.grow(slot);
        let entry = &mut self.records[slot.index()];
        assert!(
            matches!(entry, ResourceRecord::Empty),
            "resource {slot} is already {}; release it first",
            entry.kind()
        );
        *entry = record;
    }

    /// Removes and returns the record in `slot`, leaving it empty.
    pub fn take(&mut self, slot: Handle) -> ResourceRecord {
        if slot.index() >= self.records.len() {
            return ResourceRecord::Empty;
        }
        std::mem::take(&mut self.records[slot.index()])
    }

    typed_accessors! {
        buffer, buffer_mut => Buffer(BufferRecord);
        texture, texture_mut => Texture(TextureRecord);
        render_target, render_target_mut => RenderTarget(RenderTargetRecord);
        sampler, sampler_mut => Sampler(SamplerRecord);
        rasterizer_state, rasterizer_state_mut => RasterizerState(RasterizerStateDesc);
        blend_state, blend_state_mut => BlendState(BlendStateDesc);
        depth_stencil_state, depth_stencil_state_mut => DepthStencilState(DepthStencilDesc);
        clear_state, clear_state_mut => ClearState(ClearState);
        input_layout, input_layout_mut => InputLayout(InputLayoutDesc);
        shader, shader_mut => Shader(ShaderRecord);
    }
}

impl Default for ResourceTable {
    fn default() -> Self {
        Self::new()
    }
}
