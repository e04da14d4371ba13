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

//! The state-diffing binder.
//!
//! Setters write the *requested* state only. Before each draw the binder
//! compares it against the *resident* state (what the native device was last
//! told) and issues native calls for the groups that differ. Resident state is
//! optional per group so it can be invalidated wholesale after anything that
//! bypasses the binder.

use crate::caps::{Caps, CapsFlags};
use crate::desc::{
    BlendStateDesc, DepthStencilDesc, IndexFormat, PrimitiveTopology, RasterizerStateDesc, Rect,
    ShaderBinding, ShaderStage, ShaderStages, Viewport,
};
use crate::error::{DeviceError, ShaderError};
use crate::handle::Handle;
use crate::native::{NativeDevice, ProgramId, ProgramLink, TextureId, VertexStream};
use crate::table::{ResourceKind, ResourceTable, ShaderRecord};
use crate::targets::{TargetBinding, TargetManager};

/// Maximum vertex streams.
pub const MAX_VERTEX_STREAMS: usize = 8;
/// Maximum texture/sampler units.
pub const MAX_TEXTURE_UNITS: usize = 16;
/// Maximum constant buffer units.
pub const MAX_CONSTANT_UNITS: usize = 16;
/// Maximum structured buffer units.
pub const MAX_STRUCTURED_UNITS: usize = 8;

/// A requested vertex stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamBinding {
    /// Buffer slot.
    pub buffer: Handle,
    /// Element stride in bytes.
    pub stride: u32,
    /// Offset of the first element in bytes.
    pub offset: u64,
}

/// A requested texture unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct TextureUnit {
    /// Texture or render target slot.
    pub texture: Handle,
    /// Sampler slot, or null.
    pub sampler: Handle,
    /// Stages reading the unit.
    pub stages: ShaderStages,
}

/// A requested constant buffer unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ConstantUnit {
    /// Buffer slot.
    pub buffer: Handle,
    /// Start of the bound range.
    pub offset: u64,
    /// Length of the bound range; `0` means to the end of the buffer.
    pub size: u64,
    /// Stages reading the unit.
    pub stages: ShaderStages,
}

/// A requested structured buffer unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StructuredUnit {
    /// Buffer slot.
    pub buffer: Handle,
    /// Stages reading the unit.
    pub stages: ShaderStages,
}

/// The requested index buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IndexBinding {
    /// Buffer slot.
    pub buffer: Handle,
    /// Index width.
    pub format: IndexFormat,
    /// Byte offset before the first index is applied.
    pub offset: u64,
}

/// Everything a client can request through the setters.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineState {
    /// Vertex shader.
    pub vs: Handle,
    /// Pixel shader.
    pub ps: Handle,
    /// Stream-out vertex shader; replaces `vs`/`ps` while set.
    pub so: Handle,
    /// Compute shader.
    pub cs: Handle,
    /// Input layout.
    pub input_layout: Handle,
    /// Vertex streams.
    pub streams: [StreamBinding; MAX_VERTEX_STREAMS],
    /// Rasterizer state block; null selects the default block.
    pub raster: Handle,
    /// Blend state block; null selects the default block.
    pub blend: Handle,
    /// Depth-stencil state block; null selects the default block.
    pub depth_stencil: Handle,
    /// Stencil reference value.
    pub stencil_ref: u8,
    /// Buffer capturing stream-out output for the next draw.
    pub stream_out_target: Handle,
    /// Viewport; `None` leaves the native viewport untouched.
    pub viewport: Option<Viewport>,
    /// Scissor; `None` leaves the native scissor untouched.
    pub scissor: Option<Rect>,
    /// Texture units.
    pub textures: [TextureUnit; MAX_TEXTURE_UNITS],
    /// Constant buffer units.
    pub constants: [ConstantUnit; MAX_CONSTANT_UNITS],
    /// Structured buffer units.
    pub structured: [StructuredUnit; MAX_STRUCTURED_UNITS],
    /// Index buffer.
    pub index: IndexBinding,
    /// Render targets.
    pub targets: TargetBinding,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            vs: Handle::NULL,
            ps: Handle::NULL,
            so: Handle::NULL,
            cs: Handle::NULL,
            input_layout: Handle::NULL,
            streams: [StreamBinding::default(); MAX_VERTEX_STREAMS],
            raster: Handle::NULL,
            blend: Handle::NULL,
            depth_stencil: Handle::NULL,
            stencil_ref: 0,
            stream_out_target: Handle::NULL,
            viewport: None,
            scissor: None,
            textures: [TextureUnit::default(); MAX_TEXTURE_UNITS],
            constants: [ConstantUnit::default(); MAX_CONSTANT_UNITS],
            structured: [StructuredUnit::default(); MAX_STRUCTURED_UNITS],
            index: IndexBinding::default(),
            targets: TargetBinding::default(),
        }
    }
}

/// Identity of a linked program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramKey {
    /// Vertex + pixel shader pair.
    Raster {
        /// Vertex shader.
        vs: Handle,
        /// Pixel shader, possibly null for depth-only passes.
        ps: Handle,
    },
    /// Stream-out capture program.
    StreamOut {
        /// Stream-out vertex shader.
        so: Handle,
    },
    /// Compute program.
    Compute {
        /// Compute shader.
        cs: Handle,
    },
}

impl ProgramKey {
    fn uses(&self, shader: Handle) -> bool {
        match *self {
            ProgramKey::Raster { vs, ps } => vs == shader || ps == shader,
            ProgramKey::StreamOut { so } => so == shader,
            ProgramKey::Compute { cs } => cs == shader,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct LinkedProgram {
    key: ProgramKey,
    id: ProgramId,
}

/// Linked programs, found by linear scan.
#[derive(Debug, Default)]
pub struct ProgramCache {
    programs: Vec<LinkedProgram>,
}

impl ProgramCache {
    /// Returns the cached program for `key`.
    pub fn find(&self, key: ProgramKey) -> Option<ProgramId> {
        self.programs.iter().find(|p| p.key == key).map(|p| p.id)
    }

    /// Number of cached programs.
    pub fn len(&self) -> usize {
        self.programs.len()
    }

    /// Returns `true` if nothing has been linked.
    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Returns the cached program for `key`, linking it on a miss.
    pub fn get_or_link<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        table: &ResourceTable,
        key: ProgramKey,
    ) -> Result<ProgramId, ShaderError> {
        if let Some(id) = self.find(key) {
            return Ok(id);
        }

        let mut link = ProgramLink {
            vertex: None,
            pixel: None,
            stream_out: None,
            compute: None,
            bindings: &[],
            stream_out_outputs: &[],
        };
        let (first, second, bindings) = match key {
            ProgramKey::Raster { vs, ps } => {
                let v = expect_shader(table, vs, &[ShaderStage::Vertex]);
                link.vertex = Some(v.id);
                let mut bindings = v.bindings.clone();
                if !ps.is_null() {
                    let p = expect_shader(table, ps, &[ShaderStage::Pixel]);
                    link.pixel = Some(p.id);
                    for binding in &p.bindings {
                        merge_binding(&mut bindings, *binding);
                    }
                }
                (vs, ps, bindings)
            }
            ProgramKey::StreamOut { so } => {
                let s = expect_shader(table, so, &[ShaderStage::StreamOut, ShaderStage::Geometry]);
                link.stream_out = Some(s.id);
                link.stream_out_outputs = &s.stream_out_outputs;
                (so, Handle::NULL, s.bindings.clone())
            }
            ProgramKey::Compute { cs } => {
                let c = expect_shader(table, cs, &[ShaderStage::Compute]);
                link.compute = Some(c.id);
                (cs, Handle::NULL, c.bindings.clone())
            }
        };
        let link = ProgramLink {
            bindings: &bindings,
            ..link
        };

        match native.link_program(&link) {
            Ok(id) => {
                log::debug!("Device: Linked program {:?} for {:?}", id, key);
                self.programs.push(LinkedProgram { key, id });
                Ok(id)
            }
            Err(err) => {
                log::error!("Device: Failed to link program {:?}: {}", key, err);
                Err(ShaderError::Link {
                    vs: first,
                    ps: second,
                    details: err.to_string(),
                })
            }
        }
    }

    /// Destroys every program that uses `shader`.
    pub fn release_shader<N: NativeDevice + ?Sized>(&mut self, native: &mut N, shader: Handle) {
        self.programs.retain(|p| {
            let uses = p.key.uses(shader);
            if uses {
                native.destroy_program(p.id);
            }
            !uses
        });
    }

    /// Destroys every program.
    pub fn clear<N: NativeDevice + ?Sized>(&mut self, native: &mut N) {
        for program in self.programs.drain(..) {
            native.destroy_program(program.id);
        }
    }
}

fn expect_shader<'t>(
    table: &'t ResourceTable,
    slot: Handle,
    expected: &[ShaderStage],
) -> &'t ShaderRecord {
    let record = table.shader(slot);
    assert!(
        expected.contains(&record.stage),
        "shader {slot} is a {:?} shader, expected one of {expected:?}",
        record.stage
    );
    record
}

fn merge_binding(bindings: &mut Vec<ShaderBinding>, binding: ShaderBinding) {
    match bindings
        .iter_mut()
        .find(|b| b.unit == binding.unit && b.kind == binding.kind)
    {
        Some(existing) => existing.stages.insert(binding.stages),
        None => bindings.push(binding),
    }
}

#[derive(Debug, Clone, PartialEq)]
struct VertexKey {
    layout: Handle,
    streams: [StreamBinding; MAX_VERTEX_STREAMS],
    folded_base_vertex: i32,
}

#[derive(Debug, Default)]
struct Resident {
    targets: Option<TargetBinding>,
    program: Option<(ProgramKey, bool)>,
    vertex: Option<VertexKey>,
    raster: Option<(Handle, bool)>,
    blend: Option<Handle>,
    depth_stencil: Option<(Handle, u8)>,
    stream_out: Handle,
    viewport: Option<Viewport>,
    scissor: Option<Rect>,
    textures: [Option<(TextureUnit, Option<TextureId>)>; MAX_TEXTURE_UNITS],
    constants: [Option<ConstantUnit>; MAX_CONSTANT_UNITS],
    structured: [Option<StructuredUnit>; MAX_STRUCTURED_UNITS],
}

/// The device-owned pieces a draw needs to bind against.
pub struct BindContext<'a, N: NativeDevice + ?Sized> {
    /// Native backend.
    pub native: &'a mut N,
    /// Resource table.
    pub table: &'a mut ResourceTable,
    /// Render target manager.
    pub targets: &'a mut TargetManager,
    /// Device capabilities.
    pub caps: &'a Caps,
}

/// Per-draw parameters the binder needs.
#[derive(Debug, Clone, Copy)]
pub struct DrawSetup {
    /// Primitive assembly, used to begin stream-out capture.
    pub topology: PrimitiveTopology,
    /// First index for indexed draws, `None` otherwise.
    pub start_index: Option<u32>,
    /// Requested base vertex.
    pub base_vertex: i32,
}

/// Requested and resident pipeline state plus the program cache.
#[derive(Debug, Default)]
pub struct Binder {
    requested: PipelineState,
    resident: Resident,
    programs: ProgramCache,
    capturing: bool,
    discarding: bool,
    captured: Option<PrimitiveTopology>,
}

impl Binder {
    /// Creates a binder with everything unbound.
    pub fn new() -> Self {
        Self::default()
    }

    /// The requested state.
    pub fn requested(&self) -> &PipelineState {
        &self.requested
    }

    /// Mutable access to the requested state.
    pub fn requested_mut(&mut self) -> &mut PipelineState {
        &mut self.requested
    }

    /// The program cache.
    pub fn programs(&self) -> &ProgramCache {
        &self.programs
    }

    /// Mutable access to the program cache.
    pub fn programs_mut(&mut self) -> &mut ProgramCache {
        &mut self.programs
    }

    /// Topology of the last stream-out capture, replayed by `draw_auto`.
    pub fn captured_topology(&self) -> Option<PrimitiveTopology> {
        self.captured
    }

    /// Forgets everything known about native state, forcing a full rebind.
    pub fn invalidate_resident(&mut self) {
        self.resident = Resident::default();
    }

    /// Sets a shader for `stage`. Setting a vertex shader leaves stream-out
    /// mode; setting a stream-out shader clears the vertex and pixel shaders.
    pub fn set_shader(&mut self, shader: Handle, stage: ShaderStage) {
        let state = &mut self.requested;
        match stage {
            ShaderStage::Vertex => {
                state.vs = shader;
                state.so = Handle::NULL;
            }
            ShaderStage::Pixel => state.ps = shader,
            ShaderStage::StreamOut | ShaderStage::Geometry => {
                state.so = shader;
                state.vs = Handle::NULL;
                state.ps = Handle::NULL;
            }
            ShaderStage::Compute => state.cs = shader,
        }
    }

    /// Replaces the requested vertex streams starting at `first`.
    pub fn set_vertex_buffers(&mut self, first: usize, streams: &[StreamBinding]) {
        assert!(
            first + streams.len() <= MAX_VERTEX_STREAMS,
            "vertex streams {first}..{} exceed the {MAX_VERTEX_STREAMS} supported",
            first + streams.len()
        );
        self.requested.streams[first..first + streams.len()].copy_from_slice(streams);
    }

    /// Sets the texture and sampler at `unit`.
    pub fn set_texture(
        &mut self,
        unit: u32,
        texture: Handle,
        sampler: Handle,
        stages: ShaderStages,
    ) {
        let slot = unit_slot(unit, MAX_TEXTURE_UNITS, "texture");
        self.requested.textures[slot] = TextureUnit {
            texture,
            sampler,
            stages,
        };
    }

    /// Sets the constant buffer range at `unit`.
    pub fn set_constant_buffer(&mut self, unit: u32, binding: ConstantUnit) {
        let slot = unit_slot(unit, MAX_CONSTANT_UNITS, "constant buffer");
        self.requested.constants[slot] = binding;
    }

    /// Sets the structured buffer at `unit`.
    pub fn set_structured_buffer(&mut self, unit: u32, buffer: Handle, stages: ShaderStages) {
        let slot = unit_slot(unit, MAX_STRUCTURED_UNITS, "structured buffer");
        self.requested.structured[slot] = StructuredUnit { buffer, stages };
    }

    /// Removes every reference to `slot` from the requested state.
    pub fn forget_handle(&mut self, slot: Handle) {
        let state = &mut self.requested;
        for shader in [&mut state.vs, &mut state.ps, &mut state.so, &mut state.cs] {
            if *shader == slot {
                *shader = Handle::NULL;
            }
        }
        for handle in [
            &mut state.input_layout,
            &mut state.raster,
            &mut state.blend,
            &mut state.depth_stencil,
            &mut state.stream_out_target,
            &mut state.index.buffer,
        ] {
            if *handle == slot {
                *handle = Handle::NULL;
            }
        }
        for stream in state.streams.iter_mut().filter(|s| s.buffer == slot) {
            *stream = StreamBinding::default();
        }
        for unit in state.textures.iter_mut() {
            if unit.texture == slot {
                *unit = TextureUnit::default();
            } else if unit.sampler == slot {
                unit.sampler = Handle::NULL;
            }
        }
        let constants = self.resident.constants;
        let structured = self.resident.structured;
        for unit in state.constants.iter_mut().filter(|u| u.buffer == slot) {
            *unit = ConstantUnit::default();
        }
        for unit in state.structured.iter_mut().filter(|u| u.buffer == slot) {
            *unit = StructuredUnit::default();
        }
        if state.targets.handles().any(|h| h == slot) {
            state.targets = TargetBinding::default();
        }
        self.invalidate_resident();
        // Keep released buffer units resident so the next draw unbinds them.
        for (resident, old) in self.resident.constants.iter_mut().zip(constants) {
            if old.is_some_and(|u| u.buffer == slot) {
                *resident = old;
            }
        }
        for (resident, old) in self.resident.structured.iter_mut().zip(structured) {
            if old.is_some_and(|u| u.buffer == slot) {
                *resident = old;
            }
        }
    }

    /// Resolves requested state into native calls before a draw.
    ///
    /// Returns the base vertex to pass to the native draw: the requested one
    /// when the backend supports it, `0` when it was folded into the streams.
    pub fn apply_draw<N: NativeDevice + ?Sized>(
        &mut self,
        ctx: &mut BindContext<'_, N>,
        setup: DrawSetup,
    ) -> Result<i32, DeviceError> {
        self.prepare_sampled_targets(ctx)?;
        let offscreen = self.apply_targets(ctx)?;
        let flip = offscreen && ctx.caps.supports(CapsFlags::FLIP_OFFSCREEN_Y);

        self.apply_program(ctx, flip)?;
        let native_base_vertex = self.apply_vertex_input(ctx, setup.base_vertex);
        self.apply_raster(ctx, offscreen, flip);
        self.apply_blend(ctx);
        self.apply_stream_out(ctx, setup.topology)?;
        self.apply_depth_stencil(ctx);
        self.apply_viewport(ctx);
        self.apply_textures(ctx)?;
        self.apply_constants(ctx);
        self.apply_structured(ctx);
        if let Some(start_index) = setup.start_index {
            self.apply_index_buffer(ctx, start_index);
        }
        Ok(native_base_vertex)
    }

    /// Resolves the compute program and its resources before a dispatch.
    pub fn apply_compute<N: NativeDevice + ?Sized>(
        &mut self,
        ctx: &mut BindContext<'_, N>,
    ) -> Result<(), DeviceError> {
        let cs = self.requested.cs;
        assert!(!cs.is_null(), "dispatch_compute with no compute shader bound");
        self.prepare_sampled_targets(ctx)?;
        let key = ProgramKey::Compute { cs };
        if self.resident.program != Some((key, false)) {
            let id = self.programs.get_or_link(ctx.native, ctx.table, key)?;
            ctx.native.use_program(id, 1.0);
            self.resident.program = Some((key, false));
        }
        self.apply_textures(ctx)?;
        self.apply_constants(ctx);
        self.apply_structured(ctx);
        Ok(())
    }

    /// Ends stream-out capture started by the last draw, if any, and
    /// restores rasterization after a stream-out program draw.
    pub fn finish_draw<N: NativeDevice + ?Sized>(&mut self, native: &mut N) {
        if self.capturing {
            native.end_stream_out();
            self.capturing = false;
            self.requested.stream_out_target = Handle::NULL;
            self.resident.stream_out = Handle::NULL;
        }
        if self.discarding {
            native.set_rasterizer_discard(false);
            self.discarding = false;
        }
    }

    /// Binds the requested targets. Returns `true` when they are off-screen.
    pub fn apply_targets<N: NativeDevice + ?Sized>(
        &mut self,
        ctx: &mut BindContext<'_, N>,
    ) -> Result<bool, DeviceError> {
        let requested = &self.requested.targets;
        let offscreen = !requested.is_backbuffer();
        if self.resident.targets.as_ref() != Some(requested) {
            if offscreen {
                let id = ctx.targets.framebuffer(ctx.native, ctx.table, requested)?;
                ctx.native.bind_framebuffer(Some(id));
            } else {
                ctx.native.bind_framebuffer(None);
            }
            log::trace!("Binder: Bound targets {:?}", requested);
            self.resident.targets = Some(requested.clone());
        }
        if offscreen {
            TargetManager::mark_written(ctx.table, requested);
        }
        Ok(offscreen)
    }

    fn prepare_sampled_targets<N: NativeDevice + ?Sized>(
        &mut self,
        ctx: &mut BindContext<'_, N>,
    ) -> Result<(), DeviceError> {
        let mut touched = false;
        for unit in 0..MAX_TEXTURE_UNITS {
            let texture = self.requested.textures[unit].texture;
            if ctx.table.kind(texture) != ResourceKind::RenderTarget {
                continue;
            }
            let record = ctx.table.render_target(texture);
            let stale = record.invalidate && (record.is_msaa() || record.mip_count > 1);
            let unresolved = record.is_msaa() && record.texture.is_none() && !record.is_depth();
            if stale || unresolved {
                ctx.targets
                    .prepare_for_sampling(ctx.native, ctx.table, texture)?;
                touched = true;
            }
        }
        if touched {
            // Resolves and mip generation may disturb the native framebuffer.
            self.resident.targets = None;
        }
        Ok(())
    }

    fn apply_program<N: NativeDevice + ?Sized>(
        &mut self,
        ctx: &mut BindContext<'_, N>,
        flip: bool,
    ) -> Result<(), DeviceError> {
        let state = &self.requested;
        if !state.so.is_null() {
            let key = ProgramKey::StreamOut { so: state.so };
            if self.resident.program != Some((key, false)) {
                let id = self.programs.find(key).unwrap_or_else(|| {
                    panic!(
                        "stream-out program for shader {} must be linked with link_stream_out_program before drawing",
                        state.so
                    )
                });
                ctx.native.use_program(id, 1.0);
                self.resident.program = Some((key, false));
            }
            if !self.discarding {
                ctx.native.set_rasterizer_discard(true);
                self.discarding = true;
            }
            return Ok(());
        }

        assert!(!state.vs.is_null(), "draw with no vertex shader bound");
        let key = ProgramKey::Raster {
            vs: state.vs,
            ps: state.ps,
        };
        if self.resident.program != Some((key, flip)) {
            let id = self.programs.get_or_link(ctx.native, ctx.table, key)?;
            ctx.native.use_program(id, if flip { -1.0 } else { 1.0 });
            log::trace!("Binder: Program {:?} (v_flip: {})", key, flip);
            self.resident.program = Some((key, flip));
        }
        Ok(())
    }

    fn apply_vertex_input<N: NativeDevice + ?Sized>(
        &mut self,
        ctx: &mut BindContext<'_, N>,
        base_vertex: i32,
    ) -> i32 {
        let native_base = ctx.caps.supports(CapsFlags::NATIVE_BASE_VERTEX);
        let folded = if native_base { 0 } else { base_vertex };
        let layout = self.requested.input_layout;
        assert!(!layout.is_null(), "draw with no input layout bound");

        let key = VertexKey {
            layout,
            streams: self.requested.streams,
            folded_base_vertex: folded,
        };
        if self.resident.vertex.as_ref() != Some(&key) {
            let desc = ctx.table.input_layout(layout);
            let mut streams = Vec::with_capacity(desc.stream_count());
            for (i, stream) in key.streams.iter().take(desc.stream_count()).enumerate() {
                assert!(
                    !stream.buffer.is_null(),
                    "draw with no vertex buffer bound to stream {i}"
                );
                let shift = i64::from(stream.stride) * i64::from(folded);
                let offset = stream.offset as i64 + shift;
                assert!(
                    offset >= 0,
                    "base vertex {folded} moves stream {i} before the start of its buffer"
                );
                streams.push(VertexStream {
                    buffer: ctx.table.buffer(stream.buffer).id,
                    stride: stream.stride,
                    offset: offset as u64,
                });
            }
            ctx.native.bind_vertex_input(desc, &streams);
            self.resident.vertex = Some(key);
        }

        if native_base {
            base_vertex
        } else {
            0
        }
    }

    fn apply_raster<N: NativeDevice + ?Sized>(
        &mut self,
        ctx: &mut BindContext<'_, N>,
        offscreen: bool,
        flip: bool,
    ) {
        let handle = self.requested.raster;
        if self.resident.raster == Some((handle, offscreen)) {
            return;
        }
        let default = RasterizerStateDesc::default();
        let desc = if handle.is_null() {
            &default
        } else {
            ctx.table.rasterizer_state(handle)
        };
        let front = if flip {
            desc.front_face().flipped()
        } else {
            desc.front_face()
        };
        ctx.native.apply_raster_state(desc, front);
        self.resident.raster = Some((handle, offscreen));
    }

    fn apply_blend<N: NativeDevice + ?Sized>(&mut self, ctx: &mut BindContext<'_, N>) {
        let handle = self.requested.blend;
        if self.resident.blend == Some(handle) {
            return;
        }
        let default = BlendStateDesc::default();
        let desc = if handle.is_null() {
            &default
        } else {
            ctx.table.blend_state(handle)
        };
        ctx.native.apply_blend_state(desc);
        self.resident.blend = Some(handle);
    }

    fn apply_stream_out<N: NativeDevice + ?Sized>(
        &mut self,
        ctx: &mut BindContext<'_, N>,
        topology: PrimitiveTopology,
    ) -> Result<(), DeviceError> {
        let target = self.requested.stream_out_target;
        if target.is_null() || target == self.resident.stream_out {
            return Ok(());
        }
        let buffer = ctx.table.buffer(target).id;
        ctx.native.begin_stream_out(buffer, topology)?;
        self.resident.stream_out = target;
        self.capturing = true;
        self.captured = Some(topology);
        Ok(())
    }

    fn apply_depth_stencil<N: NativeDevice + ?Sized>(&mut self, ctx: &mut BindContext<'_, N>) {
        let key = (self.requested.depth_stencil, self.requested.stencil_ref);
        if self.resident.depth_stencil == Some(key) {
            return;
        }
        let desc = if key.0.is_null() {
            DepthStencilDesc::default()
        } else {
            *ctx.table.depth_stencil_state(key.0)
        };
        ctx.native.apply_depth_stencil_state(&desc, key.1);
        self.resident.depth_stencil = Some(key);
    }

    fn apply_viewport<N: NativeDevice + ?Sized>(&mut self, ctx: &mut BindContext<'_, N>) {
        if let Some(viewport) = self.requested.viewport {
            if self.resident.viewport != Some(viewport) {
                ctx.native.set_viewport(&viewport);
                self.resident.viewport = Some(viewport);
            }
        }
        if let Some(scissor) = self.requested.scissor {
            if self.resident.scissor != Some(scissor) {
                ctx.native.set_scissor(&scissor);
                self.resident.scissor = Some(scissor);
            }
        }
    }

    fn apply_textures<N: NativeDevice + ?Sized>(
        &mut self,
        ctx: &mut BindContext<'_, N>,
    ) -> Result<(), DeviceError> {
        for unit in 0..MAX_TEXTURE_UNITS {
            let requested = self.requested.textures[unit];
            let resident = self.resident.textures[unit];
            if resident.is_none() && requested.texture.is_null() {
                continue;
            }

            let texture = match ctx.table.kind(requested.texture) {
                ResourceKind::Empty => None,
                ResourceKind::RenderTarget => {
                    let sampled = ctx.table.render_target(requested.texture).texture;
                    match sampled {
                        Some(texture) => Some(texture),
                        None => Some(ctx.targets.prepare_for_sampling(
                            ctx.native,
                            ctx.table,
                            requested.texture,
                        )?),
                    }
                }
                _ => Some(ctx.table.texture(requested.texture).id),
            };
            if resident == Some((requested, texture)) {
                continue;
            }

            let sampler = (!requested.sampler.is_null())
                .then(|| ctx.table.sampler(requested.sampler).id);
            ctx.native
                .bind_texture(unit as u32, texture, sampler, requested.stages);
            self.resident.textures[unit] = Some((requested, texture));
        }
        Ok(())
    }

    fn apply_constants<N: NativeDevice + ?Sized>(&mut self, ctx: &mut BindContext<'_, N>) {
        for unit in 0..MAX_CONSTANT_UNITS {
            let requested = self.requested.constants[unit];
            let resident = self.resident.constants[unit];
            if requested.buffer.is_null() {
                if resident.is_some_and(|r| !r.buffer.is_null()) {
                    ctx.native.unbind_constant_buffer(unit as u32);
                }
                self.resident.constants[unit] = None;
                continue;
            }
            if resident == Some(requested) {
                continue;
            }
            let record = ctx.table.buffer(requested.buffer);
            let size = if requested.size == 0 {
                record.desc.size.saturating_sub(requested.offset)
            } else {
                requested.size
            };
            ctx.native.bind_constant_buffer(
                unit as u32,
                record.id,
                requested.offset,
                size,
                requested.stages,
            );
            self.resident.constants[unit] = Some(requested);
        }
    }

    fn apply_structured<N: NativeDevice + ?Sized>(&mut self, ctx: &mut BindContext<'_, N>) {
        for unit in 0..MAX_STRUCTURED_UNITS {
            let requested = self.requested.structured[unit];
            let resident = self.resident.structured[unit];
            if requested.buffer.is_null() {
                if resident.is_some_and(|r| !r.buffer.is_null()) {
                    ctx.native.unbind_structured_buffer(unit as u32);
                }
                self.resident.structured[unit] = None;
                continue;
            }
            if resident == Some(requested) {
                continue;
            }
            let id = ctx.table.buffer(requested.buffer).id;
            ctx.native
                .bind_structured_buffer(unit as u32, id, requested.stages);
            self.resident.structured[unit] = Some(requested);
        }
    }

    fn apply_index_buffer<N: NativeDevice + ?Sized>(
        &mut self,
        ctx: &mut BindContext<'_, N>,
        start_index: u32,
    ) {
        let index = self.requested.index;
        assert!(
            !index.buffer.is_null(),
            "indexed draw with no index buffer bound"
        );
        let id = ctx.table.buffer(index.buffer).id;
        let offset = index.offset + u64::from(start_index) * index.format.size();
        ctx.native.bind_index_buffer(id, index.format, offset);
    }
}

fn unit_slot(unit: u32, max: usize, what: &str) -> usize {
    let slot = unit as usize;
    assert!(slot < max, "{what} unit {unit} out of range (max {max})");
    slot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_shader_leaves_stream_out_mode() {
        let mut binder = Binder::new();
        binder.set_shader(Handle(20), ShaderStage::StreamOut);
        assert_eq!(binder.requested().so, Handle(20));

        binder.set_shader(Handle(21), ShaderStage::Vertex);
        binder.set_shader(Handle(22), ShaderStage::Pixel);
        assert_eq!(binder.requested().so, Handle::NULL);
        assert_eq!(binder.requested().vs, Handle(21));

        binder.set_shader(Handle(20), ShaderStage::StreamOut);
        assert_eq!(binder.requested().vs, Handle::NULL);
        assert_eq!(binder.requested().ps, Handle::NULL);
    }

    #[test]
    fn forgetting_a_handle_unbinds_it_everywhere() {
        let mut binder = Binder::new();
        binder.set_texture(3, Handle(9), Handle(10), ShaderStages::PIXEL);
        binder.set_vertex_buffers(
            0,
            &[StreamBinding {
                buffer: Handle(9),
                stride: 12,
                offset: 0,
            }],
        );
        binder.forget_handle(Handle(10));
        assert_eq!(binder.requested().textures[3].texture, Handle(9));
        assert_eq!(binder.requested().textures[3].sampler, Handle::NULL);

        binder.forget_handle(Handle(9));
        assert_eq!(binder.requested().textures[3], TextureUnit::default());
        assert_eq!(binder.requested().streams[0], StreamBinding::default());
    }

    #[test]
    #[should_panic(expected = "texture unit 16 out of range")]
    fn texture_unit_past_limit_panics() {
        Binder::new().set_texture(16, Handle(9), Handle::NULL, ShaderStages::PIXEL);
    }

    #[test]
    fn program_keys_know_their_shaders() {
        let key = ProgramKey::Raster {
            vs: Handle(5),
            ps: Handle(6),
        };
        assert!(key.uses(Handle(6)));
        assert!(!key.uses(Handle(7)));
        assert!(ProgramKey::StreamOut { so: Handle(7) }.uses(Handle(7)));
    }
}
