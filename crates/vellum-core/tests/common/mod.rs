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

//! A recording [`NativeDevice`] for exercising the device context without a GPU.

#![allow(dead_code)]

use std::collections::HashMap;
use vellum_core::caps::{Caps, CapsFlags, RendererInfo};
use vellum_core::desc::{
    BindFlags, BlendStateDesc, BufferDesc, ClearState, DepthStencilDesc, FrontFace, IndexFormat,
    InputLayoutDesc, PrimitiveTopology, RasterizerStateDesc, Rect, SamplerDesc, ShaderDesc,
    ShaderSource, ShaderStage, ShaderStages, TextureDesc, TextureFormat, TextureRegion,
    VertexAttribute, VertexFormat, Viewport, InputRate,
};
use vellum_core::native::{
    BufferId, DrawArgs, DrawIndexedArgs, FramebufferDesc, FramebufferId, NativeDevice, ProgramId,
    ProgramLink, ReadBackSource, SamplerId, ShaderId, TextureId, TimerQueryId, VertexStream,
};
use vellum_core::{Device, DeviceConfig, Handle, NativeError};

/// One native call, as seen by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateBuffer { id: BufferId, size: u64 },
    UpdateBuffer { id: BufferId, offset: u64, len: usize },
    DestroyBuffer(BufferId),
    CreateTexture { id: TextureId, desc: TextureDesc },
    UpdateTexture(TextureId),
    GenerateMips(TextureId),
    DestroyTexture(TextureId),
    CreateSampler(SamplerId),
    DestroySampler(SamplerId),
    CompileShader(ShaderStage),
    DestroyShader(ShaderId),
    LinkProgram(ProgramId),
    DestroyProgram(ProgramId),
    UseProgram { id: ProgramId, v_flip: f32 },
    BindVertexInput(Vec<VertexStream>),
    ApplyRaster(FrontFace),
    ApplyBlend,
    ApplyDepthStencil { depth_enable: bool, stencil_ref: u8 },
    SetViewport(Viewport),
    SetScissor(Rect),
    RasterizerDiscard(bool),
    BindTexture { unit: u32, texture: Option<TextureId> },
    BindConstantBuffer { unit: u32, buffer: BufferId, offset: u64, size: u64 },
    BindStructuredBuffer { unit: u32, buffer: BufferId },
    UnbindConstantBuffer(u32),
    UnbindStructuredBuffer(u32),
    BindIndexBuffer { buffer: BufferId, offset: u64 },
    BeginStreamOut(BufferId),
    EndStreamOut,
    Draw(DrawArgs),
    DrawIndexed(DrawIndexedArgs),
    DrawAuto(PrimitiveTopology),
    Dispatch([u32; 3]),
    CreateFramebuffer { id: FramebufferId, desc: FramebufferDesc },
    DestroyFramebuffer(FramebufferId),
    BindFramebuffer(Option<FramebufferId>),
    Clear,
    Blit { src: FramebufferId, dst: FramebufferId },
    CreateTimer(TimerQueryId),
    BeginTimer(TimerQueryId),
    EndTimer(TimerQueryId),
    DestroyTimer(TimerQueryId),
    ResizeSurface(u32, u32),
    Present,
    Sync,
}

#[derive(Debug)]
pub struct MockNative {
    pub caps: Caps,
    pub calls: Vec<Call>,
    pub backbuffer: (u32, u32),
    /// Nanoseconds reported by every timer query.
    pub timer_ns: u64,
    /// Whether timer results are available yet.
    pub timers_ready: bool,
    /// Diagnostic returned by the next shader compilation.
    pub fail_compile: Option<String>,
    /// Whether the next texture creation runs out of memory.
    pub fail_texture: bool,
    next_id: usize,
    buffers: HashMap<BufferId, Vec<u8>>,
    textures: HashMap<TextureId, (TextureDesc, Vec<u8>)>,
}

pub fn full_caps() -> Caps {
    Caps {
        info: RendererInfo {
            shader_version: "mock 1.0".to_string(),
            api_version: "mock".to_string(),
            renderer: "Mock Renderer".to_string(),
            vendor: "Vellum".to_string(),
        },
        flags: CapsFlags::all(),
        max_texture_size: 8192,
        max_samples: 8,
    }
}

impl MockNative {
    pub fn new(caps: Caps) -> Self {
        Self {
            caps,
            calls: Vec::new(),
            backbuffer: (1280, 720),
            timer_ns: 1_000,
            timers_ready: true,
            fail_compile: None,
            fail_texture: false,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
        }
    }

    fn id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Number of recorded calls matching `pred`.
    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    /// Forgets recorded calls.
    pub fn reset_calls(&mut self) {
        self.calls.clear();
    }

    /// Current contents of a buffer.
    pub fn buffer_bytes(&self, id: BufferId) -> &[u8] {
        &self.buffers[&id]
    }

    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }
}

impl NativeDevice for MockNative {
    fn caps(&self) -> Caps {
        self.caps.clone()
    }

    fn backbuffer_size(&self) -> (u32, u32) {
        self.backbuffer
    }

    fn backbuffer_format(&self) -> TextureFormat {
        TextureFormat::Bgra8Unorm
    }

    fn create_buffer(&mut self, desc: &BufferDesc, data: Option<&[u8]>) -> Result<BufferId, NativeError> {
        let id = BufferId(self.id());
        let mut bytes = vec![0u8; desc.size as usize];
        if let Some(data) = data {
            bytes[..data.len()].copy_from_slice(data);
        }
        self.buffers.insert(id, bytes);
        self.calls.push(Call::CreateBuffer { id, size: desc.size });
        Ok(id)
    }

    fn update_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), NativeError> {
        let bytes = self
            .buffers
            .get_mut(&id)
            .ok_or_else(|| NativeError::UnknownId(format!("{id:?}")))?;
        let start = offset as usize;
        bytes[start..start + data.len()].copy_from_slice(data);
        self.calls.push(Call::UpdateBuffer { id, offset, len: data.len() });
        Ok(())
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        self.buffers.remove(&id);
        self.calls.push(Call::DestroyBuffer(id));
    }

    fn create_texture(&mut self, desc: &TextureDesc, data: Option<&[u8]>) -> Result<TextureId, NativeError> {
        if std::mem::take(&mut self.fail_texture) {
            return Err(NativeError::OutOfMemory);
        }
        let id = TextureId(self.id());
        let bytes = match data {
            Some(data) => data.to_vec(),
            None => vec![0u8; desc.level0_size() as usize],
        };
        self.textures.insert(id, (desc.clone(), bytes));
        self.calls.push(Call::CreateTexture { id, desc: desc.clone() });
        Ok(id)
    }

    fn update_texture(&mut self, id: TextureId, _region: &TextureRegion, _data: &[u8]) -> Result<(), NativeError> {
        self.calls.push(Call::UpdateTexture(id));
        Ok(())
    }

    fn generate_mips(&mut self, id: TextureId) -> Result<(), NativeError> {
        self.calls.push(Call::GenerateMips(id));
        Ok(())
    }

    fn destroy_texture(&mut self, id: TextureId) {
        self.textures.remove(&id);
        self.calls.push(Call::DestroyTexture(id));
    }

    fn create_sampler(&mut self, _desc: &SamplerDesc) -> Result<SamplerId, NativeError> {
        let id = SamplerId(self.id());
        self.calls.push(Call::CreateSampler(id));
        Ok(id)
    }

    fn destroy_sampler(&mut self, id: SamplerId) {
        self.calls.push(Call::DestroySampler(id));
    }

    fn compile_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderId, NativeError> {
        self.calls.push(Call::CompileShader(desc.stage));
        if let Some(log) = self.fail_compile.take() {
            return Err(NativeError::Compilation(log));
        }
        Ok(ShaderId(self.id()))
    }

    fn destroy_shader(&mut self, id: ShaderId) {
        self.calls.push(Call::DestroyShader(id));
    }

    fn link_program(&mut self, _link: &ProgramLink<'_>) -> Result<ProgramId, NativeError> {
        let id = ProgramId(self.id());
        self.calls.push(Call::LinkProgram(id));
        Ok(id)
    }

    fn destroy_program(&mut self, id: ProgramId) {
        self.calls.push(Call::DestroyProgram(id));
    }

    fn use_program(&mut self, id: ProgramId, v_flip: f32) {
        self.calls.push(Call::UseProgram { id, v_flip });
    }

    fn bind_vertex_input(&mut self, _layout: &InputLayoutDesc, streams: &[VertexStream]) {
        self.calls.push(Call::BindVertexInput(streams.to_vec()));
    }

    fn apply_raster_state(&mut self, _desc: &RasterizerStateDesc, front_face: FrontFace) {
        self.calls.push(Call::ApplyRaster(front_face));
    }

    fn apply_blend_state(&mut self, _desc: &BlendStateDesc) {
        self.calls.push(Call::ApplyBlend);
    }

    fn apply_depth_stencil_state(&mut self, desc: &DepthStencilDesc, stencil_ref: u8) {
        self.calls.push(Call::ApplyDepthStencil {
            depth_enable: desc.depth_enable,
            stencil_ref,
        });
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.calls.push(Call::SetViewport(*viewport));
    }

    fn set_scissor(&mut self, rect: &Rect) {
        self.calls.push(Call::SetScissor(*rect));
    }

    fn set_rasterizer_discard(&mut self, discard: bool) {
        self.calls.push(Call::RasterizerDiscard(discard));
    }

    fn bind_texture(&mut self, unit: u32, texture: Option<TextureId>, _sampler: Option<SamplerId>, _stages: ShaderStages) {
        self.calls.push(Call::BindTexture { unit, texture });
    }

    fn bind_constant_buffer(&mut self, unit: u32, buffer: BufferId, offset: u64, size: u64, _stages: ShaderStages) {
        self.calls.push(Call::BindConstantBuffer {
            unit,
            buffer,
            offset,
            size,
        });
    }

    fn unbind_constant_buffer(&mut self, unit: u32) {
        self.calls.push(Call::UnbindConstantBuffer(unit));
    }

    fn bind_structured_buffer(&mut self, unit: u32, buffer: BufferId, _stages: ShaderStages) {
        self.calls.push(Call::BindStructuredBuffer { unit, buffer });
    }

    fn unbind_structured_buffer(&mut self, unit: u32) {
        self.calls.push(Call::UnbindStructuredBuffer(unit));
    }

    fn bind_index_buffer(&mut self, buffer: BufferId, _format: IndexFormat, offset: u64) {
        self.calls.push(Call::BindIndexBuffer { buffer, offset });
    }

    fn begin_stream_out(&mut self, buffer: BufferId, _topology: PrimitiveTopology) -> Result<(), NativeError> {
        self.calls.push(Call::BeginStreamOut(buffer));
        Ok(())
    }

    fn end_stream_out(&mut self) {
        self.calls.push(Call::EndStreamOut);
    }

    fn draw(&mut self, args: &DrawArgs) -> Result<(), NativeError> {
        self.calls.push(Call::Draw(*args));
        Ok(())
    }

    fn draw_indexed(&mut self, args: &DrawIndexedArgs) -> Result<(), NativeError> {
        self.calls.push(Call::DrawIndexed(*args));
        Ok(())
    }

    fn draw_auto(&mut self, topology: PrimitiveTopology) -> Result<(), NativeError> {
        self.calls.push(Call::DrawAuto(topology));
        Ok(())
    }

    fn dispatch_compute(&mut self, groups: [u32; 3]) -> Result<(), NativeError> {
        self.calls.push(Call::Dispatch(groups));
        Ok(())
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferId, NativeError> {
        let id = FramebufferId(self.id());
        self.calls.push(Call::CreateFramebuffer {
            id,
            desc: desc.clone(),
        });
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, id: FramebufferId) {
        self.calls.push(Call::DestroyFramebuffer(id));
    }

    fn bind_framebuffer(&mut self, id: Option<FramebufferId>) {
        self.calls.push(Call::BindFramebuffer(id));
    }

    fn clear(&mut self, _clear: &ClearState) -> Result<(), NativeError> {
        self.calls.push(Call::Clear);
        Ok(())
    }

    fn blit_framebuffer(&mut self, src: FramebufferId, dst: FramebufferId, _width: u32, _height: u32) -> Result<(), NativeError> {
        self.calls.push(Call::Blit { src, dst });
        Ok(())
    }

    fn create_timer_query(&mut self) -> Result<TimerQueryId, NativeError> {
        let id = TimerQueryId(self.id());
        self.calls.push(Call::CreateTimer(id));
        Ok(id)
    }

    fn begin_timer(&mut self, id: TimerQueryId) {
        self.calls.push(Call::BeginTimer(id));
    }

    fn end_timer(&mut self, id: TimerQueryId) {
        self.calls.push(Call::EndTimer(id));
    }

    fn timer_result(&mut self, _id: TimerQueryId) -> Option<u64> {
        self.timers_ready.then_some(self.timer_ns)
    }

    fn destroy_timer_query(&mut self, id: TimerQueryId) {
        self.calls.push(Call::DestroyTimer(id));
    }

    fn read_back_texture(
        &mut self,
        source: ReadBackSource,
        format: TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, NativeError> {
        let size = format.row_pitch(width) as usize * format.block_rows(height) as usize;
        match source {
            ReadBackSource::Backbuffer => Ok(vec![0x7f; size]),
            ReadBackSource::Texture(id) => {
                let (_, bytes) = self
                    .textures
                    .get(&id)
                    .ok_or_else(|| NativeError::UnknownId(format!("{id:?}")))?;
                let mut out = bytes.clone();
                out.resize(size, 0);
                Ok(out)
            }
        }
    }

    fn read_back_buffer(&mut self, id: BufferId, size: u64) -> Result<Vec<u8>, NativeError> {
        let bytes = self
            .buffers
            .get(&id)
            .ok_or_else(|| NativeError::UnknownId(format!("{id:?}")))?;
        Ok(bytes[..size as usize].to_vec())
    }

    fn resize_surface(&mut self, width: u32, height: u32) -> Result<(), NativeError> {
        self.backbuffer = (width, height);
        self.calls.push(Call::ResizeSurface(width, height));
        Ok(())
    }

    fn present(&mut self) -> Result<(), NativeError> {
        self.calls.push(Call::Present);
        Ok(())
    }

    fn sync(&mut self) -> Result<(), NativeError> {
        self.calls.push(Call::Sync);
        Ok(())
    }
}

/// A device over a mock with every capability.
pub fn device() -> Device<MockNative> {
    device_with(full_caps(), DeviceConfig::default())
}

pub fn device_with(caps: Caps, config: DeviceConfig) -> Device<MockNative> {
    Device::new(MockNative::new(caps), config).expect("mock device")
}

pub fn shader(stage: ShaderStage, source: &str) -> ShaderDesc {
    ShaderDesc {
        label: Some(format!("{stage:?}")),
        stage,
        source: ShaderSource::Wgsl(source.to_string()),
        entry_point: "main".to_string(),
        bindings: Vec::new(),
        stream_out_outputs: Vec::new(),
    }
}

/// One float3 position stream.
pub fn position_layout() -> InputLayoutDesc {
    InputLayoutDesc {
        attributes: vec![VertexAttribute {
            location: 0,
            format: VertexFormat::Float32x3,
            stream: 0,
            offset: 0,
            rate: InputRate::Vertex,
        }],
    }
}

/// Creates a vertex shader, pixel shader, input layout and 12-byte-stride
/// vertex buffer, and binds them all. Returns `(vs, ps, vb)`.
pub fn bind_minimal_pipeline(device: &mut Device<MockNative>, first: u32) -> (Handle, Handle, Handle) {
    let vs = Handle(first);
    let ps = Handle(first + 1);
    let layout = Handle(first + 2);
    let vb = Handle(first + 3);
    device
        .create_shader(vs, &shader(ShaderStage::Vertex, "vs"))
        .expect("vs");
    device
        .create_shader(ps, &shader(ShaderStage::Pixel, "ps"))
        .expect("ps");
    device.create_input_layout(layout, position_layout());
    device
        .create_buffer(vb, &BufferDesc::new(12 * 64, BindFlags::VERTEX), None)
        .expect("vb");
    device.set_shader(vs, ShaderStage::Vertex);
    device.set_shader(ps, ShaderStage::Pixel);
    device.set_input_layout(layout);
    device.set_vertex_buffers(
        0,
        &[vellum_core::binder::StreamBinding {
            buffer: vb,
            stride: 12,
            offset: 0,
        }],
    );
    (vs, ps, vb)
}
