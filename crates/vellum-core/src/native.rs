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

//! The native backend seam.
//!
//! [`NativeDevice`] is the only trait a backend implements. The device context
//! decides *when* something must reach the GPU (state diffing, lazy resolves,
//! deferred resizes); the backend only translates each call into its API.

use crate::caps::Caps;
use crate::desc::{
    BlendStateDesc, BufferDesc, ClearState, DepthStencilDesc, FrontFace, IndexFormat,
    InputLayoutDesc, PrimitiveTopology, RasterizerStateDesc, Rect, SamplerDesc, ShaderBinding,
    ShaderDesc, ShaderStages, TextureDesc, TextureFormat, TextureRegion, Viewport,
};
use crate::error::NativeError;
use std::fmt::Debug;

macro_rules! native_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub usize);
    };
}

native_id!(
    /// A native buffer object.
    BufferId
);
native_id!(
    /// A native texture object.
    TextureId
);
native_id!(
    /// A native sampler object.
    SamplerId
);
native_id!(
    /// A compiled native shader.
    ShaderId
);
native_id!(
    /// A linked native program.
    ProgramId
);
native_id!(
    /// A native framebuffer (attachment set).
    FramebufferId
);
native_id!(
    /// A native elapsed-time query.
    TimerQueryId
);

/// One bound vertex stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VertexStream {
    /// Source buffer.
    pub buffer: BufferId,
    /// Bytes between consecutive elements.
    pub stride: u32,
    /// Byte offset of the first element.
    pub offset: u64,
}

/// The shaders and reflected bindings of a program to link.
#[derive(Debug, Clone, Copy)]
pub struct ProgramLink<'a> {
    /// Vertex shader, for raster programs.
    pub vertex: Option<ShaderId>,
    /// Pixel shader, for raster programs.
    pub pixel: Option<ShaderId>,
    /// Stream-out vertex shader, for capture programs.
    pub stream_out: Option<ShaderId>,
    /// Compute shader, for compute programs.
    pub compute: Option<ShaderId>,
    /// Union of the bindings reflected by every stage.
    pub bindings: &'a [ShaderBinding],
    /// Captured outputs of the stream-out shader.
    pub stream_out_outputs: &'a [String],
}

/// One attachment of a framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Attachment {
    /// Attached texture.
    pub texture: TextureId,
    /// Its format.
    pub format: TextureFormat,
    /// Cube face or array layer.
    pub layer: u32,
    /// Mip level.
    pub mip: u32,
    /// Sample count of the texture.
    pub samples: u32,
}

/// The attachment set of a native framebuffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferDesc {
    /// Colour attachments in MRT order.
    pub colours: Vec<Attachment>,
    /// Optional depth-stencil attachment.
    pub depth: Option<Attachment>,
    /// Common width of the attachments.
    pub width: u32,
    /// Common height of the attachments.
    pub height: u32,
}

/// Arguments of a non-indexed draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawArgs {
    /// Primitive assembly.
    pub topology: PrimitiveTopology,
    /// Vertices per instance.
    pub vertex_count: u32,
    /// First vertex.
    pub first_vertex: u32,
    /// Instances.
    pub instance_count: u32,
    /// First instance.
    pub first_instance: u32,
}

/// Arguments of an indexed draw. The first index is already folded into the
/// bound index buffer offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawIndexedArgs {
    /// Primitive assembly.
    pub topology: PrimitiveTopology,
    /// Indices per instance.
    pub index_count: u32,
    /// Value added to every index; `0` when folded into the vertex streams.
    pub base_vertex: i32,
    /// Instances.
    pub instance_count: u32,
    /// First instance.
    pub first_instance: u32,
}

/// What a texture read-back copies from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadBackSource {
    /// The default presentable target.
    Backbuffer,
    /// A texture.
    Texture(TextureId),
}

/// The operations every native backend provides.
///
/// All methods are called from the single thread that owns the device context,
/// in the exact order the client issued the corresponding commands.
pub trait NativeDevice: Debug + Send + 'static {
    /// Capabilities, queried once when the device context is created.
    fn caps(&self) -> Caps;

    /// Current size of the default presentable target.
    fn backbuffer_size(&self) -> (u32, u32);

    /// Format of the default colour target.
    fn backbuffer_format(&self) -> TextureFormat;

    // --- Buffers ---

    /// Creates a buffer, optionally filled with `data`.
    fn create_buffer(
        &mut self,
        desc: &BufferDesc,
        data: Option<&[u8]>,
    ) -> Result<BufferId, NativeError>;

    /// Writes `data` at `offset`, ordered after every previously issued call.
    fn update_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), NativeError>;

    /// Destroys a buffer.
    fn destroy_buffer(&mut self, id: BufferId);

    // --- Textures and samplers ---

    /// Creates a texture, optionally filled with tightly packed level-0 `data`.
    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        data: Option<&[u8]>,
    ) -> Result<TextureId, NativeError>;

    /// Writes tightly packed `data` into `region`.
    fn update_texture(
        &mut self,
        id: TextureId,
        region: &TextureRegion,
        data: &[u8],
    ) -> Result<(), NativeError>;

    /// Regenerates mip levels `1..` from level 0.
    fn generate_mips(&mut self, id: TextureId) -> Result<(), NativeError>;

    /// Destroys a texture.
    fn destroy_texture(&mut self, id: TextureId);

    /// Creates a sampler.
    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, NativeError>;

    /// Destroys a sampler.
    fn destroy_sampler(&mut self, id: SamplerId);

    // --- Shaders and programs ---

    /// Compiles a shader. Failures carry the native diagnostic log.
    fn compile_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderId, NativeError>;

    /// Destroys a compiled shader.
    fn destroy_shader(&mut self, id: ShaderId);

    /// Links shaders into a program.
    fn link_program(&mut self, link: &ProgramLink<'_>) -> Result<ProgramId, NativeError>;

    /// Destroys a program.
    fn destroy_program(&mut self, id: ProgramId);

    /// Makes `id` current. `v_flip` is `-1.0` when clip-space Y must be
    /// mirrored for an off-screen target, `1.0` otherwise.
    fn use_program(&mut self, id: ProgramId, v_flip: f32);

    // --- Pipeline state ---

    /// Binds the vertex streams read through `layout`.
    fn bind_vertex_input(&mut self, layout: &InputLayoutDesc, streams: &[VertexStream]);

    /// Applies a rasterizer state block with an explicit front-face winding.
    fn apply_raster_state(&mut self, desc: &RasterizerStateDesc, front_face: FrontFace);

    /// Applies a blend state block.
    fn apply_blend_state(&mut self, desc: &BlendStateDesc);

    /// Applies a depth-stencil state block with a stencil reference value.
    fn apply_depth_stencil_state(&mut self, desc: &DepthStencilDesc, stencil_ref: u8);

    /// Sets the viewport.
    fn set_viewport(&mut self, viewport: &Viewport);

    /// Sets the scissor rectangle.
    fn set_scissor(&mut self, rect: &Rect);

    /// Enables or disables rasterization (used during stream-out capture).
    fn set_rasterizer_discard(&mut self, discard: bool);

    /// Binds a texture and sampler pair at `unit`. `None` unbinds.
    fn bind_texture(
        &mut self,
        unit: u32,
        texture: Option<TextureId>,
        sampler: Option<SamplerId>,
        stages: ShaderStages,
    );

    /// Binds `size` bytes of `buffer` starting at `offset` as the constant buffer at `unit`.
    fn bind_constant_buffer(
        &mut self,
        unit: u32,
        buffer: BufferId,
        offset: u64,
        size: u64,
        stages: ShaderStages,
    );

    /// Clears the constant buffer at `unit`.
    fn unbind_constant_buffer(&mut self, unit: u32);

    /// Binds a read-only structured buffer at `unit`.
    fn bind_structured_buffer(&mut self, unit: u32, buffer: BufferId, stages: ShaderStages);

    /// Clears the structured buffer at `unit`.
    fn unbind_structured_buffer(&mut self, unit: u32);

    /// Binds the index buffer, `offset` bytes in.
    fn bind_index_buffer(&mut self, buffer: BufferId, format: IndexFormat, offset: u64);

    // --- Stream-out ---

    /// Starts capturing vertex output into `buffer`.
    fn begin_stream_out(
        &mut self,
        buffer: BufferId,
        topology: PrimitiveTopology,
    ) -> Result<(), NativeError>;

    /// Stops the capture started by [`NativeDevice::begin_stream_out`].
    fn end_stream_out(&mut self);

    // --- Work submission ---

    /// Issues a non-indexed draw with the bound state.
    fn draw(&mut self, args: &DrawArgs) -> Result<(), NativeError>;

    /// Issues an indexed draw with the bound state.
    fn draw_indexed(&mut self, args: &DrawIndexedArgs) -> Result<(), NativeError>;

    /// Draws the vertices captured by the last stream-out pass.
    fn draw_auto(&mut self, topology: PrimitiveTopology) -> Result<(), NativeError>;

    /// Dispatches the current compute program.
    fn dispatch_compute(&mut self, groups: [u32; 3]) -> Result<(), NativeError>;

    // --- Framebuffers ---

    /// Creates a framebuffer for an attachment set.
    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferId, NativeError>;

    /// Destroys a framebuffer.
    fn destroy_framebuffer(&mut self, id: FramebufferId);

    /// Binds a framebuffer, or the default target for `None`.
    fn bind_framebuffer(&mut self, id: Option<FramebufferId>);

    /// Clears the bound framebuffer.
    fn clear(&mut self, clear: &ClearState) -> Result<(), NativeError>;

    /// Copies the first colour attachment of `src` into `dst`, resolving
    /// samples when `src` is multisampled.
    fn blit_framebuffer(
        &mut self,
        src: FramebufferId,
        dst: FramebufferId,
        width: u32,
        height: u32,
    ) -> Result<(), NativeError>;

    // --- Timer queries ---

    /// Creates an elapsed-time query.
    fn create_timer_query(&mut self) -> Result<TimerQueryId, NativeError>;

    /// Starts timing. Only one query may be open at a time.
    fn begin_timer(&mut self, id: TimerQueryId);

    /// Stops timing.
    fn end_timer(&mut self, id: TimerQueryId);

    /// Elapsed nanoseconds of the last begin/end span, once available.
    fn timer_result(&mut self, id: TimerQueryId) -> Option<u64>;

    /// Destroys a query.
    fn destroy_timer_query(&mut self, id: TimerQueryId);

    // --- Read-back ---

    /// Copies mip 0 of a texture or the backbuffer, tightly packed.
    fn read_back_texture(
        &mut self,
        source: ReadBackSource,
        format: TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, NativeError>;

    /// Copies `size` bytes of a buffer.
    fn read_back_buffer(&mut self, id: BufferId, size: u64) -> Result<Vec<u8>, NativeError>;

    // --- Frame ---

    /// Reconfigures the default target to a new size.
    fn resize_surface(&mut self, width: u32, height: u32) -> Result<(), NativeError>;

    /// Submits outstanding work and presents the default target.
    fn present(&mut self) -> Result<(), NativeError>;

    /// Blocks until submitted work has completed.
    fn sync(&mut self) -> Result<(), NativeError>;
}
