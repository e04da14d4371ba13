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

//! Creation descriptors and state blocks.
//!
//! These are the plain-data parameters clients pass to the `create_*` entry
//! points. They carry no native handles and are shared by every backend.

use serde::{Deserialize, Serialize};

crate::vellum_bitflags! {
    /// How a buffer or texture may be bound to the pipeline.
    pub struct BindFlags: u32 {
        /// Vertex stream source.
        const VERTEX = 1 << 0;
        /// Index source.
        const INDEX = 1 << 1;
        /// Constant (uniform) buffer.
        const CONSTANT = 1 << 2;
        /// Stream-out capture destination.
        const STREAM_OUT = 1 << 3;
        /// Sampled texture or structured buffer.
        const SHADER_RESOURCE = 1 << 4;
        /// Colour attachment.
        const RENDER_TARGET = 1 << 5;
        /// Depth-stencil attachment.
        const DEPTH_STENCIL = 1 << 6;
    }
}

crate::vellum_bitflags! {
    /// Shader stages a binding is visible to.
    pub struct ShaderStages: u32 {
        /// Vertex stage.
        const VERTEX = 1 << 0;
        /// Pixel (fragment) stage.
        const PIXEL = 1 << 1;
        /// Compute stage.
        const COMPUTE = 1 << 2;
    }
}

/// Expected update frequency of a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Usage {
    /// GPU read/write, occasional CPU updates.
    #[default]
    Default,
    /// Written once at creation.
    Immutable,
    /// Rewritten by the CPU every frame.
    Dynamic,
    /// CPU read-back staging.
    Staging,
}

/// Describes a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferDesc {
    /// Optional debug label.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Allowed bindings.
    pub bind: BindFlags,
    /// Update frequency.
    pub usage: Usage,
}

impl BufferDesc {
    /// A buffer of `size` bytes with the given bindings and default usage.
    pub fn new(size: u64, bind: BindFlags) -> Self {
        Self {
            label: None,
            size,
            bind,
            usage: Usage::Default,
        }
    }
}

/// Pixel formats understood by every backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextureFormat {
    /// 8-bit normalized RGBA.
    Rgba8Unorm,
    /// 8-bit normalized sRGB RGBA.
    Rgba8UnormSrgb,
    /// 8-bit normalized BGRA.
    Bgra8Unorm,
    /// 8-bit normalized sRGB BGRA.
    Bgra8UnormSrgb,
    /// 16-bit float RGBA.
    Rgba16Float,
    /// 32-bit float RGBA.
    Rgba32Float,
    /// 32-bit unsigned integer RGBA.
    Rgba32Uint,
    /// 16-bit float RG.
    Rg16Float,
    /// Single 8-bit normalized channel.
    R8Unorm,
    /// Single 16-bit float channel.
    R16Float,
    /// Single 32-bit float channel.
    R32Float,
    /// Single 32-bit unsigned integer channel.
    R32Uint,
    /// 32-bit float depth.
    Depth32Float,
    /// 24-bit depth with 8-bit stencil.
    Depth24Stencil8,
    /// BC1 (DXT1) block compression.
    Bc1RgbaUnorm,
    /// BC2 (DXT3) block compression.
    Bc2RgbaUnorm,
    /// BC3 (DXT5) block compression.
    Bc3RgbaUnorm,
}

impl TextureFormat {
    /// Size in bytes of one texel, or of one 4x4 block for compressed formats.
    pub const fn block_size(self) -> u32 {
        match self {
            TextureFormat::R8Unorm => 1,
            TextureFormat::R16Float => 2,
            TextureFormat::Rgba8Unorm
            | TextureFormat::Rgba8UnormSrgb
            | TextureFormat::Bgra8Unorm
            | TextureFormat::Bgra8UnormSrgb
            | TextureFormat::Rg16Float
            | TextureFormat::R32Float
            | TextureFormat::R32Uint
            | TextureFormat::Depth32Float
            | TextureFormat::Depth24Stencil8 => 4,
            TextureFormat::Rgba16Float => 8,
            TextureFormat::Rgba32Float | TextureFormat::Rgba32Uint => 16,
            TextureFormat::Bc1RgbaUnorm => 8,
            TextureFormat::Bc2RgbaUnorm | TextureFormat::Bc3RgbaUnorm => 16,
        }
    }

    /// Width and height of one block in texels.
    pub const fn block_dimension(self) -> u32 {
        if self.is_compressed() {
            4
        } else {
            1
        }
    }

    /// Returns `true` for block-compressed formats.
    pub const fn is_compressed(self) -> bool {
        matches!(
            self,
            TextureFormat::Bc1RgbaUnorm | TextureFormat::Bc2RgbaUnorm | TextureFormat::Bc3RgbaUnorm
        )
    }

    /// Returns `true` for depth and depth-stencil formats.
    pub const fn is_depth(self) -> bool {
        matches!(
            self,
            TextureFormat::Depth32Float | TextureFormat::Depth24Stencil8
        )
    }

    /// Returns `true` if the format carries a stencil aspect.
    pub const fn has_stencil(self) -> bool {
        matches!(self, TextureFormat::Depth24Stencil8)
    }

    /// Format of the single-sample texture a multisampled target resolves into.
    ///
    /// Depth-stencil contents are packed into a float colour target.
    pub const fn resolve_format(self) -> TextureFormat {
        match self {
            TextureFormat::Depth24Stencil8 => TextureFormat::R32Float,
            other => other,
        }
    }

    /// Bytes in one row of `width` texels, tightly packed.
    pub const fn row_pitch(self, width: u32) -> u32 {
        let dim = self.block_dimension();
        let blocks = (width + dim - 1) / dim;
        blocks * self.block_size()
    }

    /// Number of block rows covering `height` texels.
    pub const fn block_rows(self, height: u32) -> u32 {
        let dim = self.block_dimension();
        (height + dim - 1) / dim
    }
}

/// Dimensionality of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureKind {
    /// A 2D texture.
    #[default]
    D2,
    /// An array of 2D layers.
    D2Array,
    /// Six 2D faces.
    Cube,
    /// A volume.
    D3,
}

/// Describes a texture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureDesc {
    /// Optional debug label.
    pub label: Option<String>,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
    /// Depth for volumes, layer count for arrays and cubes (6 per cube).
    pub depth_or_layers: u32,
    /// Number of mip levels.
    pub mip_count: u32,
    /// Pixel format.
    pub format: TextureFormat,
    /// MSAA sample count; `1` for single-sampled textures.
    pub sample_count: u32,
    /// Dimensionality.
    pub kind: TextureKind,
    /// Allowed bindings.
    pub bind: BindFlags,
    /// Update frequency.
    pub usage: Usage,
}

impl TextureDesc {
    /// A single-mip sampled 2D texture.
    pub fn new_2d(width: u32, height: u32, format: TextureFormat) -> Self {
        Self {
            label: None,
            width,
            height,
            depth_or_layers: 1,
            mip_count: 1,
            format,
            sample_count: 1,
            kind: TextureKind::D2,
            bind: BindFlags::SHADER_RESOURCE,
            usage: Usage::Default,
        }
    }

    /// Size in bytes of mip 0 across all layers, tightly packed.
    pub fn level0_size(&self) -> u64 {
        self.format.row_pitch(self.width) as u64
            * self.format.block_rows(self.height) as u64
            * self.depth_or_layers.max(1) as u64
    }
}

/// A sub-region of one mip/layer of a texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextureRegion {
    /// Mip level.
    pub mip: u32,
    /// Array layer or cube face.
    pub layer: u32,
    /// Left edge in texels.
    pub x: u32,
    /// Top edge in texels.
    pub y: u32,
    /// Width in texels.
    pub width: u32,
    /// Height in texels.
    pub height: u32,
}

/// Texture filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Filter {
    /// Nearest texel.
    Point,
    /// Bilinear with linear mip blending.
    #[default]
    Linear,
    /// Anisotropic filtering.
    Anisotropic,
}

/// Out-of-range texture coordinate handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AddressMode {
    #[default]
    #[allow(missing_docs)]
    Wrap,
    #[allow(missing_docs)]
    Clamp,
    #[allow(missing_docs)]
    Mirror,
    #[allow(missing_docs)]
    Border,
}

/// Describes a sampler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerDesc {
    /// Minification, magnification and mip filter.
    pub filter: Filter,
    /// Addressing for all three axes.
    pub address: AddressMode,
    /// Lowest mip level to sample.
    pub min_lod: f32,
    /// Highest mip level to sample.
    pub max_lod: f32,
    /// Depth comparison for shadow samplers.
    pub compare: Option<CompareFunc>,
    /// Anisotropy clamp when `filter` is anisotropic.
    pub max_anisotropy: u16,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: Filter::Linear,
            address: AddressMode::Wrap,
            min_lod: 0.0,
            max_lod: 32.0,
            compare: None,
            max_anisotropy: 1,
        }
    }
}

/// The pipeline stage a shader is compiled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    /// Vertex shader.
    Vertex,
    /// Pixel (fragment) shader.
    Pixel,
    /// Geometry shader.
    Geometry,
    /// Vertex shader whose output is captured by stream-out.
    StreamOut,
    /// Compute shader.
    Compute,
}

/// Shader code in a language the backend accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShaderSource {
    /// WGSL text.
    Wgsl(String),
    /// GLSL text.
    Glsl(String),
    /// SPIR-V words.
    SpirV(Vec<u32>),
}

impl ShaderSource {
    /// The source text, when the shader is textual.
    pub fn text(&self) -> Option<&str> {
        match self {
            ShaderSource::Wgsl(s) | ShaderSource::Glsl(s) => Some(s),
            ShaderSource::SpirV(_) => None,
        }
    }
}

/// Kind of a reflected shader binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BindingKind {
    /// A constant buffer at a unit.
    ConstantBuffer,
    /// A sampled texture at a unit.
    Texture {
        /// View dimensionality expected by the shader.
        kind: TextureKind,
        /// `true` for depth textures sampled with comparison.
        depth: bool,
    },
    /// A sampler paired with the texture at the same unit.
    Sampler {
        /// `true` for comparison samplers.
        comparison: bool,
    },
    /// A read-only structured buffer.
    StructuredBuffer,
}

/// One reflected resource binding of a shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShaderBinding {
    /// What is bound.
    pub kind: BindingKind,
    /// The unit clients pass to `set_texture`/`set_constant_buffer`.
    pub unit: u32,
    /// Stages that read it.
    pub stages: ShaderStages,
}

/// Describes a shader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShaderDesc {
    /// Optional debug label.
    pub label: Option<String>,
    /// Target stage.
    pub stage: ShaderStage,
    /// Code.
    pub source: ShaderSource,
    /// Entry point name.
    pub entry_point: String,
    /// Resources the shader reads, used to build program layouts.
    pub bindings: Vec<ShaderBinding>,
    /// Captured output names for stream-out shaders.
    pub stream_out_outputs: Vec<String>,
}

/// Per-vertex or per-instance stepping of an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InputRate {
    /// Advances once per vertex.
    #[default]
    Vertex,
    /// Advances once every `step_rate` instances.
    Instance {
        /// Instances per step.
        step_rate: u32,
    },
}

/// Attribute data formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum VertexFormat {
    Float32,
    Float32x2,
    Float32x3,
    Float32x4,
    Float16x2,
    Float16x4,
    Uint32,
    Uint32x2,
    Uint32x4,
    Unorm8x4,
    Uint8x4,
}

impl VertexFormat {
    /// Size in bytes.
    pub const fn size(self) -> u32 {
        match self {
            VertexFormat::Float32 | VertexFormat::Uint32 => 4,
            VertexFormat::Float32x2 | VertexFormat::Uint32x2 | VertexFormat::Float16x4 => 8,
            VertexFormat::Float32x3 => 12,
            VertexFormat::Float32x4 | VertexFormat::Uint32x4 => 16,
            VertexFormat::Float16x2 | VertexFormat::Unorm8x4 | VertexFormat::Uint8x4 => 4,
        }
    }
}

/// One vertex attribute of an input layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VertexAttribute {
    /// Shader input location.
    pub location: u32,
    /// Data format.
    pub format: VertexFormat,
    /// Vertex stream the attribute is read from.
    pub stream: u32,
    /// Byte offset within one element of the stream.
    pub offset: u32,
    /// Stepping.
    pub rate: InputRate,
}

/// Describes how vertex streams feed shader inputs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct InputLayoutDesc {
    /// Every attribute read by the vertex shader.
    pub attributes: Vec<VertexAttribute>,
}

impl InputLayoutDesc {
    /// Number of vertex streams the layout reads from.
    pub fn stream_count(&self) -> usize {
        self.attributes
            .iter()
            .map(|a| a.stream as usize + 1)
            .max()
            .unwrap_or(0)
    }
}

/// Primitive assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
}

/// Index element size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum IndexFormat {
    Uint16,
    #[default]
    Uint32,
}

impl IndexFormat {
    /// Size of one index in bytes.
    pub const fn size(self) -> u64 {
        match self {
            IndexFormat::Uint16 => 2,
            IndexFormat::Uint32 => 4,
        }
    }
}

/// Polygon fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum FillMode {
    #[default]
    Solid,
    Wireframe,
}

/// Face culling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CullMode {
    None,
    Front,
    #[default]
    Back,
}

/// Winding order considered front-facing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum FrontFace {
    Ccw,
    Cw,
}

impl FrontFace {
    /// The opposite winding.
    pub const fn flipped(self) -> FrontFace {
        match self {
            FrontFace::Ccw => FrontFace::Cw,
            FrontFace::Cw => FrontFace::Ccw,
        }
    }
}

/// Rasterizer state block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RasterizerStateDesc {
    /// Fill mode.
    pub fill: FillMode,
    /// Cull mode.
    pub cull: CullMode,
    /// `true` if counter-clockwise triangles are front-facing.
    pub front_ccw: bool,
    /// Constant depth bias.
    pub depth_bias: i32,
    /// Depth bias clamp.
    pub depth_bias_clamp: f32,
    /// Slope-scaled depth bias.
    pub slope_scaled_depth_bias: f32,
    /// `false` clamps depth instead of clipping (depth clamp).
    pub depth_clip: bool,
    /// Enables the scissor test.
    pub scissor: bool,
    /// Enables multisample rasterization.
    pub multisample: bool,
}

impl Default for RasterizerStateDesc {
    fn default() -> Self {
        Self {
            fill: FillMode::Solid,
            cull: CullMode::Back,
            front_ccw: false,
            depth_bias: 0,
            depth_bias_clamp: 0.0,
            slope_scaled_depth_bias: 0.0,
            depth_clip: true,
            scissor: false,
            multisample: false,
        }
    }
}

impl RasterizerStateDesc {
    /// Front face declared by the state block.
    pub fn front_face(&self) -> FrontFace {
        if self.front_ccw {
            FrontFace::Ccw
        } else {
            FrontFace::Cw
        }
    }
}

/// Blend factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColour,
    InvSrcColour,
    SrcAlpha,
    InvSrcAlpha,
    DstAlpha,
    InvDstAlpha,
    DstColour,
    InvDstColour,
    SrcAlphaSaturate,
}

/// Blend operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum BlendOp {
    #[default]
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

/// Blend configuration of one colour target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetBlend {
    /// Enables blending.
    pub enabled: bool,
    /// Colour source factor.
    pub src: BlendFactor,
    /// Colour destination factor.
    pub dst: BlendFactor,
    /// Colour operation.
    pub op: BlendOp,
    /// Alpha source factor.
    pub src_alpha: BlendFactor,
    /// Alpha destination factor.
    pub dst_alpha: BlendFactor,
    /// Alpha operation.
    pub op_alpha: BlendOp,
    /// RGBA write mask, bit 0 = red.
    pub write_mask: u8,
}

impl Default for TargetBlend {
    fn default() -> Self {
        Self {
            enabled: false,
            src: BlendFactor::One,
            dst: BlendFactor::Zero,
            op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            op_alpha: BlendOp::Add,
            write_mask: 0x0F,
        }
    }
}

/// Blend state block.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlendStateDesc {
    /// Alpha-to-coverage.
    pub alpha_to_coverage: bool,
    /// Uses one entry per target when `true`, the first entry for all otherwise.
    pub independent: bool,
    /// Per-target blend.
    pub targets: Vec<TargetBlend>,
}

impl BlendStateDesc {
    /// Blend settings for colour target `index`.
    pub fn target(&self, index: usize) -> TargetBlend {
        let pick = if self.independent { index } else { 0 };
        self.targets.get(pick).copied().unwrap_or_default()
    }
}

/// Depth and stencil comparisons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum CompareFunc {
    Never,
    #[default]
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Stencil operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum StencilOp {
    #[default]
    Keep,
    Zero,
    Replace,
    IncrSat,
    DecrSat,
    Invert,
    Incr,
    Decr,
}

/// Stencil behaviour for one face.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StencilFace {
    /// Operation when the stencil test fails.
    pub fail: StencilOp,
    /// Operation when stencil passes and depth fails.
    pub depth_fail: StencilOp,
    /// Operation when both pass.
    pub pass: StencilOp,
    /// Stencil comparison.
    pub func: CompareFunc,
}

impl Default for StencilFace {
    fn default() -> Self {
        Self {
            fail: StencilOp::Keep,
            depth_fail: StencilOp::Keep,
            pass: StencilOp::Keep,
            func: CompareFunc::Always,
        }
    }
}

/// Depth-stencil state block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepthStencilDesc {
    /// Enables the depth test.
    pub depth_enable: bool,
    /// Enables depth writes.
    pub depth_write: bool,
    /// Depth comparison.
    pub depth_func: CompareFunc,
    /// Enables the stencil test.
    pub stencil_enable: bool,
    /// Stencil read mask.
    pub stencil_read_mask: u8,
    /// Stencil write mask.
    pub stencil_write_mask: u8,
    /// Front-face stencil.
    pub front: StencilFace,
    /// Back-face stencil.
    pub back: StencilFace,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_enable: true,
            depth_write: true,
            depth_func: CompareFunc::Less,
            stencil_enable: false,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            front: StencilFace::default(),
            back: StencilFace::default(),
        }
    }
}

crate::vellum_bitflags! {
    /// Surfaces a clear state touches.
    pub struct ClearFlags: u32 {
        /// Colour attachments.
        const COLOUR = 1 << 0;
        /// Depth aspect.
        const DEPTH = 1 << 1;
        /// Stencil aspect.
        const STENCIL = 1 << 2;
    }
}

/// Typed clear value of one colour attachment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MrtClear {
    /// Float or normalized targets.
    F32([f32; 4]),
    /// Integer targets.
    U32([u32; 4]),
}

/// Clear state block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClearState {
    /// Colour used for every attachment when `mrt` is empty.
    pub rgba: [f32; 4],
    /// Depth clear value.
    pub depth: f32,
    /// Stencil clear value.
    pub stencil: u8,
    /// Which surfaces to clear.
    pub flags: ClearFlags,
    /// Per-attachment clear values, at most [`MAX_COLOUR_TARGETS`].
    pub mrt: Vec<MrtClear>,
}

impl Default for ClearState {
    fn default() -> Self {
        Self {
            rgba: [0.0, 0.0, 0.0, 1.0],
            depth: 1.0,
            stencil: 0,
            flags: ClearFlags::COLOUR | ClearFlags::DEPTH,
            mrt: Vec::new(),
        }
    }
}

impl ClearState {
    /// Clear value for colour attachment `index`.
    pub fn colour(&self, index: usize) -> MrtClear {
        self.mrt
            .get(index)
            .copied()
            .unwrap_or(MrtClear::F32(self.rgba))
    }
}

/// Maximum simultaneously bound colour targets.
pub const MAX_COLOUR_TARGETS: usize = 8;

/// Viewport rectangle and depth range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    /// A full-depth viewport covering `width` x `height`.
    pub fn new(width: f32, height: f32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width,
            height,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

/// Scissor rectangle, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub struct Rect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}
