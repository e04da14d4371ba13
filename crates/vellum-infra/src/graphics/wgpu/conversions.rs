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

use vellum_core::desc::{
    AddressMode, BindFlags, BlendFactor, BlendOp, CompareFunc, CullMode, FillMode, Filter,
    FrontFace, IndexFormat, MrtClear, PrimitiveTopology, ShaderStages, StencilFace, StencilOp,
    TargetBlend, TextureFormat, TextureKind, Usage, VertexFormat,
};

/// A local extension trait to convert vellum types into wgpu types.
/// This avoids Rust's orphan rules while keeping an idiomatic `.into_wgpu()` syntax.
pub trait IntoWgpu<T> {
    /// Consumes self and converts it into a wgpu-compatible type.
    fn into_wgpu(self) -> T;
}

// --- Formats ---

impl IntoWgpu<wgpu::TextureFormat> for TextureFormat {
    fn into_wgpu(self) -> wgpu::TextureFormat {
        match self {
            TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
            TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
            TextureFormat::Rgba32Uint => wgpu::TextureFormat::Rgba32Uint,
            TextureFormat::Rg16Float => wgpu::TextureFormat::Rg16Float,
            TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
            TextureFormat::R16Float => wgpu::TextureFormat::R16Float,
            TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
            TextureFormat::R32Uint => wgpu::TextureFormat::R32Uint,
            TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
            TextureFormat::Depth24Stencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
            TextureFormat::Bc1RgbaUnorm => wgpu::TextureFormat::Bc1RgbaUnorm,
            TextureFormat::Bc2RgbaUnorm => wgpu::TextureFormat::Bc2RgbaUnorm,
            TextureFormat::Bc3RgbaUnorm => wgpu::TextureFormat::Bc3RgbaUnorm,
        }
    }
}

/// Maps a surface format back to the vellum format it corresponds to.
pub fn from_wgpu_format(format: wgpu::TextureFormat) -> Option<TextureFormat> {
    Some(match format {
        wgpu::TextureFormat::Rgba8Unorm => TextureFormat::Rgba8Unorm,
        wgpu::TextureFormat::Rgba8UnormSrgb => TextureFormat::Rgba8UnormSrgb,
        wgpu::TextureFormat::Bgra8Unorm => TextureFormat::Bgra8Unorm,
        wgpu::TextureFormat::Bgra8UnormSrgb => TextureFormat::Bgra8UnormSrgb,
        wgpu::TextureFormat::Rgba16Float => TextureFormat::Rgba16Float,
        wgpu::TextureFormat::Rgba32Float => TextureFormat::Rgba32Float,
        wgpu::TextureFormat::Depth32Float => TextureFormat::Depth32Float,
        wgpu::TextureFormat::Depth24PlusStencil8 => TextureFormat::Depth24Stencil8,
        _ => return None,
    })
}

impl IntoWgpu<wgpu::TextureDimension> for TextureKind {
    fn into_wgpu(self) -> wgpu::TextureDimension {
        match self {
            TextureKind::D2 | TextureKind::D2Array | TextureKind::Cube => {
                wgpu::TextureDimension::D2
            }
            TextureKind::D3 => wgpu::TextureDimension::D3,
        }
    }
}

impl IntoWgpu<wgpu::TextureViewDimension> for TextureKind {
    fn into_wgpu(self) -> wgpu::TextureViewDimension {
        match self {
            TextureKind::D2 => wgpu::TextureViewDimension::D2,
            TextureKind::D2Array => wgpu::TextureViewDimension::D2Array,
            TextureKind::Cube => wgpu::TextureViewDimension::Cube,
            TextureKind::D3 => wgpu::TextureViewDimension::D3,
        }
    }
}

impl IntoWgpu<wgpu::VertexFormat> for VertexFormat {
    fn into_wgpu(self) -> wgpu::VertexFormat {
        match self {
            VertexFormat::Float32 => wgpu::VertexFormat::Float32,
            VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
            VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
            VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
            VertexFormat::Float16x2 => wgpu::VertexFormat::Float16x2,
            VertexFormat::Float16x4 => wgpu::VertexFormat::Float16x4,
            VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
            VertexFormat::Uint32x2 => wgpu::VertexFormat::Uint32x2,
            VertexFormat::Uint32x4 => wgpu::VertexFormat::Uint32x4,
            VertexFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
            VertexFormat::Uint8x4 => wgpu::VertexFormat::Uint8x4,
        }
    }
}

impl IntoWgpu<wgpu::IndexFormat> for IndexFormat {
    fn into_wgpu(self) -> wgpu::IndexFormat {
        match self {
            IndexFormat::Uint16 => wgpu::IndexFormat::Uint16,
            IndexFormat::Uint32 => wgpu::IndexFormat::Uint32,
        }
    }
}

// --- Usages ---

/// Buffer usages for a bind set. Every buffer can be copied both ways so
/// updates and read-back work regardless of how it was declared.
pub fn buffer_usages(bind: BindFlags, usage: Usage) -> wgpu::BufferUsages {
    let mut usages = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
    if bind.contains(BindFlags::VERTEX) || bind.contains(BindFlags::STREAM_OUT) {
        usages |= wgpu::BufferUsages::VERTEX;
    }
    if bind.contains(BindFlags::INDEX) {
        usages |= wgpu::BufferUsages::INDEX;
    }
    if bind.contains(BindFlags::CONSTANT) {
        usages |= wgpu::BufferUsages::UNIFORM;
    }
    if bind.contains(BindFlags::SHADER_RESOURCE) {
        usages |= wgpu::BufferUsages::STORAGE;
    }
    if usage == Usage::Staging {
        usages = wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST;
    }
    usages
}

/// Texture usages for a bind set and sample count.
///
/// Multisampled textures cannot be copied, and compressed formats cannot be
/// rendered to, so those bits are only added where `wgpu` accepts them.
pub fn texture_usages(
    bind: BindFlags,
    format: TextureFormat,
    sample_count: u32,
    mip_count: u32,
) -> wgpu::TextureUsages {
    let mut usages = wgpu::TextureUsages::TEXTURE_BINDING;
    if sample_count <= 1 {
        usages |= wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
    }
    let renderable = !format.is_compressed();
    let wants_target = bind.contains(BindFlags::RENDER_TARGET)
        || bind.contains(BindFlags::DEPTH_STENCIL)
        || (mip_count > 1 && !format.is_depth());
    if renderable && wants_target {
        usages |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    usages
}

/// Shader visibility for a stage set.
pub fn shader_stages(stages: ShaderStages) -> wgpu::ShaderStages {
    let mut out = wgpu::ShaderStages::NONE;
    if stages.contains(ShaderStages::VERTEX) {
        out |= wgpu::ShaderStages::VERTEX;
    }
    if stages.contains(ShaderStages::PIXEL) {
        out |= wgpu::ShaderStages::FRAGMENT;
    }
    if stages.contains(ShaderStages::COMPUTE) {
        out |= wgpu::ShaderStages::COMPUTE;
    }
    out
}

// --- Pipeline state ---

impl IntoWgpu<wgpu::PrimitiveTopology> for PrimitiveTopology {
    fn into_wgpu(self) -> wgpu::PrimitiveTopology {
        match self {
            PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
            PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
            PrimitiveTopology::LineStrip => wgpu::PrimitiveTopology::LineStrip,
            PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
            PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        }
    }
}

impl IntoWgpu<wgpu::FrontFace> for FrontFace {
    fn into_wgpu(self) -> wgpu::FrontFace {
        match self {
            FrontFace::Ccw => wgpu::FrontFace::Ccw,
            FrontFace::Cw => wgpu::FrontFace::Cw,
        }
    }
}

impl IntoWgpu<Option<wgpu::Face>> for CullMode {
    fn into_wgpu(self) -> Option<wgpu::Face> {
        match self {
            CullMode::None => None,
            CullMode::Front => Some(wgpu::Face::Front),
            CullMode::Back => Some(wgpu::Face::Back),
        }
    }
}

impl IntoWgpu<wgpu::PolygonMode> for FillMode {
    fn into_wgpu(self) -> wgpu::PolygonMode {
        match self {
            FillMode::Solid => wgpu::PolygonMode::Fill,
            FillMode::Wireframe => wgpu::PolygonMode::Line,
        }
    }
}

impl IntoWgpu<wgpu::CompareFunction> for CompareFunc {
    fn into_wgpu(self) -> wgpu::CompareFunction {
        match self {
            CompareFunc::Never => wgpu::CompareFunction::Never,
            CompareFunc::Less => wgpu::CompareFunction::Less,
            CompareFunc::Equal => wgpu::CompareFunction::Equal,
            CompareFunc::LessEqual => wgpu::CompareFunction::LessEqual,
            CompareFunc::Greater => wgpu::CompareFunction::Greater,
            CompareFunc::NotEqual => wgpu::CompareFunction::NotEqual,
            CompareFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            CompareFunc::Always => wgpu::CompareFunction::Always,
        }
    }
}

impl IntoWgpu<wgpu::StencilOperation> for StencilOp {
    fn into_wgpu(self) -> wgpu::StencilOperation {
        match self {
            StencilOp::Keep => wgpu::StencilOperation::Keep,
            StencilOp::Zero => wgpu::StencilOperation::Zero,
            StencilOp::Replace => wgpu::StencilOperation::Replace,
            StencilOp::IncrSat => wgpu::StencilOperation::IncrementClamp,
            StencilOp::DecrSat => wgpu::StencilOperation::DecrementClamp,
            StencilOp::Invert => wgpu::StencilOperation::Invert,
            StencilOp::Incr => wgpu::StencilOperation::IncrementWrap,
            StencilOp::Decr => wgpu::StencilOperation::DecrementWrap,
        }
    }
}

impl IntoWgpu<wgpu::StencilFaceState> for StencilFace {
    fn into_wgpu(self) -> wgpu::StencilFaceState {
        wgpu::StencilFaceState {
            compare: self.func.into_wgpu(),
            fail_op: self.fail.into_wgpu(),
            depth_fail_op: self.depth_fail.into_wgpu(),
            pass_op: self.pass.into_wgpu(),
        }
    }
}

impl IntoWgpu<wgpu::BlendFactor> for BlendFactor {
    fn into_wgpu(self) -> wgpu::BlendFactor {
        match self {
            BlendFactor::Zero => wgpu::BlendFactor::Zero,
            BlendFactor::One => wgpu::BlendFactor::One,
            BlendFactor::SrcColour => wgpu::BlendFactor::Src,
            BlendFactor::InvSrcColour => wgpu::BlendFactor::OneMinusSrc,
            BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
            BlendFactor::InvSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
            BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
            BlendFactor::InvDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
            BlendFactor::DstColour => wgpu::BlendFactor::Dst,
            BlendFactor::InvDstColour => wgpu::BlendFactor::OneMinusDst,
            BlendFactor::SrcAlphaSaturate => wgpu::BlendFactor::SrcAlphaSaturated,
        }
    }
}

impl IntoWgpu<wgpu::BlendOperation> for BlendOp {
    fn into_wgpu(self) -> wgpu::BlendOperation {
        match self {
            BlendOp::Add => wgpu::BlendOperation::Add,
            BlendOp::Subtract => wgpu::BlendOperation::Subtract,
            BlendOp::RevSubtract => wgpu::BlendOperation::ReverseSubtract,
            BlendOp::Min => wgpu::BlendOperation::Min,
            BlendOp::Max => wgpu::BlendOperation::Max,
        }
    }
}

impl IntoWgpu<Option<wgpu::BlendState>> for TargetBlend {
    fn into_wgpu(self) -> Option<wgpu::BlendState> {
        if !self.enabled {
            return None;
        }
        Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: self.src.into_wgpu(),
                dst_factor: self.dst.into_wgpu(),
                operation: self.op.into_wgpu(),
            },
            alpha: wgpu::BlendComponent {
                src_factor: self.src_alpha.into_wgpu(),
                dst_factor: self.dst_alpha.into_wgpu(),
                operation: self.op_alpha.into_wgpu(),
            },
        })
    }
}

/// Colour write mask from the low four bits (R, G, B, A).
pub fn write_mask(mask: u8) -> wgpu::ColorWrites {
    wgpu::ColorWrites::from_bits_truncate(u32::from(mask & 0x0F))
}

// --- Samplers ---

impl IntoWgpu<wgpu::AddressMode> for AddressMode {
    fn into_wgpu(self) -> wgpu::AddressMode {
        match self {
            AddressMode::Wrap => wgpu::AddressMode::Repeat,
            AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
            AddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
            AddressMode::Border => wgpu::AddressMode::ClampToBorder,
        }
    }
}

impl IntoWgpu<(wgpu::FilterMode, wgpu::MipmapFilterMode)> for Filter {
    fn into_wgpu(self) -> (wgpu::FilterMode, wgpu::MipmapFilterMode) {
        match self {
            Filter::Point => (wgpu::FilterMode::Nearest, wgpu::MipmapFilterMode::Nearest),
            Filter::Linear | Filter::Anisotropic => {
                (wgpu::FilterMode::Linear, wgpu::MipmapFilterMode::Linear)
            }
        }
    }
}

// --- Clears ---

impl IntoWgpu<wgpu::Color> for MrtClear {
    fn into_wgpu(self) -> wgpu::Color {
        match self {
            MrtClear::F32([r, g, b, a]) => wgpu::Color {
                r: f64::from(r),
                g: f64::from(g),
                b: f64::from(b),
                a: f64::from(a),
            },
            MrtClear::U32([r, g, b, a]) => wgpu::Color {
                r: f64::from(r),
                g: f64::from(g),
                b: f64::from(b),
                a: f64::from(a),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_stencil_format_maps_to_depth24_plus() {
        let format: wgpu::TextureFormat = TextureFormat::Depth24Stencil8.into_wgpu();
        assert_eq!(format, wgpu::TextureFormat::Depth24PlusStencil8);
        assert_eq!(from_wgpu_format(format), Some(TextureFormat::Depth24Stencil8));
    }

    #[test]
    fn test_unknown_surface_format_has_no_mapping() {
        assert_eq!(from_wgpu_format(wgpu::TextureFormat::Rgb10a2Unorm), None);
    }

    #[test]
    fn test_multisampled_textures_are_not_copyable() {
        let usages = texture_usages(
            BindFlags::RENDER_TARGET,
            TextureFormat::Rgba8Unorm,
            4,
            1,
        );
        assert!(usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
        assert!(!usages.contains(wgpu::TextureUsages::COPY_SRC));
    }

    #[test]
    fn test_mipmapped_textures_are_renderable_for_generation() {
        let usages = texture_usages(
            BindFlags::SHADER_RESOURCE,
            TextureFormat::Rgba8Unorm,
            1,
            4,
        );
        assert!(usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
        let compressed = texture_usages(
            BindFlags::SHADER_RESOURCE,
            TextureFormat::Bc1RgbaUnorm,
            1,
            4,
        );
        assert!(!compressed.contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
    }

    #[test]
    fn test_staging_buffers_only_copy() {
        let usages = buffer_usages(BindFlags::VERTEX, Usage::Staging);
        assert_eq!(
            usages,
            wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST
        );
    }

    #[test]
    fn test_disabled_blend_is_none_and_mask_keeps_low_bits() {
        let blend: Option<wgpu::BlendState> = TargetBlend::default().into_wgpu();
        assert!(blend.is_none());
        assert_eq!(write_mask(0xFF), wgpu::ColorWrites::ALL);
        assert_eq!(write_mask(0b0001), wgpu::ColorWrites::RED);
    }
}
