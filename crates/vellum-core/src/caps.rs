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

//! Device capabilities, populated once by the backend at initialization.

use crate::desc::TextureFormat;
use serde::{Deserialize, Serialize};

crate::vellum_bitflags! {
    /// Optional features a backend may support.
    pub struct CapsFlags: u32 {
        /// BC1 compressed textures.
        const TEX_FORMAT_BC1 = 1 << 0;
        /// BC2 compressed textures.
        const TEX_FORMAT_BC2 = 1 << 1;
        /// BC3 compressed textures.
        const TEX_FORMAT_BC3 = 1 << 2;
        /// GPU elapsed-time queries.
        const GPU_TIMER = 1 << 3;
        /// Depth clamping instead of clipping.
        const DEPTH_CLAMP = 1 << 4;
        /// Compute dispatch.
        const COMPUTE = 1 << 5;
        /// Stream-out (transform feedback) capture.
        const STREAM_OUT = 1 << 6;
        /// Draws accept a base vertex natively.
        const NATIVE_BASE_VERTEX = 1 << 7;
        /// Off-screen targets are stored upside down relative to the default target.
        const FLIP_OFFSCREEN_Y = 1 << 8;
    }
}

/// Human-readable identification of the native renderer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RendererInfo {
    /// Shading language and version, e.g. `"WGSL"` or `"GLSL 4.10"`.
    pub shader_version: String,
    /// Native API and version, e.g. `"Vulkan"`.
    pub api_version: String,
    /// Adapter or renderer name.
    pub renderer: String,
    /// Vendor string.
    pub vendor: String,
}

/// Read-only capability report of a device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caps {
    /// Identification strings.
    pub info: RendererInfo,
    /// Supported optional features.
    pub flags: CapsFlags,
    /// Largest supported texture dimension.
    pub max_texture_size: u32,
    /// Maximum MSAA sample count for render targets.
    pub max_samples: u32,
}

impl Caps {
    /// Returns `true` if every flag in `flags` is supported.
    pub fn supports(&self, flags: CapsFlags) -> bool {
        self.flags.contains(flags)
    }

    /// Returns `true` if textures of `format` can be created.
    pub fn supports_format(&self, format: TextureFormat) -> bool {
        match format {
            TextureFormat::Bc1RgbaUnorm => self.supports(CapsFlags::TEX_FORMAT_BC1),
            TextureFormat::Bc2RgbaUnorm => self.supports(CapsFlags::TEX_FORMAT_BC2),
            TextureFormat::Bc3RgbaUnorm => self.supports(CapsFlags::TEX_FORMAT_BC3),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compressed_formats_follow_flags() {
        let caps = Caps {
            flags: CapsFlags::TEX_FORMAT_BC1 | CapsFlags::GPU_TIMER,
            ..Caps::default()
        };
        assert!(caps.supports_format(TextureFormat::Bc1RgbaUnorm));
        assert!(!caps.supports_format(TextureFormat::Bc3RgbaUnorm));
        assert!(caps.supports_format(TextureFormat::Rgba8Unorm));
        assert!(caps.supports(CapsFlags::GPU_TIMER));
        assert!(!caps.supports(CapsFlags::GPU_TIMER | CapsFlags::COMPUTE));
    }
}
