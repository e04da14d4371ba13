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

//! Synchronous GPU to CPU read-back.

use crate::desc::TextureFormat;
use crate::handle::Handle;

/// What to read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadBackParams {
    /// Buffer, texture or render target slot. [`Handle::NULL`] reads the backbuffer.
    pub resource: Handle,
    /// Overrides the format used to interpret texture data.
    pub format: Option<TextureFormat>,
}

impl ReadBackParams {
    /// Reads `resource` in its own format.
    pub fn new(resource: Handle) -> Self {
        Self {
            resource,
            format: None,
        }
    }

    /// Reads the default presentable target.
    pub fn backbuffer() -> Self {
        Self::new(Handle::NULL)
    }
}

/// Data handed to a read-back callback.
///
/// Rows are tightly packed: `row_pitch` is always `width * block_size` (per
/// block row for compressed formats), regardless of native padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadBackData {
    /// Raw bytes.
    pub data: Vec<u8>,
    /// Bytes per row.
    pub row_pitch: u32,
    /// Bytes per 2D slice.
    pub depth_pitch: u32,
    /// Bytes per texel (or block); `1` for buffers.
    pub block_size: u32,
}

impl ReadBackData {
    /// Wraps buffer contents, which have no row structure.
    pub fn from_buffer(data: Vec<u8>) -> Self {
        let len = data.len() as u32;
        Self {
            data,
            row_pitch: len,
            depth_pitch: len,
            block_size: 1,
        }
    }

    /// Wraps tightly packed texel data of a `width` x `height` image.
    pub fn from_texels(data: Vec<u8>, format: TextureFormat, width: u32, height: u32) -> Self {
        let row_pitch = format.row_pitch(width);
        Self {
            data,
            row_pitch,
            depth_pitch: row_pitch * format.block_rows(height),
            block_size: format.block_size(),
        }
    }
}

/// Callback invoked with the copied data before `read_back_resource` returns.
pub type ReadBackCallback = Box<dyn FnOnce(ReadBackData) + Send>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texel_pitches_are_tight() {
        let data = ReadBackData::from_texels(vec![0; 4 * 3 * 2], TextureFormat::Rgba8Unorm, 3, 2);
        assert_eq!(data.row_pitch, 12);
        assert_eq!(data.depth_pitch, 24);
        assert_eq!(data.block_size, 4);
    }

    #[test]
    fn buffers_are_one_row() {
        let data = ReadBackData::from_buffer(vec![1, 2, 3]);
        assert_eq!((data.row_pitch, data.depth_pitch, data.block_size), (3, 3, 1));
    }
}
