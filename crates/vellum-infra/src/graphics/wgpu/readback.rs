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

//! Blocking GPU-to-CPU copies.

use vellum_core::desc::TextureFormat;
use vellum_core::NativeError;

/// Rounds a row size up to `wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`.
pub(crate) fn padded_bytes_per_row(unpadded: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Copies `rows` rows of `row_bytes` each out of a row-padded buffer.
pub(crate) fn unpad_rows(
    padded: &[u8],
    row_bytes: usize,
    padded_row: usize,
    rows: usize,
) -> Vec<u8> {
    let mut out = Vec::with_capacity(row_bytes * rows);
    for row in 0..rows {
        let start = row * padded_row;
        out.extend_from_slice(&padded[start..start + row_bytes]);
    }
    out
}

/// Copies tightly packed rows into a row-padded layout.
pub(crate) fn pad_rows(data: &[u8], row_bytes: usize, padded_row: usize, rows: usize) -> Vec<u8> {
    let mut out = vec![0u8; padded_row * rows];
    for (row, chunk) in data.chunks(row_bytes).take(rows).enumerate() {
        let start = row * padded_row;
        out[start..start + chunk.len()].copy_from_slice(chunk);
    }
    out
}

/// Submits `encoder`, maps `staging` and waits for the map to finish.
fn map_blocking(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    encoder: wgpu::CommandEncoder,
    staging: &wgpu::Buffer,
) -> Result<Vec<u8>, NativeError> {
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = flume::bounded(1);
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device
        .poll(wgpu::PollType::wait_indefinitely())
        .map_err(|e| NativeError::Backend(format!("device poll failed: {e}")))?;
    receiver
        .recv()
        .map_err(|_| NativeError::Backend("map_async callback dropped".to_owned()))?
        .map_err(|e| NativeError::Backend(format!("map_async failed: {e}")))?;

    let data = slice.get_mapped_range().to_vec();
    staging.unmap();
    Ok(data)
}

/// Reads mip 0, layer 0 of `texture`, tightly packed.
///
/// When `requested` swaps the red and blue channels of the texture's own
/// 8-bit format, texels are swizzled so the bytes match `requested`.
pub(crate) fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    requested: TextureFormat,
    width: u32,
    height: u32,
) -> Result<Vec<u8>, NativeError> {
    if texture.sample_count() > 1 {
        return Err(NativeError::Unsupported(
            "read-back of a multisampled texture".to_owned(),
        ));
    }
    let format = texture.format();
    let block_size = format.block_copy_size(None).ok_or_else(|| {
        NativeError::Unsupported(format!(
            "read-back of {format:?}, which has no single copy aspect"
        ))
    })?;
    let width = width.min(texture.width());
    let height = height.min(texture.height());
    let row_bytes = width * block_size;
    let padded_row = padded_bytes_per_row(row_bytes);

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Vellum Read-back Staging Buffer"),
        size: u64::from(padded_row) * u64::from(height),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Vellum Read-back Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );

    let padded = map_blocking(device, queue, encoder, &staging)?;
    let mut out = unpad_rows(&padded, row_bytes as usize, padded_row as usize, height as usize);
    if needs_red_blue_swap(format, requested) {
        for texel in out.chunks_exact_mut(4) {
            texel.swap(0, 2);
        }
    }
    Ok(out)
}

fn needs_red_blue_swap(actual: wgpu::TextureFormat, requested: TextureFormat) -> bool {
    use wgpu::TextureFormat as W;
    matches!(
        (actual, requested),
        (
            W::Bgra8Unorm | W::Bgra8UnormSrgb,
            TextureFormat::Rgba8Unorm | TextureFormat::Rgba8UnormSrgb
        ) | (
            W::Rgba8Unorm | W::Rgba8UnormSrgb,
            TextureFormat::Bgra8Unorm | TextureFormat::Bgra8UnormSrgb
        )
    )
}

/// Reads the first `size` bytes of `buffer`.
pub(crate) fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    size: u64,
) -> Result<Vec<u8>, NativeError> {
    let size = size.min(buffer.size());
    // Copies move whole 4-byte words.
    let copy_size = size.div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) * wgpu::COPY_BUFFER_ALIGNMENT;
    if copy_size > buffer.size() {
        return Err(NativeError::Unsupported(format!(
            "read-back of {size} bytes from a {}-byte buffer",
            buffer.size()
        )));
    }
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Vellum Buffer Read-back Staging"),
        size: copy_size.max(wgpu::COPY_BUFFER_ALIGNMENT),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Vellum Buffer Read-back Encoder"),
    });
    if copy_size > 0 {
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, copy_size);
    }
    let mut data = map_blocking(device, queue, encoder, &staging)?;
    data.truncate(size as usize);
    Ok(data)
}
