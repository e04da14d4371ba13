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

//! Integration tests for resource creation, release, upload arenas and
//! read-back through the device context.

mod common;

use common::{device, device_with, full_caps, shader, Call};
use vellum_core::arena::ArenaKind;
use vellum_core::caps::CapsFlags;
use vellum_core::desc::{BindFlags, BufferDesc, ShaderStage, TextureDesc, TextureFormat};
use vellum_core::table::ResourceKind;
use vellum_core::targets::{TargetParams, TargetSize};
use vellum_core::{DeviceConfig, DeviceError, Handle, ReadBackParams, ResourceError, ShaderError};

// ─────────────────────────────────────────────────────────────────────────────
// Resource table
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_reserved_slots_are_populated_at_creation() {
    let device = device();
    let table = device.resources();
    assert_eq!(table.kind(Handle::NULL), ResourceKind::Empty);
    assert_eq!(table.kind(Handle::BACKBUFFER_COLOUR), ResourceKind::Backbuffer);
    assert_eq!(table.kind(Handle::BACKBUFFER_DEPTH), ResourceKind::Backbuffer);
    assert_eq!(table.kind(Handle::DYNAMIC_CONSTANTS), ResourceKind::Buffer);
    assert_eq!(table.kind(Handle::DYNAMIC_VERTICES), ResourceKind::Buffer);
}

#[test]
fn test_sparse_slots_grow_the_table_with_empty_entries() {
    let mut device = device();
    device
        .create_buffer(Handle(40), &BufferDesc::new(64, BindFlags::CONSTANT), None)
        .expect("buffer");
    let table = device.resources();
    assert!(table.capacity() > 40);
    for slot in Handle::FIRST_USER.0..40 {
        assert_eq!(table.kind(Handle(slot)), ResourceKind::Empty);
    }
    assert_eq!(table.kind(Handle(40)), ResourceKind::Buffer);
}

#[test]
fn test_release_destroys_native_object_and_empties_slot() {
    let mut device = device();
    let slot = Handle(6);
    device
        .create_buffer(slot, &BufferDesc::new(64, BindFlags::VERTEX), None)
        .expect("buffer");
    let id = device.resources().buffer(slot).id;

    device.release_buffer(slot);

    assert_eq!(device.resources().kind(slot), ResourceKind::Empty);
    assert_eq!(device.native().count(|c| *c == Call::DestroyBuffer(id)), 1);
}

#[test]
#[should_panic(expected = "release_texture called on resource #6, which is a buffer")]
fn test_typed_release_of_wrong_kind_panics() {
    let mut device = device();
    device
        .create_buffer(Handle(6), &BufferDesc::new(64, BindFlags::VERTEX), None)
        .expect("buffer");
    device.release_texture(Handle(6));
}

#[test]
#[should_panic(expected = "owned by the device")]
fn test_releasing_a_device_slot_panics() {
    let mut device = device();
    device.release_resource(Handle::DYNAMIC_CONSTANTS);
}

#[test]
fn test_replace_resource_moves_source_into_destination() {
    let mut device = device();
    let (dest, src) = (Handle(10), Handle(11));
    device
        .create_buffer(dest, &BufferDesc::new(16, BindFlags::CONSTANT), None)
        .expect("dest");
    device
        .create_buffer(src, &BufferDesc::new(32, BindFlags::CONSTANT), None)
        .expect("src");
    let old = device.resources().buffer(dest).id;
    let new = device.resources().buffer(src).id;

    device.replace_resource(dest, src, ResourceKind::Buffer);

    assert_eq!(device.resources().buffer(dest).id, new);
    assert_eq!(device.resources().buffer(dest).desc.size, 32);
    assert_eq!(device.resources().kind(src), ResourceKind::Empty);
    assert_eq!(device.native().count(|c| *c == Call::DestroyBuffer(old)), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Capabilities and failures
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_bc_texture_without_cap_is_unsupported_format() {
    let mut caps = full_caps();
    caps.flags = CapsFlags::GPU_TIMER;
    let mut device = device_with(caps, DeviceConfig::default());

    let desc = TextureDesc::new_2d(64, 64, TextureFormat::Bc1RgbaUnorm);
    let err = device
        .create_texture(Handle(6), &desc, None)
        .expect_err("BC1 is not supported");

    assert!(matches!(
        err,
        DeviceError::Resource(ResourceError::UnsupportedFormat(TextureFormat::Bc1RgbaUnorm))
    ));
    assert_eq!(device.resources().kind(Handle(6)), ResourceKind::Empty);
    assert_eq!(
        device
            .native()
            .count(|c| matches!(c, Call::CreateTexture { .. })),
        0
    );
}

#[test]
fn test_bc_texture_with_cap_is_created() {
    let mut device = device();
    let desc = TextureDesc::new_2d(64, 64, TextureFormat::Bc3RgbaUnorm);
    device
        .create_texture(Handle(6), &desc, None)
        .expect("BC3 is supported");
    assert_eq!(device.resources().kind(Handle(6)), ResourceKind::Texture);
}

#[test]
fn test_compile_failure_returns_shader_error() {
    let mut device = device();
    device.native_mut().fail_compile = Some("0:3: 'vec5' : no such type".to_string());

    let err = device
        .create_shader(Handle(6), &shader(ShaderStage::Pixel, "fn main() {\n  vec5 x;\n}"))
        .expect_err("compilation fails");

    match err {
        DeviceError::Shader(ShaderError::Compilation {
            slot,
            stage,
            details,
        }) => {
            assert_eq!(slot, Handle(6));
            assert_eq!(stage, ShaderStage::Pixel);
            assert!(details.contains("no such type"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(device.resources().kind(Handle(6)), ResourceKind::Empty);
}

#[test]
fn test_compute_shader_without_cap_is_unsupported_feature() {
    let mut caps = full_caps();
    caps.flags = CapsFlags::empty();
    let mut device = device_with(caps, DeviceConfig::default());
    let err = device
        .create_shader(Handle(6), &shader(ShaderStage::Compute, "cs"))
        .expect_err("compute is not supported");
    assert!(matches!(
        err,
        DeviceError::Resource(ResourceError::UnsupportedFeature(_))
    ));
}

#[test]
fn test_msaa_above_device_maximum_is_rejected() {
    let mut caps = full_caps();
    caps.max_samples = 4;
    let mut device = device_with(caps, DeviceConfig::default());
    let mut params = TargetParams::new(
        TargetSize::Absolute {
            width: 64,
            height: 64,
        },
        TextureFormat::Rgba8Unorm,
    );
    params.sample_count = 8;
    assert!(device.create_render_target(Handle(6), params, false).is_err());
}

// ─────────────────────────────────────────────────────────────────────────────
// Upload arenas
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_arena_bytes_survive_commit_at_returned_offset() {
    let mut device = device();
    let first = device
        .write_dynamic(ArenaKind::Constant, &[1, 2, 3, 4])
        .expect("write");
    device.commit_dynamic().expect("commit");

    let id = device.resources().buffer(Handle::DYNAMIC_CONSTANTS).id;
    let bytes = device.native().buffer_bytes(id);
    assert_eq!(first, 0);
    assert_eq!(&bytes[0..4], &[1, 2, 3, 4]);
}

#[test]
fn test_arena_overflow_reallocates_once_and_keeps_staged_data() {
    let mut device = device();
    let a = device
        .write_dynamic(ArenaKind::Vertex, &[0xaa; 20])
        .expect("write a");
    let b = device
        .write_dynamic(ArenaKind::Vertex, &[0xbb; 20])
        .expect("write b");
    assert_eq!((a, b), (0, 20));

    let arena = device.arena(ArenaKind::Vertex);
    assert_eq!(arena.reallocations(), 1);
    assert_eq!(arena.capacity(), 80);

    // The buffer record follows the reallocated native buffer.
    let record = device.resources().buffer(Handle::DYNAMIC_VERTICES);
    assert_eq!(record.id, arena.buffer());
    assert_eq!(record.desc.size, 80);

    device.commit_dynamic().expect("commit");
    let id = device.arena(ArenaKind::Vertex).buffer();
    let bytes = device.native().buffer_bytes(id);
    assert!(bytes[..20].iter().all(|&b| b == 0xaa));
    assert!(bytes[20..40].iter().all(|&b| b == 0xbb));
}

#[test]
fn test_constant_arena_offsets_are_256_aligned() {
    let mut device = device();
    let offsets: Vec<u64> = (0..3)
        .map(|i| {
            device
                .write_dynamic_pod(ArenaKind::Constant, &[i as f32; 4])
                .expect("write")
        })
        .collect();
    assert_eq!(offsets, [0, 256, 512]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Read-back
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_buffer_read_back_returns_contents() {
    let mut device = device();
    let slot = Handle(6);
    device
        .create_buffer(slot, &BufferDesc::new(8, BindFlags::SHADER_RESOURCE), Some(&[9; 8]))
        .expect("buffer");
    device
        .update_buffer(slot, &[1, 2], 2)
        .expect("update");

    let mut seen = None;
    device
        .read_back_resource(ReadBackParams::new(slot), |data| seen = Some(data))
        .expect("read back");

    let data = seen.expect("callback ran");
    assert_eq!(data.data, [9, 9, 1, 2, 9, 9, 9, 9]);
    assert_eq!(data.block_size, 1);
}

#[test]
fn test_backbuffer_read_back_uses_tight_pitch() {
    let mut device = device();
    let mut seen = None;
    device
        .read_back_resource(ReadBackParams::backbuffer(), |data| seen = Some(data))
        .expect("read back");

    let data = seen.expect("callback ran");
    assert_eq!(data.row_pitch, 1280 * 4);
    assert_eq!(data.depth_pitch, 1280 * 4 * 720);
    assert_eq!(data.data.len(), 1280 * 4 * 720);
}

#[test]
fn test_msaa_target_is_resolved_before_read_back() {
    let mut device = device();
    let mut params = TargetParams::new(
        TargetSize::Absolute {
            width: 32,
            height: 16,
        },
        TextureFormat::Rgba8Unorm,
    );
    params.sample_count = 4;
    device
        .create_render_target(Handle(6), params, false)
        .expect("target");
    assert!(device.resources().render_target(Handle(6)).texture.is_none());

    let mut seen = None;
    device
        .read_back_resource(ReadBackParams::new(Handle(6)), |data| seen = Some(data))
        .expect("read back");

    assert_eq!(device.native().count(|c| matches!(c, Call::Blit { .. })), 1);
    assert!(device.resources().render_target(Handle(6)).texture.is_some());
    assert_eq!(seen.expect("callback ran").row_pitch, 32 * 4);
}

#[test]
#[should_panic(expected = "cannot be read back")]
fn test_read_back_of_state_block_panics() {
    let mut device = device();
    device.create_clear_state(Handle(6), Default::default());
    device
        .read_back_resource(ReadBackParams::new(Handle(6)), |_| {})
        .ok();
}
