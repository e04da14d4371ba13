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

//! Integration tests for render targets, the framebuffer cache, deferred
//! backbuffer resizes, resolves and the per-frame perf markers.

mod common;

use approx::assert_relative_eq;
use common::{bind_minimal_pipeline, device, device_with, full_caps, shader, Call, MockNative};
use vellum_core::caps::CapsFlags;
use vellum_core::desc::{
    ClearState, PrimitiveTopology, ShaderStage, ShaderStages, TextureFormat, TextureKind,
};
use vellum_core::device::GPU_TOTAL_MARKER;
use vellum_core::markers::MAX_BACKLOG_FRAMES;
use vellum_core::targets::{MipCount, ResolveMode, TargetBinding, TargetParams, TargetSize};
use vellum_core::{Device, DeviceConfig, DeviceError, Handle, NativeError, ResourceError};

const CLEAR: Handle = Handle(5);

fn relative_target(device: &mut Device<MockNative>, slot: Handle, track: bool) {
    device
        .create_render_target(
            slot,
            TargetParams::new(
                TargetSize::BackbufferRelative { divisor: 2 },
                TextureFormat::Rgba16Float,
            ),
            track,
        )
        .expect("relative target");
}

fn absolute_params(format: TextureFormat) -> TargetParams {
    TargetParams::new(
        TargetSize::Absolute {
            width: 128,
            height: 128,
        },
        format,
    )
}

fn colour_binding(slot: Handle, face: u32) -> TargetBinding {
    TargetBinding {
        colours: vec![slot],
        depth: Handle::NULL,
        colour_face: face,
        depth_face: 0,
    }
}

fn framebuffers_created(device: &Device<MockNative>) -> usize {
    device
        .native()
        .count(|c| matches!(c, Call::CreateFramebuffer { .. }))
}

fn texture_creations(device: &Device<MockNative>) -> usize {
    device
        .native()
        .count(|c| matches!(c, Call::CreateTexture { .. }))
}

// ─────────────────────────────────────────────────────────────────────────────
// Framebuffer cache
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_identical_attachment_set_hits_the_cache() {
    let mut device = device();
    device.create_clear_state(CLEAR, ClearState::default());
    let (a, b) = (Handle(20), Handle(21));
    for slot in [a, b] {
        device
            .create_render_target(slot, absolute_params(TextureFormat::Rgba8Unorm), false)
            .expect("target");
    }

    device.set_targets(colour_binding(a, 0));
    device.clear(CLEAR, 0, 0).expect("clear a");
    device.set_targets(colour_binding(b, 0));
    device.clear(CLEAR, 0, 0).expect("clear b");
    device.set_targets(colour_binding(a, 0));
    device.clear(CLEAR, 0, 0).expect("clear a again");

    assert_eq!(framebuffers_created(&device), 2);
    assert_eq!(device.targets().cached_framebuffers(), 2);
    assert_eq!(device.native().count(|c| *c == Call::Clear), 3);
}

#[test]
fn test_face_change_misses_the_cache() {
    let mut device = device();
    device.create_clear_state(CLEAR, ClearState::default());
    let mut params = absolute_params(TextureFormat::Rgba8Unorm);
    params.kind = TextureKind::Cube;
    params.array_layers = 6;
    device
        .create_render_target(Handle(20), params, false)
        .expect("cube target");

    device.set_targets(colour_binding(Handle(20), 0));
    for face in 0..6 {
        device.clear(CLEAR, face, 0).expect("clear face");
    }
    device.clear(CLEAR, 2, 0).expect("clear face 2 again");

    assert_eq!(framebuffers_created(&device), 6);
    let layers: Vec<u32> = device
        .native()
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::CreateFramebuffer { desc, .. } => Some(desc.colours[0].layer),
            _ => None,
        })
        .collect();
    assert_eq!(layers, [0, 1, 2, 3, 4, 5]);
}

#[test]
#[should_panic(expected = "incomplete framebuffer")]
fn test_mismatched_attachment_sizes_panic() {
    let mut device = device();
    device.create_clear_state(CLEAR, ClearState::default());
    device
        .create_render_target(Handle(20), absolute_params(TextureFormat::Rgba8Unorm), false)
        .expect("colour");
    device
        .create_render_target(
            Handle(21),
            TargetParams::new(
                TargetSize::Absolute {
                    width: 64,
                    height: 64,
                },
                TextureFormat::Depth32Float,
            ),
            false,
        )
        .expect("depth");
    device.set_targets(TargetBinding {
        colours: vec![Handle(20)],
        depth: Handle(21),
        colour_face: 0,
        depth_face: 0,
    });
    device.clear(CLEAR, 0, 0).ok();
}

#[test]
fn test_releasing_a_target_drops_its_framebuffers() {
    let mut device = device();
    device.create_clear_state(CLEAR, ClearState::default());
    device
        .create_render_target(Handle(20), absolute_params(TextureFormat::Rgba8Unorm), false)
        .expect("target");
    device.set_targets(colour_binding(Handle(20), 0));
    device.clear(CLEAR, 0, 0).expect("clear");

    device.release_render_target(Handle(20));

    assert_eq!(device.targets().cached_framebuffers(), 0);
    assert_eq!(
        device
            .native()
            .count(|c| matches!(c, Call::DestroyFramebuffer(_))),
        1
    );
    assert!(device.binder().requested().targets.is_backbuffer());
}

#[test]
fn test_offscreen_clear_marks_target_written() {
    let mut device = device();
    device.create_clear_state(CLEAR, ClearState::default());
    device
        .create_render_target(Handle(20), absolute_params(TextureFormat::Rgba8Unorm), false)
        .expect("target");
    assert!(!device.resources().render_target(Handle(20)).invalidate);

    device.set_targets(colour_binding(Handle(20), 0));
    assert!(!device.resources().render_target(Handle(20)).invalidate);
    device.clear(CLEAR, 0, 0).expect("clear");

    assert!(device.resources().render_target(Handle(20)).invalidate);
}

// ─────────────────────────────────────────────────────────────────────────────
// Backbuffer resize
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_relative_target_follows_resize_at_next_frame() {
    let mut device = device();
    relative_target(&mut device, Handle(20), true);
    assert_eq!(
        device.resources().render_target(Handle(20)).resolved_size,
        (640, 360)
    );

    device.resize_backbuffer(1920, 1080);
    assert_eq!(device.backbuffer_size(), (1920, 1080));
    assert_eq!(
        device.resources().render_target(Handle(20)).resolved_size,
        (640, 360)
    );

    device.new_frame().expect("new frame");
    assert_eq!(
        device.resources().render_target(Handle(20)).resolved_size,
        (960, 540)
    );
    assert_eq!(device.native().backbuffer, (1920, 1080));
}

#[test]
fn test_unchanged_resize_is_a_noop() {
    let mut device = device();
    relative_target(&mut device, Handle(20), true);
    let before = texture_creations(&device);

    device.resize_backbuffer(1280, 720);
    device.new_frame().expect("new frame");

    assert_eq!(device.resize_index(), 0);
    assert_eq!(texture_creations(&device), before);
    assert_eq!(device.native().count(|c| matches!(c, Call::ResizeSurface(..))), 0);
}

#[test]
fn test_tracked_targets_are_recreated_exactly_once() {
    let mut device = device();
    relative_target(&mut device, Handle(20), true);
    relative_target(&mut device, Handle(21), true);
    relative_target(&mut device, Handle(22), false);
    let before = texture_creations(&device);

    device.resize_backbuffer(1600, 900);
    device.resize_backbuffer(1920, 1080);
    assert_eq!(device.resize_index(), 2);
    device.new_frame().expect("new frame");
    device.new_frame().expect("second frame");

    assert_eq!(texture_creations(&device), before + 2);
    assert_eq!(device.native().count(|c| matches!(c, Call::ResizeSurface(..))), 1);
    assert_eq!(
        device.resources().render_target(Handle(22)).resolved_size,
        (640, 360)
    );
}

#[test]
fn test_failed_resize_keeps_old_textures_and_retries() {
    let mut device = device();
    relative_target(&mut device, Handle(20), true);
    let old = device
        .resources()
        .render_target(Handle(20))
        .texture
        .expect("texture");

    device.resize_backbuffer(1920, 1080);
    device.native_mut().fail_texture = true;
    let err = device.new_frame().expect_err("allocation fails");
    assert!(matches!(err, DeviceError::Native(NativeError::OutOfMemory)));

    let record = device.resources().render_target(Handle(20));
    assert_eq!(record.texture, Some(old));
    assert_eq!(record.resolved_size, (640, 360));
    assert!(device.targets().resize_pending());
    assert_eq!(device.targets().applied_backbuffer_size(), (1280, 720));
    assert_eq!(device.native().live_textures(), 1);

    device.new_frame().expect("retry");
    let record = device.resources().render_target(Handle(20));
    assert_ne!(record.texture, Some(old));
    assert_eq!(record.resolved_size, (960, 540));
    assert!(!device.targets().resize_pending());
    assert_eq!(device.native().live_textures(), 1);
}

#[test]
fn test_target_created_during_pending_resize_uses_applied_size() {
    let config = DeviceConfig {
        resize_debounce_frames: 1,
        ..DeviceConfig::default()
    };
    let mut device = device_with(full_caps(), config);
    device.resize_backbuffer(1920, 1080);
    device.new_frame().expect("debounced frame");
    assert!(device.targets().resize_pending());

    relative_target(&mut device, Handle(20), true);
    assert_eq!(
        device.resources().render_target(Handle(20)).resolved_size,
        (640, 360)
    );

    device.present().expect("present");
    device.new_frame().expect("frame 1");
    assert_eq!(device.targets().applied_backbuffer_size(), (1920, 1080));
    assert_eq!(
        device.resources().render_target(Handle(20)).resolved_size,
        (960, 540)
    );
}

#[test]
fn test_zero_sized_resize_is_ignored() {
    let mut device = device();
    device.resize_backbuffer(0, 720);
    assert_eq!(device.resize_index(), 0);
    assert_eq!(device.backbuffer_size(), (1280, 720));
}

#[test]
fn test_debounce_defers_resize_until_quiet_presents() {
    let config = DeviceConfig {
        resize_debounce_frames: 2,
        ..DeviceConfig::default()
    };
    let mut device = device_with(full_caps(), config);
    relative_target(&mut device, Handle(20), true);

    device.resize_backbuffer(1920, 1080);
    device.new_frame().expect("frame 0");
    assert_eq!(
        device.resources().render_target(Handle(20)).resolved_size,
        (640, 360)
    );

    device.present().expect("present 0");
    device.new_frame().expect("frame 1");
    assert!(device.targets().resize_pending());

    device.present().expect("present 1");
    device.new_frame().expect("frame 2");
    assert!(!device.targets().resize_pending());
    assert_eq!(
        device.resources().render_target(Handle(20)).resolved_size,
        (960, 540)
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Resolve
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_blit_resolve_creates_resolve_texture_lazily() {
    let mut device = device();
    let mut params = absolute_params(TextureFormat::Rgba8Unorm);
    params.sample_count = 4;
    device
        .create_render_target(Handle(20), params, false)
        .expect("msaa target");
    assert!(device.resources().render_target(Handle(20)).texture.is_none());

    device
        .resolve_target(Handle(20), ResolveMode::Blit)
        .expect("resolve");
    device
        .resolve_target(Handle(20), ResolveMode::Blit)
        .expect("resolve again");

    assert!(device.resources().render_target(Handle(20)).texture.is_some());
    assert_eq!(device.native().count(|c| matches!(c, Call::Blit { .. })), 2);
    // One source and one destination framebuffer, reused by the second resolve.
    assert_eq!(framebuffers_created(&device), 2);
}

#[test]
fn test_blit_resolve_of_msaa_depth_is_unsupported() {
    let mut device = device();
    let mut params = absolute_params(TextureFormat::Depth24Stencil8);
    params.sample_count = 4;
    device
        .create_render_target(Handle(20), params, false)
        .expect("msaa depth");

    let err = device
        .resolve_target(Handle(20), ResolveMode::Blit)
        .expect_err("depth needs a custom resolve");
    assert!(matches!(
        err,
        DeviceError::Resource(ResourceError::UnsupportedFeature(_))
    ));
}

#[test]
fn test_custom_resolve_draws_fullscreen_triangle_with_size_constants() {
    let mut device = device();
    let (vs, ps) = (Handle(30), Handle(31));
    device
        .create_shader(vs, &shader(ShaderStage::Vertex, "fullscreen"))
        .expect("vs");
    device
        .create_shader(ps, &shader(ShaderStage::Pixel, "resolve depth"))
        .expect("ps");
    let mut params = absolute_params(TextureFormat::Depth24Stencil8);
    params.sample_count = 4;
    device
        .create_render_target(Handle(20), params, false)
        .expect("msaa depth");

    device
        .resolve_target(Handle(20), ResolveMode::Custom { vs, ps })
        .expect("custom resolve");

    let record = device.resources().render_target(Handle(20));
    assert!(!record.invalidate);
    let resolved = record.texture.expect("resolve texture");

    let native = device.native();
    let created = native.calls.iter().find_map(|c| match c {
        Call::CreateTexture { id, desc } if *id == resolved => Some(desc.clone()),
        _ => None,
    });
    assert_eq!(created.expect("resolve texture").format, TextureFormat::R32Float);

    let buffer = native
        .calls
        .iter()
        .find_map(|c| match c {
            Call::BindConstantBuffer {
                unit: 0,
                buffer,
                size: 16,
                ..
            } => Some(*buffer),
            _ => None,
        })
        .expect("resolve constants bound");
    let constants: Vec<f32> = native.buffer_bytes(buffer)[..16]
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    assert_relative_eq!(constants[0], 128.0);
    assert_relative_eq!(constants[1], 128.0);
    assert!(native
        .calls
        .iter()
        .any(|c| matches!(c, Call::Draw(args) if args.vertex_count == 3)));
}

fn depth_binding(slot: Handle) -> TargetBinding {
    TargetBinding {
        colours: Vec::new(),
        depth: slot,
        colour_face: 0,
        depth_face: 0,
    }
}

#[test]
#[should_panic(expected = "drawn to after its last custom resolve")]
fn test_sampling_msaa_depth_redrawn_after_custom_resolve_panics() {
    let mut device = device();
    bind_minimal_pipeline(&mut device, 10);
    let (vs, ps) = (Handle(30), Handle(31));
    device
        .create_shader(vs, &shader(ShaderStage::Vertex, "fullscreen"))
        .expect("vs");
    device
        .create_shader(ps, &shader(ShaderStage::Pixel, "resolve depth"))
        .expect("ps");
    let mut params = absolute_params(TextureFormat::Depth24Stencil8);
    params.sample_count = 4;
    device
        .create_render_target(Handle(20), params, false)
        .expect("msaa depth");

    device.set_targets(depth_binding(Handle(20)));
    device
        .draw(3, 0, PrimitiveTopology::TriangleList)
        .expect("depth pre-pass");
    device.set_targets(TargetBinding::default());
    device
        .resolve_target(Handle(20), ResolveMode::Custom { vs, ps })
        .expect("custom resolve");
    assert!(!device.resources().render_target(Handle(20)).invalidate);

    device.set_targets(depth_binding(Handle(20)));
    device
        .draw(3, 0, PrimitiveTopology::TriangleList)
        .expect("second depth pass");
    assert!(device.resources().render_target(Handle(20)).invalidate);

    device.set_targets(TargetBinding::default());
    device.set_texture(Handle(20), Handle::NULL, 0, ShaderStages::PIXEL);
    let _ = device.draw(3, 0, PrimitiveTopology::TriangleList);
}

#[test]
fn test_resolve_regenerates_mips_of_single_sampled_target() {
    let mut device = device();
    let mut params = absolute_params(TextureFormat::Rgba8Unorm);
    params.mip_count = MipCount::Auto;
    device
        .create_render_target(Handle(20), params, false)
        .expect("target");

    device
        .resolve_target(Handle(20), ResolveMode::Blit)
        .expect("mips");

    assert_eq!(device.native().count(|c| matches!(c, Call::GenerateMips(_))), 1);
    assert!(!device.resources().render_target(Handle(20)).invalidate);
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame and perf markers
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_present_advances_frame_index() {
    let mut device = device();
    assert_eq!(device.frame_index(), 0);
    device.present().expect("present");
    device.present().expect("present");
    device.sync().expect("sync");
    assert_eq!(device.frame_index(), 2);
    assert_eq!(device.native().count(|c| *c == Call::Present), 2);
}

#[test]
fn test_outer_marker_sums_inner_and_exclusive_time() {
    let mut device = device();
    device.push_marker("shadows").expect("push");
    device.push_marker("cascade 0").expect("push");
    device.pop_marker().expect("pop");
    device.pop_marker().expect("pop");
    device.present().expect("frame 0");
    assert!(device.last_gpu_timings().is_empty());

    device.present().expect("frame 1");

    let timings = device.last_gpu_timings();
    let elapsed = |name: &str| {
        timings
            .iter()
            .find(|t| t.name == name)
            .map(|t| (t.depth, t.elapsed_ns))
            .unwrap_or_else(|| panic!("no timing for {name}"))
    };
    // Five 1 µs segments: gpu total, shadows, cascade 0 and one pad per pop.
    assert_eq!(elapsed("cascade 0"), (2, 1_000));
    assert_eq!(elapsed("shadows"), (1, 3_000));
    assert_eq!(elapsed(GPU_TOTAL_MARKER), (0, 5_000));
    assert!(timings.iter().all(|t| t.frame == 0));
}

#[test]
fn test_pending_timer_results_are_not_published() {
    let mut device = device();
    device.native_mut().timers_ready = false;
    device.present().expect("frame 0");
    device.present().expect("frame 1");
    assert!(device.last_gpu_timings().is_empty());

    // The oldest unread frame is published first.
    device.native_mut().timers_ready = true;
    device.present().expect("frame 2");
    let timings = device.last_gpu_timings();
    assert_eq!(timings.len(), 1);
    assert_eq!(timings[0].frame, 0);
}

#[test]
fn test_late_timer_results_keep_a_bounded_backlog() {
    let mut device = device();
    assert!(device.gpu_timers_enabled());
    device.native_mut().timers_ready = false;
    for _ in 0..40 {
        device.present().expect("present");
    }

    let native = device.native();
    let created = native.count(|c| matches!(c, Call::CreateTimer(_)));
    let destroyed = native.count(|c| matches!(c, Call::DestroyTimer(_)));
    assert!(destroyed > 0);
    assert!(created - destroyed <= MAX_BACKLOG_FRAMES as usize + 2);

    device.native_mut().timers_ready = true;
    device.present().expect("publishes frame 0");
    assert_eq!(device.last_gpu_timings()[0].frame, 0);
    device.present().expect("publishes the backlog");
    let timings = device.last_gpu_timings();
    assert!(!timings.is_empty());
    assert!(timings.len() as u64 <= MAX_BACKLOG_FRAMES);
    assert!(timings.iter().all(|t| t.frame > 40 - MAX_BACKLOG_FRAMES - 1));
}

#[test]
fn test_timers_are_disabled_without_the_cap() {
    let mut caps = full_caps();
    caps.flags = CapsFlags::empty();
    let mut device = device_with(caps, DeviceConfig::default());
    assert!(!device.gpu_timers_enabled());
    device.push_marker("untimed").expect("push");
    device.pop_marker().expect("pop");
    device.present().expect("present");
    device.present().expect("present");
    assert!(device.last_gpu_timings().is_empty());
    assert_eq!(device.native().count(|c| matches!(c, Call::CreateTimer(_))), 0);
}

#[test]
#[should_panic(expected = "perf marker imbalance")]
fn test_unmatched_push_panics_at_present() {
    let mut device = device();
    device.push_marker("never popped").expect("push");
    device.present().ok();
}

#[test]
#[should_panic(expected = "pop_marker called with no open marker")]
fn test_unmatched_pop_panics() {
    let mut device = device();
    device.pop_marker().expect("closes the frame marker");
    device.pop_marker().ok();
}

#[test]
fn test_markers_without_timer_cap_issue_no_queries() {
    let mut caps = full_caps();
    caps.flags.remove(CapsFlags::GPU_TIMER);
    let mut device = device_with(caps, DeviceConfig::default());
    bind_minimal_pipeline(&mut device, 10);
    device.push_marker("work").expect("push");
    device
        .draw(3, 0, PrimitiveTopology::TriangleList)
        .expect("draw");
    device.pop_marker().expect("pop");
    device.present().expect("present");
    device.present().expect("present");

    assert_eq!(device.native().count(|c| matches!(c, Call::CreateTimer(_))), 0);
    assert!(device.last_gpu_timings().is_empty());
}
