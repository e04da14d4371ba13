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

//! Integration tests for the state binder: redundant-state elimination, the
//! program cache, off-screen flipping, base-vertex folding and stream-out.

mod common;

use approx::assert_relative_eq;
use common::{bind_minimal_pipeline, device, device_with, full_caps, shader, Call, MockNative};
use vellum_core::binder::StreamBinding;
use vellum_core::caps::CapsFlags;
use vellum_core::desc::{
    BindFlags, BufferDesc, FrontFace, IndexFormat, PrimitiveTopology, RasterizerStateDesc,
    ShaderStage, ShaderStages, TextureFormat,
};
use vellum_core::targets::{MipCount, TargetBinding, TargetParams, TargetSize};
use vellum_core::{Device, DeviceConfig, DeviceError, Handle, ResourceError};

const TRIANGLES: PrimitiveTopology = PrimitiveTopology::TriangleList;

fn v_flips(device: &Device<MockNative>) -> Vec<f32> {
    device
        .native()
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::UseProgram { v_flip, .. } => Some(*v_flip),
            _ => None,
        })
        .collect()
}

fn offscreen_target(device: &mut Device<MockNative>, slot: Handle) -> TargetBinding {
    device
        .create_render_target(
            slot,
            TargetParams::new(
                TargetSize::Absolute {
                    width: 64,
                    height: 64,
                },
                TextureFormat::Rgba8Unorm,
            ),
            false,
        )
        .expect("render target");
    TargetBinding {
        colours: vec![slot],
        depth: Handle::NULL,
        colour_face: 0,
        depth_face: 0,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Redundant state
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_same_raster_state_is_applied_once() {
    let mut device = device();
    bind_minimal_pipeline(&mut device, 10);
    device.create_rasterizer_state(Handle(20), RasterizerStateDesc::default());

    device.set_rasterizer_state(Handle(20));
    device.draw(3, 0, TRIANGLES).expect("draw");
    device.set_rasterizer_state(Handle(20));
    device.draw(3, 0, TRIANGLES).expect("draw");

    let native = device.native();
    assert_eq!(native.count(|c| matches!(c, Call::ApplyRaster(_))), 1);
    assert_eq!(native.count(|c| matches!(c, Call::Draw(_))), 2);
}

#[test]
fn test_unchanged_pipeline_issues_only_the_draw() {
    let mut device = device();
    bind_minimal_pipeline(&mut device, 10);
    device.draw(3, 0, TRIANGLES).expect("draw");
    device.native_mut().reset_calls();

    device.draw(6, 3, TRIANGLES).expect("draw");

    assert_eq!(
        device.native().calls,
        [Call::Draw(vellum_core::native::DrawArgs {
            topology: TRIANGLES,
            vertex_count: 6,
            first_vertex: 3,
            instance_count: 1,
            first_instance: 0,
        })]
    );
}

#[test]
fn test_invalidate_state_forces_full_rebind() {
    let mut device = device();
    bind_minimal_pipeline(&mut device, 10);
    device.draw(3, 0, TRIANGLES).expect("draw");
    device.invalidate_state();
    device.native_mut().reset_calls();

    device.draw(3, 0, TRIANGLES).expect("draw");

    let native = device.native();
    assert_eq!(native.count(|c| matches!(c, Call::UseProgram { .. })), 1);
    assert_eq!(native.count(|c| matches!(c, Call::BindVertexInput(_))), 1);
    assert_eq!(native.count(|c| matches!(c, Call::ApplyRaster(_))), 1);
    assert_eq!(native.count(|c| matches!(c, Call::LinkProgram(_))), 0);
}

#[test]
fn test_clearing_constant_unit_unbinds_native_buffer() {
    let mut device = device();
    bind_minimal_pipeline(&mut device, 10);
    device
        .create_buffer(Handle(20), &BufferDesc::new(256, BindFlags::CONSTANT), None)
        .expect("constants");
    device.set_constant_buffer(Handle(20), 1, ShaderStages::VERTEX, 0, 0);
    device.draw(3, 0, TRIANGLES).expect("bound");

    device.set_constant_buffer(Handle::NULL, 1, ShaderStages::VERTEX, 0, 0);
    device.draw(3, 0, TRIANGLES).expect("unbound");
    device.draw(3, 0, TRIANGLES).expect("still unbound");

    let native = device.native();
    assert_eq!(native.count(|c| matches!(c, Call::BindConstantBuffer { unit: 1, .. })), 1);
    assert_eq!(native.count(|c| *c == Call::UnbindConstantBuffer(1)), 1);
}

#[test]
fn test_releasing_structured_buffer_unbinds_its_unit() {
    let mut device = device();
    bind_minimal_pipeline(&mut device, 10);
    device
        .create_buffer(
            Handle(20),
            &BufferDesc::new(256, BindFlags::SHADER_RESOURCE),
            None,
        )
        .expect("structured");
    device.set_structured_buffer(Handle(20), 2, ShaderStages::PIXEL);
    device.draw(3, 0, TRIANGLES).expect("bound");

    device.release_buffer(Handle(20));
    device.draw(3, 0, TRIANGLES).expect("after release");

    let native = device.native();
    assert_eq!(native.count(|c| matches!(c, Call::BindStructuredBuffer { unit: 2, .. })), 1);
    assert_eq!(native.count(|c| *c == Call::UnbindStructuredBuffer(2)), 1);
}

// ─────────────────────────────────────────────────────────────────────────────
// Program cache
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_program_pairs_are_linked_once() {
    let mut device = device();
    let (_, ps_b, _) = bind_minimal_pipeline(&mut device, 10);
    let ps_c = Handle(30);
    device
        .create_shader(ps_c, &shader(ShaderStage::Pixel, "ps_c"))
        .expect("ps c");

    device.draw(3, 0, TRIANGLES).expect("A, B");
    device.draw(3, 0, TRIANGLES).expect("A, B again");
    assert_eq!(device.native().count(|c| matches!(c, Call::LinkProgram(_))), 1);

    device.set_shader(ps_c, ShaderStage::Pixel);
    device.draw(3, 0, TRIANGLES).expect("A, C");
    assert_eq!(device.native().count(|c| matches!(c, Call::LinkProgram(_))), 2);
    assert_eq!(device.binder().programs().len(), 2);

    device.set_shader(ps_b, ShaderStage::Pixel);
    device.draw(3, 0, TRIANGLES).expect("A, B from cache");
    assert_eq!(device.native().count(|c| matches!(c, Call::LinkProgram(_))), 2);
    assert_eq!(device.native().count(|c| matches!(c, Call::UseProgram { .. })), 3);
}

#[test]
fn test_releasing_a_shader_drops_its_programs() {
    let mut device = device();
    let (_, ps, _) = bind_minimal_pipeline(&mut device, 10);
    device.draw(3, 0, TRIANGLES).expect("draw");
    assert_eq!(device.binder().programs().len(), 1);

    device.release_shader(ps);

    assert!(device.binder().programs().is_empty());
    assert_eq!(device.native().count(|c| matches!(c, Call::DestroyProgram(_))), 1);
    assert_eq!(device.binder().requested().ps, Handle::NULL);
}

#[test]
#[should_panic(expected = "draw with no vertex shader bound")]
fn test_draw_without_vertex_shader_panics() {
    let mut device = device();
    device.draw(3, 0, TRIANGLES).ok();
}

// ─────────────────────────────────────────────────────────────────────────────
// Off-screen flip
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_offscreen_draw_flips_v_and_winding() {
    let mut device = device();
    bind_minimal_pipeline(&mut device, 10);
    let binding = offscreen_target(&mut device, Handle(20));

    device.draw(3, 0, TRIANGLES).expect("backbuffer draw");
    device.set_targets(binding);
    device.draw(3, 0, TRIANGLES).expect("offscreen draw");

    let flips = v_flips(&device);
    assert_eq!(flips.len(), 2);
    assert_relative_eq!(flips[0], 1.0);
    assert_relative_eq!(flips[1], -1.0);

    let fronts: Vec<FrontFace> = device
        .native()
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::ApplyRaster(front) => Some(*front),
            _ => None,
        })
        .collect();
    assert_eq!(fronts, [FrontFace::Cw, FrontFace::Ccw]);
}

#[test]
fn test_offscreen_draw_without_flip_cap_keeps_v() {
    let mut caps = full_caps();
    caps.flags.remove(CapsFlags::FLIP_OFFSCREEN_Y);
    let mut device = device_with(caps, DeviceConfig::default());
    bind_minimal_pipeline(&mut device, 10);
    let binding = offscreen_target(&mut device, Handle(20));
    device.set_targets(binding);

    device.draw(3, 0, TRIANGLES).expect("offscreen draw");

    let flips = v_flips(&device);
    assert_eq!(flips.len(), 1);
    assert_relative_eq!(flips[0], 1.0);
}

#[test]
#[should_panic(expected = "incomplete framebuffer")]
fn test_binding_a_buffer_as_target_panics() {
    let mut device = device();
    device
        .create_buffer(Handle(20), &BufferDesc::new(16, BindFlags::VERTEX), None)
        .expect("buffer");
    device.set_targets(TargetBinding {
        colours: vec![Handle(20)],
        depth: Handle::NULL,
        colour_face: 0,
        depth_face: 0,
    });
}

// ─────────────────────────────────────────────────────────────────────────────
// Vertex input and indices
// ─────────────────────────────────────────────────────────────────────────────

fn indexed_draw_calls(caps_flags: CapsFlags) -> Vec<Call> {
    let mut caps = full_caps();
    caps.flags = caps_flags;
    let mut device = device_with(caps, DeviceConfig::default());
    bind_minimal_pipeline(&mut device, 10);
    device
        .create_buffer(Handle(20), &BufferDesc::new(256, BindFlags::INDEX), None)
        .expect("index buffer");
    device.set_index_buffer(Handle(20), IndexFormat::Uint16, 8);
    device
        .draw_indexed(6, 4, 10, TRIANGLES)
        .expect("indexed draw");
    device.native().calls.clone()
}

#[test]
fn test_base_vertex_is_folded_without_native_support() {
    let calls = indexed_draw_calls(CapsFlags::empty());

    let streams = calls
        .iter()
        .find_map(|c| match c {
            Call::BindVertexInput(streams) => Some(streams.clone()),
            _ => None,
        })
        .expect("vertex input bound");
    assert_eq!(streams[0].offset, 12 * 10);

    let draw = calls
        .iter()
        .find_map(|c| match c {
            Call::DrawIndexed(args) => Some(*args),
            _ => None,
        })
        .expect("indexed draw");
    assert_eq!(draw.base_vertex, 0);
}

#[test]
fn test_base_vertex_is_passed_through_with_native_support() {
    let calls = indexed_draw_calls(CapsFlags::NATIVE_BASE_VERTEX);

    let streams = calls
        .iter()
        .find_map(|c| match c {
            Call::BindVertexInput(streams) => Some(streams.clone()),
            _ => None,
        })
        .expect("vertex input bound");
    assert_eq!(streams[0].offset, 0);

    let draw = calls
        .iter()
        .find_map(|c| match c {
            Call::DrawIndexed(args) => Some(*args),
            _ => None,
        })
        .expect("indexed draw");
    assert_eq!(draw.base_vertex, 10);
}

#[test]
fn test_start_index_is_folded_into_index_offset() {
    let calls = indexed_draw_calls(CapsFlags::NATIVE_BASE_VERTEX);
    let offset = calls
        .iter()
        .find_map(|c| match c {
            Call::BindIndexBuffer { offset, .. } => Some(*offset),
            _ => None,
        })
        .expect("index buffer bound");
    assert_eq!(offset, 8 + 4 * 2);
}

#[test]
fn test_dynamic_vertex_arena_is_bindable_by_handle() {
    let mut device = device();
    bind_minimal_pipeline(&mut device, 10);
    let offset = device
        .write_dynamic_pod(
            vellum_core::ArenaKind::Vertex,
            &[0.0f32, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        )
        .expect("write");
    device.commit_dynamic().expect("commit");
    device.set_vertex_buffers(
        0,
        &[StreamBinding {
            buffer: Handle::DYNAMIC_VERTICES,
            stride: 12,
            offset,
        }],
    );

    device.draw(3, 0, TRIANGLES).expect("draw");

    let arena = device.arena(vellum_core::ArenaKind::Vertex).buffer();
    assert!(device
        .native()
        .calls
        .iter()
        .any(|c| matches!(c, Call::BindVertexInput(s) if s[0].buffer == arena)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Sampled render targets
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_sampled_target_regenerates_mips_only_after_writes() {
    let mut device = device();
    bind_minimal_pipeline(&mut device, 10);
    let mut params = TargetParams::new(
        TargetSize::Absolute {
            width: 64,
            height: 64,
        },
        TextureFormat::Rgba8Unorm,
    );
    params.mip_count = MipCount::Auto;
    device
        .create_render_target(Handle(20), params, false)
        .expect("target");
    assert_eq!(device.resources().render_target(Handle(20)).mip_count, 7);

    device.set_targets(TargetBinding {
        colours: vec![Handle(20)],
        depth: Handle::NULL,
        colour_face: 0,
        depth_face: 0,
    });
    device.draw(3, 0, TRIANGLES).expect("render into target");
    assert!(device.resources().render_target(Handle(20)).invalidate);

    device.set_targets(TargetBinding::default());
    device.set_texture(Handle(20), Handle::NULL, 0, ShaderStages::PIXEL);
    device.draw(3, 0, TRIANGLES).expect("sample target");
    device.draw(3, 0, TRIANGLES).expect("sample again");

    assert_eq!(device.native().count(|c| matches!(c, Call::GenerateMips(_))), 1);
    assert!(!device.resources().render_target(Handle(20)).invalidate);
}

#[test]
fn test_msaa_target_is_sampled_through_lazy_resolve() {
    let mut device = device();
    bind_minimal_pipeline(&mut device, 10);
    let mut params = TargetParams::new(
        TargetSize::Absolute {
            width: 64,
            height: 64,
        },
        TextureFormat::Rgba8Unorm,
    );
    params.sample_count = 4;
    device
        .create_render_target(Handle(20), params, false)
        .expect("target");

    device.set_texture(Handle(20), Handle::NULL, 0, ShaderStages::PIXEL);
    device.draw(3, 0, TRIANGLES).expect("sample target");

    let resolved = device
        .resources()
        .render_target(Handle(20))
        .texture
        .expect("resolve texture created");
    let native = device.native();
    assert_eq!(native.count(|c| matches!(c, Call::Blit { .. })), 1);
    assert_eq!(
        native.count(|c| *c == Call::BindTexture {
            unit: 0,
            texture: Some(resolved)
        }),
        1
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Stream-out and compute
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_stream_out_capture_then_draw_auto() {
    let mut device = device();
    let (vs, _, _) = bind_minimal_pipeline(&mut device, 10);
    let so = Handle(30);
    let capture = Handle(31);
    device
        .create_shader(so, &shader(ShaderStage::StreamOut, "so"))
        .expect("so shader");
    device
        .create_buffer(capture, &BufferDesc::new(1024, BindFlags::STREAM_OUT | BindFlags::VERTEX), None)
        .expect("capture buffer");
    device.link_stream_out_program(so).expect("link");

    device.set_shader(so, ShaderStage::StreamOut);
    device.set_stream_out_target(capture);
    device
        .draw(16, 0, PrimitiveTopology::PointList)
        .expect("capture");

    let native = device.native();
    assert_eq!(native.count(|c| *c == Call::BeginStreamOut(native_id(&device, capture))), 1);
    assert_eq!(native.count(|c| *c == Call::EndStreamOut), 1);
    assert_eq!(native.count(|c| *c == Call::RasterizerDiscard(true)), 1);
    assert_eq!(native.count(|c| *c == Call::RasterizerDiscard(false)), 1);
    assert_eq!(device.binder().requested().stream_out_target, Handle::NULL);

    device.set_shader(vs, ShaderStage::Vertex);
    device.set_shader(Handle(11), ShaderStage::Pixel);
    device.set_vertex_buffers(
        0,
        &[StreamBinding {
            buffer: capture,
            stride: 12,
            offset: 0,
        }],
    );
    device.draw_auto().expect("draw auto");
    assert_eq!(
        device
            .native()
            .count(|c| *c == Call::DrawAuto(PrimitiveTopology::PointList)),
        1
    );
}

#[test]
fn test_stream_out_program_discards_rasterization_without_target() {
    let mut device = device();
    bind_minimal_pipeline(&mut device, 10);
    let so = Handle(30);
    device
        .create_shader(so, &shader(ShaderStage::StreamOut, "so"))
        .expect("so shader");
    device.link_stream_out_program(so).expect("link");
    device.set_shader(so, ShaderStage::StreamOut);

    device
        .draw(4, 0, PrimitiveTopology::PointList)
        .expect("first");
    device
        .draw(4, 0, PrimitiveTopology::PointList)
        .expect("second");

    let native = device.native();
    assert_eq!(native.count(|c| matches!(c, Call::BeginStreamOut(_))), 0);
    assert_eq!(native.count(|c| *c == Call::RasterizerDiscard(true)), 2);
    assert_eq!(native.count(|c| *c == Call::RasterizerDiscard(false)), 2);
    let discards: Vec<bool> = native
        .calls
        .iter()
        .filter_map(|c| match c {
            Call::RasterizerDiscard(on) => Some(*on),
            _ => None,
        })
        .collect();
    assert_eq!(discards, [true, false, true, false]);
}

fn native_id(device: &Device<MockNative>, slot: Handle) -> vellum_core::native::BufferId {
    device.resources().buffer(slot).id
}

#[test]
#[should_panic(expected = "must be linked with link_stream_out_program")]
fn test_unlinked_stream_out_program_panics() {
    let mut device = device();
    bind_minimal_pipeline(&mut device, 10);
    device
        .create_shader(Handle(30), &shader(ShaderStage::StreamOut, "so"))
        .expect("so shader");
    device.set_shader(Handle(30), ShaderStage::StreamOut);
    device.draw(1, 0, PrimitiveTopology::PointList).ok();
}

#[test]
fn test_draw_auto_without_stream_out_cap_is_unsupported() {
    let mut caps = full_caps();
    caps.flags = CapsFlags::GPU_TIMER;
    let mut device = device_with(caps, DeviceConfig::default());
    let err = device.draw_auto().expect_err("unsupported");
    assert!(matches!(
        err,
        DeviceError::Resource(ResourceError::UnsupportedFeature(_))
    ));
}

#[test]
fn test_dispatch_links_compute_program() {
    let mut device = device();
    device
        .create_shader(Handle(30), &shader(ShaderStage::Compute, "cs"))
        .expect("cs");
    device
        .dispatch_compute([8, 4, 1], Handle(30))
        .expect("dispatch");
    device
        .dispatch_compute([8, 4, 1], Handle(30))
        .expect("dispatch again");

    let native = device.native();
    assert_eq!(native.count(|c| matches!(c, Call::LinkProgram(_))), 1);
    assert_eq!(native.count(|c| *c == Call::Dispatch([8, 4, 1])), 2);
}
