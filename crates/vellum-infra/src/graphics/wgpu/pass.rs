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

//! Command recording.
//!
//! The device layer issues calls one at a time, while `wgpu` wants them inside
//! passes on an encoder. [`Recorder`] keeps one encoder per submission and
//! one open render pass that consecutive draws to the same framebuffer share.
//! Anything that needs the encoder itself (copies, timestamps, clears,
//! compute) ends the open pass first.

use super::conversions::IntoWgpu;
use vellum_core::desc::{ClearFlags, ClearState};
use vellum_core::native::{FramebufferId, TextureId};

/// One attachment of a pass target.
#[derive(Debug, Clone)]
pub(crate) struct AttachmentView {
    pub view: wgpu::TextureView,
    pub format: wgpu::TextureFormat,
    /// Backing texture and subresource, `None` for the default framebuffer.
    pub source: Option<(TextureId, u32, u32)>,
}

/// The views a render pass writes.
#[derive(Debug, Clone)]
pub(crate) struct PassTargets {
    pub colours: Vec<AttachmentView>,
    pub depth: Option<AttachmentView>,
    pub sample_count: u32,
    pub width: u32,
    pub height: u32,
}

impl PassTargets {
    fn colour_attachments(
        &self,
        load: impl Fn(usize) -> wgpu::LoadOp<wgpu::Color>,
    ) -> Vec<Option<wgpu::RenderPassColorAttachment<'_>>> {
        self.colours
            .iter()
            .enumerate()
            .map(|(i, colour)| {
                Some(wgpu::RenderPassColorAttachment {
                    view: &colour.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: load(i),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })
            })
            .collect()
    }

    fn depth_attachment(
        &self,
        depth_load: wgpu::LoadOp<f32>,
        stencil_load: wgpu::LoadOp<u32>,
    ) -> Option<wgpu::RenderPassDepthStencilAttachment<'_>> {
        self.depth
            .as_ref()
            .map(|depth| wgpu::RenderPassDepthStencilAttachment {
                view: &depth.view,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: depth.format.has_stencil_aspect().then_some(wgpu::Operations {
                    load: stencil_load,
                    store: wgpu::StoreOp::Store,
                }),
            })
    }
}

#[derive(Debug)]
struct OpenPass {
    pass: wgpu::RenderPass<'static>,
    framebuffer: Option<FramebufferId>,
}

/// Owns the encoder of the next submission and the open render pass.
#[derive(Debug, Default)]
pub(crate) struct Recorder {
    encoder: Option<wgpu::CommandEncoder>,
    pass: Option<OpenPass>,
}

impl Recorder {
    /// Whether any command is waiting for submission.
    pub fn is_idle(&self) -> bool {
        self.encoder.is_none()
    }

    /// Ends the open pass when it targets `framebuffer`.
    pub fn end_pass_on(&mut self, framebuffer: FramebufferId) {
        if matches!(&self.pass, Some(open) if open.framebuffer == Some(framebuffer)) {
            self.pass = None;
        }
    }

    /// The encoder, with no render pass open on it.
    pub fn encoder(&mut self, device: &wgpu::Device) -> &mut wgpu::CommandEncoder {
        self.pass = None;
        self.encoder.get_or_insert_with(|| {
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Vellum Frame Encoder"),
            })
        })
    }

    /// Returns a render pass on `targets`, reusing the open one when it was
    /// begun for the same framebuffer. New passes load existing contents.
    pub fn render_pass(
        &mut self,
        device: &wgpu::Device,
        framebuffer: Option<FramebufferId>,
        targets: &PassTargets,
    ) -> &mut wgpu::RenderPass<'static> {
        let open = match self.pass.take() {
            Some(open) if open.framebuffer == framebuffer => open,
            previous => {
                drop(previous);
                let encoder = self.encoder(device);
                let colour_attachments = targets.colour_attachments(|_| wgpu::LoadOp::Load);
                let pass = encoder
                    .begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("Vellum Draw Pass"),
                        color_attachments: &colour_attachments,
                        depth_stencil_attachment: targets
                            .depth_attachment(wgpu::LoadOp::Load, wgpu::LoadOp::Load),
                        timestamp_writes: None,
                        occlusion_query_set: None,
                        multiview_mask: None,
                    })
                    .forget_lifetime();
                OpenPass { pass, framebuffer }
            }
        };
        &mut self.pass.insert(open).pass
    }

    /// Clears the aspects of `targets` selected by `clear.flags`.
    pub fn clear(&mut self, device: &wgpu::Device, targets: &PassTargets, clear: &ClearState) {
        let encoder = self.encoder(device);
        let colour_attachments = targets.colour_attachments(|i| {
            if clear.flags.contains(ClearFlags::COLOUR) {
                wgpu::LoadOp::Clear(clear.colour(i).into_wgpu())
            } else {
                wgpu::LoadOp::Load
            }
        });
        let depth_load = if clear.flags.contains(ClearFlags::DEPTH) {
            wgpu::LoadOp::Clear(clear.depth)
        } else {
            wgpu::LoadOp::Load
        };
        let stencil_load = if clear.flags.contains(ClearFlags::STENCIL) {
            wgpu::LoadOp::Clear(u32::from(clear.stencil))
        } else {
            wgpu::LoadOp::Load
        };
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Vellum Clear Pass"),
            color_attachments: &colour_attachments,
            depth_stencil_attachment: targets.depth_attachment(depth_load, stencil_load),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
    }

    /// Resolves the multisampled `src` view into `dst`.
    pub fn resolve(
        &mut self,
        device: &wgpu::Device,
        src: &wgpu::TextureView,
        dst: &wgpu::TextureView,
    ) {
        let encoder = self.encoder(device);
        let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Vellum Resolve Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: src,
                resolve_target: Some(dst),
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
    }

    /// Finishes and submits the encoder. Returns `false` when nothing was
    /// recorded.
    pub fn submit(&mut self, queue: &wgpu::Queue) -> bool {
        self.pass = None;
        match self.encoder.take() {
            Some(encoder) => {
                queue.submit(std::iter::once(encoder.finish()));
                true
            }
            None => false,
        }
    }
}
