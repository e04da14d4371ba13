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

use super::context::{WgpuConfig, WgpuGraphicsContext, BACKBUFFER_DEPTH_FORMAT};
use super::conversions::{buffer_usages, from_wgpu_format, texture_usages, write_mask, IntoWgpu};
use super::mips::MipGenerator;
use super::pass::{AttachmentView, PassTargets, Recorder};
use super::pipeline::{
    binding_index, layout_entries, ComputePipelineKey, Layout, PipelineCache, ProgramEntry,
    RenderPipelineKey, ShaderEntry, TextureSampling, VertexBufferKey,
};
use super::readback;
use super::timer::WgpuTimerQueries;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::borrow::Cow;
use std::collections::HashMap;
use vellum_core::caps::{Caps, CapsFlags, RendererInfo};
use vellum_core::desc::{
    AddressMode, BindingKind, BlendStateDesc, BufferDesc, ClearState, DepthStencilDesc, Filter,
    FrontFace, IndexFormat, InputLayoutDesc, InputRate, PrimitiveTopology, RasterizerStateDesc,
    Rect, SamplerDesc, ShaderDesc, ShaderSource, ShaderStage, ShaderStages, TextureDesc,
    TextureFormat, TextureKind, TextureRegion, Viewport,
};
use vellum_core::native::{
    Attachment, BufferId, DrawArgs, DrawIndexedArgs, FramebufferDesc, FramebufferId, NativeDevice,
    ProgramId, ProgramLink, ReadBackSource, SamplerId, ShaderId, TextureId, TimerQueryId,
    VertexStream,
};
use vellum_core::NativeError;
use wgpu::util::DeviceExt;

/// Bind groups kept before the cache is flushed. Constant buffers bound at
/// per-draw arena offsets make a new group for every distinct offset.
const MAX_CACHED_BIND_GROUPS: usize = 4096;

#[derive(Debug)]
struct WgpuTextureEntry {
    texture: wgpu::Texture,
    /// Full view used for sampling.
    view: wgpu::TextureView,
    format: TextureFormat,
    kind: TextureKind,
}

#[derive(Debug)]
struct WgpuSamplerEntry {
    sampler: wgpu::Sampler,
    filtering: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct BoundTexture {
    texture: Option<TextureId>,
    sampler: Option<SamplerId>,
}

/// A resource referenced by a cached bind group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BoundResource {
    Constant {
        buffer: BufferId,
        offset: u64,
        size: u64,
    },
    Texture(TextureId),
    Sampler(Option<SamplerId>),
    Structured(BufferId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct BindGroupKey {
    layout: Vec<wgpu::BindGroupLayoutEntry>,
    resources: Vec<(u32, BoundResource)>,
}

/// The state the next draw will use, as last set through the trait.
#[derive(Debug)]
struct BoundState {
    program: Option<ProgramId>,
    layout: InputLayoutDesc,
    streams: Vec<VertexStream>,
    raster: RasterizerStateDesc,
    front_face: FrontFace,
    blend: BlendStateDesc,
    depth_stencil: DepthStencilDesc,
    stencil_ref: u8,
    viewport: Option<Viewport>,
    scissor: Option<Rect>,
    textures: HashMap<u32, BoundTexture>,
    constants: HashMap<u32, (BufferId, u64, u64)>,
    structured: HashMap<u32, BufferId>,
    index: Option<(BufferId, IndexFormat, u64)>,
    framebuffer: Option<FramebufferId>,
}

impl Default for BoundState {
    fn default() -> Self {
        let raster = RasterizerStateDesc::default();
        Self {
            program: None,
            layout: InputLayoutDesc::default(),
            streams: Vec::new(),
            front_face: raster.front_face(),
            raster,
            blend: BlendStateDesc::default(),
            depth_stencil: DepthStencilDesc::default(),
            stencil_ref: 0,
            viewport: None,
            scissor: None,
            textures: HashMap::new(),
            constants: HashMap::new(),
            structured: HashMap::new(),
            index: None,
            framebuffer: None,
        }
    }
}

/// Vertex buffer bindings resolved for one draw.
type ResolvedStreams = (Vec<VertexBufferKey>, Vec<(wgpu::Buffer, u64)>);

/// A [`NativeDevice`] backed by `wgpu`.
///
/// Resources live in id-keyed maps. Pipeline state is tracked on the CPU and
/// turned into a cached `wgpu::RenderPipeline` plus bind group at each draw.
#[derive(Debug)]
pub struct WgpuDevice {
    context: WgpuGraphicsContext,
    caps: Caps,
    next_id: usize,

    buffers: HashMap<BufferId, wgpu::Buffer>,
    textures: HashMap<TextureId, WgpuTextureEntry>,
    samplers: HashMap<SamplerId, WgpuSamplerEntry>,
    default_sampler: wgpu::Sampler,
    point_sampler: wgpu::Sampler,
    shaders: HashMap<ShaderId, ShaderEntry>,
    programs: HashMap<ProgramId, ProgramEntry>,
    framebuffers: HashMap<FramebufferId, PassTargets>,

    pipelines: PipelineCache,
    bind_groups: HashMap<BindGroupKey, wgpu::BindGroup>,
    state: BoundState,
    recorder: Recorder,
    timers: Option<WgpuTimerQueries>,
    mips: MipGenerator,
}

impl WgpuDevice {
    /// Wraps an initialized context.
    pub fn new(context: WgpuGraphicsContext) -> Self {
        let caps = Self::query_caps(&context);
        log::info!(
            "WgpuDevice: {} ({}, {} backbuffer), caps {:?}",
            caps.info.renderer,
            caps.info.api_version,
            if context.has_surface() { "surface" } else { "headless" },
            caps.flags
        );
        let device = &context.device;
        let default_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Vellum Default Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::MipmapFilterMode::Linear,
            ..Default::default()
        });
        let point_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Vellum Point Sampler"),
            ..Default::default()
        });
        let timers = WgpuTimerQueries::feature_available(context.active_device_features)
            .then(|| WgpuTimerQueries::new(device, &context.queue));
        let mips = MipGenerator::new(device);
        Self {
            caps,
            next_id: 1,
            buffers: HashMap::new(),
            textures: HashMap::new(),
            samplers: HashMap::new(),
            default_sampler,
            point_sampler,
            shaders: HashMap::new(),
            programs: HashMap::new(),
            framebuffers: HashMap::new(),
            pipelines: PipelineCache::default(),
            bind_groups: HashMap::new(),
            state: BoundState::default(),
            recorder: Recorder::default(),
            timers,
            mips,
            context,
        }
    }

    /// Creates a device presenting to a window surface.
    pub fn with_window<W>(
        window: W,
        width: u32,
        height: u32,
        config: &WgpuConfig,
    ) -> anyhow::Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        let context =
            pollster::block_on(WgpuGraphicsContext::new(window, width, height, config))?;
        Ok(Self::new(context))
    }

    /// Creates a device rendering into an owned off-screen backbuffer.
    pub fn headless(width: u32, height: u32, config: &WgpuConfig) -> anyhow::Result<Self> {
        let context =
            pollster::block_on(WgpuGraphicsContext::new_headless(width, height, config))?;
        Ok(Self::new(context))
    }

    /// The underlying context.
    pub fn context(&self) -> &WgpuGraphicsContext {
        &self.context
    }

    /// Number of distinct render pipelines built so far.
    pub fn render_pipeline_count(&self) -> usize {
        self.pipelines.render_pipeline_count()
    }

    fn query_caps(context: &WgpuGraphicsContext) -> Caps {
        let features = context.active_device_features;
        let downlevel = context.adapter.get_downlevel_capabilities();
        let mut flags = CapsFlags::empty();
        if features.contains(wgpu::Features::TEXTURE_COMPRESSION_BC) {
            flags |=
                CapsFlags::TEX_FORMAT_BC1 | CapsFlags::TEX_FORMAT_BC2 | CapsFlags::TEX_FORMAT_BC3;
        }
        if WgpuTimerQueries::feature_available(features) {
            flags |= CapsFlags::GPU_TIMER;
        }
        if features.contains(wgpu::Features::DEPTH_CLIP_CONTROL) {
            flags |= CapsFlags::DEPTH_CLAMP;
        }
        if downlevel.flags.contains(wgpu::DownlevelFlags::COMPUTE_SHADERS) {
            flags |= CapsFlags::COMPUTE;
        }
        if downlevel.flags.contains(wgpu::DownlevelFlags::BASE_VERTEX) {
            flags |= CapsFlags::NATIVE_BASE_VERTEX;
        }

        let info = &context.adapter_info;
        let vendor = if info.driver.is_empty() {
            format!("{:#06x}", info.vendor)
        } else {
            format!("{:#06x} ({})", info.vendor, info.driver)
        };
        Caps {
            info: RendererInfo {
                shader_version: "WGSL".to_owned(),
                api_version: format!("wgpu/{:?}", info.backend),
                renderer: info.name.clone(),
                vendor,
            },
            flags,
            max_texture_size: context.device_limits.max_texture_dimension_2d,
            max_samples: 4,
        }
    }

    fn alloc_id(&mut self) -> usize {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Submits recorded work and starts mapping any timer results it copied.
    fn submit(&mut self) {
        if self.recorder.submit(&self.context.queue) {
            if let Some(timers) = self.timers.as_mut() {
                timers.after_submit();
            }
        }
    }

    fn buffer(&self, id: BufferId) -> Result<wgpu::Buffer, NativeError> {
        self.buffers
            .get(&id)
            .cloned()
            .ok_or_else(|| NativeError::UnknownId(format!("{id:?}")))
    }

    /// Writes `data` into `buffer`, ordered after everything recorded so far.
    ///
    /// With nothing recorded, the queue write lands before the next
    /// submission. Otherwise the bytes go through a staging buffer copied
    /// inside the current encoder.
    fn write_buffer_ordered(&mut self, buffer: &wgpu::Buffer, offset: u64, data: &[u8]) {
        if self.recorder.is_idle() {
            self.context.queue.write_buffer(buffer, offset, data);
            return;
        }
        let staging = self
            .context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Vellum Upload Staging Buffer"),
                contents: data,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
        self.recorder
            .encoder(&self.context.device)
            .copy_buffer_to_buffer(&staging, 0, buffer, offset, data.len() as u64);
    }

    /// Writes tightly packed texel rows, ordered like [`Self::write_buffer_ordered`].
    fn write_texture_ordered(
        &mut self,
        destination: wgpu::TexelCopyTextureInfo<'_>,
        format: TextureFormat,
        data: &[u8],
        size: wgpu::Extent3d,
    ) {
        let row_bytes = format.row_pitch(size.width);
        let rows = format.block_rows(size.height);
        if self.recorder.is_idle() {
            self.context.queue.write_texture(
                destination,
                data,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(row_bytes),
                    rows_per_image: Some(rows),
                },
                size,
            );
            return;
        }
        let padded_row = readback::padded_bytes_per_row(row_bytes);
        let layers = size.depth_or_array_layers.max(1) as usize;
        let layer_bytes = row_bytes as usize * rows as usize;
        let mut padded = Vec::with_capacity(padded_row as usize * rows as usize * layers);
        for layer in data.chunks(layer_bytes.max(1)).take(layers) {
            padded.extend(readback::pad_rows(
                layer,
                row_bytes as usize,
                padded_row as usize,
                rows as usize,
            ));
        }
        let staging = self
            .context
            .device
            .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("Vellum Texture Upload Staging Buffer"),
                contents: &padded,
                usage: wgpu::BufferUsages::COPY_SRC,
            });
        self.recorder.encoder(&self.context.device).copy_buffer_to_texture(
            wgpu::TexelCopyBufferInfo {
                buffer: &staging,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_row),
                    rows_per_image: Some(rows),
                },
            },
            destination,
            size,
        );
    }

    /// The attachments draws and clears currently write.
    fn current_targets(&mut self) -> Result<PassTargets, NativeError> {
        if let Some(id) = self.state.framebuffer {
            return self
                .framebuffers
                .get(&id)
                .cloned()
                .ok_or_else(|| NativeError::UnknownId(format!("{id:?}")));
        }
        let format = self.context.colour_format();
        let (width, height) = self.context.size();
        let view = self.context.frame_view()?.clone();
        Ok(PassTargets {
            colours: vec![AttachmentView {
                view,
                format,
                source: None,
            }],
            depth: Some(AttachmentView {
                view: self.context.depth_view().clone(),
                format: BACKBUFFER_DEPTH_FORMAT,
                source: None,
            }),
            sample_count: 1,
            width,
            height,
        })
    }

    fn texture_sampling(&self, unit: u32, depth: bool) -> TextureSampling {
        self.state
            .textures
            .get(&unit)
            .and_then(|bound| bound.texture)
            .and_then(|id| self.textures.get(&id))
            .map(|entry| {
                TextureSampling::for_texture(entry.format, entry.texture.sample_count(), depth)
            })
            .unwrap_or_default()
    }

    /// Returns the bind group for `entries`, building it on a cache miss.
    fn bind_group(
        &mut self,
        program: ProgramId,
        layout: &Layout,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Result<wgpu::BindGroup, NativeError> {
        let bindings = self
            .programs
            .get(&program)
            .map(|p| p.bindings.clone())
            .ok_or_else(|| NativeError::UnknownId(format!("{program:?}")))?;

        let mut resources = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(binding) = bindings.iter().find(|b| binding_index(b) == entry.binding) else {
                continue;
            };
            let unit = binding.unit;
            let resource = match binding.kind {
                BindingKind::ConstantBuffer => {
                    let (buffer, offset, size) =
                        self.state.constants.get(&unit).copied().ok_or_else(|| {
                            NativeError::Backend(format!("constant buffer unit {unit} is unbound"))
                        })?;
                    BoundResource::Constant {
                        buffer,
                        offset,
                        size,
                    }
                }
                BindingKind::StructuredBuffer => {
                    let buffer = self.state.structured.get(&unit).copied().ok_or_else(|| {
                        NativeError::Backend(format!("structured buffer unit {unit} is unbound"))
                    })?;
                    BoundResource::Structured(buffer)
                }
                BindingKind::Texture { .. } => {
                    let texture = self
                        .state
                        .textures
                        .get(&unit)
                        .and_then(|bound| bound.texture)
                        .ok_or_else(|| {
                            NativeError::Backend(format!("texture unit {unit} is unbound"))
                        })?;
                    BoundResource::Texture(texture)
                }
                BindingKind::Sampler { .. } => BoundResource::Sampler(
                    self.state.textures.get(&unit).and_then(|bound| bound.sampler),
                ),
            };
            resources.push((entry.binding, resource));
        }

        let key = BindGroupKey {
            layout: entries.to_vec(),
            resources,
        };
        if let Some(group) = self.bind_groups.get(&key) {
            return Ok(group.clone());
        }

        let mut group_entries = Vec::with_capacity(key.resources.len());
        for (binding, resource) in &key.resources {
            let sampler_type = entries
                .iter()
                .find(|e| e.binding == *binding)
                .map(|e| e.ty);
            let resource = match resource {
                BoundResource::Constant {
                    buffer,
                    offset,
                    size,
                } => wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: self
                        .buffers
                        .get(buffer)
                        .ok_or_else(|| NativeError::UnknownId(format!("{buffer:?}")))?,
                    offset: *offset,
                    size: wgpu::BufferSize::new(*size),
                }),
                BoundResource::Structured(buffer) => wgpu::BindingResource::Buffer(
                    self.buffers
                        .get(buffer)
                        .ok_or_else(|| NativeError::UnknownId(format!("{buffer:?}")))?
                        .as_entire_buffer_binding(),
                ),
                BoundResource::Texture(texture) => wgpu::BindingResource::TextureView(
                    &self
                        .textures
                        .get(texture)
                        .ok_or_else(|| NativeError::UnknownId(format!("{texture:?}")))?
                        .view,
                ),
                BoundResource::Sampler(sampler) => {
                    let bound = sampler.and_then(|id| self.samplers.get(&id));
                    let sampler = match (sampler_type, bound) {
                        (
                            Some(wgpu::BindingType::Sampler(
                                wgpu::SamplerBindingType::Comparison,
                            )),
                            Some(s),
                        ) => &s.sampler,
                        (
                            Some(wgpu::BindingType::Sampler(
                                wgpu::SamplerBindingType::Comparison,
                            )),
                            None,
                        ) => {
                            return Err(NativeError::Backend(format!(
                                "comparison sampler at binding {binding} is unbound"
                            )))
                        }
                        (
                            Some(wgpu::BindingType::Sampler(
                                wgpu::SamplerBindingType::NonFiltering,
                            )),
                            s,
                        ) if s.is_none_or(|s| s.filtering) =>
                        {
                            &self.point_sampler
                        }
                        (_, Some(s)) => &s.sampler,
                        (_, None) => &self.default_sampler,
                    };
                    wgpu::BindingResource::Sampler(sampler)
                }
            };
            group_entries.push(wgpu::BindGroupEntry {
                binding: *binding,
                resource,
            });
        }

        let group = self
            .context
            .device
            .create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Vellum Program Bind Group"),
                layout: &layout.bind_group,
                entries: &group_entries,
            });
        if self.bind_groups.len() >= MAX_CACHED_BIND_GROUPS {
            self.bind_groups.clear();
        }
        self.bind_groups.insert(key, group.clone());
        Ok(group)
    }

    fn resolve_streams(&self) -> Result<ResolvedStreams, NativeError> {
        let layout = &self.state.layout;
        let mut keys = Vec::new();
        let mut buffers = Vec::new();
        for stream_index in 0..layout.stream_count() {
            let stream = self.state.streams.get(stream_index).ok_or_else(|| {
                NativeError::Backend(format!("vertex stream {stream_index} is unbound"))
            })?;
            let mut step_mode = wgpu::VertexStepMode::Vertex;
            let mut attributes = Vec::new();
            for attribute in layout
                .attributes
                .iter()
                .filter(|a| a.stream as usize == stream_index)
            {
                if let InputRate::Instance { step_rate } = attribute.rate {
                    step_mode = wgpu::VertexStepMode::Instance;
                    if step_rate > 1 {
                        log::warn!(
                            "WgpuDevice: instance step rate {step_rate} is not supported, using 1"
                        );
                    }
                }
                attributes.push(wgpu::VertexAttribute {
                    format: attribute.format.into_wgpu(),
                    offset: u64::from(attribute.offset),
                    shader_location: attribute.location,
                });
            }
            keys.push(VertexBufferKey {
                stride: u64::from(stream.stride),
                step_mode,
                attributes,
            });
            buffers.push((self.buffer(stream.buffer)?, stream.offset));
        }
        Ok((keys, buffers))
    }

    fn primitive_state(
        &self,
        topology: PrimitiveTopology,
        indexed: Option<IndexFormat>,
    ) -> wgpu::PrimitiveState {
        let raster = &self.state.raster;
        let strip = matches!(
            topology,
            PrimitiveTopology::LineStrip | PrimitiveTopology::TriangleStrip
        );
        let polygon_mode = if self
            .context
            .active_device_features
            .contains(wgpu::Features::POLYGON_MODE_LINE)
        {
            raster.fill.into_wgpu()
        } else {
            wgpu::PolygonMode::Fill
        };
        let unclipped_depth = !raster.depth_clip
            && self
                .context
                .active_device_features
                .contains(wgpu::Features::DEPTH_CLIP_CONTROL);
        wgpu::PrimitiveState {
            topology: topology.into_wgpu(),
            strip_index_format: if strip {
                indexed.map(IntoWgpu::into_wgpu)
            } else {
                None
            },
            front_face: self.state.front_face.into_wgpu(),
            cull_mode: raster.cull.into_wgpu(),
            unclipped_depth,
            polygon_mode,
            conservative: false,
        }
    }

    fn depth_stencil_state(
        &self,
        format: wgpu::TextureFormat,
        topology: PrimitiveTopology,
    ) -> wgpu::DepthStencilState {
        let ds = &self.state.depth_stencil;
        let raster = &self.state.raster;
        let stencil = if ds.stencil_enable && format.has_stencil_aspect() {
            wgpu::StencilState {
                front: ds.front.into_wgpu(),
                back: ds.back.into_wgpu(),
                read_mask: u32::from(ds.stencil_read_mask),
                write_mask: u32::from(ds.stencil_write_mask),
            }
        } else {
            wgpu::StencilState::default()
        };
        // Depth bias only applies to triangles.
        let triangles = matches!(
            topology,
            PrimitiveTopology::TriangleList | PrimitiveTopology::TriangleStrip
        );
        let bias = if triangles {
            wgpu::DepthBiasState {
                constant: raster.depth_bias,
                slope_scale: raster.slope_scaled_depth_bias,
                clamp: raster.depth_bias_clamp,
            }
        } else {
            wgpu::DepthBiasState::default()
        };
        wgpu::DepthStencilState {
            format,
            depth_write_enabled: ds.depth_enable && ds.depth_write,
            depth_compare: if ds.depth_enable {
                ds.depth_func.into_wgpu()
            } else {
                wgpu::CompareFunction::Always
            },
            stencil,
            bias,
        }
    }

    fn colour_targets(&self, targets: &PassTargets) -> Vec<Option<wgpu::ColorTargetState>> {
        targets
            .colours
            .iter()
            .enumerate()
            .map(|(i, colour)| {
                let blend = self.state.blend.target(i);
                let blendable = matches!(
                    colour.format.sample_type(None, None),
                    Some(wgpu::TextureSampleType::Float { filterable: true })
                );
                Some(wgpu::ColorTargetState {
                    format: colour.format,
                    blend: if blendable { blend.into_wgpu() } else { None },
                    write_mask: write_mask(blend.write_mask),
                })
            })
            .collect()
    }

    /// Viewport and scissor clamped to the target, or `None` when either is empty.
    fn pass_rects(&self, targets: &PassTargets) -> Option<(Viewport, (u32, u32, u32, u32))> {
        let (tw, th) = (targets.width as f32, targets.height as f32);
        let mut vp = self
            .state
            .viewport
            .unwrap_or_else(|| Viewport::new(tw, th));
        vp.x = vp.x.clamp(0.0, tw);
        vp.y = vp.y.clamp(0.0, th);
        vp.width = vp.width.min(tw - vp.x);
        vp.height = vp.height.min(th - vp.y);
        if vp.width <= 0.0 || vp.height <= 0.0 {
            return None;
        }

        let full = (0, 0, targets.width, targets.height);
        let scissor = match (self.state.raster.scissor, self.state.scissor) {
            (true, Some(rect)) => {
                let left = rect.left.clamp(0.0, tw) as u32;
                let top = rect.top.clamp(0.0, th) as u32;
                let right = rect.right.clamp(0.0, tw) as u32;
                let bottom = rect.bottom.clamp(0.0, th) as u32;
                if right <= left || bottom <= top {
                    return None;
                }
                (left, top, right - left, bottom - top)
            }
            _ => full,
        };
        Some((vp, scissor))
    }

    /// Prepares pipeline, bindings and dynamic state for a draw on the open
    /// pass, then lets `issue` record the draw itself. Draws with an empty
    /// viewport or scissor are dropped.
    fn encode_draw(
        &mut self,
        topology: PrimitiveTopology,
        indexed: bool,
        issue: impl FnOnce(&mut wgpu::RenderPass<'static>),
    ) -> Result<(), NativeError> {
        let program_id = self
            .state
            .program
            .ok_or_else(|| NativeError::Backend("draw without a program".to_owned()))?;
        let targets = self.current_targets()?;
        let Some((viewport, scissor)) = self.pass_rects(&targets) else {
            log::trace!("WgpuDevice: Skipping draw with an empty viewport or scissor");
            return Ok(());
        };

        let index = match (indexed, self.state.index) {
            (true, Some((buffer, format, offset))) => Some((self.buffer(buffer)?, format, offset)),
            (true, None) => {
                return Err(NativeError::Backend(
                    "indexed draw without an index buffer".to_owned(),
                ))
            }
            (false, _) => None,
        };
        let (vertex_keys, vertex_buffers) = self.resolve_streams()?;

        let program = self
            .programs
            .get(&program_id)
            .ok_or_else(|| NativeError::UnknownId(format!("{program_id:?}")))?;
        if program.is_compute() {
            return Err(NativeError::Backend(
                "draw with a compute program".to_owned(),
            ));
        }
        let entries = layout_entries(
            &program.bindings,
            ShaderStages::VERTEX | ShaderStages::PIXEL,
            |unit, depth| self.texture_sampling(unit, depth),
        );
        let sample_count = targets.sample_count;
        let key = RenderPipelineKey {
            program: program_id,
            layout: entries.clone(),
            vertex_buffers: vertex_keys,
            primitive: self.primitive_state(topology, index.as_ref().map(|(_, f, _)| *f)),
            depth_stencil: targets
                .depth
                .as_ref()
                .map(|depth| self.depth_stencil_state(depth.format, topology)),
            colour_targets: self.colour_targets(&targets),
            sample_count,
            alpha_to_coverage: sample_count > 1 && self.state.blend.alpha_to_coverage,
        };
        let pipeline =
            self.pipelines
                .render_pipeline(&self.context.device, key, program, &self.shaders)?;
        let layout = self.pipelines.layout(&self.context.device, &entries);
        let bind_group = self.bind_group(program_id, &layout, &entries)?;

        let stencil_ref = u32::from(self.state.stencil_ref);
        let pass = self
            .recorder
            .render_pass(&self.context.device, self.state.framebuffer, &targets);
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        for (slot, (buffer, offset)) in vertex_buffers.iter().enumerate() {
            pass.set_vertex_buffer(slot as u32, buffer.slice(*offset..));
        }
        if let Some((buffer, format, offset)) = &index {
            pass.set_index_buffer(buffer.slice(*offset..), (*format).into_wgpu());
        }
        pass.set_viewport(
            viewport.x,
            viewport.y,
            viewport.width,
            viewport.height,
            viewport.min_depth,
            viewport.max_depth,
        );
        pass.set_scissor_rect(scissor.0, scissor.1, scissor.2, scissor.3);
        pass.set_stencil_reference(stencil_ref);
        issue(pass);
        Ok(())
    }

    fn attachment_view(
        &self,
        attachment: &Attachment,
    ) -> Result<AttachmentView, NativeError> {
        let entry = self
            .textures
            .get(&attachment.texture)
            .ok_or_else(|| NativeError::UnknownId(format!("{:?}", attachment.texture)))?;
        if entry.kind == TextureKind::D3 {
            return Err(NativeError::Unsupported(
                "3D textures as framebuffer attachments".to_owned(),
            ));
        }
        let view = entry.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Vellum Attachment View"),
            dimension: Some(wgpu::TextureViewDimension::D2),
            base_mip_level: attachment.mip,
            mip_level_count: Some(1),
            base_array_layer: attachment.layer,
            array_layer_count: Some(1),
            ..Default::default()
        });
        Ok(AttachmentView {
            view,
            format: entry.texture.format(),
            source: Some((attachment.texture, attachment.layer, attachment.mip)),
        })
    }

    /// Drops cached bind groups, which may reference a destroyed resource.
    fn invalidate_bind_groups(&mut self) {
        self.bind_groups.clear();
    }
}

impl NativeDevice for WgpuDevice {
    fn caps(&self) -> Caps {
        self.caps.clone()
    }

    fn backbuffer_size(&self) -> (u32, u32) {
        self.context.size()
    }

    fn backbuffer_format(&self) -> TextureFormat {
        let format = self.context.colour_format();
        from_wgpu_format(format).unwrap_or_else(|| {
            log::warn!("WgpuDevice: Surface format {format:?} has no vellum equivalent");
            TextureFormat::Bgra8Unorm
        })
    }

    // --- Buffers ---

    fn create_buffer(
        &mut self,
        desc: &BufferDesc,
        data: Option<&[u8]>,
    ) -> Result<BufferId, NativeError> {
        // Copies move whole words, so sizes are rounded up.
        let size = desc
            .size
            .max(1)
            .div_ceil(wgpu::COPY_BUFFER_ALIGNMENT)
            * wgpu::COPY_BUFFER_ALIGNMENT;
        let buffer = self.context.device.create_buffer(&wgpu::BufferDescriptor {
            label: desc.label.as_deref(),
            size,
            usage: buffer_usages(desc.bind, desc.usage),
            mapped_at_creation: false,
        });
        let id = BufferId(self.alloc_id());
        self.buffers.insert(id, buffer);
        if let Some(data) = data {
            self.update_buffer(id, 0, data)?;
        }
        log::trace!("WgpuDevice: Created buffer {:?} ({} bytes)", id, size);
        Ok(id)
    }

    fn update_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<(), NativeError> {
        if data.is_empty() {
            return Ok(());
        }
        let buffer = self.buffer(id)?;
        if offset % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
            return Err(NativeError::Unsupported(format!(
                "buffer update at unaligned offset {offset}"
            )));
        }
        // The tail of a write that is not a whole number of words is zero-filled.
        let data: Cow<'_, [u8]> = if data.len() as u64 % wgpu::COPY_BUFFER_ALIGNMENT == 0 {
            Cow::Borrowed(data)
        } else {
            let mut padded = data.to_vec();
            padded.resize(
                (data.len() as u64).div_ceil(wgpu::COPY_BUFFER_ALIGNMENT) as usize
                    * wgpu::COPY_BUFFER_ALIGNMENT as usize,
                0,
            );
            Cow::Owned(padded)
        };
        if offset + data.len() as u64 > buffer.size() {
            return Err(NativeError::Unsupported(format!(
                "write of {} bytes at {offset} overflows a {}-byte buffer",
                data.len(),
                buffer.size()
            )));
        }
        self.write_buffer_ordered(&buffer, offset, &data);
        Ok(())
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        // Dropping keeps the buffer alive until recorded work using it is submitted.
        if self.buffers.remove(&id).is_some() {
            self.invalidate_bind_groups();
            log::trace!("WgpuDevice: Destroyed buffer {:?}", id);
        }
    }

    // --- Textures and samplers ---

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        data: Option<&[u8]>,
    ) -> Result<TextureId, NativeError> {
        let layers = match desc.kind {
            TextureKind::Cube => desc.depth_or_layers.max(6),
            _ => desc.depth_or_layers.max(1),
        };
        let sample_count = desc.sample_count.max(1);
        let mip_count = desc.mip_count.max(1);
        let texture = self.context.device.create_texture(&wgpu::TextureDescriptor {
            label: desc.label.as_deref(),
            size: wgpu::Extent3d {
                width: desc.width.max(1),
                height: desc.height.max(1),
                depth_or_array_layers: layers,
            },
            mip_level_count: mip_count,
            sample_count,
            dimension: desc.kind.into_wgpu(),
            format: desc.format.into_wgpu(),
            usage: texture_usages(desc.bind, desc.format, sample_count, mip_count),
            view_formats: &[],
        });
        let view_dimension: wgpu::TextureViewDimension = if sample_count > 1 {
            wgpu::TextureViewDimension::D2
        } else {
            desc.kind.into_wgpu()
        };
        let view = texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("Vellum Sampling View"),
            dimension: Some(view_dimension),
            aspect: if desc.format.is_depth() {
                wgpu::TextureAspect::DepthOnly
            } else {
                wgpu::TextureAspect::All
            },
            ..Default::default()
        });

        if let Some(data) = data {
            if sample_count > 1 || desc.format.is_depth() {
                texture.destroy();
                return Err(NativeError::Unsupported(
                    "initial data for a multisampled or depth texture".to_owned(),
                ));
            }
            self.write_texture_ordered(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                desc.format,
                data,
                wgpu::Extent3d {
                    width: desc.width.max(1),
                    height: desc.height.max(1),
                    depth_or_array_layers: layers,
                },
            );
        }

        let id = TextureId(self.alloc_id());
        log::trace!(
            "WgpuDevice: Created texture {:?} ({}x{}x{} {:?}, {} mips, {}x)",
            id,
            desc.width,
            desc.height,
            layers,
            desc.format,
            mip_count,
            sample_count
        );
        self.textures.insert(
            id,
            WgpuTextureEntry {
                texture,
                view,
                format: desc.format,
                kind: desc.kind,
            },
        );
        Ok(id)
    }

    fn update_texture(
        &mut self,
        id: TextureId,
        region: &TextureRegion,
        data: &[u8],
    ) -> Result<(), NativeError> {
        let (texture, format) = self
            .textures
            .get(&id)
            .map(|entry| (entry.texture.clone(), entry.format))
            .ok_or_else(|| NativeError::UnknownId(format!("{id:?}")))?;
        if format.is_depth() {
            return Err(NativeError::Unsupported(
                "writing texels into a depth texture".to_owned(),
            ));
        }
        // Array layers and 3D slices are both addressed through `z`.
        self.write_texture_ordered(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: region.mip,
                origin: wgpu::Origin3d {
                    x: region.x,
                    y: region.y,
                    z: region.layer,
                },
                aspect: wgpu::TextureAspect::All,
            },
            format,
            data,
            wgpu::Extent3d {
                width: region.width,
                height: region.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn generate_mips(&mut self, id: TextureId) -> Result<(), NativeError> {
        let texture = self
            .textures
            .get(&id)
            .map(|entry| entry.texture.clone())
            .ok_or_else(|| NativeError::UnknownId(format!("{id:?}")))?;
        let encoder = self.recorder.encoder(&self.context.device);
        self.mips.generate(&self.context.device, encoder, &texture)
    }

    fn destroy_texture(&mut self, id: TextureId) {
        if self.textures.remove(&id).is_some() {
            self.invalidate_bind_groups();
            log::trace!("WgpuDevice: Destroyed texture {:?}", id);
        }
    }

    fn create_sampler(&mut self, desc: &SamplerDesc) -> Result<SamplerId, NativeError> {
        let mut address_mode: wgpu::AddressMode = desc.address.into_wgpu();
        let border = desc.address == AddressMode::Border;
        if border
            && !self
                .context
                .active_device_features
                .contains(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER)
        {
            log::warn!("WgpuDevice: Border addressing unavailable, clamping to edge");
            address_mode = wgpu::AddressMode::ClampToEdge;
        }
        let (filter, mipmap_filter) = desc.filter.into_wgpu();
        let anisotropy_clamp = if desc.filter == Filter::Anisotropic {
            desc.max_anisotropy.clamp(1, 16)
        } else {
            1
        };
        let sampler = self.context.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Vellum Sampler"),
            address_mode_u: address_mode,
            address_mode_v: address_mode,
            address_mode_w: address_mode,
            mag_filter: filter,
            min_filter: filter,
            mipmap_filter,
            lod_min_clamp: desc.min_lod,
            lod_max_clamp: desc.max_lod,
            compare: desc.compare.map(IntoWgpu::into_wgpu),
            anisotropy_clamp,
            border_color: (address_mode == wgpu::AddressMode::ClampToBorder)
                .then_some(wgpu::SamplerBorderColor::TransparentBlack),
        });
        let id = SamplerId(self.alloc_id());
        self.samplers.insert(
            id,
            WgpuSamplerEntry {
                sampler,
                filtering: filter == wgpu::FilterMode::Linear,
            },
        );
        Ok(id)
    }

    fn destroy_sampler(&mut self, id: SamplerId) {
        if self.samplers.remove(&id).is_some() {
            self.invalidate_bind_groups();
        }
    }

    // --- Shaders and programs ---

    fn compile_shader(&mut self, desc: &ShaderDesc) -> Result<ShaderId, NativeError> {
        if matches!(desc.stage, ShaderStage::Geometry | ShaderStage::StreamOut) {
            return Err(NativeError::Unsupported(format!(
                "{:?} shaders on wgpu",
                desc.stage
            )));
        }
        let ShaderSource::Wgsl(source) = &desc.source else {
            return Err(NativeError::Unsupported(
                "only WGSL sources are accepted by the wgpu backend".to_owned(),
            ));
        };
        let module = self
            .context
            .device
            .create_shader_module(wgpu::ShaderModuleDescriptor {
                label: desc.label.as_deref(),
                source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(source.as_str())),
            });
        let info = pollster::block_on(module.get_compilation_info());
        let errors: Vec<String> = info
            .messages
            .iter()
            .filter(|m| m.message_type == wgpu::CompilationMessageType::Error)
            .map(|m| match m.location {
                Some(loc) => format!("{}:{}: {}", loc.line_number, loc.line_position, m.message),
                None => m.message.clone(),
            })
            .collect();
        if !errors.is_empty() {
            return Err(NativeError::Compilation(errors.join("\n")));
        }

        let id = ShaderId(self.alloc_id());
        log::debug!("WgpuDevice: Compiled {:?} shader {:?}", desc.stage, id);
        self.shaders.insert(
            id,
            ShaderEntry {
                module,
                stage: desc.stage,
                entry_point: desc.entry_point.clone(),
            },
        );
        Ok(id)
    }

    fn destroy_shader(&mut self, id: ShaderId) {
        self.shaders.remove(&id);
    }

    fn link_program(&mut self, link: &ProgramLink<'_>) -> Result<ProgramId, NativeError> {
        if link.stream_out.is_some() {
            return Err(NativeError::Unsupported(
                "stream-out programs on wgpu".to_owned(),
            ));
        }
        let check_stage = |id: Option<ShaderId>, stage: ShaderStage| -> Result<(), NativeError> {
            match id.map(|id| self.shaders.get(&id)) {
                None => Ok(()),
                Some(Some(shader)) if shader.stage == stage => Ok(()),
                Some(Some(shader)) => Err(NativeError::Link(format!(
                    "expected a {stage:?} shader, got {:?}",
                    shader.stage
                ))),
                Some(None) => Err(NativeError::UnknownId(format!("{:?}", id))),
            }
        };
        check_stage(link.vertex, ShaderStage::Vertex)?;
        check_stage(link.pixel, ShaderStage::Pixel)?;
        check_stage(link.compute, ShaderStage::Compute)?;
        match (link.vertex, link.compute) {
            (Some(_), None) | (None, Some(_)) => {}
            (None, None) => {
                return Err(NativeError::Link(
                    "program needs a vertex or a compute shader".to_owned(),
                ))
            }
            (Some(_), Some(_)) => {
                return Err(NativeError::Link(
                    "program mixes raster and compute stages".to_owned(),
                ))
            }
        }

        let id = ProgramId(self.alloc_id());
        self.programs.insert(
            id,
            ProgramEntry {
                vertex: link.vertex,
                pixel: link.pixel,
                compute: link.compute,
                bindings: link.bindings.to_vec(),
            },
        );
        log::debug!("WgpuDevice: Linked program {:?}", id);
        Ok(id)
    }

    fn destroy_program(&mut self, id: ProgramId) {
        if self.programs.remove(&id).is_some() {
            self.pipelines.evict_program(id);
            if self.state.program == Some(id) {
                self.state.program = None;
            }
        }
    }

    fn use_program(&mut self, id: ProgramId, _v_flip: f32) {
        // Off-screen targets share the surface orientation, so `v_flip` is always 1.
        self.state.program = Some(id);
    }

    // --- Pipeline state ---

    fn bind_vertex_input(&mut self, layout: &InputLayoutDesc, streams: &[VertexStream]) {
        self.state.layout = layout.clone();
        self.state.streams = streams.to_vec();
    }

    fn apply_raster_state(&mut self, desc: &RasterizerStateDesc, front_face: FrontFace) {
        self.state.raster = desc.clone();
        self.state.front_face = front_face;
    }

    fn apply_blend_state(&mut self, desc: &BlendStateDesc) {
        self.state.blend = desc.clone();
    }

    fn apply_depth_stencil_state(&mut self, desc: &DepthStencilDesc, stencil_ref: u8) {
        self.state.depth_stencil = *desc;
        self.state.stencil_ref = stencil_ref;
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.state.viewport = Some(*viewport);
    }

    fn set_scissor(&mut self, rect: &Rect) {
        self.state.scissor = Some(*rect);
    }

    fn set_rasterizer_discard(&mut self, discard: bool) {
        // Only used around stream-out capture, which this backend does not offer.
        log::trace!("WgpuDevice: Ignoring rasterizer discard = {discard}");
    }

    fn bind_texture(
        &mut self,
        unit: u32,
        texture: Option<TextureId>,
        sampler: Option<SamplerId>,
        _stages: ShaderStages,
    ) {
        if texture.is_none() && sampler.is_none() {
            self.state.textures.remove(&unit);
        } else {
            self.state
                .textures
                .insert(unit, BoundTexture { texture, sampler });
        }
    }

    fn bind_constant_buffer(
        &mut self,
        unit: u32,
        buffer: BufferId,
        offset: u64,
        size: u64,
        _stages: ShaderStages,
    ) {
        self.state.constants.insert(unit, (buffer, offset, size));
    }

    fn unbind_constant_buffer(&mut self, unit: u32) {
        self.state.constants.remove(&unit);
    }

    fn bind_structured_buffer(&mut self, unit: u32, buffer: BufferId, _stages: ShaderStages) {
        self.state.structured.insert(unit, buffer);
    }

    fn unbind_structured_buffer(&mut self, unit: u32) {
        self.state.structured.remove(&unit);
    }

    fn bind_index_buffer(&mut self, buffer: BufferId, format: IndexFormat, offset: u64) {
        self.state.index = Some((buffer, format, offset));
    }

    // --- Stream-out ---

    fn begin_stream_out(
        &mut self,
        _buffer: BufferId,
        _topology: PrimitiveTopology,
    ) -> Result<(), NativeError> {
        Err(NativeError::Unsupported("stream-out on wgpu".to_owned()))
    }

    fn end_stream_out(&mut self) {}

    // --- Work submission ---

    fn draw(&mut self, args: &DrawArgs) -> Result<(), NativeError> {
        let vertices = args.first_vertex..args.first_vertex + args.vertex_count;
        let instances = args.first_instance..args.first_instance + args.instance_count;
        self.encode_draw(args.topology, false, move |pass| {
            pass.draw(vertices, instances)
        })
    }

    fn draw_indexed(&mut self, args: &DrawIndexedArgs) -> Result<(), NativeError> {
        let indices = 0..args.index_count;
        let base_vertex = args.base_vertex;
        let instances = args.first_instance..args.first_instance + args.instance_count;
        self.encode_draw(args.topology, true, move |pass| {
            pass.draw_indexed(indices, base_vertex, instances)
        })
    }

    fn draw_auto(&mut self, _topology: PrimitiveTopology) -> Result<(), NativeError> {
        Err(NativeError::Unsupported("draw_auto on wgpu".to_owned()))
    }

    fn dispatch_compute(&mut self, groups: [u32; 3]) -> Result<(), NativeError> {
        let program_id = self
            .state
            .program
            .ok_or_else(|| NativeError::Backend("dispatch without a program".to_owned()))?;
        let program = self
            .programs
            .get(&program_id)
            .ok_or_else(|| NativeError::UnknownId(format!("{program_id:?}")))?;
        if !program.is_compute() {
            return Err(NativeError::Backend(
                "dispatch with a raster program".to_owned(),
            ));
        }
        let entries = layout_entries(&program.bindings, ShaderStages::COMPUTE, |unit, depth| {
            self.texture_sampling(unit, depth)
        });
        let key = ComputePipelineKey {
            program: program_id,
            layout: entries.clone(),
        };
        let pipeline =
            self.pipelines
                .compute_pipeline(&self.context.device, key, program, &self.shaders)?;
        let layout = self.pipelines.layout(&self.context.device, &entries);
        let bind_group = self.bind_group(program_id, &layout, &entries)?;

        let encoder = self.recorder.encoder(&self.context.device);
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("Vellum Compute Pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
        Ok(())
    }

    // --- Framebuffers ---

    fn create_framebuffer(&mut self, desc: &FramebufferDesc) -> Result<FramebufferId, NativeError> {
        let colours = desc
            .colours
            .iter()
            .map(|attachment| self.attachment_view(attachment))
            .collect::<Result<Vec<_>, _>>()?;
        let depth = desc
            .depth
            .as_ref()
            .map(|attachment| self.attachment_view(attachment))
            .transpose()?;
        let sample_count = desc
            .colours
            .first()
            .or(desc.depth.as_ref())
            .map_or(1, |attachment| attachment.samples.max(1));
        let id = FramebufferId(self.alloc_id());
        self.framebuffers.insert(
            id,
            PassTargets {
                colours,
                depth,
                sample_count,
                width: desc.width,
                height: desc.height,
            },
        );
        log::trace!(
            "WgpuDevice: Created framebuffer {:?} ({} colour, depth: {})",
            id,
            desc.colours.len(),
            desc.depth.is_some()
        );
        Ok(id)
    }

    fn destroy_framebuffer(&mut self, id: FramebufferId) {
        self.recorder.end_pass_on(id);
        if self.state.framebuffer == Some(id) {
            self.state.framebuffer = None;
        }
        self.framebuffers.remove(&id);
    }

    fn bind_framebuffer(&mut self, id: Option<FramebufferId>) {
        self.state.framebuffer = id;
    }

    fn clear(&mut self, clear: &ClearState) -> Result<(), NativeError> {
        let targets = self.current_targets()?;
        self.recorder.clear(&self.context.device, &targets, clear);
        Ok(())
    }

    fn blit_framebuffer(
        &mut self,
        src: FramebufferId,
        dst: FramebufferId,
        width: u32,
        height: u32,
    ) -> Result<(), NativeError> {
        let lookup = |id: FramebufferId| {
            self.framebuffers
                .get(&id)
                .cloned()
                .ok_or_else(|| NativeError::UnknownId(format!("{id:?}")))
        };
        let (src_targets, dst_targets) = (lookup(src)?, lookup(dst)?);
        let (from, to) = match (src_targets.colours.first(), dst_targets.colours.first()) {
            (Some(from), Some(to)) => (from.clone(), to.clone()),
            _ => match (&src_targets.depth, &dst_targets.depth) {
                (Some(from), Some(to)) if src_targets.sample_count == 1 => {
                    (from.clone(), to.clone())
                }
                _ => {
                    return Err(NativeError::Unsupported(
                        "blit between framebuffers without matching attachments".to_owned(),
                    ))
                }
            },
        };

        if src_targets.sample_count > 1 {
            self.recorder.resolve(&self.context.device, &from.view, &to.view);
            return Ok(());
        }

        let texture_of = |source: Option<(TextureId, u32, u32)>| {
            source
                .and_then(|(id, layer, mip)| {
                    self.textures
                        .get(&id)
                        .map(|entry| (entry.texture.clone(), layer, mip))
                })
                .ok_or_else(|| NativeError::Backend("blit attachment has no texture".to_owned()))
        };
        let (src_texture, src_layer, src_mip) = texture_of(from.source)?;
        let (dst_texture, dst_layer, dst_mip) = texture_of(to.source)?;
        let width = width.min(src_targets.width).min(dst_targets.width);
        let height = height.min(src_targets.height).min(dst_targets.height);
        self.recorder
            .encoder(&self.context.device)
            .copy_texture_to_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &src_texture,
                    mip_level: src_mip,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: src_layer,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyTextureInfo {
                    texture: &dst_texture,
                    mip_level: dst_mip,
                    origin: wgpu::Origin3d {
                        x: 0,
                        y: 0,
                        z: dst_layer,
                    },
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        Ok(())
    }

    // --- Timer queries ---

    fn create_timer_query(&mut self) -> Result<TimerQueryId, NativeError> {
        match self.timers.as_mut() {
            Some(timers) => timers.create(&self.context.device),
            None => Err(NativeError::Unsupported(
                "timestamp queries inside encoders".to_owned(),
            )),
        }
    }

    fn begin_timer(&mut self, id: TimerQueryId) {
        if let Some(timers) = self.timers.as_mut() {
            let encoder = self.recorder.encoder(&self.context.device);
            timers.begin(&self.context.device, encoder, id);
        }
    }

    fn end_timer(&mut self, id: TimerQueryId) {
        if let Some(timers) = self.timers.as_mut() {
            let encoder = self.recorder.encoder(&self.context.device);
            timers.end(encoder, id);
        }
    }

    fn timer_result(&mut self, id: TimerQueryId) -> Option<u64> {
        self.timers
            .as_mut()
            .and_then(|timers| timers.result(&self.context.device, id))
    }

    fn destroy_timer_query(&mut self, id: TimerQueryId) {
        if let Some(timers) = self.timers.as_mut() {
            timers.destroy(id);
        }
    }

    // --- Read-back ---

    fn read_back_texture(
        &mut self,
        source: ReadBackSource,
        format: TextureFormat,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>, NativeError> {
        self.submit();
        let texture = match source {
            ReadBackSource::Backbuffer => {
                let texture = self.context.frame_texture()?.clone();
                if !texture.usage().contains(wgpu::TextureUsages::COPY_SRC) {
                    return Err(NativeError::Unsupported(
                        "this surface cannot be copied from".to_owned(),
                    ));
                }
                texture
            }
            ReadBackSource::Texture(id) => self
                .textures
                .get(&id)
                .map(|entry| entry.texture.clone())
                .ok_or_else(|| NativeError::UnknownId(format!("{id:?}")))?,
        };
        readback::read_texture(
            &self.context.device,
            &self.context.queue,
            &texture,
            format,
            width,
            height,
        )
    }

    fn read_back_buffer(&mut self, id: BufferId, size: u64) -> Result<Vec<u8>, NativeError> {
        self.submit();
        let buffer = self.buffer(id)?;
        readback::read_buffer(&self.context.device, &self.context.queue, &buffer, size)
    }

    // --- Frame ---

    fn resize_surface(&mut self, width: u32, height: u32) -> Result<(), NativeError> {
        // Recorded passes may still target the old frame.
        self.submit();
        self.context.resize(width, height);
        Ok(())
    }

    fn present(&mut self) -> Result<(), NativeError> {
        self.submit();
        self.context.present();
        Ok(())
    }

    fn sync(&mut self) -> Result<(), NativeError> {
        self.submit();
        self.context
            .device
            .poll(wgpu::PollType::wait_indefinitely())
            .map(|_| ())
            .map_err(|e| NativeError::Backend(format!("device poll failed: {e}")))
    }
}
