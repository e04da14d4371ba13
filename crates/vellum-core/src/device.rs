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

//! The device context.
//!
//! [`Device`] owns every piece of mutable rendering state and is driven by a
//! single thread. Its methods are the "direct" entry points: they run
//! immediately against the native backend. Other threads reach them through
//! the command queue returned by [`Device::command_queue`].

use crate::arena::{ArenaKind, UploadArena};
use crate::binder::{
    BindContext, Binder, ConstantUnit, DrawSetup, IndexBinding, ProgramKey, StreamBinding,
};
use crate::caps::{Caps, CapsFlags};
use crate::command::{self, Command, CommandReceiver, CommandSender};
use crate::config::DeviceConfig;
use crate::desc::{
    BindFlags, BlendStateDesc, BufferDesc, ClearState, CullMode, DepthStencilDesc, IndexFormat,
    InputLayoutDesc, PrimitiveTopology, RasterizerStateDesc, Rect, SamplerDesc, ShaderDesc,
    ShaderStage, ShaderStages, TextureDesc, TextureFormat, TextureRegion, Usage, Viewport,
    MAX_COLOUR_TARGETS,
};
use crate::error::{DeviceError, NativeError, ResourceError, ShaderError};
use crate::handle::{Handle, SlotAllocator};
use crate::markers::{MarkerTiming, PerfMarkers};
use crate::native::{BufferId, DrawArgs, DrawIndexedArgs, NativeDevice, ReadBackSource};
use crate::readback::{ReadBackData, ReadBackParams};
use crate::table::{
    BufferRecord, ResourceKind, ResourceRecord, ResourceTable, SamplerRecord, ShaderRecord,
    TextureRecord,
};
use crate::targets::{ResolveMode, TargetBinding, TargetManager, TargetParams};
use std::sync::Arc;

/// Name of the marker bracketing each frame.
pub const GPU_TOTAL_MARKER: &str = "gpu total";

macro_rules! bind_context {
    ($device:ident) => {
        BindContext {
            native: &mut $device.native,
            table: &mut $device.resources,
            targets: &mut $device.targets,
            caps: &$device.caps,
        }
    };
}

macro_rules! typed_release {
    ($($(#[$meta:meta])* $name:ident => $kind:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self, slot: Handle) {
                let kind = self.resources.kind(slot);
                assert!(
                    kind == ResourceKind::$kind,
                    "{} called on resource {slot}, which is {kind}",
                    stringify!($name)
                );
                self.release_resource(slot);
            }
        )*
    };
}

/// The explicit device context.
#[derive(Debug)]
pub struct Device<N: NativeDevice> {
    native: N,
    config: DeviceConfig,
    caps: Caps,
    resources: ResourceTable,
    binder: Binder,
    targets: TargetManager,
    markers: PerfMarkers,
    constants: UploadArena,
    vertices: UploadArena,
    resolve_constants: Option<BufferId>,
    slots: Arc<SlotAllocator>,
    frame_index: u64,
}

impl<N: NativeDevice> Device<N> {
    /// Creates a device context over a native backend.
    ///
    /// ## Arguments
    /// * `native` - The backend, already initialized with its surface.
    /// * `config` - Device-wide settings.
    ///
    /// ## Returns
    /// The device, with the first frame's "gpu total" marker already open.
    pub fn new(mut native: N, config: DeviceConfig) -> Result<Self, DeviceError> {
        let caps = native.caps();
        log::info!(
            "Device: Initialized on '{}' ({}, {}), caps: {:?}",
            caps.info.renderer,
            caps.info.api_version,
            caps.info.shader_version,
            caps.flags
        );

        let constants =
            UploadArena::new(&mut native, ArenaKind::Constant, config.constant_arena_reserve)?;
        let vertices =
            UploadArena::new(&mut native, ArenaKind::Vertex, config.vertex_arena_reserve)?;

        let mut resources = ResourceTable::new();
        resources.insert(Handle::BACKBUFFER_COLOUR, ResourceRecord::Backbuffer);
        resources.insert(Handle::BACKBUFFER_DEPTH, ResourceRecord::Backbuffer);
        for (slot, arena) in [
            (Handle::DYNAMIC_CONSTANTS, &constants),
            (Handle::DYNAMIC_VERTICES, &vertices),
        ] {
            resources.insert(slot, ResourceRecord::Buffer(arena_record(arena)));
        }

        let timers = caps.supports(CapsFlags::GPU_TIMER) && config.enable_gpu_timers;
        let mut markers = PerfMarkers::new(timers, config.max_timer_queries);
        markers.push(&mut native, GPU_TOTAL_MARKER, 0)?;

        let targets = TargetManager::new(native.backbuffer_size());
        Ok(Self {
            native,
            config,
            caps,
            resources,
            binder: Binder::new(),
            targets,
            markers,
            constants,
            vertices,
            resolve_constants: None,
            slots: Arc::new(SlotAllocator::new()),
            frame_index: 0,
        })
    }

    // --- Accessors ---

    /// Capabilities reported by the backend.
    pub fn caps(&self) -> &Caps {
        &self.caps
    }

    /// Settings the device was created with.
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Number of presented frames.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Number of backbuffer resizes requested with a new size.
    pub fn resize_index(&self) -> u64 {
        self.targets.resize_index()
    }

    /// Most recently requested backbuffer size.
    pub fn backbuffer_size(&self) -> (u32, u32) {
        self.targets.backbuffer_size()
    }

    /// Returns `true` if perf markers issue native timer queries.
    pub fn gpu_timers_enabled(&self) -> bool {
        self.markers.is_enabled()
    }

    /// Timings of the most recent frame whose GPU queries completed.
    pub fn last_gpu_timings(&self) -> &[MarkerTiming] {
        self.markers.last_timings()
    }

    /// The resource table.
    pub fn resources(&self) -> &ResourceTable {
        &self.resources
    }

    /// The state binder.
    pub fn binder(&self) -> &Binder {
        &self.binder
    }

    /// The render target manager.
    pub fn targets(&self) -> &TargetManager {
        &self.targets
    }

    /// The slot allocator shared with command producers.
    pub fn slots(&self) -> &Arc<SlotAllocator> {
        &self.slots
    }

    /// The native backend.
    pub fn native(&self) -> &N {
        &self.native
    }

    /// Mutable access to the native backend. Anything changed behind the
    /// device's back requires [`Device::invalidate_state`].
    pub fn native_mut(&mut self) -> &mut N {
        &mut self.native
    }

    /// Forgets all resident pipeline state, forcing a full rebind on the next draw.
    pub fn invalidate_state(&mut self) {
        self.binder.invalidate_resident();
    }

    // --- Command queue ---

    /// Creates a producer/consumer queue sharing this device's slot allocator.
    pub fn command_queue(&self, capacity: Option<usize>) -> (CommandSender, CommandReceiver) {
        command::channel(capacity, Arc::clone(&self.slots))
    }

    /// Executes queued commands in FIFO order up to and including the next
    /// end-of-frame marker, or until the queue is empty.
    ///
    /// On an end-of-frame marker, slots released so far become reusable and
    /// producers receive the drained signal.
    ///
    /// ## Returns
    /// The number of commands executed, or the first command's error.
    pub fn consume_cmd_buffer(&mut self, rx: &CommandReceiver) -> Result<usize, DeviceError> {
        let mut executed = 0;
        while let Some(command) = rx.try_next() {
            executed += 1;
            if let Command::EndFrame = command {
                self.slots.recycle();
                rx.signal_drained(self.frame_index);
                log::trace!("Device: Drained {executed} commands for frame {}", self.frame_index);
                break;
            }
            self.execute(command)?;
        }
        Ok(executed)
    }

    /// Executes one command.
    pub fn execute(&mut self, command: Command) -> Result<(), DeviceError> {
        match command {
            Command::CreateBuffer { slot, desc, data } => {
                self.create_buffer(slot, &desc, data.as_deref())
            }
            Command::UpdateBuffer { slot, offset, data } => self.update_buffer(slot, &data, offset),
            Command::CreateTexture { slot, desc, data } => {
                self.create_texture(slot, &desc, data.as_deref())
            }
            Command::UpdateTexture { slot, region, data } => {
                self.update_texture(slot, &region, &data)
            }
            Command::CreateSampler { slot, desc } => self.create_sampler(slot, &desc),
            Command::CreateShader { slot, desc } => self.create_shader(slot, &desc),
            Command::LinkStreamOutProgram { so } => self.link_stream_out_program(so),
            Command::CreateInputLayout { slot, desc } => {
                self.create_input_layout(slot, desc);
                Ok(())
            }
            Command::CreateRasterizerState { slot, desc } => {
                self.create_rasterizer_state(slot, desc);
                Ok(())
            }
            Command::CreateBlendState { slot, desc } => {
                self.create_blend_state(slot, desc);
                Ok(())
            }
            Command::CreateDepthStencilState { slot, desc } => {
                self.create_depth_stencil_state(slot, desc);
                Ok(())
            }
            Command::CreateClearState { slot, desc } => {
                self.create_clear_state(slot, desc);
                Ok(())
            }
            Command::CreateRenderTarget { slot, params, track } => {
                self.create_render_target(slot, params, track)
            }
            Command::Release { slot } => {
                self.release_resource(slot);
                Ok(())
            }
            Command::ReplaceResource { dest, src, kind } => {
                self.replace_resource(dest, src, kind);
                Ok(())
            }
            Command::SetVertexBuffers { first, streams } => {
                self.set_vertex_buffers(first, &streams);
                Ok(())
            }
            Command::SetInputLayout(layout) => {
                self.set_input_layout(layout);
                Ok(())
            }
            Command::SetShader { shader, stage } => {
                self.set_shader(shader, stage);
                Ok(())
            }
            Command::SetRasterizerState(state) => {
                self.set_rasterizer_state(state);
                Ok(())
            }
            Command::SetDepthStencilState { state, stencil_ref } => {
                self.set_depth_stencil_state(state, stencil_ref);
                Ok(())
            }
            Command::SetStencilRef(stencil_ref) => {
                self.set_stencil_ref(stencil_ref);
                Ok(())
            }
            Command::SetBlendState(state) => {
                self.set_blend_state(state);
                Ok(())
            }
            Command::SetTexture {
                texture,
                sampler,
                unit,
                stages,
            } => {
                self.set_texture(texture, sampler, unit, stages);
                Ok(())
            }
            Command::SetConstantBuffer { unit, binding } => {
                self.binder.set_constant_buffer(unit, binding);
                Ok(())
            }
            Command::SetStructuredBuffer {
                unit,
                buffer,
                stages,
            } => {
                self.set_structured_buffer(buffer, unit, stages);
                Ok(())
            }
            Command::SetIndexBuffer {
                buffer,
                format,
                offset,
            } => {
                self.set_index_buffer(buffer, format, offset);
                Ok(())
            }
            Command::SetViewport(viewport) => {
                self.set_viewport(viewport);
                Ok(())
            }
            Command::SetScissorRect(rect) => {
                self.set_scissor_rect(rect);
                Ok(())
            }
            Command::SetTargets(binding) => {
                self.set_targets(binding);
                Ok(())
            }
            Command::SetStreamOutTarget(buffer) => {
                self.set_stream_out_target(buffer);
                Ok(())
            }
            Command::Clear {
                clear_state,
                colour_face,
                depth_face,
            } => self.clear(clear_state, colour_face, depth_face),
            Command::Draw {
                vertex_count,
                start_vertex,
                topology,
            } => self.draw(vertex_count, start_vertex, topology),
            Command::DrawIndexed {
                index_count,
                start_index,
                base_vertex,
                topology,
            } => self.draw_indexed(index_count, start_index, base_vertex, topology),
            Command::DrawIndexedInstanced {
                instance_count,
                start_instance,
                index_count,
                start_index,
                base_vertex,
                topology,
            } => self.draw_indexed_instanced(
                instance_count,
                start_instance,
                index_count,
                start_index,
                base_vertex,
                topology,
            ),
            Command::DrawAuto => self.draw_auto(),
            Command::DispatchCompute { groups, cs } => self.dispatch_compute(groups, cs),
            Command::ResolveTarget { slot, mode } => self.resolve_target(slot, mode),
            Command::PushMarker(name) => self.push_marker(&name),
            Command::PopMarker => self.pop_marker(),
            Command::ResizeBackbuffer { width, height } => {
                self.resize_backbuffer(width, height);
                Ok(())
            }
            Command::ReadBack { params, callback } => self.read_back_resource(params, callback),
            Command::EndFrame => {
                self.slots.recycle();
                Ok(())
            }
        }
    }

    // --- Resource creation ---

    fn native_failure(slot: Handle) -> impl FnOnce(NativeError) -> DeviceError {
        move |source| {
            log::error!("Device: Native failure on resource {:?}: {}", slot, source);
            ResourceError::Native { slot, source }.into()
        }
    }

    fn check_format(&self, format: TextureFormat) -> Result<(), DeviceError> {
        if self.caps.supports_format(format) {
            Ok(())
        } else {
            log::error!(
                "Device: Texture format {:?} is not supported by '{}'",
                format,
                self.caps.info.renderer
            );
            Err(ResourceError::UnsupportedFormat(format).into())
        }
    }

    fn check_feature(&self, flag: CapsFlags, what: &str) -> Result<(), DeviceError> {
        if self.caps.supports(flag) {
            Ok(())
        } else {
            log::error!("Device: {} is not supported by '{}'", what, self.caps.info.renderer);
            Err(ResourceError::UnsupportedFeature(what.to_string()).into())
        }
    }

    /// Creates a buffer in `slot`, optionally filled with `data`.
    pub fn create_buffer(
        &mut self,
        slot: Handle,
        desc: &BufferDesc,
        data: Option<&[u8]>,
    ) -> Result<(), DeviceError> {
        if let Some(data) = data {
            assert!(
                data.len() as u64 <= desc.size,
                "initial data ({} bytes) exceeds buffer {slot} size ({} bytes)",
                data.len(),
                desc.size
            );
        }
        if desc.bind.contains(BindFlags::STREAM_OUT) {
            self.check_feature(CapsFlags::STREAM_OUT, "stream-out buffers")?;
        }
        let id = self
            .native
            .create_buffer(desc, data)
            .map_err(Self::native_failure(slot))?;
        self.resources.insert(
            slot,
            ResourceRecord::Buffer(BufferRecord {
                id,
                desc: desc.clone(),
            }),
        );
        log::debug!("Device: Created buffer {:?} ({} bytes)", slot, desc.size);
        Ok(())
    }

    /// Writes `data` into a buffer at `offset`.
    pub fn update_buffer(
        &mut self,
        slot: Handle,
        data: &[u8],
        offset: u64,
    ) -> Result<(), DeviceError> {
        let record = self.resources.buffer(slot);
        assert!(
            offset + data.len() as u64 <= record.desc.size,
            "update of {} bytes at {offset} overruns buffer {slot} ({} bytes)",
            data.len(),
            record.desc.size
        );
        self.native
            .update_buffer(record.id, offset, data)
            .map_err(Self::native_failure(slot))
    }

    /// Creates a texture in `slot`, optionally filled with level-0 `data`.
    pub fn create_texture(
        &mut self,
        slot: Handle,
        desc: &TextureDesc,
        data: Option<&[u8]>,
    ) -> Result<(), DeviceError> {
        self.check_format(desc.format)?;
        if let Some(data) = data {
            assert_eq!(
                data.len() as u64,
                desc.level0_size(),
                "initial data size does not match texture {slot}"
            );
        }
        let id = self
            .native
            .create_texture(desc, data)
            .map_err(Self::native_failure(slot))?;
        self.resources.insert(
            slot,
            ResourceRecord::Texture(TextureRecord {
                id,
                desc: desc.clone(),
            }),
        );
        log::debug!(
            "Device: Created texture {:?} ({}x{}, {:?})",
            slot,
            desc.width,
            desc.height,
            desc.format
        );
        Ok(())
    }

    /// Writes tightly packed `data` into a region of a texture.
    pub fn update_texture(
        &mut self,
        slot: Handle,
        region: &TextureRegion,
        data: &[u8],
    ) -> Result<(), DeviceError> {
        let record = self.resources.texture(slot);
        let desc = &record.desc;
        assert!(
            region.mip < desc.mip_count
                && region.x + region.width <= (desc.width >> region.mip).max(1)
                && region.y + region.height <= (desc.height >> region.mip).max(1),
            "region {region:?} lies outside texture {slot}"
        );
        let expected =
            desc.format.row_pitch(region.width) as usize * desc.format.block_rows(region.height) as usize;
        assert_eq!(data.len(), expected, "region data size does not match texture {slot}");
        self.native
            .update_texture(record.id, region, data)
            .map_err(Self::native_failure(slot))
    }

    /// Creates a sampler in `slot`.
    pub fn create_sampler(&mut self, slot: Handle, desc: &SamplerDesc) -> Result<(), DeviceError> {
        let id = self
            .native
            .create_sampler(desc)
            .map_err(Self::native_failure(slot))?;
        self.resources.insert(
            slot,
            ResourceRecord::Sampler(SamplerRecord {
                id,
                desc: desc.clone(),
            }),
        );
        Ok(())
    }

    /// Compiles a shader into `slot`.
    ///
    /// On failure the numbered source and the native diagnostic are logged.
    pub fn create_shader(&mut self, slot: Handle, desc: &ShaderDesc) -> Result<(), DeviceError> {
        match desc.stage {
            ShaderStage::Compute => self.check_feature(CapsFlags::COMPUTE, "compute shaders")?,
            ShaderStage::StreamOut | ShaderStage::Geometry => {
                self.check_feature(CapsFlags::STREAM_OUT, "stream-out shaders")?
            }
            ShaderStage::Vertex | ShaderStage::Pixel => {}
        }

        let id = match self.native.compile_shader(desc) {
            Ok(id) => id,
            Err(err) => {
                log_compile_failure(slot, desc, &err);
                return Err(ShaderError::Compilation {
                    slot,
                    stage: desc.stage,
                    details: err.to_string(),
                }
                .into());
            }
        };
        self.resources.insert(
            slot,
            ResourceRecord::Shader(ShaderRecord {
                id,
                stage: desc.stage,
                label: desc.label.clone(),
                bindings: desc.bindings.clone(),
                stream_out_outputs: desc.stream_out_outputs.clone(),
            }),
        );
        log::debug!("Device: Compiled {:?} shader {:?}", desc.stage, slot);
        Ok(())
    }

    /// Links the capture program of a stream-out shader ahead of its first draw.
    pub fn link_stream_out_program(&mut self, so: Handle) -> Result<(), DeviceError> {
        self.binder
            .programs_mut()
            .get_or_link(&mut self.native, &self.resources, ProgramKey::StreamOut { so })?;
        Ok(())
    }

    /// Stores an input layout in `slot`.
    pub fn create_input_layout(&mut self, slot: Handle, desc: InputLayoutDesc) {
        self.resources.insert(slot, ResourceRecord::InputLayout(desc));
    }

    /// Stores a rasterizer state block in `slot`.
    pub fn create_rasterizer_state(&mut self, slot: Handle, desc: RasterizerStateDesc) {
        if !desc.depth_clip && !self.caps.supports(CapsFlags::DEPTH_CLAMP) {
            log::warn!(
                "Device: Rasterizer state {:?} disables depth clip, but depth clamp is unsupported",
                slot
            );
        }
        self.resources
            .insert(slot, ResourceRecord::RasterizerState(desc));
    }

    /// Stores a blend state block in `slot`.
    pub fn create_blend_state(&mut self, slot: Handle, desc: BlendStateDesc) {
        assert!(
            desc.targets.len() <= MAX_COLOUR_TARGETS,
            "blend state {slot} describes more than {MAX_COLOUR_TARGETS} targets"
        );
        self.resources.insert(slot, ResourceRecord::BlendState(desc));
    }

    /// Stores a depth-stencil state block in `slot`.
    pub fn create_depth_stencil_state(&mut self, slot: Handle, desc: DepthStencilDesc) {
        self.resources
            .insert(slot, ResourceRecord::DepthStencilState(desc));
    }

    /// Stores a clear state block in `slot`.
    pub fn create_clear_state(&mut self, slot: Handle, desc: ClearState) {
        assert!(
            desc.mrt.len() <= MAX_COLOUR_TARGETS,
            "clear state {slot} describes more than {MAX_COLOUR_TARGETS} targets"
        );
        self.resources.insert(slot, ResourceRecord::ClearState(desc));
    }

    /// Creates a render target in `slot`.
    ///
    /// ## Arguments
    /// * `slot` - Destination slot, chosen by the caller.
    /// * `params` - Creation parameters, kept for resize and lazy resolve.
    /// * `track` - Recreate the target on backbuffer resize (backbuffer-relative sizes only).
    pub fn create_render_target(
        &mut self,
        slot: Handle,
        params: TargetParams,
        track: bool,
    ) -> Result<(), DeviceError> {
        self.check_format(params.format)?;
        if params.sample_count > self.caps.max_samples.max(1) {
            log::error!(
                "Device: {}x MSAA requested for render target {:?}, device maximum is {}",
                params.sample_count,
                slot,
                self.caps.max_samples
            );
            return Err(ResourceError::UnsupportedFeature(format!(
                "{}x MSAA",
                params.sample_count
            ))
            .into());
        }
        let record = self
            .targets
            .create(&mut self.native, slot, params, track)
            .map_err(Self::native_failure(slot))?;
        self.resources
            .insert(slot, ResourceRecord::RenderTarget(record));
        Ok(())
    }

    // --- Release ---

    fn destroy_record(&mut self, slot: Handle, record: ResourceRecord) {
        match record {
            ResourceRecord::Empty => {
                log::warn!("Device: Release of empty slot {:?} ignored", slot);
            }
            ResourceRecord::Buffer(buffer) => self.native.destroy_buffer(buffer.id),
            ResourceRecord::Texture(texture) => self.native.destroy_texture(texture.id),
            ResourceRecord::Sampler(sampler) => self.native.destroy_sampler(sampler.id),
            ResourceRecord::RenderTarget(target) => {
                self.targets.release(&mut self.native, slot, target)
            }
            ResourceRecord::Shader(shader) => {
                self.binder
                    .programs_mut()
                    .release_shader(&mut self.native, slot);
                self.native.destroy_shader(shader.id);
            }
            ResourceRecord::Backbuffer
            | ResourceRecord::RasterizerState(_)
            | ResourceRecord::BlendState(_)
            | ResourceRecord::DepthStencilState(_)
            | ResourceRecord::ClearState(_)
            | ResourceRecord::InputLayout(_) => {}
        }
    }

    /// Releases whatever lives in `slot` and unbinds it.
    ///
    /// The slot becomes reusable by producers after the current frame drains.
    pub fn release_resource(&mut self, slot: Handle) {
        assert!(
            slot >= Handle::FIRST_USER,
            "slot {slot} is owned by the device and cannot be released"
        );
        let record = self.resources.take(slot);
        log::debug!("Device: Releasing {} in {:?}", record.kind(), slot);
        self.destroy_record(slot, record);
        self.binder.forget_handle(slot);
        self.slots.free(slot);
    }

    typed_release! {
        /// Releases a buffer.
        release_buffer => Buffer;
        /// Releases a texture.
        release_texture => Texture;
        /// Releases a sampler.
        release_sampler => Sampler;
        /// Releases a shader and every program linked from it.
        release_shader => Shader;
        /// Releases a render target and its cached framebuffers.
        release_render_target => RenderTarget;
        /// Releases an input layout.
        release_input_layout => InputLayout;
        /// Releases a rasterizer state block.
        release_rasterizer_state => RasterizerState;
        /// Releases a blend state block.
        release_blend_state => BlendState;
        /// Releases a depth-stencil state block.
        release_depth_stencil_state => DepthStencilState;
        /// Releases a clear state block.
        release_clear_state => ClearState;
    }

    /// Moves the resource in `src` into `dest`, releasing what `dest` held.
    ///
    /// Used for hot reload: a replacement is created in a scratch slot and
    /// swapped in, so every binding of `dest` picks it up.
    pub fn replace_resource(&mut self, dest: Handle, src: Handle, kind: ResourceKind) {
        assert!(
            dest >= Handle::FIRST_USER && src >= Handle::FIRST_USER,
            "replace_resource cannot touch device-owned slots"
        );
        let found = self.resources.kind(src);
        assert_eq!(found, kind, "replace_resource source {src} is {found}, expected {kind}");
        let current = self.resources.kind(dest);
        assert!(
            current == kind || current == ResourceKind::Empty,
            "replace_resource destination {dest} is {current}, expected {kind}"
        );

        let old = self.resources.take(dest);
        self.destroy_record(dest, old);
        let mut record = self.resources.take(src);
        if let ResourceRecord::RenderTarget(target) = &mut record {
            if target.tracked {
                self.targets.retarget(src, dest);
            }
        }
        if kind == ResourceKind::Shader {
            self.binder
                .programs_mut()
                .release_shader(&mut self.native, src);
        }
        self.resources.insert(dest, record);
        self.binder.forget_handle(src);
        self.binder.invalidate_resident();
        self.slots.free(src);
        log::debug!("Device: Replaced {} {:?} with {:?}", kind, dest, src);
    }

    // --- Requested state ---

    /// Sets vertex streams starting at stream `first`.
    pub fn set_vertex_buffers(&mut self, first: usize, streams: &[StreamBinding]) {
        self.binder.set_vertex_buffers(first, streams);
    }

    /// Sets the input layout.
    pub fn set_input_layout(&mut self, layout: Handle) {
        self.binder.requested_mut().input_layout = layout;
    }

    /// Sets the shader for `stage`.
    pub fn set_shader(&mut self, shader: Handle, stage: ShaderStage) {
        self.binder.set_shader(shader, stage);
    }

    /// Sets the rasterizer state block.
    pub fn set_rasterizer_state(&mut self, state: Handle) {
        self.binder.requested_mut().raster = state;
    }

    /// Sets the depth-stencil state block and stencil reference.
    pub fn set_depth_stencil_state(&mut self, state: Handle, stencil_ref: u8) {
        let requested = self.binder.requested_mut();
        requested.depth_stencil = state;
        requested.stencil_ref = stencil_ref;
    }

    /// Sets only the stencil reference.
    pub fn set_stencil_ref(&mut self, stencil_ref: u8) {
        self.binder.requested_mut().stencil_ref = stencil_ref;
    }

    /// Sets the blend state block.
    pub fn set_blend_state(&mut self, state: Handle) {
        self.binder.requested_mut().blend = state;
    }

    /// Sets a texture (or render target) and sampler at `unit`.
    pub fn set_texture(
        &mut self,
        texture: Handle,
        sampler: Handle,
        unit: u32,
        stages: ShaderStages,
    ) {
        self.binder.set_texture(unit, texture, sampler, stages);
    }

    /// Sets a constant buffer range at `unit`. A `size` of `0` binds to the end.
    pub fn set_constant_buffer(
        &mut self,
        buffer: Handle,
        unit: u32,
        stages: ShaderStages,
        offset: u64,
        size: u64,
    ) {
        self.binder.set_constant_buffer(
            unit,
            ConstantUnit {
                buffer,
                offset,
                size,
                stages,
            },
        );
    }

    /// Sets a structured buffer at `unit`.
    pub fn set_structured_buffer(&mut self, buffer: Handle, unit: u32, stages: ShaderStages) {
        self.binder.set_structured_buffer(unit, buffer, stages);
    }

    /// Sets the index buffer.
    pub fn set_index_buffer(&mut self, buffer: Handle, format: IndexFormat, offset: u64) {
        self.binder.requested_mut().index = IndexBinding {
            buffer,
            format,
            offset,
        };
    }

    /// Sets the viewport.
    pub fn set_viewport(&mut self, viewport: Viewport) {
        self.binder.requested_mut().viewport = Some(viewport);
    }

    /// Sets the scissor rectangle.
    pub fn set_scissor_rect(&mut self, rect: Rect) {
        self.binder.requested_mut().scissor = Some(rect);
    }

    /// Sets the render targets for subsequent draws and clears.
    ///
    /// Panics if an off-screen binding names anything but render targets.
    pub fn set_targets(&mut self, binding: TargetBinding) {
        assert!(
            binding.colours.len() <= MAX_COLOUR_TARGETS,
            "{} colour targets bound, at most {MAX_COLOUR_TARGETS} supported",
            binding.colours.len()
        );
        if !binding.is_backbuffer() {
            for handle in binding.handles() {
                let kind = self.resources.kind(handle);
                assert!(
                    kind == ResourceKind::RenderTarget,
                    "incomplete framebuffer: {handle} is {kind}, not a render target"
                );
            }
        }
        self.binder.requested_mut().targets = binding;
    }

    /// Sets the buffer capturing stream-out output of the next draw.
    pub fn set_stream_out_target(&mut self, buffer: Handle) {
        self.binder.requested_mut().stream_out_target = buffer;
    }

    // --- Work submission ---

    /// Draws non-indexed vertices.
    pub fn draw(
        &mut self,
        vertex_count: u32,
        start_vertex: u32,
        topology: PrimitiveTopology,
    ) -> Result<(), DeviceError> {
        self.binder.apply_draw(
            &mut bind_context!(self),
            DrawSetup {
                topology,
                start_index: None,
                base_vertex: 0,
            },
        )?;
        let result = self.native.draw(&DrawArgs {
            topology,
            vertex_count,
            first_vertex: start_vertex,
            instance_count: 1,
            first_instance: 0,
        });
        self.binder.finish_draw(&mut self.native);
        Ok(result?)
    }

    /// Draws indexed vertices.
    pub fn draw_indexed(
        &mut self,
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
        topology: PrimitiveTopology,
    ) -> Result<(), DeviceError> {
        self.draw_indexed_instanced(1, 0, index_count, start_index, base_vertex, topology)
    }

    /// Draws instances of indexed vertices.
    pub fn draw_indexed_instanced(
        &mut self,
        instance_count: u32,
        start_instance: u32,
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
        topology: PrimitiveTopology,
    ) -> Result<(), DeviceError> {
        let native_base_vertex = self.binder.apply_draw(
            &mut bind_context!(self),
            DrawSetup {
                topology,
                start_index: Some(start_index),
                base_vertex,
            },
        )?;
        let result = self.native.draw_indexed(&DrawIndexedArgs {
            topology,
            index_count,
            base_vertex: native_base_vertex,
            instance_count,
            first_instance: start_instance,
        });
        self.binder.finish_draw(&mut self.native);
        Ok(result?)
    }

    /// Draws the vertices captured by the last stream-out pass.
    pub fn draw_auto(&mut self) -> Result<(), DeviceError> {
        self.check_feature(CapsFlags::STREAM_OUT, "draw_auto")?;
        let topology = self
            .binder
            .captured_topology()
            .unwrap_or_else(|| panic!("draw_auto with no prior stream-out capture"));
        self.binder.apply_draw(
            &mut bind_context!(self),
            DrawSetup {
                topology,
                start_index: None,
                base_vertex: 0,
            },
        )?;
        let result = self.native.draw_auto(topology);
        self.binder.finish_draw(&mut self.native);
        Ok(result?)
    }

    /// Dispatches a compute shader.
    pub fn dispatch_compute(&mut self, groups: [u32; 3], cs: Handle) -> Result<(), DeviceError> {
        self.check_feature(CapsFlags::COMPUTE, "compute dispatch")?;
        self.binder.set_shader(cs, ShaderStage::Compute);
        self.binder.apply_compute(&mut bind_context!(self))?;
        self.native.dispatch_compute(groups)?;
        Ok(())
    }

    /// Clears the bound targets with a clear state block.
    ///
    /// `colour_face` and `depth_face` select the cube face or array layer of
    /// off-screen targets.
    pub fn clear(
        &mut self,
        clear_state: Handle,
        colour_face: u32,
        depth_face: u32,
    ) -> Result<(), DeviceError> {
        let targets = &mut self.binder.requested_mut().targets;
        if !targets.is_backbuffer() {
            targets.colour_face = colour_face;
            targets.depth_face = depth_face;
        }
        self.binder.apply_targets(&mut bind_context!(self))?;
        let desc = self.resources.clear_state(clear_state);
        self.native.clear(desc)?;
        Ok(())
    }

    /// Resolves an MSAA render target into its single-sampled texture, or
    /// regenerates the mips of a single-sampled one.
    pub fn resolve_target(&mut self, slot: Handle, mode: ResolveMode) -> Result<(), DeviceError> {
        let record = self.resources.render_target(slot);
        if !record.is_msaa() {
            if let (Some(texture), true) = (record.texture, record.mip_count > 1) {
                self.native.generate_mips(texture)?;
            }
            self.resources.render_target_mut(slot).invalidate = false;
            return Ok(());
        }

        match mode {
            ResolveMode::Blit => {
                if record.is_depth() {
                    log::error!(
                        "Device: Render target {:?} is multisampled depth and needs a custom resolve",
                        slot
                    );
                    return Err(ResourceError::UnsupportedFeature(
                        "blit resolve of multisampled depth".to_string(),
                    )
                    .into());
                }
                self.targets
                    .blit_resolve(&mut self.native, &mut self.resources, slot)?;
            }
            ResolveMode::Custom { vs, ps } => self.custom_resolve(slot, vs, ps)?,
        }
        self.binder.invalidate_resident();
        Ok(())
    }

    fn custom_resolve(&mut self, slot: Handle, vs: Handle, ps: Handle) -> Result<(), DeviceError> {
        let (_, dst) = self
            .targets
            .resolve_pair(&mut self.native, &mut self.resources, slot)?;
        let program = self.binder.programs_mut().get_or_link(
            &mut self.native,
            &self.resources,
            ProgramKey::Raster { vs, ps },
        )?;

        let cbuffer = match self.resolve_constants {
            Some(id) => id,
            None => {
                let desc = BufferDesc {
                    label: Some("resolve constants".to_string()),
                    size: 16,
                    bind: BindFlags::CONSTANT,
                    usage: Usage::Dynamic,
                };
                let id = self.native.create_buffer(&desc, None)?;
                self.resolve_constants = Some(id);
                id
            }
        };

        let record = self.resources.render_target(slot);
        let (w, h) = record.resolved_size;
        let msaa = record.msaa;
        let constants = [w as f32, h as f32, 0.0, 0.0];
        self.native
            .update_buffer(cbuffer, 0, bytemuck::cast_slice(&constants))?;

        self.native.bind_framebuffer(Some(dst));
        self.native.use_program(program, 1.0);
        self.native.bind_vertex_input(&InputLayoutDesc::default(), &[]);
        let raster = RasterizerStateDesc {
            cull: CullMode::None,
            ..RasterizerStateDesc::default()
        };
        self.native.apply_raster_state(&raster, raster.front_face());
        self.native.apply_blend_state(&BlendStateDesc::default());
        let depth = DepthStencilDesc {
            depth_enable: false,
            depth_write: false,
            ..DepthStencilDesc::default()
        };
        self.native.apply_depth_stencil_state(&depth, 0);
        self.native.set_viewport(&Viewport::new(w as f32, h as f32));
        self.native.set_scissor(&Rect {
            left: 0.0,
            top: 0.0,
            right: w as f32,
            bottom: h as f32,
        });
        self.native
            .bind_texture(0, msaa, None, ShaderStages::PIXEL);
        self.native
            .bind_constant_buffer(0, cbuffer, 0, 16, ShaderStages::PIXEL);
        self.native.draw(&DrawArgs {
            topology: PrimitiveTopology::TriangleList,
            vertex_count: 3,
            first_vertex: 0,
            instance_count: 1,
            first_instance: 0,
        })?;

        self.resources.render_target_mut(slot).invalidate = false;
        log::trace!("Device: Custom-resolved render target {:?}", slot);
        Ok(())
    }

    // --- Perf markers ---

    /// Opens a named GPU timing marker.
    pub fn push_marker(&mut self, name: &str) -> Result<(), DeviceError> {
        self.markers
            .push(&mut self.native, name, self.frame_index)?;
        Ok(())
    }

    /// Closes the innermost GPU timing marker.
    pub fn pop_marker(&mut self) -> Result<(), DeviceError> {
        self.markers.pop(&mut self.native, self.frame_index)?;
        Ok(())
    }

    // --- Dynamic upload arena ---

    /// Appends transient data to an upload arena.
    ///
    /// ## Returns
    /// The offset to bind through [`Handle::DYNAMIC_CONSTANTS`] or
    /// [`Handle::DYNAMIC_VERTICES`] once [`Device::commit_dynamic`] has run.
    pub fn write_dynamic(&mut self, kind: ArenaKind, data: &[u8]) -> Result<u64, DeviceError> {
        let (arena, slot) = match kind {
            ArenaKind::Constant => (&mut self.constants, Handle::DYNAMIC_CONSTANTS),
            ArenaKind::Vertex => (&mut self.vertices, Handle::DYNAMIC_VERTICES),
        };
        let before = arena.buffer();
        let offset = arena.write(&mut self.native, data)?;
        if arena.buffer() != before {
            *self.resources.buffer_mut(slot) = arena_record(arena);
            self.binder.invalidate_resident();
        }
        Ok(offset)
    }

    /// Typed variant of [`Device::write_dynamic`].
    pub fn write_dynamic_pod<T: bytemuck::Pod>(
        &mut self,
        kind: ArenaKind,
        values: &[T],
    ) -> Result<u64, DeviceError> {
        self.write_dynamic(kind, bytemuck::cast_slice(values))
    }

    /// Uploads both arenas. Call once per frame after all writes.
    pub fn commit_dynamic(&mut self) -> Result<(), DeviceError> {
        self.constants.commit(&mut self.native)?;
        self.vertices.commit(&mut self.native)?;
        Ok(())
    }

    /// Current upload arena of `kind`.
    pub fn arena(&self, kind: ArenaKind) -> &UploadArena {
        match kind {
            ArenaKind::Constant => &self.constants,
            ArenaKind::Vertex => &self.vertices,
        }
    }

    // --- Frame boundary ---

    /// Requests a backbuffer resize, applied at a later frame boundary.
    pub fn resize_backbuffer(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::warn!(
                "Device: Ignoring resize to zero dimensions: {}x{}",
                width,
                height
            );
            return;
        }
        self.targets.request_resize(width, height);
    }

    /// Starts a frame: applies a pending backbuffer resize once it is due.
    pub fn new_frame(&mut self) -> Result<(), DeviceError> {
        if self.targets.resize_due(&self.config) {
            let applied = self
                .targets
                .apply_resize(&mut self.native, &mut self.resources);
            self.binder.invalidate_resident();
            applied?;
        }
        Ok(())
    }

    /// Ends a frame: closes the frame marker, presents, gathers GPU timings
    /// and opens the next frame's marker.
    pub fn present(&mut self) -> Result<(), DeviceError> {
        self.markers.pop(&mut self.native, self.frame_index)?;
        let presented = self.native.present();
        self.markers.gather(&mut self.native);
        self.targets.on_present();
        self.frame_index += 1;
        self.markers
            .push(&mut self.native, GPU_TOTAL_MARKER, self.frame_index)?;
        Ok(presented?)
    }

    /// Blocks until submitted GPU work has completed.
    pub fn sync(&mut self) -> Result<(), DeviceError> {
        self.native.sync()?;
        Ok(())
    }

    // --- Read-back ---

    /// Copies a resource to the CPU and hands it to `callback` before returning.
    ///
    /// [`Handle::NULL`] reads the backbuffer. MSAA render targets are resolved first.
    pub fn read_back_resource(
        &mut self,
        params: ReadBackParams,
        callback: impl FnOnce(ReadBackData),
    ) -> Result<(), DeviceError> {
        let slot = params.resource;
        let data = match self.resources.kind(slot) {
            ResourceKind::Empty if slot.is_null() => {
                let format = params
                    .format
                    .unwrap_or_else(|| self.native.backbuffer_format());
                let (w, h) = self.native.backbuffer_size();
                let bytes = self
                    .native
                    .read_back_texture(ReadBackSource::Backbuffer, format, w, h)?;
                ReadBackData::from_texels(bytes, format, w, h)
            }
            ResourceKind::Buffer => {
                let record = self.resources.buffer(slot);
                let bytes = self.native.read_back_buffer(record.id, record.desc.size)?;
                ReadBackData::from_buffer(bytes)
            }
            ResourceKind::Texture => {
                let record = self.resources.texture(slot);
                let format = params.format.unwrap_or(record.desc.format);
                let (w, h) = (record.desc.width, record.desc.height);
                let bytes = self
                    .native
                    .read_back_texture(ReadBackSource::Texture(record.id), format, w, h)?;
                ReadBackData::from_texels(bytes, format, w, h)
            }
            ResourceKind::RenderTarget => {
                let record = self.resources.render_target(slot);
                if record.is_msaa() && (record.invalidate || record.texture.is_none()) {
                    self.resolve_target(slot, ResolveMode::Blit)?;
                }
                let record = self.resources.render_target(slot);
                let format = params.format.unwrap_or(record.sampled_format());
                let (w, h) = record.resolved_size;
                let texture = record
                    .texture
                    .unwrap_or_else(|| panic!("render target {slot} has nothing to read back"));
                let bytes = self
                    .native
                    .read_back_texture(ReadBackSource::Texture(texture), format, w, h)?;
                ReadBackData::from_texels(bytes, format, w, h)
            }
            other => panic!("resource {slot} is {other} and cannot be read back"),
        };
        callback(data);
        Ok(())
    }
}

impl<N: NativeDevice> Drop for Device<N> {
    fn drop(&mut self) {
        for index in Handle::FIRST_USER.0..self.resources.capacity() as u32 {
            let slot = Handle(index);
            if self.resources.is_live(slot) {
                let record = self.resources.take(slot);
                self.destroy_record(slot, record);
            }
        }
        self.binder.programs_mut().clear(&mut self.native);
        self.targets.flush_framebuffers(&mut self.native);
        self.markers.destroy(&mut self.native);
        self.native.destroy_buffer(self.constants.buffer());
        self.native.destroy_buffer(self.vertices.buffer());
        if let Some(id) = self.resolve_constants.take() {
            self.native.destroy_buffer(id);
        }
        log::info!("Device: Shut down after {} frames", self.frame_index);
    }
}

fn arena_record(arena: &UploadArena) -> BufferRecord {
    BufferRecord {
        id: arena.buffer(),
        desc: arena.buffer_desc(),
    }
}

fn log_compile_failure(slot: Handle, desc: &ShaderDesc, err: &NativeError) {
    let source = match desc.source.text() {
        Some(text) => text
            .lines()
            .enumerate()
            .map(|(i, line)| format!("{:4}: {}", i + 1, line))
            .collect::<Vec<_>>()
            .join("\n"),
        None => "<binary module>".to_string(),
    };
    log::error!(
        "Device: Failed to compile {:?} shader {:?} ('{}'):\n{}\n{}",
        desc.stage,
        slot,
        desc.label.as_deref().unwrap_or("unnamed"),
        source,
        err
    );
}
