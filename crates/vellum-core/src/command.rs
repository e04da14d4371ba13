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

//! Producer/consumer command queue.
//!
//! Producer threads never touch native state. They reserve handles through a
//! shared [`SlotAllocator`], enqueue [`Command`]s and mark the end of a frame
//! with [`CommandSender::kick`]. The thread owning the device drains the
//! queue in FIFO order with `Device::consume_cmd_buffer` and answers each
//! kick with a "drained" signal carrying the frame index.

use crate::binder::{ConstantUnit, StreamBinding};
use crate::desc::{
    BlendStateDesc, BufferDesc, ClearState, DepthStencilDesc, IndexFormat, InputLayoutDesc,
    PrimitiveTopology, RasterizerStateDesc, Rect, SamplerDesc, ShaderDesc, ShaderStage,
    ShaderStages, TextureDesc, TextureRegion, Viewport,
};
use crate::error::DeviceError;
use crate::handle::{Handle, SlotAllocator};
use crate::readback::{ReadBackCallback, ReadBackParams};
use crate::table::ResourceKind;
use crate::targets::{ResolveMode, TargetBinding, TargetParams};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One deferred call to a device entry point.
#[allow(missing_docs)]
pub enum Command {
    CreateBuffer {
        slot: Handle,
        desc: BufferDesc,
        data: Option<Vec<u8>>,
    },
    UpdateBuffer {
        slot: Handle,
        offset: u64,
        data: Vec<u8>,
    },
    CreateTexture {
        slot: Handle,
        desc: TextureDesc,
        data: Option<Vec<u8>>,
    },
    UpdateTexture {
        slot: Handle,
        region: TextureRegion,
        data: Vec<u8>,
    },
    CreateSampler {
        slot: Handle,
        desc: SamplerDesc,
    },
    CreateShader {
        slot: Handle,
        desc: ShaderDesc,
    },
    LinkStreamOutProgram {
        so: Handle,
    },
    CreateInputLayout {
        slot: Handle,
        desc: InputLayoutDesc,
    },
    CreateRasterizerState {
        slot: Handle,
        desc: RasterizerStateDesc,
    },
    CreateBlendState {
        slot: Handle,
        desc: BlendStateDesc,
    },
    CreateDepthStencilState {
        slot: Handle,
        desc: DepthStencilDesc,
    },
    CreateClearState {
        slot: Handle,
        desc: ClearState,
    },
    CreateRenderTarget {
        slot: Handle,
        params: TargetParams,
        track: bool,
    },
    /// Releases whatever lives in `slot`.
    Release {
        slot: Handle,
    },
    ReplaceResource {
        dest: Handle,
        src: Handle,
        kind: ResourceKind,
    },
    SetVertexBuffers {
        first: usize,
        streams: Vec<StreamBinding>,
    },
    SetInputLayout(Handle),
    SetShader {
        shader: Handle,
        stage: ShaderStage,
    },
    SetRasterizerState(Handle),
    SetDepthStencilState {
        state: Handle,
        stencil_ref: u8,
    },
    SetStencilRef(u8),
    SetBlendState(Handle),
    SetTexture {
        texture: Handle,
        sampler: Handle,
        unit: u32,
        stages: ShaderStages,
    },
    SetConstantBuffer {
        unit: u32,
        binding: ConstantUnit,
    },
    SetStructuredBuffer {
        unit: u32,
        buffer: Handle,
        stages: ShaderStages,
    },
    SetIndexBuffer {
        buffer: Handle,
        format: IndexFormat,
        offset: u64,
    },
    SetViewport(Viewport),
    SetScissorRect(Rect),
    SetTargets(TargetBinding),
    SetStreamOutTarget(Handle),
    Clear {
        clear_state: Handle,
        colour_face: u32,
        depth_face: u32,
    },
    Draw {
        vertex_count: u32,
        start_vertex: u32,
        topology: PrimitiveTopology,
    },
    DrawIndexed {
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
        topology: PrimitiveTopology,
    },
    DrawIndexedInstanced {
        instance_count: u32,
        start_instance: u32,
        index_count: u32,
        start_index: u32,
        base_vertex: i32,
        topology: PrimitiveTopology,
    },
    DrawAuto,
    DispatchCompute {
        groups: [u32; 3],
        cs: Handle,
    },
    ResolveTarget {
        slot: Handle,
        mode: ResolveMode,
    },
    PushMarker(String),
    PopMarker,
    ResizeBackbuffer {
        width: u32,
        height: u32,
    },
    ReadBack {
        params: ReadBackParams,
        callback: ReadBackCallback,
    },
    /// Marks the end of a producer frame.
    EndFrame,
}

impl Command {
    /// Name of the entry point this command invokes.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateBuffer { .. } => "create_buffer",
            Command::UpdateBuffer { .. } => "update_buffer",
            Command::CreateTexture { .. } => "create_texture",
            Command::UpdateTexture { .. } => "update_texture",
            Command::CreateSampler { .. } => "create_sampler",
            Command::CreateShader { .. } => "create_shader",
            Command::LinkStreamOutProgram { .. } => "link_stream_out_program",
            Command::CreateInputLayout { .. } => "create_input_layout",
            Command::CreateRasterizerState { .. } => "create_rasterizer_state",
            Command::CreateBlendState { .. } => "create_blend_state",
            Command::CreateDepthStencilState { .. } => "create_depth_stencil_state",
            Command::CreateClearState { .. } => "create_clear_state",
            Command::CreateRenderTarget { .. } => "create_render_target",
            Command::Release { .. } => "release",
            Command::ReplaceResource { .. } => "replace_resource",
            Command::SetVertexBuffers { .. } => "set_vertex_buffers",
            Command::SetInputLayout(_) => "set_input_layout",
            Command::SetShader { .. } => "set_shader",
            Command::SetRasterizerState(_) => "set_rasterizer_state",
            Command::SetDepthStencilState { .. } => "set_depth_stencil_state",
            Command::SetStencilRef(_) => "set_stencil_ref",
            Command::SetBlendState(_) => "set_blend_state",
            Command::SetTexture { .. } => "set_texture",
            Command::SetConstantBuffer { .. } => "set_constant_buffer",
            Command::SetStructuredBuffer { .. } => "set_structured_buffer",
            Command::SetIndexBuffer { .. } => "set_index_buffer",
            Command::SetViewport(_) => "set_viewport",
            Command::SetScissorRect(_) => "set_scissor_rect",
            Command::SetTargets(_) => "set_targets",
            Command::SetStreamOutTarget(_) => "set_stream_out_target",
            Command::Clear { .. } => "clear",
            Command::Draw { .. } => "draw",
            Command::DrawIndexed { .. } => "draw_indexed",
            Command::DrawIndexedInstanced { .. } => "draw_indexed_instanced",
            Command::DrawAuto => "draw_auto",
            Command::DispatchCompute { .. } => "dispatch_compute",
            Command::ResolveTarget { .. } => "resolve_target",
            Command::PushMarker(_) => "push_marker",
            Command::PopMarker => "pop_marker",
            Command::ResizeBackbuffer { .. } => "resize_backbuffer",
            Command::ReadBack { .. } => "read_back_resource",
            Command::EndFrame => "end_frame",
        }
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Command({})", self.name())
    }
}

/// Producer end of the command queue.
#[derive(Debug, Clone)]
pub struct CommandSender {
    commands: flume::Sender<Command>,
    drained: flume::Receiver<u64>,
    slots: Arc<SlotAllocator>,
}

/// Consumer end of the command queue, owned by the device thread.
#[derive(Debug)]
pub struct CommandReceiver {
    commands: flume::Receiver<Command>,
    drained: flume::Sender<u64>,
}

/// Creates a command queue. `None` makes it unbounded; a bounded queue
/// blocks producers once `capacity` commands are waiting.
pub fn channel(
    capacity: Option<usize>,
    slots: Arc<SlotAllocator>,
) -> (CommandSender, CommandReceiver) {
    let (commands_tx, commands_rx) = match capacity {
        Some(capacity) => flume::bounded(capacity),
        None => flume::unbounded(),
    };
    let (drained_tx, drained_rx) = flume::unbounded();
    log::info!("Command queue initialized (capacity: {:?}).", capacity);
    (
        CommandSender {
            commands: commands_tx,
            drained: drained_rx,
            slots,
        },
        CommandReceiver {
            commands: commands_rx,
            drained: drained_tx,
        },
    )
}

macro_rules! create_helpers {
    ($($(#[$meta:meta])* $name:ident($($arg:ident: $ty:ty),*) => $variant:ident;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&self, $($arg: $ty),*) -> Result<Handle, DeviceError> {
                let slot = self.reserve();
                self.submit(Command::$variant { slot, $($arg),* })?;
                Ok(slot)
            }
        )*
    };
}

impl CommandSender {
    /// Reserves a handle synchronously.
    pub fn reserve(&self) -> Handle {
        self.slots.reserve()
    }

    /// Enqueues a command.
    ///
    /// ## Returns
    /// [`DeviceError::Disconnected`] if the consumer end was dropped.
    pub fn submit(&self, command: Command) -> Result<(), DeviceError> {
        log::trace!("Enqueuing {:?}", command);
        self.commands
            .send(command)
            .map_err(|_| DeviceError::Disconnected)
    }

    /// Marks the end of the producer's frame.
    pub fn kick(&self) -> Result<(), DeviceError> {
        self.submit(Command::EndFrame)
    }

    /// Blocks until the consumer has drained a frame, returning its index.
    ///
    /// Clones of a sender share one drained channel; each signal wakes a
    /// single waiter.
    pub fn wait_drained(&self, timeout: Duration) -> Result<u64, DeviceError> {
        self.drained.recv_timeout(timeout).map_err(|e| match e {
            flume::RecvTimeoutError::Timeout => DeviceError::Timeout,
            flume::RecvTimeoutError::Disconnected => DeviceError::Disconnected,
        })
    }

    /// Number of commands waiting to be consumed.
    pub fn pending(&self) -> usize {
        self.commands.len()
    }

    create_helpers! {
        /// Reserves a slot and enqueues a buffer creation.
        create_buffer(desc: BufferDesc, data: Option<Vec<u8>>) => CreateBuffer;
        /// Reserves a slot and enqueues a texture creation.
        create_texture(desc: TextureDesc, data: Option<Vec<u8>>) => CreateTexture;
        /// Reserves a slot and enqueues a sampler creation.
        create_sampler(desc: SamplerDesc) => CreateSampler;
        /// Reserves a slot and enqueues a shader compilation.
        create_shader(desc: ShaderDesc) => CreateShader;
        /// Reserves a slot and enqueues an input layout creation.
        create_input_layout(desc: InputLayoutDesc) => CreateInputLayout;
        /// Reserves a slot and enqueues a rasterizer state creation.
        create_rasterizer_state(desc: RasterizerStateDesc) => CreateRasterizerState;
        /// Reserves a slot and enqueues a blend state creation.
        create_blend_state(desc: BlendStateDesc) => CreateBlendState;
        /// Reserves a slot and enqueues a depth-stencil state creation.
        create_depth_stencil_state(desc: DepthStencilDesc) => CreateDepthStencilState;
        /// Reserves a slot and enqueues a clear state creation.
        create_clear_state(desc: ClearState) => CreateClearState;
        /// Reserves a slot and enqueues a render target creation.
        create_render_target(params: TargetParams, track: bool) => CreateRenderTarget;
    }
}

impl CommandReceiver {
    /// Takes the next command without blocking.
    pub fn try_next(&self) -> Option<Command> {
        self.commands.try_recv().ok()
    }

    /// Number of commands waiting.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if no command is waiting.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Tells producers that a frame has been drained.
    pub fn signal_drained(&self, frame: u64) {
        if self.drained.send(frame).is_err() {
            log::trace!("No producer left to receive the drained signal for frame {frame}.");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::desc::BindFlags;

    #[test]
    fn creation_helpers_reserve_distinct_slots() {
        let (tx, rx) = channel(None, Arc::new(SlotAllocator::new()));
        let a = tx
            .create_buffer(BufferDesc::new(16, BindFlags::VERTEX), None)
            .expect("queue open");
        let b = tx
            .create_sampler(SamplerDesc::default())
            .expect("queue open");
        assert_eq!(a, Handle::FIRST_USER);
        assert_eq!(b, Handle(Handle::FIRST_USER.0 + 1));
        assert_eq!(tx.pending(), 2);

        match rx.try_next() {
            Some(Command::CreateBuffer { slot, .. }) => assert_eq!(slot, a),
            other => panic!("unexpected command: {other:?}"),
        }
        match rx.try_next() {
            Some(Command::CreateSampler { slot, .. }) => assert_eq!(slot, b),
            other => panic!("unexpected command: {other:?}"),
        }
        assert!(rx.try_next().is_none());
    }

    #[test]
    fn submit_fails_once_consumer_is_gone() {
        let (tx, rx) = channel(Some(4), Arc::new(SlotAllocator::new()));
        drop(rx);
        assert!(matches!(tx.kick(), Err(DeviceError::Disconnected)));
    }

    #[test]
    fn wait_drained_times_out_without_consumer_activity() {
        let (tx, _rx) = channel(None, Arc::new(SlotAllocator::new()));
        assert!(matches!(
            tx.wait_drained(Duration::from_millis(10)),
            Err(DeviceError::Timeout)
        ));
    }

    #[test]
    fn drained_signal_reaches_producer() {
        let (tx, rx) = channel(None, Arc::new(SlotAllocator::new()));
        rx.signal_drained(7);
        assert_eq!(tx.wait_drained(Duration::from_millis(10)).ok(), Some(7));
    }

    #[test]
    fn commands_debug_print_their_entry_point() {
        assert_eq!(format!("{:?}", Command::DrawAuto), "Command(draw_auto)");
        assert_eq!(Command::PushMarker("x".into()).name(), "push_marker");
    }
}
