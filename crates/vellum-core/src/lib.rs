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

//! # Vellum Core
//!
//! A backend-agnostic graphics device layer. Client code creates resources in
//! caller-chosen slots of a [`ResourceTable`](table::ResourceTable), records
//! the pipeline state it wants, and issues draws; the [`Device`] reconciles
//! that requested state against what is already bound and forwards only the
//! difference to a [`NativeDevice`](native::NativeDevice) backend.
//!
//! Producer threads talk to the device through the FIFO command queue in
//! [`command`]; the thread owning the device drains it once per frame.

#![warn(missing_docs)]

pub mod flags;

pub mod arena;
pub mod binder;
pub mod caps;
pub mod command;
pub mod config;
pub mod desc;
pub mod device;
pub mod error;
pub mod handle;
pub mod markers;
pub mod native;
pub mod readback;
pub mod table;
pub mod targets;

pub use arena::ArenaKind;
pub use caps::{Caps, CapsFlags};
pub use command::{Command, CommandReceiver, CommandSender};
pub use config::DeviceConfig;
pub use device::Device;
pub use error::{DeviceError, NativeError, ResourceError, ShaderError};
pub use handle::Handle;
pub use native::NativeDevice;
pub use readback::{ReadBackData, ReadBackParams};
pub use targets::{ResolveMode, TargetBinding, TargetParams, TargetSize};
