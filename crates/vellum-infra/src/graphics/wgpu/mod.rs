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

//! The `wgpu` implementation of [`vellum_core::NativeDevice`].
//!
//! `wgpu` records work in passes while the device layer issues immediate-mode
//! calls, so [`WgpuDevice`] tracks the bound state itself and turns every
//! draw into a pipeline lookup plus a command on the currently open pass.

mod context;
mod conversions;
mod device;
mod mips;
mod pass;
mod pipeline;
mod readback;
mod timer;

pub use context::{WgpuConfig, WgpuGraphicsContext};
pub use conversions::IntoWgpu;
pub use device::WgpuDevice;
