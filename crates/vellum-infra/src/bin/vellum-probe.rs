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

//! Creates a headless device, prints what the adapter offers and checks that
//! a cleared backbuffer reads back with the expected colour.

use anyhow::{bail, Context};
use vellum_core::desc::{ClearFlags, ClearState};
use vellum_core::{Device, DeviceConfig, Handle, ReadBackParams};
use vellum_infra::graphics::wgpu::{WgpuConfig, WgpuDevice};

const PROBE_SIZE: (u32, u32) = (64, 64);
const CLEAR_STATE: Handle = Handle::FIRST_USER;

fn main() -> anyhow::Result<()> {
    vellum_infra::logging::init("info");

    let config = WgpuConfig {
        headless_format: wgpu::TextureFormat::Rgba8Unorm,
        ..Default::default()
    };
    let native = WgpuDevice::headless(PROBE_SIZE.0, PROBE_SIZE.1, &config)
        .context("no usable graphics adapter")?;
    let adapter = native.context().adapter_info.clone();
    let mut device = Device::new(native, DeviceConfig::default())?;

    let caps = device.caps().clone();
    println!("Adapter:   {} ({:?}, {:?})", adapter.name, adapter.backend, adapter.device_type);
    println!("Renderer:  {} / {}", caps.info.api_version, caps.info.shader_version);
    println!("Vendor:    {}", caps.info.vendor);
    println!("Caps:      {:?}", caps.flags);
    println!("Max size:  {}", caps.max_texture_size);
    println!("Max MSAA:  {}x", caps.max_samples);
    println!("Surface:   {:?}", device.backbuffer_size());

    device.create_clear_state(
        CLEAR_STATE,
        ClearState {
            rgba: [1.0, 0.0, 0.0, 1.0],
            flags: ClearFlags::COLOUR,
            ..Default::default()
        },
    );
    device.new_frame()?;
    device.clear(CLEAR_STATE, 0, 0)?;

    let mut first_texel = [0u8; 4];
    device.read_back_resource(ReadBackParams::backbuffer(), |data| {
        if let Some(texel) = data.data.get(..4) {
            first_texel.copy_from_slice(texel);
        }
    })?;
    device.present()?;
    device.sync()?;

    println!("Read-back: {first_texel:?}");
    if first_texel != [255, 0, 0, 255] {
        bail!("cleared backbuffer read back as {first_texel:?}");
    }
    println!("OK");
    Ok(())
}
