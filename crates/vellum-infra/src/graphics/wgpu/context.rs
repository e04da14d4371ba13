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

use anyhow::{anyhow, Result};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use vellum_core::NativeError;

/// Depth-stencil format of the default framebuffer.
pub const BACKBUFFER_DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Optional device features enabled whenever the adapter offers them.
const OPTIONAL_FEATURES: wgpu::Features = wgpu::Features::TIMESTAMP_QUERY
    .union(wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS)
    .union(wgpu::Features::TEXTURE_COMPRESSION_BC)
    .union(wgpu::Features::DEPTH_CLIP_CONTROL)
    .union(wgpu::Features::POLYGON_MODE_LINE)
    .union(wgpu::Features::ADDRESS_MODE_CLAMP_TO_BORDER);

/// Adapter and presentation settings for a [`WgpuGraphicsContext`].
#[derive(Debug, Clone)]
pub struct WgpuConfig {
    /// Backends the instance may pick from.
    pub backends: wgpu::Backends,
    /// Adapter preference.
    pub power_preference: wgpu::PowerPreference,
    /// Present mode. `None` picks Mailbox when available, otherwise Fifo.
    pub present_mode: Option<wgpu::PresentMode>,
    /// Colour format of the owned backbuffer when running without a window.
    pub headless_format: wgpu::TextureFormat,
}

impl Default for WgpuConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            present_mode: None,
            headless_format: wgpu::TextureFormat::Rgba8UnormSrgb,
        }
    }
}

/// Where the default colour target lives.
#[derive(Debug)]
enum PresentTarget {
    Surface {
        surface: wgpu::Surface<'static>,
        config: wgpu::SurfaceConfiguration,
    },
    Headless {
        texture: wgpu::Texture,
        format: wgpu::TextureFormat,
    },
}

/// The surface texture acquired for the current frame.
#[derive(Debug)]
struct AcquiredFrame {
    surface_texture: Option<wgpu::SurfaceTexture>,
    view: wgpu::TextureView,
}

/// Holds the core wgpu state objects required for rendering.
///
/// The context owns the default framebuffer: a window surface (or an owned
/// texture when headless) plus a matching depth-stencil texture, both
/// recreated on [`WgpuGraphicsContext::resize`].
#[derive(Debug)]
pub struct WgpuGraphicsContext {
    pub adapter: wgpu::Adapter,
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,

    target: PresentTarget,
    width: u32,
    height: u32,
    depth_view: wgpu::TextureView,
    frame: Option<AcquiredFrame>,

    // Store info for easy access
    pub adapter_info: wgpu::AdapterInfo,
    pub active_device_features: wgpu::Features,
    pub device_limits: wgpu::Limits,
}

impl WgpuGraphicsContext {
    /// Initializes the context for a window surface.
    ///
    /// ## Arguments
    /// * `window` - Any object that can provide raw window and display handles.
    /// * `width`, `height` - The initial physical size of the surface.
    /// * `config` - Adapter and presentation settings.
    ///
    /// ## Returns
    /// * `Result<Self>` - The initialized context or an error.
    pub async fn new<W>(window: W, width: u32, height: u32, config: &WgpuConfig) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle + Send + Sync + 'static,
    {
        log::info!("Initializing wgpu graphics context for a window surface...");
        let instance = Self::create_instance(config);
        let surface = instance
            .create_surface(window)
            .map_err(|e| anyhow!("Failed to create surface: {}", e))?;
        log::debug!("wgpu surface created for the window.");

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| anyhow!("Failed to find a suitable adapter: {}", e))?;
        let (device, queue) = Self::request_device(&adapter).await?;

        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .copied()
            .find(|f| f.is_srgb())
            .or_else(|| surface_caps.formats.first().copied())
            .ok_or_else(|| anyhow!("Surface reports no supported formats"))?;
        let present_mode = config.present_mode.unwrap_or_else(|| {
            if surface_caps
                .present_modes
                .contains(&wgpu::PresentMode::Mailbox)
            {
                wgpu::PresentMode::Mailbox
            } else {
                wgpu::PresentMode::Fifo
            }
        });
        // COPY_SRC lets the backbuffer be read back where the platform allows it.
        let mut usage = wgpu::TextureUsages::RENDER_ATTACHMENT;
        if surface_caps.usages.contains(wgpu::TextureUsages::COPY_SRC) {
            usage |= wgpu::TextureUsages::COPY_SRC;
        }
        let surface_config = wgpu::SurfaceConfiguration {
            usage,
            format: surface_format,
            width: width.max(1),
            height: height.max(1),
            present_mode,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);
        log::info!(
            "Surface configured: {:?} {}x{} ({:?})",
            surface_format,
            surface_config.width,
            surface_config.height,
            present_mode
        );

        Ok(Self::assemble(
            adapter,
            device,
            queue,
            PresentTarget::Surface {
                surface,
                config: surface_config,
            },
            width.max(1),
            height.max(1),
        ))
    }

    /// Initializes a context without a window. The backbuffer is an owned
    /// texture of `config.headless_format`, which makes the full device usable
    /// in tests and offline tools.
    pub async fn new_headless(width: u32, height: u32, config: &WgpuConfig) -> Result<Self> {
        log::info!("Initializing headless wgpu graphics context...");
        let instance = Self::create_instance(config);
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: config.power_preference,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| anyhow!("Failed to find a suitable adapter: {}", e))?;
        let (device, queue) = Self::request_device(&adapter).await?;

        let (width, height) = (width.max(1), height.max(1));
        let texture = Self::create_headless_texture(&device, config.headless_format, width, height);
        Ok(Self::assemble(
            adapter,
            device,
            queue,
            PresentTarget::Headless {
                texture,
                format: config.headless_format,
            },
            width,
            height,
        ))
    }

    fn create_instance(config: &WgpuConfig) -> wgpu::Instance {
        wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: config.backends,
            ..wgpu::InstanceDescriptor::default()
        })
    }

    async fn request_device(adapter: &wgpu::Adapter) -> Result<(wgpu::Device, wgpu::Queue)> {
        let adapter_info = adapter.get_info();
        log::info!(
            "Using graphics adapter: \"{}\" (Backend: {:?})",
            adapter_info.name,
            adapter_info.backend
        );

        let features_to_enable = adapter.features() & OPTIONAL_FEATURES;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("Vellum Logical Device"),
                required_features: features_to_enable,
                required_limits: adapter.limits(),
                ..Default::default()
            })
            .await
            .map_err(|e| anyhow!("Failed to create logical device: {}", e))?;
        log::info!("Logical device and command queue created.");

        device.on_uncaptured_error(std::sync::Arc::new(|e| {
            log::error!("wgpu uncaptured error: {e:?}");
        }));
        Ok((device, queue))
    }

    fn assemble(
        adapter: wgpu::Adapter,
        device: wgpu::Device,
        queue: wgpu::Queue,
        target: PresentTarget,
        width: u32,
        height: u32,
    ) -> Self {
        let depth_view = Self::create_depth_texture(&device, width, height)
            .create_view(&wgpu::TextureViewDescriptor::default());
        let active_device_features = device.features();
        let device_limits = device.limits();
        log::info!("Active device features: {active_device_features:?}");
        log::debug!("Device limits: {device_limits:?}");
        Self {
            adapter_info: adapter.get_info(),
            adapter,
            device,
            queue,
            target,
            width,
            height,
            depth_view,
            frame: None,
            active_device_features,
            device_limits,
        }
    }

    fn create_headless_texture(
        device: &wgpu::Device,
        format: wgpu::TextureFormat,
        width: u32,
        height: u32,
    ) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Vellum Headless Backbuffer"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    fn create_depth_texture(device: &wgpu::Device, width: u32, height: u32) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Vellum Backbuffer Depth"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: BACKBUFFER_DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
    }

    /// Size of the default framebuffer.
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Colour format of the default framebuffer.
    pub fn colour_format(&self) -> wgpu::TextureFormat {
        match &self.target {
            PresentTarget::Surface { config, .. } => config.format,
            PresentTarget::Headless { format, .. } => *format,
        }
    }

    /// Whether presentation goes to a window surface.
    pub fn has_surface(&self) -> bool {
        matches!(self.target, PresentTarget::Surface { .. })
    }

    /// Resizes the default framebuffer. Zero dimensions are ignored.
    pub fn resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            log::warn!("WgpuGraphicsContext: Ignoring resize to zero dimensions: {width}x{height}");
            return;
        }
        log::info!("WgpuGraphicsContext: Resizing backbuffer to {width}x{height}");
        // A frame acquired at the old size cannot be presented any more.
        self.frame = None;
        self.width = width;
        self.height = height;
        match &mut self.target {
            PresentTarget::Surface { surface, config } => {
                config.width = width;
                config.height = height;
                surface.configure(&self.device, config);
            }
            PresentTarget::Headless { texture, format } => {
                *texture = Self::create_headless_texture(&self.device, *format, width, height);
            }
        }
        self.depth_view = Self::create_depth_texture(&self.device, width, height)
            .create_view(&wgpu::TextureViewDescriptor::default());
    }

    /// Returns the colour view of the current frame, acquiring a surface
    /// texture on first use. A lost or outdated surface is reconfigured once.
    pub fn frame_view(&mut self) -> Result<&wgpu::TextureView, NativeError> {
        if self.frame.is_none() {
            self.frame = Some(self.acquire()?);
        }
        self.frame
            .as_ref()
            .map(|frame| &frame.view)
            .ok_or_else(|| NativeError::Backend("no frame acquired".to_owned()))
    }

    fn acquire(&self) -> Result<AcquiredFrame, NativeError> {
        match &self.target {
            PresentTarget::Headless { texture, .. } => Ok(AcquiredFrame {
                surface_texture: None,
                view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            }),
            PresentTarget::Surface { surface, config } => {
                let surface_texture = match surface.get_current_texture() {
                    Ok(texture) => texture,
                    Err(wgpu::SurfaceError::Lost) | Err(wgpu::SurfaceError::Outdated) => {
                        log::warn!("WgpuGraphicsContext: Surface lost or outdated, reconfiguring.");
                        surface.configure(&self.device, config);
                        surface
                            .get_current_texture()
                            .map_err(|e| NativeError::Backend(format!("surface acquire: {e}")))?
                    }
                    Err(wgpu::SurfaceError::OutOfMemory) => return Err(NativeError::OutOfMemory),
                    Err(e) => return Err(NativeError::Backend(format!("surface acquire: {e}"))),
                };
                let view = surface_texture
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                Ok(AcquiredFrame {
                    surface_texture: Some(surface_texture),
                    view,
                })
            }
        }
    }

    /// The colour texture of the current frame, acquiring it when needed.
    pub fn frame_texture(&mut self) -> Result<&wgpu::Texture, NativeError> {
        if self.frame.is_none() {
            self.frame = Some(self.acquire()?);
        }
        match (&self.target, &self.frame) {
            (PresentTarget::Headless { texture, .. }, _) => Ok(texture),
            (
                PresentTarget::Surface { .. },
                Some(AcquiredFrame {
                    surface_texture: Some(st),
                    ..
                }),
            ) => Ok(&st.texture),
            _ => Err(NativeError::Backend("no frame acquired".to_owned())),
        }
    }

    /// Depth-stencil view of the default framebuffer.
    pub fn depth_view(&self) -> &wgpu::TextureView {
        &self.depth_view
    }

    /// Presents the current frame, if one was acquired.
    pub fn present(&mut self) {
        if let Some(frame) = self.frame.take() {
            if let Some(surface_texture) = frame.surface_texture {
                surface_texture.present();
            }
        }
    }
}
