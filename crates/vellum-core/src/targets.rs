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

//! Render targets and the backbuffer.
//!
//! This module owns everything whose lifetime depends on the backbuffer size:
//! the list of backbuffer-relative targets, the deferred resize state, and the
//! framebuffer caches that reference target textures.

use crate::config::DeviceConfig;
use crate::desc::{BindFlags, TextureDesc, TextureFormat, TextureKind, Usage};
use crate::error::NativeError;
use crate::handle::Handle;
use crate::native::{Attachment, FramebufferDesc, FramebufferId, NativeDevice, TextureId};
use crate::table::ResourceTable;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Size of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetSize {
    /// A fixed size in texels.
    Absolute {
        /// Width.
        width: u32,
        /// Height.
        height: u32,
    },
    /// The backbuffer size divided by `divisor`, re-evaluated on every resize.
    BackbufferRelative {
        /// Divisor applied to both axes.
        divisor: u32,
    },
}

impl TargetSize {
    /// Resolves against the current backbuffer size. Never returns a zero axis.
    pub fn resolve(self, backbuffer: (u32, u32)) -> (u32, u32) {
        match self {
            TargetSize::Absolute { width, height } => (width.max(1), height.max(1)),
            TargetSize::BackbufferRelative { divisor } => {
                let divisor = divisor.max(1);
                ((backbuffer.0 / divisor).max(1), (backbuffer.1 / divisor).max(1))
            }
        }
    }

    /// Returns `true` for backbuffer-relative sizes.
    pub fn is_relative(self) -> bool {
        matches!(self, TargetSize::BackbufferRelative { .. })
    }
}

/// Mip level count of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MipCount {
    /// An explicit count, clamped to at least one.
    Fixed(u32),
    /// A full chain down to 1x1.
    #[default]
    Auto,
}

impl MipCount {
    /// Number of levels for a `width` x `height` target.
    pub fn resolve(self, width: u32, height: u32) -> u32 {
        match self {
            MipCount::Fixed(n) => n.max(1),
            MipCount::Auto => u32::BITS - width.max(height).max(1).leading_zeros(),
        }
    }
}

/// Creation parameters of a render target, kept for resize and lazy resolve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetParams {
    /// Optional debug label.
    pub label: Option<String>,
    /// Absolute or backbuffer-relative size.
    pub size: TargetSize,
    /// Pixel format.
    pub format: TextureFormat,
    /// Mip levels of the sampled texture.
    pub mip_count: MipCount,
    /// MSAA sample count; `1` for single-sampled targets.
    pub sample_count: u32,
    /// Array layers (six per cube).
    pub array_layers: u32,
    /// Dimensionality.
    pub kind: TextureKind,
}

impl TargetParams {
    /// A single-sampled, single-mip 2D target.
    pub fn new(size: TargetSize, format: TextureFormat) -> Self {
        Self {
            label: None,
            size,
            format,
            mip_count: MipCount::Fixed(1),
            sample_count: 1,
            array_layers: 1,
            kind: TextureKind::D2,
        }
    }

    fn bind_flags(&self) -> BindFlags {
        if self.format.is_depth() {
            BindFlags::DEPTH_STENCIL | BindFlags::SHADER_RESOURCE
        } else {
            BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE
        }
    }
}

/// A render target slot.
#[derive(Debug, Clone)]
pub struct RenderTargetRecord {
    /// Single-sampled texture. For MSAA targets this is the resolve texture,
    /// absent until the first resolve.
    pub texture: Option<TextureId>,
    /// Multisampled texture rendered into when `sample_count > 1`.
    pub msaa: Option<TextureId>,
    /// Owned creation parameters.
    pub params: TargetParams,
    /// Resolved size in texels.
    pub resolved_size: (u32, u32),
    /// Mip levels of the single-sampled texture.
    pub mip_count: u32,
    /// Contents changed since the last mip generation or resolve.
    pub invalidate: bool,
    /// Identity used by framebuffer cache keys; changes when textures are recreated.
    pub uid: Uuid,
    /// Whether the target is in the managed (resize) list.
    pub tracked: bool,
}

impl RenderTargetRecord {
    /// Returns `true` for multisampled targets.
    pub fn is_msaa(&self) -> bool {
        self.msaa.is_some()
    }

    /// Returns `true` for depth formats.
    pub fn is_depth(&self) -> bool {
        self.params.format.is_depth()
    }

    /// Texture rendered into.
    pub fn render_texture(&self) -> Option<TextureId> {
        self.msaa.or(self.texture)
    }

    /// Format of the single-sampled texture.
    pub fn sampled_format(&self) -> TextureFormat {
        if self.is_msaa() {
            self.params.format.resolve_format()
        } else {
            self.params.format
        }
    }
}

/// How an MSAA target is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResolveMode {
    /// Native multisample blit.
    Blit,
    /// Full-screen pass with caller shaders sampling the MSAA texture at unit 0.
    Custom {
        /// Vertex shader slot.
        vs: Handle,
        /// Pixel shader slot.
        ps: Handle,
    },
}

/// The targets requested through `set_targets`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetBinding {
    /// Colour targets in MRT order.
    pub colours: Vec<Handle>,
    /// Depth target, or [`Handle::NULL`].
    pub depth: Handle,
    /// Cube face or array layer of the colour targets.
    pub colour_face: u32,
    /// Cube face or array layer of the depth target.
    pub depth_face: u32,
}

impl Default for TargetBinding {
    fn default() -> Self {
        Self {
            colours: vec![Handle::BACKBUFFER_COLOUR],
            depth: Handle::BACKBUFFER_DEPTH,
            colour_face: 0,
            depth_face: 0,
        }
    }
}

impl TargetBinding {
    /// Returns `true` if this selects the default framebuffer.
    pub fn is_backbuffer(&self) -> bool {
        self.colours.first() == Some(&Handle::BACKBUFFER_COLOUR)
            || self.depth == Handle::BACKBUFFER_DEPTH
    }

    /// Every off-screen target handle in the binding.
    pub fn handles(&self) -> impl Iterator<Item = Handle> + '_ {
        self.colours
            .iter()
            .copied()
            .chain(std::iter::once(self.depth))
            .filter(|h| !h.is_null())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct AttachmentKey {
    handle: Handle,
    uid: Uuid,
}

/// Structural identity of a framebuffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    colours: Vec<AttachmentKey>,
    depth: Option<AttachmentKey>,
    colour_face: u32,
    depth_face: u32,
}

impl FramebufferKey {
    fn references(&self, uid: Uuid) -> bool {
        self.colours.iter().any(|a| a.uid == uid) || self.depth.is_some_and(|a| a.uid == uid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct ResolveKey {
    target: Handle,
    texture: TextureId,
    uid: Uuid,
}

#[derive(Debug, Default)]
struct ResizeState {
    pending: bool,
    quiet_frames: u32,
    pending_frames: u32,
    resize_index: u64,
}

/// Owns the backbuffer size, managed targets and framebuffer caches.
#[derive(Debug)]
pub struct TargetManager {
    backbuffer: (u32, u32),
    applied: (u32, u32),
    managed: Vec<Handle>,
    framebuffers: HashMap<FramebufferKey, FramebufferId>,
    resolve_pairs: HashMap<ResolveKey, (FramebufferId, FramebufferId)>,
    resize: ResizeState,
}

impl TargetManager {
    /// Creates a manager for a backbuffer of the given size.
    pub fn new(backbuffer: (u32, u32)) -> Self {
        Self {
            backbuffer,
            applied: backbuffer,
            managed: Vec::new(),
            framebuffers: HashMap::new(),
            resolve_pairs: HashMap::new(),
            resize: ResizeState::default(),
        }
    }

    /// Most recently requested backbuffer size.
    pub fn backbuffer_size(&self) -> (u32, u32) {
        self.backbuffer
    }

    /// Backbuffer size the surface and managed targets currently have.
    /// Lags [`Self::backbuffer_size`] while a resize is pending.
    pub fn applied_backbuffer_size(&self) -> (u32, u32) {
        self.applied
    }

    /// Number of resize requests that changed the backbuffer size.
    pub fn resize_index(&self) -> u64 {
        self.resize.resize_index
    }

    /// Returns `true` if a resize is waiting for a frame boundary.
    pub fn resize_pending(&self) -> bool {
        self.resize.pending
    }

    /// Targets recreated on resize.
    pub fn managed(&self) -> &[Handle] {
        &self.managed
    }

    /// Number of cached framebuffers, resolve pairs excluded.
    pub fn cached_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    fn allocate<N: NativeDevice + ?Sized>(
        native: &mut N,
        params: &TargetParams,
        size: (u32, u32),
    ) -> Result<(Option<TextureId>, Option<TextureId>, u32), NativeError> {
        let base = TextureDesc {
            label: params.label.clone(),
            width: size.0,
            height: size.1,
            depth_or_layers: params.array_layers.max(1),
            mip_count: 1,
            format: params.format,
            sample_count: 1,
            kind: params.kind,
            bind: params.bind_flags(),
            usage: Usage::Default,
        };

        if params.sample_count > 1 {
            let desc = TextureDesc {
                sample_count: params.sample_count,
                ..base
            };
            let msaa = native.create_texture(&desc, None)?;
            return Ok((None, Some(msaa), 1));
        }

        let mip_count = params.mip_count.resolve(size.0, size.1);
        let texture = native.create_texture(&TextureDesc { mip_count, ..base }, None)?;
        Ok((Some(texture), None, mip_count))
    }

    /// Creates the native textures of a new render target.
    ///
    /// Backbuffer-relative targets with `track` set join the managed list and
    /// are recreated on every applied resize.
    pub fn create<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        slot: Handle,
        params: TargetParams,
        track: bool,
    ) -> Result<RenderTargetRecord, NativeError> {
        let size = params.size.resolve(self.applied);
        let (texture, msaa, mip_count) = Self::allocate(native, &params, size)?;
        let tracked = track && params.size.is_relative();
        if tracked {
            self.managed.push(slot);
        }
        log::info!(
            "Device: Created render target {:?} ({}x{}, {:?}, {}x MSAA, {} mips)",
            slot,
            size.0,
            size.1,
            params.format,
            params.sample_count.max(1),
            mip_count
        );
        Ok(RenderTargetRecord {
            texture,
            msaa,
            params,
            resolved_size: size,
            mip_count,
            invalidate: mip_count > 1,
            uid: Uuid::new_v4(),
            tracked,
        })
    }

    fn destroy_textures<N: NativeDevice + ?Sized>(native: &mut N, record: &mut RenderTargetRecord) {
        if let Some(texture) = record.texture.take() {
            native.destroy_texture(texture);
        }
        if let Some(msaa) = record.msaa.take() {
            native.destroy_texture(msaa);
        }
    }

    fn forget_uid<N: NativeDevice + ?Sized>(&mut self, native: &mut N, uid: Uuid) {
        self.framebuffers.retain(|key, id| {
            let stale = key.references(uid);
            if stale {
                native.destroy_framebuffer(*id);
            }
            !stale
        });
        self.resolve_pairs.retain(|key, (src, dst)| {
            let stale = key.uid == uid;
            if stale {
                native.destroy_framebuffer(*src);
                native.destroy_framebuffer(*dst);
            }
            !stale
        });
    }

    /// Destroys a target's textures and every cached framebuffer using it.
    pub fn release<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        slot: Handle,
        mut record: RenderTargetRecord,
    ) {
        Self::destroy_textures(native, &mut record);
        self.forget_uid(native, record.uid);
        self.managed.retain(|&h| h != slot);
        log::debug!("Device: Released render target {:?}", slot);
    }

    /// Moves a managed target from `from` to `to` after a slot replacement.
    pub fn retarget(&mut self, from: Handle, to: Handle) {
        self.managed.retain(|&h| h != to);
        for slot in &mut self.managed {
            if *slot == from {
                *slot = to;
            }
        }
    }

    /// Records a new backbuffer size. Returns `false` if nothing changed.
    pub fn request_resize(&mut self, width: u32, height: u32) -> bool {
        if (width, height) == self.backbuffer {
            return false;
        }
        self.backbuffer = (width, height);
        self.resize.pending = true;
        self.resize.quiet_frames = 0;
        self.resize.resize_index += 1;
        log::debug!(
            "Device: Resize to {}x{} requested (index {})",
            width,
            height,
            self.resize.resize_index
        );
        true
    }

    /// Advances the resize debounce. Called once per present.
    pub fn on_present(&mut self) {
        if self.resize.pending {
            self.resize.quiet_frames = self.resize.quiet_frames.saturating_add(1);
            self.resize.pending_frames = self.resize.pending_frames.saturating_add(1);
        }
    }

    /// Returns `true` if a pending resize should be applied now.
    pub fn resize_due(&self, config: &DeviceConfig) -> bool {
        self.resize.pending
            && (self.resize.quiet_frames >= config.resize_debounce_frames
                || self.resize.pending_frames >= config.resize_max_pending_frames)
    }

    /// Drops every cached framebuffer.
    pub fn flush_framebuffers<N: NativeDevice + ?Sized>(&mut self, native: &mut N) {
        for (_, id) in self.framebuffers.drain() {
            native.destroy_framebuffer(id);
        }
        for (_, (src, dst)) in self.resolve_pairs.drain() {
            native.destroy_framebuffer(src);
            native.destroy_framebuffer(dst);
        }
    }

    /// Applies the pending resize: reconfigures the surface, flushes the
    /// framebuffer caches and recreates every managed target once.
    ///
    /// A target keeps its old textures until its replacements exist. On error
    /// the resize stays pending and the next frame retries it.
    pub fn apply_resize<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        table: &mut ResourceTable,
    ) -> Result<(), NativeError> {
        let (width, height) = self.backbuffer;
        native.resize_surface(width, height)?;
        self.flush_framebuffers(native);

        for &slot in &self.managed {
            let record = table.render_target_mut(slot);
            let size = record.params.size.resolve(self.backbuffer);
            let (texture, msaa, mip_count) = match Self::allocate(native, &record.params, size) {
                Ok(textures) => textures,
                Err(err) => {
                    log::error!(
                        "Device: Failed to recreate render target {:?} at {}x{}: {}",
                        slot,
                        size.0,
                        size.1,
                        err
                    );
                    return Err(err);
                }
            };
            Self::destroy_textures(native, record);
            record.texture = texture;
            record.msaa = msaa;
            record.resolved_size = size;
            record.mip_count = mip_count;
            record.invalidate = mip_count > 1;
            record.uid = Uuid::new_v4();
            log::debug!(
                "Device: Recreated render target {:?} at {}x{}",
                slot,
                size.0,
                size.1
            );
        }
        self.applied = self.backbuffer;
        self.resize.pending = false;
        self.resize.quiet_frames = 0;
        self.resize.pending_frames = 0;
        log::info!(
            "Device: Applied backbuffer resize to {}x{} ({} managed targets)",
            width,
            height,
            self.managed.len()
        );
        Ok(())
    }

    fn attachment(
        table: &ResourceTable,
        handle: Handle,
        face: u32,
    ) -> (AttachmentKey, Attachment, (u32, u32)) {
        let record = table.render_target(handle);
        let texture = record
            .render_texture()
            .unwrap_or_else(|| panic!("render target {handle} has no texture to attach"));
        let layers = record.params.array_layers.max(1);
        assert!(
            face < layers,
            "face {face} out of range for render target {handle} with {layers} layers"
        );
        (
            AttachmentKey {
                handle,
                uid: record.uid,
            },
            Attachment {
                texture,
                format: record.params.format,
                layer: face,
                mip: 0,
                samples: record.params.sample_count.max(1),
            },
            record.resolved_size,
        )
    }

    /// Looks up or creates the framebuffer for an off-screen binding.
    ///
    /// Panics if the attachments are not render targets or disagree in size.
    pub fn framebuffer<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        table: &ResourceTable,
        binding: &TargetBinding,
    ) -> Result<FramebufferId, NativeError> {
        let mut size = None;
        let mut check_size = |handle: Handle, s: (u32, u32)| match size {
            None => size = Some(s),
            Some(expected) => assert_eq!(
                expected, s,
                "incomplete framebuffer: render target {handle} is {}x{}, expected {}x{}",
                s.0, s.1, expected.0, expected.1
            ),
        };

        let mut key_colours = Vec::with_capacity(binding.colours.len());
        let mut colours = Vec::with_capacity(binding.colours.len());
        for &handle in binding.colours.iter().filter(|h| !h.is_null()) {
            let (key, attachment, s) = Self::attachment(table, handle, binding.colour_face);
            check_size(handle, s);
            key_colours.push(key);
            colours.push(attachment);
        }
        let depth = (!binding.depth.is_null())
            .then(|| Self::attachment(table, binding.depth, binding.depth_face));
        if let Some((_, _, s)) = depth {
            check_size(binding.depth, s);
        }
        let (width, height) =
            size.unwrap_or_else(|| panic!("incomplete framebuffer: no attachments bound"));

        let key = FramebufferKey {
            colours: key_colours,
            depth: depth.map(|(k, _, _)| k),
            colour_face: binding.colour_face,
            depth_face: binding.depth_face,
        };
        if let Some(&id) = self.framebuffers.get(&key) {
            return Ok(id);
        }

        let desc = FramebufferDesc {
            colours,
            depth: depth.map(|(_, a, _)| a),
            width,
            height,
        };
        let id = native.create_framebuffer(&desc)?;
        log::debug!(
            "Device: Framebuffer cache miss, created {:?} for {:?}",
            id,
            binding
        );
        self.framebuffers.insert(key, id);
        Ok(id)
    }

    /// Marks every off-screen target in `binding` as written.
    pub fn mark_written(table: &mut ResourceTable, binding: &TargetBinding) {
        for handle in binding.handles() {
            table.render_target_mut(handle).invalidate = true;
        }
    }

    /// Creates the resolve texture of an MSAA target if it does not exist yet.
    pub fn ensure_resolve_texture<N: NativeDevice + ?Sized>(
        native: &mut N,
        slot: Handle,
        record: &mut RenderTargetRecord,
    ) -> Result<TextureId, NativeError> {
        if let Some(texture) = record.texture {
            return Ok(texture);
        }
        let format = record.params.format.resolve_format();
        let desc = TextureDesc {
            label: record.params.label.clone(),
            width: record.resolved_size.0,
            height: record.resolved_size.1,
            depth_or_layers: record.params.array_layers.max(1),
            mip_count: 1,
            format,
            sample_count: 1,
            kind: record.params.kind,
            bind: BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
            usage: Usage::Default,
        };
        let texture = native.create_texture(&desc, None)?;
        log::debug!(
            "Device: Created resolve texture for render target {:?} ({:?})",
            slot,
            format
        );
        record.texture = Some(texture);
        Ok(texture)
    }

    /// Source (MSAA) and destination (resolve texture) framebuffers of a target.
    pub fn resolve_pair<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        table: &mut ResourceTable,
        slot: Handle,
    ) -> Result<(FramebufferId, FramebufferId), NativeError> {
        let record = table.render_target_mut(slot);
        let msaa = record
            .msaa
            .unwrap_or_else(|| panic!("render target {slot} is not multisampled"));
        let resolve = Self::ensure_resolve_texture(native, slot, record)?;
        let key = ResolveKey {
            target: slot,
            texture: resolve,
            uid: record.uid,
        };
        if let Some(&pair) = self.resolve_pairs.get(&key) {
            return Ok(pair);
        }

        let (width, height) = record.resolved_size;
        let attachment = |texture, format, samples| Attachment {
            texture,
            format,
            layer: 0,
            mip: 0,
            samples,
        };
        let src_attachment = attachment(msaa, record.params.format, record.params.sample_count);
        let src = if record.is_depth() {
            FramebufferDesc {
                colours: Vec::new(),
                depth: Some(src_attachment),
                width,
                height,
            }
        } else {
            FramebufferDesc {
                colours: vec![src_attachment],
                depth: None,
                width,
                height,
            }
        };
        let dst = FramebufferDesc {
            colours: vec![attachment(resolve, record.sampled_format(), 1)],
            depth: None,
            width,
            height,
        };
        let pair = (native.create_framebuffer(&src)?, native.create_framebuffer(&dst)?);
        self.resolve_pairs.insert(key, pair);
        Ok(pair)
    }

    /// Resolves a colour MSAA target with a native blit and clears `invalidate`.
    pub fn blit_resolve<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        table: &mut ResourceTable,
        slot: Handle,
    ) -> Result<(), NativeError> {
        let (src, dst) = self.resolve_pair(native, table, slot)?;
        let record = table.render_target_mut(slot);
        let (width, height) = record.resolved_size;
        native.blit_framebuffer(src, dst, width, height)?;
        record.invalidate = false;
        log::trace!("Device: Resolved render target {:?}", slot);
        Ok(())
    }

    /// Returns the texture to sample for a render target, regenerating mips
    /// or resolving colour MSAA first when its contents changed.
    ///
    /// Panics for a multisampled depth target that was never resolved, or was
    /// drawn to since its last resolve: depth needs an explicit custom resolve.
    pub fn prepare_for_sampling<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        table: &mut ResourceTable,
        slot: Handle,
    ) -> Result<TextureId, NativeError> {
        let record = table.render_target(slot);
        if record.is_msaa() {
            if record.is_depth() {
                let texture = record.texture.unwrap_or_else(|| {
                    panic!(
                        "multisampled depth target {slot} must be resolved with a custom resolve \
                         before sampling"
                    )
                });
                assert!(
                    !record.invalidate,
                    "multisampled depth target {slot} was drawn to after its last custom resolve; \
                     re-run the custom resolve before sampling"
                );
                return Ok(texture);
            }
            if record.invalidate || record.texture.is_none() {
                self.blit_resolve(native, table, slot)?;
            }
        } else if record.invalidate && record.mip_count > 1 {
            if let Some(texture) = record.texture {
                native.generate_mips(texture)?;
            }
            table.render_target_mut(slot).invalidate = false;
        }

        let record = table.render_target(slot);
        Ok(record
            .texture
            .unwrap_or_else(|| panic!("render target {slot} has no sampled texture")))
    }
}
