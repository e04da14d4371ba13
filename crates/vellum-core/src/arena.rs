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

//! Dynamic upload arena.
//!
//! Per-frame data (constants, immediate-mode vertices) is appended to a CPU
//! staging region, and the whole used prefix is uploaded with a single native
//! update at commit time. The arena doubles on overflow and never shrinks.

use crate::desc::{BindFlags, BufferDesc, Usage};
use crate::error::NativeError;
use crate::native::{BufferId, NativeDevice};

/// What an arena holds, which fixes its alignment and bind flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArenaKind {
    /// Constant-buffer data. Offsets are 256-byte aligned.
    Constant,
    /// Vertex data. Offsets are unaligned.
    Vertex,
}

impl ArenaKind {
    /// Alignment in bytes of every offset handed out.
    pub const fn alignment(self) -> u64 {
        match self {
            ArenaKind::Constant => 256,
            ArenaKind::Vertex => 1,
        }
    }

    fn bind_flags(self) -> BindFlags {
        match self {
            ArenaKind::Constant => BindFlags::CONSTANT,
            ArenaKind::Vertex => BindFlags::VERTEX,
        }
    }

    fn label(self) -> &'static str {
        match self {
            ArenaKind::Constant => "dynamic constants",
            ArenaKind::Vertex => "dynamic vertices",
        }
    }
}

/// Rounds `value` up to a multiple of `alignment` (a power of two).
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    (value + alignment - 1) & !(alignment - 1)
}

/// A growable staging region backed by one native buffer.
#[derive(Debug)]
pub struct UploadArena {
    kind: ArenaKind,
    buffer: BufferId,
    staging: Vec<u8>,
    cursor: u64,
    reallocations: u32,
}

impl UploadArena {
    /// Creates an arena of `reserve` bytes and its native buffer.
    pub fn new<N: NativeDevice + ?Sized>(
        native: &mut N,
        kind: ArenaKind,
        reserve: u64,
    ) -> Result<Self, NativeError> {
        let capacity = reserve.max(1);
        let staging = vec![0u8; capacity as usize];
        let buffer = native.create_buffer(&Self::desc(kind, capacity), None)?;
        log::debug!(
            "UploadArena: Created {} arena ({} bytes)",
            kind.label(),
            capacity
        );
        Ok(Self {
            kind,
            buffer,
            staging,
            cursor: 0,
            reallocations: 0,
        })
    }

    fn desc(kind: ArenaKind, size: u64) -> BufferDesc {
        BufferDesc {
            label: Some(kind.label().to_string()),
            size,
            bind: kind.bind_flags(),
            usage: Usage::Dynamic,
        }
    }

    /// Appends `data` and returns the offset it was written at.
    ///
    /// The cursor then advances to the next aligned offset. When that passes
    /// the capacity, the arena grows to twice the required size and the native
    /// buffer is recreated holding everything staged so far.
    pub fn write<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        data: &[u8],
    ) -> Result<u64, NativeError> {
        let offset = self.cursor;
        let end = align_up(offset + data.len() as u64, self.kind.alignment());
        if end > self.capacity() {
            self.grow(native, end * 2)?;
        }
        let start = offset as usize;
        self.staging[start..start + data.len()].copy_from_slice(data);
        self.cursor = end;
        Ok(offset)
    }

    /// Typed variant of [`UploadArena::write`].
    pub fn write_pod<N: NativeDevice + ?Sized, T: bytemuck::Pod>(
        &mut self,
        native: &mut N,
        values: &[T],
    ) -> Result<u64, NativeError> {
        self.write(native, bytemuck::cast_slice(values))
    }

    fn grow<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        capacity: u64,
    ) -> Result<(), NativeError> {
        let mut staging = vec![0u8; capacity as usize];
        let used = self.cursor as usize;
        staging[..used].copy_from_slice(&self.staging[..used]);

        let buffer = native.create_buffer(&Self::desc(self.kind, capacity), Some(&staging))?;
        native.destroy_buffer(self.buffer);

        log::debug!(
            "UploadArena: Grew {} arena {} -> {} bytes",
            self.kind.label(),
            self.staging.len(),
            capacity
        );
        self.staging = staging;
        self.buffer = buffer;
        self.reallocations += 1;
        Ok(())
    }

    /// Uploads `[0, cursor)` in one native update and rewinds the cursor.
    pub fn commit<N: NativeDevice + ?Sized>(&mut self, native: &mut N) -> Result<(), NativeError> {
        if self.cursor > 0 {
            native.update_buffer(self.buffer, 0, &self.staging[..self.cursor as usize])?;
        }
        self.cursor = 0;
        Ok(())
    }

    /// Destroys the native buffer.
    pub fn destroy<N: NativeDevice + ?Sized>(self, native: &mut N) {
        native.destroy_buffer(self.buffer);
    }

    /// Current native buffer. Changes after a reallocation.
    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    /// Description of the current native buffer.
    pub fn buffer_desc(&self) -> BufferDesc {
        Self::desc(self.kind, self.capacity())
    }

    /// What the arena holds.
    pub fn kind(&self) -> ArenaKind {
        self.kind
    }

    /// Capacity in bytes.
    pub fn capacity(&self) -> u64 {
        self.staging.len() as u64
    }

    /// Next write offset.
    pub fn cursor(&self) -> u64 {
        self.cursor
    }

    /// Number of times the arena has grown.
    pub fn reallocations(&self) -> u32 {
        self.reallocations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_power_of_two() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(13, 1), 13);
    }

    #[test]
    fn constant_offsets_are_256_aligned() {
        assert_eq!(ArenaKind::Constant.alignment(), 256);
        assert_eq!(ArenaKind::Vertex.alignment(), 1);
    }
}
