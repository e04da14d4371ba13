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

//! Opaque resource handles and the producer-side slot allocator.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;

/// An opaque reference to a slot of the resource table.
///
/// Handles are plain integers chosen by the caller. Slot `0` is permanently
/// reserved as the null binding, and a handful of low slots name resources the
/// device owns itself (the default target and the upload arenas).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Handle(pub u32);

impl Handle {
    /// The null handle. Binding it means "nothing bound".
    pub const NULL: Handle = Handle(0);
    /// The colour surface of the default presentable target.
    pub const BACKBUFFER_COLOUR: Handle = Handle(1);
    /// The depth surface of the default presentable target.
    pub const BACKBUFFER_DEPTH: Handle = Handle(2);
    /// The constant-buffer upload arena.
    pub const DYNAMIC_CONSTANTS: Handle = Handle(3);
    /// The vertex upload arena.
    pub const DYNAMIC_VERTICES: Handle = Handle(4);
    /// The first slot available to client resources.
    pub const FIRST_USER: Handle = Handle(5);

    /// Returns `true` for [`Handle::NULL`].
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the slot index of this handle.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns `true` for the two handles naming the default target.
    pub const fn is_backbuffer(self) -> bool {
        self.0 == Self::BACKBUFFER_COLOUR.0 || self.0 == Self::BACKBUFFER_DEPTH.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Default)]
struct SlotState {
    next: u32,
    free: Vec<u32>,
    pending: Vec<u32>,
}

/// Hands out resource slots to producer threads.
///
/// A slot is reserved synchronously so the producer knows the handle before the
/// consumer has executed the creation command. Freed slots are parked until the
/// consumer reports that the frame which released them has been drained, so a
/// handle is never reused while an enqueued command may still reference it.
#[derive(Debug)]
pub struct SlotAllocator {
    state: Mutex<SlotState>,
}

impl SlotAllocator {
    /// Creates an allocator whose first handle is [`Handle::FIRST_USER`].
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState {
                next: Handle::FIRST_USER.0,
                ..SlotState::default()
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SlotState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reserves a slot, reusing a recycled one when available.
    pub fn reserve(&self) -> Handle {
        let mut state = self.lock();
        match state.free.pop() {
            Some(slot) => Handle(slot),
            None => {
                let slot = state.next;
                state.next += 1;
                Handle(slot)
            }
        }
    }

    /// Parks a released slot until the next [`SlotAllocator::recycle`].
    ///
    /// Slots this allocator never handed out are ignored, so callers mixing
    /// their own numbering with reserved handles do not get their slots stolen.
    pub fn free(&self, handle: Handle) {
        let mut state = self.lock();
        if handle < Handle::FIRST_USER || handle.0 >= state.next {
            return;
        }
        if !state.pending.contains(&handle.0) && !state.free.contains(&handle.0) {
            state.pending.push(handle.0);
        }
    }

    /// Makes every parked slot reusable. Called once the consumer has drained
    /// the frame in which the slots were released.
    pub fn recycle(&self) {
        let mut state = self.lock();
        let pending = std::mem::take(&mut state.pending);
        state.free.extend(pending);
    }

    /// One past the highest slot ever handed out. Recycling does not lower it.
    pub fn high_water_mark(&self) -> u32 {
        self.lock().next
    }
}

impl Default for SlotAllocator {
    fn default() -> Self {
        Self::new()
    }
}
