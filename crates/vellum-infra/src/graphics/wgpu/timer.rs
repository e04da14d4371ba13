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

use std::sync::{
    atomic::{AtomicU8, Ordering},
    Arc,
};
use vellum_core::native::TimerQueryId;
use vellum_core::NativeError;

/// Number of elapsed-time queries that may exist at once.
const MAX_TIMERS: u32 = 256;
/// Two `u64` timestamps per query.
const PAIR_SIZE: u64 = 16;

const MAP_PENDING: u8 = 0;
const MAP_OK: u8 = 1;
const MAP_FAILED: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerState {
    Idle,
    Recording,
    /// Resolved and copied to staging in the current encoder.
    Copied,
    Mapping,
    Done(u64),
}

#[derive(Debug)]
struct TimerSlot {
    staging: wgpu::Buffer,
    map_state: Arc<AtomicU8>,
    state: TimerState,
}

/// Elapsed-time queries built from pairs of encoder timestamps.
///
/// Frame-lag model: a query ended in frame N is resolved and copied to its
/// own staging buffer in the same submission, mapped right after submit, and
/// becomes readable once the map callback fires, usually one or two frames
/// later. Until then [`WgpuTimerQueries::result`] returns `None`.
#[derive(Debug)]
pub(crate) struct WgpuTimerQueries {
    query_set: wgpu::QuerySet,
    resolve_buffer: wgpu::Buffer,
    slots: Vec<Option<TimerSlot>>,
    free: Vec<usize>,
    to_map: Vec<usize>,
    period_ns: f32,
}

impl WgpuTimerQueries {
    /// Checks if the features needed for in-encoder timestamps are available.
    pub fn feature_available(features: wgpu::Features) -> bool {
        features.contains(
            wgpu::Features::TIMESTAMP_QUERY | wgpu::Features::TIMESTAMP_QUERY_INSIDE_ENCODERS,
        )
    }

    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let query_set = device.create_query_set(&wgpu::QuerySetDescriptor {
            label: Some("Vellum Timer QuerySet"),
            ty: wgpu::QueryType::Timestamp,
            count: MAX_TIMERS * 2,
        });
        let resolve_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Vellum Timer Resolve Buffer"),
            size: u64::from(MAX_TIMERS) * PAIR_SIZE,
            usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        });
        let period_ns = queue.get_timestamp_period();
        log::info!("GPU timer queries enabled, period {period_ns:.3} ns.");
        Self {
            query_set,
            resolve_buffer,
            slots: Vec::new(),
            free: Vec::new(),
            to_map: Vec::new(),
            period_ns,
        }
    }

    fn create_staging(device: &wgpu::Device) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Vellum Timer Staging Buffer"),
            size: PAIR_SIZE,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    pub fn create(&mut self, device: &wgpu::Device) -> Result<TimerQueryId, NativeError> {
        let slot = TimerSlot {
            staging: Self::create_staging(device),
            map_state: Arc::new(AtomicU8::new(MAP_PENDING)),
            state: TimerState::Idle,
        };
        let index = match self.free.pop() {
            Some(index) => {
                self.slots[index] = Some(slot);
                index
            }
            None if self.slots.len() < MAX_TIMERS as usize => {
                self.slots.push(Some(slot));
                self.slots.len() - 1
            }
            None => {
                return Err(NativeError::Unsupported(format!(
                    "more than {MAX_TIMERS} live timer queries"
                )))
            }
        };
        Ok(TimerQueryId(index))
    }

    pub fn destroy(&mut self, id: TimerQueryId) {
        if let Some(slot) = self.slots.get_mut(id.0).and_then(Option::take) {
            if slot.state == TimerState::Mapping {
                slot.staging.unmap();
            }
            self.free.push(id.0);
            self.to_map.retain(|&i| i != id.0);
        }
    }

    pub fn begin(
        &mut self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        id: TimerQueryId,
    ) {
        let Some(slot) = self.slots.get_mut(id.0).and_then(Option::as_mut) else {
            log::warn!("WgpuTimerQueries: begin on unknown query {id:?}");
            return;
        };
        if slot.state == TimerState::Mapping {
            // Its previous result was never read; a fresh buffer avoids
            // copying into a buffer that is still mapped.
            slot.staging = Self::create_staging(device);
        }
        slot.state = TimerState::Recording;
        encoder.write_timestamp(&self.query_set, id.0 as u32 * 2);
    }

    pub fn end(&mut self, encoder: &mut wgpu::CommandEncoder, id: TimerQueryId) {
        let Some(slot) = self.slots.get_mut(id.0).and_then(Option::as_mut) else {
            log::warn!("WgpuTimerQueries: end on unknown query {id:?}");
            return;
        };
        if slot.state != TimerState::Recording {
            log::warn!("WgpuTimerQueries: end without begin on {id:?}");
            return;
        }
        let first = id.0 as u32 * 2;
        let offset = id.0 as u64 * PAIR_SIZE;
        encoder.write_timestamp(&self.query_set, first + 1);
        encoder.resolve_query_set(&self.query_set, first..first + 2, &self.resolve_buffer, offset);
        encoder.copy_buffer_to_buffer(&self.resolve_buffer, offset, &slot.staging, 0, PAIR_SIZE);
        slot.state = TimerState::Copied;
        self.to_map.push(id.0);
    }

    /// Starts mapping every staging buffer copied in the submission that
    /// just went out.
    pub fn after_submit(&mut self) {
        for index in self.to_map.drain(..) {
            let Some(slot) = self.slots.get_mut(index).and_then(Option::as_mut) else {
                continue;
            };
            if slot.state != TimerState::Copied {
                continue;
            }
            let flag = Arc::new(AtomicU8::new(MAP_PENDING));
            slot.map_state = Arc::clone(&flag);
            slot.staging
                .slice(..)
                .map_async(wgpu::MapMode::Read, move |res| match res {
                    Ok(()) => flag.store(MAP_OK, Ordering::SeqCst),
                    Err(e) => {
                        log::error!("GPU timer staging map_async failed: {e:?}");
                        flag.store(MAP_FAILED, Ordering::SeqCst);
                    }
                });
            slot.state = TimerState::Mapping;
        }
    }

    /// Elapsed nanoseconds of the last completed span of `id`.
    pub fn result(&mut self, device: &wgpu::Device, id: TimerQueryId) -> Option<u64> {
        let period_ns = self.period_ns;
        let slot = self.slots.get_mut(id.0).and_then(Option::as_mut)?;
        match slot.state {
            TimerState::Done(ns) => Some(ns),
            TimerState::Mapping => {
                if slot.map_state.load(Ordering::SeqCst) == MAP_PENDING {
                    if let Err(e) = device.poll(wgpu::PollType::Poll) {
                        log::warn!("Failed to poll device for timer results: {e:?}");
                    }
                }
                match slot.map_state.load(Ordering::SeqCst) {
                    MAP_OK => {
                        let data = slot.staging.slice(..).get_mapped_range();
                        let [start, end]: [u64; 2] = bytemuck::pod_read_unaligned(&data[..16]);
                        drop(data);
                        slot.staging.unmap();
                        let ns = (end.saturating_sub(start) as f64 * f64::from(period_ns)) as u64;
                        slot.state = TimerState::Done(ns);
                        Some(ns)
                    }
                    MAP_FAILED => {
                        slot.state = TimerState::Done(0);
                        Some(0)
                    }
                    _ => None,
                }
            }
            TimerState::Idle | TimerState::Recording | TimerState::Copied => None,
        }
    }
}
