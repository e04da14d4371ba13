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

//! Nested GPU performance markers.
//!
//! Native timer queries cannot nest, so a marker stack is flattened into a
//! sequence of non-overlapping segments: pushing a child closes the parent's
//! open segment, and popping it opens a "pad" segment that continues the
//! parent. The elapsed time of a marker is reconstructed at aggregation by
//! summing its own segment and every segment nested under it.
//!
//! Results lag by at least one frame. Segments are recorded into one of two
//! buffers; at frame end the other buffer is aggregated once all of its
//! queries have completed, and only then are the buffers swapped.

use crate::error::NativeError;
use crate::native::{NativeDevice, TimerQueryId};

/// Frames of segments kept while the previous buffer's results are late.
/// Older frames are dropped along with their queries.
pub const MAX_BACKLOG_FRAMES: u64 = 8;

/// Aggregated timing of one marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerTiming {
    /// Marker name.
    pub name: String,
    /// Nesting depth, `0` for top-level markers.
    pub depth: u32,
    /// GPU time spent between push and pop, nested markers included.
    pub elapsed_ns: u64,
    /// Frame the marker was recorded in.
    pub frame: u64,
}

/// One flattened timing segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// Marker name, or `None` for a pad segment.
    pub name: Option<String>,
    /// Depth the segment was recorded at.
    pub depth: u32,
    /// Frame the segment was recorded in.
    pub frame: u64,
    /// Measured nanoseconds.
    pub elapsed_ns: u64,
}

/// Rebuilds per-marker timings from flattened segments.
///
/// A named segment at depth `d` accumulates itself and every following
/// segment until one of: a segment shallower than `d`, a pad at depth `d`
/// (its parent resuming), or another named segment at depth `<= d` (a
/// sibling).
pub fn aggregate(segments: &[Segment]) -> Vec<MarkerTiming> {
    let mut timings = Vec::new();
    for (i, head) in segments.iter().enumerate() {
        let Some(name) = &head.name else { continue };
        let mut elapsed = head.elapsed_ns;
        for next in &segments[i + 1..] {
            let ends = next.depth < head.depth
                || (next.depth == head.depth && next.name.is_none())
                || (next.depth <= head.depth && next.name.is_some());
            if ends {
                break;
            }
            elapsed += next.elapsed_ns;
        }
        timings.push(MarkerTiming {
            name: name.clone(),
            depth: head.depth,
            elapsed_ns: elapsed,
            frame: head.frame,
        });
    }
    timings
}

#[derive(Debug)]
struct PendingSegment {
    name: Option<String>,
    depth: u32,
    frame: u64,
    query: Option<TimerQueryId>,
}

/// Double-buffered marker recorder.
#[derive(Debug)]
pub struct PerfMarkers {
    enabled: bool,
    buffers: [Vec<PendingSegment>; 2],
    current: usize,
    depth: u32,
    open: Option<TimerQueryId>,
    free: Vec<TimerQueryId>,
    live_queries: u32,
    max_queries: u32,
    exhausted_logged: bool,
    last: Vec<MarkerTiming>,
}

impl PerfMarkers {
    /// Creates a recorder. A disabled recorder only tracks nesting depth.
    pub fn new(enabled: bool, max_queries: u32) -> Self {
        Self {
            enabled,
            buffers: [Vec::new(), Vec::new()],
            current: 0,
            depth: 0,
            open: None,
            free: Vec::new(),
            live_queries: 0,
            max_queries,
            exhausted_logged: false,
            last: Vec::new(),
        }
    }

    /// Returns `true` if native timer queries are issued.
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Current nesting depth.
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Timings published by the last successful aggregation.
    pub fn last_timings(&self) -> &[MarkerTiming] {
        &self.last
    }

    fn acquire<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
    ) -> Result<Option<TimerQueryId>, NativeError> {
        if let Some(query) = self.free.pop() {
            return Ok(Some(query));
        }
        if self.live_queries >= self.max_queries {
            if !self.exhausted_logged {
                log::warn!(
                    "PerfMarkers: All {} timer queries in flight, markers will read as zero",
                    self.max_queries
                );
                self.exhausted_logged = true;
            }
            return Ok(None);
        }
        let query = native.create_timer_query()?;
        self.live_queries += 1;
        Ok(Some(query))
    }

    fn open_segment<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        name: Option<String>,
        frame: u64,
    ) -> Result<(), NativeError> {
        let query = self.acquire(native)?;
        if let Some(query) = query {
            native.begin_timer(query);
        }
        self.open = query;
        self.buffers[self.current].push(PendingSegment {
            name,
            depth: self.depth,
            frame,
            query,
        });
        Ok(())
    }

    fn close_segment<N: NativeDevice + ?Sized>(&mut self, native: &mut N) {
        if let Some(query) = self.open.take() {
            native.end_timer(query);
        }
    }

    /// Opens a named marker nested under any open marker.
    pub fn push<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        name: &str,
        frame: u64,
    ) -> Result<(), NativeError> {
        if self.enabled {
            if self.depth > 0 {
                self.close_segment(native);
            }
            self.open_segment(native, Some(name.to_string()), frame)?;
        }
        self.depth += 1;
        Ok(())
    }

    /// Closes the innermost marker. Panics if none is open.
    pub fn pop<N: NativeDevice + ?Sized>(
        &mut self,
        native: &mut N,
        frame: u64,
    ) -> Result<(), NativeError> {
        assert!(self.depth > 0, "pop_marker called with no open marker");
        self.depth -= 1;
        if self.enabled {
            self.close_segment(native);
            if self.depth > 0 {
                self.open_segment(native, None, frame)?;
            }
        }
        Ok(())
    }

    /// Aggregates the previous buffer if all of its queries have completed,
    /// then swaps buffers. Panics if a marker is still open.
    ///
    /// Returns `true` if new timings were published.
    pub fn gather<N: NativeDevice + ?Sized>(&mut self, native: &mut N) -> bool {
        assert_eq!(
            self.depth, 0,
            "perf marker imbalance: {} marker(s) still open at frame end",
            self.depth
        );
        if !self.enabled {
            return false;
        }

        let other = 1 - self.current;
        let mut segments = Vec::with_capacity(self.buffers[other].len());
        for pending in &self.buffers[other] {
            let elapsed_ns = match pending.query {
                Some(query) => match native.timer_result(query) {
                    Some(ns) => ns,
                    None => break,
                },
                None => 0,
            };
            segments.push(Segment {
                name: pending.name.clone(),
                depth: pending.depth,
                frame: pending.frame,
                elapsed_ns,
            });
        }
        if segments.len() < self.buffers[other].len() {
            self.trim_backlog(native);
            return false;
        }

        let published = !segments.is_empty();
        if published {
            self.last = aggregate(&segments);
            for timing in &self.last {
                log::trace!(
                    "PerfMarkers: frame {} {:indent$}{} {:.3} ms",
                    timing.frame,
                    "",
                    timing.name,
                    timing.elapsed_ns as f64 / 1_000_000.0,
                    indent = timing.depth as usize * 2
                );
            }
        }

        let drained = std::mem::take(&mut self.buffers[other]);
        self.free.extend(drained.into_iter().filter_map(|s| s.query));
        self.current = other;
        published
    }

    /// Drops the oldest frame recorded into the current buffer once it holds
    /// [`MAX_BACKLOG_FRAMES`] frames.
    fn trim_backlog<N: NativeDevice + ?Sized>(&mut self, native: &mut N) {
        let backlog = &mut self.buffers[self.current];
        let (Some(first), Some(last)) = (backlog.first(), backlog.last()) else {
            return;
        };
        let oldest = first.frame;
        if last.frame - oldest + 1 < MAX_BACKLOG_FRAMES {
            return;
        }
        let end = backlog.partition_point(|s| s.frame == oldest);
        for segment in backlog.drain(..end) {
            if let Some(query) = segment.query {
                native.destroy_timer_query(query);
                self.live_queries -= 1;
            }
        }
        log::debug!(
            "PerfMarkers: Timer results late, dropped frame {} from the backlog",
            oldest
        );
    }

    /// Destroys every native query owned by the recorder.
    pub fn destroy<N: NativeDevice + ?Sized>(&mut self, native: &mut N) {
        let queries = self
            .free
            .drain(..)
            .chain(self.buffers.iter_mut().flat_map(|b| b.drain(..).filter_map(|s| s.query)));
        for query in queries {
            native.destroy_timer_query(query);
        }
        self.live_queries = 0;
        self.open = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str, depth: u32, elapsed_ns: u64) -> Segment {
        Segment {
            name: Some(name.to_string()),
            depth,
            frame: 0,
            elapsed_ns,
        }
    }

    fn pad(depth: u32, elapsed_ns: u64) -> Segment {
        Segment {
            name: None,
            depth,
            frame: 0,
            elapsed_ns,
        }
    }

    fn elapsed(timings: &[MarkerTiming], name: &str) -> u64 {
        timings
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.elapsed_ns)
            .unwrap_or_else(|| panic!("no timing for {name}"))
    }

    #[test]
    fn outer_marker_sums_children_and_exclusive_time() {
        // outer { inner_a {} inner_b {} } flattened with pads.
        let segments = vec![
            named("outer", 0, 5),
            named("inner_a", 1, 10),
            pad(1, 2),
            named("inner_b", 1, 20),
            pad(1, 3),
        ];
        let timings = aggregate(&segments);
        assert_eq!(elapsed(&timings, "inner_a"), 10);
        assert_eq!(elapsed(&timings, "inner_b"), 20);
        assert_eq!(elapsed(&timings, "outer"), 5 + 10 + 2 + 20 + 3);
    }

    #[test]
    fn top_level_siblings_do_not_absorb_each_other() {
        let segments = vec![named("shadows", 0, 7), named("lighting", 0, 11)];
        let timings = aggregate(&segments);
        assert_eq!(elapsed(&timings, "shadows"), 7);
        assert_eq!(elapsed(&timings, "lighting"), 11);
    }

    #[test]
    fn deep_nesting_stops_at_parent_pad() {
        let segments = vec![
            named("a", 0, 1),
            named("b", 1, 2),
            named("c", 2, 4),
            pad(2, 8),
            pad(1, 16),
        ];
        let timings = aggregate(&segments);
        assert_eq!(elapsed(&timings, "c"), 4);
        assert_eq!(elapsed(&timings, "b"), 2 + 4 + 8);
        assert_eq!(elapsed(&timings, "a"), 31);
        assert_eq!(timings.iter().map(|t| t.depth).collect::<Vec<_>>(), [0, 1, 2]);
    }
}
