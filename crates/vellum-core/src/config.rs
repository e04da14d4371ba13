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

//! Device-wide settings.

use serde::{Deserialize, Serialize};

/// Settings that tune the device context. Missing fields take their defaults
/// when deserialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Presents without a new resize event required before a pending resize is
    /// applied at the next frame boundary. `0` applies it at the very next one.
    pub resize_debounce_frames: u32,
    /// A fallback number of presents after which a pending resize is forced,
    /// even if resize events are still incoming.
    pub resize_max_pending_frames: u32,
    /// A runtime toggle for GPU perf-marker timing.
    pub enable_gpu_timers: bool,
    /// Initial capacity in bytes of the constant upload arena.
    pub constant_arena_reserve: u64,
    /// Initial capacity in bytes of the vertex upload arena.
    pub vertex_arena_reserve: u64,
    /// Upper bound on live native timer queries used by perf markers.
    pub max_timer_queries: u32,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            resize_debounce_frames: 0,
            resize_max_pending_frames: 10,
            enable_gpu_timers: true,
            constant_arena_reserve: 32,
            vertex_arena_reserve: 32,
            max_timer_queries: 256,
        }
    }
}

impl DeviceConfig {
    /// Parses a JSON document, defaulting any absent field.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = DeviceConfig::from_json_str(r#"{ "resize_debounce_frames": 5 }"#)
            .expect("valid config");
        assert_eq!(config.resize_debounce_frames, 5);
        assert_eq!(config.max_timer_queries, 256);
        assert!(config.enable_gpu_timers);
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert!(DeviceConfig::from_json_str("{ resize_debounce_frames: }").is_err());
    }
}
