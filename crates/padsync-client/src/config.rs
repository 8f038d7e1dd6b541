//! Client-side timing knobs

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Timing configuration for an editing session and its cursor broadcaster.
///
/// All durations are stored in milliseconds so the struct maps directly onto
/// a TOML or JSON table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last local edit before it is written
    pub debounce_ms: u64,
    /// Cursor frame interval (one broadcast per frame at most)
    pub frame_interval_ms: u64,
    /// Pointer moves smaller than this on both axes are not broadcast
    pub min_cursor_delta: f64,
    /// Remote cursors not refreshed for this long are dropped; `None` keeps them
    pub cursor_ttl_ms: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 1000,
            frame_interval_ms: 16,
            min_cursor_delta: 1.0,
            cursor_ttl_ms: Some(30_000),
        }
    }
}

impl SyncConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms.max(1))
    }

    pub fn cursor_ttl(&self) -> Option<Duration> {
        self.cursor_ttl_ms.map(Duration::from_millis)
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce_ms = debounce.as_millis() as u64;
        self
    }
}
