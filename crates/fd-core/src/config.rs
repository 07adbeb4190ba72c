// Copyright 2025 Schelling Point Labs Inc
// SPDX-License-Identifier: AGPL-3.0-only

//! Typed configuration sections consumed by the engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// `[playback]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PlaybackConfig {
    /// Delay between automatic steps
    pub step_interval_ms: u64,
    /// Step automatically after the session is created
    pub auto_play: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            step_interval_ms: 250,
            auto_play: false,
        }
    }
}

impl PlaybackConfig {
    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }
}

/// `[capture]` section: how captured protocol output is replayed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CaptureConfig {
    /// Bytes per emitted chunk; 0 emits one chunk per row
    pub chunk_size: usize,
    /// Delay before each emitted chunk
    pub chunk_delay_ms: u64,
}

impl CaptureConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

/// `[worker]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WorkerConfig {
    pub ready_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: 5000,
        }
    }
}

impl WorkerConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }
}
