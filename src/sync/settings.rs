//! Tunables of the reconciliation engine

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// How loop-bound changes are detected between ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoopChangePolicy {
    /// Bounds differ by at least `min_time_step`
    #[default]
    Epsilon,
    /// Any bit-level difference
    Exact,
}

/// What a rate change does to host playback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateChangePolicy {
    /// Always pause the host before writing the rate
    #[default]
    AlwaysPause,
    /// Pause only when the host is actively playing
    PauseWhenPlaying,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    /// Tick period of the run loop
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Number of consecutive drift samples required before a correction
    #[serde(default = "default_desync_window")]
    pub desync_window: usize,
    /// Drift (seconds) every window sample must exceed
    #[serde(default = "default_desync_threshold")]
    pub desync_threshold: f64,
    #[serde(default = "default_min_time_step")]
    pub min_time_step: f64,
    #[serde(default = "default_min_rate_step")]
    pub min_rate_step: f64,
    /// Forward cursor move between ticks treated as a seek while playing
    #[serde(default = "default_cursor_jump_threshold")]
    pub cursor_jump_threshold: f64,
    /// Added to corrective position writes (seconds)
    #[serde(default = "default_latency_compensation")]
    pub latency_compensation: f64,
    /// Distance from a loop edge within which a pending stop is no longer held back
    #[serde(default = "default_loop_edge_tolerance")]
    pub loop_edge_tolerance: f64,
    #[serde(default)]
    pub loop_change: LoopChangePolicy,
    #[serde(default)]
    pub rate_change: RateChangePolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            desync_window: default_desync_window(),
            desync_threshold: default_desync_threshold(),
            min_time_step: default_min_time_step(),
            min_rate_step: default_min_rate_step(),
            cursor_jump_threshold: default_cursor_jump_threshold(),
            latency_compensation: default_latency_compensation(),
            loop_edge_tolerance: default_loop_edge_tolerance(),
            loop_change: LoopChangePolicy::default(),
            rate_change: RateChangePolicy::default(),
        }
    }
}

impl SyncSettings {
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("sync.poll_interval_ms must be greater than 0");
        }
        if self.desync_window == 0 {
            anyhow::bail!("sync.desync_window must be at least 1");
        }

        let non_negative = [
            ("desync_threshold", self.desync_threshold),
            ("min_time_step", self.min_time_step),
            ("min_rate_step", self.min_rate_step),
            ("cursor_jump_threshold", self.cursor_jump_threshold),
            ("latency_compensation", self.latency_compensation),
            ("loop_edge_tolerance", self.loop_edge_tolerance),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("sync.{} must be a finite, non-negative number (got {})", name, value);
            }
        }

        Ok(())
    }
}

fn default_poll_interval_ms() -> u64 {
    33
}

fn default_desync_window() -> usize {
    9
}

fn default_desync_threshold() -> f64 {
    0.3
}

fn default_min_time_step() -> f64 {
    0.001
}

fn default_min_rate_step() -> f64 {
    0.001
}

fn default_cursor_jump_threshold() -> f64 {
    0.1
}

fn default_latency_compensation() -> f64 {
    0.05
}

fn default_loop_edge_tolerance() -> f64 {
    0.3
}
