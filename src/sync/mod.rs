//! Reconciliation engine - mirrors the external transport into the host
//!
//! Driven once per polling tick by an external scheduler. Each tick:
//! - Probes a fresh external snapshot (freezing on failure)
//! - Syncs loop range, cursor position, play rate and play state, in that order
//! - Remembers the snapshot for next tick's delta detection
//!
//! The host always follows the external application, never the reverse.

mod desync;
mod playback;
mod position;
mod settings;

pub use desync::DesyncWindow;
pub use settings::{LoopChangePolicy, RateChangePolicy, SyncSettings};

#[cfg(test)]
mod tests;

use crate::decoder::ExternalTransportState;
use crate::external::TransportSource;
use crate::probe::ProbeErrorKind;
use crate::transport::{HostCommands, HostPlayState, TransportController};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Unrecoverable condition for the current tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error("host reported an invalid play state ({0})")]
    InvalidHostPlayState(i32),
}

/// Behavioural mode of a tick, derived from both play states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// External playing; host follows continuously
    Mirroring,
    /// Both sides idle; host only snapshots external cursor moves
    IdleSync,
    /// External stopped while the host is still playing what it mirrored
    Stopping,
    /// Host playing on its own; left alone
    HostFreeRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Probe failed; nothing was synced
    Unavailable(ProbeErrorKind),
    Synced(SyncMode),
}

/// Counters of commands issued since the engine was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub ticks: u64,
    pub unavailable_ticks: u64,
    pub loop_updates: u64,
    pub position_corrections: u64,
    pub rate_changes: u64,
    pub starts: u64,
    pub stops: u64,
}

/// State carried from one tick to the next
#[derive(Debug, Clone)]
pub struct ReconciliationContext {
    pub previous_external: ExternalTransportState,
    pub current_external: ExternalTransportState,
    pub desync_window: DesyncWindow,
    /// Kind of the last probe failure; `None` while connected
    pub last_probe_error: Option<ProbeErrorKind>,
    /// A stop held back while the host finishes the loop region
    pub pending_stop: bool,
}

impl ReconciliationContext {
    fn new(window: usize) -> Self {
        Self {
            previous_external: ExternalTransportState::default(),
            current_external: ExternalTransportState::default(),
            desync_window: DesyncWindow::new(window),
            last_probe_error: None,
            pending_stop: false,
        }
    }
}

pub struct ReconciliationEngine {
    pub(crate) settings: SyncSettings,
    pub(crate) commands: HostCommands,
    pub(crate) context: ReconciliationContext,
    pub(crate) stats: SyncStats,
}

impl ReconciliationEngine {
    pub fn new(settings: SyncSettings, commands: HostCommands) -> Self {
        let context = ReconciliationContext::new(settings.desync_window);
        Self {
            settings,
            commands,
            context,
            stats: SyncStats::default(),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn context(&self) -> &ReconciliationContext {
        &self.context
    }

    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Swap tunables without losing tick history
    ///
    /// The desync window is rebuilt only when its size changes.
    pub fn apply_settings(&mut self, settings: SyncSettings, commands: HostCommands) {
        if settings.desync_window != self.context.desync_window.len() {
            debug!(
                from = self.context.desync_window.len(),
                to = settings.desync_window,
                "Resizing desync window"
            );
            self.context.desync_window.resize(settings.desync_window);
        }
        self.settings = settings;
        self.commands = commands;
    }

    /// Run one reconciliation cycle
    pub fn tick<S, H>(&mut self, source: &mut S, host: &mut H) -> Result<TickOutcome, SyncError>
    where
        S: TransportSource + ?Sized,
        H: TransportController + ?Sized,
    {
        self.stats.ticks += 1;

        // 1. Probe
        let snapshot = match source.read_state() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let kind = err.kind();
                self.stats.unavailable_ticks += 1;
                match self.context.last_probe_error {
                    None => {
                        warn!("⚠️  External application unavailable: {}", err);
                        host.show_message(&format!("External application unavailable: {}\n", err));
                    }
                    Some(previous) if previous != kind => {
                        debug!(error = %err, "External application still unavailable");
                    }
                    Some(_) => trace!(error = %err, "probe failed"),
                }
                self.context.last_probe_error = Some(kind);
                return Ok(TickOutcome::Unavailable(kind));
            }
        };

        if self.context.last_probe_error.take().is_some() {
            info!("✅ Reconnected to external application");
            host.show_message("Reconnected to external application.\n");
        }
        self.context.current_external = snapshot;

        let host_state = Self::checked_play_state(host)?;
        let mode = self.mode(host_state);
        trace!(?mode, ?snapshot, host = %host_state, "tick");

        // 2. Loop
        let bounds_changed = self.loop_bounds_changed();
        if bounds_changed || self.loop_state_changed() {
            self.sync_loop(host);
        }

        // 3. Position
        match mode {
            SyncMode::Mirroring => self.mirror_position(host, host_state),
            SyncMode::IdleSync => self.idle_sync_position(host, bounds_changed),
            SyncMode::Stopping | SyncMode::HostFreeRunning => {}
        }

        // 4. Rate
        self.sync_rate(host)?;

        // 5. Play state
        self.sync_play_state(host)?;

        // 6. Remember
        self.context.previous_external = self.context.current_external;
        Ok(TickOutcome::Synced(mode))
    }

    /// Host play state, reporting and rejecting codes outside the known set
    pub(crate) fn checked_play_state<H>(host: &mut H) -> Result<HostPlayState, SyncError>
    where
        H: TransportController + ?Sized,
    {
        match host.get_play_state() {
            HostPlayState::Invalid(raw) => {
                let err = SyncError::InvalidHostPlayState(raw);
                warn!("❌ {}", err);
                host.show_message(&format!("Host is in an invalid play state ({})!\n", raw));
                Err(err)
            }
            state => Ok(state),
        }
    }

    fn mode(&self, host_state: HostPlayState) -> SyncMode {
        let current = &self.context.current_external;
        let previous = &self.context.previous_external;

        if current.play_state {
            SyncMode::Mirroring
        } else if host_state.is_idle() {
            SyncMode::IdleSync
        } else if previous.play_state || self.context.pending_stop {
            SyncMode::Stopping
        } else {
            SyncMode::HostFreeRunning
        }
    }

    fn loop_state_changed(&self) -> bool {
        self.context.current_external.loop_state != self.context.previous_external.loop_state
    }

    fn loop_bounds_changed(&self) -> bool {
        let current = &self.context.current_external;
        let previous = &self.context.previous_external;

        match self.settings.loop_change {
            LoopChangePolicy::Exact => {
                current.loop_start != previous.loop_start || current.loop_end != previous.loop_end
            }
            LoopChangePolicy::Epsilon => {
                let step = self.settings.min_time_step;
                !approx_eq(current.loop_start, previous.loop_start, step)
                    || !approx_eq(current.loop_end, previous.loop_end, step)
            }
        }
    }

    fn sync_loop<H: TransportController + ?Sized>(&mut self, host: &mut H) {
        let current = self.context.current_external;
        debug!(
            start = current.loop_start,
            end = current.loop_end,
            enabled = current.loop_state,
            "Syncing loop range"
        );
        host.set_loop_range(current.loop_start, current.loop_end, current.loop_state);
        self.stats.loop_updates += 1;
    }

    /// Move the host cursor and start a fresh drift baseline
    pub(crate) fn set_host_position<H: TransportController + ?Sized>(&mut self, host: &mut H, seconds: f64) {
        debug!(target_position = seconds, host_position = host.get_position(), "Correcting host position");
        host.set_position(seconds, false, true);
        self.context.desync_window.reset();
        self.stats.position_corrections += 1;
    }

    pub(crate) fn cursor_moved(&self) -> bool {
        !approx_eq(
            self.context.current_external.play_position,
            self.context.previous_external.play_position,
            self.settings.min_time_step,
        )
    }
}

/// `|a - b| < epsilon`
pub(crate) fn approx_eq(a: f64, b: f64, epsilon: f64) -> bool {
    (a - b).abs() < epsilon
}
