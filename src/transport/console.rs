//! Console transport - a simulated host that logs every command
//!
//! Keeps its own clock, loop range and toggle states so the run loop has
//! something to reconcile against without a real host. Every command is
//! also appended to a journal that tests assert on.

use super::{HostCommand, HostPlayState, TransportController};
use std::collections::HashSet;
use tracing::{debug, info};

pub struct ConsoleTransport {
    name: String,
    position: f64,
    rate: f64,
    play_state: HostPlayState,
    loop_range: (f64, f64),
    loop_enabled: bool,
    toggles: HashSet<i32>,
    journal: Vec<HostCommand>,
    /// Number of commands issued
    execution_count: u64,
}

impl ConsoleTransport {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            position: 0.0,
            rate: 1.0,
            play_state: HostPlayState::Stopped,
            loop_range: (0.0, 0.0),
            loop_enabled: false,
            toggles: HashSet::new(),
            journal: Vec::new(),
            execution_count: 0,
        }
    }

    /// Start from a given state without journaling anything
    pub fn with_state(mut self, position: f64, rate: f64, play_state: HostPlayState) -> Self {
        self.position = position;
        self.rate = rate;
        self.play_state = play_state;
        self
    }

    pub fn with_toggle(mut self, command_id: i32) -> Self {
        self.toggles.insert(command_id);
        self
    }

    /// Force the reported play state (including invalid codes)
    pub fn force_play_state(&mut self, state: HostPlayState) {
        self.play_state = state;
    }

    /// Move the clock directly, as a user dragging the host cursor would
    pub fn force_position(&mut self, seconds: f64) {
        self.position = seconds;
    }

    /// Advance the host clock by `dt` seconds of wall time
    ///
    /// Playback wraps to the loop start when an enabled loop end is crossed.
    pub fn advance(&mut self, dt: f64) {
        if !self.play_state.is_active() {
            return;
        }

        self.position += dt * self.rate;
        let (start, end) = self.loop_range;
        if self.loop_enabled && end > start && self.position >= end {
            self.position = start + (self.position - end) % (end - start);
        }
    }

    pub fn journal(&self) -> &[HostCommand] {
        &self.journal
    }

    /// Drain the journal, returning what was recorded since the last call
    pub fn take_journal(&mut self) -> Vec<HostCommand> {
        std::mem::take(&mut self.journal)
    }

    pub fn execution_count(&self) -> u64 {
        self.execution_count
    }

    pub fn loop_range(&self) -> (f64, f64, bool) {
        (self.loop_range.0, self.loop_range.1, self.loop_enabled)
    }

    fn record(&mut self, command: HostCommand) {
        self.execution_count += 1;
        info!(
            "🎛️  [{}] Host '{}' → {} [exec #{}]",
            chrono::Local::now().format("%H:%M:%S%.3f"),
            self.name,
            command,
            self.execution_count
        );
        debug!(host = self.name, command = ?command, "ConsoleTransport command");
        self.journal.push(command);
    }
}

impl TransportController for ConsoleTransport {
    fn get_position(&self) -> f64 {
        self.position
    }

    fn get_rate(&self) -> f64 {
        self.rate
    }

    fn get_play_state(&self) -> HostPlayState {
        self.play_state
    }

    fn set_position(&mut self, seconds: f64, move_view: bool, seek_while_playing: bool) {
        self.position = seconds.max(0.0);
        self.record(HostCommand::SetPosition {
            seconds,
            move_view,
            seek_while_playing,
        });
    }

    fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
        self.record(HostCommand::SetRate(rate));
    }

    fn set_play_state(&mut self, state: HostPlayState) {
        self.play_state = state;
        self.record(HostCommand::SetPlayState(state));
    }

    fn set_loop_range(&mut self, start: f64, end: f64, enabled: bool) {
        self.loop_range = (start, end);
        self.loop_enabled = enabled;
        self.record(HostCommand::SetLoopRange { start, end, enabled });
    }

    fn get_toggle_state(&self, command_id: i32) -> bool {
        self.toggles.contains(&command_id)
    }

    fn toggle_command(&mut self, command_id: i32) {
        if !self.toggles.remove(&command_id) {
            self.toggles.insert(command_id);
        }
        self.record(HostCommand::Toggle(command_id));
    }

    fn show_message(&mut self, text: &str) {
        info!("💬 [{}] {}", self.name, text.trim_end());
        self.record(HostCommand::Message(text.to_string()));
    }
}
