//! Host transport contract
//!
//! The reconciliation engine drives the host only through
//! [`TransportController`]. A real host adapter implements it over the
//! host's API; [`ConsoleTransport`] is a simulated host for the CLI and tests.

mod console;

pub use console::ConsoleTransport;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Host play state as reported by the host
///
/// Raw codes follow the host convention: 0 stopped, 1 playing, 2 paused,
/// 4 recording. Anything else is kept as `Invalid` for the engine to reject.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlayState {
    Stopped,
    Playing,
    Paused,
    Recording,
    Invalid(i32),
}

impl HostPlayState {
    pub fn from_raw(raw: i32) -> Self {
        match raw {
            0 => HostPlayState::Stopped,
            1 => HostPlayState::Playing,
            2 => HostPlayState::Paused,
            4 => HostPlayState::Recording,
            other => HostPlayState::Invalid(other),
        }
    }

    pub fn raw(self) -> i32 {
        match self {
            HostPlayState::Stopped => 0,
            HostPlayState::Playing => 1,
            HostPlayState::Paused => 2,
            HostPlayState::Recording => 4,
            HostPlayState::Invalid(raw) => raw,
        }
    }

    /// Transport is moving (recording counts as playing)
    pub fn is_active(self) -> bool {
        matches!(self, HostPlayState::Playing | HostPlayState::Recording)
    }

    pub fn is_idle(self) -> bool {
        matches!(self, HostPlayState::Stopped | HostPlayState::Paused)
    }
}

impl fmt::Display for HostPlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostPlayState::Stopped => write!(f, "stopped"),
            HostPlayState::Playing => write!(f, "playing"),
            HostPlayState::Paused => write!(f, "paused"),
            HostPlayState::Recording => write!(f, "recording"),
            HostPlayState::Invalid(raw) => write!(f, "invalid({})", raw),
        }
    }
}

/// Host transport primitives
///
/// All calls are synchronous and complete within the current tick.
pub trait TransportController {
    /// Seconds
    fn get_position(&self) -> f64;
    fn get_rate(&self) -> f64;
    fn get_play_state(&self) -> HostPlayState;

    fn set_position(&mut self, seconds: f64, move_view: bool, seek_while_playing: bool);
    fn set_rate(&mut self, rate: f64);
    fn set_play_state(&mut self, state: HostPlayState);
    fn set_loop_range(&mut self, start: f64, end: f64, enabled: bool);

    fn get_toggle_state(&self, command_id: i32) -> bool;
    fn toggle_command(&mut self, command_id: i32);

    /// User-visible message (host console)
    fn show_message(&mut self, text: &str);
}

/// Host-side identifiers, owned by the host adapter and injected into the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCommands {
    /// Toggle command for "preserve pitch when changing playrate"
    #[serde(default = "default_preserve_pitch_command")]
    pub preserve_pitch_command: i32,
}

impl Default for HostCommands {
    fn default() -> Self {
        Self {
            preserve_pitch_command: default_preserve_pitch_command(),
        }
    }
}

fn default_preserve_pitch_command() -> i32 {
    40671
}

/// A command issued to the host, as recorded by [`ConsoleTransport`]
#[derive(Debug, Clone, PartialEq)]
pub enum HostCommand {
    SetPosition {
        seconds: f64,
        move_view: bool,
        seek_while_playing: bool,
    },
    SetRate(f64),
    SetPlayState(HostPlayState),
    SetLoopRange {
        start: f64,
        end: f64,
        enabled: bool,
    },
    Toggle(i32),
    Message(String),
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostCommand::SetPosition {
                seconds,
                move_view,
                seek_while_playing,
            } => write!(
                f,
                "set_position({:.3}s, move_view={}, seek={})",
                seconds, move_view, seek_while_playing
            ),
            HostCommand::SetRate(rate) => write!(f, "set_rate({:.3})", rate),
            HostCommand::SetPlayState(state) => write!(f, "set_play_state({})", state),
            HostCommand::SetLoopRange { start, end, enabled } => {
                write!(f, "set_loop_range({:.3}s..{:.3}s, enabled={})", start, end, enabled)
            }
            HostCommand::Toggle(id) => write!(f, "toggle_command({})", id),
            HostCommand::Message(text) => write!(f, "show_message({:?})", text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_play_state_codes() {
        for raw in [0, 1, 2, 4] {
            assert_eq!(HostPlayState::from_raw(raw).raw(), raw);
        }
        assert_eq!(HostPlayState::from_raw(3), HostPlayState::Invalid(3));
        assert_eq!(HostPlayState::from_raw(-1).raw(), -1);
    }

    #[test]
    fn test_recording_is_active() {
        assert!(HostPlayState::Recording.is_active());
        assert!(HostPlayState::Playing.is_active());
        assert!(!HostPlayState::Paused.is_active());
        assert!(HostPlayState::Paused.is_idle());
        assert!(!HostPlayState::Invalid(7).is_idle());
    }

    #[test]
    fn test_default_commands() {
        assert_eq!(HostCommands::default().preserve_pitch_command, 40671);
    }
}
