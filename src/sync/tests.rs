//! Tests for the reconciliation engine

use super::*;
use crate::probe::ProbeError;
use crate::transport::{ConsoleTransport, HostCommand};

struct StubSource {
    next: Result<ExternalTransportState, ProbeError>,
}

impl StubSource {
    fn new(state: ExternalTransportState) -> Self {
        Self { next: Ok(state) }
    }

    fn set(&mut self, state: ExternalTransportState) {
        self.next = Ok(state);
    }

    fn fail(&mut self, err: ProbeError) {
        self.next = Err(err);
    }
}

impl TransportSource for StubSource {
    fn read_state(&mut self) -> Result<ExternalTransportState, ProbeError> {
        self.next.clone()
    }
}

fn external(position: f64, playing: bool) -> ExternalTransportState {
    ExternalTransportState {
        play_position: position,
        play_rate: 1.0,
        play_state: playing,
        ..ExternalTransportState::default()
    }
}

fn with_loop(mut state: ExternalTransportState, start: f64, end: f64, enabled: bool) -> ExternalTransportState {
    state.loop_start = start;
    state.loop_end = end;
    state.loop_state = enabled;
    state
}

fn engine() -> ReconciliationEngine {
    ReconciliationEngine::new(SyncSettings::default(), HostCommands::default())
}

fn host(position: f64, state: HostPlayState) -> ConsoleTransport {
    ConsoleTransport::new("test").with_state(position, 1.0, state)
}

fn set_position(seconds: f64) -> HostCommand {
    HostCommand::SetPosition {
        seconds,
        move_view: false,
        seek_while_playing: true,
    }
}

fn positions(journal: &[HostCommand]) -> Vec<f64> {
    journal
        .iter()
        .filter_map(|command| match command {
            HostCommand::SetPosition { seconds, .. } => Some(*seconds),
            _ => None,
        })
        .collect()
}

fn play_states(journal: &[HostCommand]) -> Vec<HostPlayState> {
    journal
        .iter()
        .filter_map(|command| match command {
            HostCommand::SetPlayState(state) => Some(*state),
            _ => None,
        })
        .collect()
}

fn messages(journal: &[HostCommand]) -> Vec<String> {
    journal
        .iter()
        .filter_map(|command| match command {
            HostCommand::Message(text) => Some(text.clone()),
            _ => None,
        })
        .collect()
}

#[test]
fn test_start_from_loop_start() {
    let mut engine = engine();
    let mut host = host(0.0, HostPlayState::Stopped);
    let mut source = StubSource::new(with_loop(external(0.0, false), 2.0, 6.0, false));

    engine.tick(&mut source, &mut host).unwrap();
    host.take_journal();
    host.force_position(0.0);

    source.set(with_loop(external(0.0, true), 2.0, 6.0, false));
    let outcome = engine.tick(&mut source, &mut host).unwrap();

    assert_eq!(outcome, TickOutcome::Synced(SyncMode::Mirroring));
    assert_eq!(
        host.journal(),
        &[set_position(2.0 + 0.05), HostCommand::SetPlayState(HostPlayState::Playing)]
    );
    assert_eq!(engine.stats().starts, 1);
}

#[test]
fn test_start_from_external_position_without_loop() {
    let mut engine = engine();
    let mut host = host(0.0, HostPlayState::Paused);
    let mut source = StubSource::new(external(0.0, false));
    engine.tick(&mut source, &mut host).unwrap();

    source.set(external(0.0, true));
    engine.tick(&mut source, &mut host).unwrap();

    assert_eq!(
        host.journal(),
        &[set_position(0.0 + 0.05), HostCommand::SetPlayState(HostPlayState::Playing)]
    );
}

#[test]
fn test_count_in_holds_start() {
    let mut engine = engine();
    let mut host = host(1.0, HostPlayState::Stopped);
    let mut source = StubSource::new(external(1.0, false));
    engine.tick(&mut source, &mut host).unwrap();
    host.take_journal();

    let mut counting = external(1.0, true);
    counting.count_in_state = true;
    source.set(counting);
    engine.tick(&mut source, &mut host).unwrap();
    engine.tick(&mut source, &mut host).unwrap();

    assert!(play_states(host.journal()).is_empty());
    assert_eq!(host.get_play_state(), HostPlayState::Stopped);
}

#[test]
fn test_count_in_jump_onto_loop_start_is_still_preroll() {
    let mut engine = engine();
    let mut host = host(0.0, HostPlayState::Stopped);
    let mut source = StubSource::new(with_loop(external(0.0, false), 2.0, 6.0, true));
    engine.tick(&mut source, &mut host).unwrap();

    let mut counting = with_loop(external(0.0, true), 2.0, 6.0, true);
    counting.count_in_state = true;
    source.set(counting);
    engine.tick(&mut source, &mut host).unwrap();

    counting.play_position = 2.0;
    source.set(counting);
    engine.tick(&mut source, &mut host).unwrap();
    assert!(play_states(host.journal()).is_empty());

    source.set(with_loop(external(2.05, true), 2.0, 6.0, true));
    engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(play_states(host.journal()), vec![HostPlayState::Playing]);
}

#[test]
fn test_stop_held_inside_loop() {
    let mut engine = engine();
    let mut host = host(5.0, HostPlayState::Playing);
    let mut source = StubSource::new(with_loop(external(5.0, true), 2.0, 10.0, true));
    engine.tick(&mut source, &mut host).unwrap();
    host.take_journal();

    source.set(with_loop(external(5.0, false), 2.0, 10.0, true));
    let outcome = engine.tick(&mut source, &mut host).unwrap();

    assert_eq!(outcome, TickOutcome::Synced(SyncMode::Stopping));
    assert!(play_states(host.journal()).is_empty());
    assert!(engine.context().pending_stop);

    // still inside: keep holding
    host.force_position(7.0);
    engine.tick(&mut source, &mut host).unwrap();
    assert!(play_states(host.journal()).is_empty());

    // host wrapped to the loop start
    host.force_position(2.1);
    engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(play_states(host.journal()), vec![HostPlayState::Stopped]);
    assert!(!engine.context().pending_stop);
    assert_eq!(engine.stats().stops, 1);
}

#[test]
fn test_stop_immediately_without_loop() {
    let mut engine = engine();
    let mut host = host(5.0, HostPlayState::Recording);
    let mut source = StubSource::new(external(5.0, true));
    engine.tick(&mut source, &mut host).unwrap();

    source.set(external(5.0, false));
    engine.tick(&mut source, &mut host).unwrap();

    assert_eq!(play_states(host.journal()), vec![HostPlayState::Stopped]);
}

#[test]
fn test_stop_immediately_when_loop_disabled() {
    let mut engine = engine();
    let mut host = host(5.0, HostPlayState::Playing);
    let mut source = StubSource::new(with_loop(external(5.0, true), 2.0, 60.0, false));
    engine.tick(&mut source, &mut host).unwrap();
    host.take_journal();

    // selection present but looping off: nothing to finish
    source.set(with_loop(external(5.0, false), 2.0, 60.0, false));
    engine.tick(&mut source, &mut host).unwrap();

    assert_eq!(play_states(host.journal()), vec![HostPlayState::Stopped]);
    assert_eq!(host.get_play_state(), HostPlayState::Stopped);
    assert!(!engine.context().pending_stop);
}

#[test]
fn test_pending_stop_cleared_when_external_resumes() {
    let mut engine = engine();
    let mut host = host(5.0, HostPlayState::Playing);
    let mut source = StubSource::new(with_loop(external(5.0, true), 2.0, 10.0, true));
    engine.tick(&mut source, &mut host).unwrap();

    source.set(with_loop(external(5.0, false), 2.0, 10.0, true));
    engine.tick(&mut source, &mut host).unwrap();
    assert!(engine.context().pending_stop);

    source.set(with_loop(external(5.0, true), 2.0, 10.0, true));
    engine.tick(&mut source, &mut host).unwrap();
    assert!(!engine.context().pending_stop);
}

#[test]
fn test_host_playing_alone_is_left_alone() {
    let mut engine = engine();
    let mut host = host(5.0, HostPlayState::Playing);
    let mut source = StubSource::new(external(0.0, false));

    let outcome = engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(outcome, TickOutcome::Synced(SyncMode::HostFreeRunning));
    assert!(host.journal().is_empty());
}

#[test]
fn test_same_snapshot_twice_is_idempotent() {
    let mut engine = engine();
    let mut host = host(3.0, HostPlayState::Playing);
    let mut source = StubSource::new(with_loop(external(3.0, true), 1.0, 4.0, true));

    engine.tick(&mut source, &mut host).unwrap();
    host.take_journal();
    engine.tick(&mut source, &mut host).unwrap();
    assert!(host.journal().is_empty());
}

#[test]
fn test_same_idle_snapshot_twice_is_idempotent() {
    let mut engine = engine();
    let mut host = host(0.0, HostPlayState::Stopped);
    let mut source = StubSource::new(external(4.0, false));

    engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(host.take_journal(), vec![set_position(4.0)]);
    engine.tick(&mut source, &mut host).unwrap();
    assert!(host.journal().is_empty());
}

#[test]
fn test_desync_fires_on_nth_tick_then_resets() {
    let settings = SyncSettings::default();
    let window = settings.desync_window;
    let mut engine = ReconciliationEngine::new(settings, HostCommands::default());
    let mut host = host(5.0, HostPlayState::Playing);
    let mut source = StubSource::new(external(5.0, true));
    engine.tick(&mut source, &mut host).unwrap();
    host.take_journal();

    host.force_position(10.0);
    for _ in 1..window {
        engine.tick(&mut source, &mut host).unwrap();
    }
    assert!(host.journal().is_empty());

    engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(host.take_journal(), vec![set_position(5.0 + 0.05)]);
    assert_eq!(engine.stats().position_corrections, 1);

    // fresh baseline: a new drift needs a full window again
    host.force_position(10.0);
    engine.tick(&mut source, &mut host).unwrap();
    assert!(host.journal().is_empty());
}

#[test]
fn test_single_noisy_sample_does_not_correct() {
    let settings = SyncSettings {
        desync_window: 3,
        ..SyncSettings::default()
    };
    let mut engine = ReconciliationEngine::new(settings, HostCommands::default());
    let mut host = host(5.0, HostPlayState::Playing);
    let mut source = StubSource::new(external(5.0, true));

    for drift in [0.0, 1.0, 1.0, 0.1, 1.0, 1.0] {
        host.force_position(5.0 + drift);
        engine.tick(&mut source, &mut host).unwrap();
    }
    assert!(positions(host.journal()).is_empty());

    host.force_position(6.0);
    engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(positions(host.journal()).len(), 1);
}

#[test]
fn test_backward_seek_bypasses_window() {
    let mut engine = engine();
    let mut host = host(5.0, HostPlayState::Playing);
    let mut source = StubSource::new(external(5.0, true));
    engine.tick(&mut source, &mut host).unwrap();
    host.take_journal();

    source.set(external(4.0, true));
    engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(host.journal(), &[set_position(4.0 + 0.05)]);
}

#[test]
fn test_forward_jump_follows_immediately() {
    let mut engine = engine();
    let mut host = host(5.0, HostPlayState::Playing);
    let mut source = StubSource::new(external(5.0, true));
    engine.tick(&mut source, &mut host).unwrap();
    host.take_journal();

    source.set(external(8.0, true));
    engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(host.journal(), &[set_position(8.0 + 0.05)]);
}

#[test]
fn test_rate_change_enables_pitch_then_pauses() {
    let mut engine = engine();
    let mut host = host(1.0, HostPlayState::Playing);
    let mut state = external(1.0, true);
    state.play_rate = 0.5;
    let mut source = StubSource::new(state);

    engine.tick(&mut source, &mut host).unwrap();

    assert_eq!(
        host.journal(),
        &[
            HostCommand::Toggle(40671),
            HostCommand::SetPlayState(HostPlayState::Paused),
            HostCommand::SetRate(0.5),
            set_position(1.0 + 0.05),
            HostCommand::SetPlayState(HostPlayState::Playing),
        ]
    );
    assert!(host.get_toggle_state(40671));
    assert_eq!(engine.stats().rate_changes, 1);
}

#[test]
fn test_rate_change_keeps_enabled_pitch_toggle() {
    let mut engine = engine();
    let mut host = ConsoleTransport::new("test")
        .with_state(1.0, 1.0, HostPlayState::Playing)
        .with_toggle(40671);
    let mut state = external(1.0, true);
    state.play_rate = 1.25;
    let mut source = StubSource::new(state);

    engine.tick(&mut source, &mut host).unwrap();

    assert!(!host.journal().contains(&HostCommand::Toggle(40671)));
    assert!(host.get_toggle_state(40671));
    assert_eq!(host.get_rate(), 1.25);
}

#[test]
fn test_rate_change_without_pause_when_idle() {
    let settings = SyncSettings {
        rate_change: RateChangePolicy::PauseWhenPlaying,
        ..SyncSettings::default()
    };
    let mut engine = ReconciliationEngine::new(settings, HostCommands::default());
    let mut host = ConsoleTransport::new("test")
        .with_state(0.0, 1.0, HostPlayState::Stopped)
        .with_toggle(40671);
    let mut state = external(0.0, false);
    state.play_rate = 0.5;
    let mut source = StubSource::new(state);

    engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(host.journal(), &[HostCommand::SetRate(0.5)]);
    assert_eq!(host.get_play_state(), HostPlayState::Stopped);
}

#[test]
fn test_zero_rate_is_ignored() {
    let mut engine = engine();
    let mut host = host(1.0, HostPlayState::Playing);
    let mut state = external(1.0, true);
    state.play_rate = 0.0;
    let mut source = StubSource::new(state);

    engine.tick(&mut source, &mut host).unwrap();
    assert!(host.journal().is_empty());
}

#[test]
fn test_non_finite_rate_is_ignored() {
    for rate in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let mut engine = engine();
        let mut host = host(1.0, HostPlayState::Playing);
        let mut state = external(1.0, true);
        state.play_rate = rate;
        let mut source = StubSource::new(state);

        engine.tick(&mut source, &mut host).unwrap();
        engine.tick(&mut source, &mut host).unwrap();

        assert!(host.journal().is_empty(), "rate {rate} issued {:?}", host.journal());
        assert_eq!(host.get_rate(), 1.0);
        assert_eq!(engine.stats().rate_changes, 0);
    }
}

#[test]
fn test_custom_preserve_pitch_command() {
    let commands = HostCommands {
        preserve_pitch_command: 1234,
    };
    let mut engine = ReconciliationEngine::new(SyncSettings::default(), commands);
    let mut host = host(0.0, HostPlayState::Paused);
    let mut state = external(0.0, false);
    state.play_rate = 0.8;
    let mut source = StubSource::new(state);

    engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(host.journal()[0], HostCommand::Toggle(1234));
}

#[test]
fn test_unavailable_reported_once_per_episode() {
    let mut engine = engine();
    let mut host = host(0.0, HostPlayState::Stopped);
    let good = external(2.0, false);
    let mut source = StubSource::new(good);
    engine.tick(&mut source, &mut host).unwrap();
    host.take_journal();

    source.fail(ProbeError::ProcessNotFound {
        name: "GuitarPro.exe".to_string(),
    });
    for _ in 0..3 {
        let outcome = engine.tick(&mut source, &mut host).unwrap();
        assert_eq!(outcome, TickOutcome::Unavailable(ProbeErrorKind::ProcessNotFound));
    }
    source.fail(ProbeError::AccessDenied { pid: 4 });
    engine.tick(&mut source, &mut host).unwrap();

    let journal = host.take_journal();
    assert_eq!(journal.len(), 1);
    assert!(messages(&journal)[0].contains("unavailable"));
    assert_eq!(engine.context().current_external, good);
    assert_eq!(engine.context().last_probe_error, Some(ProbeErrorKind::AccessDenied));

    source.set(good);
    engine.tick(&mut source, &mut host).unwrap();
    engine.tick(&mut source, &mut host).unwrap();

    let journal = host.take_journal();
    assert_eq!(messages(&journal).len(), 1);
    assert!(messages(&journal)[0].contains("Reconnected"));
    assert_eq!(engine.context().last_probe_error, None);
    assert_eq!(engine.stats().unavailable_ticks, 4);
}

#[test]
fn test_invalid_host_state_aborts_tick() {
    let mut engine = engine();
    let mut host = host(0.0, HostPlayState::Stopped);
    host.force_play_state(HostPlayState::Invalid(3));
    let mut source = StubSource::new(external(4.0, true));

    let err = engine.tick(&mut source, &mut host).unwrap_err();
    assert_eq!(err, SyncError::InvalidHostPlayState(3));

    let journal = host.journal();
    assert_eq!(journal.len(), 1);
    assert_eq!(messages(journal).len(), 1);
    assert_eq!(engine.context().previous_external, ExternalTransportState::default());
}

#[test]
fn test_idle_cursor_move_applied_without_latency() {
    let mut engine = engine();
    let mut host = host(0.0, HostPlayState::Paused);
    let mut source = StubSource::new(external(0.0, false));
    engine.tick(&mut source, &mut host).unwrap();
    assert!(host.journal().is_empty());

    source.set(external(3.5, false));
    let outcome = engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(outcome, TickOutcome::Synced(SyncMode::IdleSync));
    assert_eq!(host.journal(), &[set_position(3.5)]);

    // sub-epsilon jitter is not a move
    source.set(external(3.5004, false));
    engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(host.journal().len(), 1);
}

#[test]
fn test_idle_loop_change_snaps_to_loop_start() {
    let mut engine = engine();
    let mut host = host(0.0, HostPlayState::Stopped);
    let mut source = StubSource::new(external(1.0, false));
    engine.tick(&mut source, &mut host).unwrap();
    host.take_journal();

    source.set(with_loop(external(6.0, false), 4.0, 8.0, true));
    engine.tick(&mut source, &mut host).unwrap();

    assert_eq!(
        host.journal(),
        &[
            HostCommand::SetLoopRange {
                start: 4.0,
                end: 8.0,
                enabled: true
            },
            set_position(4.0),
        ]
    );
    assert_eq!(host.loop_range(), (4.0, 8.0, true));
}

#[test]
fn test_loop_toggle_alone_does_not_move_cursor() {
    let mut engine = engine();
    let mut host = host(0.0, HostPlayState::Stopped);
    let mut source = StubSource::new(with_loop(external(0.0, false), 4.0, 8.0, false));
    engine.tick(&mut source, &mut host).unwrap();
    host.take_journal();

    source.set(with_loop(external(0.0, false), 4.0, 8.0, true));
    engine.tick(&mut source, &mut host).unwrap();
    assert_eq!(
        host.journal(),
        &[HostCommand::SetLoopRange {
            start: 4.0,
            end: 8.0,
            enabled: true
        }]
    );
}

fn loop_updates_for_tiny_change(policy: LoopChangePolicy) -> u64 {
    let settings = SyncSettings {
        loop_change: policy,
        ..SyncSettings::default()
    };
    let mut engine = ReconciliationEngine::new(settings, HostCommands::default());
    let mut host = host(3.0, HostPlayState::Playing);
    let mut source = StubSource::new(with_loop(external(3.0, true), 2.0, 4.0, true));
    engine.tick(&mut source, &mut host).unwrap();

    source.set(with_loop(external(3.0, true), 2.0 + 1e-4, 4.0, true));
    engine.tick(&mut source, &mut host).unwrap();
    engine.stats().loop_updates
}

#[test]
fn test_loop_change_policies() {
    assert_eq!(loop_updates_for_tiny_change(LoopChangePolicy::Epsilon), 1);
    assert_eq!(loop_updates_for_tiny_change(LoopChangePolicy::Exact), 2);
}

#[test]
fn test_apply_settings_resizes_window_only_on_change() {
    let mut engine = engine();
    assert_eq!(engine.context().desync_window.len(), 9);

    let settings = SyncSettings {
        desync_window: 3,
        latency_compensation: 0.1,
        ..SyncSettings::default()
    };
    engine.apply_settings(settings.clone(), HostCommands::default());
    assert_eq!(engine.context().desync_window.len(), 3);
    assert_eq!(engine.settings().latency_compensation, 0.1);

    engine.context.desync_window.push(1.0);
    engine.apply_settings(settings, HostCommands::default());
    assert!(!engine.context().desync_window.exceeds(0.5));
    engine.context.desync_window.push(1.0);
    engine.context.desync_window.push(1.0);
    assert!(engine.context().desync_window.exceeds(0.5));
}
