//! Cursor position sync

use super::approx_eq;
use crate::transport::{HostPlayState, TransportController};
use tracing::debug;

impl super::ReconciliationEngine {
    /// External playing: follow seeks at once, debounce everything else
    ///
    /// An idle host is positioned by the play-state step when it is started.
    pub(crate) fn mirror_position<H>(&mut self, host: &mut H, host_state: HostPlayState)
    where
        H: TransportController + ?Sized,
    {
        if !host_state.is_active() {
            return;
        }

        let current = self.context.current_external.play_position;
        let previous = self.context.previous_external.play_position;
        let host_position = host.get_position();
        let target = current + self.settings.latency_compensation;

        if current < previous {
            debug!(from = previous, to = current, "External cursor moved backward");
            self.set_host_position(host, target);
            return;
        }

        if current - previous > self.settings.cursor_jump_threshold
            && !approx_eq(host_position, current, self.settings.desync_threshold)
        {
            debug!(from = previous, to = current, "External cursor jumped forward");
            self.set_host_position(host, target);
            return;
        }

        self.context.desync_window.push((host_position - current).abs());
        if self.context.desync_window.exceeds(self.settings.desync_threshold) {
            debug!(host_position, external_position = current, "Sustained desync");
            self.set_host_position(host, target);
        }
    }

    /// Both sides idle: apply loop snaps and cursor moves directly
    pub(crate) fn idle_sync_position<H>(&mut self, host: &mut H, loop_bounds_changed: bool)
    where
        H: TransportController + ?Sized,
    {
        let current = self.context.current_external;

        if loop_bounds_changed && current.loop_end > self.settings.min_time_step {
            self.set_host_position(host, current.loop_start);
        } else if self.cursor_moved() {
            self.set_host_position(host, current.play_position);
        }
    }
}
