//! Play rate and play state sync

use super::{approx_eq, RateChangePolicy, SyncError};
use crate::transport::{HostPlayState, TransportController};
use tracing::{debug, info, trace};

impl super::ReconciliationEngine {
    /// Match the host rate, with pitch preservation on and the host paused
    pub(crate) fn sync_rate<H>(&mut self, host: &mut H) -> Result<(), SyncError>
    where
        H: TransportController + ?Sized,
    {
        let rate = self.context.current_external.play_rate;
        let step = self.settings.min_rate_step;

        // The external rate field reads 0 until its engine has started; a torn
        // read can also yield NaN or infinity
        if !(rate.is_finite() && rate > step) || approx_eq(host.get_rate(), rate, step) {
            return Ok(());
        }

        let preserve_pitch = self.commands.preserve_pitch_command;
        if !host.get_toggle_state(preserve_pitch) {
            debug!(command = preserve_pitch, "Enabling preserve pitch");
            host.toggle_command(preserve_pitch);
        }

        let pause = match self.settings.rate_change {
            RateChangePolicy::AlwaysPause => true,
            RateChangePolicy::PauseWhenPlaying => Self::checked_play_state(host)?.is_active(),
        };
        if pause {
            host.set_play_state(HostPlayState::Paused);
        }

        info!("⏩ Play rate {:.3} → {:.3}", host.get_rate(), rate);
        host.set_rate(rate);
        self.stats.rate_changes += 1;
        Ok(())
    }

    /// Start or stop the host to follow the external play flag
    pub(crate) fn sync_play_state<H>(&mut self, host: &mut H) -> Result<(), SyncError>
    where
        H: TransportController + ?Sized,
    {
        let current = self.context.current_external;
        let previous = self.context.previous_external;
        let eps = self.settings.min_time_step;
        let host_state = Self::checked_play_state(host)?;

        if current.play_state {
            self.context.pending_stop = false;

            if self.count_in_pending() {
                trace!("count-in in progress, holding host");
                return Ok(());
            }

            if host_state.is_idle() {
                let start = if current.has_loop_start(eps) {
                    current.loop_start
                } else {
                    current.play_position
                };
                self.set_host_position(host, start + self.settings.latency_compensation);
                host.set_play_state(HostPlayState::Playing);
                self.stats.starts += 1;
                info!("▶️  Host started at {:.3}s", start);
            }
            return Ok(());
        }

        if !host_state.is_active() {
            self.context.pending_stop = false;
            return Ok(());
        }

        if !(previous.play_state || self.context.pending_stop) {
            return Ok(());
        }

        let position = host.get_position();
        let tolerance = self.settings.loop_edge_tolerance;
        let looping = current.loop_state && current.loop_end - current.loop_start > eps;
        if looping && position > current.loop_start + tolerance && position < current.loop_end - tolerance {
            if !self.context.pending_stop {
                debug!(position, "Holding stop until the loop region finishes");
            }
            self.context.pending_stop = true;
            return Ok(());
        }

        host.set_play_state(HostPlayState::Stopped);
        self.context.pending_stop = false;
        self.stats.stops += 1;
        info!("⏹️  Host stopped at {:.3}s", position);
        Ok(())
    }

    /// External reports playing but the musical position has not started moving
    fn count_in_pending(&self) -> bool {
        let current = &self.context.current_external;
        let previous = &self.context.previous_external;
        let eps = self.settings.min_time_step;

        current.count_in_state
            && (!self.cursor_moved() || (current.has_loop_start(eps) && previous.play_position < eps))
    }
}
