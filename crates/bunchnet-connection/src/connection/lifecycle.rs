use std::time::{Duration, Instant};

use bunchnet_core::error::Result;
use tracing::{debug, warn};

use super::Connection;
use crate::{connection_state::ConnectionState, handler::ChannelRequest};

impl Connection {
    /// Runs one tick of the connection.
    ///
    /// Updates timing and statistics, closes the connection once the remote
    /// side went silent for too long, ticks every channel, repeats pending
    /// acks and flushes whatever became due. Finished packets land in the
    /// outbox.
    pub fn tick(&mut self, time: Instant) -> Result<()> {
        self.frame_timer.tick(time);

        if self.config.internal_ack {
            self.last_receive_time = time;
            for index in self.channels.open_indices() {
                let Some(channel) = self.channels.get_mut(index) else {
                    continue;
                };
                channel.ack_everything();
                if channel.received_acks() {
                    self.destroy_channel(index);
                }
            }
            self.update_state();
        }

        if time.saturating_duration_since(self.stat_update_time) > self.config.stat_period {
            self.update_quality(time);
        }

        let delta = time.saturating_duration_since(self.last_tick_time);
        self.last_tick_time = time;

        let timeout = self.active_timeout();
        let silent = time.saturating_duration_since(self.last_receive_time);
        if silent > timeout {
            if !self.state.is_closed() {
                debug!(
                    "Connection to {} timed out after {:?} ({:?})",
                    self.remote_address, timeout, silent
                );
                self.timed_out = true;
                self.close(time)?;
            }
        } else {
            for index in self.channels.open_indices() {
                let request = match self.channels.get_mut(index) {
                    Some(channel) => channel.tick(),
                    None => continue,
                };
                if request == ChannelRequest::Close {
                    self.close_channel(index, time)?;
                }
            }
            if !self.channels.contains(0) && self.channels.counters(0).was_used() {
                self.state = ConnectionState::Closed;
            }
        }

        self.purge_acks(time)?;
        let keep_alive_due = !self.state.is_closed()
            && time.saturating_duration_since(self.last_send_time) > self.config.keep_alive_time;
        if self.time_sensitive || keep_alive_due {
            self.flush_net(time)?;
        }

        self.pacing.decay(delta);
        if let Some(simulator) = self.simulator.as_mut() {
            simulator.release(time, &mut self.outbox);
        }
        Ok(())
    }

    fn active_timeout(&self) -> Duration {
        if self.state == ConnectionState::Pending {
            self.config.initial_connect_timeout
        } else if self.pending_destroy {
            self.config.pending_destroy_timeout
        } else {
            self.config.connection_timeout
        }
    }

    fn update_quality(&mut self, time: Instant) {
        let real_time = time.saturating_duration_since(self.stat_update_time).as_secs_f32();
        if self.lag_count > 0 {
            let avg_lag = (self.lag_acc / f64::from(self.lag_count)) as f32;
            self.quality.avg_lag = avg_lag;
            self.quality.best_lag =
                if self.quality.best_lag == 0.0 { avg_lag } else { self.quality.best_lag.min(avg_lag) };
        }

        let period = self.stats - self.period_stats;
        self.quality.in_loss_percent = period.in_loss_rate() * 100.0;
        self.quality.out_loss_percent = period.out_loss_rate() * 100.0;
        self.quality.in_bytes_per_second = period.in_bytes as f32 / real_time;
        self.quality.out_bytes_per_second = period.out_bytes as f32 / real_time;

        self.period_stats = self.stats;
        self.lag_acc = 0.0;
        self.lag_count = 0;
        self.stat_update_time = time;
    }

    /// Closes the control channel and flushes a final packet.
    ///
    /// The connection is Closed afterwards no matter how the control channel
    /// close went. Closing twice only flushes again.
    pub fn close(&mut self, time: Instant) -> Result<()> {
        if !self.state.is_closed() {
            debug!("Closing connection to {}", self.remote_address);
        }
        if self.channels.contains(0) {
            if let Err(error) = self.close_channel(0, time) {
                warn!("Could not close control channel to {}: {}", self.remote_address, error);
            }
        }
        self.state = ConnectionState::Closed;
        self.flush_net(time)
    }

    /// Closes the connection and tears down every channel.
    ///
    /// The final packet written by the close stays in the outbox.
    pub fn clean_up(&mut self, time: Instant) -> Result<()> {
        let result = self.close(time);
        for channel in self.channels.drain() {
            channel.destroy();
        }
        self.queued_acks.clear();
        self.resend_acks.clear();
        self.lag_ring.clear();
        if let Some(simulator) = self.simulator.as_mut() {
            simulator.clear();
        }
        result
    }
}
