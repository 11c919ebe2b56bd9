//! Bandwidth pacing.
//!
//! Outgoing traffic is paced with a debt counter: every flushed packet adds
//! its size plus overhead, and every tick pays back `net_speed * elapsed`.
//! The counter may go negative to bank a little credit, but never further
//! than two ticks' worth.

use std::time::Duration;

/// Token bucket style debt counter for one connection.
#[derive(Debug, Clone)]
pub struct Pacing {
    /// Outstanding bytes; negative when sending is below budget.
    queued_bytes: i64,
    /// Budget in bytes per second.
    net_speed: u32,
}

impl Pacing {
    /// Creates a pacer with no outstanding debt.
    pub fn new(net_speed: u32) -> Self {
        Self { queued_bytes: 0, net_speed }
    }

    /// Outstanding bytes.
    pub fn queued_bytes(&self) -> i64 {
        self.queued_bytes
    }

    /// Budget in bytes per second.
    pub fn net_speed(&self) -> u32 {
        self.net_speed
    }

    /// Changes the budget.
    pub fn set_net_speed(&mut self, net_speed: u32) {
        self.net_speed = net_speed;
    }

    /// Charges a sent packet against the budget.
    pub fn record_sent(&mut self, bytes: usize) {
        self.queued_bytes += bytes as i64;
    }

    /// Pays back the budget accrued over `delta`, banking at most two ticks of credit.
    pub fn decay(&mut self, delta: Duration) {
        let delta_bytes = f64::from(self.net_speed) * delta.as_secs_f64();
        self.queued_bytes -= delta_bytes as i64;
        let allowed_lag = 2.0 * delta_bytes;
        if (self.queued_bytes as f64) < -allowed_lag {
            self.queued_bytes = -(allowed_lag as i64);
        }
    }

    /// Returns whether `pending_bytes` more may be sent without exceeding the budget.
    ///
    /// With `saturate` set the outstanding debt is rebased so that exactly
    /// the pending bytes fit, discarding any banked credit or debt.
    pub fn is_net_ready(&mut self, saturate: bool, pending_bytes: usize) -> bool {
        if saturate {
            self.queued_bytes = -(pending_bytes as i64);
        }
        self.queued_bytes + pending_bytes as i64 <= 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sent_bytes_create_debt() {
        let mut pacing = Pacing::new(2600);
        pacing.record_sent(540);
        assert_eq!(pacing.queued_bytes(), 540);
        assert!(!pacing.is_net_ready(false, 0));
    }

    #[test]
    fn test_decay_pays_back_debt() {
        let mut pacing = Pacing::new(1000);
        pacing.record_sent(500);
        pacing.decay(Duration::from_millis(250));
        assert_eq!(pacing.queued_bytes(), 250);
        pacing.decay(Duration::from_millis(250));
        assert_eq!(pacing.queued_bytes(), 0);
        assert!(pacing.is_net_ready(false, 0));
    }

    #[test]
    fn test_decay_clamps_credit() {
        let mut pacing = Pacing::new(1000);
        for _ in 0..10 {
            pacing.decay(Duration::from_millis(100));
        }
        assert_eq!(pacing.queued_bytes(), -200);
        assert!(pacing.is_net_ready(false, 200));
        assert!(!pacing.is_net_ready(false, 201));
    }

    #[test]
    fn test_saturate_rebases_debt() {
        let mut pacing = Pacing::new(1000);
        pacing.record_sent(10_000);
        assert!(!pacing.is_net_ready(false, 100));
        assert!(pacing.is_net_ready(true, 100));
        assert_eq!(pacing.queued_bytes(), -100);
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn decay_never_banks_more_than_two_ticks(
                speed in 1800u32..100_000,
                steps in proptest::collection::vec((0usize..2000, 1u64..200), 1..50),
            ) {
                let mut pacing = Pacing::new(speed);
                for (sent, millis) in steps {
                    pacing.record_sent(sent);
                    let delta = Duration::from_millis(millis);
                    pacing.decay(delta);
                    let floor = -2.0 * f64::from(speed) * delta.as_secs_f64();
                    prop_assert!(pacing.queued_bytes() as f64 >= floor - 1.0);
                }
            }

            #[test]
            fn sending_at_speed_stays_near_zero(speed in 1800u32..50_000, ticks in 10usize..200) {
                let mut pacing = Pacing::new(speed);
                let per_tick = speed as usize / 10;
                for _ in 0..ticks {
                    pacing.record_sent(per_tick);
                    pacing.decay(Duration::from_millis(100));
                }
                prop_assert!(pacing.queued_bytes().abs() <= i64::from(speed) / 5);
            }
        }
    }
}
