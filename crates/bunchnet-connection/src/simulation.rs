//! Simulated network conditions for outgoing packets.
//!
//! Used to exercise loss, duplication, reordering and lag handling without a
//! misbehaving network. The simulator sits between a connection's packet
//! assembler and its outbox.

use std::time::{Duration, Instant};

use bunchnet_core::config::PacketSimulationSettings;
use rand::{rngs::StdRng, Rng, SeedableRng};

#[derive(Debug)]
struct DelayedPacket {
    release_at: Instant,
    data: Vec<u8>,
}

/// Applies [`PacketSimulationSettings`] to a stream of outgoing packets.
#[derive(Debug)]
pub struct NetworkSimulator {
    settings: PacketSimulationSettings,
    rng: StdRng,
    held: Option<Vec<u8>>,
    delayed: Vec<DelayedPacket>,
    dropped: u64,
}

impl NetworkSimulator {
    /// Creates a simulator; a configured seed makes its decisions repeatable.
    pub fn new(settings: PacketSimulationSettings) -> Self {
        let seed = settings.seed.unwrap_or_else(rand::random);
        Self {
            settings,
            rng: StdRng::seed_from_u64(seed),
            held: None,
            delayed: Vec::new(),
            dropped: 0,
        }
    }

    /// Packets dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Packets waiting for their simulated lag to pass.
    pub fn delayed(&self) -> usize {
        self.delayed.len() + usize::from(self.held.is_some())
    }

    fn roll(&mut self, percent: u8) -> bool {
        percent > 0 && self.rng.random_range(0..100u8) < percent
    }

    /// Passes one packet through; whatever may go out right away lands in `out`.
    pub fn send(&mut self, data: Vec<u8>, now: Instant, out: &mut Vec<Vec<u8>>) {
        if self.roll(self.settings.loss_percent) {
            self.dropped += 1;
            tracing::debug!("Simulated loss of a {} byte packet", data.len());
            return;
        }
        if self.roll(self.settings.duplicate_percent) {
            self.route(data.clone(), now, out);
        }
        self.route(data, now, out);
    }

    fn route(&mut self, data: Vec<u8>, now: Instant, out: &mut Vec<Vec<u8>>) {
        let lag = self.settings.lag + self.variance();
        if !lag.is_zero() {
            self.delayed.push(DelayedPacket { release_at: now + lag, data });
        } else if self.settings.reorder {
            match self.held.take() {
                Some(held) => {
                    out.push(data);
                    out.push(held);
                }
                None => self.held = Some(data),
            }
        } else {
            out.push(data);
        }
    }

    fn variance(&mut self) -> Duration {
        let max = self.settings.lag_variance.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(self.rng.random_range(0..=max))
    }

    /// Releases held and delayed packets that are due, earliest first.
    pub fn release(&mut self, now: Instant, out: &mut Vec<Vec<u8>>) {
        if let Some(held) = self.held.take() {
            out.push(held);
        }
        self.delayed.sort_by_key(|packet| packet.release_at);
        let due = self.delayed.partition_point(|packet| packet.release_at <= now);
        out.extend(self.delayed.drain(..due).map(|packet| packet.data));
    }

    /// Discards everything still in flight.
    pub fn clear(&mut self) {
        self.held = None;
        self.delayed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> PacketSimulationSettings {
        PacketSimulationSettings { seed: Some(7), ..Default::default() }
    }

    #[test]
    fn test_passthrough_without_effects() {
        let mut simulator = NetworkSimulator::new(settings());
        let mut out = Vec::new();
        simulator.send(vec![1], Instant::now(), &mut out);
        assert_eq!(out, vec![vec![1]]);
    }

    #[test]
    fn test_full_loss_drops_everything() {
        let mut simulator =
            NetworkSimulator::new(PacketSimulationSettings { loss_percent: 100, ..settings() });
        let mut out = Vec::new();
        for i in 0..10 {
            simulator.send(vec![i], Instant::now(), &mut out);
        }
        assert!(out.is_empty());
        assert_eq!(simulator.dropped(), 10);
    }

    #[test]
    fn test_full_duplication_doubles() {
        let mut simulator =
            NetworkSimulator::new(PacketSimulationSettings { duplicate_percent: 100, ..settings() });
        let mut out = Vec::new();
        simulator.send(vec![4], Instant::now(), &mut out);
        assert_eq!(out, vec![vec![4], vec![4]]);
    }

    #[test]
    fn test_reorder_swaps_pairs() {
        let mut simulator =
            NetworkSimulator::new(PacketSimulationSettings { reorder: true, ..settings() });
        let now = Instant::now();
        let mut out = Vec::new();
        simulator.send(vec![1], now, &mut out);
        assert!(out.is_empty());
        simulator.send(vec![2], now, &mut out);
        assert_eq!(out, vec![vec![2], vec![1]]);

        simulator.send(vec![3], now, &mut out);
        simulator.release(now, &mut out);
        assert_eq!(out.last(), Some(&vec![3]));
    }

    #[test]
    fn test_lag_delays_until_due() {
        let mut simulator = NetworkSimulator::new(PacketSimulationSettings {
            lag: Duration::from_millis(100),
            ..settings()
        });
        let now = Instant::now();
        let mut out = Vec::new();
        simulator.send(vec![9], now, &mut out);
        simulator.release(now + Duration::from_millis(50), &mut out);
        assert!(out.is_empty());
        assert_eq!(simulator.delayed(), 1);
        simulator.release(now + Duration::from_millis(100), &mut out);
        assert_eq!(out, vec![vec![9]]);
    }
}
