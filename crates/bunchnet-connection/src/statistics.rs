//! Per-connection traffic counters.
//!
//! A [`ConnectionStats`] is owned by its connection and drained by the
//! driver at the end of every tick, which folds it into driver-wide totals.

use std::{
    ops::{AddAssign, Sub},
    time::{Duration, Instant},
};

/// Traffic counters accumulated by one connection since they were last taken.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    /// Bytes received, including per-packet overhead.
    pub in_bytes: u64,
    /// Bytes sent, including per-packet overhead.
    pub out_bytes: u64,
    /// Packets received.
    pub in_packets: u64,
    /// Packets sent.
    pub out_packets: u64,
    /// Bunches dispatched to channels.
    pub in_bunches: u64,
    /// Bunches framed into packets, retransmissions included.
    pub out_bunches: u64,
    /// Gaps in the incoming packet id sequence.
    pub in_packets_lost: u64,
    /// Outgoing packets inferred lost from gaps in the ack stream.
    pub out_packets_lost: u64,
    /// Packets that arrived at or behind the highest id seen.
    pub in_out_of_order_packets: u64,
    /// Reliable bunches sent again after their packet was lost.
    pub out_retransmits: u64,
    /// Ack frames received, including acks for packets never sent.
    pub in_acks: u64,
}

impl ConnectionStats {
    /// Fraction of outgoing packets inferred lost (0.0 to 1.0).
    pub fn out_loss_rate(&self) -> f32 {
        if self.out_packets == 0 {
            return 0.0;
        }
        self.out_packets_lost as f32 / self.out_packets as f32
    }

    /// Fraction of incoming packets missing from the id sequence (0.0 to 1.0).
    pub fn in_loss_rate(&self) -> f32 {
        let expected = self.in_packets + self.in_packets_lost;
        if expected == 0 {
            return 0.0;
        }
        self.in_packets_lost as f32 / expected as f32
    }

    /// Resets all statistics counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl AddAssign for ConnectionStats {
    fn add_assign(&mut self, other: Self) {
        self.in_bytes += other.in_bytes;
        self.out_bytes += other.out_bytes;
        self.in_packets += other.in_packets;
        self.out_packets += other.out_packets;
        self.in_bunches += other.in_bunches;
        self.out_bunches += other.out_bunches;
        self.in_packets_lost += other.in_packets_lost;
        self.out_packets_lost += other.out_packets_lost;
        self.in_out_of_order_packets += other.in_out_of_order_packets;
        self.out_retransmits += other.out_retransmits;
        self.in_acks += other.in_acks;
    }
}

impl Sub for ConnectionStats {
    type Output = ConnectionStats;

    fn sub(self, earlier: Self) -> Self::Output {
        ConnectionStats {
            in_bytes: self.in_bytes.saturating_sub(earlier.in_bytes),
            out_bytes: self.out_bytes.saturating_sub(earlier.out_bytes),
            in_packets: self.in_packets.saturating_sub(earlier.in_packets),
            out_packets: self.out_packets.saturating_sub(earlier.out_packets),
            in_bunches: self.in_bunches.saturating_sub(earlier.in_bunches),
            out_bunches: self.out_bunches.saturating_sub(earlier.out_bunches),
            in_packets_lost: self.in_packets_lost.saturating_sub(earlier.in_packets_lost),
            out_packets_lost: self.out_packets_lost.saturating_sub(earlier.out_packets_lost),
            in_out_of_order_packets: self
                .in_out_of_order_packets
                .saturating_sub(earlier.in_out_of_order_packets),
            out_retransmits: self.out_retransmits.saturating_sub(earlier.out_retransmits),
            in_acks: self.in_acks.saturating_sub(earlier.in_acks),
        }
    }
}

/// Smoothed frame time, averaged over windows of about one second.
#[derive(Debug, Clone)]
pub struct FrameTimer {
    last_tick: Instant,
    frame_time: Duration,
    cumulative: Duration,
    counted_frames: u32,
    average: Duration,
}

impl FrameTimer {
    const WINDOW: Duration = Duration::from_secs(1);

    /// Starts timing at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            last_tick: now,
            frame_time: Duration::ZERO,
            cumulative: Duration::ZERO,
            counted_frames: 0,
            average: Duration::ZERO,
        }
    }

    /// Records a tick at `now`.
    pub fn tick(&mut self, now: Instant) {
        self.frame_time = now.saturating_duration_since(self.last_tick);
        self.last_tick = now;
        self.cumulative += self.frame_time;
        self.counted_frames += 1;
        if self.cumulative > Self::WINDOW {
            self.average = self.cumulative / self.counted_frames;
            self.cumulative = Duration::ZERO;
            self.counted_frames = 0;
        }
    }

    /// Length of the most recent frame.
    pub fn frame_time(&self) -> Duration {
        self.frame_time
    }

    /// Average frame length over the last completed window.
    pub fn average_frame_time(&self) -> Duration {
        self.average
    }
}

/// Network quality figures refreshed once per stat period.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NetQuality {
    /// Average lag over the last period, in seconds.
    pub avg_lag: f32,
    /// Lowest average lag seen so far, in seconds.
    pub best_lag: f32,
    /// Incoming loss over the last period, in percent.
    pub in_loss_percent: f32,
    /// Outgoing loss over the last period, in percent.
    pub out_loss_percent: f32,
    /// Incoming bytes per second over the last period.
    pub in_bytes_per_second: f32,
    /// Outgoing bytes per second over the last period.
    pub out_bytes_per_second: f32,
}
