use std::fmt::{self, Display};

use bunchnet_connection::ConnectionStats;

/// Totals across every connection a driver has owned.
///
/// Per-connection counters are taken at the end of each tick and folded in
/// here, so totals survive the connections they came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverStats {
    /// Traffic summed over all connections.
    pub traffic: ConnectionStats,
    /// Connections that completed their handshake.
    pub connections_opened: u64,
    /// Connections removed after closing.
    pub connections_closed: u64,
    /// Connections removed after a timeout.
    pub connections_timed_out: u64,
    /// Datagrams from new addresses turned away by the pending connection limit.
    pub connections_refused: u64,
    /// Datagrams the transport failed to send.
    pub send_errors: u64,
}

impl DriverStats {
    /// Folds one connection's counters into the totals.
    pub fn accumulate(&mut self, stats: ConnectionStats) {
        self.traffic += stats;
    }

    /// Resets all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

impl Display for DriverStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "in: {} packets / {} bytes, out: {} packets / {} bytes, retransmits: {}, opened: {}, closed: {}, timed out: {}",
            self.traffic.in_packets,
            self.traffic.in_bytes,
            self.traffic.out_packets,
            self.traffic.out_bytes,
            self.traffic.out_retransmits,
            self.connections_opened,
            self.connections_closed,
            self.connections_timed_out
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulate_sums_traffic() {
        let mut stats = DriverStats::default();
        let sample = ConnectionStats { in_packets: 2, out_packets: 3, out_bytes: 90, ..Default::default() };
        stats.accumulate(sample);
        stats.accumulate(sample);

        assert_eq!(stats.traffic.in_packets, 4);
        assert_eq!(stats.traffic.out_packets, 6);
        assert_eq!(stats.traffic.out_bytes, 180);
    }

    #[test]
    fn test_reset_clears_everything() {
        let mut stats = DriverStats { connections_opened: 3, send_errors: 1, ..Default::default() };
        stats.accumulate(ConnectionStats { in_bunches: 5, ..Default::default() });
        stats.reset();
        assert_eq!(stats, DriverStats::default());
    }

    #[test]
    fn test_display_names_counts() {
        let stats = DriverStats { connections_opened: 7, ..Default::default() };
        assert!(stats.to_string().contains("opened: 7"));
    }
}
