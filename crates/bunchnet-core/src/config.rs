use std::{default::Default, time::Duration};

use crate::constants::{
    DEFAULT_MAX_PACKET, DEFAULT_NET_SPEED, DEFAULT_PACKET_OVERHEAD, MAX_CHANNELS, MIN_NET_SPEED,
};

/// Network conditions to simulate on outgoing packets.
///
/// All percentages are in the range 0..=100. A zero value disables that
/// particular effect; [`PacketSimulationSettings::is_enabled`] reports whether
/// any effect is active at all.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PacketSimulationSettings {
    /// Chance that an outgoing packet is silently dropped.
    pub loss_percent: u8,
    /// Chance that an outgoing packet is sent twice.
    pub duplicate_percent: u8,
    /// Hold every other packet back and send it after its successor.
    pub reorder: bool,
    /// Fixed delay applied to every outgoing packet.
    pub lag: Duration,
    /// Random extra delay in `0..=lag_variance` added on top of `lag`.
    pub lag_variance: Duration,
    /// Seed for the simulator's random source. None seeds from the OS.
    pub seed: Option<u64>,
}

impl PacketSimulationSettings {
    /// Returns true when at least one simulated effect is active.
    pub fn is_enabled(&self) -> bool {
        self.loss_percent > 0
            || self.duplicate_percent > 0
            || self.reorder
            || !self.lag.is_zero()
            || !self.lag_variance.is_zero()
    }
}

#[derive(Clone, Debug)]
/// Configuration options to tune protocol and runtime behavior.
pub struct Config {
    /// Make the underlying UDP socket block when true, otherwise non-blocking.
    pub blocking_mode: bool,
    /// Max size of an outgoing datagram in bytes.
    pub max_packet: usize,
    /// Per-datagram lower layer overhead in bytes, charged against the pacing budget.
    pub packet_overhead: usize,
    /// Send a keep-alive packet when nothing was sent for this long.
    pub keep_alive_time: Duration,
    /// Receive timeout while a connection is still pending.
    pub initial_connect_timeout: Duration,
    /// Receive timeout once a connection is open.
    pub connection_timeout: Duration,
    /// Receive timeout once the owner has signalled that the connection is about to be torn down.
    pub pending_destroy_timeout: Duration,
    /// Interval at which lag and loss statistics are refreshed.
    pub stat_period: Duration,
    /// Configured bandwidth in bytes per second (0 = use the default speed).
    pub net_speed: u32,
    /// Treat every outgoing packet as acknowledged immediately (loopback / fully reliable links).
    pub internal_ack: bool,
    /// Number of channel slots per connection (1..=MAX_CHANNELS).
    pub max_channels: usize,
    /// Simulated network conditions for outgoing packets.
    pub simulation: PacketSimulationSettings,
    /// Max receive buffer size in bytes.
    pub receive_buffer_max_size: usize,
    /// Max number of pending (not yet open) inbound connections to prevent DoS.
    pub max_pending_connections: u16,
    /// Socket receive buffer size in bytes (None = use system default).
    /// Corresponds to SO_RCVBUF socket option.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = use system default).
    /// Corresponds to SO_SNDBUF socket option.
    pub socket_send_buffer_size: Option<usize>,
    /// Time-to-live for outgoing packets (None = use system default).
    /// Corresponds to IP_TTL socket option.
    pub socket_ttl: Option<u32>,
    /// Enable broadcast mode (default: false).
    /// Corresponds to SO_BROADCAST socket option.
    pub socket_broadcast: bool,
}

impl Config {
    /// Bandwidth the connection paces at, in bytes per second.
    pub fn current_net_speed(&self) -> u32 {
        effective_net_speed(self.net_speed)
    }

    /// Capacity of one outgoing packet in bits.
    pub fn max_packet_bits(&self) -> usize {
        self.max_packet * 8
    }

    /// Number of channel slots, clamped to the addressable range.
    pub fn channel_capacity(&self) -> usize {
        self.max_channels.clamp(1, MAX_CHANNELS)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            blocking_mode: false,
            max_packet: DEFAULT_MAX_PACKET,
            packet_overhead: DEFAULT_PACKET_OVERHEAD,
            keep_alive_time: Duration::from_millis(200),
            initial_connect_timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(15),
            pending_destroy_timeout: Duration::from_secs(2),
            stat_period: Duration::from_secs(1),
            net_speed: 0, // Falls back to DEFAULT_NET_SPEED
            internal_ack: false,
            max_channels: MAX_CHANNELS,
            simulation: PacketSimulationSettings::default(), // No simulated conditions
            receive_buffer_max_size: 1500,
            max_pending_connections: 50,
            socket_recv_buffer_size: None, // Use system default
            socket_send_buffer_size: None, // Use system default
            socket_ttl: None,              // Use system default
            socket_broadcast: false,       // Disabled by default
        }
    }
}

/// Applies the default and the floor to a requested bandwidth in bytes per second.
///
/// Zero selects the default speed.
pub fn effective_net_speed(net_speed: u32) -> u32 {
    if net_speed == 0 {
        DEFAULT_NET_SPEED
    } else {
        net_speed.max(MIN_NET_SPEED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_net_speed_defaults_when_unset() {
        let config = Config::default();
        assert_eq!(config.current_net_speed(), DEFAULT_NET_SPEED);
    }

    #[test]
    fn test_current_net_speed_has_floor() {
        let mut config = Config::default();
        config.net_speed = 100;
        assert_eq!(config.current_net_speed(), MIN_NET_SPEED);

        config.net_speed = 20_000;
        assert_eq!(config.current_net_speed(), 20_000);
    }

    #[test]
    fn test_effective_net_speed_matches_config() {
        for speed in [0, 1, MIN_NET_SPEED, 9_000] {
            let config = Config { net_speed: speed, ..Default::default() };
            assert_eq!(effective_net_speed(speed), config.current_net_speed());
        }
    }

    #[test]
    fn test_channel_capacity_is_clamped() {
        let mut config = Config::default();
        config.max_channels = 0;
        assert_eq!(config.channel_capacity(), 1);

        config.max_channels = 5000;
        assert_eq!(config.channel_capacity(), MAX_CHANNELS);
    }

    #[test]
    fn test_simulation_disabled_by_default() {
        let settings = PacketSimulationSettings::default();
        assert!(!settings.is_enabled());

        let lossy = PacketSimulationSettings { loss_percent: 5, ..Default::default() };
        assert!(lossy.is_enabled());
    }
}
