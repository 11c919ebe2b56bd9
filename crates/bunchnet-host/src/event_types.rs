//! User-facing events emitted by the driver.
//!
//! Every event names the remote address it concerns. Bunch payloads are
//! copied out of the connection so the event can outlive the packet.

use std::net::SocketAddr;

use bunchnet_protocol::ChannelType;

/// A bunch delivered to the application.
///
/// Reliable bunches arrive exactly once and in channel order; unreliable ones
/// as they come.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    /// Remote end the bunch came from.
    pub addr: SocketAddr,
    /// Channel the bunch arrived on.
    pub ch_index: usize,
    /// Type of that channel.
    pub ch_type: ChannelType,
    /// Whether it was sent reliably.
    pub reliable: bool,
    /// Payload bytes, zero padded past `num_bits`.
    pub data: Vec<u8>,
    /// Payload length in bits.
    pub num_bits: usize,
}

/// Events pushed through the driver's event receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    /// A connection finished its handshake.
    Connected(SocketAddr),
    /// A bunch carrying data arrived.
    Bunch(Delivery),
    /// A connection was closed, by either side, and removed.
    Closed(SocketAddr),
    /// A connection heard nothing for too long and was removed.
    TimedOut(SocketAddr),
}

impl DriverEvent {
    /// Returns event address.
    pub fn addr(&self) -> SocketAddr {
        match self {
            DriverEvent::Connected(addr) => *addr,
            DriverEvent::Bunch(delivery) => delivery.addr,
            DriverEvent::Closed(addr) => *addr,
            DriverEvent::TimedOut(addr) => *addr,
        }
    }
}
