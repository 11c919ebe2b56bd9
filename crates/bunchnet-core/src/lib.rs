#![warn(missing_docs)]

//! bunchnet-core: foundational types shared by every layer.
//!
//! - Wire constants
//! - Configuration types
//! - Error handling
//! - Transport abstraction

/// Protocol constants shared across layers.
pub mod constants {
    /// Packet ids travel as 14-bit integers.
    pub const MAX_PACKET_ID: u32 = 16384;
    /// Reliable channel sequences travel as 10-bit integers.
    pub const MAX_CH_SEQUENCE: u32 = 1024;
    /// Number of addressable channel indices; index 0 is the control channel.
    pub const MAX_CHANNELS: usize = 1023;
    /// Exclusive upper bound of channel type ids on the wire.
    pub const CHTYPE_MAX: u32 = 8;
    /// Upper bound of the packet header (the packet id).
    pub const MAX_PACKET_HEADER_BITS: usize = 16;
    /// Room kept free at the end of every packet for the terminator bit.
    pub const MAX_PACKET_TRAILER_BITS: usize = 1;
    /// Upper bound of a data frame header.
    pub const MAX_BUNCH_HEADER_BITS: usize = 64;
    /// Maximum number of unacknowledged (or out of order) reliable bunches per channel.
    pub const RELIABLE_BUFFER: usize = 128;
    /// Number of packet send times remembered for lag sampling. Must be a power of two.
    pub const LAG_RING_SIZE: usize = 256;
    /// Net speed in bytes per second used when none is configured.
    pub const DEFAULT_NET_SPEED: u32 = 2600;
    /// Lowest net speed in bytes per second a connection will pace at.
    pub const MIN_NET_SPEED: u32 = 1800;
    /// Default maximum datagram size in bytes.
    pub const DEFAULT_MAX_PACKET: usize = 512;
    /// Default per-datagram transport overhead in bytes (IPv4 + UDP headers).
    pub const DEFAULT_PACKET_OVERHEAD: usize = 28;
    /// This is the current protocol version.
    pub const PROTOCOL_VERSION: u16 = 1;
}

/// Configuration options for the protocol and runtime.
pub mod config;
/// Error types and results.
pub mod error;
/// Transport abstraction for pluggable I/O.
pub mod transport;
