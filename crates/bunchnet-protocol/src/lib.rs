#![warn(missing_docs)]

//! bunchnet-protocol: the wire level building blocks.
//!
//! - `sequence`: unwrapping truncated packet ids and channel sequences
//! - `bit_stream`: bounds-checked bit writer and reader
//! - `bunch`: bunch header codec and in/out bunch types
//! - `lag_ring`: send-time ring used for lag sampling

/// Bit-granular packet buffers.
pub mod bit_stream;
/// Bunch types and header codec.
pub mod bunch;
/// Send-time ring buffer.
pub mod lag_ring;
/// Modular sequence arithmetic.
pub mod sequence;

pub use bit_stream::{BitReader, BitWriter};
pub use bunch::{BunchHeader, ChannelType, InBunch, OutBunch};
pub use lag_ring::LagRing;
pub use sequence::{PacketId, PacketSequencer, Resolved};
