#![warn(missing_docs)]

//! bunchnet-connection: channels and the connection state machine.
//!
//! A [`Connection`] multiplexes [`Channel`]s over one unreliable datagram
//! path. It frames bunches and acks into packets, infers loss from gaps in
//! the ack stream, retransmits reliable bunches and paces itself against a
//! bandwidth budget. Time is always passed in, so a connection can be driven
//! by a real socket loop or stepped by hand in tests.

/// A multiplexed logical stream and its reliable bookkeeping.
pub mod channel;
/// Fixed-capacity channel slot table.
pub mod channel_table;
mod connection;
mod connection_state;
/// Collaborators a connection calls out to for channel behavior.
pub mod handler;
mod pacing;
/// Simulated loss, duplication, reordering and lag.
pub mod simulation;
/// Traffic counters and derived quality figures.
pub mod statistics;

pub use channel::{Channel, ReliableCounters, ReliableRecord};
pub use channel_table::ChannelTable;
pub use connection::Connection;
pub use connection_state::ConnectionState;
pub use handler::{
    AcceptAll, ChannelHandler, ChannelNotify, ChannelRegistry, ChannelRequest, DiscardHandler,
    FnRegistry,
};
pub use pacing::Pacing;
pub use statistics::{ConnectionStats, FrameTimer, NetQuality};
