#![warn(missing_docs)]

//! bunchnet-host: net driver and UDP host over bunchnet connections.
//!
//! - `driver`: routes datagrams to connections, ticks them and emits events
//! - `socket`: `Host`, a driver bound to a UDP socket
//! - `time`: clock abstraction used to stamp every operation

/// Net driver owning many connections over one transport.
pub mod driver;
/// Event types emitted to the user (DriverEvent, Delivery).
pub mod event_types;
/// High-level socket API wrapping the net driver.
pub mod socket;
/// Driver-wide traffic totals.
pub mod stats;
/// Time utilities for the host.
pub mod time;

mod forwarding;

pub use driver::NetDriver;
pub use event_types::{Delivery, DriverEvent};
pub use socket::{Host, UdpTransport};
pub use stats::DriverStats;
pub use time::{Clock, ManualClock, SystemClock};
