#![warn(missing_docs)]

//! Bunchnet: a small public API facade for the workspace.
//!
//! This crate re-exports the types most applications need to exchange
//! reliable and unreliable bunches over multiplexed UDP channels:
//!
//! - Host and events (`Host`, `DriverEvent`, `Delivery`)
//! - Channel types (`ChannelType`)
//! - Core configuration and errors (`Config`, `ErrorKind`)
//!
//! The lower level pieces (`Connection`, `NetDriver`, the bit stream codec)
//! stay reachable for applications that run their own transport.
//!
//! Example
//! ```no_run
//! use bunchnet::{ChannelType, DriverEvent, Host};
//!
//! let mut host = Host::bind_any().unwrap();
//! let server = "127.0.0.1:9000".parse().unwrap();
//! host.connect(server).unwrap();
//!
//! // Channels may be opened and written to before the handshake completes.
//! let ch_index = host.open_channel(server, ChannelType::ACTOR).unwrap();
//! host.send(server, ch_index, b"hello", true).unwrap();
//!
//! loop {
//!     host.poll();
//!     while let Some(event) = host.recv() {
//!         if let DriverEvent::Bunch(delivery) = event {
//!             println!("{} bytes on channel {}", delivery.data.len(), delivery.ch_index);
//!         }
//!     }
//! }
//! ```

// Core config and errors
pub use bunchnet_core::{
    config::{Config, PacketSimulationSettings},
    error::{DecodingErrorKind, ErrorKind, Result},
    transport::Transport,
};
// Connection layer for custom drivers
pub use bunchnet_connection::{
    AcceptAll, Channel, ChannelHandler, ChannelNotify, ChannelRegistry, ChannelRequest,
    Connection, ConnectionState, ConnectionStats, NetQuality,
};
// Host: driver, socket and events
pub use bunchnet_host::{
    Clock, Delivery, DriverEvent, DriverStats, Host, ManualClock, NetDriver, SystemClock,
    UdpTransport,
};
// Protocol: bunches and the bit stream codec
pub use bunchnet_protocol::{BitReader, BitWriter, ChannelType, InBunch, OutBunch, PacketId};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{
        ChannelType, Config, Delivery, DriverEvent, DriverStats, ErrorKind, Host, Result,
    };
}
