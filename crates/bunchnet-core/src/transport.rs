//! Transport abstraction for pluggable datagram I/O.

use std::{io::Result, net::SocketAddr};

/// Unreliable datagram transport a driver sends and receives packets through.
///
/// Sending is fire-and-forget; receiving is polled. Implementations exist for
/// real UDP sockets and for in-memory links used by tests.
pub trait Transport {
    /// Sends one datagram to `addr`.
    fn send_datagram(&mut self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives one datagram into `buffer`, returning the filled slice and the sender.
    ///
    /// A non-blocking transport with nothing queued returns `ErrorKind::WouldBlock`.
    fn receive_datagram<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// Returns the address this transport is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Returns whether receive calls block until a datagram arrives.
    fn is_blocking_mode(&self) -> bool;
}
