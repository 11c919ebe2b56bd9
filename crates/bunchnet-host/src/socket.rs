use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket},
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use bunchnet_core::{config::Config, error::Result, transport::Transport};
use bunchnet_protocol::{ChannelType, PacketId};
use crossbeam_channel::Receiver;
use socket2::Socket as Socket2;

use crate::{
    driver::NetDriver,
    event_types::DriverEvent,
    stats::DriverStats,
    time::{Clock, SystemClock},
};

/// UDP socket as a driver transport.
#[derive(Debug)]
pub struct UdpTransport {
    is_blocking_mode: bool,
    socket: UdpSocket,
}

impl UdpTransport {
    /// Wraps `socket` after applying the socket options in `config`.
    pub fn new(socket: UdpSocket, config: &Config) -> Result<Self> {
        Self::configure(&socket, config)?;
        socket.set_nonblocking(!config.blocking_mode)?;
        Ok(UdpTransport { is_blocking_mode: config.blocking_mode, socket })
    }

    fn configure(socket: &UdpSocket, config: &Config) -> io::Result<()> {
        // Buffer sizes are only reachable through socket2.
        let raw = Socket2::from(socket.try_clone()?);
        if let Some(size) = config.socket_recv_buffer_size {
            raw.set_recv_buffer_size(size)?;
        }
        if let Some(size) = config.socket_send_buffer_size {
            raw.set_send_buffer_size(size)?;
        }
        if let Some(ttl) = config.socket_ttl {
            socket.set_ttl(ttl)?;
        }
        if config.socket_broadcast {
            socket.set_broadcast(true)?;
        }
        Ok(())
    }
}

impl Transport for UdpTransport {
    fn send_datagram(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn receive_datagram<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        let (len, from) = self.socket.recv_from(buffer)?;
        Ok((&buffer[..len], from))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn is_blocking_mode(&self) -> bool {
        self.is_blocking_mode
    }
}

/// Net driver bound to one UDP socket.
///
/// Operations that need the current time read it from the host's [`Clock`].
pub struct Host {
    driver: NetDriver<UdpTransport>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").field("driver", &self.driver).finish()
    }
}

impl Host {
    /// Binds to `addresses` with the default configuration.
    pub fn bind<A: ToSocketAddrs>(addresses: A) -> Result<Self> {
        Self::bind_with_config(addresses, Config::default())
    }

    /// Binds to an ephemeral loopback port with the default configuration.
    pub fn bind_any() -> Result<Self> {
        Self::bind_any_with_config(Config::default())
    }

    /// Binds to an ephemeral loopback port.
    pub fn bind_any_with_config(config: Config) -> Result<Self> {
        Self::bind_with_config(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0), config)
    }

    /// Binds to `addresses`.
    pub fn bind_with_config<A: ToSocketAddrs>(addresses: A, config: Config) -> Result<Self> {
        Self::bind_with_config_and_clock(UdpSocket::bind(addresses)?, config, Arc::new(SystemClock))
    }

    /// Creates a host over an already bound `socket` that reads time from `clock`.
    pub fn bind_with_config_and_clock(
        socket: UdpSocket,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let transport = UdpTransport::new(socket, &config)?;
        Ok(Host { driver: NetDriver::new(transport, config), clock })
    }

    /// Opens a connection to `addr`. `DriverEvent::Connected` follows once
    /// the remote side acknowledged it.
    pub fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        self.driver.connect(addr, self.clock.now())
    }

    /// Opens a channel of `ch_type` to `addr` and returns its index.
    pub fn open_channel(&mut self, addr: SocketAddr, ch_type: ChannelType) -> Result<usize> {
        self.driver.open_channel(addr, ch_type)
    }

    /// Sends `data` as one bunch on channel `ch_index` to `addr`.
    ///
    /// The bunch is written into the current packet, which goes out on the next poll.
    /// Unreliable data fails with `ErrorKind::NetSaturated` when [`Host::is_net_ready`]
    /// would report false.
    pub fn send(
        &mut self,
        addr: SocketAddr,
        ch_index: usize,
        data: &[u8],
        reliable: bool,
    ) -> Result<PacketId> {
        self.driver.send(addr, ch_index, data, reliable, self.clock.now())
    }

    /// Reports whether the connection to `addr` has bandwidth left for unreliable data.
    pub fn is_net_ready(&mut self, addr: SocketAddr, saturate: bool) -> Result<bool> {
        self.driver.is_net_ready(addr, saturate)
    }

    /// Starts closing channel `ch_index` to `addr`.
    pub fn close_channel(&mut self, addr: SocketAddr, ch_index: usize) -> Result<()> {
        self.driver.close_channel(addr, ch_index, self.clock.now())
    }

    /// Closes the connection to `addr`.
    pub fn disconnect(&mut self, addr: SocketAddr) -> Result<()> {
        self.driver.disconnect(addr, self.clock.now())
    }

    /// A handle on the event stream, for consumers on other threads.
    pub fn get_event_receiver(&self) -> Receiver<DriverEvent> {
        self.driver.event_receiver().clone()
    }

    /// Receives the next available network event, if any.
    pub fn recv(&mut self) -> Option<DriverEvent> {
        self.driver.event_receiver().try_recv().ok()
    }

    /// Polls forever, sleeping `interval` between polls (blocking call).
    ///
    /// A zero interval yields to the scheduler instead of sleeping.
    pub fn start_polling(&mut self, interval: Duration) {
        loop {
            self.poll();
            if interval.is_zero() {
                thread::yield_now();
            } else {
                thread::sleep(interval);
            }
        }
    }

    /// Polls the socket once at the clock's current time.
    pub fn poll(&mut self) {
        self.manual_poll(self.clock.now());
    }

    /// Receives pending datagrams, ticks every connection and sends what they produced.
    pub fn manual_poll(&mut self, time: Instant) {
        self.driver.manual_poll(time);
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.driver.transport().local_addr()?)
    }

    /// Totals across every connection this host has owned.
    pub fn stats(&self) -> &DriverStats {
        self.driver.stats()
    }

    /// The driver behind this host.
    pub fn driver(&self) -> &NetDriver<UdpTransport> {
        &self.driver
    }

    /// Mutable access to the driver behind this host.
    pub fn driver_mut(&mut self) -> &mut NetDriver<UdpTransport> {
        &mut self.driver
    }

    /// Connections that finished their handshake.
    pub fn established_connections_count(&self) -> usize {
        self.driver.established_connections_count()
    }
}

#[cfg(test)]
mod tests {
    use bunchnet_core::error::ErrorKind;

    use super::*;

    #[test]
    fn test_bind_any_uses_loopback() {
        let host = Host::bind_any().unwrap();
        let addr = host.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[test]
    fn test_fresh_host_has_nothing_to_report() {
        let mut host = Host::bind_any().unwrap();
        host.poll();
        assert!(host.recv().is_none());
        assert_eq!(host.established_connections_count(), 0);
    }

    #[test]
    fn test_send_to_unknown_address_fails() {
        let mut host = Host::bind_any().unwrap();
        let result = host.send("127.0.0.1:9".parse().unwrap(), 1, b"x", true);
        assert!(result.is_err());
    }

    #[test]
    fn test_fresh_connection_is_not_net_ready() {
        let mut host = Host::bind_any().unwrap();
        let remote = "127.0.0.1:9".parse().unwrap();
        host.connect(remote).unwrap();
        let ch_index = host.open_channel(remote, ChannelType::ACTOR).unwrap();

        // The control channel open is waiting in the packet and nothing was paid back yet.
        assert!(!host.is_net_ready(remote, false).unwrap());
        let result = host.send(remote, ch_index, b"x", false);
        assert!(matches!(result, Err(ErrorKind::NetSaturated)));

        assert!(host.is_net_ready(remote, true).unwrap());
        assert!(host.send(remote, ch_index, b"x", false).is_ok());
    }

    #[test]
    fn test_custom_buffer_sizes_bind() {
        let config = Config {
            socket_recv_buffer_size: Some(65536),
            socket_send_buffer_size: Some(65536),
            socket_ttl: Some(32),
            ..Default::default()
        };
        let host = Host::bind_any_with_config(config);
        assert!(host.is_ok());
    }

    #[test]
    fn test_ttl_is_applied() {
        let config = Config { socket_ttl: Some(17), ..Default::default() };
        let transport = UdpTransport::new(UdpSocket::bind("127.0.0.1:0").unwrap(), &config).unwrap();
        assert_eq!(transport.socket.ttl().unwrap(), 17);
    }

    #[test]
    fn test_broadcast_is_applied() {
        let config = Config { socket_broadcast: true, ..Default::default() };
        let transport = UdpTransport::new(UdpSocket::bind("127.0.0.1:0").unwrap(), &config).unwrap();
        assert!(transport.socket.broadcast().unwrap());
    }

    #[test]
    fn test_blocking_mode_is_reported() {
        let config = Config { blocking_mode: true, ..Default::default() };
        let transport = UdpTransport::new(UdpSocket::bind("127.0.0.1:0").unwrap(), &config).unwrap();
        assert!(transport.is_blocking_mode());
    }
}
