use std::{collections::HashMap, fmt, io, net::SocketAddr, time::Instant};

use bunchnet_connection::{AcceptAll, Connection};
use bunchnet_core::{
    config::Config,
    error::{ErrorKind, Result},
    transport::Transport,
};
use bunchnet_protocol::{ChannelType, PacketId};
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, warn};

use crate::{event_types::DriverEvent, forwarding::ForwardingRegistry, stats::DriverStats};

/// A connection plus what the driver has told the user about it.
#[derive(Debug)]
struct Remote {
    connection: Connection,
    announced: bool,
    outgoing: bool,
}

impl Remote {
    fn new(connection: Connection, outgoing: bool) -> Self {
        Self { connection, announced: false, outgoing }
    }

    /// Emits `Connected` the first time the connection is seen established.
    fn announce(&mut self, stats: &mut DriverStats, sender: &Sender<DriverEvent>) {
        if !self.announced && self.connection.is_established() {
            self.announced = true;
            stats.connections_opened += 1;
            emit(sender, DriverEvent::Connected(self.connection.remote_address()));
        }
    }
}

/// Owns every connection reachable through one transport.
///
/// Datagrams are routed to connections by source address. A well-formed
/// packet from an unknown address creates a new server-side connection, as
/// long as fewer than `max_pending_connections` connections are still
/// pending. Packets carrying acks are never from a new peer and are dropped.
/// A server-side connection that never opens its control channel expires
/// after `initial_connect_timeout` without any event.
pub struct NetDriver<T: Transport> {
    transport: T,
    config: Config,
    remotes: HashMap<SocketAddr, Remote>,
    receive_buffer: Vec<u8>,
    event_sender: Sender<DriverEvent>,
    event_receiver: Receiver<DriverEvent>,
    stats: DriverStats,
}

impl<T: Transport> fmt::Debug for NetDriver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetDriver")
            .field("transport", &"<transport>")
            .field("config", &self.config)
            .field("remotes", &self.remotes)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<T: Transport> NetDriver<T> {
    /// Creates a driver over `transport`.
    pub fn new(transport: T, config: Config) -> Self {
        let (event_sender, event_receiver) = unbounded();
        NetDriver {
            receive_buffer: vec![0; config.receive_buffer_max_size],
            transport,
            config,
            remotes: HashMap::new(),
            event_sender,
            event_receiver,
            stats: DriverStats::default(),
        }
    }

    /// Opens a connection to `addr` by sending its control channel open.
    ///
    /// Connecting to an address that already has a connection does nothing.
    /// The opening packet goes out on the next poll.
    pub fn connect(&mut self, addr: SocketAddr, time: Instant) -> Result<()> {
        if self.remotes.contains_key(&addr) {
            return Ok(());
        }
        let mut connection = new_connection(addr, &self.config, &self.event_sender, time);
        connection.open_control_channel(time)?;
        debug!("Connecting to {}", addr);
        self.remotes.insert(addr, Remote::new(connection, true));
        Ok(())
    }

    /// Opens a channel of `ch_type` on the connection to `addr` and returns its index.
    pub fn open_channel(&mut self, addr: SocketAddr, ch_type: ChannelType) -> Result<usize> {
        self.remote_connection(&addr)?.create_channel(ch_type, None)
    }

    /// Sends `data` as one bunch on channel `ch_index` of the connection to `addr`.
    ///
    /// Returns the id of the packet the bunch was written into. Unreliable
    /// data is refused with [`ErrorKind::NetSaturated`] while the connection
    /// is over its bandwidth budget; reliable data is always queued.
    pub fn send(
        &mut self,
        addr: SocketAddr,
        ch_index: usize,
        data: &[u8],
        reliable: bool,
        time: Instant,
    ) -> Result<PacketId> {
        let connection = self.remote_connection(&addr)?;
        if !reliable && !connection.is_net_ready(false) {
            debug!("Dropped unreliable bunch to {}: connection saturated", addr);
            return Err(ErrorKind::NetSaturated);
        }
        let mut bunch = connection.create_bunch(ch_index);
        bunch.reliable = reliable;
        bunch.payload_mut().write_bits(data, data.len() * 8)?;
        connection.send_bunch(ch_index, bunch, false, time)
    }

    /// Reports whether the connection to `addr` has bandwidth left.
    ///
    /// With `saturate` set, banked credit and debt are discarded so that
    /// exactly the data already waiting in the current packet fits.
    pub fn is_net_ready(&mut self, addr: SocketAddr, saturate: bool) -> Result<bool> {
        Ok(self.remote_connection(&addr)?.is_net_ready(saturate))
    }

    /// Starts closing channel `ch_index` on the connection to `addr`.
    pub fn close_channel(&mut self, addr: SocketAddr, ch_index: usize, time: Instant) -> Result<()> {
        self.remote_connection(&addr)?.close_channel(ch_index, time)
    }

    /// Closes the connection to `addr`. It is removed on the next poll.
    pub fn disconnect(&mut self, addr: SocketAddr, time: Instant) -> Result<()> {
        self.remote_connection(&addr)?.close(time)
    }

    /// Receives every queued datagram, ticks every connection and sends what
    /// they produced. Closed connections are cleaned up and removed.
    pub fn manual_poll(&mut self, time: Instant) {
        let mut pending_connections = self.pending_connection_count();

        loop {
            match self.transport.receive_datagram(self.receive_buffer.as_mut()) {
                Ok((payload, addr)) => {
                    if let Some(remote) = self.remotes.get_mut(&addr) {
                        if let Err(err) = remote.connection.received_raw_packet(payload, time) {
                            debug!("Dropped packet from {}: {}", addr, err);
                        }
                        remote.announce(&mut self.stats, &self.event_sender);
                    } else if pending_connections >= self.config.max_pending_connections as usize {
                        debug!("Refusing connection from {}: too many pending connections", addr);
                        self.stats.connections_refused += 1;
                    } else {
                        let mut connection =
                            new_connection(addr, &self.config, &self.event_sender, time);
                        let result = connection.received_raw_packet(payload, time);
                        if let Err(err) = &result {
                            debug!("Bad packet from unknown address {}: {}", addr, err);
                        }
                        if is_new_peer(&connection, result.is_ok()) {
                            debug!("Accepted connection from {}", addr);
                            let mut remote = Remote::new(connection, false);
                            remote.announce(&mut self.stats, &self.event_sender);
                            if !remote.connection.is_established() {
                                pending_connections += 1;
                            }
                            self.remotes.insert(addr, remote);
                        } else {
                            debug!("Ignoring packet from unknown address {}", addr);
                        }
                    }
                }
                Err(e) => {
                    if e.kind() != io::ErrorKind::WouldBlock {
                        error!("Encountered an error receiving data: {:?}", e);
                    }
                    break;
                }
            }
            if self.transport.is_blocking_mode() {
                break;
            }
        }

        let mut finished = Vec::new();
        for (addr, remote) in self.remotes.iter_mut() {
            if let Err(err) = remote.connection.tick(time) {
                warn!("Tick of connection to {} failed: {}", addr, err);
            }
            remote.announce(&mut self.stats, &self.event_sender);
            if remote.connection.state().is_closed() {
                if let Err(err) = remote.connection.clean_up(time) {
                    warn!("Cleaning up connection to {} failed: {}", addr, err);
                }
                finished.push(*addr);
            }
            for datagram in remote.connection.drain_outgoing() {
                if let Err(err) = self.transport.send_datagram(addr, &datagram) {
                    error!("Error occured sending a packet (to {}): {}", addr, err);
                    self.stats.send_errors += 1;
                }
            }
            self.stats.accumulate(remote.connection.take_stats());
        }

        for addr in finished {
            let Some(remote) = self.remotes.remove(&addr) else {
                continue;
            };
            let event = if remote.connection.is_timed_out() {
                self.stats.connections_timed_out += 1;
                DriverEvent::TimedOut(addr)
            } else {
                self.stats.connections_closed += 1;
                DriverEvent::Closed(addr)
            };
            debug!("Removed connection to {}", addr);
            if remote.announced || remote.outgoing {
                emit(&self.event_sender, event);
            }
        }
    }

    /// Returns the event receiver for driver events.
    pub fn event_receiver(&self) -> &Receiver<DriverEvent> {
        &self.event_receiver
    }

    /// Returns a reference to the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Returns a mutable reference to the underlying transport.
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Configuration new connections are created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Totals across every connection so far.
    pub fn stats(&self) -> &DriverStats {
        &self.stats
    }

    /// Returns the connection to `addr`, if any.
    pub fn connection(&self, addr: &SocketAddr) -> Option<&Connection> {
        self.remotes.get(addr).map(|remote| &remote.connection)
    }

    /// Returns a mutable reference to the connection to `addr`, if any.
    pub fn connection_mut(&mut self, addr: &SocketAddr) -> Option<&mut Connection> {
        self.remotes.get_mut(addr).map(|remote| &mut remote.connection)
    }

    /// Returns the number of live connections.
    pub fn connections_count(&self) -> usize {
        self.remotes.len()
    }

    /// Returns an iterator over all established connection addresses.
    pub fn established_connections(&self) -> impl Iterator<Item = &SocketAddr> {
        self.remotes.iter().filter(|(_, r)| r.connection.is_established()).map(|(addr, _)| addr)
    }

    /// Returns the number of established connections.
    pub fn established_connections_count(&self) -> usize {
        self.established_connections().count()
    }

    fn pending_connection_count(&self) -> usize {
        self.remotes.values().filter(|r| !r.connection.is_established()).count()
    }

    fn remote_connection(&mut self, addr: &SocketAddr) -> Result<&mut Connection> {
        self.connection_mut(addr).ok_or(ErrorKind::ConnectionClosed)
    }
}

fn new_connection(
    addr: SocketAddr,
    config: &Config,
    sender: &Sender<DriverEvent>,
    time: Instant,
) -> Connection {
    let registry = ForwardingRegistry::new(addr, sender.clone());
    Connection::new(addr, config, Box::new(registry), Box::new(AcceptAll), time)
}

/// Whether the first packet from an unknown address came from a peer starting
/// a new connection.
///
/// The packet id must have been read. A new peer has received nothing yet, so
/// a packet carrying acks belongs to a connection that was already removed.
fn is_new_peer(connection: &Connection, processed: bool) -> bool {
    (processed || !connection.queued_acks().is_empty())
        && connection.stats().in_acks == 0
        && !connection.state().is_closed()
}

fn emit(sender: &Sender<DriverEvent>, event: DriverEvent) {
    if let Err(err) = sender.send(event) {
        error!("Dropped event for {}: event receiver is gone", err.0.addr());
    }
}
