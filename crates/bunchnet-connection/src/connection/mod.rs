use std::{fmt, net::SocketAddr, time::Instant};

use bunchnet_core::{
    config::{effective_net_speed, Config},
    constants::{
        LAG_RING_SIZE, MAX_BUNCH_HEADER_BITS, MAX_PACKET_HEADER_BITS, MAX_PACKET_TRAILER_BITS,
    },
    error::{ErrorKind, Result},
};
use bunchnet_protocol::{BitWriter, ChannelType, LagRing, OutBunch, PacketId};
use tracing::debug;

use crate::{
    channel::Channel,
    channel_table::ChannelTable,
    connection_state::ConnectionState,
    handler::{ChannelNotify, ChannelRegistry},
    pacing::Pacing,
    simulation::NetworkSimulator,
    statistics::{ConnectionStats, FrameTimer, NetQuality},
};

mod inbound;
mod lifecycle;
mod outbound;

/// Bunch most recently framed into the current packet, kept while it may
/// still be extended by a merge.
#[derive(Debug)]
struct LastOut {
    start: usize,
    end: usize,
    bunch: OutBunch,
}

/// One end of a reliable multiplexed-channel link with a remote address.
///
/// Outgoing datagrams collect in an outbox that the owner drains with
/// [`Connection::drain_outgoing`] and hands to its transport; incoming
/// datagrams go in through [`Connection::received_raw_packet`]. Nothing in
/// here blocks or reads the clock: every operation takes the current time.
pub struct Connection {
    remote_address: SocketAddr,
    config: Config,
    state: ConnectionState,
    max_packet_bits: usize,

    /// Highest packet id received.
    in_packet_id: PacketId,
    /// Id of the packet currently being assembled.
    out_packet_id: PacketId,
    /// Highest packet id the remote side acknowledged.
    out_ack_packet_id: PacketId,

    channels: ChannelTable,
    registry: Box<dyn ChannelRegistry>,
    notify: Box<dyn ChannelNotify>,

    // Packet assembly
    out: BitWriter,
    allow_merge: bool,
    last_out: Option<LastOut>,
    time_sensitive: bool,
    queued_acks: Vec<PacketId>,
    resend_acks: Vec<PacketId>,
    outbox: Vec<Vec<u8>>,
    simulator: Option<NetworkSimulator>,

    // Timing
    last_receive_time: Instant,
    last_send_time: Instant,
    last_tick_time: Instant,
    stat_update_time: Instant,
    frame_timer: FrameTimer,
    pending_destroy: bool,
    timed_out: bool,

    // Accounting
    pacing: Pacing,
    lag_ring: LagRing,
    lag_acc: f64,
    lag_count: u32,
    quality: NetQuality,
    stats: ConnectionStats,
    taken_stats: ConnectionStats,
    period_stats: ConnectionStats,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("remote_address", &self.remote_address)
            .field("state", &self.state)
            .field("in_packet_id", &self.in_packet_id)
            .field("out_packet_id", &self.out_packet_id)
            .field("out_ack_packet_id", &self.out_ack_packet_id)
            .field("channels", &self.channels.len())
            .field("queued_bytes", &self.pacing.queued_bytes())
            .finish()
    }
}

impl Connection {
    /// Creates a pending connection to `remote_address`.
    pub fn new(
        remote_address: SocketAddr,
        config: &Config,
        registry: Box<dyn ChannelRegistry>,
        notify: Box<dyn ChannelNotify>,
        time: Instant,
    ) -> Connection {
        let max_packet_bits = config.max_packet_bits();
        let simulator = config
            .simulation
            .is_enabled()
            .then(|| NetworkSimulator::new(config.simulation.clone()));
        Connection {
            remote_address,
            config: config.clone(),
            state: ConnectionState::Pending,
            max_packet_bits,
            in_packet_id: -1,
            out_packet_id: 0,
            out_ack_packet_id: -1,
            channels: ChannelTable::new(config.channel_capacity()),
            registry,
            notify,
            out: BitWriter::new(max_packet_bits),
            allow_merge: false,
            last_out: None,
            time_sensitive: false,
            queued_acks: Vec::new(),
            resend_acks: Vec::new(),
            outbox: Vec::new(),
            simulator,
            last_receive_time: time,
            last_send_time: time,
            last_tick_time: time,
            stat_update_time: time,
            frame_timer: FrameTimer::new(time),
            pending_destroy: false,
            timed_out: false,
            pacing: Pacing::new(config.current_net_speed()),
            lag_ring: LagRing::with_capacity(LAG_RING_SIZE),
            lag_acc: 0.0,
            lag_count: 0,
            quality: NetQuality::default(),
            stats: ConnectionStats::default(),
            taken_stats: ConnectionStats::default(),
            period_stats: ConnectionStats::default(),
        }
    }

    /// Address of the remote end.
    pub fn remote_address(&self) -> SocketAddr {
        self.remote_address
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true once the control channel is up.
    pub fn is_established(&self) -> bool {
        self.state.is_established()
    }

    /// Returns true if the connection closed because nothing was received for too long.
    pub fn is_timed_out(&self) -> bool {
        self.timed_out
    }

    /// Configuration the connection was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Highest packet id received so far.
    pub fn in_packet_id(&self) -> PacketId {
        self.in_packet_id
    }

    /// Id the next flushed packet will carry.
    pub fn out_packet_id(&self) -> PacketId {
        self.out_packet_id
    }

    /// Highest of our packet ids the remote side has acknowledged.
    pub fn out_ack_packet_id(&self) -> PacketId {
        self.out_ack_packet_id
    }

    /// Capacity of one packet in bits.
    pub fn max_packet_bits(&self) -> usize {
        self.max_packet_bits
    }

    /// Bits assembled into the current, not yet flushed, packet.
    pub fn pending_bits(&self) -> usize {
        self.out.num_bits()
    }

    /// Whether a bunch may still be merged into the current packet.
    pub fn allow_merge(&self) -> bool {
        self.allow_merge
    }

    /// Whether bunches were framed since the last flush.
    pub fn is_time_sensitive(&self) -> bool {
        self.time_sensitive
    }

    /// Acks queued since the last flush.
    pub fn queued_acks(&self) -> &[PacketId] {
        &self.queued_acks
    }

    /// Acks that will be repeated by the next [`Connection::purge_acks`].
    pub fn resend_acks(&self) -> &[PacketId] {
        &self.resend_acks
    }

    /// Last time a packet arrived.
    pub fn last_receive_time(&self) -> Instant {
        self.last_receive_time
    }

    /// Last time a packet was flushed.
    pub fn last_send_time(&self) -> Instant {
        self.last_send_time
    }

    /// Outstanding pacing debt in bytes.
    pub fn queued_bytes(&self) -> i64 {
        self.pacing.queued_bytes()
    }

    /// Bandwidth the connection paces at, in bytes per second.
    pub fn current_net_speed(&self) -> u32 {
        self.pacing.net_speed()
    }

    /// Changes the pacing bandwidth; the same floor as the configured speed applies.
    pub fn set_net_speed(&mut self, net_speed: u32) {
        self.pacing.set_net_speed(effective_net_speed(net_speed));
    }

    /// Lag and loss figures from the last completed stat period.
    pub fn quality(&self) -> NetQuality {
        self.quality
    }

    /// Lifetime traffic counters.
    pub fn stats(&self) -> ConnectionStats {
        self.stats
    }

    /// Counters accumulated since the previous call; the driver folds these into its totals.
    pub fn take_stats(&mut self) -> ConnectionStats {
        let delta = self.stats - self.taken_stats;
        self.taken_stats = self.stats;
        delta
    }

    /// Smoothed frame time.
    pub fn frame_timer(&self) -> &FrameTimer {
        &self.frame_timer
    }

    /// Signals that the owner is about to tear the connection down, which
    /// shortens the receive timeout.
    pub fn set_pending_destroy(&mut self, pending_destroy: bool) {
        self.pending_destroy = pending_destroy;
    }

    /// Takes every datagram assembled since the last call.
    pub fn drain_outgoing(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbox)
    }

    /// Simulator applied to outgoing packets, if enabled.
    pub fn simulator(&self) -> Option<&NetworkSimulator> {
        self.simulator.as_ref()
    }

    // ===========================================================================
    // Channels
    // ===========================================================================

    /// The channel table.
    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    /// Channel at `index`.
    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    /// Creates a locally opened channel.
    ///
    /// Without an explicit index, control channels take index 0 and every
    /// other type the lowest free index above it. The channel is announced
    /// to the remote side by the first bunch sent on it.
    pub fn create_channel(&mut self, ch_type: ChannelType, index: Option<usize>) -> Result<usize> {
        if !self.state.is_active() {
            return Err(ErrorKind::ConnectionClosed);
        }
        let index = match index {
            Some(index) => index,
            None if ch_type == ChannelType::CONTROL => 0,
            None => self.channels.first_free(1).ok_or(ErrorKind::ChannelTableFull)?,
        };
        if index >= self.channels.capacity() {
            return Err(ErrorKind::ChannelIndexOutOfRange(index));
        }
        if self.channels.contains(index) {
            return Err(ErrorKind::ChannelInUse(index));
        }
        if !ch_type.is_encodable() || !self.registry.is_known_channel_type(ch_type) {
            return Err(ErrorKind::UnknownChannelType(ch_type.0));
        }
        let handler = self.registry.create_handler(ch_type, index);
        let counters = self.channels.counters(index);
        self.channels.insert(Channel::new(index, ch_type, true, counters, handler))?;
        debug!("Opened channel {} ({}) to {}", index, ch_type, self.remote_address);
        Ok(index)
    }

    /// Opens the control channel and sends its opening bunch.
    pub fn open_control_channel(&mut self, time: Instant) -> Result<PacketId> {
        let index = self.create_channel(ChannelType::CONTROL, Some(0))?;
        let mut bunch = self.create_bunch(index);
        bunch.reliable = true;
        self.send_bunch(index, bunch, false, time)
    }

    /// Creates an empty bunch for `ch_index` whose payload always fits one packet.
    pub fn create_bunch(&self, ch_index: usize) -> OutBunch {
        let ch_type = self.channels.get(ch_index).map_or(ChannelType::NONE, Channel::ch_type);
        let max_bits = self.max_packet_bits
            - MAX_PACKET_HEADER_BITS
            - MAX_BUNCH_HEADER_BITS
            - MAX_PACKET_TRAILER_BITS;
        OutBunch::new(ch_index, ch_type, max_bits)
    }

    /// Sends a bunch on channel `ch_index`.
    ///
    /// The first bunch on a locally opened channel opens it. Reliable bunches
    /// are assigned the channel's next sequence and kept until acknowledged.
    /// Returns the id of the packet the bunch went into.
    pub fn send_bunch(
        &mut self,
        ch_index: usize,
        mut bunch: OutBunch,
        allow_merge: bool,
        time: Instant,
    ) -> Result<PacketId> {
        if !self.state.is_active() {
            return Err(ErrorKind::ConnectionClosed);
        }
        let channel = self.channels.get(ch_index).ok_or(ErrorKind::ChannelNotFound(ch_index))?;
        if let Err(error) = channel.prepare_send(&mut bunch) {
            if let ErrorKind::ReliableBufferOverflow(index) = error {
                tracing::warn!(
                    "Outgoing reliable buffer overflow on channel {} to {}",
                    index,
                    self.remote_address
                );
                if ch_index == 0 {
                    self.state = ConnectionState::Closed;
                    self.flush_net(time)?;
                } else {
                    self.close(time)?;
                }
            }
            return Err(error);
        }
        let packet_id = self.send_raw_bunch(&mut bunch, allow_merge, time)?;
        if let Some(channel) = self.channels.get_mut(ch_index) {
            channel.commit_send(bunch, packet_id);
        }
        Ok(packet_id)
    }

    /// Starts closing channel `ch_index` by sending a close bunch.
    ///
    /// The channel is destroyed once the close is acknowledged. Closing a
    /// channel that is already closing, or on an inactive connection, does nothing.
    pub fn close_channel(&mut self, ch_index: usize, time: Instant) -> Result<()> {
        let channel = self.channels.get(ch_index).ok_or(ErrorKind::ChannelNotFound(ch_index))?;
        if channel.is_closing() || !self.state.is_active() {
            return Ok(());
        }
        let temporary = channel.is_open_temporary();
        let mut bunch = self.create_bunch(ch_index);
        bunch.reliable = !temporary;
        bunch.close = true;
        self.send_bunch(ch_index, bunch, false, time).map(|_| ())
    }

    pub(crate) fn destroy_channel(&mut self, index: usize) {
        if let Some(channel) = self.channels.remove(index) {
            debug!("Channel {} to {} destroyed", index, self.remote_address);
            channel.destroy();
            if index == 0 && !self.state.is_closed() {
                debug!("Control channel to {} closed, closing connection", self.remote_address);
                self.state = ConnectionState::Closed;
            }
        }
    }

    /// Promotes a pending connection once its control channel is open.
    fn update_state(&mut self) {
        if self.state == ConnectionState::Pending
            && self.channels.get(0).is_some_and(Channel::open_acked)
        {
            debug!("Connection to {} is open", self.remote_address);
            self.state = ConnectionState::Open;
        }
    }
}
