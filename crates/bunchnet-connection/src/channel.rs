//! A multiplexed logical stream inside a connection.
//!
//! The channel keeps the reliable-delivery bookkeeping for one index:
//! outgoing reliable bunches stay queued as records until the packet that
//! carried them is acknowledged, and incoming reliable bunches are released
//! to the handler strictly in sequence.

use std::{
    collections::{BTreeMap, VecDeque},
    fmt,
    time::Instant,
};

use bunchnet_core::{
    constants::RELIABLE_BUFFER,
    error::{ErrorKind, Result},
};
use bunchnet_protocol::{ChannelType, InBunch, OutBunch, PacketId};

use crate::handler::{ChannelHandler, ChannelRequest};

/// Reliable sequence counters of one channel index.
///
/// They outlive the channel object so that a channel reopened at the same
/// index continues the sequence instead of restarting it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReliableCounters {
    /// Highest reliable sequence processed from the remote side.
    pub in_reliable: i32,
    /// Last reliable sequence assigned to an outgoing bunch.
    pub out_reliable: i32,
}

impl ReliableCounters {
    /// Returns true if any reliable traffic ever went through the index.
    pub fn was_used(&self) -> bool {
        self.in_reliable != 0 || self.out_reliable != 0
    }
}

/// Outgoing reliable bunch waiting for acknowledgment.
#[derive(Debug, Clone)]
pub struct ReliableRecord {
    bunch: OutBunch,
    acked: bool,
    resends: u32,
}

impl ReliableRecord {
    /// Packet the bunch was last sent in.
    pub fn packet_id(&self) -> Option<PacketId> {
        self.bunch.packet_id
    }

    /// Reliable sequence of the bunch.
    pub fn ch_sequence(&self) -> i32 {
        self.bunch.ch_sequence
    }

    /// Whether the carrying packet was acknowledged.
    pub fn is_acked(&self) -> bool {
        self.acked
    }

    /// Whether this record opened the channel.
    pub fn is_open(&self) -> bool {
        self.bunch.open
    }

    /// Whether this record closes the channel.
    pub fn is_close(&self) -> bool {
        self.bunch.close
    }

    /// Number of retransmissions so far.
    pub fn resends(&self) -> u32 {
        self.resends
    }
}

/// One logical channel of a connection.
pub struct Channel {
    index: usize,
    ch_type: ChannelType,
    opened_locally: bool,
    open_acked: bool,
    open_packet_id: Option<PacketId>,
    open_temporary: bool,
    closing: bool,
    counters: ReliableCounters,
    out_records: VecDeque<ReliableRecord>,
    in_records: BTreeMap<i32, InBunch>,
    handler: Box<dyn ChannelHandler>,
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("index", &self.index)
            .field("ch_type", &self.ch_type)
            .field("opened_locally", &self.opened_locally)
            .field("open_acked", &self.open_acked)
            .field("open_packet_id", &self.open_packet_id)
            .field("closing", &self.closing)
            .field("counters", &self.counters)
            .field("out_records", &self.out_records.len())
            .field("in_records", &self.in_records.len())
            .finish()
    }
}

impl Channel {
    /// Creates a channel continuing the given sequence counters.
    pub fn new(
        index: usize,
        ch_type: ChannelType,
        opened_locally: bool,
        counters: ReliableCounters,
        handler: Box<dyn ChannelHandler>,
    ) -> Self {
        Self {
            index,
            ch_type,
            opened_locally,
            open_acked: false,
            open_packet_id: None,
            open_temporary: false,
            closing: false,
            counters,
            out_records: VecDeque::new(),
            in_records: BTreeMap::new(),
            handler,
        }
    }

    /// Index in the connection's channel table.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Channel type.
    pub fn ch_type(&self) -> ChannelType {
        self.ch_type
    }

    /// Whether this side opened the channel.
    pub fn opened_locally(&self) -> bool {
        self.opened_locally
    }

    /// Whether the open has been acknowledged (or, for remote opens, received).
    pub fn open_acked(&self) -> bool {
        self.open_acked
    }

    /// Packet that carried the opening bunch.
    pub fn open_packet_id(&self) -> Option<PacketId> {
        self.open_packet_id
    }

    /// Whether the channel was opened by an unreliable bunch.
    pub fn is_open_temporary(&self) -> bool {
        self.open_temporary
    }

    /// Whether a close bunch has been sent.
    pub fn is_closing(&self) -> bool {
        self.closing
    }

    /// Sequence counters.
    pub fn counters(&self) -> ReliableCounters {
        self.counters
    }

    /// Highest reliable sequence processed from the remote side.
    pub fn in_reliable(&self) -> i32 {
        self.counters.in_reliable
    }

    /// Last reliable sequence assigned locally.
    pub fn out_reliable(&self) -> i32 {
        self.counters.out_reliable
    }

    /// Unacknowledged outgoing reliable bunches, oldest first.
    pub fn out_records(&self) -> impl Iterator<Item = &ReliableRecord> {
        self.out_records.iter()
    }

    /// Number of unacknowledged outgoing reliable bunches.
    pub fn num_out_records(&self) -> usize {
        self.out_records.len()
    }

    /// Number of reliable bunches buffered ahead of a sequence gap.
    pub fn num_in_records(&self) -> usize {
        self.in_records.len()
    }

    /// Fills in the channel fields of `bunch` before it is framed.
    ///
    /// Nothing is committed here; the channel only changes once the bunch
    /// was actually framed and handed to [`Channel::commit_send`].
    pub(crate) fn prepare_send(&self, bunch: &mut OutBunch) -> Result<()> {
        if self.closing {
            return Err(ErrorKind::ChannelClosing(self.index));
        }
        bunch.ch_index = self.index;
        bunch.ch_type = self.ch_type;
        let opening = self.open_packet_id.is_none() && self.opened_locally;
        if opening {
            bunch.open = true;
        }
        let temporary = if opening { !bunch.reliable } else { self.open_temporary };
        if temporary && bunch.reliable {
            return Err(ErrorKind::ReliableOnTemporaryChannel(self.index));
        }
        if bunch.reliable {
            let limit = RELIABLE_BUFFER - 1 + usize::from(bunch.close);
            if self.out_records.len() >= limit {
                return Err(ErrorKind::ReliableBufferOverflow(self.index));
            }
            bunch.ch_sequence = self.counters.out_reliable + 1;
        }
        Ok(())
    }

    /// Records a bunch that was framed into `packet_id`.
    pub(crate) fn commit_send(&mut self, bunch: OutBunch, packet_id: PacketId) {
        if self.open_packet_id.is_none() && self.opened_locally {
            self.open_packet_id = Some(packet_id);
            self.open_temporary = !bunch.reliable;
        }
        if bunch.close {
            self.closing = true;
        }
        if bunch.reliable {
            self.counters.out_reliable = bunch.ch_sequence;
            self.out_records.push_back(ReliableRecord { bunch, acked: false, resends: 0 });
        }
    }

    /// Marks everything carried by `packet_id` as acknowledged.
    pub(crate) fn received_ack(&mut self, packet_id: PacketId) {
        for record in self.out_records.iter_mut() {
            if record.bunch.packet_id == Some(packet_id) {
                record.acked = true;
                if record.bunch.open {
                    self.open_acked = true;
                }
            }
        }
        if self.open_packet_id == Some(packet_id) {
            self.open_acked = true;
        }
    }

    /// Treats every outstanding record as acknowledged.
    pub(crate) fn ack_everything(&mut self) {
        for record in self.out_records.iter_mut() {
            record.acked = true;
        }
        self.open_acked = true;
    }

    /// Retires the acknowledged prefix of the outgoing records.
    ///
    /// Returns true once the channel is finished: its close was acknowledged
    /// in sequence, or it was a temporary channel whose single open was
    /// acknowledged or lost for good.
    pub(crate) fn received_acks(&mut self) -> bool {
        let mut do_close = false;
        while self.out_records.front().is_some_and(|record| record.acked) {
            if let Some(record) = self.out_records.pop_front() {
                do_close |= record.bunch.close;
            }
        }
        let temporary_done = self.open_temporary
            && (self.open_acked || (self.closing && self.open_packet_id.is_none()));
        do_close || temporary_done
    }

    /// Handles the loss of `packet_id`.
    ///
    /// Returns copies of the unacknowledged reliable bunches it carried; the
    /// connection sends them again and reports back through
    /// [`Channel::retransmitted`]. An unreliable open carried by the lost
    /// packet is forgotten so the next bunch opens the channel again.
    pub(crate) fn received_nak(&mut self, packet_id: PacketId) -> Vec<OutBunch> {
        let lost: Vec<OutBunch> = self
            .out_records
            .iter()
            .filter(|record| !record.acked && record.bunch.packet_id == Some(packet_id))
            .map(|record| record.bunch.clone())
            .collect();
        if self.open_packet_id == Some(packet_id) && !lost.iter().any(|bunch| bunch.open) {
            self.open_packet_id = None;
        }
        lost
    }

    /// Notes that the record with `ch_sequence` went out again in `packet_id`.
    pub(crate) fn retransmitted(&mut self, ch_sequence: i32, packet_id: PacketId, sent_at: Instant) {
        if let Some(record) =
            self.out_records.iter_mut().find(|record| record.bunch.ch_sequence == ch_sequence)
        {
            record.bunch.packet_id = Some(packet_id);
            record.bunch.sent_at = Some(sent_at);
            record.resends += 1;
            if record.bunch.open {
                self.open_packet_id = Some(packet_id);
            }
        }
    }

    /// Marks the channel open on behalf of the remote side.
    pub(crate) fn remote_opened(&mut self, packet_id: PacketId) {
        self.open_acked = true;
        self.open_packet_id = Some(packet_id);
    }

    /// Accepts a bunch that passed the connection's sequence gate.
    ///
    /// Reliable bunches ahead of the next expected sequence are parked until
    /// the gap is filled. Returns true once a close bunch has been processed
    /// and the channel should be destroyed.
    pub(crate) fn received_raw_bunch(&mut self, bunch: InBunch) -> Result<bool> {
        if bunch.reliable && bunch.ch_sequence != self.counters.in_reliable + 1 {
            debug_assert!(bunch.ch_sequence > self.counters.in_reliable);
            if !self.in_records.contains_key(&bunch.ch_sequence) {
                if self.in_records.len() >= RELIABLE_BUFFER {
                    return Err(ErrorKind::ReliableBufferOverflow(self.index));
                }
                self.in_records.insert(bunch.ch_sequence, bunch);
            }
            return Ok(false);
        }

        if self.received_next_bunch(&bunch) {
            return Ok(true);
        }
        while let Some(entry) = self.in_records.first_entry() {
            if *entry.key() != self.counters.in_reliable + 1 {
                break;
            }
            let next = entry.remove();
            if self.received_next_bunch(&next) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn received_next_bunch(&mut self, bunch: &InBunch) -> bool {
        if bunch.reliable {
            self.counters.in_reliable = bunch.ch_sequence;
        }
        if !self.closing {
            self.handler.received_bunch(bunch);
        }
        if bunch.close {
            if let Some(pending) = self.in_records.keys().next() {
                tracing::warn!(
                    "Channel {} closed at sequence {} with sequence {} still buffered",
                    self.index,
                    bunch.ch_sequence,
                    pending
                );
            }
            return true;
        }
        false
    }

    pub(crate) fn tick(&mut self) -> ChannelRequest {
        self.handler.tick()
    }

    /// Releases the channel and tells its handler.
    pub(crate) fn destroy(mut self) {
        self.handler.closed();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use bunchnet_protocol::BunchHeader;

    use super::*;

    #[derive(Default, Clone)]
    struct Recorder {
        received: Arc<Mutex<Vec<i32>>>,
        closed: Arc<Mutex<bool>>,
    }

    impl ChannelHandler for Recorder {
        fn received_bunch(&mut self, bunch: &InBunch) {
            self.received.lock().unwrap().push(bunch.ch_sequence);
        }

        fn closed(&mut self) {
            *self.closed.lock().unwrap() = true;
        }
    }

    fn channel(opened_locally: bool) -> (Channel, Recorder) {
        let recorder = Recorder::default();
        let channel = Channel::new(
            3,
            ChannelType::ACTOR,
            opened_locally,
            ReliableCounters::default(),
            Box::new(recorder.clone()),
        );
        (channel, recorder)
    }

    fn in_bunch(ch_sequence: i32, reliable: bool, close: bool) -> InBunch {
        let header = BunchHeader {
            ch_index: 3,
            ch_type: ChannelType::ACTOR,
            wire_sequence: None,
            open: false,
            close,
            reliable,
            num_bits: 0,
        };
        InBunch::new(&header, ch_sequence, 0, Vec::new())
    }

    fn send(channel: &mut Channel, reliable: bool, packet_id: PacketId) -> Result<OutBunch> {
        let mut bunch = OutBunch::new(0, ChannelType::NONE, 64);
        bunch.reliable = reliable;
        channel.prepare_send(&mut bunch)?;
        bunch.packet_id = Some(packet_id);
        channel.commit_send(bunch.clone(), packet_id);
        Ok(bunch)
    }

    #[test]
    fn test_first_local_bunch_opens_channel() {
        let (mut channel, _) = channel(true);
        let first = send(&mut channel, true, 10).unwrap();
        assert!(first.open);
        assert_eq!(first.ch_index, 3);
        assert_eq!(first.ch_sequence, 1);
        assert_eq!(channel.open_packet_id(), Some(10));

        let second = send(&mut channel, true, 11).unwrap();
        assert!(!second.open);
        assert_eq!(second.ch_sequence, 2);
        assert_eq!(channel.out_reliable(), 2);
        assert_eq!(channel.num_out_records(), 2);
    }

    #[test]
    fn test_remote_channel_never_sets_open() {
        let (mut channel, _) = channel(false);
        let bunch = send(&mut channel, false, 4).unwrap();
        assert!(!bunch.open);
        assert_eq!(channel.open_packet_id(), None);
    }

    #[test]
    fn test_acked_prefix_is_retired() {
        let (mut channel, _) = channel(true);
        send(&mut channel, true, 1).unwrap();
        send(&mut channel, true, 2).unwrap();
        send(&mut channel, true, 3).unwrap();

        channel.received_ack(2);
        assert!(!channel.received_acks());
        assert_eq!(channel.num_out_records(), 3);

        channel.received_ack(1);
        assert!(channel.open_acked());
        assert!(!channel.received_acks());
        assert_eq!(channel.num_out_records(), 1);
        assert_eq!(channel.out_records().next().map(|r| r.ch_sequence()), Some(3));
    }

    #[test]
    fn test_acked_close_finishes_channel() {
        let (mut channel, _) = channel(true);
        send(&mut channel, true, 1).unwrap();
        let mut close = OutBunch::new(0, ChannelType::NONE, 0);
        close.reliable = true;
        close.close = true;
        channel.prepare_send(&mut close).unwrap();
        channel.commit_send(close.clone(), 2);
        assert!(channel.is_closing());
        assert!(send(&mut channel, false, 3).is_err());

        channel.received_ack(2);
        assert!(!channel.received_acks(), "close must wait for earlier records");
        channel.received_ack(1);
        assert!(channel.received_acks());
    }

    #[test]
    fn test_nak_returns_unacked_records_for_resend() {
        let (mut channel, _) = channel(true);
        send(&mut channel, true, 5).unwrap();
        send(&mut channel, true, 6).unwrap();

        let lost = channel.received_nak(5);
        assert_eq!(lost.len(), 1);
        assert_eq!(lost[0].ch_sequence, 1);
        assert!(lost[0].open);

        channel.retransmitted(1, 9, Instant::now());
        assert_eq!(channel.open_packet_id(), Some(9));
        let record = channel.out_records().next().unwrap();
        assert_eq!(record.packet_id(), Some(9));
        assert_eq!(record.resends(), 1);
        assert!(channel.received_nak(5).is_empty());
    }

    #[test]
    fn test_temporary_channel_rejects_reliable_data() {
        let (mut channel, _) = channel(true);
        send(&mut channel, false, 1).unwrap();
        assert!(channel.is_open_temporary());
        assert!(matches!(
            send(&mut channel, true, 2),
            Err(ErrorKind::ReliableOnTemporaryChannel(3))
        ));
        channel.received_ack(1);
        assert!(channel.received_acks());
    }

    #[test]
    fn test_unreliable_open_lost_reopens() {
        let (mut channel, _) = channel(true);
        send(&mut channel, false, 1).unwrap();
        assert!(channel.received_nak(1).is_empty());
        assert_eq!(channel.open_packet_id(), None);
        assert!(!channel.received_acks());
        let again = send(&mut channel, false, 2).unwrap();
        assert!(again.open);
    }

    #[test]
    fn test_outgoing_reliable_buffer_limit() {
        let (mut channel, _) = channel(true);
        for packet_id in 0..(RELIABLE_BUFFER as i32 - 1) {
            send(&mut channel, true, packet_id).unwrap();
        }
        assert!(matches!(send(&mut channel, true, 500), Err(ErrorKind::ReliableBufferOverflow(3))));
    }

    #[test]
    fn test_reliable_bunches_are_reordered() {
        let (mut channel, recorder) = channel(false);
        assert!(!channel.received_raw_bunch(in_bunch(3, true, false)).unwrap());
        assert!(!channel.received_raw_bunch(in_bunch(2, true, false)).unwrap());
        assert_eq!(channel.num_in_records(), 2);
        assert!(recorder.received.lock().unwrap().is_empty());

        assert!(!channel.received_raw_bunch(in_bunch(1, true, false)).unwrap());
        assert_eq!(*recorder.received.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(channel.in_reliable(), 3);
        assert_eq!(channel.num_in_records(), 0);
    }

    #[test]
    fn test_unreliable_bunches_bypass_reordering() {
        let (mut channel, recorder) = channel(false);
        channel.received_raw_bunch(in_bunch(2, true, false)).unwrap();
        channel.received_raw_bunch(in_bunch(0, false, false)).unwrap();
        assert_eq!(*recorder.received.lock().unwrap(), vec![0]);
        assert_eq!(channel.in_reliable(), 0);
    }

    #[test]
    fn test_buffered_close_finishes_channel() {
        let (mut channel, recorder) = channel(false);
        assert!(!channel.received_raw_bunch(in_bunch(2, true, true)).unwrap());
        assert!(channel.received_raw_bunch(in_bunch(1, true, false)).unwrap());
        assert_eq!(*recorder.received.lock().unwrap(), vec![1, 2]);

        assert_eq!(channel.in_reliable(), 2);
        channel.destroy();
        assert!(*recorder.closed.lock().unwrap());
    }

    #[test]
    fn test_incoming_reorder_buffer_limit() {
        let (mut channel, _) = channel(false);
        for seq in 0..RELIABLE_BUFFER as i32 {
            channel.received_raw_bunch(in_bunch(seq + 2, true, false)).unwrap();
        }
        // Duplicates of buffered bunches are absorbed.
        channel.received_raw_bunch(in_bunch(2, true, false)).unwrap();
        assert!(matches!(
            channel.received_raw_bunch(in_bunch(RELIABLE_BUFFER as i32 + 2, true, false)),
            Err(ErrorKind::ReliableBufferOverflow(3))
        ));
    }

    #[test]
    fn test_counters_continue_across_instances() {
        let counters = ReliableCounters { in_reliable: 7, out_reliable: 4 };
        assert!(counters.was_used());
        let mut channel =
            Channel::new(1, ChannelType::ACTOR, true, counters, Box::new(Recorder::default()));
        let bunch = send(&mut channel, true, 0).unwrap();
        assert_eq!(bunch.ch_sequence, 5);
        assert!(!ReliableCounters::default().was_used());
    }
}
