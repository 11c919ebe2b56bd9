//! Packet assembly: framing bunches and acks into the outgoing buffer and
//! flushing finished packets.

use std::{mem, time::Instant};

use bunchnet_core::{
    constants::{MAX_BUNCH_HEADER_BITS, MAX_PACKET_ID, MAX_PACKET_TRAILER_BITS},
    error::{ErrorKind, Result},
};
use bunchnet_protocol::{bit_stream::int_bits, BitWriter, OutBunch, PacketId, PacketSequencer};

use super::{Connection, LastOut};

impl Connection {
    /// Makes room for `size_bits` in the current packet, flushing it first if
    /// needed, and starts a new packet with its id header.
    pub(crate) fn pre_send(&mut self, size_bits: usize, time: Instant) -> Result<()> {
        if self.out.num_bits() + size_bits + MAX_PACKET_TRAILER_BITS > self.max_packet_bits {
            self.flush_net(time)?;
        }
        if self.out.is_empty() {
            let header = PacketSequencer::PACKET_ID.wrap(self.out_packet_id);
            self.out.write_int(header, MAX_PACKET_ID)?;
        }
        let used = self.out.num_bits();
        if used + size_bits + MAX_PACKET_TRAILER_BITS > self.max_packet_bits {
            return Err(ErrorKind::SendOverflow {
                used,
                requested: size_bits,
                capacity: self.max_packet_bits,
            });
        }
        Ok(())
    }

    /// Flushes a packet that has no room left for even the trailer.
    pub(crate) fn post_send(&mut self, time: Instant) -> Result<()> {
        if self.out.num_bits() + MAX_PACKET_TRAILER_BITS >= self.max_packet_bits {
            self.flush_net(time)?;
        }
        Ok(())
    }

    /// Frames `bunch` into the current packet and returns the packet's id.
    ///
    /// The bunch's `packet_id` and `sent_at` are updated so the caller can
    /// match later acks and naks against it. Data that cannot fit in an empty
    /// packet is rejected with [`ErrorKind::SendOverflow`].
    pub(crate) fn send_raw_bunch(
        &mut self,
        bunch: &mut OutBunch,
        allow_merge: bool,
        time: Instant,
    ) -> Result<PacketId> {
        if bunch.num_bits() >= self.max_packet_bits {
            return Err(ErrorKind::SendOverflow {
                used: self.out.num_bits(),
                requested: bunch.num_bits(),
                capacity: self.max_packet_bits,
            });
        }
        let mut merged = if allow_merge { self.merge_with_last(bunch) } else { None };
        let bunch = match merged {
            Some(ref mut merged) => merged,
            None => bunch,
        };

        let mut header = BitWriter::new(MAX_BUNCH_HEADER_BITS);
        header.write_bit(false)?;
        bunch.write_header(&mut header, self.max_packet_bits)?;
        self.pre_send(header.num_bits() + bunch.num_bits(), time)?;

        let packet_id = self.out_packet_id;
        let start = self.out.num_bits();
        self.out.append(&header)?;
        self.out.append(bunch.payload())?;
        self.allow_merge = allow_merge;
        bunch.packet_id = Some(packet_id);
        bunch.sent_at = Some(time);
        self.last_out = is_mergeable(bunch).then(|| LastOut {
            start,
            end: self.out.num_bits(),
            bunch: bunch.clone(),
        });

        self.stats.out_bunches += 1;
        self.time_sensitive = true;
        self.post_send(time)?;
        Ok(packet_id)
    }

    /// Takes back the previous bunch from the current packet when `bunch`
    /// continues it, returning the combined bunch to frame in its place.
    fn merge_with_last(&mut self, bunch: &OutBunch) -> Option<OutBunch> {
        if !self.allow_merge || !is_mergeable(bunch) {
            return None;
        }
        let last = self.last_out.as_ref()?;
        if last.end != self.out.num_bits() || last.bunch.ch_index != bunch.ch_index {
            return None;
        }
        let capacity = last.bunch.payload().max_bits();
        if last.bunch.num_bits() + bunch.num_bits() > capacity {
            return None;
        }

        let mut merged = last.bunch.clone();
        merged.payload_mut().write_bits(bunch.payload().data(), bunch.num_bits()).ok()?;
        self.out.truncate(last.start);
        self.last_out = None;
        Some(merged)
    }

    /// Writes an ack frame for `packet_id`.
    ///
    /// A first-time ack is also queued so it is repeated once more on a later
    /// tick. Nothing is sent when every packet is acknowledged internally.
    pub(crate) fn send_ack(&mut self, packet_id: PacketId, first_time: bool, time: Instant) -> Result<()> {
        if self.config.internal_ack {
            return Ok(());
        }
        if first_time {
            self.purge_acks(time)?;
            self.queued_acks.push(packet_id);
        }
        self.pre_send(int_bits(MAX_PACKET_ID) + 1, time)?;
        self.out.write_bit(true)?;
        self.out.write_int(PacketSequencer::PACKET_ID.wrap(packet_id), MAX_PACKET_ID)?;
        self.allow_merge = false;
        self.last_out = None;
        self.post_send(time)
    }

    /// Sends every ack waiting for its repetition.
    pub fn purge_acks(&mut self, time: Instant) -> Result<()> {
        for packet_id in mem::take(&mut self.resend_acks) {
            self.send_ack(packet_id, false, time)?;
        }
        Ok(())
    }

    /// Finishes the current packet and hands it to the outbox.
    ///
    /// An empty keep-alive packet is sent when nothing was written but the
    /// keep-alive interval has passed. Acks queued since the last flush move
    /// to the resend list either way.
    pub fn flush_net(&mut self, time: Instant) -> Result<()> {
        self.time_sensitive = false;
        self.last_out = None;

        let keep_alive_due =
            time.saturating_duration_since(self.last_send_time) > self.config.keep_alive_time;
        if !self.out.is_empty() || keep_alive_due {
            if self.out.is_empty() {
                self.pre_send(0, time)?;
            }
            self.out.write_bit(true)?;
            let packet = mem::replace(&mut self.out, BitWriter::new(self.max_packet_bits));
            let data = packet.into_bytes();
            let sent_bytes = data.len() + self.config.packet_overhead;

            self.lag_ring.record(self.out_packet_id, time);
            self.out_packet_id += 1;
            self.stats.out_packets += 1;
            self.stats.out_bytes += sent_bytes as u64;
            self.pacing.record_sent(sent_bytes);
            self.last_send_time = time;
            self.transmit(data, time);
        }

        self.resend_acks.append(&mut self.queued_acks);
        Ok(())
    }

    fn transmit(&mut self, data: Vec<u8>, time: Instant) {
        match self.simulator.as_mut() {
            Some(simulator) => simulator.send(data, time, &mut self.outbox),
            None => self.outbox.push(data),
        }
    }

    /// Reports whether more data fits in the bandwidth budget.
    ///
    /// With `saturate` set the pacing debt is rebased to the data already
    /// waiting in the current packet, giving up any banked credit.
    pub fn is_net_ready(&mut self, saturate: bool) -> bool {
        self.pacing.is_net_ready(saturate, self.out.num_bytes())
    }
}

fn is_mergeable(bunch: &OutBunch) -> bool {
    !bunch.reliable && !bunch.open && !bunch.close
}
