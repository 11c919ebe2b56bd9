//! Packet parsing: ack frames, loss inference and data frame dispatch.

use std::time::Instant;

use bunchnet_core::{
    constants::MAX_PACKET_ID,
    error::{DecodingErrorKind, ErrorKind, Result},
};
use bunchnet_protocol::{
    BitReader, BunchHeader, ChannelType, InBunch, PacketId, PacketSequencer,
};
use tracing::{debug, warn};

use super::Connection;
use crate::channel::Channel;

impl Connection {
    /// Handles a datagram delivered by the transport.
    ///
    /// Returns an error when the packet, or part of it, had to be abandoned.
    /// Data processed before the failure stands, and any packet whose id
    /// could be read is still acknowledged.
    pub fn received_raw_packet(&mut self, data: &[u8], time: Instant) -> Result<()> {
        self.stats.in_bytes += (data.len() + self.config.packet_overhead) as u64;
        self.stats.in_packets += 1;
        let reader = BitReader::from_packet(data).inspect_err(|error| {
            warn!("Dropped packet from {}: {}", self.remote_address, error);
        })?;
        self.received_packet(reader, time)
    }

    /// Processes every frame of a packet whose length was already recovered.
    pub fn received_packet(&mut self, mut reader: BitReader<'_>, time: Instant) -> Result<()> {
        self.last_receive_time = time;
        let raw = reader.read_int(MAX_PACKET_ID).map_err(|_| {
            warn!("Packet from {} too small for its id", self.remote_address);
            ErrorKind::from(DecodingErrorKind::PacketHeader)
        })?;

        let resolved = PacketSequencer::PACKET_ID.resolve(raw, self.in_packet_id);
        let packet_id = resolved.value;
        if resolved.out_of_order {
            self.stats.in_out_of_order_packets += 1;
        } else {
            self.stats.in_packets_lost += (packet_id - self.in_packet_id - 1) as u64;
            self.in_packet_id = packet_id;
        }

        let result = self.received_frames(&mut reader, packet_id, time);
        if let Err(ref error) = result {
            warn!("Abandoned rest of packet {} from {}: {}", packet_id, self.remote_address, error);
        }
        self.send_ack(packet_id, true, time)?;
        result
    }

    fn received_frames(
        &mut self,
        reader: &mut BitReader<'_>,
        packet_id: PacketId,
        time: Instant,
    ) -> Result<()> {
        while !reader.at_end() && !self.state.is_closed() {
            let is_ack = reader.read_bit().map_err(|_| DecodingErrorKind::AckFrame)?;
            if is_ack {
                let raw = reader.read_int(MAX_PACKET_ID).map_err(|_| DecodingErrorKind::AckFrame)?;
                self.stats.in_acks += 1;
                let ack_id = PacketSequencer::PACKET_ID.unwrap(raw, self.out_ack_packet_id);
                self.received_ack(ack_id, time)?;
            } else {
                self.received_data(reader, packet_id, time)?;
            }
        }
        Ok(())
    }

    fn received_ack(&mut self, ack_id: PacketId, time: Instant) -> Result<()> {
        if ack_id >= self.out_packet_id {
            debug!("Ignoring ack {} for a packet never sent to {}", ack_id, self.remote_address);
            return Ok(());
        }

        // Every id skipped by the ack stream was lost.
        if ack_id > self.out_ack_packet_id {
            for nak_id in self.out_ack_packet_id + 1..ack_id {
                self.stats.out_packets_lost += 1;
                self.received_nak(nak_id, time)?;
            }
            self.out_ack_packet_id = ack_id;
        }

        if let Some(sent_at) = self.lag_ring.sent_at(ack_id) {
            let half_frame = self.frame_timer.frame_time().as_secs_f64() / 2.0;
            self.lag_acc += time.saturating_duration_since(sent_at).as_secs_f64() - half_frame;
            self.lag_count += 1;
        }

        for index in self.channels.open_indices() {
            let Some(channel) = self.channels.get_mut(index) else {
                continue;
            };
            channel.received_ack(ack_id);
            if channel.received_acks() {
                self.destroy_channel(index);
            }
        }
        self.update_state();
        Ok(())
    }

    /// Resends the reliable bunches lost with `nak_id`.
    fn received_nak(&mut self, nak_id: PacketId, time: Instant) -> Result<()> {
        for index in self.channels.open_indices() {
            let Some(channel) = self.channels.get_mut(index) else {
                continue;
            };
            let open_lost = channel.open_packet_id() == Some(nak_id);
            for mut bunch in channel.received_nak(nak_id) {
                debug!("Channel {} nak {}, resending {}", index, nak_id, bunch.ch_sequence);
                let packet_id = self.send_raw_bunch(&mut bunch, false, time)?;
                self.stats.out_retransmits += 1;
                if let Some(channel) = self.channels.get_mut(index) {
                    channel.retransmitted(bunch.ch_sequence, packet_id, time);
                }
            }
            if open_lost && self.channels.get_mut(index).is_some_and(Channel::received_acks) {
                self.destroy_channel(index);
            }
        }
        Ok(())
    }

    fn received_data(
        &mut self,
        reader: &mut BitReader<'_>,
        packet_id: PacketId,
        time: Instant,
    ) -> Result<()> {
        let header = BunchHeader::read(reader, self.max_packet_bits)?;
        let data = reader
            .read_bits(header.num_bits)
            .map_err(|_| DecodingErrorKind::BunchPayload)?;
        let index = header.ch_index;
        if index >= self.channels.capacity() {
            return Err(ErrorKind::ChannelIndexOutOfRange(index));
        }

        let counters = self.channels.counters(index);
        let ch_sequence = header
            .wire_sequence
            .map_or(0, |raw| PacketSequencer::CH_SEQUENCE.unwrap(raw, counters.in_reliable));

        // Nothing but the control channel's own open before the control channel exists.
        let exists = self.channels.contains(index);
        if !exists
            && !self.channels.contains(0)
            && (index != 0 || header.ch_type != ChannelType::CONTROL)
        {
            return self.violation(index, ErrorKind::BunchBeforeConnected(index), time);
        }

        if header.reliable && ch_sequence <= counters.in_reliable {
            debug!("Outdated bunch {} on channel {} (at {})", ch_sequence, index, counters.in_reliable);
            return Ok(());
        }

        let opened = self.channels.get(index).is_some_and(|channel| channel.open_packet_id().is_some());
        if !header.reliable && !(header.open && header.close) && !opened {
            debug!("Unreliable bunch on unopened channel {}", index);
            return Ok(());
        }

        if !exists && !self.accept_remote_channel(&header, time)? {
            return Ok(());
        }

        let Some(channel) = self.channels.get_mut(index) else {
            return Ok(());
        };
        if header.open {
            channel.remote_opened(packet_id);
        }
        self.stats.in_bunches += 1;
        match channel.received_raw_bunch(InBunch::new(&header, ch_sequence, packet_id, data)) {
            Ok(true) => self.destroy_channel(index),
            Ok(false) => {}
            Err(error) => {
                warn!("Channel {} from {} failed: {}", index, self.remote_address, error);
                self.close(time)?;
                return Err(error);
            }
        }
        self.update_state();
        Ok(())
    }

    /// Creates the channel a remote bunch names and offers it to the owner.
    ///
    /// A refused channel is answered with a reliable close and destroyed
    /// right away. Returns whether the channel was accepted.
    fn accept_remote_channel(&mut self, header: &BunchHeader, time: Instant) -> Result<bool> {
        let index = header.ch_index;
        let ch_type = header.ch_type;
        if !ch_type.is_encodable() || !self.registry.is_known_channel_type(ch_type) {
            return self.violation(index, ErrorKind::UnknownChannelType(ch_type.0), time).map(|_| false);
        }

        let handler = self.registry.create_handler(ch_type, index);
        let counters = self.channels.counters(index);
        self.channels.insert(Channel::new(index, ch_type, false, counters, handler))?;
        let accepted = match self.channels.get(index) {
            Some(channel) => self.notify.accept_channel(channel),
            None => false,
        };
        if accepted {
            debug!("Accepted channel {} ({}) from {}", index, ch_type, self.remote_address);
            return Ok(true);
        }

        debug!("Refused channel {} ({}) from {}", index, ch_type, self.remote_address);
        let mut bunch = self.create_bunch(index);
        bunch.reliable = true;
        bunch.close = true;
        self.send_bunch(index, bunch, false, time)?;
        self.flush_net(time)?;
        self.destroy_channel(index);
        Ok(false)
    }

    /// Abandons the packet over a protocol violation; on the control channel
    /// the whole connection goes down with it.
    fn violation(&mut self, index: usize, error: ErrorKind, time: Instant) -> Result<()> {
        if index == 0 {
            debug!("Protocol violation on control channel from {}, closing", self.remote_address);
            self.close(time)?;
        }
        Err(error)
    }
}
