//! Bunches: channel-addressed units of data carried inside packets.
//!
//! A data frame on the wire is laid out as follows (after the frame type bit):
//!
//! ```text
//! bControl [bOpen bClose] bReliable ChIndex [ChSequence] [ChType] NumBits Payload
//! ```
//!
//! `bOpen`/`bClose` are present only when `bControl` is set, `ChSequence`
//! only for reliable bunches and `ChType` for reliable or opening bunches.

use std::{fmt, io, time::Instant};

use bunchnet_core::{
    constants::{CHTYPE_MAX, MAX_CHANNELS, MAX_CH_SEQUENCE},
    error::{DecodingErrorKind, Result},
};

use crate::{
    bit_stream::{BitReader, BitWriter},
    sequence::{PacketId, PacketSequencer},
};

/// Identifies which implementation handles a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ChannelType(pub u8);

impl ChannelType {
    /// No type; carried by unreliable bunches on already open channels.
    pub const NONE: ChannelType = ChannelType(0);
    /// The foundational channel living at index 0.
    pub const CONTROL: ChannelType = ChannelType(1);
    /// Object replication.
    pub const ACTOR: ChannelType = ChannelType(2);
    /// Bulk file transfer.
    pub const FILE: ChannelType = ChannelType(3);
    /// Voice data.
    pub const VOICE: ChannelType = ChannelType(4);

    /// Returns true if the id fits the wire encoding.
    pub fn is_encodable(&self) -> bool {
        u32::from(self.0) < CHTYPE_MAX
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ChannelType::NONE => write!(f, "none"),
            ChannelType::CONTROL => write!(f, "control"),
            ChannelType::ACTOR => write!(f, "actor"),
            ChannelType::FILE => write!(f, "file"),
            ChannelType::VOICE => write!(f, "voice"),
            ChannelType(other) => write!(f, "type{}", other),
        }
    }
}

/// Header of a data frame as read from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BunchHeader {
    /// Target channel index.
    pub ch_index: usize,
    /// Channel type; [`ChannelType::NONE`] unless reliable or opening.
    pub ch_type: ChannelType,
    /// Truncated reliable sequence, present for reliable bunches only.
    pub wire_sequence: Option<u32>,
    /// Opens the channel.
    pub open: bool,
    /// Closes the channel.
    pub close: bool,
    /// Delivered reliably and in order.
    pub reliable: bool,
    /// Length of the payload that follows.
    pub num_bits: usize,
}

impl BunchHeader {
    /// Parses a header; `max_packet_bits` bounds the payload length field.
    pub fn read(reader: &mut BitReader<'_>, max_packet_bits: usize) -> Result<Self> {
        Self::read_fields(reader, max_packet_bits)
            .map_err(|_| DecodingErrorKind::BunchHeader.into())
    }

    fn read_fields(reader: &mut BitReader<'_>, max_packet_bits: usize) -> Result<Self> {
        let control = reader.read_bit()?;
        let (open, close) =
            if control { (reader.read_bit()?, reader.read_bit()?) } else { (false, false) };
        let reliable = reader.read_bit()?;
        let ch_index = reader.read_int(MAX_CHANNELS as u32)? as usize;
        let wire_sequence =
            if reliable { Some(reader.read_int(MAX_CH_SEQUENCE)?) } else { None };
        let ch_type = if reliable || open {
            ChannelType(reader.read_int(CHTYPE_MAX)? as u8)
        } else {
            ChannelType::NONE
        };
        let num_bits = reader.read_int(max_packet_bits as u32)? as usize;
        Ok(Self { ch_index, ch_type, wire_sequence, open, close, reliable, num_bits })
    }
}

/// Outgoing bunch under construction.
///
/// Payload is written through [`OutBunch::payload_mut`] or the `io::Write` impl.
#[derive(Debug, Clone)]
pub struct OutBunch {
    /// Target channel index.
    pub ch_index: usize,
    /// Channel type, sent with reliable and opening bunches.
    pub ch_type: ChannelType,
    /// Absolute reliable sequence, assigned by the channel when sent reliably.
    pub ch_sequence: i32,
    /// Opens the channel.
    pub open: bool,
    /// Closes the channel.
    pub close: bool,
    /// Deliver reliably and in order.
    pub reliable: bool,
    /// Packet the bunch was last framed into.
    pub packet_id: Option<PacketId>,
    /// When the bunch was last framed.
    pub sent_at: Option<Instant>,
    payload: BitWriter,
}

impl OutBunch {
    /// Creates an empty bunch whose payload holds at most `max_bits`.
    pub fn new(ch_index: usize, ch_type: ChannelType, max_bits: usize) -> Self {
        Self {
            ch_index,
            ch_type,
            ch_sequence: 0,
            open: false,
            close: false,
            reliable: false,
            packet_id: None,
            sent_at: None,
            payload: BitWriter::new(max_bits),
        }
    }

    /// Payload written so far.
    pub fn payload(&self) -> &BitWriter {
        &self.payload
    }

    /// Mutable access to the payload writer.
    pub fn payload_mut(&mut self) -> &mut BitWriter {
        &mut self.payload
    }

    /// Payload length in bits.
    pub fn num_bits(&self) -> usize {
        self.payload.num_bits()
    }

    /// Appends the header of this bunch, excluding the frame type bit.
    pub fn write_header(&self, writer: &mut BitWriter, max_packet_bits: usize) -> Result<()> {
        let control = self.open || self.close;
        writer.write_bit(control)?;
        if control {
            writer.write_bit(self.open)?;
            writer.write_bit(self.close)?;
        }
        writer.write_bit(self.reliable)?;
        writer.write_int(self.ch_index as u32, MAX_CHANNELS as u32)?;
        if self.reliable {
            writer.write_int(PacketSequencer::CH_SEQUENCE.wrap(self.ch_sequence), MAX_CH_SEQUENCE)?;
        }
        if self.reliable || self.open {
            writer.write_int(u32::from(self.ch_type.0), CHTYPE_MAX)?;
        }
        writer.write_int(self.num_bits() as u32, max_packet_bits as u32)
    }
}

impl io::Write for OutBunch {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.payload.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Bunch received from the remote side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InBunch {
    /// Channel index.
    pub ch_index: usize,
    /// Channel type from the header.
    pub ch_type: ChannelType,
    /// Absolute reliable sequence; zero for unreliable bunches.
    pub ch_sequence: i32,
    /// Opens the channel.
    pub open: bool,
    /// Closes the channel.
    pub close: bool,
    /// Reliable bunch.
    pub reliable: bool,
    /// Packet the bunch arrived in.
    pub packet_id: PacketId,
    data: Vec<u8>,
    num_bits: usize,
}

impl InBunch {
    /// Builds a bunch from a parsed header and its payload bits.
    pub fn new(
        header: &BunchHeader,
        ch_sequence: i32,
        packet_id: PacketId,
        data: Vec<u8>,
    ) -> Self {
        Self {
            ch_index: header.ch_index,
            ch_type: header.ch_type,
            ch_sequence,
            open: header.open,
            close: header.close,
            reliable: header.reliable,
            packet_id,
            data,
            num_bits: header.num_bits,
        }
    }

    /// Raw payload bytes, zero padded past `num_bits`.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Payload length in bits.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Reader over the payload.
    pub fn reader(&self) -> BitReader<'_> {
        BitReader::new(&self.data, self.num_bits)
    }
}
