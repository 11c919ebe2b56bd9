//! Error types shared across the workspace.

use std::{io, result};

/// Result alias used by every fallible bunchnet operation.
pub type Result<T> = result::Result<T, ErrorKind>;

/// Top level error type.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    /// An inbound packet could not be decoded.
    #[error("decoding error: {0}")]
    Decoding(#[from] DecodingErrorKind),

    /// Outgoing data does not fit in a packet even after flushing.
    #[error("outgoing data overflows packet: {used} + {requested} bits exceeds {capacity}")]
    SendOverflow {
        /// Bits already in the packet buffer.
        used: usize,
        /// Bits the caller asked to append.
        requested: usize,
        /// Usable bits in one packet.
        capacity: usize,
    },

    /// A bunch named a channel type the registry does not know.
    #[error("unknown channel type {0}")]
    UnknownChannelType(u8),

    /// A bunch arrived for a channel before the control channel was opened.
    #[error("bunch for channel {0} received before the control channel exists")]
    BunchBeforeConnected(usize),

    /// A channel index beyond this connection's channel table.
    #[error("channel index {0} is out of range")]
    ChannelIndexOutOfRange(usize),

    /// No live channel at this index.
    #[error("channel {0} does not exist")]
    ChannelNotFound(usize),

    /// The channel is closing and no longer accepts outgoing bunches.
    #[error("channel {0} is closing")]
    ChannelClosing(usize),

    /// The requested channel index is taken.
    #[error("channel {0} is already in use")]
    ChannelInUse(usize),

    /// Every channel slot is taken.
    #[error("no free channel index")]
    ChannelTableFull,

    /// Too many unacknowledged reliable bunches on one channel.
    #[error("reliable buffer overflow on channel {0}")]
    ReliableBufferOverflow(usize),

    /// A channel opened by an unreliable bunch cannot carry reliable data.
    #[error("channel {0} was opened unreliably and cannot send reliable bunches")]
    ReliableOnTemporaryChannel(usize),

    /// The connection is closed.
    #[error("connection is closed")]
    ConnectionClosed,

    /// Unreliable data was refused because the connection is over its bandwidth budget.
    #[error("connection is saturated")]
    NetSaturated,

    /// Wrapper around a std io::Error.
    #[error("io error: {0}")]
    IOError(#[from] io::Error),
}

/// Reasons an inbound packet is rejected by the decoder.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodingErrorKind {
    /// A datagram with no bytes at all.
    #[error("received an empty packet")]
    EmptyPacket,
    /// The final byte of the datagram holds no terminator bit.
    #[error("packet is missing its terminator bit")]
    MissingTerminator,
    /// A read went past the end of the packet.
    #[error("read of {requested} bits overruns the {remaining} remaining")]
    Overrun {
        /// Bits the reader asked for.
        requested: usize,
        /// Bits left in the packet.
        remaining: usize,
    },
    /// The packet id could not be read.
    #[error("malformed packet header")]
    PacketHeader,
    /// An ack frame was truncated.
    #[error("malformed ack frame")]
    AckFrame,
    /// A data frame header was truncated.
    #[error("malformed bunch header")]
    BunchHeader,
    /// A data frame's payload runs past the end of the packet.
    #[error("bunch payload overruns packet")]
    BunchPayload,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decoding_error_converts_into_error_kind() {
        let error: ErrorKind = DecodingErrorKind::MissingTerminator.into();
        assert!(matches!(error, ErrorKind::Decoding(DecodingErrorKind::MissingTerminator)));
    }

    #[test]
    fn test_send_overflow_message_names_sizes() {
        let error = ErrorKind::SendOverflow { used: 16, requested: 4100, capacity: 4095 };
        let message = error.to_string();
        assert!(message.contains("4100"));
        assert!(message.contains("4095"));
    }
}
