//! Bit-granular packet buffers.
//!
//! Bits are packed least significant bit first inside each byte. Integers
//! bounded by a maximum are written with the variable-width scheme of
//! [`BitWriter::write_int`]: only as many low bits as are needed to
//! distinguish the value from `max` are emitted.

use std::io;

use bunchnet_core::error::{DecodingErrorKind, ErrorKind, Result};

/// Upper bound of the bits [`BitWriter::write_int`] emits for values below `value_max`.
pub fn int_bits(value_max: u32) -> usize {
    let mut bits = 0;
    let mut mask: u64 = 1;
    while mask < u64::from(value_max) {
        bits += 1;
        mask <<= 1;
    }
    bits
}

/// Exact number of bits [`BitWriter::write_int`] emits for `value`.
fn int_width(value: u32, value_max: u32) -> usize {
    let mut bits = 0;
    let mut written: u64 = 0;
    let mut mask: u64 = 1;
    while written + mask < u64::from(value_max) {
        if u64::from(value) & mask != 0 {
            written += mask;
        }
        bits += 1;
        mask <<= 1;
    }
    bits
}

/// Append-only bit buffer with a fixed capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitWriter {
    buffer: Vec<u8>,
    num_bits: usize,
    max_bits: usize,
}

impl BitWriter {
    /// Creates an empty writer that holds at most `max_bits`.
    pub fn new(max_bits: usize) -> Self {
        Self { buffer: Vec::with_capacity(max_bits.div_ceil(8)), num_bits: 0, max_bits }
    }

    /// Bits written so far.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Bytes spanned by the written bits.
    pub fn num_bytes(&self) -> usize {
        self.buffer.len()
    }

    /// Capacity in bits.
    pub fn max_bits(&self) -> usize {
        self.max_bits
    }

    /// Bits that can still be written.
    pub fn bits_free(&self) -> usize {
        self.max_bits - self.num_bits
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.num_bits == 0
    }

    /// Written bytes; bits past `num_bits` in the last byte are zero.
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Discards everything written.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.num_bits = 0;
    }

    /// Rolls the writer back to `num_bits`.
    pub fn truncate(&mut self, num_bits: usize) {
        if num_bits >= self.num_bits {
            return;
        }
        self.buffer.truncate(num_bits.div_ceil(8));
        if num_bits % 8 != 0 {
            if let Some(last) = self.buffer.last_mut() {
                *last &= (1u8 << (num_bits % 8)) - 1;
            }
        }
        self.num_bits = num_bits;
    }

    fn ensure(&self, bits: usize) -> Result<()> {
        if bits > self.bits_free() {
            return Err(ErrorKind::SendOverflow {
                used: self.num_bits,
                requested: bits,
                capacity: self.max_bits,
            });
        }
        Ok(())
    }

    /// Appends one bit.
    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        self.ensure(1)?;
        self.push_bit(bit);
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) {
        if self.num_bits % 8 == 0 {
            self.buffer.push(0);
        }
        if bit {
            let last = self.buffer.len() - 1;
            self.buffer[last] |= 1 << (self.num_bits % 8);
        }
        self.num_bits += 1;
    }

    /// Appends `value` bounded by `value_max` (exclusive).
    ///
    /// Low bits are emitted one at a time for as long as a further set bit
    /// could still produce a value below `value_max`, so a power-of-two
    /// bound always costs `log2(value_max)` bits while other bounds may
    /// cost one bit less for large values.
    pub fn write_int(&mut self, value: u32, value_max: u32) -> Result<()> {
        debug_assert!(value < value_max, "{} is not below {}", value, value_max);
        self.ensure(int_width(value, value_max))?;
        let mut written: u64 = 0;
        let mut mask: u64 = 1;
        while written + mask < u64::from(value_max) {
            let bit = u64::from(value) & mask != 0;
            if bit {
                written += mask;
            }
            self.push_bit(bit);
            mask <<= 1;
        }
        Ok(())
    }

    /// Appends the first `num_bits` bits of `src`.
    pub fn write_bits(&mut self, src: &[u8], num_bits: usize) -> Result<()> {
        debug_assert!(num_bits <= src.len() * 8);
        self.ensure(num_bits)?;
        if self.num_bits % 8 == 0 && num_bits % 8 == 0 {
            self.buffer.extend_from_slice(&src[..num_bits / 8]);
            self.num_bits += num_bits;
            return Ok(());
        }
        for i in 0..num_bits {
            self.push_bit(src[i / 8] & (1 << (i % 8)) != 0);
        }
        Ok(())
    }

    /// Appends every bit written to `other`.
    pub fn append(&mut self, other: &BitWriter) -> Result<()> {
        self.write_bits(other.data(), other.num_bits())
    }

    /// Consumes the writer and returns its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }
}

impl io::Write for BitWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let count = buf.len().min(self.bits_free() / 8);
        self.write_bits(buf, count * 8).map_err(|e| io::Error::new(io::ErrorKind::WriteZero, e))?;
        Ok(count)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Bounds-checked bit cursor over received data.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    num_bits: usize,
    pos: usize,
}

impl<'a> BitReader<'a> {
    /// Reads the first `num_bits` bits of `data`.
    pub fn new(data: &'a [u8], num_bits: usize) -> Self {
        Self { data, num_bits: num_bits.min(data.len() * 8), pos: 0 }
    }

    /// Wraps a received datagram, locating its real length from the terminator bit.
    ///
    /// The sender ends every packet with a set bit followed by zero padding,
    /// so the highest set bit of the final byte marks the end of the content.
    pub fn from_packet(data: &'a [u8]) -> Result<Self> {
        let last = *data.last().ok_or(DecodingErrorKind::EmptyPacket)?;
        if last == 0 {
            return Err(DecodingErrorKind::MissingTerminator.into());
        }
        let terminator = 7 - last.leading_zeros() as usize;
        Ok(Self::new(data, (data.len() - 1) * 8 + terminator))
    }

    /// Total readable bits.
    pub fn num_bits(&self) -> usize {
        self.num_bits
    }

    /// Bits consumed so far.
    pub fn pos(&self) -> usize {
        self.pos
    }

    /// Bits not yet consumed.
    pub fn bits_left(&self) -> usize {
        self.num_bits - self.pos
    }

    /// Returns true once every bit has been consumed.
    pub fn at_end(&self) -> bool {
        self.pos >= self.num_bits
    }

    fn ensure(&self, bits: usize) -> Result<()> {
        if bits > self.bits_left() {
            return Err(DecodingErrorKind::Overrun { requested: bits, remaining: self.bits_left() }
                .into());
        }
        Ok(())
    }

    fn take_bit(&mut self) -> bool {
        let bit = self.data[self.pos / 8] & (1 << (self.pos % 8)) != 0;
        self.pos += 1;
        bit
    }

    /// Reads one bit.
    pub fn read_bit(&mut self) -> Result<bool> {
        self.ensure(1)?;
        Ok(self.take_bit())
    }

    /// Reads a value written by [`BitWriter::write_int`] with the same bound.
    pub fn read_int(&mut self, value_max: u32) -> Result<u32> {
        let mut value: u64 = 0;
        let mut mask: u64 = 1;
        while value + mask < u64::from(value_max) {
            if self.read_bit()? {
                value |= mask;
            }
            mask <<= 1;
        }
        Ok(value as u32)
    }

    /// Reads `num_bits` bits into a fresh, zero-padded byte vector.
    pub fn read_bits(&mut self, num_bits: usize) -> Result<Vec<u8>> {
        self.ensure(num_bits)?;
        if self.pos % 8 == 0 && num_bits % 8 == 0 {
            let start = self.pos / 8;
            self.pos += num_bits;
            return Ok(self.data[start..start + num_bits / 8].to_vec());
        }
        let mut out = vec![0u8; num_bits.div_ceil(8)];
        for i in 0..num_bits {
            if self.take_bit() {
                out[i / 8] |= 1 << (i % 8);
            }
        }
        Ok(out)
    }
}

impl io::Read for BitReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = buf.len().min(self.bits_left() / 8);
        let bytes = self
            .read_bits(count * 8)
            .map_err(|e| io::Error::new(io::ErrorKind::UnexpectedEof, e))?;
        buf[..count].copy_from_slice(&bytes);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
    use bunchnet_core::constants::{MAX_CHANNELS, MAX_PACKET_ID};

    use super::*;

    #[test]
    fn test_bits_are_packed_lsb_first() {
        let mut writer = BitWriter::new(16);
        writer.write_bit(true).unwrap();
        writer.write_bit(false).unwrap();
        writer.write_bit(true).unwrap();
        assert_eq!(writer.data(), &[0b101]);
        assert_eq!(writer.num_bits(), 3);
    }

    #[test]
    fn test_int_bits_is_ceil_log2() {
        assert_eq!(int_bits(MAX_PACKET_ID), 14);
        assert_eq!(int_bits(MAX_CHANNELS as u32), 10);
        assert_eq!(int_bits(8), 3);
        assert_eq!(int_bits(1), 0);
    }

    #[test]
    fn test_write_int_power_of_two_is_fixed_width() {
        let mut writer = BitWriter::new(64);
        writer.write_int(0, MAX_PACKET_ID).unwrap();
        assert_eq!(writer.num_bits(), 14);
        writer.write_int(MAX_PACKET_ID - 1, MAX_PACKET_ID).unwrap();
        assert_eq!(writer.num_bits(), 28);
    }

    #[test]
    fn test_write_int_non_power_of_two_can_shorten() {
        let mut writer = BitWriter::new(64);
        // 511 + 512 would reach the bound, so the top bit is implied.
        writer.write_int(511, MAX_CHANNELS as u32).unwrap();
        assert_eq!(writer.num_bits(), 9);

        let mut reader = BitReader::new(writer.data(), writer.num_bits());
        assert_eq!(reader.read_int(MAX_CHANNELS as u32).unwrap(), 511);
        assert!(reader.at_end());
    }

    #[test]
    fn test_write_past_capacity_is_an_error() {
        let mut writer = BitWriter::new(10);
        writer.write_int(5, 256).unwrap();
        let error = writer.write_int(5, 256).unwrap_err();
        assert!(matches!(error, ErrorKind::SendOverflow { used: 8, requested: 8, capacity: 10 }));
        // Nothing was partially written.
        assert_eq!(writer.num_bits(), 8);
    }

    #[test]
    fn test_read_past_end_is_an_error() {
        let data = [0xff];
        let mut reader = BitReader::new(&data, 3);
        assert_eq!(reader.read_int(8).unwrap(), 7);
        let error = reader.read_bit().unwrap_err();
        assert!(matches!(
            error,
            ErrorKind::Decoding(DecodingErrorKind::Overrun { requested: 1, remaining: 0 })
        ));
    }

    #[test]
    fn test_unaligned_bits_roundtrip() {
        let mut writer = BitWriter::new(128);
        writer.write_bit(true).unwrap();
        writer.write_bits(&[0xab, 0x05], 12).unwrap();

        let mut reader = BitReader::new(writer.data(), writer.num_bits());
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.read_bits(12).unwrap(), vec![0xab, 0x05]);
        assert!(reader.at_end());
    }

    #[test]
    fn test_truncate_clears_trailing_bits() {
        let mut writer = BitWriter::new(32);
        writer.write_bits(&[0xff, 0xff], 16).unwrap();
        writer.truncate(5);
        assert_eq!(writer.num_bits(), 5);
        assert_eq!(writer.data(), &[0x1f]);
    }

    #[test]
    fn test_from_packet_finds_terminator() {
        // Three content bits (1, 0, 1) followed by the terminator at bit 3.
        let data = [0b0000_1101];
        let mut reader = BitReader::from_packet(&data).unwrap();
        assert_eq!(reader.num_bits(), 3);
        assert!(reader.read_bit().unwrap());
        assert!(!reader.read_bit().unwrap());
        assert!(reader.read_bit().unwrap());
        assert!(reader.at_end());
    }

    #[test]
    fn test_from_packet_terminator_in_last_bit() {
        let data = [0x00, 0x80];
        let reader = BitReader::from_packet(&data).unwrap();
        assert_eq!(reader.num_bits(), 15);
    }

    #[test]
    fn test_from_packet_rejects_empty_and_zero_trailer() {
        assert!(matches!(
            BitReader::from_packet(&[]),
            Err(ErrorKind::Decoding(DecodingErrorKind::EmptyPacket))
        ));
        assert!(matches!(
            BitReader::from_packet(&[0x12, 0x00]),
            Err(ErrorKind::Decoding(DecodingErrorKind::MissingTerminator))
        ));
    }

    #[test]
    fn test_io_traits_work_with_byteorder() {
        let mut writer = BitWriter::new(128);
        writer.write_bit(true).unwrap();
        writer.write_u32::<LittleEndian>(0xdead_beef).unwrap();
        writer.write_u16::<LittleEndian>(7).unwrap();

        let mut reader = BitReader::new(writer.data(), writer.num_bits());
        assert!(reader.read_bit().unwrap());
        assert_eq!(reader.read_u32::<LittleEndian>().unwrap(), 0xdead_beef);
        assert_eq!(reader.read_u16::<LittleEndian>().unwrap(), 7);
        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_io_write_stops_at_capacity() {
        let mut writer = BitWriter::new(20);
        assert_eq!(writer.write(&[1, 2, 3, 4]).unwrap(), 2);
        assert!(writer.write_all(&[5]).is_err());
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn bounded_ints_decode_in_sequence(
                values in proptest::collection::vec((1u32..100_000).prop_flat_map(|max| (0..max, Just(max))), 1..20),
                lead in 0usize..8,
            ) {
                let mut writer = BitWriter::new(4096);
                for _ in 0..lead {
                    writer.write_bit(true).unwrap();
                }
                for (value, max) in &values {
                    writer.write_int(*value, *max).unwrap();
                    prop_assert!(writer.num_bits() <= 4096);
                }

                let mut reader = BitReader::new(writer.data(), writer.num_bits());
                for _ in 0..lead {
                    prop_assert!(reader.read_bit().unwrap());
                }
                for (value, max) in &values {
                    prop_assert_eq!(reader.read_int(*max).unwrap(), *value);
                }
                prop_assert!(reader.at_end());
            }
        }
    }
}
