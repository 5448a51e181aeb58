use bytes::Bytes;
use thiserror::Error;

/// Error returned when a write would exceed the sink's byte limit.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("write would exceed the {limit} byte block limit")]
pub struct BufferFull {
    pub limit: usize,
}

/// Error returned when a read needs more bits than the source holds.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("unexpected end of stream: needed {requested} bits, {remaining} left")]
pub struct UnexpectedEndOfStream {
    pub requested: usize,
    pub remaining: usize,
}

/// Number of leading zero bits in `x` (64 for zero).
#[inline]
pub fn leading_zeros(x: u64) -> u8 {
    x.leading_zeros() as u8
}

/// Number of trailing zero bits in `x` (64 for zero).
#[inline]
pub fn trailing_zeros(x: u64) -> u8 {
    x.trailing_zeros() as u8
}

/// Returns a bitmask with the lowest `n` bits set. Handles `n == 64` without overflow.
#[inline]
pub fn bitmask(n: u8) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

/// An append-only bit writer. Bits are packed MSB-first within each byte and
/// bytes are emitted in write order.
///
/// An optional byte limit caps the size of the output. When the limit is
/// reached, write operations return `Err(BufferFull)` instead of growing.
#[derive(Debug, Clone)]
pub struct BitSink {
    bytes: Vec<u8>,
    /// Number of valid bits in the last byte (1..=8, or 0 if empty).
    bit_count: u8,
    /// Maximum number of bytes the sink is allowed to hold (`None` = unlimited).
    max_bytes: Option<usize>,
}

impl BitSink {
    /// Creates a new empty `BitSink` with no size limit.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates a `BitSink` with the given pre-allocated capacity in bytes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
            bit_count: 0,
            max_bytes: None,
        }
    }

    /// Creates a `BitSink` that already holds the whole bytes of `prefix`.
    pub fn with_prefix(prefix: &[u8], capacity: usize) -> Self {
        let mut bytes = Vec::with_capacity(capacity.max(prefix.len()));
        bytes.extend_from_slice(prefix);
        Self {
            bit_count: if bytes.is_empty() { 0 } else { 8 },
            bytes,
            max_bytes: None,
        }
    }

    /// Sets (or clears) the maximum byte limit.
    pub fn set_limit(&mut self, max_bytes: Option<usize>) {
        self.max_bytes = max_bytes;
    }

    /// Returns the current byte limit, if any.
    pub fn limit(&self) -> Option<usize> {
        self.max_bytes
    }

    /// Returns the total number of bits written.
    #[inline]
    pub fn len_bits(&self) -> usize {
        if self.bytes.is_empty() {
            0
        } else {
            (self.bytes.len() - 1) * 8 + self.bit_count as usize
        }
    }

    /// Returns `true` if no bits have been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Returns `true` if the write position sits on a byte boundary.
    #[inline]
    pub fn is_aligned(&self) -> bool {
        self.bit_count == 0 || self.bit_count == 8
    }

    /// Returns `true` if `bits` more bits can be written without hitting the limit.
    pub fn fits(&self, bits: usize) -> bool {
        match self.max_bytes {
            Some(max) => self.len_bits() + bits <= max * 8,
            None => true,
        }
    }

    /// Returns a reference to the underlying byte slice, including the
    /// partially filled last byte.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Consumes the sink and returns the written bytes.
    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    fn start_byte(&mut self, byte: u8) -> Result<(), BufferFull> {
        if let Some(limit) = self.max_bytes {
            if self.bytes.len() >= limit {
                return Err(BufferFull { limit });
            }
        }
        self.bytes.push(byte);
        Ok(())
    }

    /// Writes a single bit.
    #[inline]
    pub fn write_bit(&mut self, bit: bool) -> Result<(), BufferFull> {
        if self.is_aligned() {
            self.start_byte(0)?;
            self.bit_count = 0;
        }
        if bit {
            if let Some(last) = self.bytes.last_mut() {
                *last |= 1 << (7 - self.bit_count);
            }
        }
        self.bit_count += 1;
        Ok(())
    }

    /// Writes a full byte regardless of the current alignment, splitting it
    /// across the in-progress byte when needed.
    pub fn write_byte(&mut self, byte: u8) -> Result<(), BufferFull> {
        if self.is_aligned() {
            self.start_byte(byte)?;
            self.bit_count = 8;
            return Ok(());
        }
        let used = self.bit_count;
        self.start_byte(byte << (8 - used))?;
        let len = self.bytes.len();
        self.bytes[len - 2] |= byte >> used;
        Ok(())
    }

    /// Writes the lowest `n` bits of `value`, most significant first. `n` must be <= 64.
    ///
    /// On error the sink may hold part of this field. Callers that need
    /// atomicity should check `fits` before writing.
    pub fn write_bits(&mut self, value: u64, n: u8) -> Result<(), BufferFull> {
        debug_assert!(n <= 64);
        if n == 0 {
            return Ok(());
        }
        let mut left = n;
        let mut field = value << (64 - n);
        while left >= 8 {
            self.write_byte((field >> 56) as u8)?;
            field <<= 8;
            left -= 8;
        }
        while left > 0 {
            self.write_bit(field >> 63 == 1)?;
            field <<= 1;
            left -= 1;
        }
        Ok(())
    }

    /// Pads the last partial byte with `pad_bit` up to the next byte boundary.
    pub fn flush(&mut self, pad_bit: bool) {
        if self.is_aligned() {
            return;
        }
        if pad_bit {
            if let Some(last) = self.bytes.last_mut() {
                *last |= (1u8 << (8 - self.bit_count)) - 1;
            }
        }
        self.bit_count = 8;
    }
}

impl Default for BitSink {
    fn default() -> Self {
        Self::new()
    }
}

/// A cursor for reading bits sequentially from a byte buffer, MSB-first.
#[derive(Debug, Clone)]
pub struct BitSource {
    bytes: Bytes,
    /// Current bit position (0-indexed from the start).
    pos: usize,
}

impl BitSource {
    /// Creates a new `BitSource` over the given bytes.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            pos: 0,
        }
    }

    /// Total number of bits in the source.
    #[inline]
    pub fn len_bits(&self) -> usize {
        self.bytes.len() * 8
    }

    /// Current read position in bits.
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Returns the number of bits remaining.
    #[inline]
    pub fn remaining(&self) -> usize {
        self.len_bits().saturating_sub(self.pos)
    }

    /// Returns `true` if there are no more bits to read.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    fn ensure(&self, n: usize) -> Result<(), UnexpectedEndOfStream> {
        let remaining = self.remaining();
        if remaining < n {
            return Err(UnexpectedEndOfStream {
                requested: n,
                remaining,
            });
        }
        Ok(())
    }

    /// Reads `n` bits starting at `pos` without bounds checking against `remaining`.
    fn bits_at(&self, mut pos: usize, n: u8) -> u64 {
        let mut value = 0u64;
        let mut left = n as usize;
        while left > 0 {
            let byte = self.bytes[pos / 8];
            let avail = 8 - pos % 8;
            let take = avail.min(left);
            let chunk = (byte >> (avail - take)) & ((1u16 << take) - 1) as u8;
            value = (value << take) | chunk as u64;
            pos += take;
            left -= take;
        }
        value
    }

    /// Reads a single bit.
    #[inline]
    pub fn read_bit(&mut self) -> Result<bool, UnexpectedEndOfStream> {
        self.ensure(1)?;
        let bit = (self.bytes[self.pos / 8] >> (7 - self.pos % 8)) & 1 == 1;
        self.pos += 1;
        Ok(bit)
    }

    /// Reads `n` bits (`n <= 64`) as a `u64`, first bit read in the most
    /// significant position.
    pub fn read_bits(&mut self, n: u8) -> Result<u64, UnexpectedEndOfStream> {
        debug_assert!(n <= 64);
        self.ensure(n as usize)?;
        let value = self.bits_at(self.pos, n);
        self.pos += n as usize;
        Ok(value)
    }

    /// Reads eight bits regardless of alignment.
    pub fn read_byte(&mut self) -> Result<u8, UnexpectedEndOfStream> {
        Ok(self.read_bits(8)? as u8)
    }

    /// Reads `n` bits without advancing the position.
    pub fn peek_bits(&self, n: u8) -> Result<u64, UnexpectedEndOfStream> {
        debug_assert!(n <= 64);
        self.ensure(n as usize)?;
        Ok(self.bits_at(self.pos, n))
    }

    /// Advances the position by `n` bits.
    pub fn skip(&mut self, n: usize) -> Result<(), UnexpectedEndOfStream> {
        self.ensure(n)?;
        self.pos += n;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(sink: BitSink) -> BitSource {
        BitSource::new(sink.into_bytes())
    }

    fn limited(max_bytes: usize) -> BitSink {
        let mut sink = BitSink::new();
        sink.set_limit(Some(max_bytes));
        sink
    }

    #[test]
    fn test_write_and_read_bits() {
        let mut sink = BitSink::new();
        sink.write_bit(true).unwrap();
        sink.write_bit(false).unwrap();
        sink.write_bit(true).unwrap();
        sink.write_bit(true).unwrap();
        assert_eq!(sink.len_bits(), 4);
        assert_eq!(sink.as_bytes(), &[0b1011_0000]);

        let mut src = source(sink);
        assert_eq!(src.read_bit(), Ok(true));
        assert_eq!(src.read_bit(), Ok(false));
        assert_eq!(src.read_bit(), Ok(true));
        assert_eq!(src.read_bit(), Ok(true));
        // The rest of the byte is padding.
        assert_eq!(src.remaining(), 4);
    }

    #[test]
    fn test_write_and_read_multi_bits() {
        let mut sink = BitSink::new();
        sink.write_bits(0b11010, 5).unwrap();
        sink.write_bits(0xFF, 8).unwrap();
        sink.write_bits(0x00, 8).unwrap();
        assert_eq!(sink.len_bits(), 21);

        let mut src = source(sink);
        assert_eq!(src.read_bits(5), Ok(0b11010));
        assert_eq!(src.read_bits(8), Ok(0xFF));
        assert_eq!(src.read_bits(8), Ok(0x00));
        assert_eq!(src.remaining(), 3);
    }

    #[test]
    fn test_64_bit_value() {
        let mut sink = BitSink::new();
        let val: u64 = 0xDEAD_BEEF_CAFE_BABE;
        sink.write_bits(val, 64).unwrap();
        assert_eq!(sink.len_bits(), 64);
        assert_eq!(sink.as_bytes(), &val.to_be_bytes());

        let mut src = source(sink);
        assert_eq!(src.read_bits(64), Ok(val));
        assert!(src.is_exhausted());
    }

    #[test]
    fn test_unaligned_64_bit_value() {
        let mut sink = BitSink::new();
        sink.write_bits(0b101, 3).unwrap();
        sink.write_bits(u64::MAX - 1, 64).unwrap();
        sink.write_bit(true).unwrap();

        let mut src = source(sink);
        assert_eq!(src.read_bits(3), Ok(0b101));
        assert_eq!(src.read_bits(64), Ok(u64::MAX - 1));
        assert_eq!(src.read_bit(), Ok(true));
    }

    #[test]
    fn test_write_byte_splits_across_boundary() {
        let mut sink = BitSink::new();
        sink.write_bits(0b110, 3).unwrap();
        sink.write_byte(0b1010_1010).unwrap();
        assert_eq!(sink.len_bits(), 11);
        assert_eq!(sink.as_bytes(), &[0b1101_0101, 0b0100_0000]);

        let mut src = source(sink);
        assert_eq!(src.read_bits(3), Ok(0b110));
        assert_eq!(src.read_byte(), Ok(0b1010_1010));
    }

    #[test]
    fn test_flush_pads_with_given_bit() {
        let mut zeros = BitSink::new();
        zeros.write_bits(0b1, 1).unwrap();
        zeros.flush(false);
        assert_eq!(zeros.as_bytes(), &[0b1000_0000]);
        assert!(zeros.is_aligned());

        let mut ones = BitSink::new();
        ones.write_bits(0b0, 3).unwrap();
        ones.flush(true);
        assert_eq!(ones.as_bytes(), &[0b0001_1111]);
        assert_eq!(ones.len_bits(), 8);

        // Flushing an aligned sink adds nothing.
        ones.flush(true);
        assert_eq!(ones.len_bits(), 8);
    }

    #[test]
    fn test_read_past_end() {
        let mut src = BitSource::new(vec![0xAB]);
        assert_eq!(src.read_bits(6), Ok(0b101010));
        assert_eq!(
            src.read_bits(3),
            Err(UnexpectedEndOfStream {
                requested: 3,
                remaining: 2
            })
        );
        // A failed read does not move the cursor.
        assert_eq!(src.position(), 6);
        assert_eq!(src.read_bits(2), Ok(0b11));
        assert!(src.read_bit().is_err());
    }

    #[test]
    fn test_peek_and_skip() {
        let mut src = BitSource::new(vec![0b1111_0000, 0xFF]);
        assert_eq!(src.peek_bits(4), Ok(0b1111));
        assert_eq!(src.position(), 0);
        src.skip(4).unwrap();
        assert_eq!(src.peek_bits(12), Ok(0x0FF));
        assert!(src.skip(13).is_err());
    }

    #[test]
    fn test_empty_sink() {
        let sink = BitSink::new();
        assert!(sink.is_empty());
        assert_eq!(sink.len_bits(), 0);

        let mut src = source(sink);
        assert!(src.is_exhausted());
        assert!(src.read_bit().is_err());
    }

    #[test]
    fn test_limit_allows_within_budget() {
        let mut sink = limited(2);
        sink.write_bits(0xABCD, 16).unwrap();
        assert_eq!(sink.len_bits(), 16);
        assert!(sink.fits(0));
        assert!(!sink.fits(1));
    }

    #[test]
    fn test_limit_rejects_overflow() {
        let mut sink = limited(1);
        sink.write_bits(0xFF, 8).unwrap();
        assert_eq!(sink.write_bit(true), Err(BufferFull { limit: 1 }));
        assert_eq!(sink.write_byte(0), Err(BufferFull { limit: 1 }));
        assert_eq!(sink.len_bits(), 8);
    }

    #[test]
    fn test_limit_partial_byte_ok() {
        let mut sink = limited(1);
        sink.write_bits(0b10101, 5).unwrap();
        assert!(sink.fits(3));
        sink.write_bits(0b010, 3).unwrap();
        assert_eq!(sink.len_bits(), 8);
        assert!(sink.write_bit(false).is_err());
    }

    #[test]
    fn test_prefix_then_limit() {
        let mut sink = BitSink::with_prefix(&[0xDE, 0xAD], 16);
        assert_eq!(sink.len_bits(), 16);
        assert!(sink.is_aligned());
        assert_eq!(sink.limit(), None);
        sink.set_limit(Some(3));
        assert_eq!(sink.limit(), Some(3));
        sink.write_bits(0b101, 3).unwrap();
        assert_eq!(sink.as_bytes(), &[0xDE, 0xAD, 0b1010_0000]);
        sink.write_bits(0, 5).unwrap();
        assert_eq!(sink.write_bit(true), Err(BufferFull { limit: 3 }));
        sink.set_limit(None);
        sink.write_bit(true).unwrap();
        assert_eq!(sink.len_bits(), 25);
    }

    #[test]
    fn test_empty_prefix() {
        let sink = BitSink::with_prefix(&[], 0);
        assert!(sink.is_empty());
        assert_eq!(sink.len_bits(), 0);
    }

    #[test]
    fn test_zero_runs() {
        assert_eq!(leading_zeros(1), 63);
        assert_eq!(trailing_zeros(1), 0);
        assert_eq!(leading_zeros(1 << 63), 0);
        assert_eq!(trailing_zeros(1 << 63), 63);
        assert_eq!(leading_zeros(0x00F0), 56);
        assert_eq!(trailing_zeros(0x00F0), 4);
        assert_eq!(leading_zeros(0), 64);
        assert_eq!(trailing_zeros(0), 64);
    }

    #[test]
    fn test_bitmask() {
        assert_eq!(bitmask(0), 0);
        assert_eq!(bitmask(7), 0x7F);
        assert_eq!(bitmask(64), u64::MAX);
    }
}
