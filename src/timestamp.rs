//! Delta-of-delta timestamp fields.
//!
//! The first sample stores its offset from the block header in a fixed-width
//! signed field. Every later sample stores the change in delta (`dod`) behind
//! a prefix code:
//!
//! | dod              | prefix | payload |
//! |------------------|--------|---------|
//! | `0`              | `0`    | —       |
//! | `[-63, 64]`      | `10`   | 7 bits  |
//! | `[-255, 256]`    | `110`  | 9 bits  |
//! | `[-2047, 2048]`  | `1110` | 12 bits |
//! | otherwise        | `1111` | 64 bits |
//!
//! The terminal marker shares the `1111` prefix: it is followed by 32 one
//! bits, a single zero bit, and only zero padding up to the end of the block.
//! A genuine 64-bit payload always has at least 31 more payload bits plus a
//! value field behind those 33 bits, so the decoder recognizes the marker by
//! its bit pattern together with its position at the very end of the block.

use crate::bitbuffer::{bitmask, BitSink, BitSource, BufferFull};
use crate::error::{Corruption, Result};

/// Bits taken by the terminal marker, padding excluded.
pub const TERMINAL_BITS: u8 = 4 + TERMINAL_TAIL_BITS;

const TERMINAL_PREFIX: u64 = 0b1111;
const TERMINAL_ONES: u64 = 0xFFFF_FFFF;
/// 32 ones followed by one zero bit.
const TERMINAL_TAIL: u64 = TERMINAL_ONES << 1;
const TERMINAL_TAIL_BITS: u8 = 33;

/// Prefix-code tier selected for a delta-of-delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DodTier {
    Zero,
    Bits7,
    Bits9,
    Bits12,
    Bits64,
}

impl DodTier {
    /// Picks the narrowest tier that holds `dod`.
    pub fn for_dod(dod: i64) -> Self {
        match dod {
            0 => DodTier::Zero,
            -63..=64 => DodTier::Bits7,
            -255..=256 => DodTier::Bits9,
            -2047..=2048 => DodTier::Bits12,
            _ => DodTier::Bits64,
        }
    }

    /// The prefix bits and their count.
    pub fn prefix(self) -> (u64, u8) {
        match self {
            DodTier::Zero => (0b0, 1),
            DodTier::Bits7 => (0b10, 2),
            DodTier::Bits9 => (0b110, 3),
            DodTier::Bits12 => (0b1110, 4),
            DodTier::Bits64 => (0b1111, 4),
        }
    }

    pub fn payload_bits(self) -> u8 {
        match self {
            DodTier::Zero => 0,
            DodTier::Bits7 => 7,
            DodTier::Bits9 => 9,
            DodTier::Bits12 => 12,
            DodTier::Bits64 => 64,
        }
    }

    /// Interprets a payload read back from this tier.
    ///
    /// The narrow tiers are shifted by one against plain two's complement: they
    /// hold `-(2^(w-1) - 1)..=2^(w-1)`, so the pattern `1 << (w-1)` is positive.
    pub fn decode_payload(self, raw: u64) -> i64 {
        match self {
            DodTier::Zero => 0,
            DodTier::Bits64 => raw as i64,
            DodTier::Bits7 | DodTier::Bits9 | DodTier::Bits12 => {
                let width = self.payload_bits();
                if raw <= 1 << (width - 1) {
                    raw as i64
                } else {
                    raw as i64 - (1 << width)
                }
            }
        }
    }

    /// Total size of a field in this tier.
    pub fn encoded_bits(self) -> usize {
        self.prefix().1 as usize + self.payload_bits() as usize
    }
}

/// Sign-extend an `n`-bit value stored in a `u64` to a full `i64`.
#[inline]
pub fn sign_extend(value: u64, bits: u8) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

/// Timestamp history shared by the encoder and decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaState {
    pub last_timestamp: u64,
    pub last_delta: i64,
}

impl DeltaState {
    /// State after the first sample, which sits `delta` away from `header`.
    pub fn first(header: u64, delta: i64) -> Self {
        Self {
            last_timestamp: header.wrapping_add(delta as u64),
            last_delta: delta,
        }
    }

    /// Returns `(delta, dod)` for `timestamp` without updating the state.
    pub fn delta_of_delta(&self, timestamp: u64) -> (i64, i64) {
        let delta = timestamp.wrapping_sub(self.last_timestamp) as i64;
        (delta, delta.wrapping_sub(self.last_delta))
    }

    pub fn push(&mut self, timestamp: u64, delta: i64) {
        self.last_timestamp = timestamp;
        self.last_delta = delta;
    }

    /// Applies a decoded `dod` and returns the reconstructed timestamp.
    pub fn apply(&mut self, dod: i64) -> u64 {
        self.last_delta = self.last_delta.wrapping_add(dod);
        self.last_timestamp = self.last_timestamp.wrapping_add(self.last_delta as u64);
        self.last_timestamp
    }
}

// ── first-sample field ─────────────────────────────────────────────────

/// The raw pattern reserved for "no samples" in a `bits`-wide first-delta field.
#[inline]
pub fn empty_sentinel(bits: u8) -> u64 {
    1u64 << (bits - 1)
}

/// Returns `true` if `delta` has a non-sentinel encoding in `bits` bits.
pub fn first_delta_fits(delta: i64, bits: u8) -> bool {
    let max = bitmask(bits - 1) as i64;
    (-max..=max).contains(&delta)
}

pub fn write_first_delta(sink: &mut BitSink, delta: i64, bits: u8) -> Result<(), BufferFull> {
    debug_assert!(first_delta_fits(delta, bits));
    sink.write_bits(delta as u64 & bitmask(bits), bits)
}

/// Content of the first-delta field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstField {
    Delta(i64),
    Empty,
}

pub fn read_first_delta(source: &mut BitSource, bits: u8) -> Result<FirstField> {
    let raw = source.read_bits(bits)?;
    if raw == empty_sentinel(bits) {
        return Ok(FirstField::Empty);
    }
    Ok(FirstField::Delta(sign_extend(raw, bits)))
}

// ── delta-of-delta field ───────────────────────────────────────────────

/// Writes a delta-of-delta with the narrowest prefix tier.
pub fn write_dod(sink: &mut BitSink, dod: i64) -> Result<(), BufferFull> {
    let tier = DodTier::for_dod(dod);
    let (prefix, len) = tier.prefix();
    sink.write_bits(prefix, len)?;
    let width = tier.payload_bits();
    sink.write_bits(dod as u64 & bitmask(width), width)
}

pub fn write_terminal(sink: &mut BitSink) -> Result<(), BufferFull> {
    sink.write_bits(TERMINAL_PREFIX, 4)?;
    sink.write_bits(TERMINAL_ONES, 32)?;
    sink.write_bit(false)
}

/// Content of a delta-of-delta field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DodField {
    Dod(i64),
    End,
}

/// Reads one delta-of-delta field, recognizing the terminal marker.
pub fn read_dod(source: &mut BitSource) -> Result<DodField> {
    if !source.read_bit()? {
        return Ok(DodField::Dod(0));
    }
    let tier = if !source.read_bit()? {
        DodTier::Bits7
    } else if !source.read_bit()? {
        DodTier::Bits9
    } else if !source.read_bit()? {
        DodTier::Bits12
    } else {
        DodTier::Bits64
    };

    if tier == DodTier::Bits64 && at_terminal(source)? {
        return Ok(DodField::End);
    }

    let width = tier.payload_bits();
    let raw = source.read_bits(width)?;
    Ok(DodField::Dod(tier.decode_payload(raw)))
}

/// Called right after a `1111` prefix. Consumes the rest of the block and
/// returns `true` if it is the terminal marker; leaves the cursor alone otherwise.
fn at_terminal(source: &mut BitSource) -> Result<bool> {
    let remaining = source.remaining();
    if remaining < TERMINAL_TAIL_BITS as usize || remaining - TERMINAL_TAIL_BITS as usize >= 8 {
        return Ok(false);
    }
    if source.peek_bits(TERMINAL_TAIL_BITS)? != TERMINAL_TAIL {
        return Ok(false);
    }
    source.skip(TERMINAL_TAIL_BITS as usize)?;
    let padding = source.remaining();
    if source.read_bits(padding as u8)? != 0 {
        return Err(Corruption::TrailingBits { bits: padding }.into());
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dod_roundtrip(dod: i64) -> (usize, i64) {
        let mut sink = BitSink::new();
        write_dod(&mut sink, dod).unwrap();
        let bits = sink.len_bits();
        // Trailing filler keeps a 64-bit payload away from the terminal check.
        sink.write_bits(0, 64).unwrap();
        let mut source = BitSource::new(sink.into_bytes());
        match read_dod(&mut source).unwrap() {
            DodField::Dod(v) => (bits, v),
            DodField::End => panic!("dod {dod} decoded as terminal"),
        }
    }

    #[test]
    fn test_tier_boundaries() {
        let cases = [
            (0, DodTier::Zero),
            (1, DodTier::Bits7),
            (64, DodTier::Bits7),
            (-63, DodTier::Bits7),
            (65, DodTier::Bits9),
            (-64, DodTier::Bits9),
            (256, DodTier::Bits9),
            (-255, DodTier::Bits9),
            (257, DodTier::Bits12),
            (-256, DodTier::Bits12),
            (2048, DodTier::Bits12),
            (-2047, DodTier::Bits12),
            (2049, DodTier::Bits64),
            (-2048, DodTier::Bits64),
            (i64::MAX, DodTier::Bits64),
            (i64::MIN, DodTier::Bits64),
        ];
        for (dod, tier) in cases {
            assert_eq!(DodTier::for_dod(dod), tier, "dod {dod}");
            let (bits, decoded) = dod_roundtrip(dod);
            assert_eq!(decoded, dod);
            assert_eq!(bits, tier.encoded_bits(), "dod {dod}");
        }
    }

    #[test]
    fn test_negative_payload_is_twos_complement() {
        let mut sink = BitSink::new();
        write_dod(&mut sink, -3).unwrap();
        // `10` + 1111101
        assert_eq!(sink.as_bytes(), &[0b1011_1110, 0b1000_0000]);
    }

    #[test]
    fn test_positive_tier_edges_decode_positive() {
        for (dod, raw) in [(64i64, 0x40u64), (256, 0x100), (2048, 0x800)] {
            let tier = DodTier::for_dod(dod);
            let mut sink = BitSink::new();
            write_dod(&mut sink, dod).unwrap();
            let mut source = BitSource::new(sink.into_bytes());
            source.skip(tier.prefix().1 as usize).unwrap();
            assert_eq!(source.read_bits(tier.payload_bits()), Ok(raw), "dod {dod}");
            assert_eq!(tier.decode_payload(raw), dod);
            assert_eq!(tier.decode_payload(raw + 1), -dod + 1);
        }
    }

    #[test]
    fn test_sign_extend() {
        assert_eq!(sign_extend(0x7F, 7), -1);
        assert_eq!(sign_extend(0x3F, 7), 63);
        assert_eq!(sign_extend(0x40, 7), -64);
        assert_eq!(sign_extend(u64::MAX, 64), -1);
    }

    #[test]
    fn test_terminal_recognized() {
        let mut sink = BitSink::new();
        write_dod(&mut sink, 0).unwrap();
        write_terminal(&mut sink).unwrap();
        sink.flush(false);
        let mut source = BitSource::new(sink.into_bytes());
        assert_eq!(read_dod(&mut source).unwrap(), DodField::Dod(0));
        assert_eq!(read_dod(&mut source).unwrap(), DodField::End);
        assert!(source.is_exhausted());
    }

    #[test]
    fn test_large_dod_with_terminal_like_prefix() {
        // High 33 bits equal the terminal tail pattern.
        let dod = (0xFFFF_FFFF_0000_0000u64 | 0x1234) as i64;
        assert_eq!(DodTier::for_dod(dod), DodTier::Bits64);
        let mut sink = BitSink::new();
        write_dod(&mut sink, dod).unwrap();
        write_terminal(&mut sink).unwrap();
        sink.flush(false);
        let mut source = BitSource::new(sink.into_bytes());
        assert_eq!(read_dod(&mut source).unwrap(), DodField::Dod(dod));
        assert_eq!(read_dod(&mut source).unwrap(), DodField::End);
    }

    #[test]
    fn test_terminal_with_dirty_padding() {
        let mut sink = BitSink::new();
        write_terminal(&mut sink).unwrap();
        sink.flush(true);
        let mut source = BitSource::new(sink.into_bytes());
        assert!(matches!(
            read_dod(&mut source),
            Err(crate::Error::CorruptStream(Corruption::TrailingBits { bits: 3 }))
        ));
    }

    #[test]
    fn test_first_delta_range() {
        assert!(first_delta_fits(0, 14));
        assert!(first_delta_fits(8191, 14));
        assert!(first_delta_fits(-8191, 14));
        assert!(!first_delta_fits(8192, 14));
        assert!(!first_delta_fits(-8192, 14));
        assert!(first_delta_fits(i64::MAX, 64));
        assert!(first_delta_fits(-i64::MAX, 64));
        assert!(!first_delta_fits(i64::MIN, 64));
    }

    #[test]
    fn test_first_delta_roundtrip_and_sentinel() {
        for delta in [0, 1, -1, 8191, -8191] {
            let mut sink = BitSink::new();
            write_first_delta(&mut sink, delta, 14).unwrap();
            assert_eq!(sink.len_bits(), 14);
            let mut source = BitSource::new(sink.into_bytes());
            assert_eq!(
                read_first_delta(&mut source, 14).unwrap(),
                FirstField::Delta(delta)
            );
        }

        let mut sink = BitSink::new();
        sink.write_bits(empty_sentinel(14), 14).unwrap();
        let mut source = BitSource::new(sink.into_bytes());
        assert_eq!(read_first_delta(&mut source, 14).unwrap(), FirstField::Empty);
    }

    #[test]
    fn test_delta_state_wraps() {
        let mut enc = DeltaState::first(u64::MAX - 1, 1);
        assert_eq!(enc.last_timestamp, u64::MAX);
        let (delta, dod) = enc.delta_of_delta(1);
        assert_eq!(delta, 2);
        assert_eq!(dod, 1);
        enc.push(1, delta);

        let mut dec = DeltaState::first(u64::MAX - 1, 1);
        assert_eq!(dec.apply(dod), 1);
        assert_eq!(dec, enc);
    }
}
