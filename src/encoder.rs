use bytes::Bytes;
use log::debug;

use crate::bitbuffer::{BitSink, BufferFull};
use crate::config::{CodecConfig, HEADER_BITS};
use crate::error::{Error, Result};
use crate::timestamp::{self, DeltaState, DodTier, TERMINAL_BITS};
use crate::value::ValueState;

/// A single time-series sample: a timestamp and an opaque 64-bit value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Sample {
    pub timestamp: u64,
    pub value: u64,
}

impl Sample {
    /// Creates a new `Sample`.
    pub fn new(timestamp: u64, value: u64) -> Self {
        Self { timestamp, value }
    }
}

impl From<(u64, u64)> for Sample {
    fn from((timestamp, value): (u64, u64)) -> Self {
        Self::new(timestamp, value)
    }
}

impl From<Sample> for (u64, u64) {
    fn from(sample: Sample) -> Self {
        (sample.timestamp, sample.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Empty,
    Streaming {
        deltas: DeltaState,
        values: ValueState,
    },
    Finished,
}

/// The block compressor.
///
/// Writes the header timestamp on construction, then one field pair per
/// sample:
/// - **Timestamps**: the first as a signed offset from the header, the rest as
///   delta-of-delta with variable-length prefixes.
/// - **Values**: the first raw, the rest XORed with their predecessor inside a
///   reusable leading/trailing zero window.
///
/// # Example
/// ```
/// use gorilla_block::{Decoder, Encoder, Sample};
///
/// let mut encoder = Encoder::new(1000);
/// encoder.compress(1000, 42).unwrap();
/// encoder.compress(1001, 42).unwrap();
/// encoder.compress(1003, 100).unwrap();
/// let block = encoder.finish().unwrap();
///
/// let samples: Vec<Sample> = Decoder::new(block).collect::<Result<_, _>>().unwrap();
/// assert_eq!(samples[2], Sample::new(1003, 100));
/// ```
#[derive(Debug, Clone)]
pub struct Encoder {
    sink: BitSink,
    config: CodecConfig,
    header: u64,
    state: State,
    /// Number of samples encoded so far.
    count: u64,
}

impl Encoder {
    /// Creates an encoder with the default configuration.
    pub fn new(header: u64) -> Self {
        Self::build(header, CodecConfig::default())
    }

    /// Creates an encoder with a custom configuration.
    ///
    /// With `max_block_bytes` set, `compress()` returns `Err(BufferFull)` once a
    /// sample would no longer leave room for the terminal marker. The rejected
    /// sample is not written, so `finish()` still produces a valid block.
    pub fn with_config(header: u64, config: CodecConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(header, config))
    }

    fn build(header: u64, config: CodecConfig) -> Self {
        let mut sink = BitSink::with_prefix(&header.to_be_bytes(), config.initial_capacity);
        debug_assert_eq!(sink.len_bits(), HEADER_BITS as usize);
        // A validated limit is never below the header size.
        sink.set_limit(config.max_block_bytes);
        Self {
            sink,
            config,
            header,
            state: State::Empty,
            count: 0,
        }
    }

    /// Appends a sample to the block.
    ///
    /// Timestamps need not be ordered; deltas wrap on 64 bits. The first
    /// sample must lie within the first-delta field's range of the header.
    pub fn compress(&mut self, timestamp: u64, value: u64) -> Result<()> {
        match self.state {
            State::Finished => return Err(Error::AlreadyFinished),
            State::Empty => self.compress_first(timestamp, value)?,
            State::Streaming {
                mut deltas,
                mut values,
            } => {
                let (delta, dod) = deltas.delta_of_delta(timestamp);
                let field = values.plan(value);
                self.reserve(DodTier::for_dod(dod).encoded_bits() + field.encoded_bits())?;

                timestamp::write_dod(&mut self.sink, dod)?;
                field.write(&mut self.sink)?;

                deltas.push(timestamp, delta);
                values.commit(value, &field);
                self.state = State::Streaming { deltas, values };
            }
        }
        self.count += 1;
        Ok(())
    }

    /// Convenience wrapper around `compress` for a `Sample`.
    pub fn compress_sample(&mut self, sample: Sample) -> Result<()> {
        self.compress(sample.timestamp, sample.value)
    }

    fn compress_first(&mut self, timestamp: u64, value: u64) -> Result<()> {
        let bits = self.config.first_delta_bits;
        let delta = timestamp.wrapping_sub(self.header) as i64;
        if !timestamp::first_delta_fits(delta, bits) {
            return Err(Error::FirstDeltaOutOfRange { delta, bits });
        }
        self.reserve(bits as usize + 64)?;

        timestamp::write_first_delta(&mut self.sink, delta, bits)?;
        self.sink.write_bits(value, 64)?;

        self.state = State::Streaming {
            deltas: DeltaState::first(self.header, delta),
            values: ValueState::new(value),
        };
        Ok(())
    }

    /// Fails unless `bits` plus a terminal marker still fit under the limit.
    fn reserve(&self, bits: usize) -> Result<(), BufferFull> {
        match self.sink.limit() {
            Some(limit) if !self.sink.fits(bits + TERMINAL_BITS as usize) => {
                Err(BufferFull { limit })
            }
            _ => Ok(()),
        }
    }

    /// Writes the end-of-block marker and returns the finished block.
    ///
    /// Must be called exactly once; further calls, and any `compress` after
    /// it, return `Err(AlreadyFinished)`.
    pub fn finish(&mut self) -> Result<Bytes> {
        match self.state {
            State::Finished => return Err(Error::AlreadyFinished),
            State::Empty => {
                let bits = self.config.first_delta_bits;
                self.sink.write_bits(timestamp::empty_sentinel(bits), bits)?;
                self.sink.write_bits(0, 64)?;
            }
            State::Streaming { .. } => timestamp::write_terminal(&mut self.sink)?,
        }
        self.sink.flush(false);
        self.state = State::Finished;

        let bytes = Bytes::from(std::mem::take(&mut self.sink).into_bytes());
        debug!(
            "finished block: header {} samples {} bytes {}",
            self.header,
            self.count,
            bytes.len()
        );
        Ok(bytes)
    }

    /// The header timestamp this block is anchored to.
    pub fn header(&self) -> u64 {
        self.header
    }

    /// Returns the number of samples encoded so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Bits written so far, header included. Zero after `finish()`.
    pub fn len_bits(&self) -> usize {
        self.sink.len_bits()
    }

    pub fn is_finished(&self) -> bool {
        self.state == State::Finished
    }
}
