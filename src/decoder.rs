use std::iter::FusedIterator;

use bytes::Bytes;
use log::{debug, warn};

use crate::bitbuffer::BitSource;
use crate::config::{CodecConfig, HEADER_BITS};
use crate::encoder::Sample;
use crate::error::{Corruption, Error, Result};
use crate::timestamp::{self, DeltaState, DodField, FirstField};
use crate::value::ValueState;

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    Start,
    Streaming {
        deltas: DeltaState,
        values: ValueState,
    },
    Done,
    Failed(Corruption),
}

/// The block decompressor.
///
/// Reads samples back one at a time from a finished block. Blocks are only
/// valid once the encoder's `finish()` has run; a truncated or otherwise
/// damaged block yields `Error::CorruptStream`, after which the decoder
/// keeps reporting that error.
///
/// # Example
/// ```
/// use gorilla_block::{Decoder, Encoder, Sample};
///
/// let mut encoder = Encoder::new(1_609_459_200);
/// encoder.compress(1_609_459_200, 12).unwrap();
/// encoder.compress(1_609_459_260, 13).unwrap();
/// let block = encoder.finish().unwrap();
///
/// let mut decoder = Decoder::new(block);
/// assert_eq!(decoder.next_sample().unwrap(), Some(Sample::new(1_609_459_200, 12)));
/// assert_eq!(decoder.next_sample().unwrap(), Some(Sample::new(1_609_459_260, 13)));
/// assert_eq!(decoder.next_sample().unwrap(), None);
/// ```
#[derive(Debug, Clone)]
pub struct Decoder {
    source: BitSource,
    first_delta_bits: u8,
    header: Option<u64>,
    state: State,
    count: u64,
}

impl Decoder {
    /// Creates a decoder for a block written with the default configuration.
    pub fn new(bytes: impl Into<Bytes>) -> Self {
        Self::build(bytes.into(), &CodecConfig::default())
    }

    /// Creates a decoder for a block written with `config`.
    pub fn with_config(bytes: impl Into<Bytes>, config: &CodecConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(bytes.into(), config))
    }

    fn build(bytes: Bytes, config: &CodecConfig) -> Self {
        Self {
            source: BitSource::new(bytes),
            first_delta_bits: config.first_delta_bits,
            header: None,
            state: State::Start,
            count: 0,
        }
    }

    /// Decodes every sample in a default-configuration block.
    pub fn decode(bytes: impl Into<Bytes>) -> Result<Vec<Sample>> {
        Self::new(bytes).collect()
    }

    /// Returns the next sample, `Ok(None)` at the end of the block.
    pub fn next_sample(&mut self) -> Result<Option<Sample>> {
        match &self.state {
            State::Done => return Ok(None),
            State::Failed(corruption) => return Err(Error::CorruptStream(corruption.clone())),
            State::Start | State::Streaming { .. } => {}
        }
        match self.step() {
            Ok(sample) => {
                if sample.is_some() {
                    self.count += 1;
                }
                Ok(sample)
            }
            Err(err) => {
                if let Error::CorruptStream(corruption) = &err {
                    warn!(
                        "corrupt block at bit {} after {} samples: {}",
                        self.source.position(),
                        self.count,
                        corruption
                    );
                    self.state = State::Failed(corruption.clone());
                }
                Err(err)
            }
        }
    }

    fn step(&mut self) -> Result<Option<Sample>> {
        match self.state {
            State::Start => {
                let header = self.source.read_bits(HEADER_BITS)?;
                self.header = Some(header);
                match timestamp::read_first_delta(&mut self.source, self.first_delta_bits)? {
                    FirstField::Empty => {
                        let value = self.source.read_bits(64)?;
                        if value != 0 {
                            return Err(Corruption::EmptyBlockValue(value).into());
                        }
                        self.expect_padding()?;
                        self.finish();
                        Ok(None)
                    }
                    FirstField::Delta(delta) => {
                        let value = self.source.read_bits(64)?;
                        let deltas = DeltaState::first(header, delta);
                        self.state = State::Streaming {
                            deltas,
                            values: ValueState::new(value),
                        };
                        Ok(Some(Sample::new(deltas.last_timestamp, value)))
                    }
                }
            }
            State::Streaming {
                mut deltas,
                mut values,
            } => match timestamp::read_dod(&mut self.source)? {
                DodField::End => {
                    self.finish();
                    Ok(None)
                }
                DodField::Dod(dod) => {
                    let timestamp = deltas.apply(dod);
                    let value = values.read(&mut self.source)?;
                    self.state = State::Streaming { deltas, values };
                    Ok(Some(Sample::new(timestamp, value)))
                }
            },
            State::Done | State::Failed(_) => Ok(None),
        }
    }

    /// Only zero padding up to the byte boundary may follow the last field.
    fn expect_padding(&mut self) -> Result<()> {
        let bits = self.source.remaining();
        if bits >= 8 || self.source.read_bits(bits as u8)? != 0 {
            return Err(Corruption::TrailingBits { bits }.into());
        }
        Ok(())
    }

    fn finish(&mut self) {
        self.state = State::Done;
        debug!(
            "decoded block: header {:?} samples {}",
            self.header, self.count
        );
    }

    /// The block's header timestamp, once the first `next` call has read it.
    pub fn header(&self) -> Option<u64> {
        self.header
    }

    /// Number of samples returned so far.
    pub fn samples_read(&self) -> u64 {
        self.count
    }

    /// Returns `true` once the terminal marker has been read.
    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }
}

impl Iterator for Decoder {
    type Item = Result<Sample>;

    /// Yields samples until the terminal marker. A corrupt block yields its
    /// error once, then ends.
    fn next(&mut self) -> Option<Self::Item> {
        if let State::Failed(_) = self.state {
            return None;
        }
        self.next_sample().transpose()
    }
}

impl FusedIterator for Decoder {}
