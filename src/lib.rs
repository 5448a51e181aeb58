//! # gorilla-block
//!
//! A bit-exact block codec for `(timestamp, value)` samples in the style of
//! Facebook's Gorilla time-series compression (*"Gorilla: A Fast, Scalable,
//! In-Memory Time Series Database"*, VLDB 2015).
//!
//! ## Algorithm overview
//!
//! - **Timestamps** are stored as the change between consecutive deltas
//!   (*delta-of-delta*). Regularly spaced samples cost a single bit.
//! - **Values** are opaque 64-bit patterns. Each is XORed with its predecessor;
//!   an unchanged value costs a single bit, and changed values reuse the
//!   previous leading/trailing zero window whenever it still fits.
//!
//! The codec never interprets values. Callers storing floats pass
//! `f64::to_bits()` and convert back with `f64::from_bits()`.
//!
//! ## Block layout
//!
//! ```text
//! [64 bits] header timestamp
//! [14 bits] first-sample delta from the header (or the empty-block sentinel)
//! [64 bits] first-sample raw value
//! per further sample: delta-of-delta field, value field
//! terminal marker: 1111, 32 one bits, 0 (omitted for empty blocks)
//! zero padding to a byte boundary
//! ```
//!
//! ## Example
//!
//! ```rust
//! use gorilla_block::{Decoder, Encoder, Sample};
//!
//! let mut encoder = Encoder::new(1_609_459_200);
//! encoder.compress(1_609_459_200, 12.0f64.to_bits()).unwrap();
//! encoder.compress(1_609_459_260, 12.5f64.to_bits()).unwrap();
//! encoder.compress(1_609_459_320, 13.0f64.to_bits()).unwrap();
//! let block = encoder.finish().unwrap();
//!
//! let samples = Decoder::decode(block).unwrap();
//! assert_eq!(samples.len(), 3);
//! assert_eq!(f64::from_bits(samples[1].value), 12.5);
//! ```
//!
//! ## Lazy iteration
//!
//! `Decoder` is an iterator, so large blocks can be walked without
//! allocating the full output:
//!
//! ```rust
//! # use gorilla_block::{Decoder, Encoder};
//! # let mut encoder = Encoder::new(0);
//! # encoder.compress(0, 1).unwrap();
//! # encoder.compress(60, 2).unwrap();
//! # let block = encoder.finish().unwrap();
//! for result in Decoder::new(block) {
//!     let sample = result.unwrap();
//!     println!("{}: {:#x}", sample.timestamp, sample.value);
//! }
//! ```

use bytes::Bytes;

pub mod bitbuffer;
pub mod config;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod timestamp;
pub mod value;

// Re-export primary types at the crate root.
pub use bitbuffer::{BufferFull, UnexpectedEndOfStream};
pub use config::CodecConfig;
pub use decoder::Decoder;
pub use encoder::{Encoder, Sample};
pub use error::{Corruption, Error, Result};

/// Starts a block anchored at `header`.
pub fn new_encoder(header: u64) -> Encoder {
    Encoder::new(header)
}

/// Opens a finished block for reading.
pub fn new_decoder(bytes: impl Into<Bytes>) -> Decoder {
    Decoder::new(bytes)
}

/// Encodes `samples` into a finished block anchored at `header`.
pub fn encode(header: u64, samples: &[Sample]) -> Result<Bytes> {
    let mut encoder = Encoder::new(header);
    for sample in samples {
        encoder.compress_sample(*sample)?;
    }
    encoder.finish()
}

/// Decodes every sample in a finished block.
pub fn decode(bytes: impl Into<Bytes>) -> Result<Vec<Sample>> {
    Decoder::decode(bytes)
}
