use crate::error::{Error, Result};
use crate::timestamp::TERMINAL_BITS;

/// Width of the header timestamp field.
pub const HEADER_BITS: u8 = 64;

/// Default width of the first-sample delta field.
pub const DEFAULT_FIRST_DELTA_BITS: u8 = 14;

/// Settings shared by an encoder and the decoder reading its blocks.
///
/// `first_delta_bits` is not recorded in the block, so both sides must agree
/// on it. The default matches the reference 14-bit layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecConfig {
    /// Width of the signed first-sample delta field (2..=64).
    pub first_delta_bits: u8,
    /// Upper bound on the finished block size in bytes, header and terminal
    /// marker included.
    pub max_block_bytes: Option<usize>,
    /// Bytes pre-allocated for the output buffer.
    pub initial_capacity: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            first_delta_bits: DEFAULT_FIRST_DELTA_BITS,
            max_block_bytes: None,
            initial_capacity: 128,
        }
    }
}

impl CodecConfig {
    pub fn with_first_delta_bits(mut self, bits: u8) -> Self {
        self.first_delta_bits = bits;
        self
    }

    pub fn with_limit(mut self, max_bytes: usize) -> Self {
        self.max_block_bytes = Some(max_bytes);
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Size of the smallest block this configuration can produce: an empty
    /// block, or a single sample with its terminal marker, whichever is larger.
    pub fn min_block_bytes(&self) -> usize {
        let first = HEADER_BITS as usize + self.first_delta_bits as usize + 64;
        (first + TERMINAL_BITS as usize).div_ceil(8)
    }

    pub fn validate(&self) -> Result<()> {
        if !(2..=64).contains(&self.first_delta_bits) {
            return Err(Error::InvalidConfig(format!(
                "first_delta_bits must be in 2..=64, got {}",
                self.first_delta_bits
            )));
        }
        if let Some(max) = self.max_block_bytes {
            let min = self.min_block_bytes();
            if max < min {
                return Err(Error::InvalidConfig(format!(
                    "max_block_bytes {max} is below the {min} byte minimum block"
                )));
            }
        }
        Ok(())
    }
}
