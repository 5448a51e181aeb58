use thiserror::Error;

use crate::bitbuffer::{BufferFull, UnexpectedEndOfStream};

/// Ways a block can fail to decode.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Corruption {
    /// The block ended in the middle of a field.
    #[error(transparent)]
    Truncated(#[from] UnexpectedEndOfStream),

    /// A "reuse window" bit was read before any window was established.
    #[error("window reuse requested before any window was set")]
    InvalidWindow,

    /// A new-window header describes more than 64 bits.
    #[error("window of {leading} leading zeros and {significant} significant bits exceeds 64 bits")]
    InvalidWindowWidth { leading: u8, significant: u8 },

    /// The empty-block sentinel was followed by a non-zero value field.
    #[error("empty-block sentinel carries non-zero value {0:#x}")]
    EmptyBlockValue(u64),

    /// Bits after the terminal marker are not zero padding.
    #[error("{bits} unexpected bits after the terminal marker")]
    TrailingBits { bits: usize },
}

/// Errors returned by the encoder and decoder.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// The block is malformed or truncated. Fatal for the decoder instance.
    #[error("corrupt stream: {0}")]
    CorruptStream(#[from] Corruption),

    /// `compress` or `finish` was called after the block was finished.
    #[error("encoder already finished")]
    AlreadyFinished,

    /// The configured block limit cannot hold this sample and the terminal marker.
    #[error(transparent)]
    BufferFull(#[from] BufferFull),

    /// The first sample is too far from the header timestamp for the first-delta field.
    #[error("first delta {delta} does not fit in a {bits}-bit first-delta field")]
    FirstDeltaOutOfRange { delta: i64, bits: u8 },

    /// The codec configuration is inconsistent.
    #[error("invalid codec config: {0}")]
    InvalidConfig(String),
}

impl From<UnexpectedEndOfStream> for Error {
    fn from(err: UnexpectedEndOfStream) -> Self {
        Error::CorruptStream(Corruption::Truncated(err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
