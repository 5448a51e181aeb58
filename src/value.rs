//! XOR value fields with a reusable significant-bits window.
//!
//! Each value is XORed with its predecessor. An unchanged value costs one
//! `0` bit. Otherwise a `1` bit is followed by either:
//!
//! - `0` and the XOR's bits inside the current window, or
//! - `1`, a new window (5-bit leading-zero count, 6-bit `significant - 1`)
//!   and the significant bits themselves.

use log::trace;

use crate::bitbuffer::{bitmask, leading_zeros, trailing_zeros, BitSink, BitSource, BufferFull};
use crate::error::{Corruption, Result};

/// Width of the leading-zero count in a window header.
pub const LEADING_BITS: u8 = 5;
/// Width of the significant-bit count in a window header.
pub const SIGNIFICANT_BITS: u8 = 6;
/// Largest leading-zero count a window header can carry. Longer runs are
/// clamped, which widens the window without losing bits.
pub const MAX_LEADING: u8 = (1 << LEADING_BITS) - 1;

/// The span of meaningful bits in an XOR result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub leading: u8,
    pub trailing: u8,
}

impl Window {
    /// Window for a non-zero XOR result.
    pub fn of(xor: u64) -> Self {
        debug_assert!(xor != 0);
        Self {
            leading: leading_zeros(xor).min(MAX_LEADING),
            trailing: trailing_zeros(xor),
        }
    }

    pub fn significant(&self) -> u8 {
        64 - self.leading - self.trailing
    }

    /// Returns `true` if every set bit of `xor` falls inside this window.
    pub fn holds(&self, xor: u64) -> bool {
        leading_zeros(xor) >= self.leading && trailing_zeros(xor) >= self.trailing
    }
}

/// How a single value will be written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueField {
    Unchanged,
    Reuse { xor: u64, window: Window },
    NewWindow { xor: u64, window: Window },
}

impl ValueField {
    pub fn encoded_bits(&self) -> usize {
        match self {
            ValueField::Unchanged => 1,
            ValueField::Reuse { window, .. } => 2 + window.significant() as usize,
            ValueField::NewWindow { window, .. } => {
                2 + (LEADING_BITS + SIGNIFICANT_BITS) as usize + window.significant() as usize
            }
        }
    }

    pub fn write(&self, sink: &mut BitSink) -> Result<(), BufferFull> {
        match *self {
            ValueField::Unchanged => sink.write_bit(false),
            ValueField::Reuse { xor, window } => {
                sink.write_bits(0b10, 2)?;
                let significant = window.significant();
                sink.write_bits((xor >> window.trailing) & bitmask(significant), significant)
            }
            ValueField::NewWindow { xor, window } => {
                sink.write_bits(0b11, 2)?;
                let significant = window.significant();
                sink.write_bits(window.leading as u64, LEADING_BITS)?;
                sink.write_bits((significant - 1) as u64, SIGNIFICANT_BITS)?;
                sink.write_bits(xor >> window.trailing, significant)
            }
        }
    }
}

/// Value history shared by the encoder and decoder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValueState {
    last_value: u64,
    window: Option<Window>,
}

impl ValueState {
    pub fn new(first: u64) -> Self {
        Self {
            last_value: first,
            window: None,
        }
    }

    /// Chooses the encoding for `value` without updating the state.
    pub fn plan(&self, value: u64) -> ValueField {
        let xor = self.last_value ^ value;
        if xor == 0 {
            return ValueField::Unchanged;
        }
        match self.window {
            Some(window) if window.holds(xor) => ValueField::Reuse { xor, window },
            _ => ValueField::NewWindow {
                xor,
                window: Window::of(xor),
            },
        }
    }

    /// Records `value` as written with `field`.
    pub fn commit(&mut self, value: u64, field: &ValueField) {
        if let ValueField::NewWindow { window, .. } = field {
            trace!(
                "value window -> leading {} trailing {}",
                window.leading,
                window.trailing
            );
            self.window = Some(*window);
        }
        self.last_value = value;
    }

    /// Reads one value field and returns the reconstructed value.
    pub fn read(&mut self, source: &mut BitSource) -> Result<u64> {
        if !source.read_bit()? {
            return Ok(self.last_value);
        }
        let window = if !source.read_bit()? {
            self.window.ok_or(Corruption::InvalidWindow)?
        } else {
            let leading = source.read_bits(LEADING_BITS)? as u8;
            let significant = source.read_bits(SIGNIFICANT_BITS)? as u8 + 1;
            if leading + significant > 64 {
                return Err(Corruption::InvalidWindowWidth {
                    leading,
                    significant,
                }
                .into());
            }
            let window = Window {
                leading,
                trailing: 64 - leading - significant,
            };
            self.window = Some(window);
            window
        };
        let bits = source.read_bits(window.significant())?;
        self.last_value ^= bits << window.trailing;
        Ok(self.last_value)
    }
}
