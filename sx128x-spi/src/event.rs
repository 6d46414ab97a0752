//! Bus events produced by an upstream SPI analyzer.

use std::fmt::{
    Debug,
    Display,
};

use bytes::Bytes;

/// Capture time in seconds, as reported by the analyzer.
///
/// Timestamps are monotonically non-decreasing across an event stream.
#[derive(Clone, Copy, PartialEq, PartialOrd, Default)]
pub struct Timestamp(f64);

impl Timestamp {
    pub const fn from_secs(seconds: f64) -> Self {
        Self(seconds)
    }

    pub const fn as_secs(&self) -> f64 {
        self.0
    }
}

impl Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.9}", self.0)
    }
}

impl Debug for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// One atomic byte exchange on the bus.
///
/// Both directions are clocked simultaneously, so the buffers have equal
/// length and are never empty.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transfer {
    pub mosi: Bytes,
    pub miso: Bytes,
}

/// One event from the upstream analyzer.
#[derive(Clone, Debug, PartialEq)]
pub struct BusEvent {
    pub kind: BusEventKind,
    pub start: Timestamp,
    pub end: Timestamp,
}

#[derive(Clone, Debug, PartialEq)]
pub enum BusEventKind {
    /// Chip select asserted.
    Enable,
    /// Bytes exchanged while chip select is asserted.
    Transfer(Transfer),
    /// Chip select deasserted.
    Disable,
    /// The analyzer flagged a clock polarity fault.
    Error,
    /// A frame type this decoder doesn't recognize.
    Other(String),
}

impl BusEvent {
    pub fn enable(start: Timestamp, end: Timestamp) -> Self {
        Self {
            kind: BusEventKind::Enable,
            start,
            end,
        }
    }

    pub fn transfer(start: Timestamp, end: Timestamp, mosi: Bytes, miso: Bytes) -> Self {
        Self {
            kind: BusEventKind::Transfer(Transfer { mosi, miso }),
            start,
            end,
        }
    }

    pub fn disable(start: Timestamp, end: Timestamp) -> Self {
        Self {
            kind: BusEventKind::Disable,
            start,
            end,
        }
    }

    pub fn error(start: Timestamp, end: Timestamp) -> Self {
        Self {
            kind: BusEventKind::Error,
            start,
            end,
        }
    }
}
