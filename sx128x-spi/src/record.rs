//! Decoded output records.

use std::fmt::Display;

use crate::event::Timestamp;

/// Result type descriptor a host display layer registers for rendering.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RecordType {
    pub name: &'static str,
    /// Name of the single text field carried by records of this type.
    pub field: &'static str,
}

pub const SPI_TRANSACTION: RecordType = RecordType {
    name: "SpiTransaction",
    field: "dataout",
};

pub const SPI_TRANSACTION_ERROR: RecordType = RecordType {
    name: "SpiTransactionError",
    field: "error_info",
};

pub const RECORD_TYPES: [RecordType; 2] = [SPI_TRANSACTION, SPI_TRANSACTION_ERROR];

/// One decoded output record.
///
/// At most one record is produced per input event.
#[derive(Clone, Debug, PartialEq)]
pub enum Record {
    Transaction {
        start: Timestamp,
        end: Timestamp,
        description: String,
    },
    Error {
        start: Timestamp,
        end: Timestamp,
        error_info: String,
    },
}

impl Record {
    pub fn transaction(start: Timestamp, end: Timestamp, description: impl Into<String>) -> Self {
        Self::Transaction {
            start,
            end,
            description: description.into(),
        }
    }

    pub fn error(start: Timestamp, end: Timestamp, error: impl Display) -> Self {
        Self::Error {
            start,
            end,
            error_info: error.to_string(),
        }
    }

    pub fn start(&self) -> Timestamp {
        match self {
            Record::Transaction { start, .. } => *start,
            Record::Error { start, .. } => *start,
        }
    }

    pub fn end(&self) -> Timestamp {
        match self {
            Record::Transaction { end, .. } => *end,
            Record::Error { end, .. } => *end,
        }
    }

    /// The record's single text field.
    pub fn text(&self) -> &str {
        match self {
            Record::Transaction { description, .. } => description,
            Record::Error { error_info, .. } => error_info,
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            Record::Transaction { .. } => SPI_TRANSACTION,
            Record::Error { .. } => SPI_TRANSACTION_ERROR,
        }
    }
}
