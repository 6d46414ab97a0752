//! Decoder for SX128x SPI command/response traffic.
//!
//! The SX128x shifts out a fixed-format status byte for every request byte
//! until the command-specific payload begins, and the meaning of a
//! GetPacketStatus response depends on the packet mode configured in an
//! earlier transaction. [`Decoder`] reconstructs all of that from the raw
//! chip-select and byte-exchange events an SPI analyzer produces.
//!
//! [Datasheet][1], chapter 11 (commands) and 10.3 (status byte).
//!
//! [1]: https://www.semtech.com/products/wireless-rf/lora-connect/sx1280

pub mod capture;
pub mod command;
pub mod decoder;
pub mod event;
pub mod record;
pub mod status;

pub use crate::{
    command::{
        Opcode,
        PacketType,
    },
    decoder::{
        DecodeError,
        Decoder,
        SequenceError,
    },
    event::{
        BusEvent,
        BusEventKind,
        Timestamp,
        Transfer,
    },
    record::{
        RECORD_TYPES,
        Record,
        RecordType,
    },
    status::StatusByte,
};
