//! SX128x command set: opcode table and payload decoding.
//!
//! Only the read-style commands produce anything interesting on MISO, so
//! those are the ones decoded here. [Datasheet][1], chapter 11.
//!
//! [1]: https://www.semtech.com/products/wireless-rf/lora-connect/sx1280

use std::fmt::{
    Display,
    Write as _,
};

use crate::{
    event::Timestamp,
    record::Record,
};

/// First request byte of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Opcode(pub u8);

impl Opcode {
    pub const GET_PACKET_TYPE: Self = Self(0x03);
    pub const GET_IRQ_STATUS: Self = Self(0x15);
    pub const GET_RX_BUFFER_STATUS: Self = Self(0x17);
    pub const READ_REGISTER: Self = Self(0x19);
    pub const READ_BUFFER: Self = Self(0x1B);
    pub const GET_PACKET_STATUS: Self = Self(0x1D);
    pub const GET_RSSI_INST: Self = Self(0x1F);
    pub const SET_PACKET_TYPE: Self = Self(0x8A);

    pub fn from_request(mosi: &[u8]) -> Option<Self> {
        mosi.first().map(|byte| Self(*byte))
    }

    /// Accumulated request length at which the chip stops shifting out
    /// status bytes and the command-specific payload begins.
    ///
    /// `None` for opcodes this decoder doesn't know; those transactions
    /// stay in the status-byte phase for their whole lifetime.
    pub fn status_prefix_len(&self) -> Option<usize> {
        match *self {
            Self::GET_PACKET_TYPE
            | Self::GET_IRQ_STATUS
            | Self::GET_RX_BUFFER_STATUS
            | Self::GET_PACKET_STATUS
            | Self::GET_RSSI_INST => Some(2),
            Self::READ_REGISTER => Some(4),
            Self::READ_BUFFER => Some(3),
            _ => None,
        }
    }
}

/// Configured packet mode of the transceiver.
///
/// This is the one piece of state that survives across transactions: a
/// GetPacketStatus response can only be interpreted once the mode is known
/// from an earlier SetPacketType or GetPacketType exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketType {
    Gfsk,
    Lora,
    Ranging,
    Flrc,
    Ble,
    Undefined,
}

impl PacketType {
    /// Maps the raw mode byte. Anything outside 0x00..=0x04 is undefined.
    pub fn from_u8(byte: u8) -> Self {
        match byte {
            0x00 => Self::Gfsk,
            0x01 => Self::Lora,
            0x02 => Self::Ranging,
            0x03 => Self::Flrc,
            0x04 => Self::Ble,
            _ => Self::Undefined,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gfsk => "GFSK",
            Self::Lora => "LORA",
            Self::Ranging => "RANGING",
            Self::Flrc => "FLRC",
            Self::Ble => "BLE",
            Self::Undefined => "UNDEFINED",
        }
    }
}

impl Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Everything the data-phase decode needs besides the byte buffers.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DataContext {
    /// Start of the transfer that ended the status-byte phase.
    pub data_start: Timestamp,
    pub event_start: Timestamp,
    pub event_end: Timestamp,
    pub packet_type: PacketType,
}

/// Decodes the accumulated buffers of a data-phase transaction.
///
/// Returns `None` while the payload is still too short, and for opcodes
/// that aren't in the table. Neither case is an error; more bytes may
/// follow before the transaction closes.
pub(crate) fn decode_data(mosi: &[u8], miso: &[u8], cx: &DataContext) -> Option<Record> {
    let opcode = Opcode::from_request(mosi)?;
    let len = mosi.len().min(miso.len());

    let record = match opcode {
        Opcode::GET_PACKET_TYPE if len >= 3 => {
            Record::transaction(
                cx.data_start,
                cx.event_end,
                format!("GetPacketType()={}", PacketType::from_u8(miso[2])),
            )
        }
        Opcode::GET_IRQ_STATUS if len >= 4 => {
            let irq_status = u16::from(miso[2]) * 256 + u16::from(miso[3]);
            Record::transaction(
                cx.data_start,
                cx.event_end,
                format!("GetIrqStatus()={irq_status:#x}"),
            )
        }
        Opcode::GET_RX_BUFFER_STATUS if len >= 4 => {
            Record::transaction(
                cx.data_start,
                cx.event_end,
                format!(
                    "GetRxBufferStatus()=rxPayloadLen={}, rxStartBuffP={:#x}",
                    miso[2], miso[3]
                ),
            )
        }
        Opcode::READ_REGISTER if len >= 5 => {
            // the chip auto-increments the register address for every byte
            // clocked beyond the first, so the decoded address advances with
            // the response length
            let address =
                (usize::from(mosi[1]) << 8) + usize::from(mosi[2]) + (miso.len() - 5);
            let value = *miso.last()?;
            // uses the current transfer's start, not the data-phase start,
            // so each auto-incremented read gets its own time range
            Record::transaction(
                cx.event_start,
                cx.event_end,
                format!("ReadRegister(@{address:#x})={value:#x}"),
            )
        }
        Opcode::READ_BUFFER if len >= 4 => {
            let offset = mosi[1];
            let mut data = format!("{:#x}", miso[3]);
            for byte in &miso[4..] {
                write!(data, " {byte:#x}").expect("writing to a string");
            }
            Record::transaction(
                cx.data_start,
                cx.event_end,
                format!("ReadBuffer(offset={offset:#x})={data}"),
            )
        }
        Opcode::GET_PACKET_STATUS if len >= 7 => {
            Record::transaction(
                cx.data_start,
                cx.event_end,
                packet_status(miso, cx.packet_type),
            )
        }
        Opcode::GET_RSSI_INST if len >= 3 => {
            Record::transaction(
                cx.data_start,
                cx.event_end,
                format!("GetRssiInst()={} dBm", rssi_half_dbm(miso[2])),
            )
        }
        _ => return None,
    };

    Some(record)
}

/// GetPacketStatus layout depends on the configured packet mode.
fn packet_status(miso: &[u8], packet_type: PacketType) -> String {
    match packet_type {
        PacketType::Ble | PacketType::Gfsk | PacketType::Flrc => {
            let sync = match miso[6] & 0x03 {
                0 => "SyncAddrDetection Error",
                1 => "SyncAddr 1 detected",
                2 => "SyncAddr 2 detected",
                _ => "SyncAddr 3 detected",
            };
            format!(
                "{}:RFU={:#x}, rssiSync={} dBm, errors={:#x}, status={:#x}, {}",
                packet_type,
                miso[2],
                rssi_half_dbm(miso[3]),
                miso[4],
                miso[5],
                sync
            )
        }
        PacketType::Lora | PacketType::Ranging => {
            format!(
                "{}:rssiSync={} dBm, snr={} dB",
                packet_type,
                rssi_half_dbm(miso[2]),
                snr_quarter_db(miso[3])
            )
        }
        PacketType::Undefined => "GetPacketStatus()=UNDEFINED protocol".to_owned(),
    }
}

/// Scans a closed transaction's buffers for the two exchanges that reveal
/// the configured packet mode.
pub(crate) fn packet_type_update(mosi: &[u8], miso: &[u8]) -> Option<PacketType> {
    let opcode = Opcode::from_request(mosi)?;
    match opcode {
        Opcode::GET_PACKET_TYPE if mosi.len() >= 3 && miso.len() >= 3 => {
            Some(PacketType::from_u8(miso[2]))
        }
        Opcode::SET_PACKET_TYPE if mosi.len() >= 2 => Some(PacketType::from_u8(mosi[1])),
        _ => None,
    }
}

/// Raw RSSI byte in half-dB steps, negated. Always renders one decimal
/// digit (`-20.0`, `-20.5`).
fn rssi_half_dbm(byte: u8) -> String {
    format!("{:?}", f64::from(-i32::from(byte)) / 2.0)
}

/// Raw SNR byte in quarter-dB steps (`10.0`, `10.25`).
fn snr_quarter_db(byte: u8) -> String {
    format!("{:?}", f64::from(byte) / 4.0)
}
