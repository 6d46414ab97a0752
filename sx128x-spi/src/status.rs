//! The fixed status byte the SX128x shifts out while a command is clocked in.
//!
//! Every response byte before the command-specific payload carries the chip
//! mode in bits 7..5 and the command status in bits 4..2.

use std::fmt::Display;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusByte(pub u8);

impl StatusByte {
    pub fn chip_mode(&self) -> ChipMode {
        ChipMode((self.0 & 0xE0) >> 5)
    }

    pub fn command_status(&self) -> CommandStatus {
        CommandStatus((self.0 & 0x1C) >> 2)
    }
}

impl Display for StatusByte {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Status:M={},S={}",
            self.chip_mode().label(),
            self.command_status().label()
        )
    }
}

/// 3-bit circuit mode field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChipMode(u8);

impl ChipMode {
    pub const STDBY_RC: Self = Self(2);
    pub const STDBY_XOSC: Self = Self(3);
    pub const FS: Self = Self(4);
    pub const RX: Self = Self(5);
    pub const TX: Self = Self(6);

    pub fn label(&self) -> &'static str {
        match self.0 {
            0 | 1 => "Reserved",
            2 => "STDBY_RC",
            3 => "STDBY_XOSC",
            4 => "FS",
            5 => "Rx",
            6 => "Tx",
            _ => "ERROR",
        }
    }
}

/// 3-bit command status field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandStatus(u8);

impl CommandStatus {
    pub const DONE: Self = Self(1);
    pub const DATA_AVAILABLE: Self = Self(2);
    pub const TIMEOUT: Self = Self(3);
    pub const PROCESS_ERROR: Self = Self(4);
    pub const EXEC_ERROR: Self = Self(5);
    pub const TX_DONE: Self = Self(6);

    pub fn label(&self) -> &'static str {
        match self.0 {
            0 => "Reserved",
            1 => "Done",
            2 => "DataAvailable",
            3 => "Timeout",
            4 => "ProcessErr",
            5 => "ExecErr",
            6 => "TxDone",
            _ => "ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::status::StatusByte;

    #[test]
    fn it_splits_mode_and_status_fields() {
        // 0b010_001_00: STDBY_RC, Done
        let status = StatusByte(0x44);
        assert_eq!(status.chip_mode().label(), "STDBY_RC");
        assert_eq!(status.command_status().label(), "Done");
        assert_eq!(status.to_string(), "Status:M=STDBY_RC,S=Done");
    }

    #[test]
    fn it_labels_reserved_and_error_values() {
        // mode 0 is reserved, status 7 is out of range
        assert_eq!(StatusByte(0x1C).to_string(), "Status:M=Reserved,S=ERROR");
        // mode 7 is out of range, status 2 is DataAvailable
        assert_eq!(StatusByte(0xE8).to_string(), "Status:M=ERROR,S=DataAvailable");
    }
}
