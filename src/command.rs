//! Command codes and response status bytes

use std::time::Duration;

/// Command bytes understood by the reader. A response always carries the
/// same byte as the request it answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Inventory = 0x01,
    ReadData = 0x02,
    WriteData = 0x03,
    WriteEpc = 0x04,
    InventoryMix = 0x19,
    GetReaderInfo = 0x21,
    SetRfPower = 0x2F,
    StartRead = 0x50,
    StopRead = 0x51,
    Profile = 0x7F,
    StopImmediately = 0x93,
    Select = 0x9A,
    SetConfig = 0xEA,
    GetConfig = 0xEB,
    /// Unsolicited frames emitted while continuous read mode is active
    ReadNotification = 0xEE,
}

impl Command {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> u8 {
        command as u8
    }
}

/// Default deadline for single-frame commands
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1500);

/// Deadline for commands that touch tag memory
pub const TAG_ACCESS_TIMEOUT: Duration = Duration::from_millis(3000);

/// Status byte taxonomy (first payload byte of every response)
pub mod status {
    pub const SUCCESS: u8 = 0x00;
    pub const INVENTORY_DONE: u8 = 0x01;
    pub const INVENTORY_TIMEOUT: u8 = 0x02;
    pub const MORE_DATA: u8 = 0x03;
    pub const BUFFER_FULL: u8 = 0x04;
    pub const STATISTICS: u8 = 0x26;
    pub const HEARTBEAT: u8 = 0x28;
    pub const NO_TAG: u8 = 0x30;
    pub const COMMUNICATION_ERROR: u8 = 0x31;
    pub const BUSY: u8 = 0x33;
    pub const PORT_OPEN: u8 = 0x35;
    pub const ANTENNA_ERROR: u8 = 0xF8;
    pub const NO_RESPONSE: u8 = 0xFB;
    pub const TAG_ERROR: u8 = 0xFC;
    pub const PARAMETER_ERROR: u8 = 0xFF;

    /// Inventory statuses that carry an antenna byte, a tag count and tag records
    pub const fn carries_tags(status: u8) -> bool {
        matches!(
            status,
            INVENTORY_DONE | INVENTORY_TIMEOUT | MORE_DATA | BUFFER_FULL
        )
    }
}

/// Human readable description of a status byte
pub fn status_description(code: u8) -> &'static str {
    match code {
        status::SUCCESS => "success",
        status::INVENTORY_DONE => "inventory finished",
        status::INVENTORY_TIMEOUT => "inventory scan time elapsed",
        status::MORE_DATA => "more frames follow",
        status::BUFFER_FULL => "reader buffer full",
        status::STATISTICS => "statistics packet",
        status::HEARTBEAT => "heartbeat",
        status::NO_TAG => "no tag",
        status::COMMUNICATION_ERROR => "communication error",
        status::BUSY => "reader busy",
        status::PORT_OPEN => "port already open",
        status::ANTENNA_ERROR => "antenna error",
        status::NO_RESPONSE => "no tag response",
        status::TAG_ERROR => "tag returned an error code",
        status::PARAMETER_ERROR => "parameter error",
        _ => "unknown status",
    }
}
