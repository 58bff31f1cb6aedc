//! Types for reader operations

use std::time::Duration;

use thiserror::Error;

use crate::command::{status, status_description};
use crate::family::ReaderModel;

pub type Result<T> = std::result::Result<T, UhfError>;

/// Errors that can occur during reader operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UhfError {
    /// CRC mismatch or truncated frame that resynchronisation could not recover
    #[error("framing error: {0}")]
    Framing(String),
    /// No matching response arrived before the deadline
    #[error("no response to command 0x{command:02X} before the deadline")]
    Timeout { command: u8 },
    /// Transport layer error (serial, TCP, UART, etc.)
    #[error("transport error: {0}")]
    Transport(String),
    /// The reader answered with a non-success status byte
    #[error("command 0x{command:02X} failed with status 0x{status:02X}")]
    Status { command: u8, status: u8 },
    /// The tag itself rejected a memory operation
    #[error("command 0x{command:02X} rejected by tag with error code 0x{code:02X}")]
    Tag { command: u8, code: u8 },
    /// Invalid parameter passed to a function
    #[error("invalid parameter: {0}")]
    Config(String),
    #[error("reader is not connected")]
    NotConnected,
    #[error("continuous inventory is already running")]
    AlreadyRunning,
    /// The inventory worker did not wind down within the join timeout
    #[error("inventory worker did not stop within {0:?}")]
    StopTimeout(Duration),
}

impl UhfError {
    /// Numeric code in the reader's own taxonomy: 48 for timeouts and link
    /// failures, 49 for CRC errors, the raw status byte otherwise.
    pub fn code(&self) -> u8 {
        match self {
            UhfError::Framing(_) => 49,
            UhfError::Timeout { .. } => 48,
            UhfError::Transport(_) => 48,
            UhfError::Status { status, .. } => *status,
            UhfError::Tag { .. } => status::TAG_ERROR,
            UhfError::Config(_) => status::PARAMETER_ERROR,
            UhfError::NotConnected => 48,
            UhfError::AlreadyRunning => 51,
            UhfError::StopTimeout(_) => 48,
        }
    }

    /// Whether the underlying link is unusable. Continuous inventory aborts on
    /// these and treats everything else as a failed cycle.
    pub fn is_fatal(&self) -> bool {
        matches!(self, UhfError::Transport(_) | UhfError::NotConnected)
    }

    /// Reader-side description of a status failure
    pub fn status_text(&self) -> Option<&'static str> {
        match self {
            UhfError::Status { status, .. } => Some(status_description(*status)),
            _ => None,
        }
    }
}

/// Gen2 memory banks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum MemoryBank {
    Reserved = 0x00,
    #[default]
    Epc = 0x01,
    Tid = 0x02,
    User = 0x03,
}

/// Gen2 session, plus the reader-specific extended codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Session {
    #[default]
    S0,
    S1,
    S2,
    S3,
    /// Reader alternates between S2 and S3; the host still walks the antennas
    Alternating,
    /// Reader rotates sessions and antennas on its own
    Auto,
}

impl Session {
    pub const ALTERNATING_CODE: u8 = 0xFE;
    pub const AUTO_CODE: u8 = 0xFF;

    pub const fn code(self) -> u8 {
        match self {
            Session::S0 => 0,
            Session::S1 => 1,
            Session::S2 => 2,
            Session::S3 => 3,
            Session::Alternating => Self::ALTERNATING_CODE,
            Session::Auto => Self::AUTO_CODE,
        }
    }

    /// Sessions whose inventoried flags persist long enough that the target
    /// has to be flipped once the population stops answering.
    pub const fn alternates_target(self) -> bool {
        matches!(self, Session::S2 | Session::S3 | Session::Alternating)
    }

    /// Extended codes that need the select presets issued before scanning
    pub const fn is_reader_driven(self) -> bool {
        matches!(self, Session::Alternating | Session::Auto)
    }
}

impl TryFrom<u8> for Session {
    type Error = UhfError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Session::S0),
            1 => Ok(Session::S1),
            2 => Ok(Session::S2),
            3 => Ok(Session::S3),
            Self::ALTERNATING_CODE => Ok(Session::Alternating),
            Self::AUTO_CODE => Ok(Session::Auto),
            other => Err(UhfError::Config(format!("unknown session code {}", other))),
        }
    }
}

/// Segment of TID memory returned alongside the EPC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TidSpec {
    /// Start address in words
    pub addr: u8,
    /// Length in words
    pub len: u8,
}

/// Memory read performed on every tag found by a mix inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MixReadSpec {
    pub mem_bank: MemoryBank,
    /// Start address in words
    pub addr: u16,
    /// Length in words
    pub len: u8,
    pub password: [u8; 4],
}

/// Tag population mask used by inventory pre-filtering and select commands
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectMask {
    pub mem: MemoryBank,
    /// Start address in bits
    pub addr: u16,
    pub len_bits: u8,
    pub data: Vec<u8>,
}

impl SelectMask {
    /// Number of mask bytes that go on the wire
    pub fn byte_len(&self) -> usize {
        (self.len_bits as usize).div_ceil(8)
    }

    /// Append `mem, addr(2), len, data` to `out`
    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        out.push(self.mem as u8);
        out.extend_from_slice(&self.addr.to_be_bytes());
        out.push(self.len_bits);
        out.extend_from_slice(&self.data[..self.byte_len()]);
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.data.len() < self.byte_len() {
            return Err(UhfError::Config(format!(
                "mask of {} bits needs {} data bytes, got {}",
                self.len_bits,
                self.byte_len(),
                self.data.len()
            )));
        }
        Ok(())
    }
}

/// Parameters for one inventory session. Built once, immutable while it runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryConfig {
    /// Anti-collision slot exponent (0-15)
    pub q_value: u8,
    pub session: Session,
    /// Inventoried flag to match, 0 = A, 1 = B
    pub target: u8,
    /// Scan window in 10 ms ticks; 0 selects the reader default of 20
    pub scan_time: u8,
    /// Bit `i` enables antenna `i`
    pub antenna_mask: u16,
    pub tid: Option<TidSpec>,
    /// Embed target, antenna and scan time in the command itself
    pub fast: bool,
    pub mix: Option<MixReadSpec>,
    pub select_mask: Option<SelectMask>,
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            q_value: 4,
            session: Session::S0,
            target: 0,
            scan_time: crate::inventory::DEFAULT_SCAN_TIME,
            antenna_mask: 0x0001,
            tid: None,
            fast: false,
            mix: None,
            select_mask: None,
        }
    }
}

impl InventoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.q_value > 15 {
            return Err(UhfError::Config(format!(
                "Q value {} out of range (0-15)",
                self.q_value
            )));
        }
        if self.target > 1 {
            return Err(UhfError::Config(format!(
                "target {} out of range (0 = A, 1 = B)",
                self.target
            )));
        }
        if self.antenna_mask == 0 {
            return Err(UhfError::Config("no antenna enabled".into()));
        }
        if self.tid.is_some() && self.mix.is_some() {
            return Err(UhfError::Config(
                "TID inventory and mix inventory are mutually exclusive".into(),
            ));
        }
        if let Some(tid) = &self.tid {
            if tid.len == 0 {
                return Err(UhfError::Config("TID length must be at least one word".into()));
            }
        }
        if let Some(mix) = &self.mix {
            if mix.len == 0 {
                return Err(UhfError::Config("mix read length must be at least one word".into()));
            }
        }
        if let Some(mask) = &self.select_mask {
            mask.validate()?;
        }
        Ok(())
    }

    /// Indices of the enabled antennas, lowest first
    pub fn antennas(&self) -> impl Iterator<Item = u8> + '_ {
        (0..16u8).filter(move |i| self.antenna_mask & (1 << i) != 0)
    }

    pub fn antenna_enabled(&self, index: u8) -> bool {
        index < 16 && self.antenna_mask & (1 << index) != 0
    }
}

/// A tag seen during inventory
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagRecord {
    pub epc: Vec<u8>,
    pub rssi: i8,
    pub antenna: u8,
    /// Phase and frequency fields below are only meaningful when set
    pub has_extension: bool,
    pub phase_begin: u16,
    pub phase_end: u16,
    pub freq_khz: u32,
    /// TID split off the record when the reader runs in FastID mode
    pub tid: Option<Vec<u8>>,
    /// Leading packet parameter byte of mix-mode records
    pub packet_param: Option<u8>,
}

impl TagRecord {
    pub fn epc_hex(&self) -> String {
        bytes_to_hex(&self.epc)
    }
}

/// Statistics packet emitted at the end of some fast inventories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InventoryStats {
    pub antenna: u8,
    pub read_rate: u16,
    pub total_count: u32,
}

/// Result of one logical inventory call, which may span several frames
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InventoryOutcome {
    /// Status of the terminal frame
    pub status: u8,
    pub tags: Vec<TagRecord>,
    pub stats: Option<InventoryStats>,
    pub elapsed: Duration,
}

/// Decoded reply to the reader information command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReaderInfo {
    pub address: u8,
    pub version: (u8, u8),
    pub reader_type: u8,
    /// Bit 0 ISO18000-6B, bit 1 ISO18000-6C
    pub protocols: u8,
    pub max_freq: u8,
    pub min_freq: u8,
    pub power_dbm: u8,
    pub scan_time: u8,
    pub antenna_config: u8,
    pub beep: u8,
    pub output_rep: u8,
    pub check_antenna: bool,
    pub model: ReaderModel,
}

impl ReaderInfo {
    pub fn firmware_version(&self) -> String {
        format!("{}.{}", self.version.0, self.version.1)
    }

    pub fn supports_iso18000_6b(&self) -> bool {
        self.protocols & 0x01 != 0
    }

    pub fn supports_iso18000_6c(&self) -> bool {
        self.protocols & 0x02 != 0
    }

    /// Frequency band of the upper limit (0 US, 1 EU, 2 CN, 3 custom)
    pub fn band(&self) -> u8 {
        self.max_freq >> 6
    }

    /// Upper and lower channel points within the band
    pub fn freq_points(&self) -> (u8, u8) {
        (self.max_freq & 0x3F, self.min_freq & 0x3F)
    }
}

/// Convert bytes to uppercase hex string
pub fn bytes_to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// How a tag memory command singles out the tag it talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagTarget {
    /// Full EPC, an even number of bytes
    Epc(Vec<u8>),
    /// First tag matching the mask
    Mask(SelectMask),
}

impl TagTarget {
    pub(crate) fn validate(&self) -> Result<()> {
        match self {
            TagTarget::Epc(epc) if epc.is_empty() || epc.len() % 2 != 0 => Err(UhfError::Config(
                format!("EPC must be a whole number of words, got {} bytes", epc.len()),
            )),
            TagTarget::Epc(epc) if epc.len() > 62 => Err(UhfError::Config(format!(
                "EPC of {} bytes is too long",
                epc.len()
            ))),
            TagTarget::Epc(_) => Ok(()),
            TagTarget::Mask(mask) => mask.validate(),
        }
    }
}
