//! Gen2 select pre-filter command

use crate::types::{Result, SelectMask, Session, UhfError};

/// Gen2 select actions. Names describe what happens to matching tags,
/// then to the rest (assert = SL set / inventoried flag to A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum SelectAction {
    #[default]
    AssertMatchDeassertOthers = 0,
    AssertMatch = 1,
    DeassertOthers = 2,
    NegateMatch = 3,
    DeassertMatchAssertOthers = 4,
    DeassertMatch = 5,
    AssertOthers = 6,
    NegateOthers = 7,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectCommand {
    /// Bit `i` selects antenna `i`
    pub antenna_mask: u16,
    /// Must be one of S0-S3
    pub session: Session,
    pub action: SelectAction,
    /// An empty mask matches every tag
    pub mask: SelectMask,
    pub truncate: bool,
}

impl SelectCommand {
    /// Preset issued before reader-driven session inventories: every enabled
    /// antenna, default action, empty mask.
    pub fn preset(antenna_mask: u16, session: Session) -> Self {
        Self {
            antenna_mask,
            session,
            ..Default::default()
        }
    }
}

/// Build the select payload. Readers with more than 8 antenna ports take a
/// two-byte antenna field, everything else a single byte.
pub fn encode_select(select: &SelectCommand, antenna_count: u8) -> Result<Vec<u8>> {
    if select.session.code() > Session::S3.code() {
        return Err(UhfError::Config(format!(
            "select needs a Gen2 session S0-S3, got {:?}",
            select.session
        )));
    }
    if select.antenna_mask == 0 {
        return Err(UhfError::Config("select without any antenna".into()));
    }
    select.mask.validate()?;

    let mut payload = Vec::with_capacity(10 + select.mask.byte_len());
    if antenna_count > 8 {
        payload.extend_from_slice(&select.antenna_mask.to_be_bytes());
    } else {
        if select.antenna_mask > 0xFF {
            return Err(UhfError::Config(format!(
                "antenna mask 0x{:04X} exceeds {} ports",
                select.antenna_mask, antenna_count
            )));
        }
        payload.push(select.antenna_mask as u8);
    }
    payload.push(select.session.code());
    payload.push(select.action as u8);
    select.mask.encode_into(&mut payload);
    payload.push(select.truncate as u8);
    Ok(payload)
}
