//! Gen2 inventory command encoding and tag block decoding

use std::time::Duration;

use log::warn;

use crate::command::{Command, status};
use crate::frame::Frame;
use crate::types::{InventoryConfig, InventoryStats, Result, TagRecord};

/// Scan window used when the caller leaves `scan_time` at zero (20 x 10 ms)
pub const DEFAULT_SCAN_TIME: u8 = 20;

/// Bytes appended to a record flagged with the phase/frequency extension
const EXTENSION_LEN: usize = 7;

/// TID bytes at the tail of a FastID record
const FAST_ID_TID_LEN: usize = 12;

const LEN_MASK: u8 = 0x3F;
const EXTENSION_FLAG: u8 = 0x40;
const FAST_ID_FLAG: u8 = 0x80;

/// Antenna byte for fast inventory: bit 7 set, 0-based index below
pub const fn antenna_code(index: u8) -> u8 {
    0x80 | (index & 0x7F)
}

fn effective_scan_time(scan_time: u8) -> u8 {
    if scan_time == 0 { DEFAULT_SCAN_TIME } else { scan_time }
}

/// Build the inventory (or mix inventory) command for `config`.
///
/// `antenna` is the 0-based index placed in the fast fields; it is ignored
/// unless `config.fast` is set.
pub fn encode_inventory(config: &InventoryConfig, antenna: u8) -> Result<(Command, Vec<u8>)> {
    config.validate()?;

    let mut payload = vec![config.q_value, config.session.code()];
    if let Some(mask) = &config.select_mask {
        mask.encode_into(&mut payload);
    }

    let command = match (&config.mix, &config.tid) {
        (Some(mix), _) => {
            payload.push(mix.mem_bank as u8);
            payload.extend_from_slice(&mix.addr.to_be_bytes());
            payload.push(mix.len);
            payload.extend_from_slice(&mix.password);
            Command::InventoryMix
        }
        (None, Some(tid)) => {
            payload.push(tid.addr);
            payload.push(tid.len);
            Command::Inventory
        }
        (None, None) => Command::Inventory,
    };

    if config.fast {
        payload.push(config.target);
        payload.push(antenna_code(antenna));
        payload.push(effective_scan_time(config.scan_time));
    }

    Ok((command, payload))
}

/// How long to wait for the next frame of an inventory reply.
///
/// The reader may spend the whole scan window before answering, so the
/// deadline is the window plus a fixed margin.
pub fn response_deadline(scan_time: u8) -> Duration {
    Duration::from_millis(effective_scan_time(scan_time) as u64 * 200 + 2000)
}

/// Record layout of a tag block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordLayout {
    /// `len, epc, rssi, [extension]`
    Standard,
    /// Mix replies put a packet parameter byte in front of each record
    Mix,
}

impl RecordLayout {
    pub fn for_command(command: u8) -> Self {
        if command == Command::InventoryMix.code() {
            RecordLayout::Mix
        } else {
            RecordLayout::Standard
        }
    }
}

/// One decoded inventory response frame
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TagBlock {
    pub status: u8,
    pub antenna: u8,
    pub tags: Vec<TagRecord>,
    pub stats: Option<InventoryStats>,
}

impl TagBlock {
    /// Another frame belongs to the same inventory call
    pub fn has_more(&self) -> bool {
        self.status == status::MORE_DATA
    }
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        let bytes = self.data.get(self.pos..self.pos + n)?;
        self.pos += n;
        Some(bytes)
    }

    fn byte(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }
}

fn decode_record(cursor: &mut Cursor<'_>, antenna: u8, layout: RecordLayout) -> Option<TagRecord> {
    let packet_param = match layout {
        RecordLayout::Mix => Some(cursor.byte()?),
        RecordLayout::Standard => None,
    };
    let len_byte = cursor.byte()?;
    let mut epc = cursor.take((len_byte & LEN_MASK) as usize)?.to_vec();
    let rssi = cursor.byte()? as i8;

    let mut tag = TagRecord {
        rssi,
        antenna,
        packet_param,
        ..Default::default()
    };

    if len_byte & EXTENSION_FLAG != 0 {
        let ext = cursor.take(EXTENSION_LEN)?;
        tag.has_extension = true;
        tag.phase_begin = u16::from_be_bytes([ext[0], ext[1]]);
        tag.phase_end = u16::from_be_bytes([ext[2], ext[3]]);
        tag.freq_khz = u32::from_be_bytes([0, ext[4], ext[5], ext[6]]);
    }

    if len_byte & FAST_ID_FLAG != 0 && epc.len() >= FAST_ID_TID_LEN {
        let tid = epc.split_off(epc.len() - FAST_ID_TID_LEN);
        tag.tid = Some(tid);
    }
    tag.epc = epc;
    Some(tag)
}

/// Decode one inventory response frame.
///
/// Statuses 1-4 carry `antenna, count, records`; status 0x26 carries
/// statistics; anything else is a terminal status with no tags. A payload
/// too short to hold the header decodes as zero tags, and a truncated record
/// keeps the records parsed before it.
pub fn decode_tag_block(frame: &Frame, layout: RecordLayout) -> TagBlock {
    let payload = &frame.payload;
    let mut block = TagBlock {
        status: frame.status().unwrap_or(status::PARAMETER_ERROR),
        ..Default::default()
    };

    if block.status == status::STATISTICS {
        if payload.len() >= 8 {
            block.antenna = payload[1];
            block.stats = Some(InventoryStats {
                antenna: payload[1],
                read_rate: u16::from_le_bytes([payload[2], payload[3]]),
                total_count: u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]),
            });
        }
        return block;
    }

    if !status::carries_tags(block.status) || payload.len() < 3 {
        return block;
    }

    block.antenna = payload[1];
    let count = payload[2] as usize;
    let mut cursor = Cursor::new(&payload[3..]);
    for index in 0..count {
        match decode_record(&mut cursor, block.antenna, layout) {
            Some(tag) => block.tags.push(tag),
            None => {
                warn!(
                    "Tag record {} of {} truncated, keeping {} decoded",
                    index + 1,
                    count,
                    block.tags.len()
                );
                break;
            }
        }
    }
    block
}

/// Unsolicited frame emitted while continuous read mode is active
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    Tag(TagRecord),
    Heartbeat { read_rate: u16, total_count: u32 },
    Other(u8),
}

/// Decode a `0xEE` notification frame. Returns `None` for malformed frames.
pub fn decode_notification(frame: &Frame) -> Option<Notification> {
    let payload = &frame.payload;
    match *payload.first()? {
        status::SUCCESS => {
            let antenna = *payload.get(1)?;
            let epc_len = *payload.get(2)? as usize;
            let epc = payload.get(3..3 + epc_len)?.to_vec();
            let rssi = *payload.get(3 + epc_len)? as i8;
            Some(Notification::Tag(TagRecord {
                epc,
                rssi,
                antenna,
                ..Default::default()
            }))
        }
        status::HEARTBEAT => {
            let rate = payload.get(1..3)?;
            let total = payload.get(3..7)?;
            Some(Notification::Heartbeat {
                read_rate: u16::from_le_bytes([rate[0], rate[1]]),
                total_count: u32::from_le_bytes([total[0], total[1], total[2], total[3]]),
            })
        }
        other => Some(Notification::Other(other)),
    }
}
