//! Frame codec: CRC16, frame encoding and reassembly from arbitrary read chunks
//!
//! Wire layout: `[len][addr][cmd][payload...][crc_lo][crc_hi]` where `len`
//! counts every byte after itself and the CRC covers everything before it.

use log::debug;

use crate::types::{Result, UhfError};

/// Smallest valid frame: length, address, command and the two CRC bytes
pub const MIN_FRAME_LEN: usize = 5;

/// Largest payload whose length still fits the one-byte length field
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize - 4;

/// Command byte carried by heartbeat frames the reader may interleave with responses
pub const HEARTBEAT_COMMAND: u8 = 0x00;

/// Length byte of a heartbeat frame
const HEARTBEAT_LEN: u8 = 5;

/// Reassembly buffer cap; bytes beyond this are dropped oldest first
const MAX_BUFFERED: usize = 4096;

const CRC_SEED: u16 = 0xFFFF;
const CRC_POLY: u16 = 0x8408;

/// CRC16 as the reader computes it: seed 0xFFFF, reflected polynomial 0x8408
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc = CRC_SEED;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 0x0001 != 0 {
                crc = (crc >> 1) ^ CRC_POLY;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// A decoded frame with the length and CRC stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub address: u8,
    pub command: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(address: u8, command: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            command,
            payload: payload.into(),
        }
    }

    /// First payload byte; every response carries one
    pub fn status(&self) -> Option<u8> {
        self.payload.first().copied()
    }

    /// Payload after the status byte
    pub fn data(&self) -> &[u8] {
        self.payload.get(1..).unwrap_or(&[])
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command == HEARTBEAT_COMMAND
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(self.address, self.command, &self.payload)
    }
}

/// Assemble a complete frame, CRC included
pub fn encode(address: u8, command: u8, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(UhfError::Config(format!(
            "payload of {} bytes exceeds the {} byte frame limit",
            payload.len(),
            MAX_PAYLOAD_LEN
        )));
    }

    let mut frame = Vec::with_capacity(payload.len() + MIN_FRAME_LEN);
    frame.push((payload.len() + 4) as u8);
    frame.push(address);
    frame.push(command);
    frame.extend_from_slice(payload);
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Check length byte and CRC of one complete raw frame
pub fn verify(raw: &[u8]) -> bool {
    if raw.len() < MIN_FRAME_LEN || raw[0] as usize + 1 != raw.len() {
        return false;
    }
    let (body, crc) = raw.split_at(raw.len() - 2);
    crc16(body) == u16::from_le_bytes([crc[0], crc[1]])
}

fn decode_unchecked(raw: &[u8]) -> Frame {
    Frame {
        address: raw[1],
        command: raw[2],
        payload: raw[3..raw.len() - 2].to_vec(),
    }
}

/// Outcome of one scan over the reassembly buffer
#[derive(Debug, Default)]
struct Scan {
    frame: Option<Frame>,
    /// Bytes at the front of the buffer that can be dropped
    discard: usize,
    /// Candidates that failed the CRC check
    rejected: usize,
}

fn is_candidate(buffer: &[u8], i: usize, expected: u8) -> bool {
    let len = buffer[i];
    let command = buffer[i + 2];
    (len >= 4 && command == expected) || (len == HEARTBEAT_LEN && command == HEARTBEAT_COMMAND)
}

fn scan(buffer: &[u8], expected: u8) -> Scan {
    let mut i = 0;
    let mut first_incomplete = None;
    let mut rejected = 0;

    while buffer.len() - i >= MIN_FRAME_LEN {
        if is_candidate(buffer, i, expected) {
            let end = i + buffer[i] as usize + 1;
            if end > buffer.len() {
                // Might be the head of a frame still in flight
                first_incomplete.get_or_insert(i);
            } else if verify(&buffer[i..end]) {
                return Scan {
                    frame: Some(decode_unchecked(&buffer[i..end])),
                    discard: end,
                    rejected,
                };
            } else {
                debug!("CRC mismatch at offset {}, resynchronising", i);
                rejected += 1;
            }
        }
        i += 1;
    }

    Scan {
        frame: None,
        discard: first_incomplete.unwrap_or(i),
        rejected,
    }
}

/// Find the first valid frame for `expected` (or a heartbeat) in `buffer`.
///
/// Scans byte by byte without assuming alignment and skips candidates whose
/// CRC does not match. Returns the frame and the number of leading bytes to
/// drop, which includes any garbage in front of it.
pub fn try_extract_frame(buffer: &[u8], expected: u8) -> Option<(Frame, usize)> {
    let scan = scan(buffer, expected);
    scan.frame.map(|frame| (frame, scan.discard))
}

/// Streaming reassembly buffer fed with whatever the transport returns
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: Vec<u8>,
    rejected: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
        if self.buffer.len() > MAX_BUFFERED {
            let excess = self.buffer.len() - MAX_BUFFERED;
            debug!("Reassembly buffer full, dropping {} bytes", excess);
            self.buffer.drain(..excess);
        }
    }

    /// Pull the next frame for `expected` out of the buffer, if one is complete
    pub fn next_frame(&mut self, expected: u8) -> Option<Frame> {
        let scan = scan(&self.buffer, expected);
        self.rejected += scan.rejected;
        self.buffer.drain(..scan.discard);
        scan.frame
    }

    /// Number of CRC rejections since the last `clear`
    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.rejected = 0;
    }
}
