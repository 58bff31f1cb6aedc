//! UHF Gen2 RFID reader protocol engine with support for multiple transport backends.
//!
//! Encodes and decodes the reader's CRC-framed binary protocol, matches
//! responses to requests, runs single-shot inventories (EPC, TID, FastID,
//! mix) and drives continuous multi-antenna inventory on a background thread.
//!
//! # Features
//!
//! - `uart-esp32` - UART transport for ESP32 using esp-idf-svc
//! - `serial` - Serial port transport for desktop using serialport crate
//!
//! A TCP transport is always available.
//!
//! # Example
//!
//! ```ignore
//! use uhf_gen2::{connect, InventoryConfig, OrchestratorConfig, SerialTransport, Session, TagRecord};
//!
//! let transport = SerialTransport::new("/dev/ttyUSB0", 57600)?;
//! let mut reader = connect(transport, 0xFF)?;
//!
//! let outcome = reader.inventory_once(&InventoryConfig::default())?;
//! for tag in &outcome.tags {
//!     println!("Found tag: {} ({} dBm)", tag.epc_hex(), tag.rssi);
//! }
//!
//! let inventory = InventoryConfig {
//!     session: Session::S2,
//!     antenna_mask: 0x000F,
//!     ..Default::default()
//! };
//! let handle = reader.start_continuous(inventory, OrchestratorConfig::default(), |tag: &TagRecord| {
//!     println!("{:?}", tag);
//! })?;
//! std::thread::sleep(std::time::Duration::from_secs(10));
//! let summary = handle.stop()?;
//! println!("{} tags in {} cycles", summary.total_tags, summary.cycles);
//! ```

mod channel;
mod command;
mod family;
mod frame;
mod inventory;
mod orchestrator;
mod reader;
mod select;
mod tcp;
mod transport;
mod types;

#[cfg(feature = "uart-esp32")]
mod uart;

#[cfg(feature = "serial")]
mod serial;

// Re-exports
pub use channel::{ChannelConfig, CommandChannel};
pub use command::{Command, DEFAULT_TIMEOUT, TAG_ACCESS_TIMEOUT, status, status_description};
pub use family::{
    CycleMetrics, ProfileRule, ProfileTrigger, ReaderFamily, ReaderModel, lookup_model, models,
    next_profile,
};
pub use frame::{
    Frame, FrameBuffer, HEARTBEAT_COMMAND, crc16, encode as encode_frame, try_extract_frame,
    verify as verify_frame,
};
pub use inventory::{
    DEFAULT_SCAN_TIME, Notification, RecordLayout, TagBlock, antenna_code, decode_notification,
    decode_tag_block, encode_inventory, response_deadline,
};
pub use orchestrator::{
    InventoryHandle, InventorySummary, OrchestratorConfig, OrchestratorState, Phase, TagSink,
};
pub use reader::{BROADCAST_ADDRESS, UhfReader, connect};
pub use select::{SelectAction, SelectCommand, encode_select};
pub use tcp::TcpTransport;
pub use transport::RfidTransport;
pub use types::{
    InventoryConfig, InventoryOutcome, InventoryStats, MemoryBank, MixReadSpec, ReaderInfo,
    Result, SelectMask, Session, TagRecord, TagTarget, TidSpec, UhfError, bytes_to_hex,
};

#[cfg(feature = "uart-esp32")]
pub use uart::UartTransport;

#[cfg(feature = "serial")]
pub use serial::SerialTransport;
