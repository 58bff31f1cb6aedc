use log::{debug, info, warn};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::channel::{ChannelConfig, CommandChannel};
use crate::command::{Command, TAG_ACCESS_TIMEOUT, status};
use crate::family::{ReaderModel, lookup_model};
use crate::frame::Frame;
use crate::inventory::{
    Notification, RecordLayout, decode_notification, decode_tag_block, encode_inventory,
    response_deadline,
};
use crate::orchestrator::{self, InventoryHandle, OrchestratorConfig, TagSink};
use crate::select::{SelectCommand, encode_select};
use crate::transport::RfidTransport;
use crate::types::{
    InventoryConfig, InventoryOutcome, MemoryBank, ReaderInfo, Result, TagRecord, TagTarget,
    UhfError,
};

/// Address every reader answers to regardless of its configured address
pub const BROADCAST_ADDRESS: u8 = 0xFF;

/// Highest RF power the readers accept, in dBm
const MAX_RF_POWER_DBM: u8 = 33;

const PROFILE_SET: u8 = 0x80;
const PROFILE_NO_SAVE: u8 = 0x40;
const PROFILE_MASK: u8 = 0x3F;

/// Connect to a reader and verify it answers by fetching its information.
pub fn connect<T: RfidTransport>(transport: T, address: u8) -> Result<UhfReader<T>> {
    let mut reader = UhfReader::new(transport, address);
    let info = reader.get_info()?;
    info!(
        "Connected to {} (type 0x{:02X}, firmware {}, {} antenna ports)",
        info.model.name,
        info.reader_type,
        info.firmware_version(),
        info.model.antenna_count
    );
    Ok(reader)
}

/// Gen2 reader bound to one transport.
///
/// Commands take `&self` and serialize on the underlying channel, so a
/// continuous inventory started from this reader can run while single
/// commands such as [`get_info`](Self::get_info) are issued between its
/// antenna calls.
pub struct UhfReader<T: RfidTransport> {
    channel: Arc<CommandChannel<T>>,
    address: u8,
    info: Option<ReaderInfo>,
    scanning: Arc<AtomicBool>,
}

impl<T: RfidTransport> UhfReader<T> {
    /// Create a new reader instance with the given transport.
    ///
    /// Nothing is sent; use [`connect`] to also verify the link.
    pub fn new(transport: T, address: u8) -> Self {
        Self::with_config(transport, address, ChannelConfig::default())
    }

    pub fn with_config(transport: T, address: u8, config: ChannelConfig) -> Self {
        Self {
            channel: Arc::new(CommandChannel::with_config(transport, config)),
            address,
            info: None,
            scanning: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Second handle on the same channel, used by the inventory worker
    pub(crate) fn share(&self) -> Self {
        Self {
            channel: Arc::clone(&self.channel),
            address: self.address,
            info: self.info.clone(),
            scanning: Arc::clone(&self.scanning),
        }
    }

    pub(crate) fn channel(&self) -> &CommandChannel<T> {
        &self.channel
    }

    pub(crate) fn scanning_flag(&self) -> &Arc<AtomicBool> {
        &self.scanning
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    /// Information from the last successful [`get_info`](Self::get_info)
    pub fn info(&self) -> Option<&ReaderInfo> {
        self.info.as_ref()
    }

    /// Model resolved from the cached information, or the generic fallback
    pub fn model(&self) -> ReaderModel {
        self.info
            .as_ref()
            .map(|info| info.model)
            .unwrap_or_else(|| lookup_model(0))
    }

    /// Cached information, or [`UhfError::NotConnected`] before the first
    /// successful [`get_info`](Self::get_info)
    fn require_info(&self) -> Result<&ReaderInfo> {
        self.info.as_ref().ok_or(UhfError::NotConnected)
    }

    /// Whether a continuous inventory started from this reader is running
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::SeqCst)
    }

    fn response_timeout(&self) -> Duration {
        self.channel.config().response_timeout
    }

    /// Send a command and turn a non-success status into an error
    fn call(&self, command: Command, payload: &[u8], timeout: Duration) -> Result<Frame> {
        let frame = self
            .channel
            .send_and_wait(self.address, command.code(), payload, timeout)?;
        check_status(command, frame)
    }

    /// Get reader information and cache it
    pub fn get_info(&mut self) -> Result<ReaderInfo> {
        let frame = self.call(Command::GetReaderInfo, &[], self.response_timeout())?;
        let info = parse_reader_info(&frame)?;
        debug!("Reader info: {:?}", info);
        self.info = Some(info.clone());
        Ok(info)
    }

    /// Run one inventory with `config` and collect every tag it reports.
    ///
    /// With `fast` set, the call is scoped to the lowest enabled antenna.
    /// Fails with [`UhfError::AlreadyRunning`] while a continuous inventory
    /// owns the reader.
    pub fn inventory_once(&self, config: &InventoryConfig) -> Result<InventoryOutcome> {
        if self.is_scanning() {
            return Err(UhfError::AlreadyRunning);
        }
        let antenna = config.antennas().next().unwrap_or(0);
        self.run_inventory(config, antenna, |_| {})
    }

    /// One logical inventory call, following "more data" frames until a
    /// terminal status. `on_tag` sees each tag as its frame arrives.
    pub(crate) fn run_inventory<F>(
        &self,
        config: &InventoryConfig,
        antenna: u8,
        mut on_tag: F,
    ) -> Result<InventoryOutcome>
    where
        F: FnMut(&TagRecord),
    {
        let (command, payload) = encode_inventory(config, antenna)?;
        let layout = RecordLayout::for_command(command.code());
        let started = Instant::now();
        let mut outcome = InventoryOutcome::default();

        self.channel.exchange(
            self.address,
            command.code(),
            &payload,
            response_deadline(config.scan_time),
            true,
            |frame| {
                let block = decode_tag_block(&frame, layout);
                let more = block.has_more();
                for tag in &block.tags {
                    on_tag(tag);
                }
                outcome.status = block.status;
                outcome.tags.extend(block.tags);
                if block.stats.is_some() {
                    outcome.stats = block.stats;
                }
                if more {
                    ControlFlow::Continue(())
                } else {
                    ControlFlow::Break(())
                }
            },
        )?;
        outcome.elapsed = started.elapsed();

        match outcome.status {
            s if status::carries_tags(s) => Ok(outcome),
            status::STATISTICS | status::NO_TAG | status::NO_RESPONSE => Ok(outcome),
            // Interrupted before any frame arrived
            status::SUCCESS if self.channel.is_interrupted() => Ok(outcome),
            s => Err(UhfError::Status {
                command: command.code(),
                status: s,
            }),
        }
    }

    /// Issue a Gen2 select pre-filter. The antenna field width depends on
    /// the model, so reader information must have been fetched.
    pub fn select(&self, select: &SelectCommand) -> Result<()> {
        let antenna_count = self.require_info()?.model.antenna_count;
        let payload = encode_select(select, antenna_count)?;
        self.call(Command::Select, &payload, self.response_timeout())?;
        Ok(())
    }

    /// Query the active RF link profile
    pub fn get_profile(&self) -> Result<u8> {
        let frame = self.call(Command::Profile, &[0x00], self.response_timeout())?;
        profile_from(&frame)
    }

    /// Switch the RF link profile.
    ///
    /// # Arguments
    /// * `profile` - Profile number (0-63)
    /// * `save` - Persist across power cycles
    ///
    /// # Returns
    /// The profile the reader actually accepted
    pub fn set_profile(&self, profile: u8, save: bool) -> Result<u8> {
        if profile > PROFILE_MASK {
            return Err(UhfError::Config(format!(
                "profile {} out of range (0-63)",
                profile
            )));
        }
        let mut data = PROFILE_SET | profile;
        if !save {
            data |= PROFILE_NO_SAVE;
        }
        let frame = self.call(Command::Profile, &[data], self.response_timeout())?;
        profile_from(&frame)
    }

    /// Set RF power in dBm. One value applies to every antenna; more values
    /// set each antenna in order.
    pub fn set_rf_power(&self, power_dbm: &[u8]) -> Result<()> {
        if power_dbm.is_empty() {
            return Err(UhfError::Config("no RF power given".into()));
        }
        if let Some(&too_high) = power_dbm.iter().find(|&&p| p > MAX_RF_POWER_DBM) {
            return Err(UhfError::Config(format!(
                "RF power too high: {} dBm (maximum: {} dBm)",
                too_high, MAX_RF_POWER_DBM
            )));
        }
        self.call(Command::SetRfPower, power_dbm, self.response_timeout())?;
        Ok(())
    }

    /// Enter continuous read mode; tags then arrive as notifications
    pub fn start_read(&self, target: u8) -> Result<()> {
        if target > 1 {
            return Err(UhfError::Config(format!(
                "target {} out of range (0 = A, 1 = B)",
                target
            )));
        }
        self.call(Command::StartRead, &[target], self.response_timeout())?;
        Ok(())
    }

    /// Leave continuous read mode without discarding notifications still in flight
    pub fn stop_read(&self) -> Result<()> {
        let frame = self.channel.send_no_clear_and_wait(
            self.address,
            Command::StopRead.code(),
            &[],
            self.response_timeout(),
        )?;
        check_status(Command::StopRead, frame)?;
        Ok(())
    }

    /// Return the reader to idle, discarding whatever is still buffered
    pub fn stop_inventory(&self) -> Result<()> {
        self.call(Command::StopRead, &[], self.response_timeout())?;
        Ok(())
    }

    /// Halt the reader mid-burst. Sent without waiting for the channel and
    /// without expecting a reply.
    pub fn stop_immediately(&self) -> Result<()> {
        self.channel
            .write_immediate(self.address, Command::StopImmediately.code(), &[])
    }

    /// Receive continuous read notifications for `window`.
    ///
    /// # Returns
    /// Number of tag reports seen
    pub fn poll_notifications<F>(&self, window: Duration, mut on_notification: F) -> Result<usize>
    where
        F: FnMut(Notification),
    {
        let mut tags = 0;
        self.channel
            .listen(Command::ReadNotification.code(), window, |frame| {
                match decode_notification(&frame) {
                    Some(notification) => {
                        if matches!(notification, Notification::Tag(_)) {
                            tags += 1;
                        }
                        on_notification(notification);
                    }
                    None => warn!("Malformed notification: {:02X?}", frame.payload),
                }
                ControlFlow::Continue(())
            })?;
        Ok(tags)
    }

    /// Read words from tag memory
    ///
    /// # Arguments
    /// * `target` - Tag to talk to, by EPC or by mask
    /// * `bank` - Memory bank to read
    /// * `word_ptr` - Start address in words
    /// * `word_count` - Number of words to read
    /// * `password` - Access password (all zeros when unset)
    pub fn read_data(
        &self,
        target: &TagTarget,
        bank: MemoryBank,
        word_ptr: u8,
        word_count: u8,
        password: [u8; 4],
    ) -> Result<Vec<u8>> {
        target.validate()?;
        if word_count == 0 {
            return Err(UhfError::Config("word count must be at least 1".into()));
        }

        let mut payload = Vec::new();
        match target {
            TagTarget::Epc(epc) => {
                payload.push((epc.len() / 2) as u8);
                payload.extend_from_slice(epc);
                payload.extend_from_slice(&[bank as u8, word_ptr, word_count]);
                payload.extend_from_slice(&password);
            }
            TagTarget::Mask(mask) => {
                payload.push(TAG_TARGET_MASK);
                payload.extend_from_slice(&[bank as u8, word_ptr, word_count]);
                payload.extend_from_slice(&password);
                mask.encode_into(&mut payload);
            }
        }

        let frame = self.call(Command::ReadData, &payload, TAG_ACCESS_TIMEOUT)?;
        Ok(frame.data().to_vec())
    }

    /// Write words to tag memory. `data` must hold whole words.
    pub fn write_data(
        &self,
        target: &TagTarget,
        bank: MemoryBank,
        word_ptr: u8,
        data: &[u8],
        password: [u8; 4],
    ) -> Result<()> {
        target.validate()?;
        if data.is_empty() || data.len() % 2 != 0 {
            return Err(UhfError::Config(format!(
                "write data must be a whole number of words, got {} bytes",
                data.len()
            )));
        }

        let word_count = (data.len() / 2) as u8;
        let mut payload = vec![word_count];
        match target {
            TagTarget::Epc(epc) => {
                payload.push((epc.len() / 2) as u8);
                payload.extend_from_slice(epc);
                payload.extend_from_slice(&[bank as u8, word_ptr]);
                payload.extend_from_slice(data);
                payload.extend_from_slice(&password);
            }
            TagTarget::Mask(mask) => {
                payload.push(TAG_TARGET_MASK);
                payload.extend_from_slice(&[bank as u8, word_ptr]);
                payload.extend_from_slice(data);
                payload.extend_from_slice(&password);
                mask.encode_into(&mut payload);
            }
        }

        self.call(Command::WriteData, &payload, TAG_ACCESS_TIMEOUT)?;
        Ok(())
    }

    /// Overwrite the EPC of the single tag in the field
    pub fn write_epc(&self, epc: &[u8], password: [u8; 4]) -> Result<()> {
        TagTarget::Epc(epc.to_vec()).validate()?;
        let mut payload = vec![(epc.len() / 2) as u8];
        payload.extend_from_slice(&password);
        payload.extend_from_slice(epc);
        self.call(Command::WriteEpc, &payload, TAG_ACCESS_TIMEOUT)?;
        Ok(())
    }

    /// Set a generic configuration parameter
    pub fn set_config_param(&self, opt: u8, cfg_num: u8, data: &[u8]) -> Result<()> {
        let mut payload = vec![opt, cfg_num];
        payload.extend_from_slice(data);
        self.call(Command::SetConfig, &payload, self.response_timeout())?;
        Ok(())
    }

    /// Get a generic configuration parameter's data bytes
    pub fn get_config_param(&self, cfg_no: u8) -> Result<Vec<u8>> {
        let frame = self.call(Command::GetConfig, &[cfg_no], self.response_timeout())?;
        Ok(frame.data().to_vec())
    }
}

impl<T: RfidTransport + Send + 'static> UhfReader<T> {
    /// Start continuous inventory on a background thread.
    ///
    /// Fetches reader information first if none is cached, since the antenna
    /// count and reader family drive the scanning loop. `sink` runs on the
    /// inventory thread for every tag and must return quickly.
    pub fn start_continuous<S>(
        &mut self,
        inventory: InventoryConfig,
        config: OrchestratorConfig,
        sink: S,
    ) -> Result<InventoryHandle<T>>
    where
        S: TagSink + 'static,
    {
        if self.is_scanning() {
            return Err(UhfError::AlreadyRunning);
        }
        if self.info.is_none() {
            self.get_info()?;
        }
        orchestrator::start(self.share(), inventory, config, sink)
    }
}

/// EPC length byte that switches a tag access command to mask addressing
const TAG_TARGET_MASK: u8 = 0xFF;

fn check_status(command: Command, frame: Frame) -> Result<Frame> {
    match frame.status() {
        Some(status::SUCCESS) => Ok(frame),
        Some(status::TAG_ERROR) => Err(UhfError::Tag {
            command: command.code(),
            code: frame.data().first().copied().unwrap_or(0),
        }),
        Some(status) => Err(UhfError::Status {
            command: command.code(),
            status,
        }),
        None => Err(UhfError::Framing(format!(
            "empty response to command 0x{:02X}",
            command.code()
        ))),
    }
}

fn profile_from(frame: &Frame) -> Result<u8> {
    frame
        .data()
        .first()
        .map(|&b| b & PROFILE_MASK)
        .ok_or_else(|| UhfError::Framing("profile reply without data".into()))
}

fn parse_reader_info(frame: &Frame) -> Result<ReaderInfo> {
    let data = frame.data();
    if data.len() < 9 {
        return Err(UhfError::Framing(format!(
            "reader info reply too short: {} bytes",
            data.len()
        )));
    }
    let at = |i: usize| data.get(i).copied().unwrap_or(0);
    Ok(ReaderInfo {
        address: frame.address,
        version: (data[0], data[1]),
        reader_type: data[2],
        protocols: data[3],
        max_freq: data[4],
        min_freq: data[5],
        power_dbm: data[6],
        scan_time: data[7],
        antenna_config: data[8],
        beep: at(9),
        output_rep: at(10),
        check_antenna: at(11) != 0,
        model: lookup_model(data[2]),
    })
}
