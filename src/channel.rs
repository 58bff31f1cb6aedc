//! Request/response plumbing over a transport
//!
//! One request is in flight at a time. The request lock is held for a whole
//! round trip, while the I/O lock is only held around individual reads and
//! writes so an abort frame can still be pushed out mid-request.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::debug;

use crate::command::DEFAULT_TIMEOUT;
use crate::frame::{self, Frame, FrameBuffer};
use crate::transport::RfidTransport;
use crate::types::{Result, UhfError};

/// Timing and buffer settings for a [`CommandChannel`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Deadline for a response, restarted by every accepted frame
    pub response_timeout: Duration,
    /// Sleep between polls of an idle transport
    pub poll_interval: Duration,
    /// Bytes requested from the transport per read
    pub read_chunk: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_TIMEOUT,
            poll_interval: Duration::from_millis(5),
            read_chunk: 512,
        }
    }
}

struct ChannelIo<T> {
    transport: T,
    frames: FrameBuffer,
}

pub(crate) fn transport_error<E: std::fmt::Debug>(e: E) -> UhfError {
    UhfError::Transport(format!("{:?}", e))
}

pub struct CommandChannel<T: RfidTransport> {
    request: Mutex<()>,
    io: Mutex<ChannelIo<T>>,
    interrupted: AtomicBool,
    config: ChannelConfig,
}

impl<T: RfidTransport> CommandChannel<T> {
    pub fn new(transport: T) -> Self {
        Self::with_config(transport, ChannelConfig::default())
    }

    pub fn with_config(transport: T, config: ChannelConfig) -> Self {
        Self {
            request: Mutex::new(()),
            io: Mutex::new(ChannelIo {
                transport,
                frames: FrameBuffer::new(),
            }),
            interrupted: AtomicBool::new(false),
            config,
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    fn lock_request(&self) -> Result<MutexGuard<'_, ()>> {
        self.request
            .lock()
            .map_err(|_| UhfError::Transport("request lock poisoned".into()))
    }

    fn lock_io(&self) -> Result<MutexGuard<'_, ChannelIo<T>>> {
        self.io
            .lock()
            .map_err(|_| UhfError::Transport("transport lock poisoned".into()))
    }

    /// Clear pending input, send one command and wait for its single response
    pub fn send_and_wait(
        &self,
        address: u8,
        command: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Frame> {
        self.single(address, command, payload, timeout, true)
    }

    /// Like [`send_and_wait`](Self::send_and_wait) but keeps buffered input,
    /// so tag data still in flight is not thrown away.
    pub fn send_no_clear_and_wait(
        &self,
        address: u8,
        command: u8,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Frame> {
        self.single(address, command, payload, timeout, false)
    }

    fn single(
        &self,
        address: u8,
        command: u8,
        payload: &[u8],
        timeout: Duration,
        clear_input: bool,
    ) -> Result<Frame> {
        let mut response = None;
        self.exchange(address, command, payload, timeout, clear_input, |frame| {
            response = Some(frame);
            ControlFlow::Break(())
        })?;
        response.ok_or(UhfError::Timeout { command })
    }

    /// Send one command and hand every matching response frame to `on_frame`
    /// until it breaks. The deadline restarts after each accepted frame.
    ///
    /// `on_frame` runs with the transport unlocked but the request lock held.
    pub fn exchange<F>(
        &self,
        address: u8,
        command: u8,
        payload: &[u8],
        timeout: Duration,
        clear_input: bool,
        on_frame: F,
    ) -> Result<()>
    where
        F: FnMut(Frame) -> ControlFlow<()>,
    {
        let raw = frame::encode(address, command, payload)?;
        let _request = self.lock_request()?;
        {
            let mut io = self.lock_io()?;
            if clear_input {
                io.transport.clear_input().map_err(transport_error)?;
                io.frames.clear();
            }
            debug!("Sending frame: {:02X?}", raw);
            io.transport.write(&raw).map_err(transport_error)?;
        }

        match self.collect(command, timeout, true, on_frame)? {
            ControlFlow::Break(()) => Ok(()),
            ControlFlow::Continue(rejected) if rejected > 0 => Err(UhfError::Framing(format!(
                "{} corrupted frame(s) while waiting for 0x{:02X}",
                rejected, command
            ))),
            ControlFlow::Continue(_) => Err(UhfError::Timeout { command }),
        }
    }

    /// Receive unsolicited frames for `command` for up to `window`.
    ///
    /// Nothing is written. Running out of time is not an error here.
    pub fn listen<F>(&self, command: u8, window: Duration, on_frame: F) -> Result<()>
    where
        F: FnMut(Frame) -> ControlFlow<()>,
    {
        let _request = self.lock_request()?;
        self.collect(command, window, false, on_frame).map(|_| ())
    }

    /// Write a frame right away without waiting for the request lock,
    /// clearing input or awaiting a reply.
    pub fn write_immediate(&self, address: u8, command: u8, payload: &[u8]) -> Result<()> {
        let raw = frame::encode(address, command, payload)?;
        let mut io = self.lock_io()?;
        debug!("Sending immediate frame: {:02X?}", raw);
        io.transport.write(&raw).map_err(transport_error)?;
        Ok(())
    }

    /// Make any wait in progress, and every later one, give up at the next
    /// poll until [`resume`](Self::resume) is called.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.interrupted.store(false, Ordering::SeqCst);
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Poll the transport until `on_frame` breaks or the deadline passes.
    /// On timeout, returns the number of CRC rejections seen.
    fn collect<F>(
        &self,
        command: u8,
        timeout: Duration,
        restart_deadline: bool,
        mut on_frame: F,
    ) -> Result<ControlFlow<(), usize>>
    where
        F: FnMut(Frame) -> ControlFlow<()>,
    {
        let mut chunk = vec![0u8; self.config.read_chunk.max(frame::MIN_FRAME_LEN)];
        let mut deadline = Instant::now() + timeout;

        loop {
            let (next, rejected) = {
                let mut guard = self.lock_io()?;
                let io = &mut *guard;
                let mut next = io.frames.next_frame(command);
                if next.is_none() {
                    let read = io.transport.read(&mut chunk).map_err(transport_error)?;
                    if read > 0 {
                        io.frames.feed(&chunk[..read]);
                        next = io.frames.next_frame(command);
                    }
                }
                (next, io.frames.rejected())
            };

            match next {
                Some(frame) if frame.is_heartbeat() && command != frame::HEARTBEAT_COMMAND => {
                    debug!("Heartbeat frame: {:02X?}", frame.payload);
                }
                Some(frame) => {
                    debug!(
                        "Received frame 0x{:02X}: {:02X?}",
                        frame.command, frame.payload
                    );
                    if restart_deadline {
                        deadline = Instant::now() + timeout;
                    }
                    if on_frame(frame).is_break() {
                        return Ok(ControlFlow::Break(()));
                    }
                }
                None if self.is_interrupted() => {
                    debug!("Wait for 0x{:02X} interrupted", command);
                    return Ok(ControlFlow::Break(()));
                }
                None => {
                    if Instant::now() >= deadline {
                        return Ok(ControlFlow::Continue(rejected));
                    }
                    std::thread::sleep(self.config.poll_interval);
                }
            }
        }
    }
}
