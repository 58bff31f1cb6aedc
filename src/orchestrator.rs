//! Continuous inventory on a background thread
//!
//! The worker owns its [`OrchestratorState`] and publishes a copy after every
//! antenna call; [`InventoryHandle::snapshot`] only ever sees those copies.
//! Stopping is cooperative: a cancellation flag checked per antenna and per
//! cycle, an abort frame that cuts the reader's current burst short, a
//! bounded join, then the regular stop command.

use log::{error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::family::{CycleMetrics, ProfileRule, ProfileTrigger, ReaderFamily, next_profile};
use crate::reader::UhfReader;
use crate::select::SelectCommand;
use crate::transport::RfidTransport;
use crate::types::{InventoryConfig, Result, Session, TagRecord, UhfError};

const MAX_ANTENNAS: usize = 16;

/// Receives every tag found by continuous inventory.
///
/// Called synchronously on the inventory thread. The next antenna call waits
/// until it returns, so implementations must not block; hand the tag to a
/// channel or queue if real work is needed.
///
/// The reader's command channel stays locked while `on_tag` runs. Issuing a
/// reader command from inside the sink deadlocks the inventory thread.
pub trait TagSink: Send {
    fn on_tag(&mut self, tag: &TagRecord);
}

impl<F> TagSink for F
where
    F: FnMut(&TagRecord) + Send,
{
    fn on_tag(&mut self, tag: &TagRecord) {
        self(tag)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scanning,
    Stopping,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Zero-tag antenna calls tolerated before the target is flipped
    pub idle_cycles_threshold: u32,
    /// Pause between antenna calls
    pub antenna_pause: Duration,
    /// How long `stop` waits for the worker to wind down
    pub join_timeout: Duration,
    /// Replacement for the reader family's profile table
    pub profile_rules: Option<Vec<ProfileRule>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            idle_cycles_threshold: 5,
            antenna_pause: Duration::from_millis(5),
            join_timeout: Duration::from_secs(2),
            profile_rules: None,
        }
    }
}

/// Scanning state, mutated only by the inventory thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorState {
    pub session: Session,
    pub current_target: u8,
    pub idle_cycles: u32,
    pub idle_cycles_threshold: u32,
    pub enabled_antennas: [bool; MAX_ANTENNAS],
    pub current_profile: u8,
    pub reader_family: ReaderFamily,
    pub running: bool,
    pub stop_requested: bool,
    /// Completed passes over the enabled antennas
    pub cycles: u64,
    pub total_tags: u64,
}

impl OrchestratorState {
    pub fn new(
        inventory: &InventoryConfig,
        antenna_count: u8,
        reader_family: ReaderFamily,
        profile: u8,
        idle_cycles_threshold: u32,
    ) -> Self {
        let mut enabled_antennas = [false; MAX_ANTENNAS];
        for index in inventory.antennas().filter(|&i| i < antenna_count) {
            enabled_antennas[index as usize] = true;
        }
        Self {
            session: inventory.session,
            current_target: inventory.target,
            idle_cycles: 0,
            idle_cycles_threshold,
            enabled_antennas,
            current_profile: profile,
            reader_family,
            running: false,
            stop_requested: false,
            cycles: 0,
            total_tags: 0,
        }
    }

    pub fn enabled_mask(&self) -> u16 {
        self.enabled_antennas
            .iter()
            .enumerate()
            .filter(|&(_, &on)| on)
            .fold(0u16, |mask, (i, _)| mask | (1 << i))
    }

    /// Bookkeeping before an antenna call. Returns whether the target was
    /// flipped because too many calls in a row came back empty.
    pub fn before_antenna(&mut self) -> bool {
        if self.session.alternates_target() && self.idle_cycles + 1 > self.idle_cycles_threshold {
            self.flip_target();
            true
        } else {
            false
        }
    }

    pub fn record_antenna_result(&mut self, tag_count: usize) {
        if tag_count == 0 {
            self.idle_cycles += 1;
        } else {
            self.idle_cycles = 0;
            self.total_tags += tag_count as u64;
        }
    }

    pub fn flip_target(&mut self) {
        self.current_target = 1 - self.current_target;
        self.idle_cycles = 0;
    }
}

#[derive(Debug)]
struct Shared {
    phase: Phase,
    state: OrchestratorState,
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    // The worker never panics while holding the lock; a stale copy is still useful
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Dropped when the worker exits, however it exits
struct ExitGuard {
    done: Sender<()>,
    scanning: Arc<AtomicBool>,
    orphaned: Arc<AtomicBool>,
}

impl Drop for ExitGuard {
    fn drop(&mut self) {
        // Nobody is left to run the stop sequence for an abandoned worker
        if self.orphaned.load(Ordering::SeqCst) {
            self.scanning.store(false, Ordering::SeqCst);
        }
        let _ = self.done.send(());
    }
}

struct Worker<T: RfidTransport, S: TagSink> {
    reader: UhfReader<T>,
    inventory: InventoryConfig,
    rules: Vec<ProfileRule>,
    pause: Duration,
    state: OrchestratorState,
    cancel: Arc<AtomicBool>,
    shared: Arc<Mutex<Shared>>,
    sink: S,
}

impl<T: RfidTransport, S: TagSink> Worker<T, S> {
    /// Check for cancellation and record it in the state
    fn cancelled(&mut self) -> bool {
        let cancelled = self.cancel.load(Ordering::SeqCst);
        self.state.stop_requested = cancelled;
        cancelled
    }

    fn publish(&self) {
        lock(&self.shared).state = self.state.clone();
    }

    fn run(&mut self) -> Result<()> {
        self.state.running = true;
        self.publish();
        while !self.cancelled() {
            if self.state.session == Session::Auto {
                self.auto_cycle()?;
            } else {
                self.antenna_cycle()?;
            }
            self.state.cycles += 1;
            self.publish();
        }
        Ok(())
    }

    /// The reader rotates sessions and antennas itself; one plain call per cycle
    fn auto_cycle(&mut self) -> Result<()> {
        let config = InventoryConfig {
            target: self.state.current_target,
            fast: false,
            ..self.inventory.clone()
        };
        let antenna = config.antennas().next().unwrap_or(0);
        let count = self.inventory_call(&config, antenna)?;
        self.state.record_antenna_result(count);
        thread::sleep(self.pause);
        Ok(())
    }

    fn antenna_cycle(&mut self) -> Result<()> {
        for antenna in 0..MAX_ANTENNAS as u8 {
            if !self.state.enabled_antennas[antenna as usize] {
                continue;
            }
            if self.cancelled() {
                break;
            }
            if self.state.before_antenna() {
                info!(
                    "No tags for {} calls, target flipped to {}",
                    self.state.idle_cycles_threshold,
                    target_name(self.state.current_target)
                );
            }

            let config = InventoryConfig {
                target: self.state.current_target,
                fast: true,
                ..self.inventory.clone()
            };
            let started = Instant::now();
            let count = self.inventory_call(&config, antenna)?;
            self.state.record_antenna_result(count);
            self.adapt_profile(count, started.elapsed())?;
            self.publish();

            thread::sleep(self.pause);
        }
        Ok(())
    }

    /// Run one call and hand its tags to the sink. Anything short of a
    /// transport fault counts as an empty call.
    fn inventory_call(&mut self, config: &InventoryConfig, antenna: u8) -> Result<usize> {
        let sink = &mut self.sink;
        match self
            .reader
            .run_inventory(config, antenna, |tag| sink.on_tag(tag))
        {
            Ok(outcome) => Ok(outcome.tags.len()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Inventory on antenna {} failed: {}", antenna + 1, e);
                Ok(0)
            }
        }
    }

    fn adapt_profile(&mut self, tag_count: usize, elapsed: Duration) -> Result<()> {
        if !self.state.reader_family.adapts_profile() {
            return Ok(());
        }
        let metrics = CycleMetrics::new(
            tag_count as u32,
            elapsed.as_millis() as u64,
            self.state.idle_cycles,
        );
        let Some(rule) = next_profile(&self.rules, self.state.current_profile, &metrics).copied()
        else {
            return Ok(());
        };

        if let ProfileTrigger::Idle { .. } = rule.trigger {
            self.state.flip_target();
        }
        match self.reader.set_profile(rule.to, false) {
            Ok(accepted) => {
                info!(
                    "Profile {} -> {} ({} tags, {} tags/s)",
                    self.state.current_profile, accepted, metrics.tag_count, metrics.tag_rate
                );
                self.state.current_profile = accepted;
                Ok(())
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!("Switching to profile {} failed: {}", rule.to, e);
                Ok(())
            }
        }
    }
}

fn target_name(target: u8) -> char {
    if target == 0 { 'A' } else { 'B' }
}

/// Validate, issue presets and spawn the worker.
pub(crate) fn start<T, S>(
    reader: UhfReader<T>,
    inventory: InventoryConfig,
    config: OrchestratorConfig,
    sink: S,
) -> Result<InventoryHandle<T>>
where
    T: RfidTransport + Send + 'static,
    S: TagSink + 'static,
{
    inventory.validate()?;
    let scanning = Arc::clone(reader.scanning_flag());
    if scanning
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return Err(UhfError::AlreadyRunning);
    }

    match launch(reader, inventory, config, sink) {
        Ok(handle) => Ok(handle),
        Err(e) => {
            scanning.store(false, Ordering::SeqCst);
            Err(e)
        }
    }
}

fn launch<T, S>(
    reader: UhfReader<T>,
    inventory: InventoryConfig,
    config: OrchestratorConfig,
    sink: S,
) -> Result<InventoryHandle<T>>
where
    T: RfidTransport + Send + 'static,
    S: TagSink + 'static,
{
    let model = reader.model();
    let family = model.family;
    let profile = if family.adapts_profile() {
        reader.get_profile().unwrap_or_else(|e| {
            warn!("Could not read the active profile ({}), assuming baseline", e);
            family.baseline_profile()
        })
    } else {
        family.baseline_profile()
    };

    let state = OrchestratorState::new(
        &inventory,
        model.antenna_count,
        family,
        profile,
        config.idle_cycles_threshold,
    );
    if state.enabled_mask() == 0 {
        return Err(UhfError::Config(format!(
            "antenna mask 0x{:04X} has no port on a {}-port {}",
            inventory.antenna_mask, model.antenna_count, model.name
        )));
    }

    if inventory.session.is_reader_driven() {
        for session in [Session::S2, Session::S3] {
            reader.select(&SelectCommand::preset(state.enabled_mask(), session))?;
        }
    }

    let rules = config
        .profile_rules
        .clone()
        .unwrap_or_else(|| family.default_rules().to_vec());
    let cancel = Arc::new(AtomicBool::new(false));
    let orphaned = Arc::new(AtomicBool::new(false));
    let shared = Arc::new(Mutex::new(Shared {
        phase: Phase::Scanning,
        state: state.clone(),
    }));
    let (fault_tx, faults) = mpsc::channel();
    let (done_tx, done) = mpsc::channel();

    info!(
        "Starting continuous inventory: session {:?}, target {}, antennas 0x{:04X}, profile {}",
        inventory.session,
        target_name(state.current_target),
        state.enabled_mask(),
        state.current_profile
    );

    let mut worker = Worker {
        reader: reader.share(),
        inventory,
        rules,
        pause: config.antenna_pause,
        state,
        cancel: Arc::clone(&cancel),
        shared: Arc::clone(&shared),
        sink,
    };
    let guard = ExitGuard {
        done: done_tx,
        scanning: Arc::clone(reader.scanning_flag()),
        orphaned: Arc::clone(&orphaned),
    };

    let thread = thread::Builder::new()
        .name("uhf-inventory".into())
        .spawn(move || {
            let _guard = guard;
            worker_main(&mut worker, fault_tx);
        })
        .map_err(|e| UhfError::Transport(format!("failed to spawn inventory worker: {}", e)))?;

    Ok(InventoryHandle {
        reader,
        cancel,
        orphaned,
        shared,
        faults,
        done,
        worker: Some(thread),
        join_timeout: config.join_timeout,
        started: Instant::now(),
    })
}

fn worker_main<T: RfidTransport, S: TagSink>(worker: &mut Worker<T, S>, faults: Sender<UhfError>) {
    let result = worker.run();
    worker.state.running = false;
    worker.cancelled();

    match result {
        Ok(()) => worker.publish(),
        Err(e) => {
            error!("Continuous inventory aborted: {}", e);
            // Nothing left to stop; release the reader for other commands
            worker.reader.scanning_flag().store(false, Ordering::SeqCst);
            {
                let mut shared = lock(&worker.shared);
                shared.phase = Phase::Idle;
                shared.state = worker.state.clone();
            }
            let _ = faults.send(e);
        }
    }
}

/// What a finished continuous inventory achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventorySummary {
    pub total_tags: u64,
    pub cycles: u64,
    pub final_target: u8,
    pub final_profile: u8,
    pub elapsed: Duration,
    /// Transport fault that ended the run early, if not already taken
    pub fault: Option<UhfError>,
}

/// Control handle for a running continuous inventory.
///
/// Dropping it without calling [`stop`](Self::stop) cancels the worker and
/// aborts the reader's burst but does not wait for either.
pub struct InventoryHandle<T: RfidTransport> {
    reader: UhfReader<T>,
    cancel: Arc<AtomicBool>,
    orphaned: Arc<AtomicBool>,
    shared: Arc<Mutex<Shared>>,
    faults: Receiver<UhfError>,
    done: Receiver<()>,
    worker: Option<JoinHandle<()>>,
    join_timeout: Duration,
    started: Instant,
}

impl<T: RfidTransport> InventoryHandle<T> {
    /// Copy of the scanning state as of the last antenna call
    pub fn snapshot(&self) -> OrchestratorState {
        lock(&self.shared).state.clone()
    }

    pub fn phase(&self) -> Phase {
        lock(&self.shared).phase
    }

    pub fn total_tags(&self) -> u64 {
        lock(&self.shared).state.total_tags
    }

    /// Transport fault that stopped the worker. Reported once.
    pub fn fault(&self) -> Option<UhfError> {
        self.faults.try_recv().ok()
    }

    /// Whether the worker is still scanning
    pub fn is_running(&self) -> bool {
        lock(&self.shared).state.running
    }

    fn set_phase(&self, phase: Phase) {
        lock(&self.shared).phase = phase;
    }

    /// Stop scanning and return the reader to idle.
    ///
    /// Fails with [`UhfError::StopTimeout`] if the worker does not exit
    /// within the join timeout; the worker is then left to finish on its own.
    pub fn stop(mut self) -> Result<InventorySummary> {
        info!("Stopping continuous inventory");
        self.set_phase(Phase::Stopping);
        self.cancel.store(true, Ordering::SeqCst);
        self.reader.channel().interrupt();
        if let Err(e) = self.reader.stop_immediately() {
            warn!("Abort command failed: {}", e);
        }

        match self.done.recv_timeout(self.join_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                error!(
                    "Inventory worker still running after {:?}",
                    self.join_timeout
                );
                self.orphaned.store(true, Ordering::SeqCst);
                self.worker.take();
                // Worker may have exited before seeing the orphaned flag
                if self.done.try_recv().is_ok() {
                    self.reader.scanning_flag().store(false, Ordering::SeqCst);
                }
                self.reader.channel().resume();
                return Err(UhfError::StopTimeout(self.join_timeout));
            }
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                error!("Inventory worker panicked");
            }
        }

        self.reader.channel().resume();
        let stopped = self.reader.stop_inventory();

        let state = {
            let mut shared = lock(&self.shared);
            shared.phase = Phase::Idle;
            shared.state.clone()
        };
        self.reader.scanning_flag().store(false, Ordering::SeqCst);
        info!(
            "Continuous inventory stopped after {} cycles, {} tags",
            state.cycles, state.total_tags
        );
        stopped?;

        Ok(InventorySummary {
            total_tags: state.total_tags,
            cycles: state.cycles,
            final_target: state.current_target,
            final_profile: state.current_profile,
            elapsed: self.started.elapsed(),
            fault: self.faults.try_recv().ok(),
        })
    }
}

impl<T: RfidTransport> Drop for InventoryHandle<T> {
    fn drop(&mut self) {
        if self.worker.take().is_some() {
            self.orphaned.store(true, Ordering::SeqCst);
            self.cancel.store(true, Ordering::SeqCst);
            let _ = self.reader.stop_immediately();
            // Exit guard may already have fired
            if self.done.try_recv().is_ok() {
                self.reader.scanning_flag().store(false, Ordering::SeqCst);
            }
        }
    }
}
