/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The execution system: the coordinator of all registered modules.
//!
//! # Cycle
//!
//! One coordinator cycle walks a four-state machine:
//!
//! ```text
//! HandleExceptions ─► Initialize ─► ManageThreads ─► RoutePackets
//!        ▲                                               │
//!        └──────────── (review list not empty) ◄─────────┘
//! ```
//!
//! A clean cycle on an initialized system starts directly at ManageThreads;
//! HandleExceptions runs only when the review list has entries.  Errors from
//! ManageThreads / RoutePackets are caught at the cycle boundary, pushed to
//! the review list, and bring the next cycle back to HandleExceptions.
//!
//! # Ownership
//!
//! The coordinator never runs module logic.  It starts each module's two
//! tasks, wakes the init task, watches the loop task's blocked flag, moves
//! packets between the global queue, the per-module queues and the
//! [`PacketSink`], and drains the global exception queue into the review
//! list.
//!
//! # Shutdown
//!
//! Once the [`StopHandle`] is set (Exit packet, OS signal, fatal exception
//! or the consecutive-fault ceiling) ManageThreads cancels the root
//! [`CancellationToken`].  Module tasks stop at their next await point; any
//! task still running after `shutdownGraceMs` is aborted.  ApplicationClose
//! then flushes outbound queues and dumps unreviewed exceptions to the
//! Error channel.

pub mod builtin;
pub mod transport;

pub use builtin::{SystemModule, SYSTEM_MODULE_NAME, VERSION};
pub use transport::{Channel, Ingress, IngressClosed, MemorySink, PacketSink, StdioSink};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use thiserror::Error;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::exception::{ExceptionKind, ExecutionException, SystemException, SystemRef};
use crate::module::runtime::{ModuleRunner, ModuleShared};
use crate::module::{Module, ModuleContext, ModuleHandle, ModuleId, ModuleRef, Phase, PhaseStatus};
use crate::packet::Packet;
use crate::policy::{ModulePolicy, SystemPolicy};

/// Name used when none is given to [`ExecutionSystem::with_name`].
pub const DEFAULT_SYSTEM_NAME: &str = "cadence";

// ── Stop handle ───────────────────────────────────────────────────────────────

/// Global stop flag.  Cloneable; any holder can request an orderly shutdown.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

// ── Public result types ───────────────────────────────────────────────────────

/// Coordinator state a cycle starts in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    HandleExceptions,
    Initialize,
    ManageThreads,
    RoutePackets,
}

/// Result of one [`ExecutionSystem::step`].
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// The cycle ran to the end of RoutePackets without an error.
    Clean,
    /// The cycle was cut short; the exception is already on the review list.
    Faulted(ExecutionException),
    /// The application is closed; nothing runs anymore.
    Closed,
}

/// Why the execution system closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// Stop requested through the [`StopHandle`] (Exit packet, signal, API).
    Requested,
    /// Stop forced by an exception of the given kind.
    Escalated(ExceptionKind),
}

/// Summary returned by [`ExecutionSystem::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExitReport {
    pub cycles: u64,
    pub reason: ExitReason,
    /// Exceptions dumped to the Error channel at close.
    pub unhandled_exceptions: usize,
    /// Some module task had to be aborted after the grace period.
    pub forced: bool,
}

impl ExitReport {
    pub fn is_clean(&self) -> bool {
        self.reason == ExitReason::Requested && !self.forced
    }
}

/// Configuration errors raised at registration time.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("Execution System - attempted duplicate module link: {name} is already registered as module {id}")]
    Duplicate { name: String, id: ModuleId },

    #[error("Execution System - no module registered with ID {0}")]
    UnknownModule(ModuleId),

    #[error("Execution System - cannot register {0} while shutting down")]
    ShuttingDown(String),
}

// ── Module slots ──────────────────────────────────────────────────────────────

/// Receivers handed to the module tasks when they are spawned.
struct PendingTasks {
    wake: mpsc::Receiver<()>,
    inbound: UnboundedReceiver<Packet>,
}

struct PhaseTasks {
    init: JoinHandle<()>,
    lp: JoinHandle<()>,
}

/// Coordinator-side bookkeeping of one registered module.
struct ModuleSlot {
    module: Arc<dyn Module>,
    shared: Arc<ModuleShared>,
    runner: Arc<ModuleRunner>,
    outbound: UnboundedReceiver<Packet>,
    wake: mpsc::Sender<()>,
    pending: Option<PendingTasks>,
    tasks: Option<PhaseTasks>,
    token: CancellationToken,
    /// Consecutive cycles the loop has been observed blocked.
    blocked_cycles: u32,
    deactivated: bool,
}

impl ModuleSlot {
    fn module_ref(&self) -> &ModuleRef {
        &self.shared.module_ref
    }

    fn start(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        let init = tokio::spawn(Arc::clone(&self.runner).run_init(pending.wake, self.token.clone()));
        let lp = tokio::spawn(Arc::clone(&self.runner).run_loop(pending.inbound, self.token.clone()));
        self.tasks = Some(PhaseTasks { init, lp });
        debug!(module = %self.module_ref(), "module tasks started");
    }

    fn is_stopped(&self) -> bool {
        self.tasks
            .as_ref()
            .map_or(true, |t| t.init.is_finished() && t.lp.is_finished())
    }

    fn abort(&self) {
        if let Some(t) = &self.tasks {
            t.init.abort();
            t.lp.abort();
        }
    }
}

/// System-wide endpoints every new module is wired to.
struct SlotLinks<'a> {
    packets: &'a UnboundedSender<Packet>,
    exceptions: &'a UnboundedSender<anyhow::Error>,
    stop: &'a StopHandle,
    system: &'a SystemRef,
    root: &'a CancellationToken,
}

impl SlotLinks<'_> {
    fn build(
        &self,
        id: ModuleId,
        module: Arc<dyn Module>,
        policy: ModulePolicy,
    ) -> (ModuleSlot, ModuleHandle) {
        let module_ref = ModuleRef::new(id, module.name());

        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        // Single slot: at most one wake is ever pending.
        let (wake_tx, wake_rx) = mpsc::channel(1);

        let shared = Arc::new(ModuleShared::new(module_ref, policy, inbound_tx));
        let ctx = ModuleContext::new(
            Arc::clone(&shared),
            outbound_tx,
            self.packets.clone(),
            self.exceptions.clone(),
            self.stop.clone(),
            self.system.clone(),
        );
        let runner = ModuleRunner::new(Arc::clone(&module), ctx);

        let slot = ModuleSlot {
            module,
            shared: Arc::clone(&shared),
            runner,
            outbound: outbound_rx,
            wake: wake_tx,
            pending: Some(PendingTasks {
                wake: wake_rx,
                inbound: inbound_rx,
            }),
            tasks: None,
            token: self.root.child_token(),
            blocked_cycles: 0,
            deactivated: false,
        };
        (slot, ModuleHandle::new(shared))
    }
}

// ── ExecutionSystem ───────────────────────────────────────────────────────────

pub struct ExecutionSystem {
    name: SystemRef,
    policy: Arc<SystemPolicy>,
    sink: Arc<dyn PacketSink>,
    slots: Vec<ModuleSlot>,
    system_module: ModuleHandle,

    packet_tx: UnboundedSender<Packet>,
    packet_rx: UnboundedReceiver<Packet>,
    exception_tx: UnboundedSender<anyhow::Error>,
    exception_rx: UnboundedReceiver<anyhow::Error>,
    review: Vec<ExecutionException>,
    advertiser: Option<ModuleId>,

    stop: StopHandle,
    root: CancellationToken,
    state: CycleState,
    initialized: bool,
    bootstrapped: bool,
    consecutive_faults: u32,
    escalation: Option<ExceptionKind>,
    stop_started: Option<Instant>,
    forced: bool,
    closed: bool,
    cycles: u64,
    unhandled_at_close: usize,
}

impl ExecutionSystem {
    pub fn new(policy: SystemPolicy, sink: Arc<dyn PacketSink>) -> Self {
        Self::with_name(DEFAULT_SYSTEM_NAME, policy, sink)
    }

    /// Build an execution system and register its own module as ID 0.
    pub fn with_name(name: &str, policy: SystemPolicy, sink: Arc<dyn PacketSink>) -> Self {
        let (packet_tx, packet_rx) = mpsc::unbounded_channel();
        let (exception_tx, exception_rx) = mpsc::unbounded_channel();
        let name = SystemRef::new(name);
        let stop = StopHandle::new();
        let root = CancellationToken::new();

        let links = SlotLinks {
            packets: &packet_tx,
            exceptions: &exception_tx,
            stop: &stop,
            system: &name,
            root: &root,
        };
        let (slot, system_module) =
            links.build(ModuleId::SYSTEM, Arc::new(SystemModule), ModulePolicy::default());

        Self {
            name,
            policy: Arc::new(policy),
            sink,
            slots: vec![slot],
            system_module,
            packet_tx,
            packet_rx,
            exception_tx,
            exception_rx,
            review: Vec::new(),
            advertiser: None,
            stop,
            root,
            state: CycleState::HandleExceptions,
            initialized: false,
            bootstrapped: false,
            consecutive_faults: 0,
            escalation: None,
            stop_started: None,
            forced: false,
            closed: false,
            cycles: 0,
            unhandled_at_close: 0,
        }
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn name(&self) -> &SystemRef {
        &self.name
    }

    pub fn policy(&self) -> &SystemPolicy {
        &self.policy
    }

    /// Replace the system policy; the next cycle reads the new snapshot.
    pub fn replace_policy(&mut self, policy: SystemPolicy) {
        debug!(?policy, "system policy replaced");
        self.policy = Arc::new(policy);
    }

    /// Handle of the built-in module at ID 0.
    pub fn system_module(&self) -> &ModuleHandle {
        &self.system_module
    }

    pub fn module(&self, id: ModuleId) -> Option<ModuleHandle> {
        self.slots
            .get(id.index())
            .map(|slot| ModuleHandle::new(Arc::clone(&slot.shared)))
    }

    /// Registered modules, the system module included.
    pub fn module_count(&self) -> usize {
        self.slots.len()
    }

    pub fn ingress(&self) -> Ingress {
        Ingress::new(self.packet_tx.clone(), self.exception_tx.clone())
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// State the next cycle starts in.
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Exceptions collected but not reviewed yet.
    pub fn pending_review(&self) -> &[ExecutionException] {
        &self.review
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // ── Registration ─────────────────────────────────────────────────────────

    /// Register `module` with the default module policy.
    pub fn register(&mut self, module: Arc<dyn Module>) -> Result<ModuleHandle, RegistrationError> {
        self.register_with_policy(module, ModulePolicy::default())
    }

    /// Register `module`.  The same module instance can only be linked once.
    pub fn register_with_policy(
        &mut self,
        module: Arc<dyn Module>,
        policy: ModulePolicy,
    ) -> Result<ModuleHandle, RegistrationError> {
        if self.closed || self.stop.is_requested() {
            return Err(RegistrationError::ShuttingDown(module.name().to_string()));
        }
        if let Some(existing) = self.slots.iter().find(|s| same_module(&s.module, &module)) {
            let err = RegistrationError::Duplicate {
                name: module.name().to_string(),
                id: existing.module_ref().id(),
            };
            error!(error = %err, "module registration rejected");
            return Err(err);
        }
        Ok(self.insert_module(module, policy))
    }

    fn insert_module(&mut self, module: Arc<dyn Module>, policy: ModulePolicy) -> ModuleHandle {
        let links = SlotLinks {
            packets: &self.packet_tx,
            exceptions: &self.exception_tx,
            stop: &self.stop,
            system: &self.name,
            root: &self.root,
        };
        let (slot, handle) = links.build(ModuleId(self.slots.len()), module, policy);
        info!(module = %slot.module_ref(), "module registered");
        self.slots.push(slot);
        handle
    }

    /// Route advertised exceptions to module `id` instead of the Error
    /// channel.
    pub fn set_advertiser(&mut self, id: ModuleId) -> Result<(), RegistrationError> {
        if self.slots.get(id.index()).is_none() {
            return Err(RegistrationError::UnknownModule(id));
        }
        info!(module = %id, "exception advertiser set");
        self.advertiser = Some(id);
        Ok(())
    }

    // ── Running ──────────────────────────────────────────────────────────────

    /// Run cycles until the application closes.
    pub async fn execute(&mut self) -> ExitReport {
        info!(system = %self.name, modules = self.slots.len(), "execution system running");
        loop {
            if let CycleOutcome::Closed = self.step() {
                break;
            }
            tokio::time::sleep(self.policy.loop_sleep()).await;
        }
        self.exit_report()
    }

    /// Run exactly one coordinator cycle.
    ///
    /// Must be called from within a tokio runtime (module tasks are spawned
    /// on the first cycle).
    pub fn step(&mut self) -> CycleOutcome {
        if self.closed {
            return CycleOutcome::Closed;
        }
        self.cycles += 1;
        let policy = Arc::clone(&self.policy);

        let outcome = match self.run_cycle(&policy) {
            Ok(()) => {
                self.consecutive_faults = 0;
                CycleOutcome::Clean
            }
            Err(exc) => self.fault(exc),
        };
        if self.closed {
            return CycleOutcome::Closed;
        }

        if self.initialized {
            self.state = CycleState::ManageThreads;
        }
        if !self.review.is_empty() {
            self.state = CycleState::HandleExceptions;
        }
        if self.consecutive_faults > policy.consecutive_exception_threshold && !self.stop.is_requested() {
            let threshold = policy.consecutive_exception_threshold;
            let exc = SystemException::new(
                ExceptionKind::ConsecutiveExceptions,
                format!("Execution System - exiting from consecutive exceptions, threshold: {threshold}"),
            )
            .with_system(self.name.clone());
            error!(faults = self.consecutive_faults, threshold, "coordinator exceeded consecutive exception threshold");
            self.review.push(exc.into());
            self.begin_stop(ExceptionKind::ConsecutiveExceptions);
            self.state = CycleState::ManageThreads;
        }
        outcome
    }

    pub fn exit_report(&self) -> ExitReport {
        ExitReport {
            cycles: self.cycles,
            reason: match self.escalation {
                Some(kind) => ExitReason::Escalated(kind),
                None => ExitReason::Requested,
            },
            unhandled_exceptions: self.unhandled_at_close,
            forced: self.forced,
        }
    }

    fn run_cycle(&mut self, policy: &SystemPolicy) -> Result<(), ExecutionException> {
        let mut measured_from: Option<Instant> = None;
        loop {
            match self.state {
                CycleState::HandleExceptions => {
                    self.handle_exceptions(policy);
                    self.state = CycleState::Initialize;
                }
                CycleState::Initialize => {
                    self.initialize();
                    self.state = CycleState::ManageThreads;
                }
                CycleState::ManageThreads => {
                    measured_from = Some(Instant::now());
                    self.manage_threads(policy)?;
                    if self.closed {
                        return Ok(());
                    }
                    self.state = CycleState::RoutePackets;
                }
                CycleState::RoutePackets => {
                    self.route_packets(policy)?;
                    self.state = CycleState::HandleExceptions;
                    break;
                }
            }
        }

        if let Some(started) = measured_from {
            let elapsed = started.elapsed();
            if elapsed > policy.max_cycle_duration() {
                return Err(self.system_exception(
                    ExceptionKind::DurationExceeded,
                    format!(
                        "Execution System - exceeded max cycle duration: {} ms > {} ms",
                        elapsed.as_millis(),
                        policy.max_cycle_duration_ms
                    ),
                ));
            }
        }
        Ok(())
    }

    fn fault(&mut self, exc: ExecutionException) -> CycleOutcome {
        self.consecutive_faults += 1;
        warn!(
            kind = exc.kind().as_label(),
            faults = self.consecutive_faults,
            error = %exc.detail(),
            "coordinator cycle faulted"
        );
        if exc.is_fatal() {
            self.begin_stop(exc.kind());
        }
        self.review.push(exc.clone());
        self.state = CycleState::HandleExceptions;
        CycleOutcome::Faulted(exc)
    }

    fn begin_stop(&mut self, kind: ExceptionKind) {
        if !self.stop.is_requested() && self.escalation.is_none() {
            self.escalation = Some(kind);
        }
        self.stop.request();
    }

    fn system_exception(&self, kind: ExceptionKind, message: String) -> ExecutionException {
        SystemException::new(kind, message)
            .with_system(self.name.clone())
            .into()
    }

    // ── HandleExceptions ─────────────────────────────────────────────────────

    fn handle_exceptions(&mut self, policy: &SystemPolicy) {
        let entries = std::mem::take(&mut self.review);
        for mut exc in entries {
            exc.acknowledge();
            match &exc {
                ExecutionException::Module(m) => {
                    // The module reviews its own copy on its next init pass.
                    debug!(module = %m.module(), "module exception acknowledged");
                }
                ExecutionException::System(s) => {
                    debug!(kind = s.kind().as_label(), "system exception acknowledged");
                    if !s.is_fatal() {
                        self.initialized = false;
                    }
                }
            }

            if policy.log_exceptions {
                log_exception(&exc);
                exc.mark_logged();
            }
            if policy.advertise_exceptions && self.advertise(&exc) {
                exc.mark_advertised();
            }
        }
    }

    /// Publish `exc` through the advertiser module, falling back to the Error
    /// channel.  Returns `true` when it went out somewhere.
    fn advertise(&self, exc: &ExecutionException) -> bool {
        let packet = exc.to_packet();
        if let Some(slot) = self.advertiser.and_then(|id| self.slots.get(id.index())) {
            if slot.shared.should_execute() && slot.shared.push_packet(packet.clone()).is_ok() {
                return true;
            }
        }
        match self.sink.emit(Channel::Error, &packet) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to advertise exception");
                false
            }
        }
    }

    // ── Initialize ───────────────────────────────────────────────────────────

    fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        if !self.bootstrapped {
            for slot in &self.slots {
                debug!(module = %slot.module_ref(), "linked module");
            }
            info!(system = %self.name, modules = self.slots.len(), "=== Execution system initialized ===");
            self.bootstrapped = true;
        } else {
            if let Some(id) = self.advertiser {
                let gone = self.slots.get(id.index()).map_or(true, |s| s.deactivated);
                if gone {
                    warn!(module = %id, "advertiser module is inactive, advertising to the error channel");
                    self.advertiser = None;
                }
            }
            debug!(system = %self.name, "execution system re-initialized");
        }
        self.initialized = true;
    }

    // ── ManageThreads ────────────────────────────────────────────────────────

    fn manage_threads(&mut self, policy: &SystemPolicy) -> Result<(), ExecutionException> {
        if self.stop.is_requested() {
            self.drive_stop(policy);
            return Ok(());
        }

        let mut stalled: Option<(ModuleRef, u32)> = None;
        for slot in &mut self.slots {
            if slot.tasks.is_none() {
                slot.start();
            }

            let shared = Arc::clone(&slot.shared);
            let init = shared.phase(Phase::Init);
            let lp = shared.phase(Phase::Loop);

            if init == PhaseStatus::Terminated || lp == PhaseStatus::Terminated {
                if !slot.deactivated {
                    slot.deactivated = true;
                    shared.set_should_execute(false);
                    warn!(
                        module = %slot.module_ref(),
                        init_phase = ?init,
                        loop_phase = ?lp,
                        "module phase terminated, module deactivated"
                    );
                }
                continue;
            }

            if !shared.is_initialized()
                && shared.should_execute()
                && matches!(init, PhaseStatus::Idle | PhaseStatus::Waiting)
            {
                // Full means a wake is already pending.
                let _ = slot.wake.try_send(());
            }

            if shared.is_initialized() && shared.should_execute() {
                // A loop sleeping between passes is not stalled.
                if shared.loop_blocked() && lp == PhaseStatus::Running {
                    slot.blocked_cycles += 1;
                } else {
                    slot.blocked_cycles = 0;
                }
                shared.set_loop_blocked(true);
                if slot.blocked_cycles > policy.watchdog_cycles && stalled.is_none() {
                    stalled = Some((slot.module_ref().clone(), slot.blocked_cycles));
                }
            } else {
                slot.blocked_cycles = 0;
                shared.set_loop_blocked(false);
            }
        }

        match stalled {
            Some((module, cycles)) => Err(self.system_exception(
                ExceptionKind::LoopStalled,
                format!(
                    "Execution System - module main loop watchdog: {module} blocked for {cycles} cycles"
                ),
            )),
            None => Ok(()),
        }
    }

    fn drive_stop(&mut self, policy: &SystemPolicy) {
        let started = match self.stop_started {
            Some(started) => started,
            None => {
                info!(reason = ?self.escalation, "stop requested, cancelling module tasks");
                self.root.cancel();
                let now = Instant::now();
                self.stop_started = Some(now);
                now
            }
        };

        let running = self.slots.iter().filter(|s| !s.is_stopped()).count();
        if running > 0 {
            if started.elapsed() < policy.shutdown_grace() {
                debug!(running, "waiting for module tasks to stop");
                return;
            }
            for slot in self.slots.iter().filter(|s| !s.is_stopped()) {
                warn!(
                    module = %slot.module_ref(),
                    grace_ms = policy.shutdown_grace_ms,
                    "module tasks did not stop in time, aborting"
                );
                slot.abort();
            }
            self.forced = true;
        } else {
            info!("all module tasks stopped");
        }
        self.application_close();
    }

    fn application_close(&mut self) {
        if let Err(exc) = self.flush_outbound() {
            self.review.push(exc);
        }

        let mut dropped = 0usize;
        while self.packet_rx.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            debug!(dropped, "discarded unrouted packets");
        }

        self.drain_exception_queue();
        self.unhandled_at_close = self.review.len();
        for exc in self.review.drain(..) {
            error!(kind = exc.kind().as_label(), error = %exc.detail(), "unhandled exception at close");
            if let Err(e) = self.sink.emit(Channel::Error, &exc.to_packet()) {
                warn!(error = %e, "failed to dump exception");
            }
        }

        self.packet_rx.close();
        self.exception_rx.close();
        self.closed = true;
        info!(
            system = %self.name,
            cycles = self.cycles,
            unhandled = self.unhandled_at_close,
            "=== Execution system closed ==="
        );
    }

    // ── RoutePackets ─────────────────────────────────────────────────────────

    fn route_packets(&mut self, policy: &SystemPolicy) -> Result<(), ExecutionException> {
        let mut failures = 0u32;
        while let Ok(packet) = self.packet_rx.try_recv() {
            match self.deliver(packet) {
                Ok(()) => failures = 0,
                Err(exc) => {
                    failures += 1;
                    debug!(failures, error = %exc.detail(), "packet not delivered");
                    let _ = self.exception_tx.send(anyhow::Error::new(exc));
                    if failures > policy.dequeue_fail_threshold {
                        return Err(self.system_exception(
                            ExceptionKind::DequeueFailures,
                            format!(
                                "Execution System - exceeded dequeue failure threshold: {}",
                                policy.dequeue_fail_threshold
                            ),
                        ));
                    }
                }
            }
        }

        self.drain_exception_queue();
        self.flush_outbound()
    }

    fn deliver(&self, packet: Packet) -> Result<(), ExecutionException> {
        let id = packet.module_id();
        let Some(slot) = self.slots.get(id.index()) else {
            return Err(self.system_exception(
                ExceptionKind::UndeliverablePacket,
                format!("Execution System - no module registered with ID {id} for {packet}"),
            ));
        };
        // Its loop never runs again, so nothing would drain the packet.
        if slot.deactivated {
            return Err(self.system_exception(
                ExceptionKind::UndeliverablePacket,
                format!("Execution System - module {} is deactivated, dropping {packet}", slot.module_ref()),
            ));
        }
        slot.shared.push_packet(packet).map_err(|e| {
            SystemException::new(
                ExceptionKind::UndeliverablePacket,
                format!("Execution System - module {} cannot receive packets", slot.module_ref()),
            )
            .with_system(self.name.clone())
            .with_cause(e)
            .into()
        })
    }

    fn drain_exception_queue(&mut self) {
        while let Ok(err) = self.exception_rx.try_recv() {
            self.review.push(ExecutionException::from_raw(err, &self.name));
        }
    }

    fn flush_outbound(&mut self) -> Result<(), ExecutionException> {
        for slot in &mut self.slots {
            while let Ok(packet) = slot.outbound.try_recv() {
                if let Err(e) = self.sink.emit(Channel::Output, &packet) {
                    return Err(SystemException::new(
                        ExceptionKind::Caught,
                        format!(
                            "Execution System - failed to write outbound packet of module {}",
                            slot.shared.module_ref
                        ),
                    )
                    .with_system(self.name.clone())
                    .with_cause(e)
                    .into());
                }
            }
        }
        Ok(())
    }
}

impl Drop for ExecutionSystem {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

/// Identity of the module object, not of its vtable.
fn same_module(a: &Arc<dyn Module>, b: &Arc<dyn Module>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

fn log_exception(exc: &ExecutionException) {
    let kind = exc.kind().as_label();
    match exc.module() {
        Some(module) => warn!(%module, kind, "{}", exc.detail()),
        None if exc.is_fatal() => error!(kind, "{}", exc.detail()),
        None => warn!(kind, "{}", exc.detail()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
