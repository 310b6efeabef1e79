/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Per-module execution state and the two module tasks.
//!
//! [`ModuleShared`] is the state the coordinator and the module tasks both
//! touch.  Flags are atomics, the exception list and policy sit behind short
//! std mutexes that are never held across an `.await`.
//!
//! Consecutive failure counters are per phase.  A counter is reset only by a
//! pass that actually ran and succeeded; skipped passes leave it alone.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::exception::{ExceptionKind, ExecutionException, SystemException};
use crate::packet::Packet;
use crate::policy::ModulePolicy;

use super::{Module, ModuleContext, ModuleRef, QueueClosed};

// ── Phase status ──────────────────────────────────────────────────────────────

/// The two phases every module runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Init,
    Loop,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Init => "init",
            Phase::Loop => "loop",
        })
    }
}

/// Lifecycle of one phase task, as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PhaseStatus {
    /// Task not spawned yet.
    Idle = 0,
    /// Blocked on its wake signal or sleeping between passes.
    Waiting = 1,
    /// Inside a hook.
    Running = 2,
    /// Exited; never restarted.
    Terminated = 3,
}

impl PhaseStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PhaseStatus::Idle,
            1 => PhaseStatus::Waiting,
            2 => PhaseStatus::Running,
            _ => PhaseStatus::Terminated,
        }
    }
}

// ── Shared state ──────────────────────────────────────────────────────────────

pub(crate) struct ModuleShared {
    pub(crate) module_ref: ModuleRef,
    initialized: AtomicBool,
    should_execute: AtomicBool,
    /// Set by the coordinator every cycle, cleared by each completed loop pass.
    loop_blocked: AtomicBool,
    init_status: AtomicU8,
    loop_status: AtomicU8,
    init_failures: AtomicU32,
    loop_failures: AtomicU32,
    policy: RwLock<Arc<ModulePolicy>>,
    exceptions: Mutex<VecDeque<ExecutionException>>,
    inbound: UnboundedSender<Packet>,
}

impl ModuleShared {
    pub(crate) fn new(
        module_ref: ModuleRef,
        policy: ModulePolicy,
        inbound: UnboundedSender<Packet>,
    ) -> Self {
        Self {
            module_ref,
            initialized: AtomicBool::new(false),
            should_execute: AtomicBool::new(true),
            loop_blocked: AtomicBool::new(false),
            init_status: AtomicU8::new(PhaseStatus::Idle as u8),
            loop_status: AtomicU8::new(PhaseStatus::Idle as u8),
            init_failures: AtomicU32::new(0),
            loop_failures: AtomicU32::new(0),
            policy: RwLock::new(Arc::new(policy)),
            exceptions: Mutex::new(VecDeque::new()),
            inbound,
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub(crate) fn set_initialized(&self, value: bool) {
        self.initialized.store(value, Ordering::Release);
    }

    pub(crate) fn should_execute(&self) -> bool {
        self.should_execute.load(Ordering::Acquire)
    }

    pub(crate) fn set_should_execute(&self, value: bool) {
        self.should_execute.store(value, Ordering::Release);
    }

    pub(crate) fn loop_blocked(&self) -> bool {
        self.loop_blocked.load(Ordering::Acquire)
    }

    pub(crate) fn set_loop_blocked(&self, value: bool) {
        self.loop_blocked.store(value, Ordering::Release);
    }

    pub(crate) fn phase(&self, phase: Phase) -> PhaseStatus {
        let cell = match phase {
            Phase::Init => &self.init_status,
            Phase::Loop => &self.loop_status,
        };
        PhaseStatus::from_u8(cell.load(Ordering::Acquire))
    }

    fn set_phase(&self, phase: Phase, status: PhaseStatus) {
        let cell = match phase {
            Phase::Init => &self.init_status,
            Phase::Loop => &self.loop_status,
        };
        cell.store(status as u8, Ordering::Release);
    }

    fn failure_counter(&self, phase: Phase) -> &AtomicU32 {
        match phase {
            Phase::Init => &self.init_failures,
            Phase::Loop => &self.loop_failures,
        }
    }

    pub(crate) fn failures(&self, phase: Phase) -> u32 {
        self.failure_counter(phase).load(Ordering::Acquire)
    }

    pub(crate) fn policy(&self) -> Arc<ModulePolicy> {
        let guard = self.policy.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    pub(crate) fn replace_policy(&self, policy: ModulePolicy) {
        let mut guard = self.policy.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(policy);
    }

    /// Queue `exc` locally, dropping the oldest entries beyond the policy's
    /// capacity.  Every entry also went to the global queue, so a dropped one
    /// has still been reviewed by the coordinator.
    pub(crate) fn push_exception(&self, exc: ExecutionException) {
        let capacity = self.policy().exception_queue_capacity.max(1);
        let mut queue = self.exceptions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut dropped = 0usize;
        while queue.len() >= capacity {
            queue.pop_front();
            dropped += 1;
        }
        queue.push_back(exc);
        if dropped > 0 {
            debug!(module = %self.module_ref, dropped, capacity, "module exception queue full, oldest dropped");
        }
    }

    pub(crate) fn drain_exceptions(&self) -> Vec<ExecutionException> {
        self.exceptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect()
    }

    pub(crate) fn push_packet(&self, packet: Packet) -> Result<(), QueueClosed> {
        self.inbound.send(packet).map_err(|_| QueueClosed {
            queue: "inbound",
            module: self.module_ref.clone(),
        })
    }
}

// ── Runner ────────────────────────────────────────────────────────────────────

/// Owns everything the two module tasks need.
pub(crate) struct ModuleRunner {
    module: Arc<dyn Module>,
    ctx: ModuleContext,
}

impl ModuleRunner {
    pub(crate) fn new(module: Arc<dyn Module>, ctx: ModuleContext) -> Arc<Self> {
        Arc::new(Self { module, ctx })
    }

    fn shared(&self) -> &ModuleShared {
        self.ctx.shared()
    }

    /// Init phase: one `handle_exceptions` + `init` pass per wake while the
    /// module is uninitialized and allowed to run.
    pub(crate) async fn run_init(self: Arc<Self>, mut wake: mpsc::Receiver<()>, token: CancellationToken) {
        let module = self.ctx.module_ref().clone();
        self.shared().set_phase(Phase::Init, PhaseStatus::Waiting);
        debug!(%module, "init task started");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                signal = wake.recv() => {
                    if signal.is_none() {
                        break;
                    }
                }
            }

            let shared = self.shared();
            if shared.is_initialized() || !shared.should_execute() {
                continue;
            }

            shared.set_phase(Phase::Init, PhaseStatus::Running);
            let result = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                r = self.init_pass() => r,
            };

            match result {
                Ok(()) => {
                    shared.failure_counter(Phase::Init).store(0, Ordering::Release);
                    shared.set_initialized(true);
                    info!(%module, "module initialized");
                }
                Err(err) => {
                    if self.record_failure(Phase::Init, err) {
                        shared.set_phase(Phase::Init, PhaseStatus::Terminated);
                        return;
                    }
                }
            }
            shared.set_phase(Phase::Init, PhaseStatus::Waiting);
        }

        self.shared().set_phase(Phase::Init, PhaseStatus::Terminated);
        debug!(%module, "init task stopped");
    }

    async fn init_pass(&self) -> anyhow::Result<()> {
        self.module.handle_exceptions(&self.ctx).await?;
        self.module.init(&self.ctx).await
    }

    /// Loop phase: route inbound packets and run `cycle` while initialized,
    /// then sleep for the module's policy interval.
    pub(crate) async fn run_loop(
        self: Arc<Self>,
        mut inbound: UnboundedReceiver<Packet>,
        token: CancellationToken,
    ) {
        let module = self.ctx.module_ref().clone();
        self.shared().set_phase(Phase::Loop, PhaseStatus::Waiting);
        debug!(%module, "loop task started");

        loop {
            if token.is_cancelled() {
                break;
            }

            let shared = self.shared();
            if shared.is_initialized() && shared.should_execute() {
                shared.set_phase(Phase::Loop, PhaseStatus::Running);
                let result = tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    r = self.loop_pass(&mut inbound) => r,
                };

                match result {
                    Ok(()) => {
                        shared.set_loop_blocked(false);
                        shared.failure_counter(Phase::Loop).store(0, Ordering::Release);
                    }
                    Err(err) => {
                        shared.set_initialized(false);
                        if self.record_failure(Phase::Loop, err) {
                            shared.set_phase(Phase::Loop, PhaseStatus::Terminated);
                            return;
                        }
                    }
                }
                shared.set_phase(Phase::Loop, PhaseStatus::Waiting);
            }

            let sleep = self.shared().policy().sleep();
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = tokio::time::sleep(sleep) => {}
            }
        }

        self.shared().set_phase(Phase::Loop, PhaseStatus::Terminated);
        debug!(%module, "loop task stopped");
    }

    async fn loop_pass(&self, inbound: &mut UnboundedReceiver<Packet>) -> anyhow::Result<()> {
        loop {
            match inbound.try_recv() {
                Ok(packet) => self.module.handle_packet(&self.ctx, packet).await?,
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        self.module.cycle(&self.ctx).await
    }

    /// Count a failed pass and queue its exception.  Returns `true` when the
    /// phase exceeded its threshold and must stop.
    fn record_failure(&self, phase: Phase, err: anyhow::Error) -> bool {
        let shared = self.shared();
        let module = &shared.module_ref;
        let failures = shared.failure_counter(phase).fetch_add(1, Ordering::AcqRel) + 1;

        let exc = ExecutionException::from_module_error(err, module, self.ctx.system());
        warn!(
            %module,
            %phase,
            failures,
            error = %exc.detail(),
            "module pass failed"
        );
        self.report(exc);

        let threshold = shared.policy().consecutive_exception_threshold;
        if failures <= threshold {
            return false;
        }

        error!(%module, %phase, threshold, "phase exceeded consecutive exception threshold, terminating");
        let terminal = SystemException::new(
            ExceptionKind::PhaseTerminated,
            format!(
                "Module {module} - {phase} phase exiting from consecutive exceptions, threshold: {threshold}"
            ),
        )
        .with_system(self.ctx.system().clone());
        self.report(ExecutionException::System(terminal));
        true
    }

    /// Queue `exc` locally and on the global exception queue.
    fn report(&self, exc: ExecutionException) {
        self.shared().push_exception(exc.clone());
        let _ = self.ctx.exception_queue().send(anyhow::Error::new(exc));
    }
}
