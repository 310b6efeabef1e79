/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Modules: the unit of scheduled work.
//!
//! Application code implements [`Module`] and registers it with an
//! [`ExecutionSystem`](crate::system::ExecutionSystem).  The execution system
//! then owns two tokio tasks per module:
//!
//! ```text
//!              wake (single slot)              inbound packets
//! coordinator ───────────────────► init task   ───────────────► loop task
//!                                  │ handle_exceptions()          │ handle_packet() × N
//!                                  │ init()                       │ cycle()
//!                                  └─► initialized = true         └─► loop_blocked = false
//!                                                                     sleep(policy.sleep)
//! ```
//!
//! Hooks never see the coordinator directly.  They talk to the rest of the
//! system through their [`ModuleContext`]; application and test code
//! observes a module through its [`ModuleHandle`].

pub(crate) mod runtime;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use crate::exception::{ExecutionException, SystemRef};
use crate::packet::Packet;
use crate::policy::ModulePolicy;
use crate::system::StopHandle;

use runtime::ModuleShared;

pub use runtime::{Phase, PhaseStatus};

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Stable routing identifier of a registered module (`moduleID` on the wire).
///
/// Assigned in registration order; `0` is always the execution system's own
/// module.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ModuleId(pub usize);

impl ModuleId {
    /// The execution system's own module.
    pub const SYSTEM: ModuleId = ModuleId(0);

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Back-reference to a registered module, carried by module exceptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleRef {
    id: ModuleId,
    name: Arc<str>,
}

impl ModuleRef {
    pub fn new(id: ModuleId, name: impl Into<Arc<str>>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for ModuleRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.name, self.id)
    }
}

// ── Module trait ──────────────────────────────────────────────────────────────

/// Application logic scheduled by the execution system.
///
/// Every hook has a no-op default.  Errors returned from a hook are caught at
/// the module boundary, counted against the module's consecutive-exception
/// threshold and forwarded to the execution system; they never reach the
/// coordinator as a panic or an unwinding error.
///
/// Hooks take `&self`: the init and loop tasks share the module, so module
/// state that changes at run time lives behind interior mutability.
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// Stable, human-readable module name (used for policy lookup and logs).
    fn name(&self) -> &str;

    /// Initialization routine.  Runs once per wake while the module is not
    /// initialized; success marks the module initialized.
    async fn init(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Runs right before every init attempt, typically to review
    /// [`ModuleContext::drain_exceptions`].
    async fn handle_exceptions(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called by the loop task for every packet routed to this module.
    async fn handle_packet(&self, _ctx: &ModuleContext, _packet: Packet) -> anyhow::Result<()> {
        Ok(())
    }

    /// Cyclic routine, called once per loop pass after inbound packets.
    async fn cycle(&self, _ctx: &ModuleContext) -> anyhow::Result<()> {
        Ok(())
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A queue endpoint was dropped (its consumer task or the system is gone).
#[derive(Debug, Clone, Error)]
#[error("{queue} queue of module {module} is closed")]
pub struct QueueClosed {
    pub queue: &'static str,
    pub module: ModuleRef,
}

// ── ModuleContext ─────────────────────────────────────────────────────────────

/// What a module's hooks can reach.
#[derive(Clone)]
pub struct ModuleContext {
    shared: Arc<ModuleShared>,
    outbound: UnboundedSender<Packet>,
    router: UnboundedSender<Packet>,
    exceptions: UnboundedSender<anyhow::Error>,
    stop: StopHandle,
    system: SystemRef,
}

impl ModuleContext {
    pub(crate) fn new(
        shared: Arc<ModuleShared>,
        outbound: UnboundedSender<Packet>,
        router: UnboundedSender<Packet>,
        exceptions: UnboundedSender<anyhow::Error>,
        stop: StopHandle,
        system: SystemRef,
    ) -> Self {
        Self {
            shared,
            outbound,
            router,
            exceptions,
            stop,
            system,
        }
    }

    pub fn id(&self) -> ModuleId {
        self.shared.module_ref.id()
    }

    pub fn name(&self) -> &str {
        self.shared.module_ref.name()
    }

    pub fn module_ref(&self) -> &ModuleRef {
        &self.shared.module_ref
    }

    pub fn system(&self) -> &SystemRef {
        &self.system
    }

    /// Current policy snapshot of this module.
    pub fn policy(&self) -> Arc<ModulePolicy> {
        self.shared.policy()
    }

    /// Queue `packet` for the outside world (written by the execution system
    /// on its next cycle).
    pub fn send(&self, packet: Packet) -> Result<(), QueueClosed> {
        self.outbound.send(packet).map_err(|_| QueueClosed {
            queue: "outbound",
            module: self.shared.module_ref.clone(),
        })
    }

    /// Queue `packet` on the global packet queue; it is delivered to the
    /// module named by its `module_id` on the next cycle.
    pub fn route(&self, packet: Packet) -> Result<(), QueueClosed> {
        self.router.send(packet).map_err(|_| QueueClosed {
            queue: "global packet",
            module: self.shared.module_ref.clone(),
        })
    }

    /// Report an exception without failing the current pass (no counter is
    /// touched).
    pub fn raise(&self, err: anyhow::Error) {
        let exc = ExecutionException::from_module_error(err, &self.shared.module_ref, &self.system);
        self.shared.push_exception(exc.clone());
        let _ = self.exceptions.send(anyhow::Error::new(exc));
    }

    /// Take every exception queued for this module, oldest first.
    pub fn drain_exceptions(&self) -> Vec<ExecutionException> {
        self.shared.drain_exceptions()
    }

    /// Pause (`false`) or resume (`true`) both phases of this module.
    pub fn set_should_execute(&self, value: bool) {
        self.shared.set_should_execute(value);
    }

    /// Force a re-initialization pass before the loop runs again.
    pub fn deinitialize(&self) {
        self.shared.set_initialized(false);
    }

    /// Ask the execution system to shut the whole application down.
    pub fn request_shutdown(&self) {
        self.stop.request();
    }

    pub(crate) fn shared(&self) -> &Arc<ModuleShared> {
        &self.shared
    }

    pub(crate) fn exception_queue(&self) -> &UnboundedSender<anyhow::Error> {
        &self.exceptions
    }
}

impl fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.shared.module_ref)
            .field("system", &self.system)
            .finish()
    }
}

// ── ModuleHandle ──────────────────────────────────────────────────────────────

/// Application-side view of a registered module.
#[derive(Clone)]
pub struct ModuleHandle {
    shared: Arc<ModuleShared>,
}

impl ModuleHandle {
    pub(crate) fn new(shared: Arc<ModuleShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> ModuleId {
        self.shared.module_ref.id()
    }

    pub fn name(&self) -> &str {
        self.shared.module_ref.name()
    }

    /// Enqueue `packet` on this module's inbound queue.
    pub fn push_packet(&self, packet: Packet) -> Result<(), QueueClosed> {
        self.shared.push_packet(packet)
    }

    pub fn is_initialized(&self) -> bool {
        self.shared.is_initialized()
    }

    pub fn should_execute(&self) -> bool {
        self.shared.should_execute()
    }

    pub fn set_should_execute(&self, value: bool) {
        self.shared.set_should_execute(value);
    }

    /// Force a re-initialization pass before the loop runs again.
    pub fn deinitialize(&self) {
        self.shared.set_initialized(false);
    }

    pub fn init_phase(&self) -> PhaseStatus {
        self.shared.phase(Phase::Init)
    }

    pub fn loop_phase(&self) -> PhaseStatus {
        self.shared.phase(Phase::Loop)
    }

    /// Current consecutive failure count of `phase`.
    pub fn failures(&self, phase: Phase) -> u32 {
        self.shared.failures(phase)
    }

    pub fn drain_exceptions(&self) -> Vec<ExecutionException> {
        self.shared.drain_exceptions()
    }

    pub fn policy(&self) -> Arc<ModulePolicy> {
        self.shared.policy()
    }

    /// Swap in a new policy snapshot; picked up on the next pass.
    pub fn replace_policy(&self, policy: ModulePolicy) {
        self.shared.replace_policy(policy);
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("module", &self.shared.module_ref)
            .field("initialized", &self.is_initialized())
            .field("init_phase", &self.init_phase())
            .field("loop_phase", &self.loop_phase())
            .finish()
    }
}
