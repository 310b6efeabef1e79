/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Exception taxonomy of the execution system.
//!
//! Two scopes model the two failure layers:
//!
//! * [`SystemException`]: scoped to the execution system (coordinator
//!   cycle, policy violations, anything that could not be attributed to a
//!   module).  May wrap an arbitrary inner cause.
//! * [`ModuleException`]: scoped to one module.  Extends a
//!   `SystemException` with a back-reference to the originating module.
//!
//! [`ExecutionException`] is the closed sum of both and is what travels
//! through the exception queues.  Raw errors are never queued as-is: they are
//! wrapped by [`ExecutionException::from_module_error`] or
//! [`ExecutionException::from_raw`] with the original error kept as the
//! [`source`](std::error::Error::source).
//!
//! Records are values once built.  The only post-construction mutation is
//! the [`ReviewFlags`] set by the coordinator while it handles them.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::module::{ModuleId, ModuleRef};
use crate::packet::Packet;

/// Shared inner cause.  `Arc` so that exception records stay cloneable: a
/// module exception is queued both locally and globally.
pub type Cause = Arc<dyn StdError + Send + Sync + 'static>;

// ── Kind ──────────────────────────────────────────────────────────────────────

/// Classification of a system-scoped exception.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionKind {
    /// A module hook or coordinator phase returned an error.
    Caught,
    /// Something reached the global queue without being normalized first.
    Uncaught,
    /// ManageThreads + RoutePackets took longer than the configured maximum.
    DurationExceeded,
    /// The coordinator hit its consecutive-exception ceiling.
    ConsecutiveExceptions,
    /// A module loop did not clear its blocked flag within the watchdog limit.
    LoopStalled,
    /// Too many consecutive packet delivery failures in one drain.
    DequeueFailures,
    /// A packet named a module that cannot receive it.
    UndeliverablePacket,
    /// A module phase hit its consecutive-exception ceiling and stopped.
    PhaseTerminated,
    /// Raised before any execution system existed.
    Application,
    /// Anything else.
    Other,
}

impl ExceptionKind {
    /// Fatal kinds start the shutdown sequence when they reach the
    /// coordinator's outer cycle.
    pub fn is_fatal(self) -> bool {
        matches!(
            self,
            ExceptionKind::ConsecutiveExceptions
                | ExceptionKind::LoopStalled
                | ExceptionKind::DequeueFailures
        )
    }

    /// Short stable label (snake_case) for use in logs.
    pub fn as_label(self) -> &'static str {
        match self {
            ExceptionKind::Caught => "caught",
            ExceptionKind::Uncaught => "uncaught",
            ExceptionKind::DurationExceeded => "duration_exceeded",
            ExceptionKind::ConsecutiveExceptions => "consecutive_exceptions",
            ExceptionKind::LoopStalled => "loop_stalled",
            ExceptionKind::DequeueFailures => "dequeue_failures",
            ExceptionKind::UndeliverablePacket => "undeliverable_packet",
            ExceptionKind::PhaseTerminated => "phase_terminated",
            ExceptionKind::Application => "application",
            ExceptionKind::Other => "other",
        }
    }
}

// ── Back-reference to the execution system ────────────────────────────────────

/// Identifies the execution system an exception belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SystemRef(Arc<str>);

impl SystemRef {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SystemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Review flags ──────────────────────────────────────────────────────────────

/// Progress of the coordinator through one exception.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReviewFlags {
    pub acknowledged: bool,
    pub logged: bool,
    pub advertised: bool,
}

// ── SystemException ───────────────────────────────────────────────────────────

/// Exception scoped to the execution system.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct SystemException {
    kind: ExceptionKind,
    message: String,
    system: Option<SystemRef>,
    #[source]
    cause: Option<Cause>,
    flags: ReviewFlags,
}

impl SystemException {
    pub fn new(kind: ExceptionKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            system: None,
            cause: None,
            flags: ReviewFlags::default(),
        }
    }

    pub fn with_system(mut self, system: SystemRef) -> Self {
        self.system = Some(system);
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        self.cause = Some(Arc::from(cause.into()));
        self
    }

    /// Process-level fallback record: raised when the execution system could
    /// not even be constructed, so there is nothing to link back to.
    pub fn application(cause: anyhow::Error) -> Self {
        Self::new(
            ExceptionKind::Application,
            "Application - caught an exception - see inner",
        )
        .with_cause(cause)
    }

    pub fn kind(&self) -> ExceptionKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn system(&self) -> Option<&SystemRef> {
        self.system.as_ref()
    }

    pub fn cause(&self) -> Option<&Cause> {
        self.cause.as_ref()
    }

    pub fn flags(&self) -> ReviewFlags {
        self.flags
    }

    pub fn is_fatal(&self) -> bool {
        self.kind.is_fatal()
    }

    /// Message followed by the whole cause chain, `": "`-separated.
    pub fn detail(&self) -> String {
        let mut out = self.message.clone();
        let mut next: Option<&(dyn StdError + 'static)> =
            self.cause.as_ref().map(|c| c.as_ref() as &(dyn StdError + 'static));
        while let Some(err) = next {
            out.push_str(": ");
            out.push_str(&err.to_string());
            next = err.source();
        }
        out
    }
}

// ── ModuleException ───────────────────────────────────────────────────────────

/// Exception scoped to one module.
#[derive(Debug, Clone)]
pub struct ModuleException {
    module: ModuleRef,
    base: SystemException,
}

impl ModuleException {
    pub fn new(module: ModuleRef, message: impl Into<String>) -> Self {
        Self {
            module,
            base: SystemException::new(ExceptionKind::Caught, message),
        }
    }

    pub fn with_system(mut self, system: SystemRef) -> Self {
        self.base = self.base.with_system(system);
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        self.base = self.base.with_cause(cause);
        self
    }

    pub fn module(&self) -> &ModuleRef {
        &self.module
    }

    /// The system-scoped part of this exception.
    pub fn as_system(&self) -> &SystemException {
        &self.base
    }
}

impl fmt::Display for ModuleException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "module {}: {}", self.module, self.base.message)
    }
}

impl StdError for ModuleException {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.base.source()
    }
}

// ── ExecutionException ────────────────────────────────────────────────────────

/// Any exception handled by the execution system.
#[derive(Debug, Clone, Error)]
pub enum ExecutionException {
    #[error(transparent)]
    Module(ModuleException),
    #[error(transparent)]
    System(SystemException),
}

impl ExecutionException {
    /// Normalize an error returned by a module hook.
    ///
    /// Errors that already belong to the taxonomy keep their type; anything
    /// else becomes a [`ModuleException`] wrapping the original error.
    pub fn from_module_error(err: anyhow::Error, module: &ModuleRef, system: &SystemRef) -> Self {
        match Self::downcast(err) {
            Ok(known) => known,
            Err(raw) => ExecutionException::Module(
                ModuleException::new(module.clone(), "Module - caught an exception - see inner")
                    .with_system(system.clone())
                    .with_cause(raw),
            ),
        }
    }

    /// Normalize an error that reached the coordinator without a module
    /// attribution.  Unknown types become an [`ExceptionKind::Uncaught`]
    /// system exception wrapping the original error.
    pub fn from_raw(err: anyhow::Error, system: &SystemRef) -> Self {
        match Self::downcast(err) {
            Ok(known) => known,
            Err(raw) => ExecutionException::System(
                SystemException::new(
                    ExceptionKind::Uncaught,
                    "Execution System - failed to catch an exception - see inner",
                )
                .with_system(system.clone())
                .with_cause(raw),
            ),
        }
    }

    fn downcast(err: anyhow::Error) -> Result<Self, anyhow::Error> {
        let err = match err.downcast::<ExecutionException>() {
            Ok(e) => return Ok(e),
            Err(err) => err,
        };
        let err = match err.downcast::<ModuleException>() {
            Ok(e) => return Ok(ExecutionException::Module(e)),
            Err(err) => err,
        };
        match err.downcast::<SystemException>() {
            Ok(e) => Ok(ExecutionException::System(e)),
            Err(err) => Err(err),
        }
    }

    fn base(&self) -> &SystemException {
        match self {
            ExecutionException::Module(e) => &e.base,
            ExecutionException::System(e) => e,
        }
    }

    fn base_mut(&mut self) -> &mut SystemException {
        match self {
            ExecutionException::Module(e) => &mut e.base,
            ExecutionException::System(e) => e,
        }
    }

    pub fn kind(&self) -> ExceptionKind {
        self.base().kind
    }

    pub fn message(&self) -> &str {
        &self.base().message
    }

    pub fn is_fatal(&self) -> bool {
        self.base().is_fatal()
    }

    /// Originating module, for module-scoped exceptions.
    pub fn module(&self) -> Option<&ModuleRef> {
        match self {
            ExecutionException::Module(e) => Some(&e.module),
            ExecutionException::System(_) => None,
        }
    }

    pub fn flags(&self) -> ReviewFlags {
        self.base().flags
    }

    pub fn acknowledge(&mut self) {
        self.base_mut().flags.acknowledged = true;
    }

    pub fn mark_logged(&mut self) {
        self.base_mut().flags.logged = true;
    }

    pub fn mark_advertised(&mut self) {
        self.base_mut().flags.advertised = true;
    }

    /// Human-readable text including the module and the cause chain.
    pub fn detail(&self) -> String {
        match self {
            ExecutionException::Module(e) => format!("module {}: {}", e.module, e.base.detail()),
            ExecutionException::System(e) => e.detail(),
        }
    }

    /// Render as an Exception packet addressed to the originating module
    /// (the system module for system-scoped exceptions).
    pub fn to_packet(&self) -> Packet {
        let module_id = self.module().map(|m| m.id()).unwrap_or(ModuleId::SYSTEM);
        Packet::exception(self.detail()).with_module_id(module_id)
    }
}

impl From<SystemException> for ExecutionException {
    fn from(e: SystemException) -> Self {
        ExecutionException::System(e)
    }
}

impl From<ModuleException> for ExecutionException {
    fn from(e: ModuleException) -> Self {
        ExecutionException::Module(e)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    fn module_ref() -> ModuleRef {
        ModuleRef::new(ModuleId(4), "sensor")
    }

    fn system_ref() -> SystemRef {
        SystemRef::new("test-system")
    }

    #[test]
    fn raw_module_error_is_wrapped_with_cause() {
        let err = anyhow!("sensor offline");
        let exc = ExecutionException::from_module_error(err, &module_ref(), &system_ref());

        let ExecutionException::Module(m) = &exc else {
            panic!("expected module exception, got {exc:?}");
        };
        assert_eq!(m.module().id(), ModuleId(4));
        assert_eq!(m.as_system().system(), Some(&system_ref()));
        assert_eq!(exc.kind(), ExceptionKind::Caught);
        let source = StdError::source(&exc).expect("inner cause kept");
        assert_eq!(source.to_string(), "sensor offline");
        assert!(exc.to_packet().matches(&Packet::exception(
            "module sensor#4: Module - caught an exception - see inner: sensor offline"
        )));
    }

    #[test]
    fn typed_errors_keep_their_scope() {
        let sys = SystemException::new(ExceptionKind::LoopStalled, "stalled");
        let exc = ExecutionException::from_module_error(
            anyhow::Error::new(sys),
            &module_ref(),
            &system_ref(),
        );
        assert!(matches!(exc, ExecutionException::System(_)));
        assert!(exc.is_fatal());

        let m = ModuleException::new(module_ref(), "custom");
        let exc = ExecutionException::from_raw(anyhow::Error::new(m), &system_ref());
        assert_eq!(exc.module().map(|m| m.name()), Some("sensor"));

        let wrapped = ExecutionException::from(SystemException::new(ExceptionKind::Other, "x"));
        let exc = ExecutionException::from_raw(anyhow::Error::new(wrapped), &system_ref());
        assert_eq!(exc.kind(), ExceptionKind::Other);
    }

    #[test]
    fn unknown_raw_error_becomes_uncaught() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let exc = ExecutionException::from_raw(anyhow::Error::new(io), &system_ref());
        assert_eq!(exc.kind(), ExceptionKind::Uncaught);
        assert!(exc.module().is_none());
        assert!(exc.to_packet().matches(&Packet::exception(
            "Execution System - failed to catch an exception - see inner: pipe closed"
        )));
    }

    #[test]
    fn only_escalating_kinds_are_fatal() {
        assert!(ExceptionKind::ConsecutiveExceptions.is_fatal());
        assert!(ExceptionKind::LoopStalled.is_fatal());
        assert!(ExceptionKind::DequeueFailures.is_fatal());
        assert!(!ExceptionKind::DurationExceeded.is_fatal());
        assert!(!ExceptionKind::PhaseTerminated.is_fatal());
        assert!(!ExceptionKind::Caught.is_fatal());
    }

    #[test]
    fn review_flags_start_clear_and_stick() {
        let mut exc = ExecutionException::from(ModuleException::new(module_ref(), "m"));
        assert_eq!(exc.flags(), ReviewFlags::default());
        exc.acknowledge();
        exc.mark_logged();
        assert!(exc.flags().acknowledged && exc.flags().logged);
        assert!(!exc.flags().advertised);
        exc.mark_advertised();
        assert!(exc.flags().advertised);
    }

    #[test]
    fn packets_are_addressed_to_the_source() {
        let exc = ExecutionException::from(ModuleException::new(module_ref(), "bad reading"));
        let packet = exc.to_packet();
        assert_eq!(packet.module_id(), ModuleId(4));
        assert!(packet.matches(&Packet::exception("module sensor#4: bad reading")));
    }

    #[test]
    fn application_exception_has_no_system_link() {
        let exc = SystemException::application(anyhow!("bad policy file"));
        assert!(exc.system().is_none());
        assert_eq!(exc.kind(), ExceptionKind::Application);
        assert_eq!(
            exc.detail(),
            "Application - caught an exception - see inner: bad policy file"
        );
    }
}
