/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Execution policies and their YAML loader.
//!
//! Policies are immutable snapshots.  The coordinator and the module tasks
//! read the current snapshot once per cycle; replacing the whole snapshot is
//! the only way to reconfigure a running system.
//!
//! The expected YAML structure is (every field optional):
//! ```yaml
//! system:
//!   dequeueFailThreshold: 10
//!   maxCycleDurationMs: 10
//!   loopSleepMs: 100
//!   consecutiveExceptionThreshold: 10
//!   watchdogCycles: 10
//!   shutdownGraceMs: 1000
//!   logExceptions: true
//!   advertiseExceptions: true
//! modules:
//!   heartbeat:
//!     sleepMs: 250
//!     consecutiveExceptionThreshold: 3
//!     exceptionQueueCapacity: 64
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

// ── Defaults ──────────────────────────────────────────────────────────────────

pub const DEFAULT_DEQUEUE_FAIL_THRESHOLD: u32 = 10;
pub const DEFAULT_MAX_CYCLE_DURATION_MS: u64 = 10;
pub const DEFAULT_LOOP_SLEEP_MS: u64 = 100;
pub const DEFAULT_CONSECUTIVE_EXCEPTION_THRESHOLD: u32 = 10;
pub const DEFAULT_WATCHDOG_CYCLES: u32 = 10;
pub const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 1_000;
pub const DEFAULT_MODULE_SLEEP_MS: u64 = 100;
pub const DEFAULT_EXCEPTION_QUEUE_CAPACITY: usize = 64;

// ── System policy ─────────────────────────────────────────────────────────────

/// Execution policy of the coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SystemPolicy {
    /// Consecutive packet delivery failures tolerated within one drain.
    pub dequeue_fail_threshold: u32,
    /// Ceiling on the wall-clock time spent in ManageThreads + RoutePackets.
    /// The inter-cycle sleep is not part of the measurement.
    pub max_cycle_duration_ms: u64,
    /// Sleep between two coordinator cycles.
    pub loop_sleep_ms: u64,
    /// Consecutive faulted cycles tolerated before the system shuts down.
    pub consecutive_exception_threshold: u32,
    /// Coordinator cycles a module loop may stay blocked before it is
    /// declared stalled.
    pub watchdog_cycles: u32,
    /// How long module tasks get to stop cooperatively before being aborted.
    pub shutdown_grace_ms: u64,
    /// Emit a `tracing` event for every reviewed exception.
    pub log_exceptions: bool,
    /// Publish every reviewed exception as an Exception packet.
    pub advertise_exceptions: bool,
}

impl SystemPolicy {
    #[inline]
    pub fn loop_sleep(&self) -> Duration {
        Duration::from_millis(self.loop_sleep_ms)
    }

    #[inline]
    pub fn max_cycle_duration(&self) -> Duration {
        Duration::from_millis(self.max_cycle_duration_ms)
    }

    #[inline]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Default for SystemPolicy {
    fn default() -> Self {
        Self {
            dequeue_fail_threshold: DEFAULT_DEQUEUE_FAIL_THRESHOLD,
            max_cycle_duration_ms: DEFAULT_MAX_CYCLE_DURATION_MS,
            loop_sleep_ms: DEFAULT_LOOP_SLEEP_MS,
            consecutive_exception_threshold: DEFAULT_CONSECUTIVE_EXCEPTION_THRESHOLD,
            watchdog_cycles: DEFAULT_WATCHDOG_CYCLES,
            shutdown_grace_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            log_exceptions: false,
            advertise_exceptions: false,
        }
    }
}

// ── Module policy ─────────────────────────────────────────────────────────────

/// Execution policy of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ModulePolicy {
    /// Sleep between two passes of the module loop.
    pub sleep_ms: u64,
    /// Consecutive failures tolerated per phase (init and loop counted
    /// separately) before that phase terminates.
    pub consecutive_exception_threshold: u32,
    /// Exceptions kept on the module's own queue until its
    /// `handle_exceptions` hook drains them; the oldest are dropped first.
    pub exception_queue_capacity: usize,
}

impl ModulePolicy {
    #[inline]
    pub fn sleep(&self) -> Duration {
        Duration::from_millis(self.sleep_ms)
    }
}

impl Default for ModulePolicy {
    fn default() -> Self {
        Self {
            sleep_ms: DEFAULT_MODULE_SLEEP_MS,
            consecutive_exception_threshold: DEFAULT_CONSECUTIVE_EXCEPTION_THRESHOLD,
            exception_queue_capacity: DEFAULT_EXCEPTION_QUEUE_CAPACITY,
        }
    }
}

// ── Policy file ───────────────────────────────────────────────────────────────

/// Top-level wrapper that maps directly onto the YAML file layout.
#[derive(Debug, Default, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    system: SystemPolicy,
    #[serde(default)]
    modules: HashMap<String, ModulePolicy>,
}

/// Loads and serves execution policies.
///
/// Without a file every lookup answers the defaults.
#[derive(Debug, Default)]
pub struct PolicyManager {
    system: SystemPolicy,
    /// Per-module overrides keyed by module name.
    modules: HashMap<String, ModulePolicy>,
    loaded: bool,
}

impl PolicyManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses `path` and replaces every previously loaded policy.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or is not valid YAML for
    /// the policy layout.  On error the manager is left holding defaults.
    pub fn load_from_file(&mut self, path: &Path) -> Result<()> {
        info!("Loading execution policy from: {}", path.display());

        self.system = SystemPolicy::default();
        self.modules.clear();
        self.loaded = false;

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot open policy file: {}", path.display()))?;

        let file: PolicyFile = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse policy file: {}", path.display()))?;

        debug!(policy = ?file.system, "system policy");
        for (name, policy) in &file.modules {
            debug!(module = %name, ?policy, "module policy override");
        }

        self.system = file.system;
        self.modules = file.modules;
        self.loaded = true;

        info!(
            overrides = self.modules.len(),
            "Execution policy loaded"
        );
        Ok(())
    }

    pub fn system(&self) -> &SystemPolicy {
        &self.system
    }

    /// Policy for the module called `name`, or the module defaults.
    pub fn module_policy(&self, name: &str) -> ModulePolicy {
        self.modules.get(name).cloned().unwrap_or_default()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    /// Helper: write a YAML string to a temp file and return it.
    fn yaml_tempfile(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn defaults_match_documented_values() {
        let sys = SystemPolicy::default();
        assert_eq!(sys.dequeue_fail_threshold, 10);
        assert_eq!(sys.max_cycle_duration(), Duration::from_millis(10));
        assert_eq!(sys.loop_sleep(), Duration::from_millis(100));
        assert_eq!(sys.consecutive_exception_threshold, 10);
        assert!(!sys.log_exceptions);
        assert!(!sys.advertise_exceptions);

        let module = ModulePolicy::default();
        assert_eq!(module.sleep(), Duration::from_millis(100));
        assert_eq!(module.consecutive_exception_threshold, 10);
        assert_eq!(module.exception_queue_capacity, 64);
    }

    #[test]
    fn load_full_file() {
        let yaml = r#"
system:
  dequeueFailThreshold: 3
  maxCycleDurationMs: 25
  loopSleepMs: 5
  consecutiveExceptionThreshold: 4
  watchdogCycles: 7
  shutdownGraceMs: 200
  logExceptions: true
  advertiseExceptions: true
modules:
  heartbeat:
    sleepMs: 250
    consecutiveExceptionThreshold: 2
    exceptionQueueCapacity: 8
"#;
        let f = yaml_tempfile(yaml);
        let mut mgr = PolicyManager::new();
        mgr.load_from_file(f.path()).unwrap();

        assert!(mgr.is_loaded());
        let sys = mgr.system();
        assert_eq!(sys.dequeue_fail_threshold, 3);
        assert_eq!(sys.max_cycle_duration_ms, 25);
        assert_eq!(sys.loop_sleep_ms, 5);
        assert_eq!(sys.consecutive_exception_threshold, 4);
        assert_eq!(sys.watchdog_cycles, 7);
        assert_eq!(sys.shutdown_grace(), Duration::from_millis(200));
        assert!(sys.log_exceptions && sys.advertise_exceptions);

        let hb = mgr.module_policy("heartbeat");
        assert_eq!(hb.sleep_ms, 250);
        assert_eq!(hb.consecutive_exception_threshold, 2);
        assert_eq!(hb.exception_queue_capacity, 8);
    }

    #[test]
    fn partial_fields_keep_defaults() {
        let f = yaml_tempfile("system:\n  loopSleepMs: 20\nmodules:\n  m:\n    sleepMs: 5\n");
        let mut mgr = PolicyManager::new();
        mgr.load_from_file(f.path()).unwrap();

        assert_eq!(mgr.system().loop_sleep_ms, 20);
        assert_eq!(
            mgr.system().dequeue_fail_threshold,
            DEFAULT_DEQUEUE_FAIL_THRESHOLD
        );
        assert_eq!(mgr.module_policy("m").sleep_ms, 5);
        assert_eq!(
            mgr.module_policy("m").consecutive_exception_threshold,
            DEFAULT_CONSECUTIVE_EXCEPTION_THRESHOLD
        );
    }

    #[test]
    fn unknown_module_gets_defaults() {
        let mgr = PolicyManager::new();
        assert_eq!(mgr.module_policy("nobody"), ModulePolicy::default());
        assert!(!mgr.is_loaded());
    }

    #[test]
    fn missing_file_returns_error() {
        let mut mgr = PolicyManager::new();
        let result = mgr.load_from_file(Path::new("/nonexistent/path/policy.yaml"));
        assert!(result.is_err());
        assert!(!mgr.is_loaded());
    }

    #[test]
    fn malformed_yaml_returns_error() {
        let f = yaml_tempfile("system:\n  loopSleepMs: [not, a, number]\n");
        let mut mgr = PolicyManager::new();
        assert!(mgr.load_from_file(f.path()).is_err());
        assert!(!mgr.is_loaded());
        assert_eq!(mgr.system(), &SystemPolicy::default());
    }

    #[test]
    fn reload_replaces_previous_overrides() {
        let f1 = yaml_tempfile("modules:\n  a:\n    sleepMs: 1\n");
        let f2 = yaml_tempfile("modules:\n  b:\n    sleepMs: 2\n");

        let mut mgr = PolicyManager::new();
        mgr.load_from_file(f1.path()).unwrap();
        assert_eq!(mgr.module_policy("a").sleep_ms, 1);

        mgr.load_from_file(f2.path()).unwrap();
        assert_eq!(mgr.module_policy("a"), ModulePolicy::default(), "old override must be gone");
        assert_eq!(mgr.module_policy("b").sleep_ms, 2);
    }
}
