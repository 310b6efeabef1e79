/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Example applications hosted by the `cadence` binary (`--example N`).
//!
//! | N | Modules |
//! |---|---|
//! | 0 | [`Heartbeat`] |
//! | 1 | [`FaultySensor`] + [`ExceptionRelay`] as exception advertiser |

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use tracing::{debug, info};

use crate::module::{Module, ModuleContext};
use crate::packet::Packet;
use crate::policy::PolicyManager;
use crate::system::{ExecutionSystem, VERSION};

/// Preamble the binary prints on stdout before anything else, followed by
/// the zero-padded example number.
pub const TITLE: &str = "Cadence - Example ";

// ── Example selection ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Example {
    Heartbeat,
    FaultySensor,
}

impl Example {
    pub fn from_number(number: u16) -> Option<Self> {
        match number {
            0 => Some(Example::Heartbeat),
            1 => Some(Example::FaultySensor),
            _ => None,
        }
    }

    pub fn number(self) -> u16 {
        match self {
            Example::Heartbeat => 0,
            Example::FaultySensor => 1,
        }
    }

}

/// Preamble line for example `number`, e.g. `Cadence - Example 0000`.  The
/// binary prints it even for numbers that name no example.
pub fn title(number: u16) -> String {
    format!("{TITLE}{number:04}")
}

impl fmt::Display for Example {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Example::Heartbeat => "heartbeat",
            Example::FaultySensor => "faulty-sensor",
        })
    }
}

/// Register the modules of `example` on `system`, each with its policy
/// override from `policies`.
pub fn install(system: &mut ExecutionSystem, example: Example, policies: &PolicyManager) -> Result<()> {
    info!(%example, "installing example modules");
    match example {
        Example::Heartbeat => {
            let heartbeat = Heartbeat::default();
            let policy = policies.module_policy(heartbeat.name());
            system.register_with_policy(Arc::new(heartbeat), policy)?;
        }
        Example::FaultySensor => {
            let relay = ExceptionRelay;
            let policy = policies.module_policy(relay.name());
            let relay = system.register_with_policy(Arc::new(relay), policy)?;
            system.set_advertiser(relay.id())?;

            let sensor = FaultySensor::new(2, 5);
            let policy = policies.module_policy(sensor.name());
            system.register_with_policy(Arc::new(sensor), policy)?;
        }
    }
    Ok(())
}

// ── Heartbeat ─────────────────────────────────────────────────────────────────

/// Counts its loop passes and answers Status packets addressed to it.
#[derive(Debug, Default)]
pub struct Heartbeat {
    beats: AtomicU64,
}

impl Heartbeat {
    const LOG_EVERY: u64 = 50;

    pub fn beats(&self) -> u64 {
        self.beats.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Module for Heartbeat {
    fn name(&self) -> &str {
        "heartbeat"
    }

    async fn init(&self, ctx: &ModuleContext) -> Result<()> {
        debug!(module = %ctx.module_ref(), "heartbeat armed");
        Ok(())
    }

    async fn handle_packet(&self, ctx: &ModuleContext, packet: Packet) -> Result<()> {
        if let Packet::Status(_) = packet {
            ctx.send(Packet::status(VERSION).with_module_id(ctx.id()))?;
        }
        Ok(())
    }

    async fn cycle(&self, ctx: &ModuleContext) -> Result<()> {
        let beats = self.beats.fetch_add(1, Ordering::Relaxed) + 1;
        if beats % Self::LOG_EVERY == 0 {
            info!(module = %ctx.module_ref(), beats, "heartbeat");
        }
        Ok(())
    }
}

// ── Faulty sensor ─────────────────────────────────────────────────────────────

/// Fails its first `failing_inits` init attempts and every `fail_every`-th
/// loop pass after that.
#[derive(Debug)]
pub struct FaultySensor {
    failing_inits: u32,
    fail_every: u32,
    init_attempts: AtomicU32,
    passes: AtomicU32,
}

impl FaultySensor {
    pub fn new(failing_inits: u32, fail_every: u32) -> Self {
        Self {
            failing_inits,
            fail_every,
            init_attempts: AtomicU32::new(0),
            passes: AtomicU32::new(0),
        }
    }

    pub fn init_attempts(&self) -> u32 {
        self.init_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Module for FaultySensor {
    fn name(&self) -> &str {
        "faulty-sensor"
    }

    async fn handle_exceptions(&self, ctx: &ModuleContext) -> Result<()> {
        for exc in ctx.drain_exceptions() {
            debug!(module = %ctx.module_ref(), kind = exc.kind().as_label(), "reviewing own exception");
        }
        Ok(())
    }

    async fn init(&self, _ctx: &ModuleContext) -> Result<()> {
        let attempt = self.init_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failing_inits {
            bail!("sensor not ready (attempt {attempt})");
        }
        Ok(())
    }

    async fn cycle(&self, _ctx: &ModuleContext) -> Result<()> {
        let pass = self.passes.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_every > 0 && pass % self.fail_every == 0 {
            bail!("reading out of range on pass {pass}");
        }
        Ok(())
    }
}

// ── Exception relay ───────────────────────────────────────────────────────────

/// Advertiser module: forwards every Exception packet it receives to the
/// Output channel.
#[derive(Debug, Default)]
pub struct ExceptionRelay;

#[async_trait]
impl Module for ExceptionRelay {
    fn name(&self) -> &str {
        "exception-relay"
    }

    async fn handle_packet(&self, ctx: &ModuleContext, packet: Packet) -> Result<()> {
        match packet {
            Packet::Exception(_) => ctx.send(packet)?,
            other => debug!(packet = %other, "relay ignores non-exception packet"),
        }
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::module::ModuleId;
    use crate::policy::{ModulePolicy, SystemPolicy};
    use crate::system::{Channel, MemorySink};

    fn fast_system(advertise: bool) -> (ExecutionSystem, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let policy = SystemPolicy {
            loop_sleep_ms: 5,
            max_cycle_duration_ms: 1_000,
            advertise_exceptions: advertise,
            ..SystemPolicy::default()
        };
        let system = ExecutionSystem::new(policy, sink.clone());
        system.system_module().replace_policy(ModulePolicy {
            sleep_ms: 1,
            ..ModulePolicy::default()
        });
        (system, sink)
    }

    #[test]
    fn example_numbers_round_trip() {
        assert_eq!(Example::from_number(0), Some(Example::Heartbeat));
        assert_eq!(Example::from_number(1), Some(Example::FaultySensor));
        assert_eq!(Example::from_number(7), None);
        assert_eq!(title(Example::FaultySensor.number()), "Cadence - Example 0001");
        assert_eq!(title(42), "Cadence - Example 0042");
    }

    #[tokio::test]
    async fn install_registers_example_modules() {
        let (mut system, _sink) = fast_system(false);
        install(&mut system, Example::FaultySensor, &PolicyManager::new()).unwrap();
        assert_eq!(system.module_count(), 3);

        let (mut system, _sink) = fast_system(false);
        install(&mut system, Example::Heartbeat, &PolicyManager::new()).unwrap();
        assert_eq!(system.module_count(), 2);
    }

    #[tokio::test]
    async fn heartbeat_answers_status_from_its_own_id() {
        let (mut system, sink) = fast_system(false);
        let handle = system
            .register_with_policy(
                Arc::new(Heartbeat::default()),
                ModulePolicy {
                    sleep_ms: 1,
                    ..ModulePolicy::default()
                },
            )
            .unwrap();
        system
            .ingress()
            .push_packet(Packet::status("").with_module_id(handle.id()))
            .unwrap();

        for _ in 0..50 {
            system.step();
            tokio::time::sleep(Duration::from_millis(10)).await;
            if !sink.packets(Channel::Output).is_empty() {
                break;
            }
        }
        let out = sink.packets(Channel::Output);
        assert_eq!(out.len(), 1);
        assert!(out[0].matches(&Packet::status(VERSION)));
        assert_eq!(out[0].module_id(), ModuleId(1));
    }

    #[tokio::test]
    async fn faulty_sensor_recovers_and_its_exceptions_are_relayed() {
        let (mut system, sink) = fast_system(true);
        let relay = system
            .register_with_policy(
                Arc::new(ExceptionRelay),
                ModulePolicy {
                    sleep_ms: 1,
                    ..ModulePolicy::default()
                },
            )
            .unwrap();
        system.set_advertiser(relay.id()).unwrap();

        let sensor = Arc::new(FaultySensor::new(2, 0));
        let handle = system
            .register_with_policy(
                sensor.clone(),
                ModulePolicy {
                    sleep_ms: 1,
                    consecutive_exception_threshold: 5,
                    ..ModulePolicy::default()
                },
            )
            .unwrap();

        for _ in 0..100 {
            system.step();
            tokio::time::sleep(Duration::from_millis(10)).await;
            if handle.is_initialized() && sink.packets(Channel::Output).len() >= 2 {
                break;
            }
        }

        assert!(handle.is_initialized());
        assert_eq!(sensor.init_attempts(), 3);
        let relayed = sink.packets(Channel::Output);
        assert_eq!(relayed.len(), 2, "{relayed:?}");
        assert!(relayed.iter().all(|p| matches!(p, Packet::Exception(e) if e.message.contains("sensor not ready"))));
        assert!(sink.packets(Channel::Error).is_empty());
    }
}
