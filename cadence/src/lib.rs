/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Cadence – module execution system
//!
//! A single coordinator drives registered modules through init and loop
//! phases, routes typed packets between them and the outside world, and
//! escalates repeated failures from module scope to system scope.
//!
//! ```text
//! lib.rs
//! ├── packet/      – packet model, codec trait + JSON codec, stream framing
//! ├── command.rs   – command/response pairs with a monotone lifecycle
//! ├── exception.rs – system / module exception taxonomy
//! ├── policy.rs    – execution policies and their YAML loader
//! ├── module/      – Module trait, context/handle, init + loop tasks
//! ├── system/      – the coordinator, built-in system module, sinks, ingress
//! ├── demo.rs      – example modules hosted by the `cadence` binary
//! └── harness.rs   – drives a `cadence` process through a packet conversation
//! ```

pub mod command;
pub mod demo;
pub mod exception;
pub mod harness;
pub mod module;
pub mod packet;
pub mod policy;
pub mod system;

pub use command::CommandResponse;
pub use exception::{ExceptionKind, ExecutionException, ModuleException, SystemException};
pub use module::{Module, ModuleContext, ModuleHandle, ModuleId};
pub use packet::{JsonCodec, Packet, PacketCodec};
pub use policy::{ModulePolicy, PolicyManager, SystemPolicy};
pub use system::{CycleOutcome, ExecutionSystem, ExitReport, StopHandle};
