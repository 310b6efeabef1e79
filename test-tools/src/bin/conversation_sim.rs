/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! conversation-sim: replay a scripted packet conversation against cadence.
//!
//! Launches the given `cadence` binary, checks its preamble, plays every
//! step of the script, then sends `Exit(true)` and waits for the process
//! to terminate.
//!
//! # Usage
//! ```text
//! conversation-sim --bin target/debug/cadence --script conversation.yaml
//! conversation-sim --bin target/debug/cadence --example 1 --settle-ms 250
//! ```
//!
//! # Script format
//! ```yaml
//! steps:
//!   - command:  { type: status }
//!     expected: { type: status, version: "0.1.0" }
//!   - command:  { type: status, moduleId: 1 }
//!     expected: { type: status, version: "0.1.0" }
//! ```
//! Without `--script` a single Status step expecting this tool's version is
//! played.

use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Deserialize;
use tracing::{error, info};

use cadence::harness::{
    ConversationProcess, HarnessConfig, DEFAULT_GRACE_MS, DEFAULT_SETTLE_MS, DEFAULT_TIMEOUT_MS,
};
use cadence::{CommandResponse, ModuleId, Packet};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "conversation-sim", about = "Replay a packet conversation against cadence")]
struct Args {
    /// Path to the cadence binary under test
    #[arg(long)]
    bin: PathBuf,

    /// YAML conversation script
    #[arg(long)]
    script: Option<PathBuf>,

    /// Example application the binary should host
    #[arg(long, default_value_t = 0)]
    example: u16,

    /// Delay between a command and reading its response (ms)
    #[arg(long, default_value_t = DEFAULT_SETTLE_MS)]
    settle_ms: u64,

    /// Time the process gets to exit after the Exit exchange (ms)
    #[arg(long, default_value_t = DEFAULT_GRACE_MS)]
    grace_ms: u64,

    /// Ceiling on the whole conversation (ms)
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS)]
    timeout_ms: u64,

    /// Keep the child's own logging instead of silencing it
    #[arg(long)]
    child_logs: bool,
}

// ── Script ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct Script {
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Step {
    command: ScriptPacket,
    expected: ScriptPacket,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ScriptPacket {
    Status {
        #[serde(default)]
        version: String,
        #[serde(default, rename = "moduleId")]
        module_id: usize,
    },
    Exit {
        #[serde(default, rename = "willExit")]
        will_exit: bool,
        #[serde(default, rename = "moduleId")]
        module_id: usize,
    },
    Exception {
        #[serde(default)]
        message: String,
        #[serde(default, rename = "moduleId")]
        module_id: usize,
    },
}

impl From<ScriptPacket> for Packet {
    fn from(p: ScriptPacket) -> Self {
        match p {
            ScriptPacket::Status { version, module_id } => {
                Packet::status(version).with_module_id(ModuleId(module_id))
            }
            ScriptPacket::Exit { will_exit, module_id } => {
                Packet::exit(will_exit).with_module_id(ModuleId(module_id))
            }
            ScriptPacket::Exception { message, module_id } => {
                Packet::exception(message).with_module_id(ModuleId(module_id))
            }
        }
    }
}

fn load_script(path: &Path) -> Result<Vec<CommandResponse>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Cannot open script: {}", path.display()))?;
    let script: Script = serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse script: {}", path.display()))?;
    Ok(script
        .steps
        .into_iter()
        .map(|s| CommandResponse::new(s.command.into(), s.expected.into()))
        .collect())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    match run(Args::parse()).await {
        Ok(true) => info!("conversation PASSED"),
        Ok(false) => {
            error!("conversation FAILED");
            process::exit(1);
        }
        Err(e) => {
            error!("{e:#}");
            process::exit(2);
        }
    }
}

async fn run(args: Args) -> Result<bool> {
    let steps = match &args.script {
        Some(path) => load_script(path)?,
        None => vec![CommandResponse::new(
            Packet::status(""),
            Packet::status(env!("CARGO_PKG_VERSION")),
        )],
    };

    let mut config = HarnessConfig::new(&args.bin);
    config.example = args.example;
    config.settle = Duration::from_millis(args.settle_ms);
    config.grace = Duration::from_millis(args.grace_ms);
    config.timeout = Duration::from_millis(args.timeout_ms);
    if args.child_logs {
        config.env.clear();
    }

    info!(
        bin     = %args.bin.display(),
        example = args.example,
        steps   = steps.len(),
        "starting conversation"
    );

    let report = ConversationProcess::new(config).run(steps).await?;

    for (i, step) in report.steps.iter().enumerate() {
        let verdict = if step.response_matches() { "ok" } else { "MISMATCH" };
        println!("step {i}: {} -> expected {} : {verdict}", step.command(), step.expected());
        for packet in step.received() {
            println!("    received {packet}");
        }
    }
    println!(
        "exit: acknowledged={} status={}",
        report.exit_acknowledged, report.exit_status
    );

    Ok(report.passed())
}
