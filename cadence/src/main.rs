/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use cadence::demo::{self, Example};
use cadence::exception::{ExecutionException, SystemException};
use cadence::packet::{JsonCodec, PacketCodec, StreamFramer};
use cadence::policy::PolicyManager;
use cadence::system::{
    Channel, ExecutionSystem, ExitReport, Ingress, PacketSink, StdioSink, StopHandle,
    SYSTEM_MODULE_NAME,
};

// ── CLI argument definition ───────────────────────────────────────────────────

/// Cadence module execution system.
///
/// Reads JSON packets on stdin, writes replies on stdout and exception
/// packets on stderr.
///
/// Example:
///   cadence --example 1 --policy policy.yaml --log-level debug
#[derive(Debug, Parser)]
#[command(
    name = "cadence",
    about = "Cadence module execution system",
    long_about = None,
)]
struct Cli {
    /// Example application to host (0 = heartbeat, 1 = faulty sensor).
    #[arg(short = 'e', long = "example", default_value_t = 0)]
    example: u16,

    /// Path to the YAML execution policy file.
    #[arg(short = 'c', long = "policy")]
    policy: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set.
    #[arg(short = 'l', long = "log-level", default_value = "info")]
    log_level: String,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the preamble and packets only.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level)),
        )
        .init();

    println!("{}", demo::title(cli.example));

    info!(
        example = cli.example,
        policy  = ?cli.policy,
        "Cadence starting up..."
    );

    let code = match run(&cli).await {
        Ok(report) => {
            info!(
                cycles    = report.cycles,
                reason    = ?report.reason,
                unhandled = report.unhandled_exceptions,
                forced    = report.forced,
                "Cadence stopped"
            );
            if report.is_clean() {
                0
            } else {
                1
            }
        }
        Err(e) => {
            application_exception(e);
            1
        }
    };

    // The stdin reader may still sit in a blocking read.
    process::exit(code);
}

async fn run(cli: &Cli) -> Result<ExitReport> {
    let example = Example::from_number(cli.example)
        .ok_or_else(|| anyhow!("unknown example {:04}", cli.example))?;

    // ── Load execution policy ─────────────────────────────────────────────────
    let mut policies = PolicyManager::new();
    match &cli.policy {
        Some(path) => policies.load_from_file(path)?,
        None => warn!("No policy file provided, using default execution policy"),
    }

    // ── Build the execution system ────────────────────────────────────────────
    let sink = Arc::new(StdioSink::new(JsonCodec::new()));
    let mut system = ExecutionSystem::new(policies.system().clone(), sink);
    system
        .system_module()
        .replace_policy(policies.module_policy(SYSTEM_MODULE_NAME));
    demo::install(&mut system, example, &policies)?;

    tokio::spawn(read_stdin(system.ingress(), JsonCodec::new()));
    tokio::spawn(stop_on_signal(system.stop_handle()));

    Ok(system.execute().await)
}

/// Frame stdin into packets and queue them until EOF.
async fn read_stdin<C: PacketCodec>(ingress: Ingress, codec: C) {
    let mut stdin = tokio::io::stdin();
    let mut framer = StreamFramer::new(codec.delimiters());
    let mut chunk = [0u8; 4096];

    loop {
        let n = match stdin.read(&mut chunk).await {
            Ok(0) => {
                debug!("stdin closed");
                return;
            }
            Ok(n) => n,
            Err(e) => {
                warn!(error = %e, "stdin read failed");
                return;
            }
        };
        for frame in framer.push(&chunk[..n]) {
            let packet = codec.decode_frame(&frame);
            debug!(%packet, "packet received on stdin");
            if ingress.push_packet(packet).is_err() {
                return;
            }
        }
    }
}

async fn stop_on_signal(stop: StopHandle) {
    match wait_for_shutdown_signal().await {
        Ok(()) => {
            info!("shutdown signal received");
            stop.request();
        }
        Err(e) => warn!(error = %e, "cannot listen for shutdown signals"),
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        r = tokio::signal::ctrl_c() => r?,
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Last-resort handler: nothing to link the failure to, so it is written
/// straight to stderr as an Exception packet.
fn application_exception(err: anyhow::Error) {
    let exc = SystemException::application(err);
    error!("{}", exc.detail());
    let packet = ExecutionException::from(exc).to_packet();
    if let Err(e) = StdioSink::new(JsonCodec::new()).emit(Channel::Error, &packet) {
        eprintln!("{packet}: {e}");
    }
}
