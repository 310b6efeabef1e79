/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Process-level conversation harness.
//!
//! [`ConversationProcess`] launches a `cadence` binary with piped stdio and
//! plays a list of [`CommandResponse`] pairs against it:
//!
//! ```text
//! spawn ─► read preamble ─► for each pair:                 ─► Exit(true) ─► wait for exit
//!                             write command  (packed, sent)     close stdin     (grace period,
//!                             settle                            expect Exit     else kill)
//!                             read stderr + stdout (received)
//!                             parse frames  (parsed)
//! ```
//!
//! A step passes when any packet read back matches its expected response.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

use crate::command::CommandResponse;
use crate::demo;
use crate::packet::{read_available, CodecError, JsonCodec, Packet, PacketCodec};

pub const DEFAULT_SETTLE_MS: u64 = 500;
pub const DEFAULT_READ_IDLE_MS: u64 = 50;
pub const DEFAULT_GRACE_MS: u64 = 3_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 30_000;

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("failed to start {program}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("standard {0} of the test process is not captured")]
    StdioUnavailable(&'static str),

    #[error("preamble does not match '{expected}': {received:?}")]
    Preamble { expected: String, received: String },

    #[error("failed to encode command")]
    Codec(#[from] CodecError),

    #[error("i/o with the test process failed")]
    Io(#[from] std::io::Error),

    #[error("no exit response received")]
    NoExitResponse,

    #[error("test process did not exit within {0:?}")]
    DidNotExit(Duration),

    #[error("test timed out after {0:?}")]
    TimedOut(Duration),
}

// ── Configuration ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub program: PathBuf,
    pub example: u16,
    /// Delay between writing a command and reading the response.
    pub settle: Duration,
    /// A read that stays silent this long ends a response.
    pub read_idle: Duration,
    /// How long the process gets to exit after the Exit exchange.
    pub grace: Duration,
    /// Ceiling on the whole conversation.
    pub timeout: Duration,
    /// Extra environment for the child.  Logging is off by default so that
    /// stderr only carries packets.
    pub env: Vec<(String, String)>,
}

impl HarnessConfig {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            example: 0,
            settle: Duration::from_millis(DEFAULT_SETTLE_MS),
            read_idle: Duration::from_millis(DEFAULT_READ_IDLE_MS),
            grace: Duration::from_millis(DEFAULT_GRACE_MS),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            env: vec![("RUST_LOG".to_string(), "off".to_string())],
        }
    }

    /// Preamble the child must print, e.g. `Cadence - Example 0000`.
    pub fn expected_preamble(&self) -> String {
        demo::title(self.example)
    }
}

// ── Reports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConversationReport {
    pub preamble: String,
    /// Pairs in the order they were played, with their final flags.
    pub steps: Vec<CommandResponse>,
    pub exit_acknowledged: bool,
    pub exit_status: ExitStatus,
}

impl ConversationReport {
    /// Every step matched, the Exit was acknowledged and the process exited
    /// successfully.
    pub fn passed(&self) -> bool {
        self.steps.iter().all(CommandResponse::response_matches)
            && self.exit_acknowledged
            && self.exit_status.success()
    }
}

// ── ConversationProcess ───────────────────────────────────────────────────────

pub struct ConversationProcess<C = JsonCodec> {
    config: HarnessConfig,
    codec: C,
}

impl ConversationProcess<JsonCodec> {
    pub fn new(config: HarnessConfig) -> Self {
        Self::with_codec(config, JsonCodec::new())
    }
}

impl<C: PacketCodec> ConversationProcess<C> {
    pub fn with_codec(config: HarnessConfig, codec: C) -> Self {
        Self { config, codec }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Play `conversation` against a fresh child process.
    pub async fn run(
        &self,
        conversation: Vec<CommandResponse>,
    ) -> Result<ConversationReport, HarnessError> {
        let limit = self.config.timeout;
        tokio::time::timeout(limit, self.converse(conversation))
            .await
            .map_err(|_| HarnessError::TimedOut(limit))?
    }

    async fn converse(
        &self,
        mut conversation: Vec<CommandResponse>,
    ) -> Result<ConversationReport, HarnessError> {
        let cfg = &self.config;
        info!(program = %cfg.program.display(), example = cfg.example, "starting test process");

        let mut child = Command::new(&cfg.program)
            .arg("--example")
            .arg(cfg.example.to_string())
            .envs(cfg.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                program: cfg.program.clone(),
                source,
            })?;

        let mut stdin = child.stdin.take().ok_or(HarnessError::StdioUnavailable("input"))?;
        let mut stdout = child.stdout.take().ok_or(HarnessError::StdioUnavailable("output"))?;
        let mut stderr = child.stderr.take().ok_or(HarnessError::StdioUnavailable("error"))?;

        // ── Preamble ─────────────────────────────────────────────────────────
        tokio::time::sleep(cfg.settle).await;
        let preamble = read_available(&mut stdout, cfg.read_idle)
            .await?
            .unwrap_or_default();
        let preamble = String::from_utf8_lossy(&preamble)
            .lines()
            .next()
            .unwrap_or_default()
            .trim_end()
            .to_string();
        let expected = cfg.expected_preamble();
        if preamble != expected {
            let errors = read_available(&mut stderr, cfg.read_idle)
                .await?
                .unwrap_or_default();
            warn!(stderr = %String::from_utf8_lossy(&errors), "unexpected preamble");
            return Err(HarnessError::Preamble {
                expected,
                received: preamble,
            });
        }
        debug!(%preamble, "preamble received");

        // ── Conversation ─────────────────────────────────────────────────────
        for (step, pair) in conversation.iter_mut().enumerate() {
            self.exchange(pair, &mut stdin, &mut stdout, &mut stderr).await?;
            info!(
                step,
                command = %pair.command(),
                expected = %pair.expected(),
                received = pair.received().len(),
                passed = pair.response_matches(),
                "conversation step"
            );
        }

        // ── Exit ─────────────────────────────────────────────────────────────
        let mut exit = CommandResponse::new(Packet::exit(true), Packet::exit(true));
        self.exchange(&mut exit, &mut stdin, &mut stdout, &mut stderr).await?;
        drop(stdin);
        if !exit.response_matches() {
            stop_child(&mut child).await;
            return Err(HarnessError::NoExitResponse);
        }

        let exit_status = match tokio::time::timeout(cfg.grace, child.wait()).await {
            Ok(status) => status?,
            Err(_) => {
                stop_child(&mut child).await;
                return Err(HarnessError::DidNotExit(cfg.grace));
            }
        };
        info!(status = %exit_status, "test process exited");

        Ok(ConversationReport {
            preamble,
            steps: conversation,
            exit_acknowledged: true,
            exit_status,
        })
    }

    /// One command/response round trip.
    async fn exchange<O, E>(
        &self,
        pair: &mut CommandResponse,
        stdin: &mut ChildStdin,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<(), HarnessError>
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        let frame = pair.pack(&self.codec)?.to_vec();
        stdin.write_all(&frame).await?;
        stdin.flush().await?;
        pair.mark_sent();

        tokio::time::sleep(self.config.settle).await;

        // Error channel first, then output; each stream is framed on its own.
        let errors = read_available(stderr, self.config.read_idle).await?.unwrap_or_default();
        let output = read_available(stdout, self.config.read_idle).await?.unwrap_or_default();
        if !errors.is_empty() || !output.is_empty() {
            pair.mark_received();
        }

        let mut packets = self.codec.parse_packets(&errors);
        packets.extend(self.codec.parse_packets(&output));
        pair.mark_parsed(packets);
        Ok(())
    }
}

async fn stop_child(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "failed to kill test process");
    }
}
