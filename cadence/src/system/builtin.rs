/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! The execution system's own module, always registered as module `0`.
//!
//! It answers the control conversation:
//!
//! | Inbound | Reply | Side effect |
//! |---|---|---|
//! | Status | Status with the crate version | — |
//! | Exit(`true`) | Exit(`true`) | shutdown requested |
//! | Exit(`false`) | Exit(`false`) | — |
//! | Exception | — | logged |
//! | Unknown | — | raised as a module exception |

use async_trait::async_trait;
use tracing::{info, warn};

use crate::module::{Module, ModuleContext};
use crate::packet::Packet;

/// Version reported in Status replies.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name under which the system module is registered (and its policy looked up).
pub const SYSTEM_MODULE_NAME: &str = "execution-system";

#[derive(Debug, Default)]
pub struct SystemModule;

#[async_trait]
impl Module for SystemModule {
    fn name(&self) -> &str {
        SYSTEM_MODULE_NAME
    }

    async fn handle_packet(&self, ctx: &ModuleContext, packet: Packet) -> anyhow::Result<()> {
        match packet {
            Packet::Status(_) => ctx.send(Packet::status(VERSION))?,
            Packet::Exit(p) => {
                ctx.send(Packet::exit(p.will_exit))?;
                if p.will_exit {
                    info!("exit requested over the control channel");
                    ctx.request_shutdown();
                }
            }
            Packet::Exception(p) => {
                warn!(from = %p.module_id, message = %p.message, "exception packet received");
            }
            Packet::Unknown(p) => {
                ctx.raise(anyhow::anyhow!(
                    "unrecognised packet ({} byte(s)): {}",
                    p.raw.len(),
                    String::from_utf8_lossy(&p.raw)
                ));
            }
        }
        Ok(())
    }
}
