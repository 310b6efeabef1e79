/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Edges of the execution system: where packets leave it and how they get in.
//!
//! Outgoing packets go to a [`PacketSink`] on one of two [`Channel`]s.
//! Incoming packets and externally raised errors enter through an
//! [`Ingress`] handle that feeds the global queues.

use std::fmt;
use std::io::{self, Write};
use std::sync::{Mutex, PoisonError};

use tokio::sync::mpsc::UnboundedSender;

use crate::packet::{JsonCodec, Packet, PacketCodec};

/// Output stream a packet is written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Regular conversation output (stdout for the binary).
    Output,
    /// Exception dumps and advertised exceptions without an advertiser
    /// module (stderr for the binary).
    Error,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Channel::Output => "output",
            Channel::Error => "error",
        })
    }
}

/// Destination of every packet the execution system emits.
pub trait PacketSink: Send + Sync + 'static {
    fn emit(&self, channel: Channel, packet: &Packet) -> io::Result<()>;
}

// ── Stdio ─────────────────────────────────────────────────────────────────────

/// Encodes packets with `C` and writes them to stdout / stderr.
#[derive(Debug, Default)]
pub struct StdioSink<C = JsonCodec> {
    codec: C,
}

impl<C: PacketCodec> StdioSink<C> {
    pub fn new(codec: C) -> Self {
        Self { codec }
    }
}

impl<C: PacketCodec> PacketSink for StdioSink<C> {
    fn emit(&self, channel: Channel, packet: &Packet) -> io::Result<()> {
        let frame = self
            .codec
            .encode(packet)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        match channel {
            Channel::Output => {
                let mut out = io::stdout().lock();
                out.write_all(&frame)?;
                out.flush()
            }
            Channel::Error => {
                let mut err = io::stderr().lock();
                err.write_all(&frame)?;
                err.write_all(b"\n")?;
                err.flush()
            }
        }
    }
}

// ── Memory ────────────────────────────────────────────────────────────────────

/// Collects emitted packets; for embedding and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    packets: Mutex<Vec<(Channel, Packet)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packets emitted on `channel` so far, oldest first.
    pub fn packets(&self, channel: Channel) -> Vec<Packet> {
        self.packets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(c, _)| *c == channel)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Remove and return everything emitted so far.
    pub fn take(&self) -> Vec<(Channel, Packet)> {
        std::mem::take(&mut *self.packets.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl PacketSink for MemorySink {
    fn emit(&self, channel: Channel, packet: &Packet) -> io::Result<()> {
        self.packets
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((channel, packet.clone()));
        Ok(())
    }
}

// ── Ingress ───────────────────────────────────────────────────────────────────

/// The execution system is gone; nothing consumes the global queues anymore.
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("execution system queues are closed")]
pub struct IngressClosed;

/// Feeds the global packet and exception queues from outside the system
/// (transport readers, signal handlers, embedding code).
#[derive(Debug, Clone)]
pub struct Ingress {
    packets: UnboundedSender<Packet>,
    exceptions: UnboundedSender<anyhow::Error>,
}

impl Ingress {
    pub(crate) fn new(
        packets: UnboundedSender<Packet>,
        exceptions: UnboundedSender<anyhow::Error>,
    ) -> Self {
        Self {
            packets,
            exceptions,
        }
    }

    /// Queue `packet` for routing to the module named by its `module_id`.
    pub fn push_packet(&self, packet: Packet) -> Result<(), IngressClosed> {
        self.packets.send(packet).map_err(|_| IngressClosed)
    }

    /// Queue an error for review.  Errors outside the exception taxonomy are
    /// classified as uncaught when the coordinator drains them.
    pub fn push_exception(&self, err: impl Into<anyhow::Error>) -> Result<(), IngressClosed> {
        self.exceptions.send(err.into()).map_err(|_| IngressClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.packets.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn memory_sink_separates_channels() {
        let sink = MemorySink::new();
        sink.emit(Channel::Output, &Packet::status("1")).unwrap();
        sink.emit(Channel::Error, &Packet::exception("boom")).unwrap();
        sink.emit(Channel::Output, &Packet::exit(true)).unwrap();

        assert_eq!(sink.packets(Channel::Output).len(), 2);
        assert!(sink.packets(Channel::Error)[0].matches(&Packet::exception("boom")));

        let all = sink.take();
        assert_eq!(all.len(), 3);
        assert!(sink.packets(Channel::Output).is_empty());
    }

    #[test]
    fn ingress_reports_closed_queues() {
        let (ptx, prx) = mpsc::unbounded_channel();
        let (etx, erx) = mpsc::unbounded_channel();
        let ingress = Ingress::new(ptx, etx);

        ingress.push_packet(Packet::status("")).unwrap();
        ingress
            .push_exception(anyhow::anyhow!("external failure"))
            .unwrap();

        drop(prx);
        drop(erx);
        assert!(ingress.is_closed());
        assert!(ingress.push_packet(Packet::exit(true)).is_err());
        assert!(ingress.push_exception(anyhow::anyhow!("late")).is_err());
    }
}
