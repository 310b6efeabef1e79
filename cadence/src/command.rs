/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Command/response pairs.
//!
//! A [`CommandResponse`] couples one outbound command packet with the
//! response packet expected for it and records how far the exchange got:
//!
//! ```text
//! Created ─► CommandPacked ─► CommandSent ─► ResponseReceived ─► ResponseParsed
//! ```
//!
//! The four stage flags are independent booleans but each one only ever
//! flips `false → true`; nothing can clear them again.  The owner (a module
//! or the conversation harness) drops the pair when the exchange is over.

use crate::packet::{CodecError, Packet, PacketCodec};

/// Furthest stage an exchange has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Created,
    CommandPacked,
    CommandSent,
    ResponseReceived,
    ResponseParsed,
}

/// One command and its expected response.
#[derive(Debug, Clone)]
pub struct CommandResponse {
    command: Packet,
    expected: Packet,
    packed: Option<Vec<u8>>,
    received: Vec<Packet>,
    command_packed: bool,
    command_sent: bool,
    response_received: bool,
    response_parsed: bool,
}

impl CommandResponse {
    pub fn new(command: Packet, expected: Packet) -> Self {
        Self {
            command,
            expected,
            packed: None,
            received: Vec::new(),
            command_packed: false,
            command_sent: false,
            response_received: false,
            response_parsed: false,
        }
    }

    pub fn command(&self) -> &Packet {
        &self.command
    }

    pub fn expected(&self) -> &Packet {
        &self.expected
    }

    /// Encode the command with `codec` and mark it packed.  The frame is
    /// kept so it can be re-sent without encoding again.
    pub fn pack(&mut self, codec: &dyn PacketCodec) -> Result<&[u8], CodecError> {
        if self.packed.is_none() {
            self.packed = Some(codec.encode(&self.command)?);
        }
        self.command_packed = true;
        Ok(self.packed.as_deref().unwrap_or_default())
    }

    /// The frame produced by [`pack`](Self::pack), if any.
    pub fn packed_command(&self) -> Option<&[u8]> {
        self.packed.as_deref()
    }

    pub fn mark_sent(&mut self) {
        self.command_sent = true;
    }

    pub fn mark_received(&mut self) {
        self.response_received = true;
    }

    /// Record the packets decoded from the response bytes.
    pub fn mark_parsed(&mut self, packets: Vec<Packet>) {
        self.received.extend(packets);
        self.response_parsed = true;
    }

    pub fn command_packed(&self) -> bool {
        self.command_packed
    }

    pub fn command_sent(&self) -> bool {
        self.command_sent
    }

    pub fn response_received(&self) -> bool {
        self.response_received
    }

    pub fn response_parsed(&self) -> bool {
        self.response_parsed
    }

    pub fn received(&self) -> &[Packet] {
        &self.received
    }

    /// Highest stage whose flag is set.
    pub fn stage(&self) -> Stage {
        if self.response_parsed {
            Stage::ResponseParsed
        } else if self.response_received {
            Stage::ResponseReceived
        } else if self.command_sent {
            Stage::CommandSent
        } else if self.command_packed {
            Stage::CommandPacked
        } else {
            Stage::Created
        }
    }

    pub fn is_complete(&self) -> bool {
        self.command_packed && self.command_sent && self.response_received && self.response_parsed
    }

    /// `true` once a parsed packet matches the expected response.
    pub fn response_matches(&self) -> bool {
        self.received.iter().any(|p| p.matches(&self.expected))
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::JsonCodec;

    fn status_pair() -> CommandResponse {
        CommandResponse::new(Packet::status(""), Packet::status("0.1.0"))
    }

    #[test]
    fn stages_advance_in_order() {
        let mut cr = status_pair();
        assert_eq!(cr.stage(), Stage::Created);

        let frame = cr.pack(&JsonCodec::new()).unwrap().to_vec();
        assert!(!frame.is_empty());
        assert_eq!(cr.stage(), Stage::CommandPacked);

        cr.mark_sent();
        assert_eq!(cr.stage(), Stage::CommandSent);
        cr.mark_received();
        assert_eq!(cr.stage(), Stage::ResponseReceived);
        assert!(!cr.is_complete());

        cr.mark_parsed(vec![Packet::status("0.1.0")]);
        assert_eq!(cr.stage(), Stage::ResponseParsed);
        assert!(cr.is_complete());
        assert!(cr.response_matches());
    }

    #[test]
    fn flags_never_regress() {
        let mut cr = status_pair();
        cr.mark_sent();
        cr.mark_received();
        cr.mark_parsed(Vec::new());
        cr.mark_sent();
        cr.mark_parsed(Vec::new());

        assert!(cr.command_sent());
        assert!(cr.response_received());
        assert!(cr.response_parsed());
        // Packing later still only sets its own flag.
        cr.pack(&JsonCodec::new()).unwrap();
        assert!(cr.command_packed());
        assert_eq!(cr.stage(), Stage::ResponseParsed);
    }

    #[test]
    fn pack_encodes_once() {
        let mut cr = status_pair();
        let first = cr.pack(&JsonCodec::new()).unwrap().to_vec();
        let second = cr.pack(&JsonCodec::new()).unwrap().to_vec();
        assert_eq!(first, second);
        assert_eq!(cr.packed_command(), Some(first.as_slice()));
    }

    #[test]
    fn mismatching_response_is_reported() {
        let mut cr = status_pair();
        cr.mark_parsed(vec![Packet::status("9.9.9"), Packet::exit(true)]);
        assert!(!cr.response_matches());
        cr.mark_parsed(vec![Packet::status("0.1.0")]);
        assert!(cr.response_matches());
        assert_eq!(cr.received().len(), 3);
    }
}
