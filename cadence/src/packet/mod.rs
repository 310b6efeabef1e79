/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Typed, self-describing packets exchanged between modules and the outside
//! world.
//!
//! ```text
//! producer ──► Packet ──(PacketCodec::encode)──► frame bytes ──► transport
//!                 ▲                                                  │
//!                 └──────(PacketCodec::decode_frame)◄── split_frames ┘
//! ```
//!
//! # Model
//! [`Packet`] is a closed sum over the four known variants.  Each variant has
//! a fixed [`PacketType`] discriminator that is carried on the wire as
//! `typeKey` and is compared *before* any variant field when two packets are
//! matched (see [`Packet::matches`]).
//!
//! | `typeKey` | Variant | Payload |
//! |---|---|---|
//! | 0 | [`ExceptionPacket`] | exception message |
//! | 1 | [`StatusPacket`] | version string |
//! | 2 | [`UnknownPacket`] | raw, unparsed frame bytes |
//! | 3 | [`ExitPacket`] | "will exit" flag |
//!
//! Packets are values: once built they are moved, cloned and compared but
//! never mutated in place.

pub mod codec;
pub mod framing;

pub use codec::{CodecError, JsonCodec, PacketCodec};
pub use framing::{read_available, split_frames, Delimiters, StreamFramer};

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::module::ModuleId;

// ── Packet type discriminator ─────────────────────────────────────────────────

/// Stable discriminator of a packet variant.
///
/// The numeric values are part of the wire protocol and must never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// Carries an exception message (`typeKey = 0`).
    Exception = 0,
    /// Carries a version value (`typeKey = 1`).
    Status = 1,
    /// Raw bytes of a frame that could not be decoded (`typeKey = 2`).
    Unknown = 2,
    /// Orderly shutdown request / acknowledgement (`typeKey = 3`).
    Exit = 3,
}

impl PacketType {
    /// All known discriminators, in key order.
    pub const ALL: [PacketType; 4] = [
        PacketType::Exception,
        PacketType::Status,
        PacketType::Unknown,
        PacketType::Exit,
    ];

    /// Wire value of this discriminator.
    pub const fn key(self) -> u8 {
        self as u8
    }

    /// Parse a wire discriminator.  Returns `None` for unrecognised keys so
    /// the caller can fall back to [`UnknownPacket`].
    pub fn from_key(key: u8) -> Option<Self> {
        match key {
            0 => Some(PacketType::Exception),
            1 => Some(PacketType::Status),
            2 => Some(PacketType::Unknown),
            3 => Some(PacketType::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PacketType::Exception => "exception",
            PacketType::Status => "status",
            PacketType::Unknown => "unknown",
            PacketType::Exit => "exit",
        };
        f.write_str(name)
    }
}

// ── Variant payloads ──────────────────────────────────────────────────────────

/// An exception rendered for transmission.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExceptionPacket {
    #[serde(rename = "moduleID", default)]
    pub module_id: ModuleId,
    #[serde(default)]
    pub message: String,
}

/// Status request or report.  Commands usually leave `version` empty; the
/// response carries the version of the answering system.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StatusPacket {
    #[serde(rename = "moduleID", default)]
    pub module_id: ModuleId,
    #[serde(default)]
    pub version: String,
}

/// A delimited frame that could not be decoded into a known variant.
///
/// `raw` always holds the complete original frame, so nothing the framer
/// delimited is ever lost.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnknownPacket {
    pub module_id: ModuleId,
    pub raw: Vec<u8>,
}

/// Orderly shutdown request (command) or acknowledgement (response).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExitPacket {
    #[serde(rename = "moduleID", default)]
    pub module_id: ModuleId,
    #[serde(rename = "willExit", default)]
    pub will_exit: bool,
}

// ── Packet ────────────────────────────────────────────────────────────────────

/// A typed message unit.  See the [module docs](self) for the variant table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Exception(ExceptionPacket),
    Status(StatusPacket),
    Unknown(UnknownPacket),
    Exit(ExitPacket),
}

impl Packet {
    /// Exception packet addressed to the system module.
    pub fn exception(message: impl Into<String>) -> Self {
        Packet::Exception(ExceptionPacket {
            module_id: ModuleId::SYSTEM,
            message: message.into(),
        })
    }

    /// Status packet addressed to the system module.
    pub fn status(version: impl Into<String>) -> Self {
        Packet::Status(StatusPacket {
            module_id: ModuleId::SYSTEM,
            version: version.into(),
        })
    }

    /// Exit packet addressed to the system module.
    pub fn exit(will_exit: bool) -> Self {
        Packet::Exit(ExitPacket {
            module_id: ModuleId::SYSTEM,
            will_exit,
        })
    }

    /// Unknown packet wrapping `raw` frame bytes.
    pub fn unknown(raw: impl Into<Vec<u8>>) -> Self {
        Packet::Unknown(UnknownPacket {
            module_id: ModuleId::SYSTEM,
            raw: raw.into(),
        })
    }

    /// Re-address this packet to `module_id`.
    pub fn with_module_id(mut self, module_id: ModuleId) -> Self {
        match &mut self {
            Packet::Exception(p) => p.module_id = module_id,
            Packet::Status(p) => p.module_id = module_id,
            Packet::Unknown(p) => p.module_id = module_id,
            Packet::Exit(p) => p.module_id = module_id,
        }
        self
    }

    /// Variant discriminator.
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Exception(_) => PacketType::Exception,
            Packet::Status(_) => PacketType::Status,
            Packet::Unknown(_) => PacketType::Unknown,
            Packet::Exit(_) => PacketType::Exit,
        }
    }

    /// Wire value of the discriminator (`typeKey`).
    pub fn type_key(&self) -> u8 {
        self.packet_type().key()
    }

    /// Routing target.  `0` is the execution system's own module.
    pub fn module_id(&self) -> ModuleId {
        match self {
            Packet::Exception(p) => p.module_id,
            Packet::Status(p) => p.module_id,
            Packet::Unknown(p) => p.module_id,
            Packet::Exit(p) => p.module_id,
        }
    }

    /// Structural match used to compare expected and actual conversations.
    ///
    /// The discriminators are compared first; on mismatch the result is
    /// `false` without looking at any field.  Otherwise the variant payloads
    /// are compared (message, version, raw bytes or exit flag).  The routing
    /// `module_id` is not part of the match.
    pub fn matches(&self, other: &Packet) -> bool {
        if self.type_key() != other.type_key() {
            return false;
        }
        match (self, other) {
            (Packet::Exception(a), Packet::Exception(b)) => a.message == b.message,
            (Packet::Status(a), Packet::Status(b)) => a.version == b.version,
            (Packet::Unknown(a), Packet::Unknown(b)) => a.raw == b.raw,
            (Packet::Exit(a), Packet::Exit(b)) => a.will_exit == b.will_exit,
            _ => false,
        }
    }
}

/// Free-function form of [`Packet::matches`].
pub fn matches_packet(a: &Packet, b: &Packet) -> bool {
    a.matches(b)
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Packet::Exception(p) => write!(f, "exception[{}]: {}", p.module_id, p.message),
            Packet::Status(p) => write!(f, "status[{}]: version='{}'", p.module_id, p.version),
            Packet::Unknown(p) => write!(f, "unknown[{}]: {} byte(s)", p.module_id, p.raw.len()),
            Packet::Exit(p) => write!(f, "exit[{}]: will_exit={}", p.module_id, p.will_exit),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn one_of_each() -> Vec<Packet> {
        vec![
            Packet::exception("boom"),
            Packet::status("1.2.3"),
            Packet::unknown(b"{\"typeKey\":9}".to_vec()),
            Packet::exit(true),
        ]
    }

    #[test]
    fn type_keys_are_stable() {
        assert_eq!(PacketType::Exception.key(), 0);
        assert_eq!(PacketType::Status.key(), 1);
        assert_eq!(PacketType::Unknown.key(), 2);
        assert_eq!(PacketType::Exit.key(), 3);
        for t in PacketType::ALL {
            assert_eq!(PacketType::from_key(t.key()), Some(t));
        }
        assert_eq!(PacketType::from_key(4), None);
        assert_eq!(PacketType::from_key(255), None);
    }

    #[test]
    fn mismatched_type_keys_never_match() {
        let packets = one_of_each();
        for (i, a) in packets.iter().enumerate() {
            for (j, b) in packets.iter().enumerate() {
                if i != j {
                    assert!(!a.matches(b), "{a} must not match {b}");
                    assert!(!matches_packet(b, a));
                }
            }
        }
    }

    #[test]
    fn same_variant_compares_payload() {
        assert!(Packet::status("1.0").matches(&Packet::status("1.0")));
        assert!(!Packet::status("1.0").matches(&Packet::status("2.0")));
        assert!(Packet::exit(true).matches(&Packet::exit(true)));
        assert!(!Packet::exit(true).matches(&Packet::exit(false)));
        assert!(Packet::exception("x").matches(&Packet::exception("x")));
        assert!(!Packet::unknown(b"{a}".to_vec()).matches(&Packet::unknown(b"{b}".to_vec())));
    }

    #[test]
    fn matching_ignores_routing_target() {
        let a = Packet::status("0.1.0").with_module_id(ModuleId(3));
        let b = Packet::status("0.1.0");
        assert!(a.matches(&b));
        assert_ne!(a, b, "structural equality still sees the module id");
    }

    #[test]
    fn with_module_id_readdresses_every_variant() {
        for p in one_of_each() {
            let ty = p.packet_type();
            let p = p.with_module_id(ModuleId(7));
            assert_eq!(p.module_id(), ModuleId(7));
            assert_eq!(p.packet_type(), ty);
        }
    }
}
