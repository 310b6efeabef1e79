/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Packet field codecs.
//!
//! Framing (finding where one packet ends and the next begins) is handled by
//! [`split_frames`](super::split_frames); a [`PacketCodec`] only turns one
//! complete frame into a typed [`Packet`] and back.  The codec is pluggable:
//! the execution system and the harness only ever talk to the trait.
//!
//! Decoding is two-phase:
//! 1. decode the frame generically and read the `typeKey` discriminator only;
//! 2. pick the concrete decoder from a table indexed by that key.
//!
//! Any failure in either phase degrades to [`Packet::Unknown`] holding the
//! raw frame.  Decoding therefore never fails and never drops bytes.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::framing::{split_frames, Delimiters};
use super::{ExceptionPacket, ExitPacket, Packet, PacketType, StatusPacket, UnknownPacket};
use crate::module::ModuleId;

// ── Errors ────────────────────────────────────────────────────────────────────

/// Failure to render a packet into bytes.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("failed to encode {packet_type} packet: {source}")]
    Encode {
        packet_type: PacketType,
        #[source]
        source: serde_json::Error,
    },
}

// ── Codec trait ───────────────────────────────────────────────────────────────

/// A pluggable packet serialization format.
pub trait PacketCodec: Send + Sync + 'static {
    /// The open/close bytes that delimit one frame of this format.
    fn delimiters(&self) -> Delimiters;

    /// Render `packet` as one complete frame.
    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, CodecError>;

    /// Decode one complete frame.  Never fails: undecodable frames become
    /// [`Packet::Unknown`].
    fn decode_frame(&self, frame: &[u8]) -> Packet;

    /// Frame `buffer` and decode every frame, in order.
    ///
    /// Returns an empty `Vec` when the buffer holds no complete frame.
    fn parse_packets(&self, buffer: &[u8]) -> Vec<Packet> {
        split_frames(buffer, self.delimiters())
            .into_iter()
            .map(|frame| self.decode_frame(frame))
            .collect()
    }
}

// ── JSON codec ────────────────────────────────────────────────────────────────

/// JSON object frames: `{"typeKey":1,"moduleID":0,"version":"0.1.0"}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }
}

/// Generic first-phase view of a frame: only the discriminator and routing.
#[derive(Debug, Deserialize)]
struct FrameHeader {
    #[serde(rename = "typeKey")]
    type_key: u8,
    #[serde(rename = "moduleID", default)]
    module_id: ModuleId,
}

/// Wire envelope: the variant payload flattened next to its discriminator.
#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    #[serde(rename = "typeKey")]
    type_key: u8,
    #[serde(flatten)]
    body: &'a T,
}

type DecodeFn = fn(&[u8], ModuleId) -> Result<Packet, serde_json::Error>;

/// Second-phase decoders, indexed by `typeKey`.
const DECODERS: [DecodeFn; 4] = [decode_exception, decode_status, decode_unknown, decode_exit];

fn decode_exception(frame: &[u8], _: ModuleId) -> Result<Packet, serde_json::Error> {
    serde_json::from_slice::<ExceptionPacket>(frame).map(Packet::Exception)
}

fn decode_status(frame: &[u8], _: ModuleId) -> Result<Packet, serde_json::Error> {
    serde_json::from_slice::<StatusPacket>(frame).map(Packet::Status)
}

fn decode_unknown(frame: &[u8], module_id: ModuleId) -> Result<Packet, serde_json::Error> {
    Ok(Packet::Unknown(UnknownPacket {
        module_id,
        raw: frame.to_vec(),
    }))
}

fn decode_exit(frame: &[u8], _: ModuleId) -> Result<Packet, serde_json::Error> {
    serde_json::from_slice::<ExitPacket>(frame).map(Packet::Exit)
}

fn envelope<T: Serialize>(packet_type: PacketType, body: &T) -> Result<Vec<u8>, CodecError> {
    serde_json::to_vec(&Envelope {
        type_key: packet_type.key(),
        body,
    })
    .map_err(|source| CodecError::Encode {
        packet_type,
        source,
    })
}

impl PacketCodec for JsonCodec {
    fn delimiters(&self) -> Delimiters {
        Delimiters::JSON
    }

    fn encode(&self, packet: &Packet) -> Result<Vec<u8>, CodecError> {
        match packet {
            Packet::Exception(p) => envelope(PacketType::Exception, p),
            Packet::Status(p) => envelope(PacketType::Status, p),
            Packet::Exit(p) => envelope(PacketType::Exit, p),
            // Unknown packets already are a frame; re-emit them untouched.
            Packet::Unknown(p) => Ok(p.raw.clone()),
        }
    }

    fn decode_frame(&self, frame: &[u8]) -> Packet {
        let header: FrameHeader = match serde_json::from_slice(frame) {
            Ok(h) => h,
            Err(e) => {
                debug!(len = frame.len(), error = %e, "frame has no readable header");
                return Packet::unknown(frame.to_vec());
            }
        };

        let Some(packet_type) = PacketType::from_key(header.type_key) else {
            debug!(type_key = header.type_key, "unrecognised discriminator");
            return Packet::Unknown(UnknownPacket {
                module_id: header.module_id,
                raw: frame.to_vec(),
            });
        };

        match DECODERS[packet_type.key() as usize](frame, header.module_id) {
            Ok(packet) => packet,
            Err(e) => {
                debug!(%packet_type, error = %e, "variant decode failed");
                Packet::Unknown(UnknownPacket {
                    module_id: header.module_id,
                    raw: frame.to_vec(),
                })
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn text(bytes: &[u8]) -> &str {
        std::str::from_utf8(bytes).unwrap()
    }

    #[test]
    fn encode_writes_discriminator_and_fields() {
        let codec = JsonCodec::new();
        let bytes = codec.encode(&Packet::status("0.1.0")).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["typeKey"], 1);
        assert_eq!(value["moduleID"], 0);
        assert_eq!(value["version"], "0.1.0");

        let bytes = codec.encode(&Packet::exit(true)).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["typeKey"], 3);
        assert_eq!(value["willExit"], true);
    }

    #[test]
    fn decodes_hand_written_frames() {
        let codec = JsonCodec::new();
        assert_eq!(
            codec.decode_frame(br#"{"typeKey":0,"moduleID":2,"message":"disk full"}"#),
            Packet::exception("disk full").with_module_id(ModuleId(2))
        );
        assert_eq!(
            codec.decode_frame(br#"{"typeKey":1,"version":"9.9"}"#),
            Packet::status("9.9")
        );
        assert_eq!(
            codec.decode_frame(br#"{"willExit":true,"typeKey":3}"#),
            Packet::exit(true)
        );
    }

    #[test]
    fn unrecognised_discriminator_keeps_raw_frame() {
        let codec = JsonCodec::new();
        let frame = br#"{"typeKey":42,"moduleID":1,"payload":[1,2,3]}"#;
        match codec.decode_frame(frame) {
            Packet::Unknown(u) => {
                assert_eq!(u.raw, frame.to_vec());
                assert_eq!(u.module_id, ModuleId(1));
            }
            other => panic!("expected unknown packet, got {other}"),
        }
    }

    #[test]
    fn undecodable_frames_fall_back_to_unknown() {
        let codec = JsonCodec::new();
        let frames: [&[u8]; 4] = [
            b"{not json at all}",
            br#"{"moduleID":1}"#,
            br#"{"typeKey":"one"}"#,
            br#"{"typeKey":1,"version":7}"#,
        ];
        for frame in frames {
            match codec.decode_frame(frame) {
                Packet::Unknown(u) => assert_eq!(u.raw, frame.to_vec(), "{}", text(frame)),
                other => panic!("expected unknown for {}, got {other}", text(frame)),
            }
        }
    }

    #[test]
    fn unknown_packets_encode_verbatim() {
        let codec = JsonCodec::new();
        let raw = br#"{"typeKey":2,"anything":"goes"}"#.to_vec();
        assert_eq!(codec.encode(&Packet::unknown(raw.clone())).unwrap(), raw);
        assert!(codec.decode_frame(&raw).matches(&Packet::unknown(raw.clone())));
    }

    #[test]
    fn parse_packets_skips_noise_and_keeps_order() {
        let codec = JsonCodec::new();
        let mut buffer = b"startup banner\n".to_vec();
        buffer.extend(codec.encode(&Packet::status("1")).unwrap());
        buffer.extend_from_slice(b" \r\n garbage ");
        buffer.extend(codec.encode(&Packet::exception("a } b")).unwrap());
        buffer.extend_from_slice(b"{}");
        buffer.extend(codec.encode(&Packet::exit(false)).unwrap());
        buffer.extend_from_slice(b"trailing");

        let packets = codec.parse_packets(&buffer);
        assert_eq!(packets.len(), 3);
        assert!(packets[0].matches(&Packet::status("1")));
        assert!(packets[1].matches(&Packet::exception("a } b")));
        assert!(packets[2].matches(&Packet::exit(false)));
    }

    #[test]
    fn parse_packets_on_empty_buffer_is_empty() {
        assert!(JsonCodec::new().parse_packets(b"").is_empty());
        assert!(JsonCodec::new().parse_packets(b"no frames here").is_empty());
    }
}
