// Copyright 2016 The Mesh Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Wire framing for the reactor's sequenced-RPC layer, and the mesh
//! message alphabet carried inside it.
//!
//! `framed_packet := send_seq:u16le reply_seq:u16le payload`
//! `mesh_payload  := tag:u16le body`
//! All strings are `length:u32le bytes`, no terminator.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::MeshError;

/// Length in bytes of the `(send_seq, reply_seq)` prefix every framed
/// packet carries.
pub const FRAME_HEADER_LEN: usize = 4;

/// Wraps `payload` with the reactor's `(send_seq, reply_seq)` prefix.
pub fn frame(send_seq: u16, reply_seq: u16, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    out.write_u16::<LittleEndian>(send_seq).unwrap();
    out.write_u16::<LittleEndian>(reply_seq).unwrap();
    out.extend_from_slice(payload);
    out
}

/// Splits a framed packet back into its `(send_seq, reply_seq, payload)`.
pub fn unframe(data: &[u8]) -> Result<(u16, u16, &[u8]), MeshError> {
    if data.len() < FRAME_HEADER_LEN {
        return Err(MeshError::Serialization(format!(
            "frame too short: {} bytes",
            data.len()
        )));
    }
    let mut cursor = Cursor::new(&data[..FRAME_HEADER_LEN]);
    let send_seq = cursor.read_u16::<LittleEndian>().unwrap();
    let reply_seq = cursor.read_u16::<LittleEndian>().unwrap();
    Ok((send_seq, reply_seq, &data[FRAME_HEADER_LEN..]))
}

/// The 16-bit tag preceding every mesh message body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Tag {
    /// Reserved; never sent over the wire.
    None = 0,
    /// Joiner to existing member: carries a display name.
    Hello = 1,
    /// Reply to `Hello`: carries the assigned peer id.
    Welcome = 2,
    /// Bootstrap's broadcast during a join, requesting a peer id proposal.
    GetNextPeerId = 3,
    /// Liveness probe.
    Ping = 4,
    /// Reply to `Ping`.
    Pong = 5,
    /// Peer advertisement, broadcast to the whole mesh.
    Peer = 6,
}

impl Tag {
    fn from_u16(v: u16) -> Option<Tag> {
        match v {
            0 => Some(Tag::None),
            1 => Some(Tag::Hello),
            2 => Some(Tag::Welcome),
            3 => Some(Tag::GetNextPeerId),
            4 => Some(Tag::Ping),
            5 => Some(Tag::Pong),
            6 => Some(Tag::Peer),
            _ => None,
        }
    }
}

/// A decoded mesh-layer message.
#[derive(Debug, Clone, PartialEq)]
pub enum MeshMessage {
    /// Reserved placeholder; bodyless.
    None,
    /// Joiner's display name.
    Hello { display_name: String },
    /// Assigned peer id, in reply to `Hello`, plus the replying node's own
    /// id (0 if it has none, i.e. it is itself a never-joined genesis
    /// node). The second field lets the joiner key its own record of the
    /// bootstrap peer correctly.
    Welcome { peer_id: u16, bootstrap_peer_id: u16 },
    /// Requests the recipient's `next_peer_id` proposal.
    GetNextPeerId,
    /// Liveness probe, bodyless.
    Ping,
    /// Reply to `Ping`, bodyless.
    Pong,
    /// One peer's advertised identity, round-trip time and address.
    Peer {
        /// The advertised peer's id.
        peer_id: u16,
        /// Round-trip time last measured by the advertiser, in ms.
        rtt_ms: u32,
        /// Textual host address.
        addr: String,
        /// UDP port.
        port: u16,
    },
    /// Tag 7 or above: opaque, forwarded to application handlers.
    Application {
        /// The raw tag value, preserved for the application.
        tag: u16,
        /// Opaque payload.
        body: Vec<u8>,
    },
}

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.write_u32::<LittleEndian>(s.len() as u32).unwrap();
    out.extend_from_slice(s.as_bytes());
}

fn read_string(cursor: &mut Cursor<&[u8]>) -> Result<String, MeshError> {
    let len = cursor
        .read_u32::<LittleEndian>()
        .map_err(|e| MeshError::Serialization(e.to_string()))? as usize;
    let start = cursor.position() as usize;
    let data = cursor.get_ref();
    if start + len > data.len() {
        return Err(MeshError::Serialization(format!(
            "string length {} exceeds remaining {} bytes",
            len,
            data.len().saturating_sub(start)
        )));
    }
    let bytes = &data[start..start + len];
    cursor.set_position((start + len) as u64);
    String::from_utf8(bytes.to_vec()).map_err(|e| MeshError::Serialization(e.to_string()))
}

impl MeshMessage {
    /// Encodes this message as `tag:u16le body`.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            MeshMessage::None => {
                out.write_u16::<LittleEndian>(Tag::None as u16).unwrap();
            }
            MeshMessage::Hello { display_name } => {
                out.write_u16::<LittleEndian>(Tag::Hello as u16).unwrap();
                write_string(&mut out, display_name);
            }
            MeshMessage::Welcome { peer_id, bootstrap_peer_id } => {
                out.write_u16::<LittleEndian>(Tag::Welcome as u16).unwrap();
                out.write_u16::<LittleEndian>(*peer_id).unwrap();
                out.write_u16::<LittleEndian>(*bootstrap_peer_id).unwrap();
            }
            MeshMessage::GetNextPeerId => {
                out.write_u16::<LittleEndian>(Tag::GetNextPeerId as u16).unwrap();
            }
            MeshMessage::Ping => {
                out.write_u16::<LittleEndian>(Tag::Ping as u16).unwrap();
            }
            MeshMessage::Pong => {
                out.write_u16::<LittleEndian>(Tag::Pong as u16).unwrap();
            }
            MeshMessage::Peer { peer_id, rtt_ms, addr, port } => {
                out.write_u16::<LittleEndian>(Tag::Peer as u16).unwrap();
                out.write_u16::<LittleEndian>(*peer_id).unwrap();
                out.write_u32::<LittleEndian>(*rtt_ms).unwrap();
                write_string(&mut out, addr);
                out.write_u16::<LittleEndian>(*port).unwrap();
            }
            MeshMessage::Application { tag, body } => {
                out.write_u16::<LittleEndian>(*tag).unwrap();
                out.extend_from_slice(body);
            }
        }
        out
    }

    /// Decodes a message previously produced by [`MeshMessage::encode`].
    pub fn decode(data: &[u8]) -> Result<MeshMessage, MeshError> {
        if data.len() < 2 {
            return Err(MeshError::Serialization("message shorter than tag".into()));
        }
        let mut cursor = Cursor::new(data);
        let raw_tag = cursor
            .read_u16::<LittleEndian>()
            .map_err(|e| MeshError::Serialization(e.to_string()))?;

        match Tag::from_u16(raw_tag) {
            Some(Tag::None) => Ok(MeshMessage::None),
            Some(Tag::Hello) => {
                let display_name = read_string(&mut cursor)?;
                Ok(MeshMessage::Hello { display_name })
            }
            Some(Tag::Welcome) => {
                let peer_id = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|e| MeshError::Serialization(e.to_string()))?;
                let bootstrap_peer_id = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|e| MeshError::Serialization(e.to_string()))?;
                Ok(MeshMessage::Welcome { peer_id, bootstrap_peer_id })
            }
            Some(Tag::GetNextPeerId) => Ok(MeshMessage::GetNextPeerId),
            Some(Tag::Ping) => Ok(MeshMessage::Ping),
            Some(Tag::Pong) => Ok(MeshMessage::Pong),
            Some(Tag::Peer) => {
                let peer_id = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|e| MeshError::Serialization(e.to_string()))?;
                let rtt_ms = cursor
                    .read_u32::<LittleEndian>()
                    .map_err(|e| MeshError::Serialization(e.to_string()))?;
                let addr = read_string(&mut cursor)?;
                let port = cursor
                    .read_u16::<LittleEndian>()
                    .map_err(|e| MeshError::Serialization(e.to_string()))?;
                Ok(MeshMessage::Peer { peer_id, rtt_ms, addr, port })
            }
            None => {
                let body = data[2..].to_vec();
                Ok(MeshMessage::Application { tag: raw_tag, body })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_roundtrips() {
        for send_seq in [0u16, 1, 42, u16::MAX] {
            for reply_seq in [0u16, 1, 42, u16::MAX] {
                let payload = b"hello mesh".to_vec();
                let framed = frame(send_seq, reply_seq, &payload);
                let (s, r, p) = unframe(&framed).unwrap();
                assert_eq!(s, send_seq);
                assert_eq!(r, reply_seq);
                assert_eq!(p, &payload[..]);
            }
        }
    }

    #[test]
    fn unframe_rejects_short_input() {
        assert!(unframe(&[0u8, 1, 2]).is_err());
    }

    #[test]
    fn mesh_message_roundtrips() {
        let cases = vec![
            MeshMessage::None,
            MeshMessage::Hello { display_name: "alice".into() },
            MeshMessage::Hello { display_name: "".into() },
            MeshMessage::Welcome { peer_id: 7, bootstrap_peer_id: 0 },
            MeshMessage::Welcome { peer_id: 7, bootstrap_peer_id: 3 },
            MeshMessage::GetNextPeerId,
            MeshMessage::Ping,
            MeshMessage::Pong,
            MeshMessage::Peer {
                peer_id: 3,
                rtt_ms: 42,
                addr: "127.0.0.1".into(),
                port: 7001,
            },
            MeshMessage::Application { tag: 9, body: vec![1, 2, 3] },
        ];
        for case in cases {
            let encoded = case.encode();
            let decoded = MeshMessage::decode(&encoded).unwrap();
            assert_eq!(case, decoded);
        }
    }

    #[test]
    fn decode_rejects_truncated_string() {
        let mut bad = vec![1u8, 0]; // Tag::Hello
        bad.extend_from_slice(&100u32.to_le_bytes()); // claims 100 bytes, has none
        assert!(MeshMessage::decode(&bad).is_err());
    }
}
