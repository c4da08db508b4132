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

//! The record the mesh layer keeps for each peer it believes itself
//! connected to.

use std::cmp::Ordering;

use crate::transport::PeerHandle;

/// A known member of the mesh.
///
/// Equality, ordering and hashing are on `peer_id` alone, so the peer
/// table stays well-behaved even if a handle gets reused by the
/// transport host across a reconnect.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    /// Unique identifier assigned at join time.
    pub peer_id: u16,
    /// Non-owning reference to the transport host session.
    pub handle: PeerHandle,
    /// Monotonic milliseconds at which we last heard from this peer.
    pub last_seen_ms: u64,
    /// Last measured round-trip time, in milliseconds.
    pub rtt_ms: u32,
    /// Display name advertised at join time.
    pub display_name: String,
    /// Textual host address, as reported by the transport host or a
    /// `Peer` advertisement.
    pub address: String,
    /// UDP port.
    pub port: u16,
}

impl PeerRecord {
    /// Builds a new record with `rtt_ms` unset and `last_seen_ms` set to
    /// `now_ms`.
    pub fn new(
        peer_id: u16,
        handle: PeerHandle,
        now_ms: u64,
        display_name: String,
        address: String,
        port: u16,
    ) -> PeerRecord {
        PeerRecord {
            peer_id,
            handle,
            last_seen_ms: now_ms,
            rtt_ms: 0,
            display_name,
            address,
            port,
        }
    }
}

impl PartialEq for PeerRecord {
    fn eq(&self, other: &Self) -> bool {
        self.peer_id == other.peer_id
    }
}

impl Eq for PeerRecord {}

impl PartialOrd for PeerRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.peer_id.cmp(&other.peer_id)
    }
}

impl std::hash::Hash for PeerRecord {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.peer_id.hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_and_ordering_are_on_peer_id_only() {
        let a = PeerRecord::new(1, 11, 0, "a".into(), "10.0.0.1".into(), 7001);
        let mut b = PeerRecord::new(1, 22, 500, "b".into(), "10.0.0.2".into(), 7002);
        assert_eq!(a, b);
        b.peer_id = 2;
        assert!(a < b);
    }
}
