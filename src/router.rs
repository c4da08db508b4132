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

//! A pluggable routing seam, stubbed to direct sends only.
//!
//! Every send in this crate is direct: the mesh assumes a complete
//! graph of directly-reachable peers. `Router` exists so a future
//! ping-weighted or multi-hop implementation can be substituted without
//! touching call sites; it is not otherwise exercised by the mesh layer
//! today.

use crate::transport::PeerHandle;

/// Resolves the next hop to reach a destination peer.
pub trait Router: Send {
    /// Returns the handle the mesh layer should actually send to in
    /// order to eventually reach `destination`.
    fn next_hop(&self, destination: PeerHandle) -> PeerHandle;
}

/// The only implementation this crate ships: every destination is
/// reachable directly, so the next hop is always the destination
/// itself. Multi-hop forwarding is a future extension.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectRouter;

impl Router for DirectRouter {
    fn next_hop(&self, destination: PeerHandle) -> PeerHandle {
        destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_router_returns_destination_unchanged() {
        let router = DirectRouter;
        assert_eq!(router.next_hop(42), 42);
    }
}
