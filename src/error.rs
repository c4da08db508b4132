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

//! Error kinds surfaced across the reactor/mesh boundary.

use std::io;

use thiserror::Error;

/// Errors surfaced to application code.
///
/// All of these are transient by policy: the reactor never lets one unwind
/// across its own boundary, it converts them into a callback invocation
/// carrying a sentinel (empty packet, null handle) instead.
#[derive(Debug, Error)]
pub enum MeshError {
    /// The transport host returned no session, or its connect event did not
    /// arrive before the requested timeout.
    #[error("could not connect to {addr}:{port}")]
    CannotConnect {
        /// Target host.
        addr: String,
        /// Target port.
        port: u16,
    },

    /// A Hello reply was empty or did not parse as a `Welcome`.
    #[error("join negotiation failed: {0}")]
    NegotiationFailed(String),

    /// A sequenced request's callback fired without a matching reply.
    #[error("request timed out")]
    Timeout,

    /// An inbound message referenced a peer id absent from the peer table.
    #[error("unknown peer id {0}")]
    UnknownPeer(u16),

    /// The wire payload could not be decoded.
    #[error("malformed packet: {0}")]
    Serialization(String),

    /// Lower-level I/O failure surfaced by a transport host implementation.
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
}
