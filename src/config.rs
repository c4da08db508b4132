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

//! Tunables for the reactor and mesh layer, loadable from a TOML file the
//! way a consuming application would load its own node configuration.

use std::fs;
use std::path::Path;

use serde_derive::{Deserialize, Serialize};

/// How long the transport host's poll may block per reactor iteration.
pub const LOOP_TIMEOUT_MS: u64 = 1000;
/// How often the mesh layer pings and re-advertises its known peers.
pub const ADVERTISE_EVERY_MS: u64 = 1000;
/// A peer silent for longer than this is evicted.
pub const PEER_TIMEOUT_MS: u64 = 3000;
/// Deadline for the bootstrap's `GetNextPeerId` broadcast during a join.
pub const GET_NEXT_PEER_ID_TIMEOUT_MS: u64 = 2000;
/// Deadline for connecting to a peer discovered via a `Peer` advertisement.
pub const CONNECT_TIMEOUT_MS: u64 = 2000;
/// Sentinel meaning "never expire" for a pending callback.
pub const NO_TIMEOUT_MS: u64 = 0;

/// Maximum number of simultaneously connected peers.
pub const MAX_PEERS: usize = 10;
/// Reliable channel the mesh layer communicates on.
pub const MESH_CHANNEL: u8 = 0;
/// Total channel count requested of the transport host.
pub const CHANNEL_COUNT: u8 = 3;

/// Configuration for a single mesh node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MeshConfig {
    /// UDP port to listen on.
    pub listen_port: u16,
    /// Display name advertised in `Hello`.
    pub display_name: String,
    /// Poll timeout for the reactor's event loop, in milliseconds.
    pub loop_timeout_ms: u64,
    /// Advertisement round period, in milliseconds.
    pub advertise_every_ms: u64,
    /// Liveness eviction deadline, in milliseconds.
    pub peer_timeout_ms: u64,
    /// Deadline for a bootstrap's `GetNextPeerId` broadcast.
    pub get_next_peer_id_timeout_ms: u64,
    /// Deadline for connecting to a peer learned via advertisement.
    pub connect_timeout_ms: u64,
    /// Maximum simultaneously connected peers.
    pub max_peers: usize,
}

impl Default for MeshConfig {
    fn default() -> MeshConfig {
        MeshConfig {
            listen_port: 7001,
            display_name: String::from("unnamed"),
            loop_timeout_ms: LOOP_TIMEOUT_MS,
            advertise_every_ms: ADVERTISE_EVERY_MS,
            peer_timeout_ms: PEER_TIMEOUT_MS,
            get_next_peer_id_timeout_ms: GET_NEXT_PEER_ID_TIMEOUT_MS,
            connect_timeout_ms: CONNECT_TIMEOUT_MS,
            max_peers: MAX_PEERS,
        }
    }
}

impl MeshConfig {
    /// Loads a configuration from a TOML file, falling back to `Default`
    /// values for any field the file omits.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<MeshConfig, ConfigError> {
        let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }
}

/// Errors encountered while loading a [`MeshConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("could not read config file: {0}")]
    Io(std::io::Error),
    /// The config file was not valid TOML, or was missing required fields.
    #[error("could not parse config file: {0}")]
    Parse(toml::de::Error),
}
