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

//! A small single-threaded mesh networking runtime: a sequenced-RPC
//! reactor driven against a pluggable [`transport::TransportHost`],
//! and a mesh layer on top of it handling identity assignment,
//! membership, liveness and broadcast.
//!
//! Typical use builds a [`mesh::Mesh`], registers it against a
//! [`reactor::Reactor`] via [`mesh::Mesh::start`], optionally joins an
//! existing mesh with [`mesh::Mesh::join`], and then runs the reactor
//! on its own dedicated thread.

#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]

pub mod clock;
pub mod config;
pub mod deadline;
pub mod error;
pub mod logging;
pub mod mesh;
pub mod msg;
pub mod peer;
pub mod reactor;
pub mod router;
pub mod transport;

pub use config::MeshConfig;
pub use error::MeshError;
pub use mesh::Mesh;
pub use msg::MeshMessage;
pub use peer::PeerRecord;
pub use reactor::{Reactor, ReactorHandle};
pub use router::{DirectRouter, Router};
pub use transport::{PeerHandle, TransportEvent, TransportHost};
