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

//! The transport host boundary.
//!
//! Everything in this module is an external collaborator: an ordered,
//! reliable datagram library (an ENet-style host, or similar) that the
//! reactor drives from its single dedicated thread. This crate does not
//! implement one; it only defines the trait the reactor needs and a
//! `PeerHandle` type opaque enough to be backed by a socket, a session
//! id, or anything else a real host cares to use.

use std::io;

/// Opaque, non-owning reference to a connected transport host session.
///
/// Two handles are equal iff they refer to the same session. The mesh
/// layer never allocates these; it only ever receives them from the
/// transport host via [`TransportEvent::Connect`] or is handed one back
/// from [`TransportHost::connect`] completing.
pub type PeerHandle = u64;

/// One event emitted by a single call to [`TransportHost::poll`].
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A previously-requested outbound connection completed, or an
    /// inbound connection was accepted.
    Connect(PeerHandle),
    /// A reliable datagram arrived from `handle`.
    Receive(PeerHandle, Vec<u8>),
    /// `handle`'s session was torn down, locally or remotely.
    Disconnect(PeerHandle),
}

/// An ordered, reliable datagram channel to a small set of peers.
///
/// A real implementation wraps something like an ENet host: `listen`
/// opens a UDP socket and starts accepting inbound sessions, `connect`
/// begins an asynchronous handshake whose completion later surfaces as
/// a `TransportEvent::Connect` from `poll`, and `send` is fire-and-forget
/// at this layer (reliability and ordering are the host's job, not the
/// reactor's).
pub trait TransportHost: Send {
    /// Starts listening on `port`. Returns `Ok(true)` if this call
    /// transitioned the host from idle to listening, `Ok(false)` if it
    /// was already listening.
    fn listen(&mut self, port: u16) -> io::Result<bool>;

    /// Begins connecting to `addr:port` and returns the handle of the
    /// half-open session immediately. Whether the connection actually
    /// succeeds is reported asynchronously: a later `poll` call reports
    /// either `TransportEvent::Connect(handle)` on success or
    /// `TransportEvent::Disconnect(handle)` on failure, for this same
    /// handle.
    fn connect(&mut self, addr: &str, port: u16) -> io::Result<PeerHandle>;

    /// Begins a graceful disconnect of `handle`. The session is only
    /// actually removed when `poll` later reports its disconnect.
    fn disconnect(&mut self, handle: PeerHandle);

    /// Best-effort send of an already-framed packet to `handle`. No
    /// retry is performed at this layer; `Err` only reflects a local
    /// failure to hand the datagram to the host.
    fn send(&mut self, handle: PeerHandle, data: &[u8]) -> io::Result<()>;

    /// Blocks for up to `timeout_ms` waiting for a single event. Returns
    /// `None` on a timeout with nothing to report.
    fn poll(&mut self, timeout_ms: u64) -> io::Result<Option<TransportEvent>>;

    /// Best-effort remote address for a connected session, used to
    /// populate [`crate::peer::PeerRecord::address`] and `.port`.
    fn peer_addr(&self, handle: PeerHandle) -> Option<(String, u16)>;

    /// Hints that the next `poll` should not block its full timeout.
    /// Implementations backed by a real socket typically do this with a
    /// self-pipe or an eventfd. The reactor calls this once per loop
    /// iteration, right after draining any packets a foreign thread
    /// enqueued through a [`crate::reactor::ReactorHandle`], so the next
    /// `poll` doesn't sit out its full timeout before the host notices
    /// there's fresh outbound traffic.
    fn wake(&mut self) {}
}
