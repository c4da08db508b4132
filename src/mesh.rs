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

//! The mesh layer: identities, membership, liveness and broadcast, on
//! top of a [`Reactor`]'s sequenced-RPC primitives.
//!
//! A `Mesh` is a cheap, cloneable handle over shared state; it holds
//! no thread-safety of its own because it's only ever touched from the
//! reactor thread it was registered against. Every method that talks
//! to the network takes `&mut Reactor<T>` explicitly rather than
//! owning one, so a `Mesh` can be handed a reactor reference from
//! inside a callback as readily as from the embedding application.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::warn;

use crate::config::MeshConfig;
use crate::error::MeshError;
use crate::msg::MeshMessage;
use crate::peer::PeerRecord;
use crate::reactor::Reactor;
use crate::router::{DirectRouter, Router};
use crate::transport::{PeerHandle, TransportHost};

struct Inner {
    local_peer_id: u16,
    next_peer_id: u16,
    display_name: String,
    peers: HashMap<u16, PeerRecord>,
    handle_to_peer_id: HashMap<PeerHandle, u16>,
    router: Box<dyn Router>,
    listeners: Vec<Box<dyn FnMut()>>,
    last_advertise_ms: u64,
}

/// A handle onto one mesh's membership and protocol state.
///
/// Cloning a `Mesh` shares the same underlying state (it's a thin
/// `Rc<RefCell<..>>` wrapper), which is how the closures registered
/// against a [`Reactor`] reach back into it.
#[derive(Clone)]
pub struct Mesh {
    inner: Rc<RefCell<Inner>>,
    config: MeshConfig,
}

impl Mesh {
    /// Builds a mesh with no peers and no assigned identity yet.
    pub fn new(config: MeshConfig) -> Mesh {
        let display_name = config.display_name.clone();
        Mesh {
            inner: Rc::new(RefCell::new(Inner {
                local_peer_id: 0,
                next_peer_id: 0,
                display_name,
                peers: HashMap::new(),
                handle_to_peer_id: HashMap::new(),
                router: Box::new(DirectRouter),
                listeners: Vec::new(),
                last_advertise_ms: 0,
            })),
            config,
        }
    }

    /// Swaps in a non-default [`Router`]. Only meaningful before
    /// `start`.
    pub fn set_router(&self, router: Box<dyn Router>) {
        self.inner.borrow_mut().router = router;
    }

    /// This node's assigned id, or `0` before a successful join.
    pub fn local_peer_id(&self) -> u16 {
        self.inner.borrow().local_peer_id
    }

    /// A snapshot of the current peer table.
    pub fn peers(&self) -> Vec<PeerRecord> {
        self.inner.borrow().peers.values().cloned().collect()
    }

    /// Registers a callback run every time the peer table changes
    /// (join, eviction, disconnect). Order of invocation across
    /// multiple registrations matches registration order.
    pub fn on_peer_list_changed(&self, cb: Box<dyn FnMut()>) {
        self.inner.borrow_mut().listeners.push(cb);
    }

    /// Starts listening on `port` under `display_name`, and wires this
    /// mesh's handlers into `reactor`. Must be called before
    /// `reactor.run()` starts, per the reactor's own registration
    /// contract.
    pub fn start<T: TransportHost>(
        &self,
        reactor: &mut Reactor<T>,
        port: u16,
        display_name: &str,
    ) -> io::Result<bool> {
        self.inner.borrow_mut().display_name = display_name.to_string();
        self.register_handlers(reactor);
        reactor.listen(port)
    }

    /// Attempts to join the mesh through a bootstrap peer at
    /// `addr:port`. `cb` runs once, with the assigned peer id on
    /// success or `None` on connect failure, Hello timeout, or a
    /// malformed Welcome.
    pub fn join<T: TransportHost>(
        &self,
        reactor: &mut Reactor<T>,
        addr: &str,
        port: u16,
        timeout_ms: u64,
        cb: Box<dyn FnOnce(&mut Reactor<T>, Option<u16>)>,
    ) -> io::Result<PeerHandle> {
        let inner = self.inner.clone();
        let display_name = inner.borrow().display_name.clone();
        let cb = Rc::new(RefCell::new(Some(cb)));

        reactor.connect(
            addr,
            port,
            timeout_ms,
            Box::new(move |reactor, connected| {
                let bootstrap_handle = match connected {
                    Some(h) => h,
                    None => {
                        if let Some(cb) = cb.borrow_mut().take() {
                            cb(reactor, None);
                        }
                        return;
                    }
                };

                let hello = MeshMessage::Hello { display_name: display_name.clone() }.encode();
                let inner = inner.clone();
                let cb = cb.clone();
                reactor.send_request(
                    bootstrap_handle,
                    &hello,
                    timeout_ms,
                    Box::new(move |reactor, reply| {
                        let welcome = reply
                            .as_deref()
                            .and_then(|bytes| MeshMessage::decode(bytes).ok())
                            .and_then(|msg| match msg {
                                MeshMessage::Welcome { peer_id, bootstrap_peer_id } => {
                                    Some((peer_id, bootstrap_peer_id))
                                }
                                _ => None,
                            });

                        if let Some((peer_id, bootstrap_peer_id)) = welcome {
                            let now = reactor.now_ms();
                            let (address, bootstrap_port) =
                                reactor.peer_addr(bootstrap_handle).unwrap_or_default();
                            {
                                let mut i = inner.borrow_mut();
                                i.local_peer_id = peer_id;
                                i.next_peer_id = peer_id;
                                let record = PeerRecord::new(
                                    bootstrap_peer_id,
                                    bootstrap_handle,
                                    now,
                                    String::new(),
                                    address,
                                    bootstrap_port,
                                );
                                i.handle_to_peer_id.insert(bootstrap_handle, bootstrap_peer_id);
                                i.peers.insert(bootstrap_peer_id, record);
                            }
                            Mesh::fire_peer_list_changed(&inner);
                        }

                        if let Some(cb) = cb.borrow_mut().take() {
                            cb(reactor, welcome.map(|(peer_id, _)| peer_id));
                        }
                    }),
                );
            }),
        )
    }

    /// Fire-and-forget send to `peer_id`.
    pub fn send<T: TransportHost>(
        &self,
        reactor: &mut Reactor<T>,
        peer_id: u16,
        body: &[u8],
    ) -> Result<(), MeshError> {
        let next_hop = self.route_to(peer_id)?;
        reactor.send(next_hop, body);
        Ok(())
    }

    /// Sequenced request to `peer_id`; `cb` runs once with the reply,
    /// or `None` on timeout.
    pub fn send_request<T: TransportHost>(
        &self,
        reactor: &mut Reactor<T>,
        peer_id: u16,
        body: &[u8],
        timeout_ms: u64,
        cb: Box<dyn FnOnce(&mut Reactor<T>, Option<Vec<u8>>)>,
    ) -> Result<(), MeshError> {
        let next_hop = self.route_to(peer_id)?;
        reactor.send_request(next_hop, body, timeout_ms, cb);
        Ok(())
    }

    /// Fire-and-forget send to every known peer.
    pub fn broadcast<T: TransportHost>(&self, reactor: &mut Reactor<T>, body: &[u8]) {
        let handles = self.all_peer_handles();
        for handle in handles {
            reactor.send(handle, body);
        }
    }

    /// Sequenced request to every known peer, collecting every reply
    /// keyed by peer id. `cb` runs exactly once, after every peer has
    /// either replied or timed out; timed-out peers map to `None`.
    pub fn broadcast_collect<T: TransportHost>(
        &self,
        reactor: &mut Reactor<T>,
        body: Vec<u8>,
        timeout_ms: u64,
        cb: Box<dyn FnOnce(&mut Reactor<T>, HashMap<u16, Option<Vec<u8>>>)>,
    ) {
        let targets: Vec<(u16, PeerHandle)> = {
            let i = self.inner.borrow();
            i.peers.values().map(|p| (p.peer_id, i.router.next_hop(p.handle))).collect()
        };

        if targets.is_empty() {
            cb(reactor, HashMap::new());
            return;
        }

        let results: Rc<RefCell<HashMap<u16, Option<Vec<u8>>>>> =
            Rc::new(RefCell::new(HashMap::new()));
        let remaining = Rc::new(RefCell::new(targets.len()));
        let cb = Rc::new(RefCell::new(Some(cb)));

        for (peer_id, handle) in targets {
            let results = results.clone();
            let remaining = remaining.clone();
            let cb = cb.clone();
            reactor.send_request(
                handle,
                &body,
                timeout_ms,
                Box::new(move |reactor, reply| {
                    results.borrow_mut().insert(peer_id, reply);
                    *remaining.borrow_mut() -= 1;
                    if *remaining.borrow() == 0 {
                        if let Some(cb) = cb.borrow_mut().take() {
                            let map = results.borrow().clone();
                            cb(reactor, map);
                        }
                    }
                }),
            );
        }
    }

    fn route_to(&self, peer_id: u16) -> Result<PeerHandle, MeshError> {
        let i = self.inner.borrow();
        let handle = i.peers.get(&peer_id).map(|p| p.handle).ok_or(MeshError::UnknownPeer(peer_id))?;
        Ok(i.router.next_hop(handle))
    }

    fn all_peer_handles(&self) -> Vec<PeerHandle> {
        let i = self.inner.borrow();
        i.peers.values().map(|p| i.router.next_hop(p.handle)).collect()
    }

    fn register_handlers<T: TransportHost>(&self, reactor: &mut Reactor<T>) {
        let inner = self.inner.clone();
        let config = self.config.clone();
        reactor.on_data(Box::new(move |reactor, handle, payload, send_seq| {
            Mesh::handle_data(&inner, &config, reactor, handle, payload, send_seq);
        }));

        let inner = self.inner.clone();
        reactor.on_peer_disconnect(Box::new(move |_reactor, handle| {
            Mesh::handle_disconnect(&inner, handle);
        }));

        let inner = self.inner.clone();
        let config = self.config.clone();
        reactor.run_on_tick(Box::new(move |reactor| {
            Mesh::tick(&inner, &config, reactor);
        }));
    }

    fn handle_data<T: TransportHost>(
        inner: &Rc<RefCell<Inner>>,
        config: &MeshConfig,
        reactor: &mut Reactor<T>,
        handle: PeerHandle,
        payload: &[u8],
        send_seq: u16,
    ) {
        let msg = match MeshMessage::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!("dropping malformed mesh message from {}: {}", handle, e);
                return;
            }
        };

        // send_seq is 0 on every reply packet (see Reactor::send_reply), so
        // gating the request-shaped tags on send_seq != 0 keeps an
        // untagged GetNextPeerId reply from ever being misread as a fresh
        // Hello/GetNextPeerId/Ping request.
        match msg {
            MeshMessage::Hello { display_name } if send_seq != 0 => {
                Mesh::handle_hello(inner.clone(), config.clone(), reactor, handle, send_seq, display_name);
            }
            MeshMessage::GetNextPeerId if send_seq != 0 => {
                let next = {
                    let mut i = inner.borrow_mut();
                    i.next_peer_id = i.next_peer_id.wrapping_add(1);
                    i.next_peer_id
                };
                let mut reply = Vec::with_capacity(2);
                reply.write_u16::<LittleEndian>(next).unwrap();
                reactor.send_reply(handle, send_seq, &reply);
            }
            MeshMessage::Ping if send_seq != 0 => {
                reactor.send_reply(handle, send_seq, &MeshMessage::Pong.encode());
            }
            MeshMessage::Peer { peer_id, rtt_ms, addr, port } => {
                Mesh::handle_peer_advertisement(inner, config, reactor, peer_id, rtt_ms, addr, port);
            }
            MeshMessage::Application { tag, body } => {
                log::debug!("unhandled application tag {} ({} bytes) from {}", tag, body.len(), handle);
            }
            _ => {}
        }
    }

    fn handle_hello<T: TransportHost>(
        inner: Rc<RefCell<Inner>>,
        config: MeshConfig,
        reactor: &mut Reactor<T>,
        joiner_handle: PeerHandle,
        hello_seq: u16,
        display_name: String,
    ) {
        // Bump our own counter before broadcasting, per the concurrent-Hello
        // design note: this at least serializes this node's own view even
        // though two different bootstraps can't coordinate with each other.
        let own_next = {
            let mut i = inner.borrow_mut();
            i.next_peer_id = i.next_peer_id.wrapping_add(1);
            i.next_peer_id
        };

        let peer_handles: Vec<PeerHandle> = inner.borrow().peers.values().map(|p| p.handle).collect();
        let request = MeshMessage::GetNextPeerId.encode();
        let timeout_ms = config.get_next_peer_id_timeout_ms;

        if peer_handles.is_empty() {
            Mesh::finish_hello(&inner, reactor, joiner_handle, hello_seq, display_name, own_next);
            return;
        }

        let results: Rc<RefCell<Vec<u16>>> = Rc::new(RefCell::new(Vec::new()));
        let remaining = Rc::new(RefCell::new(peer_handles.len()));

        for peer_handle in peer_handles {
            let inner = inner.clone();
            let results = results.clone();
            let remaining = remaining.clone();
            let joiner_handle = joiner_handle;
            let display_name = display_name.clone();

            reactor.send_request(
                peer_handle,
                &request,
                timeout_ms,
                Box::new(move |reactor, reply| {
                    if let Some(bytes) = reply {
                        if bytes.len() == 2 {
                            let proposed = (&bytes[..]).read_u16::<LittleEndian>().unwrap_or(0);
                            results.borrow_mut().push(proposed);
                        }
                    }
                    *remaining.borrow_mut() -= 1;
                    if *remaining.borrow() == 0 {
                        let assigned = results.borrow().iter().cloned().max().unwrap_or(own_next).max(own_next);
                        Mesh::finish_hello(&inner, reactor, joiner_handle, hello_seq, display_name, assigned);
                    }
                }),
            );
        }
    }

    fn finish_hello<T: TransportHost>(
        inner: &Rc<RefCell<Inner>>,
        reactor: &mut Reactor<T>,
        joiner_handle: PeerHandle,
        hello_seq: u16,
        display_name: String,
        assigned_id: u16,
    ) {
        let now = reactor.now_ms();
        let (address, port) = reactor.peer_addr(joiner_handle).unwrap_or_default();

        {
            let mut i = inner.borrow_mut();
            if let Some(existing) = i.peers.get(&assigned_id) {
                if existing.handle != joiner_handle {
                    warn!(
                        "duplicate peer id {} assigned: existing handle {}, new joiner handle {}",
                        assigned_id, existing.handle, joiner_handle
                    );
                }
            }
            let record = PeerRecord::new(assigned_id, joiner_handle, now, display_name, address, port);
            i.handle_to_peer_id.insert(joiner_handle, assigned_id);
            i.peers.insert(assigned_id, record);
        }

        let bootstrap_peer_id = inner.borrow().local_peer_id;
        let welcome =
            MeshMessage::Welcome { peer_id: assigned_id, bootstrap_peer_id }.encode();
        reactor.send_reply(joiner_handle, hello_seq, &welcome);
        Mesh::fire_peer_list_changed(inner);
    }

    fn handle_peer_advertisement<T: TransportHost>(
        inner: &Rc<RefCell<Inner>>,
        config: &MeshConfig,
        reactor: &mut Reactor<T>,
        peer_id: u16,
        rtt_ms: u32,
        addr: String,
        port: u16,
    ) {
        let local_id = inner.borrow().local_peer_id;
        if peer_id == local_id {
            return;
        }

        let now = reactor.now_ms();
        let known = inner.borrow().peers.contains_key(&peer_id);
        if known {
            let mut i = inner.borrow_mut();
            if let Some(record) = i.peers.get_mut(&peer_id) {
                if record.address != addr || record.port != port {
                    warn!(
                        "duplicate peer id {} advertised from {}:{}, already known at {}:{}",
                        peer_id, addr, port, record.address, record.port
                    );
                }
                record.rtt_ms = rtt_ms;
                record.last_seen_ms = now;
            }
            return;
        }

        let inner = inner.clone();
        let addr_for_record = addr.clone();
        let _ = reactor.connect(
            &addr,
            port,
            config.connect_timeout_ms,
            Box::new(move |reactor, connected| {
                let new_handle = match connected {
                    Some(h) => h,
                    None => return,
                };
                let now = reactor.now_ms();
                {
                    let mut i = inner.borrow_mut();
                    if i.peers.contains_key(&peer_id) {
                        return;
                    }
                    let record =
                        PeerRecord::new(peer_id, new_handle, now, String::new(), addr_for_record, port);
                    i.handle_to_peer_id.insert(new_handle, peer_id);
                    i.peers.insert(peer_id, record);
                }
                Mesh::fire_peer_list_changed(&inner);
            }),
        );
    }

    fn handle_disconnect(inner: &Rc<RefCell<Inner>>, handle: PeerHandle) {
        let peer_id = inner.borrow_mut().handle_to_peer_id.remove(&handle);
        if let Some(peer_id) = peer_id {
            inner.borrow_mut().peers.remove(&peer_id);
            Mesh::fire_peer_list_changed(inner);
        }
    }

    fn tick<T: TransportHost>(inner: &Rc<RefCell<Inner>>, config: &MeshConfig, reactor: &mut Reactor<T>) {
        let now = reactor.now_ms();
        Mesh::maybe_advertise(inner, config, reactor, now);
        Mesh::evict_dead_peers(inner, config, reactor, now);
    }

    fn maybe_advertise<T: TransportHost>(
        inner: &Rc<RefCell<Inner>>,
        config: &MeshConfig,
        reactor: &mut Reactor<T>,
        now: u64,
    ) {
        let due = {
            let i = inner.borrow();
            now.saturating_sub(i.last_advertise_ms) >= config.advertise_every_ms
        };
        if !due {
            return;
        }
        inner.borrow_mut().last_advertise_ms = now;

        let peer_ids: Vec<u16> = inner.borrow().peers.keys().cloned().collect();
        for peer_id in peer_ids {
            let handle = match inner.borrow().peers.get(&peer_id) {
                Some(p) => p.handle,
                None => continue,
            };
            let inner = inner.clone();
            let sent_at = now;

            reactor.send_request(
                handle,
                &MeshMessage::Ping.encode(),
                config.advertise_every_ms,
                Box::new(move |reactor, reply| {
                    let replied = reply.is_some();
                    let rtt_ms = reactor.now_ms().saturating_sub(sent_at) as u32;

                    let (local_id, addr, port) = {
                        let mut i = inner.borrow_mut();
                        let record = match i.peers.get_mut(&peer_id) {
                            Some(r) => r,
                            None => return,
                        };
                        record.last_seen_ms = reactor.now_ms();
                        if replied {
                            record.rtt_ms = rtt_ms;
                        }
                        (i.local_peer_id, i.peers[&peer_id].address.clone(), i.peers[&peer_id].port)
                    };

                    if !replied {
                        return;
                    }

                    let advertisement = MeshMessage::Peer { peer_id, rtt_ms, addr, port }.encode();
                    let others: Vec<PeerHandle> = inner
                        .borrow()
                        .peers
                        .values()
                        .filter(|p| p.peer_id != local_id && p.peer_id != peer_id)
                        .map(|p| p.handle)
                        .collect();
                    for other in others {
                        reactor.send(other, &advertisement);
                    }
                }),
            );
        }
    }

    fn evict_dead_peers<T: TransportHost>(
        inner: &Rc<RefCell<Inner>>,
        config: &MeshConfig,
        reactor: &mut Reactor<T>,
        now: u64,
    ) {
        let dead: Vec<(u16, PeerHandle)> = inner
            .borrow()
            .peers
            .values()
            .filter(|p| now.saturating_sub(p.last_seen_ms) > config.peer_timeout_ms)
            .map(|p| (p.peer_id, p.handle))
            .collect();

        if dead.is_empty() {
            return;
        }

        {
            let mut i = inner.borrow_mut();
            for (peer_id, handle) in &dead {
                i.peers.remove(peer_id);
                i.handle_to_peer_id.remove(handle);
            }
        }
        for (_, handle) in &dead {
            reactor.disconnect(*handle);
        }
        Mesh::fire_peer_list_changed(inner);
    }

    fn fire_peer_list_changed(inner: &Rc<RefCell<Inner>>) {
        let mut listeners = std::mem::take(&mut inner.borrow_mut().listeners);
        for l in listeners.iter_mut() {
            l();
        }
        inner.borrow_mut().listeners = listeners;
    }
}
