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

//! The sequenced-RPC layer: a single-threaded reactor that drives a
//! [`TransportHost`], frames every packet with a `(send_seq, reply_seq)`
//! pair, and matches replies back to the callback that sent the
//! original request.
//!
//! A `Reactor` is meant to live on one dedicated thread for its whole
//! life: build it, register handlers and tick functions, then call
//! `run` (or drive `run_once` in a loop, as the tests do). The only
//! thing safe to do from another thread is fire off an unsequenced
//! send through a cloned [`ReactorHandle`].

use std::io;
use std::sync::mpsc;

use log::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::deadline::DeadlineRegistry;
use crate::msg::{frame, unframe};
use crate::transport::{PeerHandle, TransportEvent, TransportHost};

/// Runs once, against the result of a sequenced request: either the
/// matching reply payload, or `None` if the request timed out or the
/// reactor was shut down with it still pending.
pub type PacketCallback<T> = Box<dyn FnOnce(&mut Reactor<T>, Option<Vec<u8>>)>;

/// Runs once, against the outcome of a `connect` call: `Some(handle)`
/// on success, `None` on failure or timeout.
pub type ConnectCallback<T> = Box<dyn FnOnce(&mut Reactor<T>, Option<PeerHandle>)>;

/// Runs for every inbound packet, on every registered handler, in
/// registration order. `send_seq` is `0` if the sender expects no
/// reply; otherwise the handler may call [`Reactor::send_reply`] with
/// it to answer.
pub type DataHandler<T> = Box<dyn FnMut(&mut Reactor<T>, PeerHandle, &[u8], u16)>;

/// Runs once per peer disconnect, after the pending-connection table
/// has had its chance to treat the event as a failed connect attempt.
pub type DisconnectHandler<T> = Box<dyn FnMut(&mut Reactor<T>, PeerHandle)>;

/// Runs once per reactor loop iteration, before any event dispatch.
pub type TickFn<T> = Box<dyn FnMut(&mut Reactor<T>)>;

/// A cheap, cloneable, thread-safe handle to a running [`Reactor`].
///
/// This is the only way to reach a reactor from a thread other than
/// the one driving it, and it only exposes the one operation the
/// reactor's concurrency model calls safe off-thread: an unsequenced
/// send. The reactor drains these on every loop iteration.
#[derive(Clone)]
pub struct ReactorHandle {
    outbound_tx: mpsc::Sender<(PeerHandle, Vec<u8>)>,
}

impl ReactorHandle {
    /// Enqueues a fire-and-forget send, to be written to the transport
    /// host on the reactor's own thread.
    pub fn send(&self, handle: PeerHandle, payload: &[u8]) {
        let _ = self.outbound_tx.send((handle, frame(0, 0, payload)));
    }
}

/// Drives a [`TransportHost`], matching sequenced replies to the
/// callback that issued the request.
pub struct Reactor<T: TransportHost> {
    host: T,
    clock: Box<dyn Clock>,
    is_listening: bool,
    sequence_counter: u16,
    packet_callbacks: DeadlineRegistry<u16, PacketCallback<T>>,
    pending_connections: DeadlineRegistry<PeerHandle, ConnectCallback<T>>,
    data_handlers: Vec<DataHandler<T>>,
    disconnect_handlers: Vec<DisconnectHandler<T>>,
    tick_fns: Vec<TickFn<T>>,
    outbound_tx: mpsc::Sender<(PeerHandle, Vec<u8>)>,
    outbound_rx: mpsc::Receiver<(PeerHandle, Vec<u8>)>,
    loop_timeout_ms: u64,
    running: bool,
}

impl<T: TransportHost> Reactor<T> {
    /// Builds a reactor over `host`, with the real system clock and
    /// the given poll timeout. Registers the two built-in tick
    /// functions (outbound queue drain, pending-callback timeout
    /// sweep) ahead of any caller-registered ones.
    pub fn new(host: T, loop_timeout_ms: u64) -> Reactor<T> {
        Reactor::with_clock(host, loop_timeout_ms, Box::new(SystemClock::new()))
    }

    /// As [`Reactor::new`], but with an injectable clock, for tests
    /// that need to fast-forward past a deadline without sleeping.
    pub fn with_clock(host: T, loop_timeout_ms: u64, clock: Box<dyn Clock>) -> Reactor<T> {
        let (outbound_tx, outbound_rx) = mpsc::channel();
        let mut reactor = Reactor {
            host,
            clock,
            is_listening: false,
            sequence_counter: 0,
            packet_callbacks: DeadlineRegistry::new(),
            pending_connections: DeadlineRegistry::new(),
            data_handlers: Vec::new(),
            disconnect_handlers: Vec::new(),
            tick_fns: Vec::new(),
            outbound_tx,
            outbound_rx,
            loop_timeout_ms,
            running: true,
        };
        reactor.run_on_tick(Box::new(|r| r.drain_outbound()));
        reactor.run_on_tick(Box::new(|r| r.sweep_timeouts()));
        reactor
    }

    /// A cloneable handle other threads can use to send through this
    /// reactor.
    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle { outbound_tx: self.outbound_tx.clone() }
    }

    /// Current time, per this reactor's clock.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// True once [`Reactor::listen`] has successfully bound a socket.
    pub fn is_listening(&self) -> bool {
        self.is_listening
    }

    /// Starts listening on `port`. See [`TransportHost::listen`].
    pub fn listen(&mut self, port: u16) -> io::Result<bool> {
        let newly = self.host.listen(port)?;
        if newly {
            self.is_listening = true;
        }
        Ok(newly)
    }

    /// Begins connecting to `addr:port`. `cb` runs once, on this
    /// reactor's thread, with the new peer's handle on success or
    /// `None` on failure or timeout.
    pub fn connect(
        &mut self,
        addr: &str,
        port: u16,
        timeout_ms: u64,
        cb: ConnectCallback<T>,
    ) -> io::Result<PeerHandle> {
        let handle = self.host.connect(addr, port)?;
        let now = self.clock.now_ms();
        self.pending_connections.insert(handle, cb, now, timeout_ms);
        Ok(handle)
    }

    /// Begins a graceful disconnect of `handle`.
    pub fn disconnect(&mut self, handle: PeerHandle) {
        self.host.disconnect(handle);
    }

    /// Best-effort remote address for `handle`. See
    /// [`TransportHost::peer_addr`].
    pub fn peer_addr(&self, handle: PeerHandle) -> Option<(String, u16)> {
        self.host.peer_addr(handle)
    }

    /// Fire-and-forget send: frames `payload` with no reply expected.
    /// Safe to call only from the reactor's own thread; other threads
    /// must go through [`Reactor::handle`].
    pub fn send(&mut self, handle: PeerHandle, payload: &[u8]) {
        let framed = frame(0, 0, payload);
        if let Err(e) = self.host.send(handle, &framed) {
            warn!("send to {} failed: {}", handle, e);
        }
    }

    /// Sends `payload` as a new sequenced request. `cb` runs once the
    /// matching reply arrives, or with `None` on timeout.
    pub fn send_request(
        &mut self,
        handle: PeerHandle,
        payload: &[u8],
        timeout_ms: u64,
        cb: PacketCallback<T>,
    ) {
        let seq = self.next_seq();
        let now = self.clock.now_ms();
        self.packet_callbacks.insert(seq, cb, now, timeout_ms);
        let framed = frame(seq, 0, payload);
        if let Err(e) = self.host.send(handle, &framed) {
            warn!("send_request to {} failed: {}", handle, e);
        }
    }

    /// Replies to the message whose `send_seq` was `reply_to_seq`.
    pub fn send_reply(&mut self, handle: PeerHandle, reply_to_seq: u16, payload: &[u8]) {
        let framed = frame(0, reply_to_seq, payload);
        if let Err(e) = self.host.send(handle, &framed) {
            warn!("send_reply to {} failed: {}", handle, e);
        }
    }

    /// Registers a handler run on every inbound packet.
    pub fn on_data(&mut self, handler: DataHandler<T>) {
        self.data_handlers.push(handler);
    }

    /// Registers a handler run on every peer disconnect that isn't a
    /// failed connect attempt.
    pub fn on_peer_disconnect(&mut self, handler: DisconnectHandler<T>) {
        self.disconnect_handlers.push(handler);
    }

    /// Registers a function run once per loop iteration.
    pub fn run_on_tick(&mut self, tick_fn: TickFn<T>) {
        self.tick_fns.push(tick_fn);
    }

    /// Requests that [`Reactor::run`] stop after the current
    /// iteration, and cancels every pending callback immediately
    /// (each runs once, with `None`).
    pub fn shutdown(&mut self) {
        self.running = false;
        for (_, cb) in self.packet_callbacks.drain_all() {
            cb(self, None);
        }
        for (_, cb) in self.pending_connections.drain_all() {
            cb(self, None);
        }
    }

    /// Runs the reactor until [`Reactor::shutdown`] is called.
    pub fn run(&mut self) -> io::Result<()> {
        while self.running {
            self.run_once()?;
        }
        Ok(())
    }

    /// Runs exactly one poll-tick-dispatch cycle. Exposed for tests
    /// and for embedders that want to interleave their own work with
    /// the reactor loop.
    pub fn run_once(&mut self) -> io::Result<()> {
        let event = self.host.poll(self.loop_timeout_ms)?;
        self.dispatch_tick();
        if let Some(event) = event {
            match event {
                TransportEvent::Connect(handle) => self.dispatch_connect(handle),
                TransportEvent::Receive(handle, data) => self.dispatch_receive(handle, &data),
                TransportEvent::Disconnect(handle) => self.dispatch_disconnect(handle),
            }
        }
        Ok(())
    }

    fn next_seq(&mut self) -> u16 {
        self.sequence_counter = self.sequence_counter.wrapping_add(1);
        if self.sequence_counter == 0 {
            self.sequence_counter = 1;
        }
        self.sequence_counter
    }

    fn drain_outbound(&mut self) {
        let mut drained = false;
        while let Ok((handle, framed)) = self.outbound_rx.try_recv() {
            drained = true;
            if let Err(e) = self.host.send(handle, &framed) {
                warn!("queued send to {} failed: {}", handle, e);
            }
        }
        // A foreign thread may have enqueued this while `poll` was already
        // blocking for the prior iteration's full timeout, so prod the host
        // to shorten the *next* poll instead of waiting it out again.
        if drained {
            self.host.wake();
        }
    }

    fn sweep_timeouts(&mut self) {
        let now = self.clock.now_ms();
        let expired_packets = self.packet_callbacks.sweep_expired(now);
        for (seq, cb) in expired_packets {
            debug!("evicting timed-out request seq {}", seq);
            cb(self, None);
        }
        let expired_conns = self.pending_connections.sweep_expired(now);
        for (handle, cb) in expired_conns {
            debug!("evicting timed-out pending connect to {}", handle);
            cb(self, None);
        }
    }

    fn dispatch_tick(&mut self) {
        let mut tick_fns = std::mem::take(&mut self.tick_fns);
        for f in tick_fns.iter_mut() {
            f(self);
        }
        self.tick_fns = tick_fns;
    }

    fn dispatch_connect(&mut self, handle: PeerHandle) {
        debug!("connect event for {}", handle);
        if let Some(cb) = self.pending_connections.remove(&handle) {
            cb(self, Some(handle));
        }
    }

    fn dispatch_receive(&mut self, handle: PeerHandle, data: &[u8]) {
        let (send_seq, reply_seq, payload) = match unframe(data) {
            Ok(v) => v,
            Err(e) => {
                warn!("dropping malformed packet from {}: {}", handle, e);
                return;
            }
        };
        let payload = payload.to_vec();
        debug!(
            "receive from {}: send_seq {}, reply_seq {}, {} byte(s)",
            handle,
            send_seq,
            reply_seq,
            payload.len()
        );

        if reply_seq != 0 {
            if let Some(cb) = self.packet_callbacks.remove(&reply_seq) {
                cb(self, Some(payload.clone()));
            }
        }

        let mut handlers = std::mem::take(&mut self.data_handlers);
        for h in handlers.iter_mut() {
            h(self, handle, &payload, send_seq);
        }
        self.data_handlers = handlers;
    }

    /// Direct access to the transport host double, for tests in other
    /// modules that need to seed canned events or inspect sent bytes.
    #[cfg(test)]
    pub fn host_mut(&mut self) -> &mut T {
        &mut self.host
    }

    fn dispatch_disconnect(&mut self, handle: PeerHandle) {
        debug!("disconnect event for {}", handle);
        if let Some(cb) = self.pending_connections.remove(&handle) {
            cb(self, None);
            return;
        }

        let mut handlers = std::mem::take(&mut self.disconnect_handlers);
        for h in handlers.iter_mut() {
            h(self, handle);
        }
        self.disconnect_handlers = handlers;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// A transport host double driven entirely by a queue of canned
    /// events, with sent packets captured for inspection.
    #[derive(Default)]
    struct FakeHost {
        events: VecDeque<TransportEvent>,
        sent: Rc<RefCell<Vec<(PeerHandle, Vec<u8>)>>>,
        next_handle: PeerHandle,
    }

    impl TransportHost for FakeHost {
        fn listen(&mut self, _port: u16) -> io::Result<bool> {
            Ok(true)
        }

        fn connect(&mut self, _addr: &str, _port: u16) -> io::Result<PeerHandle> {
            self.next_handle += 1;
            Ok(self.next_handle)
        }

        fn disconnect(&mut self, _handle: PeerHandle) {}

        fn send(&mut self, handle: PeerHandle, data: &[u8]) -> io::Result<()> {
            self.sent.borrow_mut().push((handle, data.to_vec()));
            Ok(())
        }

        fn poll(&mut self, _timeout_ms: u64) -> io::Result<Option<TransportEvent>> {
            Ok(self.events.pop_front())
        }

        fn peer_addr(&self, _handle: PeerHandle) -> Option<(String, u16)> {
            None
        }
    }

    #[test]
    fn send_request_invokes_callback_on_matching_reply() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut host = FakeHost { sent: sent.clone(), ..Default::default() };
        host.events.push_back(TransportEvent::Receive(1, frame(0, 1, b"pong")));

        let mut reactor = Reactor::new(host, 1000);
        let got: Rc<RefCell<Option<Vec<u8>>>> = Rc::new(RefCell::new(None));
        let got_clone = got.clone();
        reactor.send_request(
            1,
            b"ping",
            1000,
            Box::new(move |_r, payload| {
                *got_clone.borrow_mut() = payload;
            }),
        );

        reactor.run_once().unwrap();
        assert_eq!(*got.borrow(), Some(b"pong".to_vec()));

        let sent = sent.borrow();
        assert_eq!(sent.len(), 1);
        let (_, seq, _) = unframe(&sent[0].1).unwrap();
        assert_eq!(seq, 0);
    }

    #[test]
    fn pending_request_times_out_with_none() {
        let clock = ManualClock::new(0);
        let host = FakeHost::default();
        let mut reactor = Reactor::with_clock(host, 1000, Box::new(clock.clone()));

        let timed_out = Rc::new(RefCell::new(false));
        let timed_out_clone = timed_out.clone();
        reactor.send_request(
            1,
            b"ping",
            500,
            Box::new(move |_r, payload| {
                *timed_out_clone.borrow_mut() = payload.is_none();
            }),
        );

        clock.advance(600);
        reactor.run_once().unwrap();
        assert!(*timed_out.borrow());
    }

    #[test]
    fn data_handlers_see_send_seq_and_can_reply() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let mut host = FakeHost { sent: sent.clone(), ..Default::default() };
        host.events.push_back(TransportEvent::Receive(1, frame(7, 0, b"hello")));

        let mut reactor = Reactor::new(host, 1000);
        reactor.on_data(Box::new(|r, handle, payload, send_seq| {
            assert_eq!(payload, b"hello");
            assert_eq!(send_seq, 7);
            r.send_reply(handle, send_seq, b"world");
        }));

        reactor.run_once().unwrap();

        let sent = sent.borrow();
        assert_eq!(sent.len(), 1);
        let (send_seq, reply_seq, payload) = unframe(&sent[0].1).unwrap();
        assert_eq!(send_seq, 0);
        assert_eq!(reply_seq, 7);
        assert_eq!(payload, b"world");
    }

    #[test]
    fn connect_failure_surfaces_as_disconnect_of_the_pending_handle() {
        let host = FakeHost::default();
        let mut reactor = Reactor::new(host, 1000);

        let ok = Rc::new(RefCell::new(true));
        let ok_clone = ok.clone();
        let handle = reactor
            .connect(
                "10.0.0.1",
                7001,
                1000,
                Box::new(move |_r, result| {
                    *ok_clone.borrow_mut() = result.is_some();
                }),
            )
            .unwrap();

        reactor.host.events.push_back(TransportEvent::Disconnect(handle));
        reactor.run_once().unwrap();
        assert!(!*ok.borrow());
    }

    #[test]
    fn sequence_numbers_skip_zero_on_wraparound() {
        let host = FakeHost::default();
        let mut reactor = Reactor::new(host, 1000);
        reactor.sequence_counter = u16::MAX;
        assert_eq!(reactor.next_seq(), 1);
    }

    #[test]
    fn foreign_handle_send_is_drained_on_next_tick() {
        let sent = Rc::new(RefCell::new(Vec::new()));
        let host = FakeHost { sent: sent.clone(), ..Default::default() };
        let mut reactor = Reactor::new(host, 1000);

        let handle = reactor.handle();
        handle.send(3, b"from another thread");

        reactor.run_once().unwrap();
        let sent = sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 3);
    }
}
