// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The session-management control transport: a reliable datagram channel
//! used only for SM packets (connect/disconnect/reset), never for
//! application payload.
//!
//! [`ControlTransport`] is the capability set the SM thread (§4.6) depends
//! on; [`UdpControlTransport`] is the one implementation this core ships —
//! a `mio`-driven UDP socket plus a small sequence-numbered ack/retransmit
//! shim that earns the "reliable" in "reliable datagram library" without
//! requiring an external RDMA-only dependency to build and test the Nexus.
//! A production deployment may swap in a different implementation of the
//! same trait (see the "polymorphism over transport" design note).

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs};
use std::thread;
use std::time::{Duration, Instant};

use mio::net::UdpSocket as MioUdpSocket;
use mio::{Events, Interest, Poll, Token};
use socket2::{Domain, Protocol, Socket, Type};

use crate::config::SM_DNS_RESOLVE_TIMEOUT;
use crate::hook::PeerHandle;

const SOCKET_TOKEN: Token = Token(0);
const MAX_DATAGRAM: usize = 1500;
const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(100);
const MAX_RETRANSMITS: u32 = 5;

const FRAME_HELLO: u8 = 0;
const FRAME_HELLO_ACK: u8 = 1;
const FRAME_DATA: u8 = 2;
const FRAME_ACK: u8 = 3;
const FRAME_CLOSE: u8 = 4;

/// Whether a peer was created by an outbound `connect()` (client) or by
/// receiving an unsolicited datagram from a new address (server). Mirrors
/// the spec's "peer's opaque pointer is null iff server-mode" discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerMode {
    Client,
    Server,
}

/// Events yielded by [`ControlTransport::service`].
#[derive(Debug)]
pub enum CtEvent {
    Connected { peer: PeerHandle, mode: PeerMode },
    Received { peer: PeerHandle, payload: Vec<u8> },
    Disconnected { peer: PeerHandle, mode: PeerMode },
}

/// Capability set the SM thread depends on (§4.9, §6).
pub trait ControlTransport: Send {
    /// Bind a host to `port`.
    fn bind(port: u16) -> io::Result<Self>
    where
        Self: Sized;

    /// Begin an outbound connection to `(hostname, port)`. Returns a
    /// client-mode peer handle immediately (the connection is not yet
    /// established — a `Connected` event confirms it).
    fn connect(&mut self, hostname: &str, port: u16) -> io::Result<PeerHandle>;

    /// Service the transport for up to `timeout`, returning any events.
    fn service(&mut self, timeout: Duration) -> Vec<CtEvent>;

    /// Reliably send `payload` to `peer`.
    fn send(&mut self, peer: PeerHandle, payload: &[u8]) -> io::Result<()>;

    /// Close a peer and release its resources.
    fn close(&mut self, peer: PeerHandle);
}

/// Resolve `(hostname, port)` to a `SocketAddr`, bounded by
/// [`SM_DNS_RESOLVE_TIMEOUT`] (§9's resolved open question: DNS resolution
/// never blocks the SM loop indefinitely).
///
/// `to_socket_addrs` has no cancellation hook, so resolution runs on a
/// detached helper thread; if it doesn't answer within the deadline this
/// returns a timeout error and abandons the thread, which still exits on
/// its own once the resolver returns.
fn resolve_bounded(hostname: &str, port: u16) -> io::Result<SocketAddr> {
    let target = format!("{hostname}:{port}");
    let (tx, rx) = std::sync::mpsc::channel();
    let spawned = thread::Builder::new()
        .name("nexus-sm-dns".to_string())
        .spawn(move || {
            let result = target
                .to_socket_addrs()
                .map(|mut addrs| addrs.next())
                .map_err(|e| e.to_string());
            let _ = tx.send(result);
        });
    if spawned.is_err() {
        return Err(io::Error::new(io::ErrorKind::Other, "failed to spawn DNS resolver thread"));
    }

    match rx.recv_timeout(SM_DNS_RESOLVE_TIMEOUT) {
        Ok(Ok(Some(addr))) => Ok(addr),
        Ok(Ok(None)) => Err(io::Error::new(
            io::ErrorKind::NotFound,
            "unresolvable hostname",
        )),
        Ok(Err(msg)) => Err(io::Error::new(io::ErrorKind::NotFound, msg)),
        Err(_) => Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "DNS resolution exceeded SM_DNS_RESOLVE_TIMEOUT",
        )),
    }
}

struct PendingFrame {
    seq: u32,
    bytes: Vec<u8>,
    last_sent: Instant,
    attempts: u32,
}

struct Peer {
    addr: SocketAddr,
    mode: PeerMode,
    connected: bool,
    next_send_seq: u32,
    last_delivered_seq: Option<u32>,
    unacked: VecDeque<PendingFrame>,
}

/// A `mio`-UDP-backed reference implementation of [`ControlTransport`].
pub struct UdpControlTransport {
    socket: MioUdpSocket,
    poll: Poll,
    next_peer_id: u64,
    peers: HashMap<PeerHandle, Peer>,
    addr_to_peer: HashMap<SocketAddr, PeerHandle>,
}

impl UdpControlTransport {
    fn new_peer_handle(&mut self) -> PeerHandle {
        let id = self.next_peer_id;
        self.next_peer_id += 1;
        PeerHandle(id)
    }

    fn frame(kind: u8, seq: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(5 + payload.len());
        buf.push(kind);
        buf.extend_from_slice(&seq.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    fn send_raw(socket: &MioUdpSocket, addr: SocketAddr, bytes: &[u8]) {
        if let Err(e) = socket.send_to(bytes, addr) {
            log::debug!("UdpControlTransport: send_to {addr} failed: {e}");
        }
    }

    fn retransmit_due(&mut self, events: &mut Vec<CtEvent>) {
        let now = Instant::now();
        let mut dead_peers = Vec::new();
        for (&handle, peer) in &mut self.peers {
            let addr = peer.addr;
            for frame in &mut peer.unacked {
                if now.duration_since(frame.last_sent) < RETRANSMIT_INTERVAL {
                    continue;
                }
                if frame.attempts >= MAX_RETRANSMITS {
                    dead_peers.push(handle);
                    break;
                }
                frame.attempts += 1;
                frame.last_sent = now;
                Self::send_raw(&self.socket, addr, &frame.bytes);
            }
        }
        for handle in dead_peers {
            if let Some(peer) = self.peers.remove(&handle) {
                self.addr_to_peer.remove(&peer.addr);
                events.push(CtEvent::Disconnected {
                    peer: handle,
                    mode: peer.mode,
                });
            }
        }
    }

    fn handle_datagram(&mut self, addr: SocketAddr, data: &[u8], events: &mut Vec<CtEvent>) {
        if data.len() < 5 {
            return;
        }
        let kind = data[0];
        let seq = u32::from_be_bytes([data[1], data[2], data[3], data[4]]);
        let payload = &data[5..];

        match kind {
            FRAME_HELLO => {
                let peer = *self.addr_to_peer.entry(addr).or_insert_with(|| {
                    let handle = {
                        let id = self.next_peer_id;
                        self.next_peer_id += 1;
                        PeerHandle(id)
                    };
                    handle
                });
                let is_new = !self.peers.contains_key(&peer);
                if is_new {
                    self.peers.insert(
                        peer,
                        Peer {
                            addr,
                            mode: PeerMode::Server,
                            connected: true,
                            next_send_seq: 0,
                            last_delivered_seq: None,
                            unacked: VecDeque::new(),
                        },
                    );
                    events.push(CtEvent::Connected {
                        peer,
                        mode: PeerMode::Server,
                    });
                }
                Self::send_raw(&self.socket, addr, &Self::frame(FRAME_HELLO_ACK, 0, &[]));
            }
            FRAME_HELLO_ACK => {
                if let Some(&peer) = self.addr_to_peer.get(&addr) {
                    if let Some(state) = self.peers.get_mut(&peer) {
                        if !state.connected {
                            state.connected = true;
                            events.push(CtEvent::Connected {
                                peer,
                                mode: state.mode,
                            });
                        }
                    }
                }
            }
            FRAME_DATA => {
                if let Some(&peer) = self.addr_to_peer.get(&addr) {
                    Self::send_raw(&self.socket, addr, &Self::frame(FRAME_ACK, seq, &[]));
                    if let Some(state) = self.peers.get_mut(&peer) {
                        let already_seen = state.last_delivered_seq.is_some_and(|s| seq <= s);
                        if !already_seen {
                            state.last_delivered_seq = Some(seq);
                            events.push(CtEvent::Received {
                                peer,
                                payload: payload.to_vec(),
                            });
                        }
                    }
                }
            }
            FRAME_ACK => {
                if let Some(&peer) = self.addr_to_peer.get(&addr) {
                    if let Some(state) = self.peers.get_mut(&peer) {
                        state.unacked.retain(|f| f.seq != seq);
                    }
                }
            }
            FRAME_CLOSE => {
                if let Some(peer) = self.addr_to_peer.remove(&addr) {
                    if let Some(state) = self.peers.remove(&peer) {
                        events.push(CtEvent::Disconnected {
                            peer,
                            mode: state.mode,
                        });
                    }
                }
            }
            other => {
                log::warn!("UdpControlTransport: unknown frame kind {other} from {addr}");
            }
        }
    }
}

impl ControlTransport for UdpControlTransport {
    fn bind(port: u16) -> io::Result<Self> {
        let addr: SocketAddr = (std::net::Ipv4Addr::UNSPECIFIED, port).into();

        // SO_REUSEADDR so a Nexus can rebind its management port promptly
        // after a prior instance's teardown, without waiting out TIME_WAIT.
        let raw = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        raw.set_reuse_address(true)?;
        raw.bind(&addr.into())?;
        raw.set_nonblocking(true)?;
        let mut socket = MioUdpSocket::from_std(raw.into());

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;
        Ok(Self {
            socket,
            poll,
            next_peer_id: 1,
            peers: HashMap::new(),
            addr_to_peer: HashMap::new(),
        })
    }

    fn connect(&mut self, hostname: &str, port: u16) -> io::Result<PeerHandle> {
        let addr = resolve_bounded(hostname, port)?;

        let handle = self.new_peer_handle();
        self.peers.insert(
            handle,
            Peer {
                addr,
                mode: PeerMode::Client,
                connected: false,
                next_send_seq: 0,
                last_delivered_seq: None,
                unacked: VecDeque::new(),
            },
        );
        self.addr_to_peer.insert(addr, handle);
        Self::send_raw(&self.socket, addr, &Self::frame(FRAME_HELLO, 0, &[]));
        Ok(handle)
    }

    fn service(&mut self, timeout: Duration) -> Vec<CtEvent> {
        let mut events = Vec::new();
        let mut mio_events = Events::with_capacity(64);

        if let Err(e) = self.poll.poll(&mut mio_events, Some(timeout)) {
            if e.kind() != io::ErrorKind::Interrupted {
                log::warn!("UdpControlTransport: poll error: {e}");
            }
            self.retransmit_due(&mut events);
            return events;
        }

        if mio_events.iter().any(|e| e.token() == SOCKET_TOKEN) {
            let mut buf = [0u8; MAX_DATAGRAM];
            loop {
                match self.socket.recv_from(&mut buf) {
                    Ok((len, addr)) => self.handle_datagram(addr, &buf[..len], &mut events),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => {
                        log::warn!("UdpControlTransport: recv_from failed: {e}");
                        break;
                    }
                }
            }
        }

        self.retransmit_due(&mut events);
        events
    }

    fn send(&mut self, peer: PeerHandle, payload: &[u8]) -> io::Result<()> {
        let addr = {
            let state = self
                .peers
                .get_mut(&peer)
                .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "unknown peer"))?;
            let seq = state.next_send_seq;
            state.next_send_seq += 1;
            let bytes = Self::frame(FRAME_DATA, seq, payload);
            state.unacked.push_back(PendingFrame {
                seq,
                bytes: bytes.clone(),
                last_sent: Instant::now(),
                attempts: 0,
            });
            let addr = state.addr;
            Self::send_raw(&self.socket, addr, &bytes);
            addr
        };
        let _ = addr;
        Ok(())
    }

    fn close(&mut self, peer: PeerHandle) {
        if let Some(state) = self.peers.remove(&peer) {
            self.addr_to_peer.remove(&state.addr);
            Self::send_raw(&self.socket, state.addr, &Self::frame(FRAME_CLOSE, 0, &[]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn loopback_connect_send_receive_disconnect() {
        let mut a = UdpControlTransport::bind(0).unwrap();
        let mut b = UdpControlTransport::bind(0).unwrap();
        let a_port = a.socket.local_addr().unwrap().port();
        let b_port = b.socket.local_addr().unwrap().port();

        let peer_on_a = a.connect("127.0.0.1", b_port).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut a_connected = false;
        let mut peer_on_b = None;
        while Instant::now() < deadline && (!a_connected || peer_on_b.is_none()) {
            for ev in a.service(Duration::from_millis(50)) {
                if let CtEvent::Connected { peer, .. } = ev {
                    assert_eq!(peer, peer_on_a);
                    a_connected = true;
                }
            }
            for ev in b.service(Duration::from_millis(50)) {
                if let CtEvent::Connected { peer, mode } = ev {
                    assert_eq!(mode, PeerMode::Server);
                    peer_on_b = Some(peer);
                }
            }
        }
        assert!(a_connected, "a did not observe Connected");
        let peer_on_b = peer_on_b.expect("b did not observe Connected");

        a.send(peer_on_a, b"hello").unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        let mut received = None;
        while Instant::now() < deadline && received.is_none() {
            for ev in b.service(Duration::from_millis(50)) {
                if let CtEvent::Received { peer, payload } = ev {
                    assert_eq!(peer, peer_on_b);
                    received = Some(payload);
                }
            }
            // Keep `a` servicing so it processes the ACK from `b`.
            let _ = a.service(Duration::from_millis(10));
        }
        assert_eq!(received.as_deref(), Some(&b"hello"[..]));

        a.close(peer_on_a);
        let deadline = Instant::now() + Duration::from_secs(2);
        let mut disconnected = false;
        while Instant::now() < deadline && !disconnected {
            for ev in b.service(Duration::from_millis(50)) {
                if let CtEvent::Disconnected { peer, .. } = ev {
                    assert_eq!(peer, peer_on_b);
                    disconnected = true;
                }
            }
        }
        assert!(disconnected);
        let _ = thread::yield_now();
    }

    #[test]
    fn unresolvable_hostname_errors() {
        let mut t = UdpControlTransport::bind(0).unwrap();
        let res = t.connect("this.host.does.not.resolve.invalid", 12345);
        assert!(res.is_err());
    }
}
