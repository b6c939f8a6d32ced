// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The session-management control-plane thread (§4.6).
//!
//! One instance per Nexus, pinned per [`crate::config::CorePinPolicy`].
//! Drains the TX mailbox, services the control transport for a bounded
//! interval, and demultiplexes received SM packets into the destination
//! endpoint's Hook.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex as PLMutex;

use crate::config::{CorePinPolicy, SM_POLL_INTERVAL};
use crate::control_transport::{ControlTransport, CtEvent, PeerMode};
use crate::hook::{PeerHandle, SmPacket, SmResetReason, SmWorkItem};
use crate::mtlist::{MtList, MtListProducer};

use super::registry::HookHandle;
use super::wire;

/// Per-peer bookkeeping the SM thread keeps for client-mode (outbound)
/// connections. Server-mode peers carry no metadata here (§4.6's
/// "opaque pointer is null iff server-mode" discriminator).
struct ClientPeerState {
    hostname: String,
    port: u16,
    connected: bool,
    pending: Vec<SmWorkItem>,
    /// Endpoints that have sent a Work Item over this peer, in submission
    /// order with duplicates collapsed; a mid-session disconnect resets all
    /// of them (§7 SM-peer-failure handling).
    owning_endpoints: Vec<u8>,
}

impl ClientPeerState {
    fn note_owner(&mut self, endpoint_id: u8) {
        if !self.owning_endpoints.contains(&endpoint_id) {
            self.owning_endpoints.push(endpoint_id);
        }
    }
}

struct SmThreadState<CT: ControlTransport> {
    transport: CT,
    hooks: Arc<PLMutex<Vec<Option<HookHandle>>>>,
    client_peers: HashMap<PeerHandle, ClientPeerState>,
    addr_to_peer: HashMap<(String, u16), PeerHandle>,
}

impl<CT: ControlTransport> SmThreadState<CT> {
    fn new(transport: CT, hooks: Arc<PLMutex<Vec<Option<HookHandle>>>>) -> Self {
        Self {
            transport,
            hooks,
            client_peers: HashMap::new(),
            addr_to_peer: HashMap::new(),
        }
    }

    /// Drain the TX mailbox: §4.6 step 1.
    fn drain_tx(&mut self, items: Vec<SmWorkItem>) {
        for item in items {
            self.handle_tx_item(item);
        }
    }

    fn handle_tx_item(&mut self, item: SmWorkItem) {
        if let Some(peer) = item.peer {
            if let Some(state) = self.client_peers.get_mut(&peer) {
                state.note_owner(item.endpoint_id);
            }
            let connected = self
                .client_peers
                .get(&peer)
                .map_or(true, |p| p.connected);
            if connected {
                self.send_now(peer, &item.packet);
            } else if let Some(state) = self.client_peers.get_mut(&peer) {
                state.pending.push(item);
            }
            return;
        }

        let Some(target) = item.target.clone() else {
            log::warn!(
                "SM thread: TX item for endpoint {} has no peer and no target, dropping",
                item.endpoint_id
            );
            return;
        };

        let key = (target.hostname.clone(), target.port);
        if let Some(&peer) = self.addr_to_peer.get(&key) {
            if let Some(state) = self.client_peers.get_mut(&peer) {
                state.note_owner(item.endpoint_id);
                if state.connected {
                    self.send_now(peer, &item.packet);
                } else {
                    state.pending.push(item);
                }
            }
            return;
        }

        let item_endpoint_id = item.endpoint_id;
        match self.transport.connect(&target.hostname, target.port) {
            Ok(peer) => {
                self.client_peers.insert(
                    peer,
                    ClientPeerState {
                        hostname: target.hostname.clone(),
                        port: target.port,
                        connected: false,
                        pending: vec![item],
                        owning_endpoints: vec![item_endpoint_id],
                    },
                );
                self.addr_to_peer.insert(key, peer);
            }
            Err(e) => {
                log::warn!(
                    "SM thread: connect to {}:{} failed: {e}",
                    target.hostname,
                    target.port
                );
                self.deliver_reset(item.endpoint_id, SmResetReason::UnresolvableHostname);
            }
        }
    }

    fn send_now(&mut self, peer: PeerHandle, packet: &SmPacket) {
        let Some(bytes) = wire::encode(packet) else {
            return;
        };
        if let Err(e) = self.transport.send(peer, &bytes) {
            log::warn!("SM thread: send to peer {:?} failed: {e}", peer.0);
        }
    }

    /// Service the control transport for up to `SM_POLL_INTERVAL`: §4.6 step 2.
    fn poll_rx(&mut self) {
        for event in self.transport.service(SM_POLL_INTERVAL) {
            match event {
                CtEvent::Connected { peer, mode } => self.handle_connected(peer, mode),
                CtEvent::Received { peer, payload } => self.handle_received(peer, &payload),
                CtEvent::Disconnected { peer, mode } => self.handle_disconnected(peer, mode),
            }
        }
    }

    fn handle_connected(&mut self, peer: PeerHandle, mode: PeerMode) {
        if mode != PeerMode::Client {
            // Server-mode peers need no bookkeeping until a packet arrives.
            return;
        }
        let pending = if let Some(state) = self.client_peers.get_mut(&peer) {
            state.connected = true;
            std::mem::take(&mut state.pending)
        } else {
            Vec::new()
        };
        for item in pending {
            self.send_now(peer, &item.packet);
        }
    }

    fn handle_received(&mut self, _peer: PeerHandle, payload: &[u8]) {
        let Some(packet) = wire::decode(payload) else {
            log::warn!("SM thread: malformed SM packet, {} bytes", payload.len());
            return;
        };
        let Some(dest) = packet.wire_dest_endpoint_id() else {
            return;
        };
        let hooks = self.hooks.lock();
        match hooks.get(dest as usize).and_then(Option::as_ref) {
            Some(handle) => handle.sm_rx.push(SmWorkItem::new(dest, packet)),
            None => log::debug!("SM thread: no hook registered for endpoint {dest}, dropping"),
        }
    }

    fn handle_disconnected(&mut self, peer: PeerHandle, mode: PeerMode) {
        if mode != PeerMode::Client {
            return;
        }
        if let Some(state) = self.client_peers.remove(&peer) {
            log::warn!(
                "SM thread: peer {:?} ({}:{}) disconnected, resetting {} owning endpoint(s)",
                peer.0,
                state.hostname,
                state.port,
                state.owning_endpoints.len()
            );
            for endpoint_id in &state.owning_endpoints {
                self.deliver_reset(*endpoint_id, SmResetReason::PeerDisconnected);
            }
            self.addr_to_peer.remove(&(state.hostname, state.port));
        }
    }

    fn deliver_reset(&self, endpoint_id: u8, reason: SmResetReason) {
        let hooks = self.hooks.lock();
        if let Some(handle) = hooks.get(endpoint_id as usize).and_then(Option::as_ref) {
            handle
                .sm_rx
                .push(SmWorkItem::new(endpoint_id, SmPacket::Reset { reason }));
        }
    }
}

/// Handle the Nexus keeps to the running SM thread: a producer clone of the
/// TX queue (handed out to every Hook at registration), the shared kill
/// switch, and the join handle reclaimed at teardown.
pub struct SmThreadHandle {
    pub(super) tx_producer: MtListProducer<SmWorkItem>,
    kill_switch: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl SmThreadHandle {
    pub(super) fn spawn<CT>(
        transport: CT,
        hooks: Arc<PLMutex<Vec<Option<HookHandle>>>>,
        core_pin: CorePinPolicy,
    ) -> std::io::Result<Self>
    where
        CT: ControlTransport + 'static,
    {
        let kill_switch = Arc::new(AtomicBool::new(false));
        // The SM thread owns the TX queue outright (it is the sole
        // consumer); everyone else only ever holds producer clones, matching
        // the MPSC discipline in §5.
        let tx_list: MtList<SmWorkItem> = MtList::new();
        let tx_producer = tx_list.producer();
        let thread_kill = Arc::clone(&kill_switch);

        let join = thread::Builder::new()
            .name("nexus-sm".to_string())
            .spawn(move || {
                apply_core_pin(core_pin);
                run_loop(transport, hooks, thread_kill, tx_list);
            })?;

        Ok(Self {
            tx_producer,
            kill_switch,
            join: Mutex::new(Some(join)),
        })
    }

    pub(super) fn shutdown(&self) {
        self.kill_switch.store(true, Ordering::Release);
        if let Some(handle) = self.join.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(feature = "core-pin")]
fn apply_core_pin(policy: CorePinPolicy) {
    let CorePinPolicy::Core(id) = policy else {
        return;
    };
    match core_affinity::get_core_ids().and_then(|ids| ids.into_iter().find(|c| c.id == id)) {
        Some(core) => {
            core_affinity::set_for_current(core);
        }
        None => log::warn!("SM thread: core {id} not found, running unpinned"),
    }
}

#[cfg(not(feature = "core-pin"))]
fn apply_core_pin(policy: CorePinPolicy) {
    if matches!(policy, CorePinPolicy::Core(_)) {
        log::warn!("SM thread: core pinning requested but the `core-pin` feature is disabled");
    }
}

/// The actual event loop, run on the SM thread. Owns `tx_list` outright.
fn run_loop<CT: ControlTransport>(
    transport: CT,
    hooks: Arc<PLMutex<Vec<Option<HookHandle>>>>,
    kill_switch: Arc<AtomicBool>,
    tx_list: MtList<SmWorkItem>,
) {
    let mut state = SmThreadState::new(transport, hooks);

    while !kill_switch.load(Ordering::Acquire) {
        let items = tx_list.drain();
        state.drain_tx(items);
        state.poll_rx();
    }

    // Drain and drop whatever is left so no SM Work Items leak (§4.6 exit
    // contract).
    let _ = tx_list.drain();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::Hook;
    use std::io;

    /// Minimal in-memory stand-in for `UdpControlTransport`, just enough to
    /// drive `SmThreadState` transitions without a real socket.
    struct FakeTransport;

    impl ControlTransport for FakeTransport {
        fn bind(_port: u16) -> io::Result<Self> {
            Ok(Self)
        }

        fn connect(&mut self, _hostname: &str, _port: u16) -> io::Result<PeerHandle> {
            Ok(PeerHandle(1))
        }

        fn service(&mut self, _timeout: std::time::Duration) -> Vec<CtEvent> {
            Vec::new()
        }

        fn send(&mut self, _peer: PeerHandle, _payload: &[u8]) -> io::Result<()> {
            Ok(())
        }

        fn close(&mut self, _peer: PeerHandle) {}
    }

    #[test]
    fn disconnect_mid_session_resets_the_owning_endpoint() {
        let hook = Hook::new(5);
        let hooks: Arc<PLMutex<Vec<Option<HookHandle>>>> = Arc::new(PLMutex::new(vec![None; 6]));
        hooks.lock()[5] = Some(HookHandle {
            sm_rx: hook.sm_rx_producer(),
            response_rx: hook.response_producer(),
        });

        let mut state = SmThreadState::new(FakeTransport, Arc::clone(&hooks));
        state.handle_tx_item(
            SmWorkItem::new(
                5,
                SmPacket::ConnectRequest {
                    client_endpoint_id: 5,
                    server_endpoint_id: 9,
                    session_num_client: 1,
                },
            )
            .with_target("peer-host", 4242),
        );
        assert!(state.client_peers.contains_key(&PeerHandle(1)));

        state.handle_disconnected(PeerHandle(1), PeerMode::Client);

        assert!(!state.client_peers.contains_key(&PeerHandle(1)));
        let item = hook
            .try_recv_sm()
            .expect("disconnect mid-session is signaled to the owning endpoint");
        assert_eq!(item.endpoint_id, 5);
        assert_eq!(
            item.packet,
            SmPacket::Reset {
                reason: SmResetReason::PeerDisconnected
            }
        );
    }
}
