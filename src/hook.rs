// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The Hook: the mailbox and reference pack the Nexus installs into each RPC
//! endpoint, plus the typed work items carried across endpoint/SM/worker
//! thread boundaries.

use crate::mtlist::{MtList, MtListProducer};
use std::sync::Arc;

/// Opaque per-in-flight-request state. The core treats this as a plain
/// handle; its contents are owned by the fast path, out of scope here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSlot(pub u32);

/// Session-management control message exchanged between Nexus SM threads.
///
/// Every data-carrying variant names both endpoints involved, not just the
/// session numbers, so the receiving process's SM thread can demultiplex to
/// the right local [`Hook`] without a side channel (§3: "each carrying
/// session identifiers and endpoint metadata"). `client_endpoint_id` and
/// `server_endpoint_id` are process-local registry indices, meaningful only
/// within the process that owns them — a `ConnectRequest`'s
/// `server_endpoint_id` addresses a hook in the *receiving* process, never
/// the sender's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SmPacket {
    ConnectRequest {
        client_endpoint_id: u8,
        server_endpoint_id: u8,
        session_num_client: u32,
    },
    ConnectResponse {
        client_endpoint_id: u8,
        server_endpoint_id: u8,
        session_num_client: u32,
        session_num_server: u32,
        accepted: bool,
    },
    DisconnectRequest {
        client_endpoint_id: u8,
        server_endpoint_id: u8,
        session_num_client: u32,
        session_num_server: u32,
    },
    DisconnectResponse {
        client_endpoint_id: u8,
        server_endpoint_id: u8,
        session_num_client: u32,
    },
    /// A session was torn down abnormally (peer failure, unresolvable
    /// hostname, ...); synthesized locally by the SM thread and delivered
    /// straight to the submitting endpoint's own mailbox, never serialized
    /// to the wire.
    Reset { reason: SmResetReason },
}

impl SmPacket {
    /// The process-local endpoint ID this packet is addressed to once it
    /// reaches the wire, or `None` for packets that are never serialized
    /// (`Reset`). `*Request` variants travel client-to-server;
    /// `*Response` variants travel server-to-client.
    #[must_use]
    pub fn wire_dest_endpoint_id(&self) -> Option<u8> {
        match *self {
            Self::ConnectRequest {
                server_endpoint_id, ..
            }
            | Self::DisconnectRequest {
                server_endpoint_id, ..
            } => Some(server_endpoint_id),
            Self::ConnectResponse {
                client_endpoint_id, ..
            }
            | Self::DisconnectResponse {
                client_endpoint_id, ..
            } => Some(client_endpoint_id),
            Self::Reset { .. } => None,
        }
    }
}

/// Why a session was reset, surfaced to the owning endpoint instead of
/// silently dropping the work item (§7, request-dispatch-miss /
/// SM-peer-failure handling).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmResetReason {
    /// The destination hostname could not be resolved to a peer address.
    UnresolvableHostname,
    /// The control-transport peer reported a connect failure.
    ConnectFailed,
    /// The peer disconnected mid-session.
    PeerDisconnected,
}

/// An opaque handle to a control-transport peer, owned by the SM thread.
/// Endpoints never dereference this; it round-trips through Work Items so
/// the SM thread can route replies without a second lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerHandle(pub u64);

/// A remote endpoint a TX-bound [`SmWorkItem`] should be connected to, when
/// no control-transport peer is known yet (first contact with a host).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmTarget {
    pub hostname: String,
    pub port: u16,
}

/// A Work Item exchanged between an RPC endpoint and the Nexus's SM thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmWorkItem {
    /// Endpoint ID this item is addressed to (RX) or originates from (TX).
    pub endpoint_id: u8,
    /// The control message itself, carried by value.
    pub packet: SmPacket,
    /// Control-transport peer this item is associated with, if known yet.
    pub peer: Option<PeerHandle>,
    /// Remote host to connect to, for a TX item whose peer isn't known yet.
    /// `None` once a peer has been resolved for this destination.
    pub target: Option<SmTarget>,
}

impl SmWorkItem {
    #[must_use]
    pub fn new(endpoint_id: u8, packet: SmPacket) -> Self {
        Self {
            endpoint_id,
            packet,
            peer: None,
            target: None,
        }
    }

    #[must_use]
    pub fn with_peer(mut self, peer: PeerHandle) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Mark this TX item as needing a fresh connect to `(hostname, port)`
    /// before it can be sent.
    #[must_use]
    pub fn with_target(mut self, hostname: impl Into<String>, port: u16) -> Self {
        self.target = Some(SmTarget {
            hostname: hostname.into(),
            port,
        });
        self
    }
}

/// Kind of work dispatched to a background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BgWorkKind {
    /// A request awaiting dispatch to a registered handler.
    Request { req_type: u8 },
    /// A completed response awaiting the session's continuation.
    Response,
    /// No handler was registered for `req_type` when the request reached a
    /// worker; routed back to the submitting endpoint's response mailbox
    /// instead of being silently dropped (§7 request-dispatch-miss).
    DispatchError { req_type: u8 },
}

/// Work Item pushed onto a background worker's request queue.
pub struct BgWorkItem {
    pub kind: BgWorkKind,
    /// Endpoint that submitted this work, used to route failures back.
    pub endpoint_id: u8,
    /// Opaque application context pointer, forwarded verbatim to the
    /// handler/continuation.
    pub context: *mut (),
    pub sslot: SessionSlot,
}

// SAFETY: `context` is an opaque pointer supplied by the application and
// handed off to exactly one worker thread at a time; the core never
// dereferences it, only forwards it, so transferring ownership is sound as
// long as the application's handler does not alias it across threads
// concurrently (a usage contract documented on `Nexus::register_req_func`).
unsafe impl Send for BgWorkItem {}

impl BgWorkItem {
    #[must_use]
    pub fn request(endpoint_id: u8, req_type: u8, context: *mut (), sslot: SessionSlot) -> Self {
        Self {
            kind: BgWorkKind::Request { req_type },
            endpoint_id,
            context,
            sslot,
        }
    }

    #[must_use]
    pub fn response(endpoint_id: u8, context: *mut (), sslot: SessionSlot) -> Self {
        Self {
            kind: BgWorkKind::Response,
            endpoint_id,
            context,
            sslot,
        }
    }

    #[must_use]
    pub fn dispatch_error(
        endpoint_id: u8,
        req_type: u8,
        context: *mut (),
        sslot: SessionSlot,
    ) -> Self {
        Self {
            kind: BgWorkKind::DispatchError { req_type },
            endpoint_id,
            context,
            sslot,
        }
    }
}

/// The mailbox and reference pack installed by the Nexus into each RPC
/// endpoint.
///
/// An endpoint allocates its own `Hook`, fills in `rpc_id`, and calls
/// [`crate::Nexus::register_hook`]; until that call returns the endpoint may
/// not enqueue work. The installed references (`bg_queues`, `sm_tx`) are
/// read-only from the endpoint's perspective after registration — only the
/// Nexus ever mutates what they point at. `sm_rx` is owned outright by the
/// Hook and drained exclusively by the endpoint thread.
pub struct Hook {
    /// This endpoint's 8-bit identifier.
    pub rpc_id: u8,
    /// One producer handle per background worker, installed by
    /// [`crate::Nexus::register_hook`]. Empty until registration.
    pub(crate) bg_queues: Vec<MtListProducer<BgWorkItem>>,
    /// Producer handle for the Nexus's SM TX queue, installed by
    /// [`crate::Nexus::register_hook`]. `None` until registration.
    pub(crate) sm_tx: Option<MtListProducer<SmWorkItem>>,
    /// This endpoint's own SM RX mailbox, owned outright and drained only by
    /// the endpoint thread. The SM thread pushes into it via a cloned
    /// producer handle.
    sm_rx: Arc<MtList<SmWorkItem>>,
    /// This endpoint's completed-response mailbox. A background worker
    /// finishing a `BgWorkKind::Response` item pushes it here (via a
    /// producer the Nexus records at registration time) instead of invoking
    /// an app-level continuation directly, since the core has no handle on
    /// per-session continuations (§9 supplemental open question).
    response_rx: Arc<MtList<BgWorkItem>>,
}

impl Hook {
    /// Allocate a new, unregistered Hook for endpoint `rpc_id`.
    #[must_use]
    pub fn new(rpc_id: u8) -> Self {
        Self {
            rpc_id,
            bg_queues: Vec::new(),
            sm_tx: None,
            sm_rx: Arc::new(MtList::new()),
            response_rx: Arc::new(MtList::new()),
        }
    }

    /// Producer handle the Nexus clones to push into this Hook's SM RX
    /// mailbox during registration.
    #[must_use]
    pub(crate) fn sm_rx_producer(&self) -> MtListProducer<SmWorkItem> {
        self.sm_rx.producer()
    }

    /// Producer handle the Nexus clones (into its response-routing table) to
    /// push completed `BgWorkItem::Response` notifications back to this
    /// endpoint during registration.
    #[must_use]
    pub(crate) fn response_producer(&self) -> MtListProducer<BgWorkItem> {
        self.response_rx.producer()
    }

    /// Whether this Hook has completed registration (has a usable SM TX
    /// reference and at least knows about the worker pool, even if
    /// `num_bg_threads == 0`).
    #[must_use]
    pub fn is_registered(&self) -> bool {
        self.sm_tx.is_some()
    }

    /// Submit a Work Item to the Nexus's SM thread.
    ///
    /// # Panics
    /// Panics if called before registration completes (§4.2 usage contract).
    pub fn submit_sm(&self, item: SmWorkItem) {
        self.sm_tx
            .as_ref()
            .expect("Hook::submit_sm called before register_hook completed")
            .push(item);
    }

    /// Submit a Work Item to background worker `worker_idx`.
    ///
    /// # Panics
    /// Panics if called before registration completes, or if `worker_idx`
    /// is out of range for the configured worker pool (both usage-contract
    /// violations).
    pub fn submit_bg(&self, worker_idx: usize, item: BgWorkItem) {
        assert!(
            !self.bg_queues.is_empty(),
            "Hook::submit_bg called before register_hook completed"
        );
        self.bg_queues
            .get(worker_idx)
            .expect("worker_idx out of range")
            .push(item);
    }

    /// Non-blocking drain of this endpoint's own SM RX mailbox.
    #[must_use]
    pub fn try_recv_sm(&self) -> Option<SmWorkItem> {
        self.sm_rx.try_pop()
    }

    /// Block up to `timeout` for an SM Work Item addressed to this endpoint.
    #[must_use]
    pub fn recv_sm_blocking(&self, timeout: std::time::Duration) -> Option<SmWorkItem> {
        self.sm_rx.pop_blocking(timeout)
    }

    /// Non-blocking drain of this endpoint's completed-response mailbox.
    #[must_use]
    pub fn try_recv_response(&self) -> Option<BgWorkItem> {
        self.response_rx.try_pop()
    }

    /// Block up to `timeout` for a completed response addressed to this
    /// endpoint.
    #[must_use]
    pub fn recv_response_blocking(&self, timeout: std::time::Duration) -> Option<BgWorkItem> {
        self.response_rx.pop_blocking(timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_hook_is_unregistered() {
        let hook = Hook::new(5);
        assert!(!hook.is_registered());
        assert_eq!(hook.try_recv_sm(), None);
    }

    #[test]
    #[should_panic]
    fn submit_sm_before_registration_panics() {
        let hook = Hook::new(5);
        hook.submit_sm(SmWorkItem::new(
            5,
            SmPacket::DisconnectResponse {
                client_endpoint_id: 5,
                server_endpoint_id: 9,
                session_num_client: 0,
            },
        ));
    }

    #[test]
    fn sm_rx_producer_delivers_to_try_recv() {
        let hook = Hook::new(9);
        let producer = hook.sm_rx_producer();
        producer.push(SmWorkItem::new(
            9,
            SmPacket::ConnectRequest {
                client_endpoint_id: 7,
                server_endpoint_id: 9,
                session_num_client: 1,
            },
        ));
        let item = hook.try_recv_sm().expect("item delivered");
        assert_eq!(item.endpoint_id, 9);
    }

    #[test]
    fn response_producer_delivers_to_try_recv_response() {
        let hook = Hook::new(3);
        let producer = hook.response_producer();
        producer.push(BgWorkItem::response(3, std::ptr::null_mut(), SessionSlot(42)));

        let item = hook.try_recv_response().expect("response delivered");
        assert_eq!(item.endpoint_id, 3);
        assert_eq!(item.sslot, SessionSlot(42));
        assert!(hook.recv_response_blocking(std::time::Duration::from_millis(10)).is_none());
    }

    #[test]
    fn with_peer_sets_peer_handle_on_work_item() {
        let item = SmWorkItem::new(1, SmPacket::Reset { reason: SmResetReason::PeerDisconnected })
            .with_peer(PeerHandle(7));
        assert_eq!(item.peer, Some(PeerHandle(7)));
    }
}
