// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The Nexus: the process-wide coordinator owning the session-management
//! thread, the background worker pool, the hook registry, and the
//! request-function table (§4.3-§4.7).

mod registry;
mod sm_thread;
mod wire;
mod worker;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use crossbeam::utils::CachePadded;
use parking_lot::Mutex as PLMutex;

use crate::config::{NexusConfig, MAX_BG_THREADS, MAX_REQ_TYPES, MAX_RPC_ID};
use crate::control_transport::{ControlTransport, UdpControlTransport};
use crate::error::{NexusError, NexusResult, RegisterError, RegisterResult};
use crate::hook::Hook;
use crate::tsc::TscInfo;

use registry::HookHandle;
use sm_thread::SmThreadHandle;
pub use worker::ReqHandler;
use worker::WorkerHandle;

/// The process-wide RPC runtime coordinator.
///
/// Generic over the control transport so a deployment can substitute a
/// different reliable-datagram implementation (§4.9, §9's "polymorphism
/// over transport" note) without touching session-management logic;
/// [`UdpControlTransport`] is the one implementation this core ships, hence
/// the default type parameter.
pub struct Nexus<CT: ControlTransport = UdpControlTransport> {
    tsc: TscInfo,
    hostname: String,
    req_funcs: Arc<ArcSwap<Vec<Option<ReqHandler>>>>,
    registration_allowed: AtomicBool,
    // Cache-line padded: separates the read-mostly fields above (touched by
    // every dispatching thread, never mutated after construction) from the
    // coarse registry lock below, which every `register_hook`/`unregister_hook`
    // call and every SM-thread dispatch takes (§5).
    hooks: CachePadded<Arc<PLMutex<Vec<Option<HookHandle>>>>>,
    sm: SmThreadHandle,
    workers: Vec<WorkerHandle>,
    _transport: std::marker::PhantomData<CT>,
}

impl Nexus<UdpControlTransport> {
    /// Construct a Nexus using the reference [`UdpControlTransport`].
    ///
    /// Equivalent to `Nexus::with_transport::<UdpControlTransport>(config)`
    /// but spares callers who don't need a custom transport from naming the
    /// type parameter.
    pub fn new(config: NexusConfig) -> NexusResult<Self> {
        Self::with_transport(config)
    }
}

impl<CT: ControlTransport + 'static> Nexus<CT> {
    /// Construct a Nexus parameterized over an explicit control transport.
    ///
    /// Follows the strict startup order in §4.3: TSC calibration, TLS
    /// registry init, background-thread spawn (so workers observe later
    /// `register_req_func` calls through the shared table pointer), control
    /// transport bind, then the SM thread.
    pub fn with_transport(config: NexusConfig) -> NexusResult<Self> {
        if config.num_bg_threads > MAX_BG_THREADS {
            return Err(NexusError::TooManyBgThreads {
                requested: config.num_bg_threads,
                max: MAX_BG_THREADS,
            });
        }

        let tsc = TscInfo::calibrate();
        log::debug!("Nexus: TSC calibrated at {:.3} Gticks/s", tsc.ticks_per_sec() / 1e9);

        // Thread-local session-slot caching is out of scope (§1); this is
        // an intentional no-op seam rather than a missing feature.
        log::trace!("Nexus: thread-local registry init (no-op in this core)");

        let req_funcs = Arc::new(ArcSwap::new(Arc::new(vec![None; MAX_REQ_TYPES])));
        let hooks = Arc::new(PLMutex::new((0..=MAX_RPC_ID).map(|_| None).collect()));

        let mut workers = Vec::with_capacity(config.num_bg_threads);
        for idx in 0..config.num_bg_threads {
            let worker = WorkerHandle::spawn(idx, Arc::clone(&req_funcs), Arc::clone(&hooks))
                .map_err(NexusError::ThreadSpawn)?;
            workers.push(worker);
        }

        let transport = CT::bind(config.mgmt_udp_port).map_err(|source| NexusError::PortBind {
            port: config.mgmt_udp_port,
            source,
        })?;

        let sm = SmThreadHandle::spawn(transport, Arc::clone(&hooks), config.sm_core_pin)
            .map_err(NexusError::ThreadSpawn)?;

        Ok(Self {
            tsc,
            hostname: config.hostname,
            req_funcs,
            registration_allowed: AtomicBool::new(true),
            hooks: CachePadded::new(hooks),
            sm,
            workers,
            _transport: std::marker::PhantomData,
        })
    }

    /// The local hostname this Nexus was constructed with.
    #[must_use]
    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// The TSC calibration measured at construction (§4.8).
    #[must_use]
    pub fn tsc(&self) -> TscInfo {
        self.tsc
    }

    /// Number of background worker threads this Nexus owns.
    #[must_use]
    pub fn num_bg_threads(&self) -> usize {
        self.workers.len()
    }

    /// Install a request handler for `req_type` (§4.4).
    ///
    /// `handler` must be `Some`; a `None` handler is rejected as invalid
    /// (the usage-level equivalent of a null function pointer in the source
    /// design). Once the first [`Nexus::register_hook`] succeeds, this
    /// window closes permanently.
    pub fn register_req_func(
        &self,
        req_type: u8,
        handler: Option<ReqHandler>,
    ) -> RegisterResult<()> {
        if !self.registration_allowed.load(Ordering::Acquire) {
            return Err(RegisterError::RegistrationClosed);
        }
        let Some(handler) = handler else {
            return Err(RegisterError::InvalidHandler);
        };

        let mut occupied = false;
        self.req_funcs.rcu(|old| {
            let mut next = (**old).clone();
            if next[req_type as usize].is_some() {
                occupied = true;
            } else {
                next[req_type as usize] = Some(handler);
            }
            next
        });

        if occupied {
            return Err(RegisterError::SlotOccupied(req_type));
        }
        Ok(())
    }

    /// Register `hook` with the Nexus (§4.5).
    ///
    /// Installs references to the SM TX queue and every background worker's
    /// request queue into `hook`, records the producer handles dispatch
    /// needs in the registry, and permanently closes the
    /// `register_req_func` window.
    pub fn register_hook(&self, hook: &mut Hook) -> RegisterResult<()> {
        let mut hooks = self.hooks.lock();
        let slot = hook.rpc_id as usize;
        if hooks[slot].is_some() {
            return Err(RegisterError::SlotAlreadyRegistered(hook.rpc_id));
        }

        hook.bg_queues = self.workers.iter().map(|w| w.producer.clone()).collect();
        hook.sm_tx = Some(self.sm.tx_producer.clone());

        hooks[slot] = Some(HookHandle {
            sm_rx: hook.sm_rx_producer(),
            response_rx: hook.response_producer(),
        });

        self.registration_allowed.store(false, Ordering::Release);
        Ok(())
    }

    /// Unregister `hook` (§4.5). The endpoint must not touch installed
    /// queue references afterward.
    pub fn unregister_hook(&self, hook: &Hook) {
        let mut hooks = self.hooks.lock();
        hooks[hook.rpc_id as usize] = None;
    }

    /// Whether `rpc_id` currently has a registered hook.
    #[must_use]
    pub fn rpc_id_exists(&self, rpc_id: u8) -> bool {
        self.hooks.lock()[rpc_id as usize].is_some()
    }
}

impl<CT: ControlTransport> Drop for Nexus<CT> {
    /// Teardown (§5): set the kill switch, join the SM thread and every
    /// background worker, in that order. Destructing with live hooks still
    /// registered is a usage bug the caller is responsible for avoiding;
    /// the registry itself holds no resources that would leak either way.
    fn drop(&mut self) {
        self.sm.shutdown();
        for worker in &self.workers {
            worker.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hook::{BgWorkItem, SessionSlot, SmPacket, SmWorkItem};
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn free_port() -> u16 {
        std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port()
    }

    #[test]
    fn construct_and_teardown_with_no_bg_threads() {
        let port = free_port();
        let nexus =
            Nexus::new(NexusConfig::new("localhost", port, 0)).expect("construction succeeds");
        assert_eq!(nexus.num_bg_threads(), 0);
        drop(nexus);
    }

    #[test]
    fn teardown_joins_all_background_threads() {
        let port = free_port();
        let nexus =
            Nexus::new(NexusConfig::new("localhost", port, 4)).expect("construction succeeds");
        assert_eq!(nexus.num_bg_threads(), 4);
        drop(nexus); // should return promptly, not hang (S6)
    }

    #[test]
    fn register_req_func_twice_for_same_slot_fails() {
        fn handler(_ctx: *mut (), _s: SessionSlot) {}
        let port = free_port();
        let nexus = Nexus::new(NexusConfig::new("localhost", port, 1)).unwrap();
        nexus.register_req_func(3, Some(handler)).unwrap();
        let err = nexus.register_req_func(3, Some(handler)).unwrap_err();
        assert_eq!(err, RegisterError::SlotOccupied(3));
    }

    #[test]
    fn register_req_func_rejects_none_handler() {
        let port = free_port();
        let nexus = Nexus::new(NexusConfig::new("localhost", port, 0)).unwrap();
        let err = nexus.register_req_func(1, None).unwrap_err();
        assert_eq!(err, RegisterError::InvalidHandler);
    }

    #[test]
    fn register_hook_closes_req_func_window() {
        fn handler(_ctx: *mut (), _s: SessionSlot) {}
        let port = free_port();
        let nexus = Nexus::new(NexusConfig::new("localhost", port, 1)).unwrap();
        nexus.register_req_func(1, Some(handler)).unwrap();

        let mut hook = Hook::new(5);
        nexus.register_hook(&mut hook).unwrap();
        assert!(hook.is_registered());

        let err = nexus.register_req_func(2, Some(handler)).unwrap_err();
        assert_eq!(err, RegisterError::RegistrationClosed);
    }

    #[test]
    fn register_hook_twice_for_same_endpoint_fails() {
        let port = free_port();
        let nexus = Nexus::new(NexusConfig::new("localhost", port, 0)).unwrap();
        let mut a = Hook::new(5);
        let mut b = Hook::new(5);
        nexus.register_hook(&mut a).unwrap();
        let err = nexus.register_hook(&mut b).unwrap_err();
        assert_eq!(err, RegisterError::SlotAlreadyRegistered(5));
    }

    #[test]
    fn unregister_then_rpc_id_exists_is_false() {
        let port = free_port();
        let nexus = Nexus::new(NexusConfig::new("localhost", port, 0)).unwrap();
        let mut hook = Hook::new(7);
        nexus.register_hook(&mut hook).unwrap();
        assert!(nexus.rpc_id_exists(7));
        nexus.unregister_hook(&hook);
        assert!(!nexus.rpc_id_exists(7));
    }

    #[test]
    fn worker_dispatches_request_to_registered_handler() {
        static CALLS: AtomicU32 = AtomicU32::new(0);
        fn handler(_ctx: *mut (), _s: SessionSlot) {
            CALLS.fetch_add(1, Ordering::SeqCst);
        }

        let port = free_port();
        let nexus = Nexus::new(NexusConfig::new("localhost", port, 1)).unwrap();
        nexus.register_req_func(3, Some(handler)).unwrap();

        let mut hook = Hook::new(1);
        nexus.register_hook(&mut hook).unwrap();

        hook.submit_bg(
            0,
            BgWorkItem::request(1, 3, std::ptr::null_mut(), SessionSlot(0)),
        );

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while CALLS.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn loopback_connect_request_reaches_destination_hook() {
        let port_a = free_port();
        let port_b = free_port();
        let nexus_a = Nexus::new(NexusConfig::new("localhost", port_a, 0)).unwrap();
        let nexus_b = Nexus::new(NexusConfig::new("localhost", port_b, 0)).unwrap();

        let mut hook_a = Hook::new(7);
        nexus_a.register_hook(&mut hook_a).unwrap();
        let mut hook_b = Hook::new(9);
        nexus_b.register_hook(&mut hook_b).unwrap();

        let item = SmWorkItem::new(
            7,
            SmPacket::ConnectRequest {
                client_endpoint_id: 7,
                server_endpoint_id: 9,
                session_num_client: 1,
            },
        )
        .with_target("127.0.0.1", port_b);
        hook_a.submit_sm(item);

        let received = hook_b.recv_sm_blocking(Duration::from_millis(500));
        let item = received.expect("B should receive the connect request within 500ms");
        assert_eq!(item.endpoint_id, 9);
        assert_eq!(
            item.packet,
            SmPacket::ConnectRequest {
                client_endpoint_id: 7,
                server_endpoint_id: 9,
                session_num_client: 1,
            }
        );
    }
}
