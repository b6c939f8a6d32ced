// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background worker threads (§4.7).
//!
//! Each worker owns one [`MtList<BgWorkItem>`] request queue; the Nexus
//! installs producer clones of every worker's queue into each Hook at
//! registration. Workers never hold a lock across handler invocation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex as PLMutex;

use crate::hook::{BgWorkItem, BgWorkKind, SessionSlot};
use crate::mtlist::{MtList, MtListProducer};

use super::registry::HookHandle;

/// Request-handler function pointer, looked up by request type.
///
/// A `None` slot means "no handler registered for this request type" (§4.4's
/// "invalid handler" refers to the registration call being given `None`,
/// not to a runtime-absent slot — a *runtime* miss is the "request dispatch
/// miss" failure mode in §7, surfaced by the caller as an error response,
/// not a worker panic).
pub type ReqHandler = fn(context: *mut (), sslot: SessionSlot);

const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Worker-pool-wide view of the request-function table: written once before
/// the registration window closes, read many times after by every worker
/// without additional synchronization (§5, §9's `ArcSwap` open question).
pub(super) type ReqFuncTable = ArcSwap<Vec<Option<ReqHandler>>>;

pub(super) struct WorkerHandle {
    pub(super) producer: MtListProducer<BgWorkItem>,
    kill_switch: Arc<AtomicBool>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    pub(super) fn spawn(
        idx: usize,
        req_funcs: Arc<ReqFuncTable>,
        hooks: Arc<PLMutex<Vec<Option<HookHandle>>>>,
    ) -> std::io::Result<Self> {
        let kill_switch = Arc::new(AtomicBool::new(false));
        let queue: MtList<BgWorkItem> = MtList::new();
        let producer = queue.producer();
        let thread_kill = Arc::clone(&kill_switch);

        let join = thread::Builder::new()
            .name(format!("nexus-bg-{idx}"))
            .spawn(move || run_loop(queue, req_funcs, hooks, thread_kill))?;

        Ok(Self {
            producer,
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

fn run_loop(
    queue: MtList<BgWorkItem>,
    req_funcs: Arc<ReqFuncTable>,
    hooks: Arc<PLMutex<Vec<Option<HookHandle>>>>,
    kill_switch: Arc<AtomicBool>,
) {
    while !kill_switch.load(Ordering::Acquire) {
        let Some(item) = queue.pop_blocking(WORKER_POLL_INTERVAL) else {
            continue;
        };
        dispatch(item, &req_funcs, &hooks);
    }
}

fn dispatch(
    item: BgWorkItem,
    req_funcs: &Arc<ReqFuncTable>,
    hooks: &Arc<PLMutex<Vec<Option<HookHandle>>>>,
) {
    match item.kind {
        BgWorkKind::Request { req_type } => {
            let table = req_funcs.load();
            match table.get(req_type as usize).copied().flatten() {
                Some(handler) => handler(item.context, item.sslot),
                None => {
                    log::warn!(
                        "worker: no handler registered for request type {req_type} (endpoint {}), \
                         surfacing as a dispatch-error response",
                        item.endpoint_id
                    );
                    let endpoint_id = item.endpoint_id;
                    let error_item = BgWorkItem::dispatch_error(
                        endpoint_id,
                        req_type,
                        item.context,
                        item.sslot,
                    );
                    route_response(endpoint_id, error_item, hooks);
                }
            }
        }
        BgWorkKind::Response | BgWorkKind::DispatchError { .. } => {
            route_response(item.endpoint_id, item, hooks);
        }
    }
}

/// Push a completed or error response back into `endpoint_id`'s response
/// mailbox via the registry, the same coarse lock SM dispatch uses.
fn route_response(
    endpoint_id: u8,
    item: BgWorkItem,
    hooks: &Arc<PLMutex<Vec<Option<HookHandle>>>>,
) {
    let hooks = hooks.lock();
    match hooks.get(endpoint_id as usize).and_then(Option::as_ref) {
        Some(handle) => handle.response_rx.push(item),
        None => log::debug!(
            "worker: no hook registered for endpoint {endpoint_id}, dropping response"
        ),
    }
}
