// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Session-management and message-buffering core for a datacenter RPC
//! runtime.
//!
//! This crate covers the two hardest pieces of such a runtime: the
//! [`buffer`] module's zero-copy Message Buffer layered over a slab-backed
//! Backing Buffer, and the [`Nexus`], the process-wide coordinator that
//! owns the session-management control-plane thread, a background worker
//! pool, a per-endpoint [`hook::Hook`] registry, and the request-handler
//! table — all without locks on the fast path.
//!
//! ```text
//! +------------------------------------------------------------------+
//! |                              Nexus                               |
//! |                                                                  |
//! |   +------------+     sm_tx (MtList)      +-------------------+  |
//! |   |  Endpoint  | ----------------------> |   SM thread        |  |
//! |   |  (Hook)    | <---------------------- |  (ControlTransport) |  |
//! |   +------------+     sm_rx (owned)        +-------------------+  |
//! |         |                                                        |
//! |         | bg_queues (MtList, one per worker)                     |
//! |         v                                                        |
//! |   +------------+      req_funcs (ArcSwap, read-mostly)           |
//! |   |  Worker 0..N| <-------------------------------------------  |
//! |   +------------+                                                 |
//! +------------------------------------------------------------------+
//! ```
//!
//! Data-plane Message Buffers never pass through the Nexus; they flow
//! through the external transport (§6, out of scope here) using the
//! [`buffer::BufferAllocator`] trait this core defines as the allocator
//! seam.
//!
//! | Module              | Responsibility                                      |
//! |----------------------|------------------------------------------------------|
//! | [`pkthdr`]            | Fixed-size per-packet header, magic-validated         |
//! | [`buffer`]            | Backing Buffer + Message Buffer zero-copy view        |
//! | [`mtlist`]            | MPSC queue used for every cross-thread mailbox        |
//! | [`hook`]              | Hook, SM Work Items, background Work Items            |
//! | [`control_transport`] | `ControlTransport` trait + `UdpControlTransport`      |
//! | [`tsc`]               | One-shot clock-rate calibration                       |
//! | [`nexus`]             | The Nexus coordinator itself                          |
//! | [`config`]            | Compile-time tunables and constructor configuration   |
//! | [`error`]             | `NexusError` / `RegisterError`                        |

pub mod buffer;
pub mod config;
pub mod control_transport;
pub mod error;
pub mod hook;
pub mod mtlist;
mod nexus;
pub mod pkthdr;
pub mod tsc;

pub use config::NexusConfig;
pub use error::{NexusError, NexusResult, RegisterError, RegisterResult};
pub use nexus::{Nexus, ReqHandler};
