// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Compile-time tunables and constructor-time configuration for the Nexus.

use std::time::Duration;

/// Highest endpoint (RPC) ID the hook registry can address.
///
/// The registry is a flat array of `MAX_RPC_ID + 1` slots, so endpoint IDs are
/// 8-bit and the array fits comfortably in a few cache lines' worth of pointers.
pub const MAX_RPC_ID: usize = 255;

/// Upper bound on the number of background worker threads a Nexus may spawn.
///
/// Chosen to stay within the small-RPC optimization regime the session-management
/// thread budgets CPU for; a Nexus requesting more is a construction error.
pub const MAX_BG_THREADS: usize = 64;

/// Size of the request-function table, indexed by the 8-bit request type.
pub const MAX_REQ_TYPES: usize = 256;

/// Bounded wait per session-management event-loop iteration.
///
/// Keeps the SM thread's CPU usage low while still reacting to new TX work and
/// peer events promptly; see the event loop description in the component design.
pub const SM_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Bounded wait the session-management thread spends resolving a hostname before
/// giving up and returning an error Work Item to the submitting endpoint.
pub const SM_DNS_RESOLVE_TIMEOUT: Duration = Duration::from_millis(200);

/// Policy for pinning the session-management thread to an OS core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorePinPolicy {
    /// Do not pin; let the OS scheduler place the thread.
    None,
    /// Pin to a specific logical core ID.
    Core(usize),
}

impl Default for CorePinPolicy {
    fn default() -> Self {
        Self::None
    }
}

/// Constructor-time configuration for a [`crate::Nexus`].
#[derive(Debug, Clone)]
pub struct NexusConfig {
    /// Local hostname used to key outbound SM peer lookups.
    pub hostname: String,
    /// UDP port the session-management control transport binds to.
    pub mgmt_udp_port: u16,
    /// Number of background worker threads to spawn (0..=[`MAX_BG_THREADS`]).
    pub num_bg_threads: usize,
    /// Core-pin policy applied to the session-management thread.
    pub sm_core_pin: CorePinPolicy,
}

impl NexusConfig {
    /// Construct a config with no core pinning.
    #[must_use]
    pub fn new(hostname: impl Into<String>, mgmt_udp_port: u16, num_bg_threads: usize) -> Self {
        Self {
            hostname: hostname.into(),
            mgmt_udp_port,
            num_bg_threads,
            sm_core_pin: CorePinPolicy::None,
        }
    }

    /// Pin the session-management thread to `core_id`.
    #[must_use]
    pub fn with_sm_core_pin(mut self, core_id: usize) -> Self {
        self.sm_core_pin = CorePinPolicy::Core(core_id);
        self
    }
}
