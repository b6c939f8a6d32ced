// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! The hook registry: the lock-protected array the SM thread and background
//! workers consult to route Work Items to a registered endpoint (§4.5, §5).
//!
//! The Nexus never stores a whole [`crate::hook::Hook`] here — a Hook is
//! owned by its endpoint, never the Nexus (§9's cyclic-reference design
//! note) — only the two producer handles dispatch needs.

use crate::hook::{BgWorkItem, SmWorkItem};
use crate::mtlist::MtListProducer;

/// What the registry remembers about a registered endpoint.
pub(super) struct HookHandle {
    pub(super) sm_rx: MtListProducer<SmWorkItem>,
    pub(super) response_rx: MtListProducer<BgWorkItem>,
}
