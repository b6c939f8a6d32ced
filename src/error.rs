// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Error types surfaced by Nexus construction and registration.
//!
//! Usage-contract violations (double-registering a hook, resizing a Message
//! Buffer past its `max_*` bounds, reading an invalid Message Buffer) are not
//! part of this error hierarchy: those are programmer bugs, caught by
//! `debug_assert!`/`assert!`, not recoverable values. See the crate-level docs.

use std::fmt;
use std::io;

/// Result type for Nexus construction.
pub type NexusResult<T> = Result<T, NexusError>;

/// Result type for request-handler and hook registration.
pub type RegisterResult<T> = Result<T, RegisterError>;

/// Failures that can prevent a [`crate::Nexus`] from being constructed.
///
/// A failed construction produces no Nexus object; there is nothing to tear
/// down.
#[derive(Debug)]
pub enum NexusError {
    /// Binding the management UDP port, or initializing the control
    /// transport library bound to it, failed.
    PortBind { port: u16, source: io::Error },
    /// `num_bg_threads` exceeds [`crate::config::MAX_BG_THREADS`].
    TooManyBgThreads { requested: usize, max: usize },
    /// Spawning the session-management or a background thread failed.
    ThreadSpawn(io::Error),
}

impl fmt::Display for NexusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortBind { port, source } => {
                write!(f, "failed to bind management UDP port {port}: {source}")
            }
            Self::TooManyBgThreads { requested, max } => write!(
                f,
                "requested {requested} background threads, exceeds limit of {max}"
            ),
            Self::ThreadSpawn(e) => write!(f, "failed to spawn Nexus thread: {e}"),
        }
    }
}

impl std::error::Error for NexusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::PortBind { source, .. } => Some(source),
            Self::ThreadSpawn(e) => Some(e),
            Self::TooManyBgThreads { .. } => None,
        }
    }
}

/// Failures returned by `register_req_func`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterError {
    /// The request-function table has been frozen by a prior `register_hook`.
    RegistrationClosed,
    /// `req_type` already has a handler installed.
    SlotOccupied(u8),
    /// The supplied handler was invalid (e.g. a null/empty function pointer
    /// in the source design; here, attempting to register a handler twice
    /// for the same closure slot via an empty marker).
    InvalidHandler,
    /// `register_hook` was called for an endpoint ID that already has a
    /// registered [`crate::hook::Hook`].
    SlotAlreadyRegistered(u8),
}

impl fmt::Display for RegisterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RegistrationClosed => {
                write!(f, "request-function registration window is closed")
            }
            Self::SlotOccupied(t) => write!(f, "request type {t} already has a handler"),
            Self::InvalidHandler => write!(f, "invalid (empty) request handler"),
            Self::SlotAlreadyRegistered(id) => {
                write!(f, "endpoint {id} already has a registered hook")
            }
        }
    }
}

impl std::error::Error for RegisterError {}
