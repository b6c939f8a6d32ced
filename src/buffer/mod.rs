// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Zero-copy message buffering: Backing Buffers and the Message Buffer view
//! layered over them.

mod backing;
mod msgbuf;

pub use backing::{BackingBuffer, BufferAllocator, SlabAllocator};
pub use msgbuf::{required_capacity, MsgBuf, Progress};
