// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `MtList`: the multi-producer, single-consumer queue used for every
//! cross-thread mailbox in this core (the Nexus SM TX queue, each Hook's
//! owned SM RX queue, each background worker's request queue).
//!
//! Thin named wrapper around [`crossbeam::channel`] rather than a hand-rolled
//! ring: producers never block (an unbounded channel's `send` is effectively
//! wait-free for our purposes — queue depth is bounded in practice by the
//! number of in-flight sessions), and the single consumer can either
//! non-blockingly drain (`try_pop`, used by endpoint threads, which the
//! concurrency model forbids from blocking inside the core) or block with a
//! bounded timeout (`pop_blocking`, used by the SM thread and background
//! workers).

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::time::Duration;

/// Multi-producer, single-consumer FIFO queue.
///
/// Cloning an `MtList` clones the underlying sender/receiver handles (cheap,
/// `Arc`-backed in `crossbeam::channel`); every core mailbox hands out clones
/// of the producer side while retaining sole ownership of the consumer side,
/// matching the MPSC discipline §5 requires.
pub struct MtList<T> {
    tx: Sender<T>,
    rx: Receiver<T>,
}

impl<T> MtList<T> {
    /// Create an empty `MtList`.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = channel::unbounded();
        Self { tx, rx }
    }

    /// A producer handle that can be cloned and shared across threads.
    #[must_use]
    pub fn producer(&self) -> MtListProducer<T> {
        MtListProducer {
            tx: self.tx.clone(),
        }
    }

    /// Push an item. Never blocks.
    pub fn push(&self, item: T) {
        // An unbounded channel's send only fails if every receiver has been
        // dropped, which cannot happen here since `self` holds one.
        let _ = self.tx.send(item);
    }

    /// Pop an item if one is immediately available, without blocking.
    pub fn try_pop(&self) -> Option<T> {
        match self.rx.try_recv() {
            Ok(item) => Some(item),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Block for up to `timeout` waiting for an item.
    pub fn pop_blocking(&self, timeout: Duration) -> Option<T> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Some(item),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Drain every currently queued item without blocking. Used by the SM
    /// thread's TX-drain step and at teardown to avoid leaking pending work.
    pub fn drain(&self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.try_pop() {
            items.push(item);
        }
        items
    }
}

impl<T> Default for MtList<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A cloneable producer handle for an [`MtList`].
#[derive(Clone)]
pub struct MtListProducer<T> {
    tx: Sender<T>,
}

impl<T> MtListProducer<T> {
    /// Push an item. Never blocks.
    pub fn push(&self, item: T) {
        let _ = self.tx.send(item);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_ordering() {
        let list = MtList::new();
        list.push(1);
        list.push(2);
        list.push(3);
        assert_eq!(list.try_pop(), Some(1));
        assert_eq!(list.try_pop(), Some(2));
        assert_eq!(list.try_pop(), Some(3));
        assert_eq!(list.try_pop(), None);
    }

    #[test]
    fn producer_handle_pushes_into_same_list() {
        let list: MtList<u32> = MtList::new();
        let producer = list.producer();
        producer.push(42);
        assert_eq!(list.try_pop(), Some(42));
    }

    #[test]
    fn pop_blocking_times_out_when_empty() {
        let list: MtList<u32> = MtList::new();
        let start = std::time::Instant::now();
        let result = list.pop_blocking(Duration::from_millis(20));
        assert!(result.is_none());
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn drain_empties_the_queue() {
        let list = MtList::new();
        for i in 0..5 {
            list.push(i);
        }
        let items = list.drain();
        assert_eq!(items, vec![0, 1, 2, 3, 4]);
        assert_eq!(list.try_pop(), None);
    }

    #[test]
    fn cross_thread_push_and_blocking_pop() {
        use std::sync::Arc;
        use std::thread;

        let list = Arc::new(MtList::new());
        let producer = list.producer();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            producer.push(99);
        });

        let got = list.pop_blocking(Duration::from_secs(1));
        assert_eq!(got, Some(99));
        handle.join().unwrap();
    }
}
