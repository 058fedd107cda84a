// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Insertion-ordered address set with constant-time removal.
//!
//! Removing or re-queueing an address only updates the index; the stale
//! queue entry is skipped when it reaches the front, and the queue is
//! compacted once stale entries outnumber live ones.

use std::collections::{HashMap, VecDeque};

use tessel_engine::types::Addr;

/// Stale entries tolerated before the queue is compacted.
const SLACK: usize = 32;

#[derive(Default)]
pub(crate) struct AddrOrder {
    /// Addresses in queue order, each tagged with the stamp it was queued
    /// with.
    queue: VecDeque<(Addr, u64)>,

    /// Current stamp of every resident address.
    live: HashMap<Addr, u64>,
    next_stamp: u64,
}

impl AddrOrder {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            queue: VecDeque::with_capacity(capacity),
            live: HashMap::with_capacity(capacity),
            next_stamp: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }

    pub(crate) fn contains(&self, addr: Addr) -> bool {
        self.live.contains_key(&addr)
    }

    pub(crate) fn clear(&mut self) {
        self.queue.clear();
        self.live.clear();
    }

    /// Queue `addr` last, moving it there if already resident.
    pub(crate) fn push_back(&mut self, addr: Addr) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        self.live.insert(addr, stamp);
        self.queue.push_back((addr, stamp));
        self.compact();
    }

    pub(crate) fn pop_front(&mut self) -> Option<Addr> {
        while let Some((addr, stamp)) = self.queue.pop_front() {
            if self.live.get(&addr) == Some(&stamp) {
                self.live.remove(&addr);
                return Some(addr);
            }
        }
        None
    }

    pub(crate) fn remove(&mut self, addr: Addr) -> bool {
        let removed = self.live.remove(&addr).is_some();
        self.compact();
        removed
    }

    fn compact(&mut self) {
        if self.queue.len() > 2 * self.live.len() + SLACK {
            let live = &self.live;
            self.queue
                .retain(|(addr, stamp)| live.get(addr) == Some(stamp));
        }
    }
}
