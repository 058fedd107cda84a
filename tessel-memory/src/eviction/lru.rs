// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Least-recently-used replacement.

use tessel_engine::types::Addr;

use crate::eviction::EvictionPolicy;
use crate::eviction::order::AddrOrder;

/// Resident addresses ordered from least to most recently used.
pub struct Lru {
    order: AddrOrder,
    capacity: usize,
}

impl Lru {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            order: AddrOrder::with_capacity(capacity),
            capacity,
        }
    }
}

impl EvictionPolicy for Lru {
    fn flush(&mut self) {
        self.order.clear();
    }

    fn free_entry(&self) -> bool {
        self.order.len() < self.capacity
    }

    fn insert_addr(&mut self, addr: Addr) {
        self.order.push_back(addr);
    }

    fn evict_addr(&mut self) -> Option<Addr> {
        self.order.pop_front()
    }

    fn update_status(&mut self, addr: Addr) {
        if self.order.contains(addr) {
            self.order.push_back(addr);
        }
    }

    fn remove_addr(&mut self, addr: Addr) -> bool {
        self.order.remove(addr)
    }

    fn len(&self) -> usize {
        self.order.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
