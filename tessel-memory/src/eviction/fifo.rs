// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! First-in first-out replacement.

use tessel_engine::types::Addr;

use crate::eviction::EvictionPolicy;
use crate::eviction::order::AddrOrder;

pub struct Fifo {
    queue: AddrOrder,
    capacity: usize,
}

impl Fifo {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: AddrOrder::with_capacity(capacity),
            capacity,
        }
    }
}

impl EvictionPolicy for Fifo {
    fn flush(&mut self) {
        self.queue.clear();
    }

    fn free_entry(&self) -> bool {
        self.queue.len() < self.capacity
    }

    /// A resident address keeps its place in the queue.
    fn insert_addr(&mut self, addr: Addr) {
        if !self.queue.contains(addr) {
            self.queue.push_back(addr);
        }
    }

    fn evict_addr(&mut self) -> Option<Addr> {
        self.queue.pop_front()
    }

    /// Insertion order alone decides eviction.
    fn update_status(&mut self, _addr: Addr) {}

    fn remove_addr(&mut self, addr: Addr) -> bool {
        self.queue.remove(addr)
    }

    fn len(&self) -> usize {
        self.queue.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_in_insertion_order() {
        let mut fifo = Fifo::new(3);
        for addr in [10, 20, 30] {
            assert!(fifo.free_entry());
            fifo.insert_addr(addr);
        }
        assert!(!fifo.free_entry());

        fifo.update_status(10);
        assert_eq!(fifo.evict_addr(), Some(10));
        assert_eq!(fifo.evict_addr(), Some(20));
        assert!(fifo.free_entry());
    }

    #[test]
    fn reinsertion_keeps_the_original_place() {
        let mut fifo = Fifo::new(3);
        for addr in [10, 20, 30] {
            fifo.insert_addr(addr);
        }
        fifo.insert_addr(10);
        assert_eq!(fifo.len(), 3);
        assert!(fifo.remove_addr(20));
        assert_eq!(fifo.evict_addr(), Some(10));
        assert_eq!(fifo.evict_addr(), Some(30));
    }

    #[test]
    fn empty_has_nothing_to_evict() {
        let mut fifo = Fifo::new(1);
        assert_eq!(fifo.evict_addr(), None);
        fifo.insert_addr(4);
        fifo.flush();
        assert!(fifo.is_empty());
        assert_eq!(fifo.evict_addr(), None);
    }
}
