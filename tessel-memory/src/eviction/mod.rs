// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Per-bank replacement policies.

use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tessel_engine::types::Addr;

pub mod fifo;
pub mod lru;
mod order;

pub use fifo::Fifo;
pub use lru::Lru;

/// Replacement state of one bank at one level.
///
/// `evict_addr` returns `None` when the bank is empty; the caller decides
/// whether that is an error.
pub trait EvictionPolicy {
    /// Forget every resident address.
    fn flush(&mut self);

    /// True if an address can be inserted without evicting.
    fn free_entry(&self) -> bool;

    fn insert_addr(&mut self, addr: Addr);

    /// Remove and return the least preferred resident address.
    fn evict_addr(&mut self) -> Option<Addr>;

    /// Record a repeat access to `addr`.
    fn update_status(&mut self, addr: Addr);

    /// Drop `addr` without going through the replacement order.
    ///
    /// Returns true if it was resident.
    fn remove_addr(&mut self, addr: Addr) -> bool;

    fn len(&self) -> usize;

    fn capacity(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    #[default]
    Fifo,
    Lru,
}

impl PolicyKind {
    /// Build an empty policy holding up to `capacity` addresses.
    #[must_use]
    pub fn build(self, capacity: usize) -> Box<dyn EvictionPolicy> {
        match self {
            PolicyKind::Fifo => Box::new(Fifo::new(capacity)),
            PolicyKind::Lru => Box::new(Lru::new(capacity)),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            PolicyKind::Fifo => write!(f, "FIFO"),
            PolicyKind::Lru => write!(f, "LRU"),
        }
    }
}
