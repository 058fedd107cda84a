// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The per-run simulation context.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use tessel_track::Tracker;
use tessel_track::entity::{Entity, toplevel};

use crate::types::{Addr, Cycle, DataCategory, Level};

/// The logical clock of a run.
///
/// It only ever moves forwards.
#[derive(Clone, Default)]
pub struct Clock {
    now: Rc<Cell<Cycle>>,
}

impl Clock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn now(&self) -> Cycle {
        self.now.get()
    }

    /// Move the clock to `cycle` if that is in the future.
    pub fn advance_to(&self, cycle: Cycle) {
        if cycle > self.now.get() {
            self.now.set(cycle);
        }
    }

    pub fn advance_by(&self, cycles: Cycle) {
        self.now.set(self.now.get() + cycles);
    }
}

impl fmt::Debug for Clock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Clock({})", self.now.get())
    }
}

/// Residency level of every address the buffer has seen.
///
/// Addresses that are absent have never been requested (or have been
/// evicted with [`TrackedAddresses::remove_range`]).
#[derive(Clone, Default)]
pub struct TrackedAddresses {
    table: Rc<RefCell<BTreeMap<Addr, Level>>>,
}

impl TrackedAddresses {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn level(&self, addr: Addr) -> Option<Level> {
        self.table.borrow().get(&addr).copied()
    }

    pub fn set_level(&self, addr: Addr, level: Level) {
        self.table.borrow_mut().insert(addr, level);
    }

    /// Start tracking `addr` at `level` unless it is already tracked.
    ///
    /// Returns true if the address was newly inserted.
    pub fn track(&self, addr: Addr, level: Level) -> bool {
        let mut table = self.table.borrow_mut();
        if table.contains_key(&addr) {
            false
        } else {
            table.insert(addr, level);
            true
        }
    }

    /// Forget every address in `first..=last`.
    pub fn remove_range(&self, first: Addr, last: Addr) {
        if first > last {
            return;
        }
        let mut table = self.table.borrow_mut();
        let doomed: Vec<Addr> = table.range(first..=last).map(|(addr, _)| *addr).collect();
        for addr in doomed {
            table.remove(&addr);
        }
    }

    #[must_use]
    pub fn contains(&self, addr: Addr) -> bool {
        self.table.borrow().contains_key(&addr)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.table.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.borrow().is_empty()
    }
}

/// The span of addresses each category has registered in the tracked table.
///
/// Partial sums live in the output address space so they share its range.
#[derive(Clone, Default)]
pub struct AddressRanges {
    ranges: Rc<RefCell<[Option<(Addr, Addr)>; 3]>>,
}

fn range_index(category: DataCategory) -> usize {
    match category {
        DataCategory::Activation => 0,
        DataCategory::Weight => 1,
        DataCategory::PartialSum | DataCategory::Output => 2,
    }
}

impl AddressRanges {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the range of `category` to include `addr`.
    pub fn extend(&self, category: DataCategory, addr: Addr) {
        let mut ranges = self.ranges.borrow_mut();
        let slot = &mut ranges[range_index(category)];
        *slot = match *slot {
            None => Some((addr, addr)),
            Some((min, max)) => Some((min.min(addr), max.max(addr))),
        };
    }

    /// The inclusive `(min, max)` range, or `None` if nothing is recorded.
    #[must_use]
    pub fn get(&self, category: DataCategory) -> Option<(Addr, Addr)> {
        self.ranges.borrow()[range_index(category)]
    }

    pub fn clear(&self, category: DataCategory) {
        self.ranges.borrow_mut()[range_index(category)] = None;
    }
}

/// Everything shared between the components of one simulation run.
#[derive(Clone)]
pub struct SimContext {
    top: Rc<Entity>,
    clock: Clock,
    tracked: TrackedAddresses,
    ranges: AddressRanges,
}

impl SimContext {
    /// Create a fresh context whose entities hang below a top-level `top`.
    #[must_use]
    pub fn new(tracker: &Tracker) -> Self {
        Self {
            top: toplevel(tracker, "top"),
            clock: Clock::new(),
            tracked: TrackedAddresses::new(),
            ranges: AddressRanges::new(),
        }
    }

    #[must_use]
    pub fn top(&self) -> &Rc<Entity> {
        &self.top
    }

    #[must_use]
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    #[must_use]
    pub fn tracked(&self) -> &TrackedAddresses {
        &self.tracked
    }

    #[must_use]
    pub fn ranges(&self) -> &AddressRanges {
        &self.ranges
    }

    /// Register `addr` at `level` (if not yet tracked) and record it in the
    /// range of `category`.
    pub fn register(&self, category: DataCategory, addr: Addr, level: Level) {
        self.tracked.track(addr, level);
        self.ranges.extend(category, addr);
    }
}
