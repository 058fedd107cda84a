// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The multi-level global buffer.
//!
//! Residency is inclusive: an address tracked at level `t` also occupies an
//! entry in the eviction policy of every level from 2 up to `t` in its bank.
//! A read promotes the address to the nearest level, inserting it into each
//! level it passes through. A full bank evicts a victim which is also
//! dropped from every nearer level and is then tracked one level below the
//! bank it was evicted from.
//!
//! Timing is bank-parallel: every level needs as many rounds as its busiest
//! bank, each round costing the level's read delay. Rounds beyond the first
//! at the nearest level are counted as bank conflicts.

use std::error::Error;
use std::fmt;
use std::rc::Rc;

use tessel_dataflow::tile::{BankedAddr, TileData};
use tessel_engine::context::SimContext;
use tessel_engine::types::{Addr, Cycle, DataCategory, Level, SimError};
use tessel_track::entity::Entity;
use tessel_track::{debug, trace};

use crate::config::{BufferConfig, HierarchyConfig, to_mem_string};
use crate::eviction::{EvictionPolicy, PolicyKind};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BufferError {
    /// A request arrived before `configure_layer`.
    Sequencing(String),

    UntrackedAddress {
        category: DataCategory,
        addr: Addr,
    },

    /// An evicted address was not resident at the level it was evicted from.
    LevelMismatch {
        category: DataCategory,
        addr: Addr,
        expected: Level,
        found: Option<Level>,
    },

    /// A full bank had nothing to evict.
    EmptyPolicy {
        category: DataCategory,
        level: Level,
        bank: usize,
    },

    InvalidBank {
        category: DataCategory,
        addr: Addr,
        bank: usize,
        banks: usize,
    },

    LevelOutOfRange {
        category: DataCategory,
        addr: Addr,
        level: Level,
        levels: usize,
    },
}

impl fmt::Display for BufferError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Global buffer inconsistency: ")?;
        match self {
            BufferError::Sequencing(msg) => write!(f, "{msg}"),
            BufferError::UntrackedAddress { category, addr } => {
                write!(f, "requested untracked {category} address {addr:#x}")
            }
            BufferError::LevelMismatch {
                category,
                addr,
                expected,
                found,
            } => match found {
                Some(found) => write!(
                    f,
                    "evicted {category} address {addr:#x} is at level {found}, expected at least {expected}"
                ),
                None => write!(
                    f,
                    "evicted {category} address {addr:#x} is not tracked, expected at least level {expected}"
                ),
            },
            BufferError::EmptyPolicy {
                category,
                level,
                bank,
            } => write!(
                f,
                "full {category} bank {bank} at level {level} has nothing to evict"
            ),
            BufferError::InvalidBank {
                category,
                addr,
                bank,
                banks,
            } => write!(
                f,
                "{category} address {addr:#x} mapped to bank {bank} of {banks}"
            ),
            BufferError::LevelOutOfRange {
                category,
                addr,
                level,
                levels,
            } => write!(
                f,
                "{category} address {addr:#x} tracked at level {level} of {levels}"
            ),
        }
    }
}

impl Error for BufferError {}

impl From<BufferError> for SimError {
    fn from(err: BufferError) -> Self {
        SimError(err.to_string())
    }
}

/// Access and conflict counters, reset by `configure_layer`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferCounters {
    pub act_reads: u64,
    pub psum_reads: u64,
    pub wgt_reads: u64,
    pub out_writes: u64,
    pub act_bank_conflicts: u64,
    pub psum_bank_conflicts: u64,
    pub wgt_bank_conflicts: u64,
    pub out_bank_conflicts: u64,
}

/// Result of pushing one request's bank accesses through the levels.
struct Rounds {
    end: Cycle,
    accesses: u64,
    conflicts: u64,
}

/// The levels and per-bank policies of one data category.
struct Hierarchy {
    category: DataCategory,
    config: HierarchyConfig,

    /// `policies[level - 2][bank]` for every level above the farthest.
    policies: Vec<Vec<Box<dyn EvictionPolicy>>>,
}

impl Hierarchy {
    fn new(category: DataCategory, config: HierarchyConfig, policy: PolicyKind) -> Self {
        let policies: Vec<Vec<Box<dyn EvictionPolicy>>> = (2..=config.num_levels())
            .map(|level| {
                let capacity = config.bank_capacity(level);
                (0..config.banks).map(|_| policy.build(capacity)).collect::<Vec<_>>()
            })
            .collect();
        Self {
            category,
            config,
            policies,
        }
    }

    fn levels(&self) -> usize {
        self.config.num_levels()
    }

    fn banks(&self) -> usize {
        self.config.banks
    }

    fn flush(&mut self) {
        for policy in self.policies.iter_mut().flatten() {
            policy.flush();
        }
    }

    fn policy(&mut self, level: Level, bank: usize) -> &mut Box<dyn EvictionPolicy> {
        &mut self.policies[level - 2][bank]
    }

    /// Per-level, per-bank access counters for one request.
    fn access_counts(&self) -> Vec<Vec<u64>> {
        vec![vec![0; self.banks()]; self.levels()]
    }

    fn check_bank(&self, addr: &BankedAddr) -> Result<(), BufferError> {
        if addr.bank >= self.banks() {
            return Err(BufferError::InvalidBank {
                category: self.category,
                addr: addr.addr,
                bank: addr.bank,
                banks: self.banks(),
            });
        }
        Ok(())
    }

    /// Bring `addr` to the nearest level, counting an access at every level
    /// from where it currently resides.
    fn promote(
        &mut self,
        ctx: &SimContext,
        addr: &BankedAddr,
        counts: &mut [Vec<u64>],
    ) -> Result<(), BufferError> {
        self.check_bank(addr)?;
        let levels = self.levels();
        let Some(level) = ctx.tracked().level(addr.addr) else {
            return Err(BufferError::UntrackedAddress {
                category: self.category,
                addr: addr.addr,
            });
        };
        if level == 0 || level > levels {
            return Err(BufferError::LevelOutOfRange {
                category: self.category,
                addr: addr.addr,
                level,
                levels,
            });
        }

        for count in &mut counts[level - 1..] {
            count[addr.bank] += 1;
        }

        for lvl in (level + 1..=levels).rev() {
            if !self.policy(lvl, addr.bank).free_entry() {
                let Some(victim) = self.policy(lvl, addr.bank).evict_addr() else {
                    return Err(BufferError::EmptyPolicy {
                        category: self.category,
                        level: lvl,
                        bank: addr.bank,
                    });
                };
                self.demote(ctx, victim, lvl, addr.bank)?;
            }
            self.policy(lvl, addr.bank).insert_addr(addr.addr);
        }

        for lvl in 2..=level {
            self.policy(lvl, addr.bank).update_status(addr.addr);
        }

        ctx.tracked().set_level(addr.addr, levels);
        Ok(())
    }

    /// Record that `victim` has been evicted from `level`.
    fn demote(
        &mut self,
        ctx: &SimContext,
        victim: Addr,
        level: Level,
        bank: usize,
    ) -> Result<(), BufferError> {
        match ctx.tracked().level(victim) {
            Some(found) if found >= level => {
                for lvl in level + 1..=found {
                    self.policy(lvl, bank).remove_addr(victim);
                }
                ctx.tracked().set_level(victim, level - 1);
                Ok(())
            }
            found => Err(BufferError::LevelMismatch {
                category: self.category,
                addr: victim,
                expected: level,
                found,
            }),
        }
    }

    /// Walk the levels farthest to nearest, each costing as many rounds as
    /// its busiest bank needs.
    fn read_rounds(&self, counts: &[Vec<u64>], start: Cycle) -> Rounds {
        let apa = self.config.addrs_per_access as u64;
        let mut rounds = Rounds {
            end: start,
            accesses: 0,
            conflicts: 0,
        };
        for (index, level) in counts.iter().enumerate() {
            let steps = level
                .iter()
                .map(|reads| reads.div_ceil(apa))
                .inspect(|bank_reads| rounds.accesses += bank_reads)
                .max()
                .unwrap_or(0);
            rounds.end += steps * self.config.read_delay(index + 1);
            if index + 1 == counts.len() {
                rounds.conflicts = steps.saturating_sub(1);
            }
        }
        rounds
    }
}

pub struct GlobalBuffer {
    pub entity: Rc<Entity>,
    ctx: SimContext,
    config: BufferConfig,

    act: Hierarchy,
    wgt: Hierarchy,
    out: Hierarchy,

    read_ready_cycle: Cycle,
    psum_read_ready_cycle: Cycle,
    write_ready_cycle: Cycle,
    counters: BufferCounters,
    configured: bool,
}

impl GlobalBuffer {
    pub fn new(ctx: &SimContext, config: BufferConfig) -> Result<Self, SimError> {
        config.validate()?;
        let policy = config.policy;
        Ok(Self {
            entity: Rc::new(Entity::new(ctx.top(), "buffer")),
            ctx: ctx.clone(),
            act: Hierarchy::new(DataCategory::Activation, config.activations.clone(), policy),
            wgt: Hierarchy::new(DataCategory::Weight, config.weights.clone(), policy),
            out: Hierarchy::new(DataCategory::Output, config.outputs(), policy),
            config,
            read_ready_cycle: 0,
            psum_read_ready_cycle: 0,
            write_ready_cycle: 0,
            counters: BufferCounters::default(),
            configured: false,
        })
    }

    #[must_use]
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Reset timing and counters and drop all replacement state.
    pub fn configure_layer(&mut self) {
        self.read_ready_cycle = 0;
        self.psum_read_ready_cycle = 0;
        self.write_ready_cycle = 0;
        self.counters = BufferCounters::default();
        self.act.flush();
        self.wgt.flush();
        self.out.flush();
        self.configured = true;
        debug!(self.entity ; "layer configured");
    }

    fn check_configured(&self, request: &str) -> Result<(), BufferError> {
        if self.configured {
            Ok(())
        } else {
            Err(BufferError::Sequencing(format!(
                "{request} before configure_layer"
            )))
        }
    }

    /// Fetch the activations of every valid tile.
    ///
    /// When the whole layer is resident on chip unseen addresses are
    /// registered at the nearest level, otherwise they must already be
    /// tracked. Returns true if any activation was read.
    pub fn act_read_request<T>(
        &mut self,
        tiles: &[TileData<T>],
        layer_resident: bool,
    ) -> Result<bool, BufferError> {
        self.check_configured("activation read")?;
        let mut counts = self.act.access_counts();
        let nearest = self.act.levels();
        let mut read = false;

        for tile in tiles.iter().filter(|tile| tile.valid && !tile.act_addresses.is_empty()) {
            read = true;
            for addr in tile.act_addresses.iter().flatten().flatten() {
                if layer_resident && !self.ctx.tracked().contains(addr.addr) {
                    self.act.check_bank(addr)?;
                    self.ctx
                        .register(DataCategory::Activation, addr.addr, nearest);
                }
                self.act.promote(&self.ctx, addr, &mut counts)?;
            }
        }

        let start = if read { self.ctx.clock().now() } else { 0 };
        let rounds = self.act.read_rounds(&counts, start);
        self.counters.act_reads += rounds.accesses;
        self.counters.act_bank_conflicts += rounds.conflicts;
        self.read_ready_cycle = self.read_ready_cycle.max(rounds.end);
        trace!(self.entity ; "act read: {} accesses, ready at {}", rounds.accesses, self.read_ready_cycle);
        Ok(read)
    }

    /// Fetch the partial sums of every valid tile.
    ///
    /// Partial sums are ordered after any pending write. Returns true if any
    /// partial sum was read.
    pub fn psum_read_request<T>(&mut self, tiles: &[TileData<T>]) -> Result<bool, BufferError> {
        self.check_configured("partial sum read")?;
        let mut counts = self.out.access_counts();
        let mut read = false;

        for tile in tiles.iter().filter(|tile| tile.valid && !tile.psum_addresses.is_empty()) {
            read = true;
            for addr in tile.psum_addresses.iter().flatten() {
                self.out.promote(&self.ctx, addr, &mut counts)?;
            }
        }

        let start = if read {
            self.ctx.clock().now().max(self.write_ready_cycle)
        } else {
            0
        };
        let rounds = self.out.read_rounds(&counts, start);
        self.counters.psum_reads += rounds.accesses;
        self.counters.psum_bank_conflicts += rounds.conflicts;
        self.psum_read_ready_cycle = self.psum_read_ready_cycle.max(rounds.end);
        self.read_ready_cycle = self.read_ready_cycle.max(self.psum_read_ready_cycle);
        trace!(self.entity ; "psum read: {} accesses, ready at {}", rounds.accesses, self.psum_read_ready_cycle);
        Ok(read)
    }

    /// Fetch the weights of every valid tile. Weights are always expected
    /// to be tracked already.
    pub fn wgt_read_request<T>(&mut self, tiles: &[TileData<T>]) -> Result<bool, BufferError> {
        self.check_configured("weight read")?;
        let mut counts = self.wgt.access_counts();
        let mut read = false;

        for tile in tiles.iter().filter(|tile| tile.valid && !tile.wgt_addresses.is_empty()) {
            read = true;
            for addr in tile.wgt_addresses.iter().flatten() {
                self.wgt.promote(&self.ctx, addr, &mut counts)?;
            }
        }

        let start = if read { self.ctx.clock().now() } else { 0 };
        let rounds = self.wgt.read_rounds(&counts, start);
        self.counters.wgt_reads += rounds.accesses;
        self.counters.wgt_bank_conflicts += rounds.conflicts;
        self.read_ready_cycle = self.read_ready_cycle.max(rounds.end);
        trace!(self.entity ; "wgt read: {} accesses, ready at {}", rounds.accesses, self.read_ready_cycle);
        Ok(read)
    }

    /// Write back the outputs of every valid tile at the nearest level.
    pub fn write_request<T>(&mut self, tiles: &[TileData<T>]) -> Result<(), BufferError> {
        self.check_configured("output write")?;
        let start = self
            .write_ready_cycle
            .max(self.psum_read_ready_cycle)
            .max(self.ctx.clock().now());
        let nearest = self.out.levels();

        let mut bank_writes = vec![0_u64; self.out.banks()];
        for tile in tiles.iter().filter(|tile| tile.valid) {
            for addr in tile.out_addresses.iter().flatten() {
                self.out.check_bank(addr)?;
                bank_writes[addr.bank] += 1;
                self.ctx.register(DataCategory::Output, addr.addr, nearest);
            }
        }

        let apa = self.out.config.addrs_per_access as u64;
        let mut steps = 0;
        for writes in bank_writes {
            let rounds = writes.div_ceil(apa);
            self.counters.out_writes += rounds;
            steps = steps.max(rounds);
        }

        let end = start + steps * self.out.config.nearest_write_delay();
        self.write_ready_cycle = self.write_ready_cycle.max(end);
        self.counters.out_bank_conflicts += steps.saturating_sub(1);
        trace!(self.entity ; "write: {} rounds, done at {}", steps, self.write_ready_cycle);
        Ok(())
    }

    /// Forget the tracked addresses of the requested categories.
    pub fn evict_data(&mut self, evict_act: bool, evict_out: bool, evict_wgt: bool) {
        let requested = [
            (evict_act, DataCategory::Activation),
            (evict_out, DataCategory::Output),
            (evict_wgt, DataCategory::Weight),
        ];
        for (_, category) in requested.into_iter().filter(|(evict, _)| *evict) {
            if let Some((first, last)) = self.ctx.ranges().get(category) {
                self.ctx.tracked().remove_range(first, last);
                self.ctx.ranges().clear(category);
                debug!(self.entity ; "evicted {category} addresses {first:#x}..={last:#x}");
            }
            match category {
                DataCategory::Activation => self.act.flush(),
                DataCategory::Weight => self.wgt.flush(),
                DataCategory::Output | DataCategory::PartialSum => self.out.flush(),
            }
        }
    }

    /// True once every pending read has completed.
    #[must_use]
    pub fn data_ready(&self) -> bool {
        self.read_ready_cycle <= self.ctx.clock().now()
    }

    #[must_use]
    pub fn write_done(&self) -> bool {
        self.write_ready_cycle <= self.ctx.clock().now()
    }

    #[must_use]
    pub fn read_ready_cycle(&self) -> Cycle {
        self.read_ready_cycle
    }

    #[must_use]
    pub fn psum_read_ready_cycle(&self) -> Cycle {
        self.psum_read_ready_cycle
    }

    #[must_use]
    pub fn write_ready_cycle(&self) -> Cycle {
        self.write_ready_cycle
    }

    #[must_use]
    pub fn counters(&self) -> BufferCounters {
        self.counters
    }

    /// Addresses currently held by `bank` of `level` in the policy of
    /// `category`. `None` when that level has no policy (the farthest level
    /// or beyond the nearest) or the bank does not exist.
    #[must_use]
    pub fn policy_len(&self, category: DataCategory, level: Level, bank: usize) -> Option<usize> {
        let hierarchy = match category {
            DataCategory::Activation => &self.act,
            DataCategory::Weight => &self.wgt,
            DataCategory::PartialSum | DataCategory::Output => &self.out,
        };
        let banks = hierarchy.policies.get(level.checked_sub(2)?)?;
        banks.get(bank).map(|policy| policy.len())
    }

    /// A human readable description of the buffer configuration.
    #[must_use]
    pub fn header(&self) -> String {
        let act = &self.config.activations;
        let wgt = &self.config.weights;
        let list = |values: Vec<String>| values.join(" ");
        let sizes = |config: &HierarchyConfig| {
            list(config.levels.iter().map(|l| to_mem_string(l.size_bytes)).collect())
        };
        let width = |config: &HierarchyConfig| config.addrs_per_access as u64 * config.entry_bytes * 8;

        let mut header = String::new();
        header += &format!("Activations memory size: {}\n", sizes(act));
        header += &format!("Weight memory size: {}\n", sizes(wgt));
        header += &format!("Number of activation banks: {}\n", act.banks);
        header += &format!("Number of weight banks: {}\n", wgt.banks);
        header += &format!("Number of output banks: {}\n", self.config.out_banks);
        header += &format!("Activation bank interface width: {}\n", width(act));
        header += &format!("Weight bank interface width: {}\n", width(wgt));
        header += &format!(
            "Activations read delay: {}\n",
            list(act.levels.iter().map(|l| l.read_delay.to_string()).collect())
        );
        header += &format!(
            "Activations write delay: {}\n",
            list(act.levels.iter().map(|l| l.write_delay.to_string()).collect())
        );
        header += &format!(
            "Weights read delay: {}\n",
            list(wgt.levels.iter().map(|l| l.read_delay.to_string()).collect())
        );
        header += &format!("Eviction policy: {}\n", self.config.policy);
        header
    }
}
