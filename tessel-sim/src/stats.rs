// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Per-layer results of a run.

use std::fmt;

use tessel_dataflow::layer::LayerKind;
use tessel_engine::types::Cycle;
use tessel_memory::global_buffer::BufferCounters;

#[derive(Clone, Debug, PartialEq)]
pub struct LayerStats {
    pub name: String,
    pub kind: LayerKind,

    /// Engine ticks over every batch.
    pub steps: u64,

    /// Cycles from the start of the layer until its last write completed.
    pub cycles: Cycle,
    pub counters: BufferCounters,
}

impl fmt::Display for LayerStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let c = &self.counters;
        write!(
            f,
            "{} ({}): {} steps, {} cycles, reads act/psum/wgt {}/{}/{}, writes {}, \
             conflicts act/psum/wgt/out {}/{}/{}/{}",
            self.name,
            self.kind,
            self.steps,
            self.cycles,
            c.act_reads,
            c.psum_reads,
            c.wgt_reads,
            c.out_writes,
            c.act_bank_conflicts,
            c.psum_bank_conflicts,
            c.wgt_bank_conflicts,
            c.out_bank_conflicts,
        )
    }
}

/// Totals over all layers.
#[must_use]
pub fn total(stats: &[LayerStats]) -> (u64, Cycle) {
    stats
        .iter()
        .fold((0, 0), |(steps, cycles), s| (steps + s.steps, cycles + s.cycles))
}
