// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Mapping of activation, weight and output words onto buffer addresses and
//! banks.
//!
//! The three categories live in disjoint regions of one address space since
//! they share the tracked-address table. Banks are interleaved on the word
//! address.

use tessel_engine::sim_error;
use tessel_engine::types::{Addr, SimResult};

use crate::tile::{BankedAddr, WindowCoord};

#[derive(Clone, Debug, PartialEq)]
pub struct AddressMap {
    pub act_base: Addr,
    pub wgt_base: Addr,
    pub out_base: Addr,
    pub act_banks: usize,
    pub wgt_banks: usize,
    pub out_banks: usize,

    /// Register activations at the farthest level when a window buffer is
    /// built. Leave unset for layers whose activations are resident on chip.
    pub track_activations: bool,
}

impl Default for AddressMap {
    fn default() -> Self {
        Self {
            act_base: 0,
            wgt_base: 1 << 40,
            out_base: 1 << 48,
            act_banks: 16,
            wgt_banks: 16,
            out_banks: 16,
            track_activations: false,
        }
    }
}

fn banked(addr: Addr, banks: usize) -> BankedAddr {
    BankedAddr {
        addr,
        bank: (addr % banks as Addr) as usize,
    }
}

impl AddressMap {
    pub fn validate(&self) -> SimResult {
        if self.act_banks == 0 || self.wgt_banks == 0 || self.out_banks == 0 {
            return sim_error!("address map needs at least one bank per category");
        }
        Ok(())
    }

    /// Activation word `word` (a lane-wide group of channels).
    #[must_use]
    pub fn act(&self, word: u64) -> BankedAddr {
        banked(self.act_base + word, self.act_banks)
    }

    /// The weight buffer row of `filter` at `time`.
    #[must_use]
    pub fn wgt(&self, filter: usize, time: usize, max_buffer_time: usize) -> BankedAddr {
        let word = (filter * max_buffer_time + time) as Addr;
        banked(self.wgt_base + word, self.wgt_banks)
    }

    /// The output (or partial sum) of `filter` at `window`.
    #[must_use]
    pub fn out(&self, filter: usize, window: WindowCoord, out_x: usize, out_y: usize) -> BankedAddr {
        let (x, y) = window;
        let word = (filter * out_x * out_y + x * out_y + y) as Addr;
        banked(self.out_base + word, self.out_banks)
    }
}
