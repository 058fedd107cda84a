// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The per-tile view produced on every engine tick.

use tessel_engine::types::Addr;

use crate::buffer::{BufferRow, BufferSet};

/// An `(x, y)` position in the output feature map.
pub type WindowCoord = (usize, usize);

/// An address together with the bank it maps to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BankedAddr {
    pub addr: Addr,
    pub bank: usize,
}

/// Work issued to one PE tile for a single tick.
///
/// Only meaningful when `valid` is set; the contents are overwritten on the
/// next tick.
#[derive(Clone, Debug, Default)]
pub struct TileData<T> {
    pub valid: bool,

    /// Windows processed by the columns of the tile.
    pub windows: Vec<WindowCoord>,

    /// Filters processed by the rows of the tile; `None` past the last
    /// filter of the layer.
    pub filters: Vec<Option<usize>>,

    /// `num_act_rows` consecutive window buffer rows starting at `time`.
    pub act_rows: BufferSet<T>,

    /// The weight buffer row for `time`.
    pub wgt_row: BufferRow<T>,

    pub time: usize,
    pub num_act_rows: usize,
    pub lanes: usize,

    /// `[act row][column]` activation words, empty unless addressing is on.
    pub act_addresses: Vec<Vec<Option<BankedAddr>>>,

    /// One weight word per filter row.
    pub wgt_addresses: Vec<Option<BankedAddr>>,

    /// Partial sums to fetch before accumulating, one per (filter, window).
    pub psum_addresses: Vec<Option<BankedAddr>>,

    /// Outputs written back once accumulation completes.
    pub out_addresses: Vec<Option<BankedAddr>>,
}

impl<T> TileData<T> {
    /// Mark the tile idle and drop anything from a previous tick.
    pub fn invalidate(&mut self) {
        self.valid = false;
        self.act_addresses.clear();
        self.wgt_addresses.clear();
        self.psum_addresses.clear();
        self.out_addresses.clear();
    }
}
