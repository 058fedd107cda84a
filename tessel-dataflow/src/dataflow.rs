// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use tessel_engine::types::{SimError, SimResult};

use crate::layer::{LayerParams, Tiling};
use crate::tensor::{Tensor, Value};
use crate::tile::TileData;

/// The interface the driver uses to walk a layer one tick at a time.
///
/// The calling sequence is `initialise_layer`, then for every batch
/// `initialise_batch` followed by `next_dataflow_step` until it returns
/// `false`.
pub trait Dataflow<T: Value> {
    fn name(&self) -> &'static str;

    /// Reset all derived tiling and rebuild (and optionally compact) the
    /// weight buffer.
    fn initialise_layer(
        &mut self,
        act: Rc<Tensor<T>>,
        wgt: Rc<Tensor<T>>,
        params: &LayerParams,
    ) -> SimResult;

    /// Reset all per-batch cursors.
    fn initialise_batch(&mut self, batch: usize) -> SimResult;

    /// Advance by one tick, filling `tiles` with one entry per PE tile.
    ///
    /// Returns `Ok(false)` once every recurrence step, window set and
    /// filter set is exhausted.
    fn next_dataflow_step(&mut self, tiles: &mut Vec<TileData<T>>) -> Result<bool, SimError>;

    /// Tiling of the current layer.
    fn tiling(&self) -> Tiling;
}
