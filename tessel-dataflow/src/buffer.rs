// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Time-indexed views of the weight and activation tensors laid out the way
//! the PE array consumes them.
//!
//! A row holds `N_LANES` entries for each filter (weight buffer) or for each
//! window (window buffer). Every entry remembers the time step and lane it
//! was generated at so that schedule compaction can move it without losing
//! track of which activation it multiplies.

use crate::tensor::Value;

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BufferEntry<T> {
    pub value: T,
    pub time: usize,
    pub lane: usize,
}

impl<T> BufferEntry<T> {
    #[must_use]
    pub fn new(value: T, time: usize, lane: usize) -> Self {
        Self { value, time, lane }
    }
}

pub type BufferRow<T> = Vec<BufferEntry<T>>;

/// Rows indexed by time step.
pub type BufferSet<T> = Vec<BufferRow<T>>;

/// `filter_set -> time_step -> row (N_ROWS x N_LANES)`.
pub type WeightBuffer<T> = Vec<BufferSet<T>>;

/// `time_step -> row (num_windows x N_LANES)`.
pub type WindowBuffer<T> = BufferSet<T>;

/// A buffer set of `times` rows, each `row_len` zero entries wide.
#[must_use]
pub fn zeroed_set<T: Value>(times: usize, row_len: usize) -> BufferSet<T> {
    vec![vec![BufferEntry::default(); row_len]; times]
}

/// True when every value in the row is zero.
#[must_use]
pub fn is_zero_row<T: Value>(row: &[BufferEntry<T>]) -> bool {
    row.iter().all(|entry| entry.value.is_zero())
}
