// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Per-layer tiling parameters handed to the engine.

use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LayerKind {
    #[default]
    Convolution,
    FullyConnected,
    Recurrent,
}

impl LayerKind {
    /// FC and recurrent layers use synthetic columns instead of spatial
    /// windows.
    #[must_use]
    pub fn uses_columns(self) -> bool {
        !matches!(self, LayerKind::Convolution)
    }
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            LayerKind::Convolution => write!(f, "conv"),
            LayerKind::FullyConnected => write!(f, "fc"),
            LayerKind::Recurrent => write!(f, "lstm"),
        }
    }
}

/// Everything `initialise_layer` needs apart from the tensors.
#[derive(Clone, Debug, PartialEq)]
pub struct LayerParams {
    pub schedule: bool,
    pub kind: LayerKind,
    pub recurrence: usize,
    pub out_x: usize,
    pub out_y: usize,
    pub stride: usize,
    pub lanes: usize,
    pub columns: usize,
    pub rows: usize,
    pub tiles: usize,
}

impl Default for LayerParams {
    fn default() -> Self {
        Self {
            schedule: false,
            kind: LayerKind::Convolution,
            recurrence: 1,
            out_x: 1,
            out_y: 1,
            stride: 1,
            lanes: 16,
            columns: 16,
            rows: 16,
            tiles: 16,
        }
    }
}

/// Tiling parameters derived from the tensor shapes by `initialise_layer`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Tiling {
    pub window_sets: usize,
    pub filter_sets: usize,

    /// Grouped ("two tower") layers have twice as many activation channels
    /// as weight channels.
    pub groups: usize,
    pub filters_per_group: usize,

    /// Weight buffer rows per filter set.
    pub max_buffer_time: usize,

    /// Window buffer rows, one full weight walk per group.
    pub max_window_buffer_time: usize,
}
