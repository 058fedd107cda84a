// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The tile dataflow engine.
//!
//! A layer (convolution, fully-connected or recurrent) is decomposed into a
//! deterministic sequence of ticks. Each tick produces one
//! [`TileData`](tile::TileData) per PE tile, pairing a set of output windows
//! with a set of filters at one time step of the flattened weight buffer.
//!
//! ```text
//!   recurrence step
//!     window set      (N_COLUMNS windows, fills the window buffer)
//!       filter set    (N_TILES x N_ROWS filters)
//!         time step   (one weight buffer row per tile)
//! ```
//!
//! Schedule compaction of the weight buffer is delegated to a
//! [`Schedule`](scheduler::Schedule) collaborator.

pub mod address;
pub mod buffer;
pub mod dataflow;
pub mod layer;
pub mod output_stationary;
pub mod scheduler;
pub mod tensor;
pub mod tile;
pub mod window_first;
