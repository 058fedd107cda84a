// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Driver for the tile dataflow engine and the global buffer.
//!
//! A network of synthetic layers is generated from a YAML description and
//! each layer is run tick by tick: the engine issues tiles, the buffer
//! serves their reads and writes, and the clock follows the buffer's ready
//! cycles. Optionally the tile stream is replayed and compared with a direct
//! computation of every layer.

pub mod check;
pub mod config;
pub mod inference;
pub mod network;
pub mod stats;
