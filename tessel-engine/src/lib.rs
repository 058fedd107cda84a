// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Shared state for a single simulation run.
//!
//! The dataflow engine and the global buffer never hold global state.
//! Instead they are each constructed with a [`SimContext`](context::SimContext)
//! which bundles the logical clock, the tracked-address table and the
//! per-category address ranges. Cloning the context shares the state, and
//! separate contexts give fully isolated runs.

pub mod context;
pub mod test_helpers;
pub mod types;
