// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Simulation of the banked, multi-level on-chip buffer.
//!
//! The [`GlobalBuffer`](global_buffer::GlobalBuffer) receives the addresses
//! carried by each tick's [`TileData`](tessel_dataflow::tile::TileData) and
//! works out when they are available to the PE array. Each data category has
//! its own hierarchy of levels:
//!
//! ```text
//!   level 1 (farthest, e.g. DRAM)
//!   level 2
//!   ...
//!   level L (nearest, feeds the PE array)
//! ```
//!
//! Every level above the farthest is split into banks, each with its own
//! [`EvictionPolicy`](eviction::EvictionPolicy) deciding which address to
//! drop when a new one is promoted into a full bank.

pub mod config;
pub mod eviction;
pub mod global_buffer;
