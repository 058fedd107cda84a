// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Sizes, bank counts and delays of the buffer hierarchies.
//!
//! Levels are listed farthest first, so the last entry feeds the PE array.

use serde::{Deserialize, Serialize};
use tessel_engine::sim_error;
use tessel_engine::types::{Cycle, SimResult};

use crate::eviction::PolicyKind;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelConfig {
    pub size_bytes: u64,
    pub read_delay: Cycle,
    pub write_delay: Cycle,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HierarchyConfig {
    pub levels: Vec<LevelConfig>,
    pub banks: usize,

    /// Addresses a bank can serve in one access.
    pub addrs_per_access: usize,

    /// Bytes held by one address.
    pub entry_bytes: u64,
}

impl Default for HierarchyConfig {
    fn default() -> Self {
        Self {
            levels: vec![
                LevelConfig {
                    size_bytes: 1 << 30,
                    read_delay: 100,
                    write_delay: 100,
                },
                LevelConfig {
                    size_bytes: 1 << 20,
                    read_delay: 1,
                    write_delay: 1,
                },
            ],
            banks: 16,
            addrs_per_access: 1,
            entry_bytes: 32,
        }
    }
}

impl HierarchyConfig {
    #[must_use]
    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Addresses one bank of `level` (1-based) can hold.
    #[must_use]
    pub fn bank_capacity(&self, level: usize) -> usize {
        let bytes_per_bank = self.banks as u64 * self.entry_bytes;
        let size = self.levels[level - 1].size_bytes;
        (size / bytes_per_bank).max(1) as usize
    }

    /// Read delay of `level` (1-based, 1 is the farthest).
    #[must_use]
    pub fn read_delay(&self, level: usize) -> Cycle {
        self.levels[level - 1].read_delay
    }

    /// Write delay of the nearest level.
    #[must_use]
    pub fn nearest_write_delay(&self) -> Cycle {
        self.levels.last().map_or(0, |level| level.write_delay)
    }

    fn validate(&self, name: &str) -> SimResult {
        if self.levels.is_empty() {
            return sim_error!(format!("{name} hierarchy needs at least one level"));
        }
        if self.banks == 0 || self.addrs_per_access == 0 || self.entry_bytes == 0 {
            return sim_error!(format!(
                "{name} hierarchy needs non-zero banks, addrs_per_access and entry_bytes"
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub activations: HierarchyConfig,
    pub weights: HierarchyConfig,

    /// Outputs and partial sums use the activation levels with their own
    /// banks.
    pub out_banks: usize,
    pub policy: PolicyKind,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            activations: HierarchyConfig::default(),
            weights: HierarchyConfig::default(),
            out_banks: 16,
            policy: PolicyKind::Fifo,
        }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> SimResult {
        self.activations.validate("activation")?;
        self.weights.validate("weight")?;
        if self.out_banks == 0 {
            return sim_error!("output hierarchy needs at least one bank");
        }
        Ok(())
    }

    /// The hierarchy used for partial sums and outputs.
    #[must_use]
    pub fn outputs(&self) -> HierarchyConfig {
        HierarchyConfig {
            banks: self.out_banks,
            ..self.activations.clone()
        }
    }
}

/// Render a byte count with a binary unit suffix.
#[must_use]
pub fn to_mem_string(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes;
    let mut unit = 0;
    while value >= 1024 && value % 1024 == 0 && unit < UNITS.len() - 1 {
        value /= 1024;
        unit += 1;
    }
    format!("{value}{}", UNITS[unit])
}
