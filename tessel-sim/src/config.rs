// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Run configuration gathered from defaults, a TOML file, the environment and
//! the command line, in increasing order of priority.
//!
//! Every field is optional and unset fields are not serialized, so a source
//! only overrides what it sets. The command line is merged as the last
//! figment provider.
//! Environment variables use the `TESSEL_` prefix with `__` separating
//! nested keys, for example `TESSEL_BUFFER__OUT_BANKS=8`.

use std::path::{Path, PathBuf};

use clap::Args;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use tessel_engine::sim_error;
use tessel_engine::types::SimError;
use tessel_memory::config::BufferConfig;
use tessel_memory::eviction::PolicyKind;

use crate::inference::InferenceConfig;

const ENV_PREFIX: &str = "TESSEL_";

#[derive(Args, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// YAML file describing the layers of the network to run.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    pub network: Option<PathBuf>,

    /// Multiply-accumulate lanes per PE.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    pub lanes: Option<usize>,

    /// Output windows processed in parallel by a tile.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    pub columns: Option<usize>,

    /// Filters processed in parallel by a tile.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    pub rows: Option<usize>,

    /// PE tiles, each working on its own filter set.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    pub tiles: Option<usize>,

    /// Compact the weight buffer and skip zero lines.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub schedule: Option<bool>,

    /// Time steps a weight may be promoted from when scheduling.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    pub lookahead: Option<usize>,

    /// Neighbouring lanes a weight may be promoted from when scheduling.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    pub lookaside: Option<usize>,

    /// Inputs run through every layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    pub batches: Option<usize>,

    /// Seed for the synthetic activations and weights.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long)]
    pub seed: Option<u64>,

    /// Recompute every layer from the tiles and compare with a direct
    /// computation.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, num_args = 0..=1, default_missing_value = "true")]
    pub check: Option<bool>,

    /// Eviction policy, overriding the one in the buffer configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(long, value_enum)]
    pub policy: Option<PolicyKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    #[arg(skip)]
    pub buffer: Option<BufferConfig>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            network: None,
            lanes: Some(16),
            columns: Some(16),
            rows: Some(16),
            tiles: Some(16),
            schedule: Some(false),
            lookahead: Some(2),
            lookaside: Some(0),
            batches: Some(1),
            seed: Some(0),
            check: Some(false),
            policy: None,
            buffer: Some(BufferConfig::default()),
        }
    }
}

fn required<T: Copy>(name: &str, value: Option<T>) -> Result<T, SimError> {
    match value {
        Some(value) => Ok(value),
        None => sim_error!(format!("no value configured for {name}")),
    }
}

impl SimConfig {
    /// Merge every source, with `cli` taking priority.
    pub fn load(conf_file: Option<&Path>, cli: SimConfig) -> Result<Self, SimError> {
        let mut figment = Self::figment_with_defaults();
        if let Some(conf_file) = conf_file {
            if !conf_file.is_file() {
                return sim_error!(format!(
                    "config file {} does not exist",
                    conf_file.display()
                ));
            }
            figment = Self::figment_conf_file_merge(figment, conf_file);
        }
        figment = Self::figment_env_var_merge(figment);
        figment = Self::clap_merge(figment, cli);
        Self::figment_extract(figment)
    }

    #[must_use]
    pub fn figment_with_defaults() -> Figment {
        Figment::new().merge(Serialized::defaults(Self::default()))
    }

    #[must_use]
    pub fn figment_conf_file_merge(config: Figment, conf_file: &Path) -> Figment {
        config.merge(Toml::file(conf_file))
    }

    #[must_use]
    pub fn figment_env_var_merge(config: Figment) -> Figment {
        config.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    pub fn figment_extract(config: Figment) -> Result<Self, SimError> {
        config
            .extract()
            .map_err(|e| SimError(format!("Invalid configuration: {e}")))
    }

    /// Overwrite `config` with every field set in `cli`.
    #[must_use]
    pub fn clap_merge(config: Figment, cli: SimConfig) -> Figment {
        config.merge(Serialized::defaults(cli))
    }

    /// The fully resolved configuration of the simulator.
    pub fn inference_config(&self) -> Result<InferenceConfig, SimError> {
        let mut buffer = self.buffer.clone().unwrap_or_default();
        if let Some(policy) = self.policy {
            buffer.policy = policy;
        }
        buffer.validate()?;

        Ok(InferenceConfig {
            lanes: required("lanes", self.lanes)?,
            columns: required("columns", self.columns)?,
            rows: required("rows", self.rows)?,
            tiles: required("tiles", self.tiles)?,
            schedule: required("schedule", self.schedule)?,
            lookahead: required("lookahead", self.lookahead)?,
            lookaside: required("lookaside", self.lookaside)?,
            batches: required("batches", self.batches)?,
            check: required("check", self.check)?,
            buffer,
        })
    }

    pub fn network_path(&self) -> Result<&Path, SimError> {
        match &self.network {
            Some(path) => Ok(path),
            None => sim_error!("no network file configured (use --network)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty() -> SimConfig {
        SimConfig {
            network: None,
            lanes: None,
            columns: None,
            rows: None,
            tiles: None,
            schedule: None,
            lookahead: None,
            lookaside: None,
            batches: None,
            seed: None,
            check: None,
            policy: None,
            buffer: None,
        }
    }

    #[test]
    fn clap_only_overrides_set_fields() {
        let cli = SimConfig {
            lanes: Some(4),
            policy: Some(PolicyKind::Lru),
            ..empty()
        };
        let merged = SimConfig::figment_extract(SimConfig::clap_merge(
            SimConfig::figment_with_defaults(),
            cli,
        ))
        .unwrap();
        assert_eq!(merged.lanes, Some(4));
        assert_eq!(merged.columns, Some(16));
        assert_eq!(merged.policy, Some(PolicyKind::Lru));
    }

    #[test]
    fn unset_fields_are_not_serialized() {
        let cli = SimConfig {
            rows: Some(2),
            ..empty()
        };
        let figment = Figment::new().merge(Serialized::defaults(cli));
        assert_eq!(figment.extract_inner::<usize>("rows").unwrap(), 2);
        assert!(!figment.contains("lanes"));
        assert!(!figment.contains("buffer"));
    }

    #[test]
    fn policy_overrides_buffer() {
        let config = SimConfig {
            policy: Some(PolicyKind::Lru),
            ..SimConfig::default()
        };
        let inference = config.inference_config().unwrap();
        assert_eq!(inference.buffer.policy, PolicyKind::Lru);
        assert_eq!(inference.lanes, 16);
    }

    #[test]
    fn missing_values_are_reported() {
        let config = SimConfig {
            rows: None,
            ..SimConfig::default()
        };
        let err = config.inference_config().unwrap_err();
        assert!(err.0.contains("rows"));
        assert!(empty().network_path().is_err());
    }
}
