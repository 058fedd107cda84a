// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Network descriptions and synthetic layer data.
//!
//! A network is described in YAML by its layer shapes only. The activation
//! and weight values are generated from a seeded random number generator so
//! that runs are reproducible.

use std::path::Path;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tessel_dataflow::layer::LayerKind;
use tessel_dataflow::tensor::Tensor;
use tessel_engine::sim_error;
use tessel_engine::types::{SimError, SimResult};

/// Largest magnitude of a generated value.
const MAX_VALUE: i32 = 7;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    Conv,
    Fc,
    Lstm,
}

impl From<LayerType> for LayerKind {
    fn from(layer_type: LayerType) -> Self {
        match layer_type {
            LayerType::Conv => LayerKind::Convolution,
            LayerType::Fc => LayerKind::FullyConnected,
            LayerType::Lstm => LayerKind::Recurrent,
        }
    }
}

fn one() -> usize {
    1
}

fn unit_kernel() -> [usize; 2] {
    [1, 1]
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,
    pub kind: LayerType,

    /// `[C, X, Y]` for convolutions, `[C]` for fully-connected layers and
    /// `[R, C]` for recurrent layers.
    pub input: Vec<usize>,
    pub filters: usize,

    #[serde(default = "unit_kernel")]
    pub kernel: [usize; 2],

    #[serde(default = "one")]
    pub stride: usize,

    #[serde(default)]
    pub padding: usize,

    /// Split the input channels into two towers, each seen by half of the
    /// filters.
    #[serde(default)]
    pub two_tower: bool,

    #[serde(default)]
    pub act_sparsity: f64,

    #[serde(default)]
    pub wgt_sparsity: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub name: String,
    pub layers: Vec<LayerConfig>,
}

impl NetworkConfig {
    pub fn from_file(path: &Path) -> Result<Self, SimError> {
        let s = std::fs::read_to_string(path)
            .map_err(|e| SimError(format!("Unable to read {}: {e}", path.display())))?;
        Self::from_string(&s)
    }

    pub fn from_string(network_str: &str) -> Result<Self, SimError> {
        let config: Self = serde_yaml::from_str(network_str)
            .map_err(|e| SimError(format!("serde_yaml::from_str failed: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SimResult {
        let mut errors = Vec::new();
        if self.layers.is_empty() {
            errors.push(format!("network {} has no layers", self.name));
        }
        for layer in &self.layers {
            let expected = match layer.kind {
                LayerType::Conv => 3,
                LayerType::Fc => 1,
                LayerType::Lstm => 2,
            };
            if layer.input.len() != expected {
                errors.push(format!(
                    "{}: input {:?} should have {expected} dimensions",
                    layer.name, layer.input
                ));
            }
            if layer.input.contains(&0) || layer.filters == 0 || layer.stride == 0 {
                errors.push(format!(
                    "{}: input, filters and stride must be non-zero",
                    layer.name
                ));
            }
            if layer.kernel.contains(&0) {
                errors.push(format!("{}: kernel must be non-zero", layer.name));
            }
            for sparsity in [layer.act_sparsity, layer.wgt_sparsity] {
                if !(0.0..=1.0).contains(&sparsity) {
                    errors.push(format!(
                        "{}: sparsity {sparsity} outside [0, 1]",
                        layer.name
                    ));
                }
            }
            if layer.two_tower && (layer.kind != LayerType::Conv || layer.filters % 2 != 0) {
                errors.push(format!(
                    "{}: two towers need a convolution with an even filter count",
                    layer.name
                ));
            }
            if layer.kind == LayerType::Conv && layer.input.len() == 3 {
                let padded = |n: usize| n + 2 * layer.padding;
                if padded(layer.input[1]) < layer.kernel[0]
                    || padded(layer.input[2]) < layer.kernel[1]
                {
                    errors.push(format!(
                        "{}: kernel {:?} larger than padded input",
                        layer.name, layer.kernel
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            sim_error!(errors.join("\n"))
        }
    }
}

/// A layer with its generated tensors.
pub struct Layer {
    pub name: String,
    pub kind: LayerKind,
    pub act: Rc<Tensor<f32>>,
    pub wgt: Rc<Tensor<f32>>,
    pub stride: usize,
    pub out_x: usize,
    pub out_y: usize,
    pub recurrence: usize,
}

impl Layer {
    /// Number of batches held in the activations.
    #[must_use]
    pub fn batches(&self) -> usize {
        match self.kind {
            LayerKind::Recurrent => self.act.shape()[1],
            _ => self.act.shape()[0],
        }
    }

    #[must_use]
    pub fn num_filters(&self) -> usize {
        self.wgt.shape()[0]
    }
}

pub struct Network {
    pub name: String,
    pub layers: Vec<Layer>,
}

fn random_tensor(rng: &mut StdRng, shape: &[usize], sparsity: f64) -> Result<Tensor<f32>, SimError> {
    let len = shape.iter().product();
    let data = (0..len)
        .map(|_| {
            if rng.gen_bool(sparsity) {
                0.0
            } else {
                let value = rng.gen_range(1..=MAX_VALUE);
                if rng.gen_bool(0.5) { value as f32 } else { -value as f32 }
            }
        })
        .collect();
    Tensor::from_vec(shape, data)
}

impl Network {
    /// Generate the tensors of every layer for `batches` inputs.
    pub fn synthesize(config: &NetworkConfig, batches: usize, seed: u64) -> Result<Self, SimError> {
        config.validate()?;
        if batches == 0 {
            return sim_error!("at least one batch is required");
        }

        let mut rng = StdRng::seed_from_u64(seed);
        let layers = config
            .layers
            .iter()
            .map(|layer| Self::synthesize_layer(&mut rng, layer, batches))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            name: config.name.clone(),
            layers,
        })
    }

    fn synthesize_layer(
        rng: &mut StdRng,
        config: &LayerConfig,
        batches: usize,
    ) -> Result<Layer, SimError> {
        let [kx, ky] = config.kernel;
        let mut layer = Layer {
            name: config.name.clone(),
            kind: config.kind.into(),
            act: Rc::new(Tensor::zeros(&[0])),
            wgt: Rc::new(Tensor::zeros(&[0])),
            stride: 1,
            out_x: 1,
            out_y: 1,
            recurrence: 1,
        };

        match config.kind {
            LayerType::Conv => {
                let [channels, x, y] = [config.input[0], config.input[1], config.input[2]];
                let towers = if config.two_tower { 2 } else { 1 };
                let act = random_tensor(rng, &[batches, channels * towers, x, y], config.act_sparsity)?;
                let act = act.zero_pad(config.padding)?;
                layer.out_x = (act.shape()[2] - kx) / config.stride + 1;
                layer.out_y = (act.shape()[3] - ky) / config.stride + 1;
                layer.stride = config.stride;
                layer.act = Rc::new(act);
                layer.wgt = Rc::new(random_tensor(
                    rng,
                    &[config.filters, channels, kx, ky],
                    config.wgt_sparsity,
                )?);
            }
            LayerType::Fc => {
                let channels = config.input[0];
                let mut act = random_tensor(rng, &[batches, channels], config.act_sparsity)?;
                act.reshape_to_4d();
                layer.act = Rc::new(act);
                layer.wgt = Rc::new(random_tensor(
                    rng,
                    &[config.filters, channels, 1, 1],
                    config.wgt_sparsity,
                )?);
            }
            LayerType::Lstm => {
                let [steps, channels] = [config.input[0], config.input[1]];
                layer.recurrence = steps;
                layer.act = Rc::new(random_tensor(
                    rng,
                    &[steps, batches, channels],
                    config.act_sparsity,
                )?);
                layer.wgt = Rc::new(random_tensor(
                    rng,
                    &[config.filters, channels, 1, 1],
                    config.wgt_sparsity,
                )?);
            }
        }
        Ok(layer)
    }
}
