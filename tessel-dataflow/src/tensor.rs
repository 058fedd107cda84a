// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Dense row-major tensors holding layer activations and weights.

use std::fmt;

use tessel_engine::sim_error;
use tessel_engine::types::SimError;

/// Element types the engine can move around.
///
/// Zero is `Default::default()` and is what schedule compaction skips.
pub trait Value: Copy + Default + PartialEq + Into<f64> + fmt::Debug {
    fn is_zero(&self) -> bool {
        *self == Self::default()
    }
}

impl<T> Value for T where T: Copy + Default + PartialEq + Into<f64> + fmt::Debug {}

#[derive(Clone, Debug, PartialEq)]
pub struct Tensor<T> {
    shape: Vec<usize>,
    data: Vec<T>,
}

impl<T: Value> Tensor<T> {
    /// A tensor of the given shape filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![T::default(); shape.iter().product()],
        }
    }

    pub fn from_vec(shape: &[usize], data: Vec<T>) -> Result<Self, SimError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return sim_error!(format!(
                "tensor shape {shape:?} needs {expected} values, got {}",
                data.len()
            ));
        }
        Ok(Self {
            shape: shape.to_vec(),
            data,
        })
    }

    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    #[must_use]
    pub fn dimensions(&self) -> usize {
        self.shape.len()
    }

    #[must_use]
    pub fn data(&self) -> &[T] {
        &self.data
    }

    fn offset(&self, index: &[usize]) -> usize {
        assert_eq!(
            index.len(),
            self.shape.len(),
            "index {index:?} does not match shape {:?}",
            self.shape
        );
        index
            .iter()
            .zip(&self.shape)
            .fold(0, |offset, (&i, &dim)| {
                assert!(i < dim, "index {index:?} out of bounds for {:?}", self.shape);
                offset * dim + i
            })
    }

    #[must_use]
    pub fn get(&self, index: &[usize]) -> T {
        self.data[self.offset(index)]
    }

    pub fn set(&mut self, index: &[usize], value: T) {
        let offset = self.offset(index);
        self.data[offset] = value;
    }

    /// Append unit spatial dimensions so that `[N, C]` becomes `[N, C, 1, 1]`.
    pub fn reshape_to_4d(&mut self) {
        while self.shape.len() < 4 {
            self.shape.push(1);
        }
    }

    /// Zero-pad both spatial dimensions of an `[N, C, X, Y]` tensor.
    pub fn zero_pad(&self, padding: usize) -> Result<Self, SimError> {
        if self.dimensions() != 4 {
            return sim_error!(format!(
                "zero padding needs a 4D tensor, got shape {:?}",
                self.shape
            ));
        }
        if padding == 0 {
            return Ok(self.clone());
        }
        let [n, c, x, y] = [self.shape[0], self.shape[1], self.shape[2], self.shape[3]];
        let mut padded = Self::zeros(&[n, c, x + 2 * padding, y + 2 * padding]);
        for i in 0..n {
            for ch in 0..c {
                for px in 0..x {
                    for py in 0..y {
                        padded.set(
                            &[i, ch, px + padding, py + padding],
                            self.get(&[i, ch, px, py]),
                        );
                    }
                }
            }
        }
        Ok(padded)
    }
}
