// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Shared types.

use std::error::Error;
use std::fmt;

/// A memory address as seen by the on-chip buffer.
pub type Addr = u64;

/// A simulation cycle.
pub type Cycle = u64;

/// A level in a buffer hierarchy: 1 is the farthest (slowest) level and the
/// configured level count is the nearest.
pub type Level = usize;

// Simulation errors

#[macro_export]
/// Build a [SimError] from a message that supports `to_string`
macro_rules! sim_error {
    ($msg:expr) => {
        Err($crate::types::SimError($msg.to_string()))
    };
}

/// The `SimError` is what should be returned in the case of an error
#[derive(Debug, Clone, PartialEq)]
pub struct SimError(pub String);

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Error: {}", self.0)
    }
}

impl Error for SimError {}

/// The SimResult is the return type for most simulation functions
pub type SimResult = Result<(), SimError>;

/// The kinds of data moved between the buffer and the compute fabric.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DataCategory {
    Activation,
    Weight,
    PartialSum,
    Output,
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DataCategory::Activation => write!(f, "activation"),
            DataCategory::Weight => write!(f, "weight"),
            DataCategory::PartialSum => write!(f, "partial sum"),
            DataCategory::Output => write!(f, "output"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fails() -> SimResult {
        sim_error!(format!("bad step {}", 3))
    }

    #[test]
    fn error_display() {
        let err = fails().unwrap_err();
        assert_eq!(err, SimError("bad step 3".to_string()));
        assert_eq!(format!("{err}"), "Error: bad step 3");
    }
}
