// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Weight buffer schedule compaction.
//!
//! A [`Schedule`] is consulted by the engine when a layer is initialised with
//! scheduling enabled. It may move non-zero weights into earlier zero slots
//! so that whole rows become zero and can be skipped at run time.

use tessel_engine::sim_error;
use tessel_engine::types::SimError;

use crate::buffer::{BufferEntry, BufferSet, WeightBuffer, is_zero_row};
use crate::tensor::Value;

pub trait Schedule<T: Value> {
    /// Compact the weight buffer in place.
    fn schedule(&self, buffer: &mut WeightBuffer<T>);

    /// Rows for which this returns true may be skipped by the engine.
    fn is_zero_line(&self, row: &[BufferEntry<T>]) -> bool {
        is_zero_row(row)
    }

    /// How many time steps ahead a weight may be promoted from.
    fn lookahead_depth(&self) -> usize;

    /// How many neighbouring lanes a weight may be promoted from.
    fn lookaside_depth(&self) -> usize;
}

/// Leaves the weight buffer untouched.
pub struct NoSchedule;

impl<T: Value> Schedule<T> for NoSchedule {
    fn schedule(&self, _buffer: &mut WeightBuffer<T>) {}

    fn lookahead_depth(&self) -> usize {
        0
    }

    fn lookaside_depth(&self) -> usize {
        0
    }
}

/// Greedy L-shaped promotion of non-zero weights into zero slots.
///
/// For each zero slot, in time order, the first non-zero weight is taken
/// from:
///
///  1. the same lane up to `lookahead` steps in the future, then
///  2. the next `lookaside` lanes (wrapping within the filter row) one step
///     in the future.
///
/// Promoted entries keep their original time and lane so that the matching
/// activation can still be found.
pub struct LookaheadScheduler {
    lanes: usize,
    lookahead: usize,
    lookaside: usize,
}

impl LookaheadScheduler {
    pub fn new(lanes: usize, lookahead: usize, lookaside: usize) -> Result<Self, SimError> {
        if lanes == 0 {
            return sim_error!("scheduler needs at least one lane");
        }
        if lookaside > 0 && lookahead == 0 {
            // Lookaside promotes from the next step, which must be visible
            // in the activation rows handed to a tile.
            return sim_error!("lookaside scheduling needs a lookahead of at least 1");
        }
        if lookaside >= lanes {
            return sim_error!(format!(
                "lookaside {lookaside} must be smaller than the {lanes} lanes"
            ));
        }
        Ok(Self {
            lanes,
            lookahead,
            lookaside,
        })
    }

    fn find_candidate<T: Value>(
        &self,
        set: &BufferSet<T>,
        time: usize,
        pos: usize,
    ) -> Option<(usize, usize)> {
        for step in 1..=self.lookahead {
            let t = time + step;
            if t >= set.len() {
                break;
            }
            if !set[t][pos].value.is_zero() {
                return Some((t, pos));
            }
        }

        let t = time + 1;
        if t < set.len() {
            let row_start = pos - pos % self.lanes;
            let lane = pos % self.lanes;
            for side in 1..=self.lookaside {
                let p = row_start + (lane + side) % self.lanes;
                if !set[t][p].value.is_zero() {
                    return Some((t, p));
                }
            }
        }
        None
    }

    fn schedule_set<T: Value>(&self, set: &mut BufferSet<T>) {
        for time in 0..set.len() {
            for pos in 0..set[time].len() {
                if !set[time][pos].value.is_zero() {
                    continue;
                }
                if let Some((t, p)) = self.find_candidate(set, time, pos) {
                    let promoted = set[t][p];
                    set[t][p] = BufferEntry::new(T::default(), promoted.time, promoted.lane);
                    set[time][pos] = promoted;
                }
            }
        }
    }
}

impl<T: Value> Schedule<T> for LookaheadScheduler {
    fn schedule(&self, buffer: &mut WeightBuffer<T>) {
        for set in buffer.iter_mut() {
            self.schedule_set(set);
        }
    }

    fn lookahead_depth(&self) -> usize {
        self.lookahead
    }

    fn lookaside_depth(&self) -> usize {
        self.lookaside
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[u8], time: usize) -> Vec<BufferEntry<u8>> {
        values
            .iter()
            .enumerate()
            .map(|(lane, v)| BufferEntry::new(*v, time, lane))
            .collect()
    }

    #[test]
    fn lookahead_fills_same_lane() {
        let scheduler = LookaheadScheduler::new(2, 2, 0).unwrap();
        let mut buffer = vec![vec![row(&[1, 0], 0), row(&[0, 0], 1), row(&[3, 4], 2)]];
        scheduler.schedule(&mut buffer);

        let set = &buffer[0];
        assert_eq!(set[0][1], BufferEntry::new(4, 2, 1));
        assert_eq!(set[1][0], BufferEntry::new(3, 2, 0));
        assert!(scheduler.is_zero_line(&set[2]));
    }

    #[test]
    fn lookaside_wraps_within_row() {
        let scheduler = LookaheadScheduler::new(2, 1, 1).unwrap();
        // Two filter rows of two lanes each.
        let mut buffer = vec![vec![row(&[0, 5, 6, 0], 0), row(&[0, 7, 0, 0], 1)]];
        scheduler.schedule(&mut buffer);

        let set = &buffer[0];
        // Lane 0 of row 0 takes lane 1 of step 1 via lookaside.
        assert_eq!(set[0][0], BufferEntry::new(7, 1, 1));
        assert_eq!(set[0][1].value, 5);
        // Row 1 has nothing to promote.
        assert_eq!(set[0][3].value, 0);
        assert!(scheduler.is_zero_line(&set[1]));
    }

    #[test]
    fn lookaside_without_lookahead_rejected() {
        assert!(LookaheadScheduler::new(4, 0, 1).is_err());
        assert!(LookaheadScheduler::new(4, 1, 4).is_err());
    }

    #[test]
    fn no_schedule_is_identity() {
        let mut buffer = vec![vec![row(&[0, 1], 0), row(&[2, 0], 1)]];
        let before = buffer.clone();
        Schedule::<u8>::schedule(&NoSchedule, &mut buffer);
        assert_eq!(buffer, before);
    }
}
