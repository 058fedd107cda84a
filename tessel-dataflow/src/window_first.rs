// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Window-first output stationary dataflow.
//!
//! The window set is the outer loop: the window buffer is built once per
//! window set and every filter set is streamed past it before moving on.

use std::rc::Rc;

use tessel_engine::context::SimContext;
use tessel_engine::sim_error;
use tessel_engine::types::{SimError, SimResult};
use tessel_track::{debug, trace};

use crate::dataflow::Dataflow;
use crate::layer::{LayerParams, Tiling};
use crate::output_stationary::OutputStationary;
use crate::scheduler::Schedule;
use crate::tensor::{Tensor, Value};
use crate::tile::{BankedAddr, TileData};

pub struct WindowFirstOutS<T: Value> {
    base: OutputStationary<T>,
}

impl<T: Value> WindowFirstOutS<T> {
    #[must_use]
    pub fn new(ctx: &SimContext, scheduler: Box<dyn Schedule<T>>) -> Self {
        Self {
            base: OutputStationary::new(ctx, "engine", scheduler),
        }
    }

    #[must_use]
    pub fn base(&self) -> &OutputStationary<T> {
        &self.base
    }

    pub fn base_mut(&mut self) -> &mut OutputStationary<T> {
        &mut self.base
    }

    fn fill_windows(&mut self) -> SimResult {
        let os = &mut self.base;
        let columns = os.params.columns;
        let out_x = os.params.out_x;
        let total = out_x * os.params.out_y;

        let first = os.window_set * columns;
        os.windows = (first..(first + columns).min(total))
            .map(|w| (w % out_x, w / out_x))
            .collect();
        os.output_windows = os.windows.clone();
        os.fill_window_buffer()
    }

    fn fill_filters(&mut self) {
        let os = &mut self.base;
        let rows = os.params.rows;
        let num_filters = os.num_filters();
        os.filters = (0..os.params.tiles)
            .map(|t| {
                let first = (os.filter_set + t) * rows;
                (first..first + rows)
                    .map(|f| (f < num_filters).then_some(f))
                    .collect()
            })
            .collect();
    }

    fn is_zero_line(&self, t: usize, time: usize) -> bool {
        let os = &self.base;
        os.params.schedule
            && os
                .scheduler
                .is_zero_line(&os.weight_buffer[os.filter_set + t][time])
    }

    /// True when the tile has no steps left in the current filter set, taking
    /// the zero lines it would skip into account.
    fn is_last_step(&self, t: usize) -> bool {
        let os = &self.base;
        let lookahead = os.scheduler.lookahead_depth();
        let mut time = os.time[t];
        let mut skip = os.skip[t];
        while time < os.tiling.max_buffer_time {
            if skip < lookahead && self.is_zero_line(t, time) {
                skip += 1;
                time += 1;
                continue;
            }
            return false;
        }
        true
    }

    /// Attach buffer addresses to a tile that has just been populated.
    fn attach_addresses(&self, t: usize, tile: &mut TileData<T>, start_time: usize, last: bool) {
        let os = &self.base;
        let Some(map) = &os.addresses else {
            return;
        };
        let mbt = os.tiling.max_buffer_time;
        let first = start_time + tile.time;

        tile.act_addresses = os.window_words
            [first..(first + tile.num_act_rows).min(os.window_words.len())]
            .iter()
            .map(|row| row.iter().map(|word| word.map(|w| map.act(w))).collect())
            .collect();

        tile.wgt_addresses = tile
            .filters
            .iter()
            .map(|filter| filter.map(|f| map.wgt(f, tile.time, mbt)))
            .collect();

        if os.first_step[t] && os.current_recurrence > 0 {
            tile.psum_addresses = self.output_addresses(&tile.filters);
        }
        if last {
            tile.out_addresses = self.output_addresses(&tile.filters);
        }
    }

    /// One address per (filter, output window), filter major.
    fn output_addresses(&self, filters: &[Option<usize>]) -> Vec<Option<BankedAddr>> {
        let os = &self.base;
        let Some(map) = &os.addresses else {
            return Vec::new();
        };
        let (out_x, out_y) = (os.params.out_x, os.params.out_y);
        filters
            .iter()
            .flat_map(|filter| {
                os.output_windows
                    .iter()
                    .map(move |window| filter.map(|f| map.out(f, *window, out_x, out_y)))
            })
            .collect()
    }

    /// Issue the next step of every tile in the current filter set.
    ///
    /// Returns true if at least one tile was populated.
    fn step_tiles(&mut self, tiles: &mut [TileData<T>]) -> bool {
        let num_filters = self.base.num_filters();
        let rows = self.base.params.rows;
        let mbt = self.base.tiling.max_buffer_time;
        let schedule = self.base.params.schedule;
        let lookahead = self.base.scheduler.lookahead_depth();
        let num_act_rows = if schedule { 1 + lookahead } else { 1 };

        let mut still_work = false;
        for (t, tile) in tiles.iter_mut().enumerate() {
            let filter_idx = (self.base.filter_set + t) * rows;
            if filter_idx >= num_filters {
                break;
            }

            let start_time = if filter_idx >= self.base.tiling.filters_per_group {
                mbt
            } else {
                0
            };

            while self.base.time[t] < mbt {
                let time = self.base.time[t];
                if schedule {
                    if self.base.skip[t] < lookahead && self.is_zero_line(t, time) {
                        self.base.skip[t] += 1;
                        self.base.time[t] += 1;
                        continue;
                    }
                    self.base.skip[t] = 0;
                }

                let os = &self.base;
                let first = start_time + time;
                let last_row = (first + num_act_rows).min(os.window_buffer.len());
                tile.act_rows = os.window_buffer[first.min(last_row)..last_row].to_vec();
                tile.wgt_row = os.weight_buffer[os.filter_set + t][time].clone();
                tile.windows = os.windows.clone();
                tile.filters = os.filters[t].clone();
                tile.time = time;
                tile.num_act_rows = num_act_rows;
                tile.lanes = os.params.lanes;
                tile.valid = true;

                self.base.time[t] += 1;
                let last = self.is_last_step(t);
                self.attach_addresses(t, tile, start_time, last);
                self.base.first_step[t] = false;

                still_work = true;
                break;
            }
        }
        still_work
    }

    fn next_filter_set(&mut self) {
        let os = &mut self.base;
        let tiles = os.params.tiles;
        os.time = vec![0; tiles];
        os.skip = vec![0; tiles];
        os.first_step = vec![true; tiles];
        os.filter_buffer_filled = false;
        os.filters.clear();
        os.filter_set += tiles;
    }
}

impl<T: Value> Dataflow<T> for WindowFirstOutS<T> {
    fn name(&self) -> &'static str {
        "Window First Output Stationary"
    }

    fn initialise_layer(
        &mut self,
        act: Rc<Tensor<T>>,
        wgt: Rc<Tensor<T>>,
        params: &LayerParams,
    ) -> SimResult {
        self.base.initialise_layer(act, wgt, params)
    }

    fn initialise_batch(&mut self, batch: usize) -> SimResult {
        self.base.initialise_batch(batch)
    }

    fn next_dataflow_step(&mut self, tiles: &mut Vec<TileData<T>>) -> Result<bool, SimError> {
        if self.base.act.is_none() {
            return sim_error!("next_dataflow_step called before initialise_layer");
        }
        if self.base.batch.is_none() {
            return sim_error!("next_dataflow_step called before initialise_batch");
        }

        let num_tiles = self.base.params.tiles;
        tiles.resize_with(num_tiles, TileData::default);
        for tile in tiles.iter_mut() {
            tile.invalidate();
        }

        let tiling = self.base.tiling;
        while self.base.current_recurrence < self.base.params.recurrence {
            while self.base.window_set < tiling.window_sets {
                if !self.base.window_buffer_filled {
                    self.fill_windows()?;
                    self.base.window_buffer_filled = true;
                }

                while self.base.filter_set < tiling.filter_sets {
                    if !self.base.filter_buffer_filled {
                        self.fill_filters();
                        self.base.filter_buffer_filled = true;
                        trace!(self.base.entity ; "recurrence {} window set {} filter set {}",
                            self.base.current_recurrence, self.base.window_set, self.base.filter_set);
                    }

                    if self.step_tiles(tiles) {
                        return Ok(true);
                    }
                    self.next_filter_set();
                }

                self.base.filter_set = 0;
                self.base.window_buffer_filled = false;
                self.base.windows.clear();
                self.base.output_windows.clear();
                self.base.window_set += 1;
            }

            self.base.window_set = 0;
            self.base.current_recurrence += 1;
        }

        debug!(self.base.entity ; "batch {:?} complete", self.base.batch);
        Ok(false)
    }

    fn tiling(&self) -> Tiling {
        self.base.tiling()
    }
}
