// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! State shared by the output stationary dataflows.
//!
//! Outputs stay in the PE array while the weight buffer of a filter set is
//! walked in time. This module owns the buffers and cursors; the traversal
//! order lives in the concrete dataflows such as
//! [`WindowFirstOutS`](crate::window_first::WindowFirstOutS).

use std::rc::Rc;

use tessel_engine::context::SimContext;
use tessel_engine::sim_error;
use tessel_engine::types::{DataCategory, SimResult};
use tessel_track::entity::Entity;
use tessel_track::{debug, trace};

use crate::address::AddressMap;
use crate::buffer::{BufferEntry, WeightBuffer, WindowBuffer, zeroed_set};
use crate::layer::{LayerKind, LayerParams, Tiling};
use crate::scheduler::Schedule;
use crate::tensor::{Tensor, Value};
use crate::tile::WindowCoord;

/// Level at which the engine registers the words it expects the buffer to
/// fetch from the farthest memory.
const FARTHEST_LEVEL: usize = 1;

pub struct OutputStationary<T: Value> {
    pub entity: Rc<Entity>,
    pub(crate) ctx: SimContext,
    pub(crate) scheduler: Box<dyn Schedule<T>>,
    pub(crate) addresses: Option<AddressMap>,

    pub(crate) act: Option<Rc<Tensor<T>>>,
    pub(crate) wgt: Option<Rc<Tensor<T>>>,
    pub(crate) params: LayerParams,
    pub(crate) tiling: Tiling,
    pub(crate) weight_buffer: WeightBuffer<T>,

    pub(crate) batch: Option<usize>,
    pub(crate) window_buffer: WindowBuffer<T>,

    /// Activation word behind each `[time][column]` of the window buffer.
    pub(crate) window_words: Vec<Vec<Option<u64>>>,
    pub(crate) windows: Vec<WindowCoord>,

    /// The real output positions of the window set. Differs from `windows`
    /// for layers that use synthetic columns.
    pub(crate) output_windows: Vec<WindowCoord>,
    pub(crate) filters: Vec<Vec<Option<usize>>>,

    pub(crate) current_recurrence: usize,
    pub(crate) window_set: usize,
    pub(crate) filter_set: usize,
    pub(crate) time: Vec<usize>,
    pub(crate) skip: Vec<usize>,
    pub(crate) first_step: Vec<bool>,
    pub(crate) window_buffer_filled: bool,
    pub(crate) filter_buffer_filled: bool,
}

impl<T: Value> OutputStationary<T> {
    #[must_use]
    pub fn new(ctx: &SimContext, name: &str, scheduler: Box<dyn Schedule<T>>) -> Self {
        Self {
            entity: Rc::new(Entity::new(ctx.top(), name)),
            ctx: ctx.clone(),
            scheduler,
            addresses: None,
            act: None,
            wgt: None,
            params: LayerParams::default(),
            tiling: Tiling::default(),
            weight_buffer: WeightBuffer::new(),
            batch: None,
            window_buffer: WindowBuffer::new(),
            window_words: Vec::new(),
            windows: Vec::new(),
            output_windows: Vec::new(),
            filters: Vec::new(),
            current_recurrence: 0,
            window_set: 0,
            filter_set: 0,
            time: Vec::new(),
            skip: Vec::new(),
            first_step: Vec::new(),
            window_buffer_filled: false,
            filter_buffer_filled: false,
        }
    }

    /// Attach (or detach) address generation for the tiles.
    pub fn set_address_map(&mut self, addresses: Option<AddressMap>) -> SimResult {
        if let Some(map) = &addresses {
            map.validate()?;
        }
        self.addresses = addresses;
        Ok(())
    }

    #[must_use]
    pub fn address_map(&self) -> Option<&AddressMap> {
        self.addresses.as_ref()
    }

    #[must_use]
    pub fn weight_buffer(&self) -> &WeightBuffer<T> {
        &self.weight_buffer
    }

    #[must_use]
    pub fn window_buffer(&self) -> &WindowBuffer<T> {
        &self.window_buffer
    }

    #[must_use]
    pub fn tiling(&self) -> Tiling {
        self.tiling
    }

    #[must_use]
    pub fn params(&self) -> &LayerParams {
        &self.params
    }

    fn act_channels(&self, act: &Tensor<T>) -> usize {
        match self.params.kind {
            LayerKind::Recurrent => act.shape()[2],
            _ => act.shape()[1],
        }
    }

    pub(crate) fn num_filters(&self) -> usize {
        self.wgt.as_ref().map_or(0, |wgt| wgt.shape()[0])
    }

    fn validate_layer(&self, act: &Tensor<T>, wgt: &Tensor<T>, params: &LayerParams) -> SimResult {
        if params.lanes == 0 || params.columns == 0 || params.rows == 0 || params.tiles == 0 {
            return sim_error!(format!(
                "lanes ({}), columns ({}), rows ({}) and tiles ({}) must all be non-zero",
                params.lanes, params.columns, params.rows, params.tiles
            ));
        }
        if params.stride == 0 || params.recurrence == 0 {
            return sim_error!("stride and recurrence must be non-zero");
        }
        if params.out_x == 0 || params.out_y == 0 {
            return sim_error!("output dimensions must be non-zero");
        }
        if wgt.dimensions() != 4 {
            return sim_error!(format!("weights must be 4D, got {:?}", wgt.shape()));
        }
        let act_dims = match params.kind {
            LayerKind::Recurrent => 3,
            _ => 4,
        };
        if act.dimensions() != act_dims {
            return sim_error!(format!(
                "{} activations must be {act_dims}D, got {:?}",
                params.kind,
                act.shape()
            ));
        }

        let act_channels = match params.kind {
            LayerKind::Recurrent => act.shape()[2],
            _ => act.shape()[1],
        };
        let wgt_channels = wgt.shape()[1];
        if wgt_channels == 0 || act_channels < wgt_channels {
            return sim_error!(format!(
                "{act_channels} activation channels cannot feed {wgt_channels} weight channels"
            ));
        }

        // A tile reads a single group's window rows, so no tile may hold
        // filters from both groups.
        let num_filters = wgt.shape()[0];
        let filters_per_group = num_filters.div_ceil(2);
        if act_channels / wgt_channels == 2 && filters_per_group % params.rows != 0 {
            return sim_error!(format!(
                "two-group layer with {num_filters} filters needs {filters_per_group} filters \
                 per group to be a multiple of the {} rows",
                params.rows
            ));
        }

        if params.kind == LayerKind::Recurrent && act.shape()[0] < params.recurrence {
            return sim_error!(format!(
                "{} recurrence steps requested but activations hold {}",
                params.recurrence,
                act.shape()[0]
            ));
        }

        if params.kind == LayerKind::Convolution {
            let (nx, ny) = (act.shape()[2], act.shape()[3]);
            let (kx, ky) = (wgt.shape()[2], wgt.shape()[3]);
            if (params.out_x - 1) * params.stride + kx > nx
                || (params.out_y - 1) * params.stride + ky > ny
            {
                return sim_error!(format!(
                    "{}x{} outputs with stride {} do not fit a {nx}x{ny} input and {kx}x{ky} kernel",
                    params.out_x, params.out_y, params.stride
                ));
            }
        }
        Ok(())
    }

    pub fn initialise_layer(
        &mut self,
        act: Rc<Tensor<T>>,
        wgt: Rc<Tensor<T>>,
        params: &LayerParams,
    ) -> SimResult {
        self.validate_layer(&act, &wgt, params)?;
        self.params = params.clone();

        let act_channels = self.act_channels(&act);
        let [num_filters, wgt_channels, kx, ky] =
            [wgt.shape()[0], wgt.shape()[1], wgt.shape()[2], wgt.shape()[3]];

        let groups = if act_channels / wgt_channels == 2 { 2 } else { 1 };
        let round_wgt_channels = wgt_channels.div_ceil(params.lanes) * params.lanes;
        let max_buffer_time = (round_wgt_channels * kx * ky).div_ceil(params.lanes);

        self.tiling = Tiling {
            window_sets: (params.out_x * params.out_y).div_ceil(params.columns),
            filter_sets: num_filters.div_ceil(params.rows),
            groups,
            filters_per_group: num_filters.div_ceil(groups),
            max_buffer_time,
            max_window_buffer_time: max_buffer_time * groups,
        };

        self.act = Some(act);
        self.wgt = Some(wgt);
        self.batch = None;

        self.fill_weight_buffer();
        if params.schedule {
            self.scheduler.schedule(&mut self.weight_buffer);
        }
        self.register_weights();

        debug!(self.entity ; "{} layer initialised: {:?}", params.kind, self.tiling);
        Ok(())
    }

    pub fn initialise_batch(&mut self, batch: usize) -> SimResult {
        let Some(act) = &self.act else {
            return sim_error!("initialise_batch called before initialise_layer");
        };
        let batch_size = match self.params.kind {
            LayerKind::Recurrent => act.shape()[1],
            _ => act.shape()[0],
        };
        if batch >= batch_size {
            return sim_error!(format!(
                "batch {batch} out of range for {batch_size} batches"
            ));
        }

        let tiles = self.params.tiles;
        self.batch = Some(batch);
        self.windows.clear();
        self.output_windows.clear();
        self.filters.clear();
        self.current_recurrence = 0;
        self.window_set = 0;
        self.filter_set = 0;
        self.time = vec![0; tiles];
        self.skip = vec![0; tiles];
        self.first_step = vec![true; tiles];
        self.window_buffer_filled = false;
        self.filter_buffer_filled = false;
        Ok(())
    }

    /// Lay the weights out as `[filter_set][time][row * lanes + lane]`.
    fn fill_weight_buffer(&mut self) {
        let Some(wgt) = self.wgt.clone() else {
            return;
        };
        let lanes = self.params.lanes;
        let rows = self.params.rows;
        let [num_filters, wgt_channels, kx, ky] =
            [wgt.shape()[0], wgt.shape()[1], wgt.shape()[2], wgt.shape()[3]];

        self.weight_buffer = vec![
            zeroed_set(self.tiling.max_buffer_time, rows * lanes);
            self.tiling.filter_sets
        ];

        for m in 0..num_filters {
            let set = m / rows;
            let mut buffer_time = 0;
            for y in 0..ky {
                for x in 0..kx {
                    for k in (0..wgt_channels).step_by(lanes) {
                        let mut index = 0;
                        for ch in k..(k + lanes).min(wgt_channels) {
                            let pos = (m % rows) * lanes + index;
                            self.weight_buffer[set][buffer_time][pos] =
                                BufferEntry::new(wgt.get(&[m, ch, x, y]), buffer_time, index);
                            index += 1;
                            if index == lanes {
                                buffer_time += 1;
                                index = 0;
                            }
                        }
                        if index != 0 {
                            buffer_time += 1;
                        }
                    }
                }
            }
        }
    }

    fn register_weights(&self) {
        let Some(map) = &self.addresses else {
            return;
        };
        let max_buffer_time = self.tiling.max_buffer_time;
        for filter in 0..self.num_filters() {
            for time in 0..max_buffer_time {
                let addr = map.wgt(filter, time, max_buffer_time).addr;
                self.ctx
                    .register(DataCategory::Weight, addr, FARTHEST_LEVEL);
            }
        }
    }

    /// Build the window buffer for the current window list.
    ///
    /// Each window receives the receptive field of every group, one lane-wide
    /// channel set per time step. Layers using synthetic columns spread
    /// consecutive channel sets round-robin over the columns instead.
    pub(crate) fn fill_window_buffer(&mut self) -> SimResult {
        if self.windows.is_empty() {
            return sim_error!("window indices may not be empty");
        }
        let (Some(act), Some(wgt), Some(batch)) = (self.act.clone(), self.wgt.clone(), self.batch)
        else {
            return sim_error!("window buffer requested before the layer and batch are initialised");
        };

        let kind = self.params.kind;
        let lanes = self.params.lanes;
        let columns = self.params.columns;
        let stride = self.params.stride;
        let [wgt_channels, kx, ky] = [wgt.shape()[1], wgt.shape()[2], wgt.shape()[3]];
        let groups = self.tiling.groups;
        let sets_per_group = wgt_channels.div_ceil(lanes);
        let total_sets = (groups * sets_per_group) as u64;

        let num_windows = if kind.uses_columns() {
            columns
        } else {
            self.windows.len()
        };
        let times = self.tiling.max_window_buffer_time;
        self.window_buffer = zeroed_set(times, num_windows * lanes);
        self.window_words = vec![vec![None; num_windows]; times];

        let mut next_column = 0;
        for (w, &(wx, wy)) in self.windows.iter().enumerate() {
            let x_window = wx * stride;
            let y_window = wy * stride;

            let mut buffer_time = 0;
            for g in 0..groups {
                let start_group = g * wgt_channels;
                for y in 0..ky {
                    for x in 0..kx {
                        for k in (0..wgt_channels).step_by(lanes) {
                            let column = if kind.uses_columns() { next_column } else { w };
                            let channel_set = (g * sets_per_group + k / lanes) as u64;
                            let word = match kind {
                                LayerKind::Recurrent => {
                                    let batches = act.shape()[1] as u64;
                                    ((self.current_recurrence as u64 * batches + batch as u64)
                                        * total_sets)
                                        + channel_set
                                }
                                _ => {
                                    let (nx, ny) = (act.shape()[2] as u64, act.shape()[3] as u64);
                                    ((batch as u64 * total_sets + channel_set) * nx
                                        + (x_window + x) as u64)
                                        * ny
                                        + (y_window + y) as u64
                                }
                            };

                            let mut index = 0;
                            for ch in k..(k + lanes).min(wgt_channels) {
                                let value = match kind {
                                    LayerKind::Recurrent => {
                                        act.get(&[self.current_recurrence, batch, ch])
                                    }
                                    _ => act.get(&[
                                        batch,
                                        start_group + ch,
                                        x_window + x,
                                        y_window + y,
                                    ]),
                                };
                                let pos = column * lanes + index;
                                self.window_buffer[buffer_time][pos] =
                                    BufferEntry::new(value, buffer_time, index);
                                self.window_words[buffer_time][column] = Some(word);
                                index += 1;
                                if index == lanes {
                                    buffer_time += 1;
                                    index = 0;
                                }
                            }
                            if index != 0 {
                                buffer_time += 1;
                            }
                            if kind.uses_columns() {
                                next_column = (next_column + 1) % columns;
                            }
                        }
                    }
                }
            }
        }

        if kind.uses_columns() {
            self.windows = vec![(0, 0); columns];
        }

        self.register_activations();
        trace!(self.entity ; "window set {} buffer filled ({} rows)", self.window_set, times);
        Ok(())
    }

    fn register_activations(&self) {
        let Some(map) = &self.addresses else {
            return;
        };
        if !map.track_activations {
            return;
        }
        for word in self.window_words.iter().flatten().flatten() {
            self.ctx
                .register(DataCategory::Activation, map.act(*word).addr, FARTHEST_LEVEL);
        }
    }
}
