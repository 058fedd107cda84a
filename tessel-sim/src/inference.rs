// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! The driver loop that runs layers through the engine and the buffer.

use std::rc::Rc;

use tessel_dataflow::address::AddressMap;
use tessel_dataflow::dataflow::Dataflow;
use tessel_dataflow::layer::{LayerKind, LayerParams};
use tessel_dataflow::scheduler::{LookaheadScheduler, NoSchedule, Schedule};
use tessel_dataflow::tensor::Tensor;
use tessel_dataflow::tile::TileData;
use tessel_dataflow::window_first::WindowFirstOutS;
use tessel_engine::context::SimContext;
use tessel_engine::types::SimError;
use tessel_memory::config::BufferConfig;
use tessel_memory::global_buffer::GlobalBuffer;
use tessel_track::entity::Entity;
use tessel_track::{debug, info, set_time};

use crate::check::{calculate_output, check_result};
use crate::network::{Layer, Network};
use crate::stats::LayerStats;

/// The resolved simulator configuration.
#[derive(Clone, Debug, PartialEq)]
pub struct InferenceConfig {
    pub lanes: usize,
    pub columns: usize,
    pub rows: usize,
    pub tiles: usize,
    pub schedule: bool,
    pub lookahead: usize,
    pub lookaside: usize,
    pub batches: usize,
    pub check: bool,
    pub buffer: BufferConfig,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            lanes: 16,
            columns: 16,
            rows: 16,
            tiles: 16,
            schedule: false,
            lookahead: 2,
            lookaside: 0,
            batches: 1,
            check: false,
            buffer: BufferConfig::default(),
        }
    }
}

pub struct Inference {
    pub entity: Rc<Entity>,
    ctx: SimContext,
    config: InferenceConfig,
    engine: WindowFirstOutS<f32>,
    buffer: GlobalBuffer,
}

impl Inference {
    pub fn new(ctx: &SimContext, config: InferenceConfig) -> Result<Self, SimError> {
        let scheduler: Box<dyn Schedule<f32>> = if config.schedule {
            Box::new(LookaheadScheduler::new(
                config.lanes,
                config.lookahead,
                config.lookaside,
            )?)
        } else {
            Box::new(NoSchedule)
        };

        Ok(Self {
            entity: Rc::new(Entity::new(ctx.top(), "inference")),
            ctx: ctx.clone(),
            engine: WindowFirstOutS::new(ctx, scheduler),
            buffer: GlobalBuffer::new(ctx, config.buffer.clone())?,
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    #[must_use]
    pub fn buffer(&self) -> &GlobalBuffer {
        &self.buffer
    }

    #[must_use]
    pub fn header(&self) -> String {
        let c = &self.config;
        let mut header = format!("Dataflow: {}\n", self.engine.name());
        header += &format!("Lanes: {}\n", c.lanes);
        header += &format!("Columns: {}\n", c.columns);
        header += &format!("Rows: {}\n", c.rows);
        header += &format!("Tiles: {}\n", c.tiles);
        if c.schedule {
            header += &format!(
                "Scheduler: lookahead {} lookaside {}\n",
                c.lookahead, c.lookaside
            );
        }
        header += &self.buffer.header();
        header
    }

    /// True when every activation word of the layer fits in the farthest
    /// activation level.
    fn activations_resident(&self, layer: &Layer) -> bool {
        let act = &self.config.buffer.activations;
        let channels = match layer.kind {
            LayerKind::Recurrent => layer.act.shape()[2],
            _ => layer.act.shape()[1],
        };
        let positions = (layer.act.data().len() / channels) as u64;
        let words = positions * channels.div_ceil(self.config.lanes) as u64;
        let farthest = act.levels.first().map_or(0, |level| level.size_bytes);
        words * act.entry_bytes <= farthest
    }

    fn address_map(&self, track_activations: bool) -> AddressMap {
        let buffer = &self.config.buffer;
        AddressMap {
            act_banks: buffer.activations.banks,
            wgt_banks: buffer.weights.banks,
            out_banks: buffer.out_banks,
            track_activations,
            ..Default::default()
        }
    }

    /// Run every batch of `layer` and return its statistics.
    pub fn run_layer(&mut self, layer: &Layer) -> Result<LayerStats, SimError> {
        let clock = self.ctx.clock().clone();
        let start = clock.now();
        self.buffer.configure_layer();

        let resident = self.activations_resident(layer);
        debug!(self.entity ; "{}: activations {}", layer.name,
            if resident { "resident" } else { "streamed" });
        let map = self.address_map(!resident);
        self.engine.base_mut().set_address_map(Some(map))?;

        let params = LayerParams {
            schedule: self.config.schedule,
            kind: layer.kind,
            recurrence: layer.recurrence,
            out_x: layer.out_x,
            out_y: layer.out_y,
            stride: layer.stride,
            lanes: self.config.lanes,
            columns: self.config.columns,
            rows: self.config.rows,
            tiles: self.config.tiles,
        };
        self.engine
            .initialise_layer(layer.act.clone(), layer.wgt.clone(), &params)?;

        let mut tiles: Vec<TileData<f32>> = Vec::new();
        let mut steps = 0;
        for batch in 0..layer.batches() {
            self.engine.initialise_batch(batch)?;
            let mut output = self
                .config
                .check
                .then(|| Tensor::zeros(&[layer.num_filters(), layer.out_x, layer.out_y]));

            while self.engine.next_dataflow_step(&mut tiles)? {
                self.buffer.act_read_request(&tiles, resident)?;
                self.buffer.psum_read_request(&tiles)?;
                self.buffer.wgt_read_request(&tiles)?;

                clock.advance_to(self.buffer.read_ready_cycle());
                set_time!(self.entity ; clock.now());
                clock.advance_by(1);

                self.buffer.write_request(&tiles)?;
                if let Some(output) = output.as_mut() {
                    calculate_output(output, &tiles)?;
                }
                steps += 1;
            }

            if let Some(output) = &output {
                check_result(layer, batch, output)?;
                debug!(self.entity ; "{}: batch {batch} output checked", layer.name);
            }
        }

        clock.advance_to(self.buffer.write_ready_cycle());
        let stats = LayerStats {
            name: layer.name.clone(),
            kind: layer.kind,
            steps,
            cycles: clock.now() - start,
            counters: self.buffer.counters(),
        };
        self.buffer.evict_data(true, true, true);
        info!(self.entity ; "{stats}");
        Ok(stats)
    }

    pub fn run(&mut self, network: &Network) -> Result<Vec<LayerStats>, SimError> {
        info!(self.entity ; "running network {}", network.name);
        network
            .layers
            .iter()
            .map(|layer| self.run_layer(layer))
            .collect()
    }
}
