// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tessel_dataflow::address::AddressMap;
use tessel_dataflow::dataflow::Dataflow;
use tessel_dataflow::layer::{LayerKind, LayerParams};
use tessel_dataflow::scheduler::{LookaheadScheduler, NoSchedule};
use tessel_dataflow::tensor::Tensor;
use tessel_dataflow::tile::TileData;
use tessel_dataflow::window_first::WindowFirstOutS;
use tessel_engine::context::SimContext;
use tessel_engine::test_helpers::start_test;

fn sequential(shape: &[usize]) -> Rc<Tensor<f32>> {
    let len: usize = shape.iter().product();
    let data = (0..len).map(|v| (v % 7 + 1) as f32).collect();
    Rc::new(Tensor::from_vec(shape, data).unwrap())
}

fn engine(ctx: &SimContext) -> WindowFirstOutS<f32> {
    WindowFirstOutS::new(ctx, Box::new(NoSchedule))
}

/// Run a batch to completion and return every valid tile issued.
fn run_batch(engine: &mut WindowFirstOutS<f32>, batch: usize) -> (usize, Vec<TileData<f32>>) {
    engine.initialise_batch(batch).unwrap();
    let mut tiles = Vec::new();
    let mut steps = 0;
    let mut issued = Vec::new();
    while engine.next_dataflow_step(&mut tiles).unwrap() {
        steps += 1;
        issued.extend(tiles.iter().filter(|tile| tile.valid).cloned());
        assert!(steps < 10_000, "engine did not terminate");
    }
    (steps, issued)
}

#[test]
fn single_tile_walks_buffer_time() {
    let ctx = start_test(file!());
    let mut engine = engine(&ctx);
    let params = LayerParams {
        lanes: 1,
        columns: 1,
        rows: 1,
        tiles: 1,
        ..Default::default()
    };
    engine
        .initialise_layer(sequential(&[1, 3, 1, 1]), sequential(&[1, 3, 1, 1]), &params)
        .unwrap();

    let tiling = engine.tiling();
    assert_eq!(tiling.window_sets, 1);
    assert_eq!(tiling.filter_sets, 1);
    assert_eq!(tiling.max_buffer_time, 3);

    engine.initialise_batch(0).unwrap();
    let mut tiles = Vec::new();
    for time in 0..3 {
        assert!(engine.next_dataflow_step(&mut tiles).unwrap());
        assert_eq!(tiles.len(), 1);
        assert!(tiles[0].valid);
        assert_eq!(tiles[0].time, time);
    }
    assert!(!engine.next_dataflow_step(&mut tiles).unwrap());
    assert!(!tiles[0].valid);

    // Terminal until the next batch.
    assert!(!engine.next_dataflow_step(&mut tiles).unwrap());
}

#[test]
fn step_count_without_scheduling() {
    let ctx = start_test(file!());
    let mut engine = engine(&ctx);
    let params = LayerParams {
        out_x: 3,
        out_y: 3,
        lanes: 2,
        columns: 4,
        rows: 2,
        tiles: 2,
        ..Default::default()
    };
    engine
        .initialise_layer(sequential(&[2, 3, 4, 4]), sequential(&[5, 3, 2, 2]), &params)
        .unwrap();

    let tiling = engine.tiling();
    assert_eq!(tiling.window_sets, 3);
    assert_eq!(tiling.filter_sets, 3);
    assert_eq!(tiling.max_buffer_time, 8);

    let expected = tiling.window_sets * tiling.filter_sets.div_ceil(params.tiles) * tiling.max_buffer_time;
    for batch in 0..2 {
        let (steps, issued) = run_batch(&mut engine, batch);
        assert_eq!(steps, expected);

        // Every window is visited and the last window set is partial.
        let windows: Vec<_> = issued.iter().flat_map(|tile| tile.windows.clone()).collect();
        for x in 0..3 {
            for y in 0..3 {
                assert!(windows.contains(&(x, y)));
            }
        }
        assert!(issued.iter().any(|tile| tile.windows == vec![(2, 2)]));
    }
}

#[test]
fn absent_filters_pad_the_last_tile() {
    let ctx = start_test(file!());
    let mut engine = engine(&ctx);
    let params = LayerParams {
        lanes: 2,
        columns: 1,
        rows: 4,
        tiles: 1,
        ..Default::default()
    };
    engine
        .initialise_layer(sequential(&[1, 2, 1, 1]), sequential(&[6, 2, 1, 1]), &params)
        .unwrap();
    let (steps, issued) = run_batch(&mut engine, 0);
    assert_eq!(steps, 2);
    assert_eq!(issued[0].filters, vec![Some(0), Some(1), Some(2), Some(3)]);
    assert_eq!(issued[1].filters, vec![Some(4), Some(5), None, None]);
}

#[test]
fn fully_connected_uses_columns() {
    let ctx = start_test(file!());
    let mut engine = engine(&ctx);
    let params = LayerParams {
        kind: LayerKind::FullyConnected,
        lanes: 2,
        columns: 4,
        rows: 2,
        tiles: 1,
        ..Default::default()
    };
    let act = sequential(&[1, 8, 1, 1]);
    engine
        .initialise_layer(act.clone(), sequential(&[2, 8, 1, 1]), &params)
        .unwrap();
    assert_eq!(engine.tiling().max_buffer_time, 4);

    let (steps, issued) = run_batch(&mut engine, 0);
    assert_eq!(steps, 4);
    for tile in &issued {
        assert_eq!(tile.windows, vec![(0, 0); 4]);
        assert_eq!(tile.act_rows[0].len(), 4 * 2);
    }

    // Channel set 1 lands in column 1 at time 1.
    let row = &issued[1].act_rows[0];
    assert_eq!(row[2].value, act.get(&[0, 2, 0, 0]));
    assert_eq!(row[3].value, act.get(&[0, 3, 0, 0]));
    assert_eq!(row[0].value, 0.0);
}

#[test]
fn recurrent_layers_repeat_per_step() {
    let ctx = start_test(file!());
    let mut engine = engine(&ctx);
    engine.base_mut().set_address_map(Some(AddressMap::default())).unwrap();
    let params = LayerParams {
        kind: LayerKind::Recurrent,
        recurrence: 3,
        lanes: 2,
        columns: 2,
        rows: 2,
        tiles: 1,
        ..Default::default()
    };
    let act = sequential(&[3, 1, 4]);
    engine
        .initialise_layer(act.clone(), sequential(&[2, 4, 1, 1]), &params)
        .unwrap();

    let (steps, issued) = run_batch(&mut engine, 0);
    assert_eq!(steps, 3 * 2);

    // The second recurrence step reads the second row of activations.
    assert_eq!(issued[2].act_rows[0][0].value, act.get(&[1, 0, 0]));

    // Partial sums are fetched when a later recurrence step starts.
    assert!(issued[0].psum_addresses.is_empty());
    assert!(issued[1].psum_addresses.is_empty());
    assert_eq!(issued[2].psum_addresses.len(), 2);
    assert!(issued[3].psum_addresses.is_empty());
}

#[test]
fn two_tower_filters_offset_activation_rows() {
    let ctx = start_test(file!());
    let mut engine = engine(&ctx);
    let params = LayerParams {
        lanes: 2,
        columns: 1,
        rows: 1,
        tiles: 2,
        ..Default::default()
    };
    let act = sequential(&[1, 4, 1, 1]);
    engine
        .initialise_layer(act.clone(), sequential(&[2, 2, 1, 1]), &params)
        .unwrap();

    let tiling = engine.tiling();
    assert_eq!(tiling.groups, 2);
    assert_eq!(tiling.filters_per_group, 1);

    let (steps, issued) = run_batch(&mut engine, 0);
    assert_eq!(steps, 1);
    assert_eq!(issued.len(), 2);
    assert_eq!(issued[0].act_rows[0][0].value, act.get(&[0, 0, 0, 0]));
    assert_eq!(issued[1].act_rows[0][0].value, act.get(&[0, 2, 0, 0]));
}

#[test]
fn tiles_never_straddle_the_two_groups() {
    let ctx = start_test(file!());
    let mut engine = engine(&ctx);
    let params = LayerParams {
        lanes: 2,
        columns: 1,
        rows: 2,
        tiles: 2,
        ..Default::default()
    };
    let act = sequential(&[1, 4, 1, 1]);

    // Three filters per group cannot be split over rows of two.
    let err = engine
        .initialise_layer(act.clone(), sequential(&[6, 2, 1, 1]), &params)
        .unwrap_err();
    assert!(err.0.contains("multiple of the 2 rows"), "{err}");

    // Two filters per group fill exactly one tile each.
    engine
        .initialise_layer(act.clone(), sequential(&[4, 2, 1, 1]), &params)
        .unwrap();
    let (steps, issued) = run_batch(&mut engine, 0);
    assert_eq!(steps, 1);
    assert_eq!(issued[0].filters, vec![Some(0), Some(1)]);
    assert_eq!(issued[0].act_rows[0][0].value, act.get(&[0, 0, 0, 0]));
    assert_eq!(issued[1].filters, vec![Some(2), Some(3)]);
    assert_eq!(issued[1].act_rows[0][0].value, act.get(&[0, 2, 0, 0]));
}

#[test]
fn scheduling_skips_zero_lines() {
    let ctx = start_test(file!());
    let scheduler = LookaheadScheduler::new(1, 1, 0).unwrap();
    let mut engine = WindowFirstOutS::new(&ctx, Box::new(scheduler));
    engine.base_mut().set_address_map(Some(AddressMap::default())).unwrap();
    let params = LayerParams {
        schedule: true,
        lanes: 1,
        columns: 1,
        rows: 1,
        tiles: 1,
        ..Default::default()
    };
    let wgt = Rc::new(Tensor::from_vec(&[1, 4, 1, 1], vec![1.0_f32, 0.0, 0.0, 2.0]).unwrap());
    engine
        .initialise_layer(sequential(&[1, 4, 1, 1]), wgt, &params)
        .unwrap();

    let (steps, issued) = run_batch(&mut engine, 0);
    assert_eq!(steps, 2);
    assert_eq!(issued[0].time, 0);
    assert_eq!(issued[1].time, 2);

    // The promoted weight still remembers where it came from.
    let promoted = issued[1].wgt_row[0];
    assert_eq!(promoted.value, 2.0);
    assert_eq!(promoted.time, 3);
    assert_eq!(issued[1].num_act_rows, 2);
    assert_eq!(issued[1].act_rows.len(), 2);

    // Outputs are written on the last issued step only.
    assert!(issued[0].out_addresses.is_empty());
    assert_eq!(issued[1].out_addresses.len(), 1);
}

#[test]
fn scheduling_issues_every_nonzero_weight_once() {
    let mut rng = StdRng::seed_from_u64(17);
    for _ in 0..20 {
        let channels = rng.gen_range(4..24);
        let data: Vec<f32> = (0..channels)
            .map(|_| if rng.gen_bool(0.6) { 0.0 } else { rng.gen_range(1..8) as f32 })
            .collect();
        let nonzero: Vec<usize> = (0..channels).filter(|&c| data[c] != 0.0).collect();

        let ctx = start_test(file!());
        let scheduler = LookaheadScheduler::new(1, 2, 0).unwrap();
        let mut engine = WindowFirstOutS::new(&ctx, Box::new(scheduler));
        engine.base_mut().set_address_map(Some(AddressMap::default())).unwrap();
        let params = LayerParams {
            schedule: true,
            lanes: 1,
            columns: 1,
            rows: 1,
            tiles: 1,
            ..Default::default()
        };
        let wgt = Rc::new(Tensor::from_vec(&[1, channels, 1, 1], data).unwrap());
        engine
            .initialise_layer(sequential(&[1, channels, 1, 1]), wgt, &params)
            .unwrap();

        let (steps, issued) = run_batch(&mut engine, 0);
        assert!(steps <= channels);

        let mut times: Vec<usize> = issued
            .iter()
            .map(|tile| tile.wgt_row[0])
            .filter(|entry| entry.value != 0.0)
            .map(|entry| entry.time)
            .collect();
        times.sort_unstable();
        assert_eq!(times, nonzero);
    }
}

#[test]
fn addresses_follow_the_tile() {
    let ctx = start_test(file!());
    let mut engine = engine(&ctx);
    let map = AddressMap {
        track_activations: true,
        ..Default::default()
    };
    engine.base_mut().set_address_map(Some(map.clone())).unwrap();
    let params = LayerParams {
        out_x: 2,
        out_y: 2,
        lanes: 2,
        columns: 4,
        rows: 2,
        tiles: 1,
        ..Default::default()
    };
    engine
        .initialise_layer(sequential(&[1, 2, 3, 3]), sequential(&[2, 2, 2, 2]), &params)
        .unwrap();

    let (steps, issued) = run_batch(&mut engine, 0);
    assert_eq!(steps, 4);

    for tile in &issued {
        assert_eq!(tile.act_addresses.len(), 1);
        assert_eq!(tile.act_addresses[0].len(), 4);
        assert!(tile.act_addresses[0].iter().all(Option::is_some));
        assert_eq!(tile.wgt_addresses.len(), 2);
        assert!(tile.psum_addresses.is_empty());
    }
    let first = issued[0].wgt_addresses[1].unwrap();
    assert_eq!(first, map.wgt(1, 0, 4));

    assert!(issued[..3].iter().all(|tile| tile.out_addresses.is_empty()));
    let outputs = &issued[3].out_addresses;
    assert_eq!(outputs.len(), 2 * 4);
    assert_eq!(outputs[5].unwrap(), map.out(1, (1, 0), 2, 2));

    // The 3x3 input of one channel set has been registered.
    assert_eq!(ctx.tracked().len(), 2 * 4 + 9);
}

#[test]
fn stepping_before_initialisation_fails() {
    let ctx = start_test(file!());
    let mut engine = engine(&ctx);
    let mut tiles = Vec::new();
    assert!(engine.next_dataflow_step(&mut tiles).is_err());

    engine
        .initialise_layer(
            sequential(&[1, 1, 1, 1]),
            sequential(&[1, 1, 1, 1]),
            &LayerParams::default(),
        )
        .unwrap();
    assert!(engine.next_dataflow_step(&mut tiles).is_err());
    assert!(engine.initialise_batch(1).is_err());
    engine.initialise_batch(0).unwrap();
    assert!(engine.next_dataflow_step(&mut tiles).unwrap());
}
