// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use tessel_engine::test_helpers::start_test;
use tessel_memory::config::{BufferConfig, HierarchyConfig, LevelConfig};
use tessel_memory::eviction::PolicyKind;
use tessel_sim::inference::{Inference, InferenceConfig};
use tessel_sim::network::{Network, NetworkConfig};

const NETWORK: &str = "
name: checked
layers:
  - name: conv
    kind: conv
    input: [3, 5, 5]
    filters: 6
    kernel: [3, 3]
    padding: 1
    act_sparsity: 0.3
    wgt_sparsity: 0.5
  - name: strided
    kind: conv
    input: [5, 7, 7]
    filters: 3
    kernel: [3, 3]
    stride: 2
    wgt_sparsity: 0.4
  - name: towers
    kind: conv
    input: [4, 4, 4]
    filters: 4
    kernel: [2, 2]
    two_tower: true
    wgt_sparsity: 0.5
  - name: fc
    kind: fc
    input: [10]
    filters: 5
    wgt_sparsity: 0.6
  - name: lstm
    kind: lstm
    input: [3, 6]
    filters: 4
    act_sparsity: 0.2
    wgt_sparsity: 0.3
";

fn small_config() -> InferenceConfig {
    InferenceConfig {
        lanes: 4,
        columns: 4,
        rows: 2,
        tiles: 2,
        batches: 2,
        check: true,
        ..Default::default()
    }
}

fn network(batches: usize, seed: u64) -> Network {
    let config = NetworkConfig::from_string(NETWORK).unwrap();
    Network::synthesize(&config, batches, seed).unwrap()
}

/// A small buffer whose farthest level cannot hold the convolution
/// activations. Every delay is multiplied by `slowdown`.
fn streaming_buffer(policy: PolicyKind, slowdown: u64) -> BufferConfig {
    let level = |size_bytes: u64, delay: u64| LevelConfig {
        size_bytes,
        read_delay: delay * slowdown,
        write_delay: delay * slowdown,
    };
    let hierarchy = HierarchyConfig {
        levels: vec![level(16, 20), level(8, 4), level(4, 1)],
        banks: 4,
        addrs_per_access: 1,
        entry_bytes: 1,
    };
    BufferConfig {
        activations: hierarchy.clone(),
        weights: hierarchy,
        out_banks: 4,
        policy,
    }
}

#[test]
fn outputs_match_direct_computation() {
    let ctx = start_test(file!());
    let network = network(2, 3);
    let mut inference = Inference::new(&ctx, small_config()).unwrap();
    let stats = inference.run(&network).unwrap();
    assert_eq!(stats.len(), network.layers.len());
    for layer in &stats {
        assert!(layer.steps > 0);
        assert!(layer.cycles >= layer.steps);
    }
}

#[test]
fn scheduled_outputs_match_direct_computation() {
    let ctx = start_test(file!());
    let network = network(1, 11);
    let config = InferenceConfig {
        schedule: true,
        lookahead: 2,
        lookaside: 1,
        ..small_config()
    };
    let mut inference = Inference::new(&ctx, config).unwrap();
    let scheduled = inference.run(&network).unwrap();

    let ctx = start_test(file!());
    let mut inference = Inference::new(&ctx, small_config()).unwrap();
    let plain = inference.run(&network).unwrap();

    for (scheduled, plain) in scheduled.iter().zip(&plain) {
        assert!(scheduled.steps <= plain.steps, "{}", scheduled.name);
    }
}

#[test]
fn step_count_follows_tiling() {
    let ctx = start_test(file!());
    let network = network(2, 5);
    let mut inference = Inference::new(&ctx, small_config()).unwrap();
    let stats = inference.run_layer(&network.layers[0]).unwrap();

    // 7 window sets, 2 filter set groups and 9 weight rows for each of 2
    // batches.
    assert_eq!(stats.steps, 7 * 2 * 9 * 2);
}

#[test]
fn streamed_activations_are_fetched_through_the_levels() {
    for policy in [PolicyKind::Fifo, PolicyKind::Lru] {
        let ctx = start_test(file!());
        let network = network(1, 9);
        let config = InferenceConfig {
            buffer: streaming_buffer(policy, 1),
            ..small_config()
        };
        let mut inference = Inference::new(&ctx, config).unwrap();
        let stats = inference.run(&network).unwrap();

        let conv = &stats[0];
        assert!(conv.counters.act_reads > 0);
        assert!(conv.counters.wgt_reads > 0);
        assert!(conv.counters.out_writes > 0);

        // Recurrent layers read back their partial sums.
        let lstm = &stats[4];
        assert!(lstm.counters.psum_reads > 0);

        // Each layer leaves nothing tracked behind.
        assert!(ctx.tracked().is_empty());
    }
}

#[test]
fn slower_buffers_take_longer() {
    let network = network(1, 2);

    let ctx = start_test(file!());
    let config = InferenceConfig {
        buffer: streaming_buffer(PolicyKind::Fifo, 1),
        ..small_config()
    };
    let mut fast = Inference::new(&ctx, config).unwrap();
    let fast = fast.run_layer(&network.layers[0]).unwrap();

    let ctx = start_test(file!());
    let config = InferenceConfig {
        buffer: streaming_buffer(PolicyKind::Fifo, 10),
        ..small_config()
    };
    let mut slow = Inference::new(&ctx, config).unwrap();
    let slow = slow.run_layer(&network.layers[0]).unwrap();

    assert_eq!(fast.steps, slow.steps);
    assert_eq!(fast.counters, slow.counters);
    assert!(slow.cycles > fast.cycles);
}

#[test]
fn clock_advances_across_layers() {
    let ctx = start_test(file!());
    let network = network(1, 4);
    let mut inference = Inference::new(&ctx, small_config()).unwrap();
    let stats = inference.run(&network).unwrap();
    let total: u64 = stats.iter().map(|s| s.cycles).sum();
    assert_eq!(ctx.clock().now(), total);
}

#[test]
fn header_lists_dataflow_and_buffer() {
    let ctx = start_test(file!());
    let config = InferenceConfig {
        schedule: true,
        ..small_config()
    };
    let inference = Inference::new(&ctx, config).unwrap();
    let header = inference.header();
    assert!(header.starts_with("Dataflow: Window First Output Stationary"));
    assert!(header.contains("Scheduler: lookahead 2 lookaside 0"));
    assert!(header.contains("Eviction policy: FIFO"));
}

#[test]
fn invalid_scheduler_is_rejected() {
    let ctx = start_test(file!());
    let config = InferenceConfig {
        schedule: true,
        lookahead: 0,
        lookaside: 1,
        ..small_config()
    };
    assert!(Inference::new(&ctx, config).is_err());
}

#[test]
fn towers_split_across_a_tile_are_rejected() {
    let ctx = start_test(file!());
    let config = NetworkConfig::from_string(
        "
name: unaligned
layers:
  - name: towers
    kind: conv
    input: [4, 4, 4]
    filters: 6
    kernel: [2, 2]
    two_tower: true
",
    )
    .unwrap();
    let network = Network::synthesize(&config, 1, 1).unwrap();
    let config = InferenceConfig {
        tiles: 1,
        ..small_config()
    };
    let mut inference = Inference::new(&ctx, config).unwrap();
    let err = inference.run(&network).unwrap_err();
    assert!(err.0.contains("two-group layer with 6 filters"), "{err}");
}
