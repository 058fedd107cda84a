// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

use std::fs;
use std::path::Path;

use clap::Parser;
use serial_test::serial;
use tessel_memory::eviction::PolicyKind;
use tessel_sim::config::SimConfig;
use tessel_sim::network::NetworkConfig;

#[derive(Parser)]
struct TestCli {
    #[command(flatten)]
    sim: SimConfig,
}

fn cli(args: &[&str]) -> SimConfig {
    let mut argv = vec!["tessel"];
    argv.extend_from_slice(args);
    TestCli::try_parse_from(argv).unwrap().sim
}

fn write_conf(dir: &Path, contents: &str) -> std::path::PathBuf {
    let path = dir.join("tessel.toml");
    fs::write(&path, contents).unwrap();
    path
}

#[test]
#[serial]
fn defaults_without_sources() {
    let config = SimConfig::load(None, cli(&[])).unwrap();
    assert_eq!(config, SimConfig::default());
    let inference = config.inference_config().unwrap();
    assert_eq!(inference.lanes, 16);
    assert!(!inference.schedule);
    assert_eq!(inference.buffer.policy, PolicyKind::Fifo);
}

#[test]
#[serial]
fn command_line_flags() {
    let sim = cli(&["--lanes", "4", "--schedule", "--policy", "lru"]);
    assert_eq!(sim.lanes, Some(4));
    assert_eq!(sim.schedule, Some(true));
    assert_eq!(sim.check, None);
    assert_eq!(sim.policy, Some(PolicyKind::Lru));

    let sim = cli(&["--schedule", "false", "--network", "net.yaml"]);
    assert_eq!(sim.schedule, Some(false));
    assert_eq!(sim.network_path().unwrap(), Path::new("net.yaml"));
}

#[test]
#[serial]
fn file_overrides_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_conf(
        dir.path(),
        r#"
lanes = 8
check = true

[buffer]
out_banks = 4
policy = "lru"
"#,
    );

    let config = SimConfig::load(Some(&path), cli(&[])).unwrap();
    assert_eq!(config.lanes, Some(8));
    assert_eq!(config.columns, Some(16));
    assert_eq!(config.check, Some(true));

    let inference = config.inference_config().unwrap();
    assert_eq!(inference.buffer.out_banks, 4);
    assert_eq!(inference.buffer.policy, PolicyKind::Lru);
    // Untouched tables keep their defaults.
    assert_eq!(inference.buffer.activations.levels.len(), 2);
}

#[test]
#[serial]
fn command_line_beats_environment_beats_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_conf(dir.path(), "lanes = 8\ncolumns = 8\nrows = 8\n");

    // SAFETY: tests touching the environment run serially.
    unsafe {
        std::env::set_var("TESSEL_COLUMNS", "4");
        std::env::set_var("TESSEL_ROWS", "4");
        std::env::set_var("TESSEL_BUFFER__OUT_BANKS", "2");
    }
    let config = SimConfig::load(Some(&path), cli(&["--rows", "2"]));
    unsafe {
        std::env::remove_var("TESSEL_COLUMNS");
        std::env::remove_var("TESSEL_ROWS");
        std::env::remove_var("TESSEL_BUFFER__OUT_BANKS");
    }

    let config = config.unwrap();
    assert_eq!(config.lanes, Some(8));
    assert_eq!(config.columns, Some(4));
    assert_eq!(config.rows, Some(2));
    assert_eq!(config.buffer.unwrap().out_banks, 2);
}

#[test]
#[serial]
fn missing_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("missing.toml");
    assert!(SimConfig::load(Some(&missing), cli(&[])).is_err());
    assert!(SimConfig::load(Some(dir.path()), cli(&[])).is_err());
}

#[test]
#[serial]
fn malformed_values_are_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_conf(dir.path(), "lanes = \"many\"\n");
    let err = SimConfig::load(Some(&path), cli(&[])).unwrap_err();
    assert!(err.0.starts_with("Invalid configuration"));
}

#[test]
#[serial]
fn sample_configuration_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/tessel.toml");
    let config = SimConfig::load(Some(&path), cli(&[])).unwrap();
    let inference = config.inference_config().unwrap();
    assert!(inference.schedule);
    assert_eq!(inference.buffer.activations.levels.len(), 3);
    assert_eq!(inference.buffer.weights.levels.len(), 2);
}

#[test]
fn sample_network_loads() {
    let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("configs/network.yaml");
    let network = NetworkConfig::from_file(&path).unwrap();
    assert_eq!(network.layers.len(), 4);
    assert!(network.layers[1].two_tower);
}
