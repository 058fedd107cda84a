// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Command-line front-end that runs a network through the simulator.
//!
//! For example, run using:
//!   cargo run --bin tessel -- --conf-file tessel-sim/configs/tessel.toml
//! --network tessel-sim/configs/network.yaml --check --stdout

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use indicatif::ProgressBar;
use tessel_engine::context::SimContext;
use tessel_sim::config::SimConfig;
use tessel_sim::inference::Inference;
use tessel_sim::network::{Network, NetworkConfig};
use tessel_sim::stats;
use tessel_track::{Track, Tracker};
use tessel_track::builder::{TrackerConfig, TrackersConfig, setup_trackers};

/// Command-line arguments.
#[derive(Parser)]
#[command(about = "Run a synthetic network through the tile dataflow and buffer simulator")]
struct Cli {
    /// TOML configuration file. Command-line options take priority.
    #[arg(long)]
    conf_file: Option<PathBuf>,

    /// Enable logging to the console.
    #[arg(long, default_value = "false")]
    stdout: bool,

    /// Level of log message to display.
    #[arg(long, default_value = "Info")]
    stdout_level: log::Level,

    /// Set a regular expression for which entities should have logging level
    /// set to `--stdout-level`. Others will have level set to `Error`.
    #[arg(long, default_value = "")]
    stdout_filter_regex: String,

    /// Enable logging to a text file.
    #[arg(long, default_value = "false")]
    log: bool,

    /// Level of log message to write to the file.
    #[arg(long, default_value = "Debug")]
    log_level: log::Level,

    /// Set a regular expression for which entities should have file logging
    /// level set to `--log-level`. Others will have level set to `Error`.
    #[arg(long, default_value = "")]
    log_filter_regex: String,

    /// The file log output is written to.
    #[arg(long, default_value = "tessel.log")]
    log_file: String,

    /// Show a progress bar over the layers of the network.
    #[arg(long)]
    progress: bool,

    #[command(flatten)]
    sim: SimConfig,
}

fn setup_all_trackers(args: &Cli) -> Result<Tracker> {
    let config = TrackersConfig {
        stdout: TrackerConfig {
            enable: args.stdout,
            level: args.stdout_level,
            filter_regex: &args.stdout_filter_regex,
            file: None,
        },
        log_file: TrackerConfig {
            enable: args.log,
            level: args.log_level,
            filter_regex: &args.log_filter_regex,
            file: Some(&args.log_file),
        },
    };
    Ok(setup_trackers(&config)?)
}

fn main() -> Result<()> {
    let args = Cli::parse();
    let tracker = setup_all_trackers(&args)?;

    let config = SimConfig::load(args.conf_file.as_deref(), args.sim.clone())?;
    let inference_config = config.inference_config()?;
    let network_config = NetworkConfig::from_file(config.network_path()?)?;
    let network = Network::synthesize(
        &network_config,
        inference_config.batches,
        config.seed.unwrap_or_default(),
    )?;

    let ctx = SimContext::new(&tracker);
    let mut inference = Inference::new(&ctx, inference_config)?;
    println!("{}", inference.header());
    println!(
        "Loaded network {} with {} layers.",
        network.name,
        network.layers.len()
    );

    let progress_bar = args
        .progress
        .then(|| ProgressBar::new(network.layers.len() as u64));

    let mut results = Vec::with_capacity(network.layers.len());
    for layer in &network.layers {
        let layer_stats = inference.run_layer(layer)?;
        if let Some(progress_bar) = &progress_bar {
            progress_bar.inc(1);
        }
        results.push(layer_stats);
    }
    if let Some(progress_bar) = progress_bar {
        progress_bar.finish();
    }

    for layer_stats in &results {
        println!("{layer_stats}");
    }
    let (steps, cycles) = stats::total(&results);
    println!("Ran {} layers: {steps} steps, {cycles} cycles.", results.len());

    tracker.shutdown();
    Ok(())
}
