//! # LOOM Synthesizer
//!
//! Loads a machine configuration TOML, runs the control-network synthesis
//! pass, and reports the resulting topology. Exits non-zero if the
//! configuration is invalid or any wiring rule is violated — nothing
//! partial ever reaches the realtime engine.

use clap::Parser;
use loom_common::config::ConfigLoader;
use loom_common::machine::MachineConfig;
use loom_synth::machine::synthesize;
use loom_synth::topology::Topology;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// LOOM — control-network synthesis for FDM/motion controllers
#[derive(Parser, Debug)]
#[command(name = "loom_synth")]
#[command(version)]
#[command(about = "Builds a realtime control topology from machine configuration")]
struct Args {
    /// Path to the machine configuration TOML.
    #[arg(default_value = "config/machine.toml")]
    config: PathBuf,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long)]
    json: bool,
}

fn main() {
    let args = Args::parse();
    setup_tracing(&args);

    info!("LOOM synthesizer v{} starting", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(&args) {
        error!("FATAL: {e}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    info!("loading machine config from {:?}", args.config);
    let config = MachineConfig::load(&args.config)?;

    let topology = synthesize(&config)?;
    report(&topology);
    Ok(())
}

/// Log per-type block counts and graph totals.
fn report(topology: &Topology) {
    let mut by_type: BTreeMap<String, usize> = BTreeMap::new();
    for block in topology.blocks() {
        *by_type.entry(block.block_type.name()).or_default() += 1;
    }
    for (type_name, count) in &by_type {
        info!("  {count:>3} × {type_name}");
    }
    info!(
        signals = topology.signal_count(),
        blocks = topology.block_count(),
        threads = topology.threads().len(),
        "synthesis OK"
    );
}

fn setup_tracing(args: &Args) {
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
