use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use gbn_abstract::{FaultConfig, ProtocolConfig, SimConfig};
use gbn_simulator::{SimulationReport, Simulator, scenario_runner};

#[derive(Parser, Debug)]
#[command(author, version, about = "Go-Back-N transfer simulator")]
struct Args {
    /// Load a scenario from disk instead of the ad-hoc transfer below.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Size in bytes of the generated resource.
    #[arg(long, default_value_t = 10 * 1024)]
    size: usize,

    #[arg(long, env = "LOSS_PCT", default_value_t = 10)]
    loss_pct: u8,

    #[arg(long, env = "CORRUPT_PCT", default_value_t = 5)]
    corrupt_pct: u8,

    #[arg(long, env = "WINDOW_SIZE", default_value_t = 10)]
    window_size: u32,

    #[arg(long, env = "RTO_SEC", default_value_t = 0.5)]
    rto_sec: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt::init();
    info!("gbn-sim-cli starting…");

    let report = match &args.scenario {
        Some(path) => scenario_runner::run_scenario(path)?,
        None => run_default_sim(&args)?,
    };

    info!(
        "finished at {} ms: complete={}, {} byte(s) delivered, {} server / {} client packets, {} retransmitted",
        report.duration_ms,
        report.complete,
        report.output().len(),
        report.server_packet_count,
        report.client_packet_count,
        report.retransmissions
    );

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }
    Ok(())
}

fn run_default_sim(args: &Args) -> Result<SimulationReport> {
    let config = SimConfig {
        fault: FaultConfig {
            loss_pct: args.loss_pct,
            corrupt_pct: args.corrupt_pct,
        },
        seed: args.seed,
        ..Default::default()
    };
    config.validate()?;
    let protocol = ProtocolConfig {
        window_size: args.window_size,
        rto_sec: args.rto_sec,
        ..Default::default()
    };
    protocol.validate()?;

    let data: Vec<u8> = (0..args.size).map(|i| i as u8).collect();
    let mut sim = Simulator::transfer(config, protocol, "generated.bin", data.clone());
    info!("Starting headless simulation…");
    sim.run_until_complete();

    let report = sim.export_report();
    if report.output() != data {
        bail!("client output differs from the served resource");
    }
    Ok(report)
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}
