use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use snw_lab_abstract::{SimConfig, TestAction};
use snw_lab_simulator::{Session, SimulationReport, load_scenario, run_scenario};

#[derive(Parser, Debug)]
#[command(author, version, about = "Stop-and-wait ARQ over a noisy channel")]
struct Args {
    /// Load a scenario from disk instead of the built-in message run.
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,

    /// Number of messages the built-in run sends.
    #[arg(long, default_value_t = 2)]
    messages: u64,

    /// Fill bytes per message, before the message index is appended.
    #[arg(long, default_value_t = 32)]
    bytes_per_message: usize,

    #[arg(long, default_value_t = 'X')]
    fill_byte: char,

    /// Time budget before the end-of-communication notice is sent.
    #[arg(long, default_value_t = 2_000)]
    duration_ms: u64,

    /// Time allowed for the termination handshake after the notice is sent.
    #[arg(long, default_value_t = 1_000)]
    grace_ms: u64,

    #[arg(long)]
    avg_delay_ms: Option<f64>,

    /// Bytes per direction between injected bit errors (0 disables them).
    #[arg(long)]
    avg_valid_bytes: Option<u64>,

    /// Sender retransmission timeout.
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[arg(long)]
    fragment_size: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    /// Hex dump every frame taken off the channel.
    #[arg(long, default_value_t = false)]
    show_packets: bool,
}

impl Args {
    fn sim_config(&self) -> SimConfig {
        let mut config = SimConfig::default();
        if let Some(v) = self.avg_delay_ms {
            config.avg_delay_ms = v;
        }
        if let Some(v) = self.avg_valid_bytes {
            config.avg_valid_bytes = v;
        }
        if let Some(v) = self.timeout_ms {
            config.timeout_ms = v;
        }
        if let Some(v) = self.fragment_size {
            config.fragment_size = v;
        }
        config.show_packets = self.show_packets;
        config.seed = self.seed;
        config
    }

    fn default_actions(&self) -> Vec<TestAction> {
        (0..self.messages)
            .map(|index| TestAction::AppSendRepeated {
                time: 0,
                byte: self.fill_byte,
                count: self.bytes_per_message,
                suffix_index: Some(index),
            })
            .collect()
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    info!("Simulation started...");

    let config = args.sim_config();
    log_parameters(&args, &config);

    let report = if let Some(path) = &args.scenario {
        let scenario = load_scenario(path)?;
        let outcome = run_scenario(&scenario, config)?;
        if !outcome.passed() {
            if let Some(trace_path) = &args.trace_out {
                write_trace(trace_path, &outcome.report)?;
            }
            anyhow::bail!(
                "scenario '{}' failed:\n  {}",
                scenario.name,
                outcome.failures.join("\n  ")
            );
        }
        outcome.report
    } else {
        info!("Sender sends to endpoint 'B' and listens to endpoint 'A' of the channel.");
        info!("Receiver sends to endpoint 'A' and listens to endpoint 'B' of the channel.");
        Session::new(config)?
            .with_duration(Duration::from_millis(args.duration_ms))
            .with_grace(Duration::from_millis(args.grace_ms))
            .run(&args.default_actions())?
    };

    info!(
        delivered = report.delivered_data.len(),
        retransmissions = report.sender.retransmissions,
        terminated = report.terminated,
        "Simulation ended."
    );

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn log_parameters(args: &Args, config: &SimConfig) {
    info!("-------------------------------------------------");
    info!("Simulation Parameters:");
    if args.scenario.is_none() {
        info!("MESSAGES_TO_SEND = {}", args.messages);
        info!("BYTES_PER_MESSAGE = {}", args.bytes_per_message);
        info!("TOTAL_SIMULATION_TIME_MS = {}", args.duration_ms);
        info!("TERMINATION_GRACE_MS = {}", args.grace_ms);
    }
    info!("SHOW_CHANNEL_PACKETS = {}", config.show_packets);
    info!("FRAGMENT_SIZE = {}", config.fragment_size);
    info!("SENDER_TIMEOUT_MS = {}", config.timeout_ms);
    info!("CHANNEL_AVG_VALID_BYTES = {}", config.avg_valid_bytes);
    info!("CHANNEL_AVG_DELAY_MS = {:.2}", config.avg_delay_ms);
    info!("-------------------------------------------------");
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}
