//! edos — closed-loop scaling simulator.
//!
//! Runs the control loop against in-process HTTP workers, drives attack and
//! baseline traffic at them, and prints the per-tick record plus totals.
//!
//! # Usage
//!
//! ```text
//! edos run --config edos.toml --run-duration 180 --format json
//! edos config > edos.toml
//! ```

mod local;
mod report;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use edos_control::ControlLoop;
use edos_core::{EvictionPolicy, Resource, ResourceManager, SimConfig};
use edos_loadgen::HttpRequestSender;

use crate::local::{LocalBackend, LocalSettings};

const DEFAULT_LOG_FILTER: &str = "info,edos=debug,edosd=debug";

#[derive(Parser)]
#[command(name = "edos", about = "EDoS autoscaling simulator", version)]
struct Cli {
    /// Log output format: text or json
    #[arg(long, global = true, default_value = "text")]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one simulation against local in-process workers.
    Run(RunArgs),
    /// Print the effective configuration as TOML.
    Config {
        /// Config file to load; defaults are printed when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Config file (TOML). Every field is optional.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(flatten)]
    overrides: Overrides,

    /// CPU time each local worker burns per request, in milliseconds.
    #[arg(long, default_value = "20")]
    work_ms: u64,

    /// Summary output format: text or json
    #[arg(short, long, default_value = "text")]
    format: String,
}

/// Per-field overrides applied on top of the config file.
#[derive(Args, Default)]
struct Overrides {
    #[arg(long)]
    tick_interval: Option<f64>,
    #[arg(long)]
    run_duration: Option<f64>,
    #[arg(long)]
    cooldown: Option<f64>,
    #[arg(long)]
    scale_up_threshold: Option<f64>,
    #[arg(long)]
    scale_down_threshold: Option<f64>,
    #[arg(long)]
    min_instances: Option<u32>,
    #[arg(long)]
    max_instances: Option<u32>,
    /// Scale-down victim: newest or least-loaded
    #[arg(long)]
    eviction: Option<String>,
    #[arg(long)]
    poll_interval: Option<f64>,
    /// Attack requests per second, per worker.
    #[arg(long)]
    rate_per_worker: Option<f64>,
    /// Number of attack workers.
    #[arg(long)]
    workers: Option<u32>,
    #[arg(long)]
    attack_start: Option<f64>,
    #[arg(long)]
    attack_duration: Option<f64>,
}

impl Overrides {
    fn apply(&self, config: &mut SimConfig) -> anyhow::Result<()> {
        fn set<T: Clone>(field: &mut T, value: &Option<T>) {
            if let Some(v) = value {
                *field = v.clone();
            }
        }

        set(&mut config.control.tick_interval_secs, &self.tick_interval);
        set(&mut config.control.run_duration_secs, &self.run_duration);
        set(&mut config.scaling.cooldown_secs, &self.cooldown);
        set(&mut config.scaling.scale_up_threshold, &self.scale_up_threshold);
        set(&mut config.scaling.scale_down_threshold, &self.scale_down_threshold);
        set(&mut config.scaling.min_instances, &self.min_instances);
        set(&mut config.scaling.max_instances, &self.max_instances);
        set(&mut config.metrics.poll_interval_secs, &self.poll_interval);
        set(&mut config.load.rate_per_worker, &self.rate_per_worker);
        set(&mut config.load.worker_count, &self.workers);
        set(&mut config.load.attack_start_secs, &self.attack_start);
        set(&mut config.load.attack_duration_secs, &self.attack_duration);

        if let Some(eviction) = &self.eviction {
            config.scaling.eviction = parse_eviction(eviction)?;
        }
        Ok(())
    }
}

fn parse_eviction(s: &str) -> anyhow::Result<EvictionPolicy> {
    match s {
        "newest" => Ok(EvictionPolicy::Newest),
        "least-loaded" => Ok(EvictionPolicy::LeastLoaded),
        other => anyhow::bail!("unknown eviction policy {other:?}, expected newest or least-loaded"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_format);

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn init_tracing(format: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<SimConfig> {
    match path {
        Some(path) => SimConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display())),
        None => Ok(SimConfig::default()),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    args.overrides.apply(&mut config)?;
    config.validate()?;

    let backend = Arc::new(LocalBackend::new(LocalSettings {
        work_per_request: Duration::from_millis(args.work_ms),
        ..LocalSettings::default()
    }));
    let sender = Arc::new(HttpRequestSender::new(
        config.load.request_path.clone(),
        config.load.request_timeout(),
    ));

    info!(
        tick_secs = config.control.tick_interval_secs,
        run_secs = config.control.run_duration_secs,
        cooldown_secs = config.scaling.cooldown_secs,
        min = config.scaling.min_instances,
        max = config.scaling.max_instances,
        "starting simulation"
    );

    let mut control = ControlLoop::new(config, backend.clone(), backend.clone(), sender)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, stopping at the next tick boundary");
                let _ = shutdown_tx.send(true);
            }
            Err(e) => {
                warn!(error = %e, "failed to install Ctrl-C handler");
                // Keep the sender alive; dropping it reads as cancellation.
                std::future::pending::<()>().await;
            }
        }
    });

    let result = control.run(shutdown_rx).await;
    teardown(backend.as_ref(), control.take_resources()).await;
    let summary = result?;

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&summary)?),
        _ => print!("{}", report::format_summary(&summary)),
    }
    Ok(())
}

/// Stop every resource the control loop handed back, newest first.
async fn teardown(manager: &dyn ResourceManager, resources: Vec<Resource>) {
    let count = resources.len();
    for resource in resources.into_iter().rev() {
        if let Err(e) = manager.stop(&resource).await {
            warn!(resource_id = %resource.id, operation = "stop", error = %e, "teardown failed");
        }
    }
    info!(resources = count, "teardown complete");
}
