//! # Stakewatch Host Agent
//!
//! Runs on each node server, pushing reports to the fleet server and
//! pulling queued commands.
//!
//! ## Commands
//! - `run`: report/poll loop at the configured interval
//! - `report`: collect host state and push a single FULL report
//! - `poll`: list pending commands without executing them
//!
//! ## Configuration
//!
//! A TOML file (`--config` or `STAKEWATCH_AGENT_CONFIG`) supplies the
//! defaults; command-line flags override it. The server endpoint, agent
//! token, and node id are required one way or the other.

mod client;
mod collect;
mod exec;

use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use stakewatch_common::config::AgentConfig;
use stakewatch_common::report::{AgentReport, ReportKind};

use crate::client::FleetClient;
use crate::exec::ProbeTargets;

#[derive(Parser)]
#[command(name = "stakewatch-agent", version, about = "Stakewatch host agent")]
struct Cli {
    /// Path to the agent TOML config.
    #[arg(long, global = true)]
    config: Option<String>,

    /// Fleet server endpoint, e.g. http://127.0.0.1:8080
    #[arg(long, global = true)]
    server: Option<String>,

    /// Capability token presented on every request.
    #[arg(long, global = true)]
    token: Option<String>,

    /// Id of the node server record this agent reports for.
    #[arg(long, global = true)]
    node_id: Option<String>,

    /// Seconds between cycles (run mode).
    #[arg(long, global = true)]
    interval: Option<u64>,

    /// Execution client process name, probed for liveness and version.
    #[arg(long, global = true)]
    execution_process: Option<String>,

    /// Consensus client process name, probed for liveness and version.
    #[arg(long, global = true)]
    consensus_process: Option<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report and execute commands in a loop.
    Run,
    /// Push one FULL report and exit.
    Report,
    /// List pending commands and exit.
    Poll,
}

/// Effective settings after merging config file and flags.
#[derive(Debug)]
struct Settings {
    client: FleetClient,
    probes: ProbeTargets,
    interval_secs: u64,
}

fn resolve(cli: &Cli) -> Result<Settings> {
    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("STAKEWATCH_AGENT_CONFIG").ok());
    let file = match config_path {
        Some(path) => AgentConfig::load_from_file(&path)
            .map_err(|e| anyhow!("failed to load config {}: {}", path, e))?,
        None => AgentConfig::default(),
    };

    let server = cli
        .server
        .clone()
        .or(file.server_endpoint)
        .ok_or_else(|| anyhow!("no server endpoint configured"))?;
    let token = cli
        .token
        .clone()
        .or(file.agent_token)
        .ok_or_else(|| anyhow!("no agent token configured"))?;
    let node_id = cli
        .node_id
        .clone()
        .or(file.node_id)
        .ok_or_else(|| anyhow!("no node id configured"))?;
    let interval_secs = cli.interval.or(file.poll_interval_secs).unwrap_or(60).max(1);

    Ok(Settings {
        client: FleetClient::new(server, token, node_id)?,
        probes: ProbeTargets {
            execution: cli.execution_process.clone(),
            consensus: cli.consensus_process.clone(),
        },
        interval_secs,
    })
}

fn full_report(probes: &ProbeTargets) -> AgentReport {
    AgentReport {
        kind: ReportKind::Full,
        ..exec::status_report(probes)
    }
}

async fn run_once(settings: &Settings) {
    let report = full_report(&settings.probes);
    match settings.client.push_report(&report).await {
        Ok(summary) if summary.success => {
            info!(updated = summary.validators_updated, "report pushed");
        }
        Ok(summary) => {
            warn!(message = ?summary.message, "server could not process report");
        }
        Err(e) => {
            warn!(error = %e, "report push failed, retrying next cycle");
        }
    }

    match settings.client.poll_pending().await {
        Ok(commands) if commands.is_empty() => {}
        Ok(commands) => {
            info!(count = commands.len(), "executing pending commands");
            exec::execute_all(&settings.client, &settings.probes, commands).await;
        }
        Err(e) => {
            warn!(error = %e, "command poll failed");
        }
    }
}

async fn run_loop(settings: &Settings) -> Result<()> {
    // the server side wins on cadence when it has an opinion
    let interval_secs = match settings.client.fetch_config().await {
        Ok(config) => {
            info!(
                pubkeys = config.pubkeys.len(),
                interval = config.poll_interval_secs,
                "node config fetched"
            );
            config.poll_interval_secs.max(1)
        }
        Err(e) => {
            warn!(error = %e, "could not fetch node config, using local interval");
            settings.interval_secs
        }
    };

    info!(
        node_id = settings.client.node_id(),
        interval_secs, "agent loop starting"
    );
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
    loop {
        ticker.tick().await;
        run_once(settings).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    let settings = resolve(&cli)?;

    match cli.cmd {
        Commands::Run => run_loop(&settings).await,
        Commands::Report => {
            let summary = settings.client.push_report(&full_report(&settings.probes)).await?;
            println!(
                "success={} validators_updated={} alerts_dispatched={}",
                summary.success, summary.validators_updated, summary.alerts_dispatched
            );
            Ok(())
        }
        Commands::Poll => {
            let pending = settings.client.poll_pending().await?;
            if pending.is_empty() {
                println!("no pending commands");
            }
            for command in pending {
                println!("{}  {}", command.id, command.command_type);
            }
            Ok(())
        }
    }
}
