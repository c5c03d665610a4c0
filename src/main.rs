use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use hivemind::{
    AgentId, CostLedger, FsRelay, Hive, HiveConfig, Job, JobStore, Orchestrator, Priority,
    TransportMethod,
};

#[derive(Parser)]
#[command(name = "hivemind", about = "Job orchestration for heterogeneous agents")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "hive.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the orchestrator until Ctrl-C
    Run {
        /// JSON array of jobs to submit at startup
        #[arg(long)]
        jobs: Option<PathBuf>,
    },
    /// Create relay inbox/outbox directories for every relay agent
    Register,
    /// List agents that have a relay directory
    Agents,
    /// Print a dashboard snapshot from the saved store
    Status,
}

/// Job as written in a seed file
#[derive(Deserialize)]
struct SeedJob {
    task_type: String,
    description: String,
    #[serde(default)]
    priority: Priority,
    #[serde(default)]
    to_agent: Option<AgentId>,
    #[serde(default)]
    max_cost_usd: Option<f64>,
    #[serde(default)]
    timeout_secs: Option<u64>,
    #[serde(default)]
    requires_approval: bool,
    #[serde(default)]
    inputs: serde_json::Value,
}

impl SeedJob {
    fn into_job(self) -> Job {
        let mut job = Job::new(self.task_type, self.description)
            .with_origin("human")
            .with_priority(self.priority)
            .with_inputs(self.inputs);
        if let Some(agent) = self.to_agent {
            job = job.with_to_agent(agent);
        }
        if let Some(budget) = self.max_cost_usd {
            job = job.with_budget(budget);
        }
        if let Some(secs) = self.timeout_secs {
            job = job.with_timeout_secs(secs);
        }
        if self.requires_approval {
            job = job.requiring_approval();
        }
        job
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

async fn load_store(path: Option<&Path>) -> anyhow::Result<(JobStore, CostLedger)> {
    match path {
        Some(path) if tokio::fs::try_exists(path).await.unwrap_or(false) => {
            Ok(JobStore::load_snapshot(path).await?)
        }
        _ => Ok((JobStore::new(), CostLedger::new())),
    }
}

/// The command line has no way to supply live invokers: hybrid agents run
/// relay-only and live-only agents are disabled
fn relay_only(mut config: HiveConfig) -> HiveConfig {
    for agent in &mut config.agents {
        match agent.transport {
            TransportMethod::Relay => {}
            TransportMethod::Hybrid => {
                warn!(agent = %agent.id, "No live invoker, running relay-only");
                agent.transport = TransportMethod::Relay;
            }
            TransportMethod::Live => {
                warn!(agent = %agent.id, "No live invoker, agent disabled");
                agent.transport = TransportMethod::Relay;
                agent.enabled = false;
            }
        }
    }
    config
}

async fn run(config: HiveConfig, jobs: Option<PathBuf>) -> anyhow::Result<()> {
    let config = relay_only(config);
    let relay = FsRelay::new(&config.relay.root);
    for agent in config.agents.iter().filter(|a| a.enabled) {
        relay.register_agent(&agent.id).await?;
    }

    let snapshot_path = config.snapshot_path.clone();
    let (store, ledger) = load_store(snapshot_path.as_deref()).await?;
    let builder = Hive::builder(config)
        .relay(std::sync::Arc::new(relay))
        .store(store)
        .ledger(ledger);
    let (orchestrator, channel) = Orchestrator::with_channel(builder)?;
    let hive = orchestrator.hive().clone();

    if let Some(path) = jobs {
        let raw = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read jobs file '{}'", path.display()))?;
        let seeds: Vec<SeedJob> = serde_json::from_str(&raw)?;
        for seed in seeds {
            let id = channel.create_job(seed.into_job())?;
            info!(job_id = %id, "Seed job queued");
        }
    }

    let events = channel.clone();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            info!(event = ?event, "Hive event");
        }
    });

    let loop_handle = tokio::spawn(orchestrator.run());
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    channel.shutdown()?;
    loop_handle.await??;

    if let Some(path) = snapshot_path {
        hive.save_snapshot(&path).await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = HiveConfig::load(&cli.config)
        .await
        .with_context(|| format!("failed to load config '{}'", cli.config.display()))?;

    match cli.command {
        Commands::Run { jobs } => run(config, jobs).await?,
        Commands::Register => {
            let relay = FsRelay::new(&config.relay.root);
            for agent in config.agents.iter().filter(|a| a.transport.has_relay()) {
                let dir = relay.register_agent(&agent.id).await?;
                println!("{} -> {}", agent.id, dir.display());
            }
        }
        Commands::Agents => {
            let relay = FsRelay::new(&config.relay.root);
            for agent in relay.list_agents().await? {
                let configured = config.agent(&agent).is_some();
                println!("{agent}{}", if configured { "" } else { " (not configured)" });
            }
        }
        Commands::Status => {
            let (store, ledger) = load_store(config.snapshot_path.as_deref()).await?;
            let hive = Hive::builder(relay_only(config))
                .store(store)
                .ledger(ledger)
                .build()?;
            println!("{}", serde_json::to_string_pretty(&hive.dashboard(Utc::now()))?);
        }
    }
    Ok(())
}
