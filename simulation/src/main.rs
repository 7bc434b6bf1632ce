//! Blueprint sync simulator
//!
//! A host and its clients on an in-process star topology, running the
//! protocol scenarios end to end.

use std::path::PathBuf;

use anyhow::Context;
use blueprint_logging::{BlueprintSubscriberBuilder, FileConfig, LogConfig, RotationStrategy};
use blueprint_protocol::{DEFAULT_QUOTA_LIMIT, HostConfig, ProtocolConfig};
use clap::{Parser, Subcommand};
use tracing::info_span;

use blueprint_sim::{ScenarioReport, scenarios};

#[derive(Parser)]
#[command(
    name = "blueprint-sim",
    about = "Blueprint placement sync over an in-process star topology",
    version
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Print reports as JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    /// Protocol configuration file for the host (missing file means defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Also write JSONL logs into this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    /// Log every protocol packet on the host
    #[arg(long, global = true)]
    packet_logging: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Version handshake and feature negotiation
    Handshake {
        /// Number of current clients
        #[arg(short, long, default_value = "3")]
        clients: usize,

        /// Also connect a client at a rejected version
        #[arg(long)]
        legacy: bool,
    },

    /// Chunked download of one artifact by every client
    Transfer {
        #[arg(short, long, default_value = "2")]
        clients: usize,

        /// Artifact size in bytes
        #[arg(short, long, default_value = "40000")]
        bytes: usize,
    },

    /// Concurrent modify requests for one placement
    ModifyRace {
        #[arg(short, long, default_value = "5")]
        clients: usize,
    },

    /// Downloads until the host's transfer quota runs out
    Quota {
        /// Quota limit in bytes
        #[arg(short, long, default_value_t = DEFAULT_QUOTA_LIMIT)]
        limit: u64,

        /// Size of each artifact
        #[arg(short, long, default_value = "16000000")]
        bytes: usize,

        /// Number of artifacts requested
        #[arg(short, long, default_value = "4")]
        attempts: usize,
    },

    /// Run every scenario with its defaults
    All,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut log_config = if cli.verbose {
        LogConfig::development()
    } else {
        LogConfig {
            console: blueprint_logging::ConsoleConfig {
                pretty: true,
                ..Default::default()
            },
            ..LogConfig::default()
        }
    };
    if let Some(directory) = &cli.log_dir {
        log_config.file = Some(FileConfig {
            directory: directory.clone(),
            prefix: "blueprint-sim".to_string(),
            rotation: RotationStrategy::Never,
            max_files: None,
        });
    }
    let _guard = BlueprintSubscriberBuilder::new()
        .with_config(log_config)
        .try_init()
        .context("failed to initialize logging")?;

    let mut protocol = match &cli.config {
        Some(path) => ProtocolConfig::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => ProtocolConfig::default(),
    };
    protocol.debug.packet_logging |= cli.packet_logging;
    let host = HostConfig::default().with_protocol(protocol);

    let reports = match cli.command {
        Commands::Handshake { clients, legacy } => {
            vec![run("handshake", || scenarios::run_handshake(&host, clients, legacy))?]
        }
        Commands::Transfer { clients, bytes } => {
            vec![run("transfer", || scenarios::run_transfer(&host, clients, bytes))?]
        }
        Commands::ModifyRace { clients } => {
            vec![run("modify-race", || scenarios::run_modify_race(&host, clients))?]
        }
        Commands::Quota {
            limit,
            bytes,
            attempts,
        } => vec![run("quota", || {
            scenarios::run_quota(&host, limit, bytes, attempts)
        })?],
        Commands::All => vec![
            run("handshake", || scenarios::run_handshake(&host, 3, true))?,
            run("transfer", || scenarios::run_transfer(&host, 2, 40_000))?,
            run("modify-race", || scenarios::run_modify_race(&host, 5))?,
            run("quota", || scenarios::run_quota(&host, 50_000, 20_000, 5))?,
        ],
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for report in &reports {
            print!("{}", report.render());
        }
    }

    let failed: Vec<_> = reports
        .iter()
        .filter(|r| !r.passed())
        .map(|r| r.scenario.as_str())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!("scenario checks failed: {}", failed.join(", "));
    }
    Ok(())
}

fn run(
    name: &str,
    scenario: impl FnOnce() -> anyhow::Result<ScenarioReport>,
) -> anyhow::Result<ScenarioReport> {
    let span = info_span!("scenario", scenario = name);
    let _entered = span.enter();
    scenario().with_context(|| format!("scenario {name} aborted"))
}
