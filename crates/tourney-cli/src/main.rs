//! Tourney CLI
//!
//! The `tourney` command runs a tournament validator or submits an agent as
//! a miner.
//!
//! ## Commands
//!
//! - `run`: Start the validator control loop
//! - `submit`: Validate, pack and upload an agent directory
//! - `validate`: Check an agent directory without uploading

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tourney_api::{Signer, Sr25519Signer, TournamentApi};
use tourney_core::config::WalletConfig;
use tourney_core::telemetry::level_from_verbosity;
use tourney_core::{
    init_tracing, load_miner_config, load_validator_config, submit_agent, validate_agent_dir,
    LogFormat, RunMode, SystemClock, TournamentOrchestrator,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "tourney")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Validator and miner tooling for agent tournaments", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the validator until interrupted
    Run {
        /// Validator config file (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Override the configured run mode (gpu or cpu)
        #[arg(long)]
        mode: Option<RunMode>,
    },

    /// Submit an agent directory to the active tournament
    Submit {
        /// Miner config file (YAML)
        #[arg(short, long)]
        config: PathBuf,

        /// Agent directory
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Check an agent directory's layout
    Validate {
        /// Agent directory
        #[arg(short, long)]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(
        LogFormat::from_json_flag(cli.json),
        level_from_verbosity(cli.verbose),
    );

    match cli.command {
        Commands::Run { config, mode } => cmd_run(&config, mode).await,
        Commands::Submit { config, path } => cmd_submit(&config, &path).await,
        Commands::Validate { path } => cmd_validate(&path),
    }
}

/// Secret from the config wins over the wallet keyfile.
fn load_signer(wallet: &WalletConfig) -> Result<Arc<dyn Signer>> {
    let signer = match &wallet.secret {
        Some(secret) => Sr25519Signer::from_secret(secret).context("Invalid wallet secret")?,
        None => Sr25519Signer::from_wallet(&wallet.path, &wallet.name, &wallet.hotkey)
            .with_context(|| {
                format!(
                    "Failed to load hotkey {}/{} from {}",
                    wallet.name,
                    wallet.hotkey,
                    wallet.path.display()
                )
            })?,
    };
    Ok(Arc::new(signer))
}

async fn cmd_run(config_path: &Path, mode: Option<RunMode>) -> Result<()> {
    let mut config = load_validator_config(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    if let Some(mode) = mode {
        config.mode = mode;
    }

    let signer = load_signer(&config.wallet)?;
    info!(
        hotkey = %signer.hotkey(),
        network = %config.subnet.network,
        netuid = config.subnet.subnet_uid,
        mode = ?config.mode,
        api = %config.tournament.api_url,
        "Validator starting"
    );

    let backend = TournamentApi::new(config.api_config(), signer)
        .context("Failed to build tournament API client")?;
    let mut orchestrator =
        TournamentOrchestrator::from_config(&config, Arc::new(backend), Arc::new(SystemClock));

    tokio::select! {
        _ = orchestrator.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown requested, stopping validator");
        }
    }
    Ok(())
}

async fn cmd_submit(config_path: &Path, agent_dir: &Path) -> Result<()> {
    let config = load_miner_config(config_path)
        .with_context(|| format!("Failed to load config {}", config_path.display()))?;
    let signer = load_signer(&config.wallet)?;
    let backend = TournamentApi::new(config.api_config(), signer)
        .context("Failed to build tournament API client")?;

    let report = submit_agent(&backend, agent_dir)
        .await
        .with_context(|| format!("Failed to submit {}", agent_dir.display()))?;

    println!("Submitted agent {}", report.agent.id);
    println!("Tournament: {}", report.tournament_id);
    println!("Checksum:   {}", report.content_hash);
    println!("Size:       {} bytes", report.file_size);
    Ok(())
}

fn cmd_validate(agent_dir: &Path) -> Result<()> {
    validate_agent_dir(agent_dir)
        .with_context(|| format!("Agent directory {} is invalid", agent_dir.display()))?;
    println!("Agent directory {} is valid", agent_dir.display());
    Ok(())
}
