//! `capcored` - chain maintenance tooling.
//!
//! Exit codes: 0 on success, 1 on any validation or I/O failure, 130 when
//! interrupted.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use capcore_chain::import::{create_export_stream, export_blocks, import_blocks, open_import_stream};
use capcore_chain::{BlockError, Blockchain, ChainConfig};
use capcore_consensus::ChainParams;
use capcore_poc::SyntheticPosVerifier;
use capcore_storage::{KvStore, SledKv};

/// Exit code reported for an interrupted run.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "capcored", about = "CapCore chain tooling", version)]
struct Cli {
    /// Data directory holding the chain database and caches.
    #[arg(long, default_value = "./data/capcore")]
    datadir: PathBuf,

    /// Network to operate on.
    #[arg(long, default_value = "mainnet")]
    network: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Import a framed block stream (gzip when the path ends in .gz).
    Import {
        /// Stream file to read.
        path: PathBuf,
        /// Skip script execution for trusted streams.
        #[arg(long)]
        no_expensive_validation: bool,
    },
    /// Export the main chain into a framed block stream.
    Export {
        /// Stream file to write.
        path: PathBuf,
    },
    /// Print the current chain tip.
    Info,
}

fn params_for(network: &str) -> Result<ChainParams> {
    match network {
        "mainnet" => Ok(ChainParams::mainnet()),
        "regtest" => Ok(ChainParams::regtest()),
        other => anyhow::bail!("unknown network {other:?}"),
    }
}

async fn open_chain(cli: &Cli) -> Result<Arc<Blockchain>> {
    let params = params_for(&cli.network)?;
    std::fs::create_dir_all(&cli.datadir)
        .with_context(|| format!("creating {}", cli.datadir.display()))?;
    let kv: Arc<dyn KvStore> =
        Arc::new(SledKv::open(cli.datadir.join("chain.db")).context("opening chain database")?);
    let chain = Blockchain::new(ChainConfig {
        params,
        kv,
        cache_dir: cli.datadir.clone(),
        pos_verifier: Arc::new(SyntheticPosVerifier),
    })
    .await
    .context("opening chain")?;
    Ok(chain)
}

async fn run(cli: Cli) -> Result<u8> {
    match &cli.command {
        Command::Import {
            path,
            no_expensive_validation,
        } => {
            let chain = open_chain(&cli).await?;
            let reader = open_import_stream(path).context("opening import stream")?;

            let stop = Arc::new(AtomicBool::new(false));
            let stop_signal = Arc::clone(&stop);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    stop_signal.store(true, Ordering::Relaxed);
                }
            });

            match import_blocks(&chain, reader, *no_expensive_validation, &stop).await {
                Ok(stats) => {
                    info!(
                        read = stats.read,
                        processed = stats.processed,
                        tip = chain.best_block_height(),
                        "import complete"
                    );
                    Ok(0)
                }
                Err(BlockError::Interrupted) => {
                    error!("import interrupted");
                    Ok(EXIT_INTERRUPTED)
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Export { path } => {
            let chain = open_chain(&cli).await?;
            let writer = create_export_stream(path).context("creating export stream")?;
            let exported = export_blocks(&chain, writer)?;
            info!(exported, "export complete");
            Ok(0)
        }
        Command::Info => {
            let chain = open_chain(&cli).await?;
            println!(
                "network: {}\nheight:  {}\nhash:    {}",
                cli.network,
                chain.best_block_height(),
                chain.best_block_hash()
            );
            Ok(0)
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %e, "command failed");
            ExitCode::from(1)
        }
    }
}
