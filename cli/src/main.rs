//! ChainPipe CLI: replay ingestion events through the pipeline and inspect
//! stored state.
//!
//! # Commands
//! ```text
//! chainpipe info
//! chainpipe replay     --input <events.jsonl> [--sqlite <path>] [--config <path.json>] [--page <N>]
//! chainpipe checkpoint --sqlite <path>
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd_replay;
mod config;
mod logging;

use config::AppConfig;

#[derive(Parser)]
#[command(
    name = "chainpipe",
    about = "Transaction and log dispatch pipeline: ChainPipe CLI",
    long_about = "
ChainPipe CLI: feed block/transaction events through the dispatch pipeline,
persist transactions, accounts, staking and ERC-20 records, and page through
the result.

ENVIRONMENT VARIABLES:
  RUST_LOG    Overrides the configured log filter
",
    version
)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Feed JSON-lines ingestion events through the full pipeline
    Replay {
        /// File with one `{"block": ..., "transaction": ...}` object per line
        #[arg(short, long)]
        input: PathBuf,
        /// SQLite database to persist into (default: in-memory)
        #[arg(long)]
        sqlite: Option<String>,
        /// Size of the transaction page printed afterwards; negative pages
        /// from the oldest transaction
        #[arg(long, default_value_t = 10, allow_negative_numbers = true)]
        page: i32,
    },

    /// Print the stored checkpoint
    Checkpoint {
        /// SQLite database to read
        #[arg(long)]
        sqlite: String,
    },

    /// Show build information and the routed event signatures
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    logging::init_tracing(&config.log);

    match cli.command {
        Commands::Replay {
            input,
            sqlite,
            page,
        } => cmd_replay::run(&input, sqlite.as_deref(), &config, page).await,

        Commands::Checkpoint { sqlite } => cmd_checkpoint(&sqlite).await,

        Commands::Info => cmd_info(&config),
    }
}

// ─── Command implementations ─────────────────────────────────────────────────

async fn cmd_checkpoint(path: &str) -> Result<()> {
    use chainpipe_core::{MemoryCache, Repository};
    use chainpipe_storage::SqliteStore;
    use std::sync::Arc;

    let store = Arc::new(SqliteStore::open(path).await?);
    let repo = Repository::new(store, Arc::new(MemoryCache::new()));

    match repo.last_checkpoint().await? {
        Some(cp) => println!("{}", serde_json::to_string_pretty(&cp)?),
        None => println!("no checkpoint stored in '{path}'"),
    }
    Ok(())
}

fn cmd_info(config: &AppConfig) -> Result<()> {
    use chainpipe_evm::default_router;

    let router = default_router(config.sfc_contract);

    println!("ChainPipe v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Pipeline:");
    println!("  chain                      {}", config.pipeline.chain);
    println!("  intake queue               {}", config.pipeline.intake_queue_capacity);
    println!("  account queue              {}", config.pipeline.account_queue_capacity);
    println!("  log queue                  {}", config.pipeline.log_queue_capacity);
    println!("  max in-flight commits      {}", config.pipeline.max_inflight_persists);
    println!("  checkpoint interval        {:?}", config.pipeline.checkpoint_interval());
    println!();
    println!("Routed event signatures ({}):", router.len());
    let mut routes: Vec<_> = router
        .signatures()
        .filter_map(|sig| router.get(sig).map(|h| (h.name().to_string(), *sig)))
        .collect();
    routes.sort();
    for (name, sig) in routes {
        println!("  {name:<32} {sig}");
    }
    println!();
    println!("SFC contract:                {}", config.sfc_contract);
    println!("Storage backends:            memory, sqlite (sqlx)");
    Ok(())
}
