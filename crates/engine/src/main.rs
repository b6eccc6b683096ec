//! xmaker binary.
//!
//! Entry point for the cross-venue market-making engine. Loads
//! configuration, initializes tracing, and runs the supervisor until
//! SIGINT.

use std::path::PathBuf;

use clap::Parser;

use xmaker_core::config::AppConfig;
use xmaker_engine::Engine;

/// Cross-venue market-making engine.
#[derive(Parser, Debug)]
#[command(name = "xmaker", about = "Cross-venue market-making engine")]
struct Args {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit human-readable logs instead of JSON.
    #[arg(long)]
    pretty_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(args.config)?;

    xmaker_core::logging::init_tracing(!args.pretty_logs);

    tracing::info!(
        mode = ?config.system.mode,
        symbol_src = %config.trading.symbol_src,
        symbol_dst = %config.trading.symbol_dst,
        db_path = %config.system.db_path,
        "starting xmaker"
    );

    let engine = Engine::new(config)?;
    engine.run().await
}
