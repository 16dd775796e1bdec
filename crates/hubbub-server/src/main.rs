//! # Hubbub Server
//!
//! Realtime chat relay.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! hubbub
//!
//! # Run with custom config
//! hubbub --config /path/to/hubbub.toml
//! hubbub -c /path/to/hubbub.toml
//!
//! # Run with environment variables
//! HUBBUB_PORT=8080 HUBBUB_HOST=0.0.0.0 hubbub
//! ```

use anyhow::Result;
use clap::Parser;
use hubbub_server::{config::Config, handlers, metrics};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hubbub", version)]
#[command(about = "Realtime chat relay")]
struct Args {
    /// Read configuration from this TOML file instead of the default search paths.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Config::from_file(path),
            None => Config::load(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hubbub_server=info,hubbub_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = args.load_config()?;

    tracing::info!("Starting Hubbub server on {}:{}", config.host, config.port);

    metrics::init_metrics();

    handlers::run_server(config).await?;

    Ok(())
}
