mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use cowatch_core::{logging, Config, SessionStore};

use server::CoWatchServer;

/// Self-hosted watch-together server
#[derive(Parser, Debug)]
#[command(name = "cowatch", version, about)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "COWATCH_CONFIG")]
    config: Option<String>,

    /// Override the configured log level
    #[arg(long, env = "COWATCH_LOG_LEVEL")]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    // 2. Validate configuration (fail fast on misconfigurations)
    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("CoWatch server starting...");
    info!("HTTP address: {}", config.http_address());
    info!(
        sessions_dir = %config.storage.sessions_dir.display(),
        media_root = %config.storage.media_root.display(),
        transcoder = %config.transcoder.program,
        "Storage and transcoder configured"
    );

    // 4. Initialize session store
    tokio::fs::create_dir_all(&config.storage.sessions_dir).await?;
    let store = SessionStore::from_config(&config);

    // 5. Serve until a shutdown signal arrives
    CoWatchServer::new(Arc::new(config), store).start().await
}
