use anyhow::Result;
use colored::Colorize;
use querylogz::{config, init_tracing, server};
use std::path::Path;
use tracing::info;

/// Execute the start command
///
/// This will:
/// 1. Load configuration
/// 2. Initialize tracing with the configured level and format
/// 3. Start the server (blocks until shutdown)
pub async fn execute(config_path: &Path, demo: bool) -> Result<()> {
    let mut cfg = config::load_config(config_path)?;
    if demo {
        cfg.demo.enabled = true;
    }

    init_tracing(&cfg.server.log_level, &cfg.server.log_format);

    println!("{}", "Starting querylogz in foreground mode...".green());
    info!(
        config = %config_path.display(),
        demo = cfg.demo.enabled,
        "Configuration loaded"
    );

    server::start_server(cfg).await?;

    Ok(())
}
