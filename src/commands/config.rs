use anyhow::Result;
use colored::Colorize;
use querylogz::config::{self, Config};
use std::path::Path;

/// Execute the config show command
///
/// Displays the effective configuration (file plus environment overrides)
pub fn show(config_path: &Path) -> Result<()> {
    println!("{}", "Loading configuration...".yellow());

    let cfg = config::load_config(config_path)?;

    println!("{}", "Current Configuration:".green().bold());
    println!();
    println!("{}", toml::to_string_pretty(&cfg)?);

    Ok(())
}

/// Execute the config validate command
pub fn validate(config_path: &Path) -> Result<()> {
    println!("{}", "Validating configuration...".yellow());

    let cfg = config::load_config(config_path)?;

    println!("{}", "✓ Configuration is valid".green());
    println!();
    println!("{}", "Summary:".bold());
    for line in summary(&cfg) {
        println!("  {}", line);
    }

    Ok(())
}

fn summary(cfg: &Config) -> Vec<String> {
    vec![
        format!("Listen: {}:{}", cfg.server.host, cfg.server.port),
        format!("Debug page: /{}", cfg.querylog.name),
        format!("Queue capacity: {}", cfg.querylog.capacity),
        format!(
            "Severity thresholds: fast < {}ms, medium < {}ms",
            cfg.querylog.fast_threshold_ms, cfg.querylog.medium_threshold_ms
        ),
        format!(
            "Demo traffic: {}",
            if cfg.demo.enabled { "enabled" } else { "disabled" }
        ),
    ]
}
