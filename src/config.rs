use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::render::LatencyThresholds;

/// Upper bound for any page wait, one day
pub const MAX_TIMEOUT_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub querylog: QueryLogConfig,
    pub demo: DemoConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    /// "text" or "json"
    pub log_format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 15000,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryLogConfig {
    /// Log name; also the path the debug page is served under
    pub name: String,
    /// Per-subscriber queue depth
    pub capacity: usize,
    pub default_limit: usize,
    pub default_timeout_secs: f64,
    pub max_timeout_secs: f64,
    pub fast_threshold_ms: u64,
    pub medium_threshold_ms: u64,
}

impl Default for QueryLogConfig {
    fn default() -> Self {
        Self {
            name: "querylogz".to_string(),
            capacity: 100,
            default_limit: 300,
            default_timeout_secs: 10.0,
            max_timeout_secs: 60.0,
            fast_threshold_ms: 10,
            medium_threshold_ms: 100,
        }
    }
}

impl QueryLogConfig {
    pub fn thresholds(&self) -> LatencyThresholds {
        LatencyThresholds::from_millis(self.fast_threshold_ms, self.medium_threshold_ms)
    }

    pub fn default_timeout(&self) -> Duration {
        bounded_secs(self.default_timeout_secs)
    }

    pub fn max_timeout(&self) -> Duration {
        bounded_secs(self.max_timeout_secs)
    }
}

/// Seconds as a duration within `0..=MAX_TIMEOUT_SECS`; NaN becomes zero
fn bounded_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs.clamp(0.0, MAX_TIMEOUT_SECS)).unwrap_or_default()
}

/// Synthetic traffic for trying the debug page without a real producer
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DemoConfig {
    pub enabled: bool,
    pub interval_ms: u64,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "/metrics".to_string(),
        }
    }
}

/// Load configuration from an optional TOML file plus `QUERYLOGZ__*` environment variables
pub fn load_config(path: &Path) -> anyhow::Result<Config> {
    let config = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(config::Environment::with_prefix("QUERYLOGZ").separator("__"))
        .build()?;

    let cfg: Config = config.try_deserialize()?;
    validate_config(&cfg)?;

    Ok(cfg)
}

pub fn validate_config(cfg: &Config) -> anyhow::Result<()> {
    let querylog = &cfg.querylog;

    if querylog.name.is_empty() || querylog.name.contains('/') {
        anyhow::bail!("Query log name must be non-empty and must not contain '/': '{}'", querylog.name);
    }

    if querylog.capacity == 0 {
        anyhow::bail!("Query log capacity must be positive");
    }

    for (field, value) in [
        ("default_timeout_secs", querylog.default_timeout_secs),
        ("max_timeout_secs", querylog.max_timeout_secs),
    ] {
        if !value.is_finite() || value < 0.0 {
            anyhow::bail!("querylog.{} must be a non-negative number, got {}", field, value);
        }
        if value > MAX_TIMEOUT_SECS {
            anyhow::bail!(
                "querylog.{} must be at most {} seconds, got {}",
                field,
                MAX_TIMEOUT_SECS,
                value
            );
        }
    }

    if querylog.default_timeout_secs > querylog.max_timeout_secs {
        anyhow::bail!(
            "querylog.default_timeout_secs ({}) exceeds querylog.max_timeout_secs ({})",
            querylog.default_timeout_secs,
            querylog.max_timeout_secs
        );
    }

    if querylog.fast_threshold_ms >= querylog.medium_threshold_ms {
        anyhow::bail!(
            "querylog.fast_threshold_ms ({}) must be below querylog.medium_threshold_ms ({})",
            querylog.fast_threshold_ms,
            querylog.medium_threshold_ms
        );
    }

    if !matches!(cfg.server.log_format.as_str(), "text" | "json") {
        anyhow::bail!("server.log_format must be 'text' or 'json', got '{}'", cfg.server.log_format);
    }

    if cfg.demo.enabled && cfg.demo.interval_ms == 0 {
        anyhow::bail!("demo.interval_ms must be positive when demo traffic is enabled");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = Config::default();
        assert!(validate_config(&cfg).is_ok());
        assert_eq!(cfg.querylog.thresholds(), LatencyThresholds::from_millis(10, 100));
        assert_eq!(cfg.querylog.default_timeout(), Duration::from_secs(10));
    }

    #[test]
    fn test_validate_config_rejects_zero_capacity() {
        let mut cfg = Config::default();
        cfg.querylog.capacity = 0;

        let result = validate_config(&cfg);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("capacity must be positive"));
    }

    #[test]
    fn test_validate_config_rejects_inverted_thresholds() {
        let mut cfg = Config::default();
        cfg.querylog.fast_threshold_ms = 100;
        cfg.querylog.medium_threshold_ms = 10;

        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_rejects_bad_name() {
        let mut cfg = Config::default();
        cfg.querylog.name = "debug/querylogz".to_string();
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_rejects_default_above_max() {
        let mut cfg = Config::default();
        cfg.querylog.default_timeout_secs = 120.0;
        assert!(validate_config(&cfg).is_err());
    }

    #[test]
    fn test_validate_config_rejects_huge_timeouts() {
        let mut cfg = Config::default();
        cfg.querylog.max_timeout_secs = 1e20;
        let result = validate_config(&cfg);
        assert!(result.unwrap_err().to_string().contains("at most"));

        // Unvalidated values still convert without panicking
        assert_eq!(cfg.querylog.max_timeout(), Duration::from_secs(86_400));
        cfg.querylog.default_timeout_secs = f64::NAN;
        assert_eq!(cfg.querylog.default_timeout(), Duration::ZERO);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [querylog]
            capacity = 500

            [demo]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(cfg.querylog.capacity, 500);
        assert_eq!(cfg.querylog.name, "querylogz");
        assert_eq!(cfg.server.port, 15000);
        assert!(cfg.demo.enabled);
        assert_eq!(cfg.demo.interval_ms, 250);
    }

    #[test]
    fn test_load_config_without_file_uses_defaults() {
        let cfg = load_config(Path::new("does-not-exist.toml")).unwrap();
        assert_eq!(cfg.querylog.capacity, 100);
    }
}
