//! Locating, loading and validating the TOML configuration
use super::RadarConfig;
use crate::error::ConfigError;
use std::path::{Path, PathBuf};

pub const CONFIG_ENV_VAR: &str = "TOKEN_RADAR_CONFIG";

impl RadarConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RadarConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or validated defaults without one. Runs before logging
    /// is set up, so the caller reports where the configuration came from.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let config = RadarConfig::default();
                config.validate()?;
                Ok(config)
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if !(5..=10).contains(&self.providers.timeout_secs) {
            return invalid("providers.timeout_secs must be between 5 and 10");
        }
        if self.freshness.max_price_age_secs == 0 {
            return invalid("freshness.max_price_age_secs must be positive");
        }
        if self.freshness.min_valid_price < 0.0 {
            return invalid("freshness.min_valid_price must not be negative");
        }
        if self.velocity.tolerance_secs < 0 {
            return invalid("velocity.tolerance_secs must not be negative");
        }
        let horizons = [
            self.velocity.horizon_1m_secs,
            self.velocity.horizon_5m_secs,
            self.velocity.horizon_30m_secs,
        ];
        if horizons.iter().any(|h| *h <= self.velocity.tolerance_secs) {
            return invalid("velocity horizons must exceed the tolerance");
        }
        if (self.risk.rule_weight + self.risk.model_weight - 1.0).abs() > 1e-6
            || self.risk.rule_weight < 0.0
            || self.risk.model_weight < 0.0
        {
            return invalid("risk weights must be non-negative and sum to 1");
        }
        if self.rate_limit.enabled && (self.rate_limit.fetches_per_minute == 0 || self.rate_limit.burst == 0) {
            return invalid("rate_limit quota and burst must be positive");
        }
        let curve = &self.bonding_curve;
        if curve.virtual_sol_end <= curve.virtual_sol_start || curve.virtual_sol_start < 0.0 {
            return invalid("bonding_curve virtual SOL bounds must be increasing");
        }
        if curve.sol_usd_rate <= 0.0 || curve.total_supply <= 0.0 {
            return invalid("bonding_curve rate and supply must be positive");
        }
        if !(0.0..=1.0).contains(&curve.migrated_liquidity_ratio)
            || !(0.0..=1.0).contains(&curve.pre_migration_liquidity_ratio)
        {
            return invalid("bonding_curve liquidity ratios must be within [0, 1]");
        }
        if self.client.coalescing_threshold == 0 {
            return invalid("client.coalescing_threshold must be positive");
        }
        if self.client.backoff_initial_ms == 0 || self.client.backoff_max_ms < self.client.backoff_initial_ms {
            return invalid("client backoff max must be at least the initial delay");
        }
        if self.client.request_timeout_secs == 0 || self.client.connect_timeout_secs == 0 {
            return invalid("client timeouts must be positive");
        }
        if self.server.subscriber_buffer == 0 || self.server.update_bus_capacity == 0 {
            return invalid("server buffers must be positive");
        }
        Ok(())
    }
}

/// Configuration file named by `TOKEN_RADAR_CONFIG` or the first CLI argument
pub fn config_path(cli_path: Option<String>) -> Option<PathBuf> {
    resolve_path(std::env::var(CONFIG_ENV_VAR).ok(), cli_path)
}

/// Environment variable wins over the CLI argument
fn resolve_path(env_value: Option<String>, cli_path: Option<String>) -> Option<PathBuf> {
    env_value
        .filter(|v| !v.trim().is_empty())
        .or(cli_path.filter(|v| !v.trim().is_empty()))
        .map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageBackend;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = RadarConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.client.coalescing_threshold, 3);
        assert_eq!(config.freshness.max_price_age_secs, 300);
        assert_eq!(config.bonding_curve.migrated_liquidity_ratio, 0.30);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RadarConfig::from_toml(
            r#"
            [storage]
            backend = "memory"

            [providers]
            timeout_secs = 6
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.providers.timeout_secs, 6);
        assert_eq!(config.velocity.horizon_5m_secs, 300);
    }

    #[test]
    fn test_rejects_bad_backoff() {
        let err = RadarConfig::from_toml(
            r#"
            [client]
            backoff_initial_ms = 5000
            backoff_max_ms = 1000
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_weights_not_summing_to_one() {
        let mut config = RadarConfig::default();
        config.risk.model_weight = 0.7;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

        let config = RadarConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_with_and_without_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind_address = \"0.0.0.0:9000\"").unwrap();

        let config = RadarConfig::load(Some(file.path())).unwrap();
        assert_eq!(config.server.bind_address, "0.0.0.0:9000");

        let config = RadarConfig::load(None).unwrap();
        assert_eq!(config.server.bind_address, RadarConfig::default().server.bind_address);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = RadarConfig::load_from_file("/nonexistent/token-radar.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_env_path_takes_precedence() {
        let resolved = resolve_path(Some("/etc/radar.toml".into()), Some("cli.toml".into()));
        assert_eq!(resolved, Some(PathBuf::from("/etc/radar.toml")));

        let resolved = resolve_path(Some("".into()), Some("cli.toml".into()));
        assert_eq!(resolved, Some(PathBuf::from("cli.toml")));

        assert_eq!(resolve_path(None, None), None);
    }
}
