//! Service configuration loaded from environment variables

use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::asset_analyzer::AnalyzerConfig;
use crate::asset_stats::AssetStatsConfig;

const DEFAULT_DATABASE_PATH: &str = "data/cryptomanager.db";

/// Configuration for the server's services
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Exchanges users may connect to; `None` allows all
    pub enabled_exchanges: Option<Vec<String>>,
    pub database_path: String,
    pub analyzer: AnalyzerConfig,
    pub stats: AssetStatsConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            enabled_exchanges: None,
            database_path: DEFAULT_DATABASE_PATH.to_string(),
            analyzer: AnalyzerConfig::default(),
            stats: AssetStatsConfig::default(),
        }
    }
}

impl ServiceConfig {
    /// Load configuration from environment variables
    ///
    /// Reads:
    /// - ENABLED_EXCHANGES: `;`-separated exchange allow-list
    /// - DATABASE_PATH
    /// - ASSET_STATS_INTERVAL_SECS, ASSET_STATS_LOG_INTERVAL_SECS
    /// - ASSET_STATS_BATCH_SIZE
    /// - ASSET_STATS_MAX_DEVIATION: fraction, e.g. 0.2 for 20%
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(exchanges) = lookup("ENABLED_EXCHANGES") {
            config.enabled_exchanges = parse_exchange_list(&exchanges);
        }
        if let Some(path) = lookup("DATABASE_PATH") {
            config.database_path = path;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "ASSET_STATS_INTERVAL_SECS")? {
            config.analyzer.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "ASSET_STATS_LOG_INTERVAL_SECS")? {
            config.analyzer.log_interval = Duration::from_secs(secs);
        }
        if let Some(size) = parse_var::<usize, _>(&lookup, "ASSET_STATS_BATCH_SIZE")? {
            if size == 0 {
                return Err(ConfigError::Invalid {
                    name: "ASSET_STATS_BATCH_SIZE".to_string(),
                    error: "must be greater than zero".to_string(),
                });
            }
            config.analyzer.batch_size = size;
        }
        if let Some(deviation) = parse_var::<Decimal, _>(&lookup, "ASSET_STATS_MAX_DEVIATION")? {
            if deviation.is_sign_negative() {
                return Err(ConfigError::Invalid {
                    name: "ASSET_STATS_MAX_DEVIATION".to_string(),
                    error: "must not be negative".to_string(),
                });
            }
            config.stats.max_deviation = deviation;
        }

        Ok(config)
    }
}

fn parse_exchange_list(value: &str) -> Option<Vec<String>> {
    let exchanges: Vec<String> = value
        .split(';')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect();

    if exchanges.is_empty() {
        None
    } else {
        Some(exchanges)
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Invalid {
                name: name.to_string(),
                error: e.to_string(),
            }),
        None => Ok(None),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {error}")]
    Invalid { name: String, error: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.enabled_exchanges, None);
        assert_eq!(config.analyzer.interval, Duration::from_secs(10));
        assert_eq!(config.analyzer.log_interval, Duration::from_secs(60));
        assert_eq!(config.analyzer.batch_size, 1000);
        assert_eq!(config.stats.max_deviation, dec!(0.2));
    }

    #[test]
    fn test_parse_overrides() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("ENABLED_EXCHANGES", "Binance; Kraken;;OKX"),
            ("ASSET_STATS_BATCH_SIZE", "250"),
            ("ASSET_STATS_MAX_DEVIATION", "0.1"),
            ("DATABASE_PATH", "/tmp/assets.db"),
        ]))
        .unwrap();

        assert_eq!(
            config.enabled_exchanges,
            Some(vec![
                "Binance".to_string(),
                "Kraken".to_string(),
                "OKX".to_string()
            ])
        );
        assert_eq!(config.analyzer.batch_size, 250);
        assert_eq!(config.stats.max_deviation, dec!(0.1));
        assert_eq!(config.database_path, "/tmp/assets.db");
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = ServiceConfig::from_lookup(lookup(&[("ASSET_STATS_BATCH_SIZE", "0")])).unwrap_err();
        assert!(err.to_string().contains("ASSET_STATS_BATCH_SIZE"));

        assert!(ServiceConfig::from_lookup(lookup(&[("ASSET_STATS_INTERVAL_SECS", "soon")])).is_err());
    }
}
