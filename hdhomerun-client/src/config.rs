//! Client configuration.
//!
//! Values come from a TOML file, then `HDHOMERUN_*` environment variables,
//! then the built-in defaults:
//!
//! ```toml
//! discovery_port = 65001
//! control_port = 65001
//! connect_timeout_ms = 2500
//! control_timeout_ms = 2500
//! discover_timeout_ms = 500
//! max_results = 64
//! ```

use std::path::Path;
use std::time::Duration;

use hdhomerun_protocol::{CONTROL_TCP_PORT, DISCOVER_UDP_PORT};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub discovery_port: u16,
    pub control_port: u16,
    pub connect_timeout_ms: u64,
    pub control_timeout_ms: u64,
    pub discover_timeout_ms: u64,
    pub max_results: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            discovery_port: DISCOVER_UDP_PORT,
            control_port: CONTROL_TCP_PORT,
            connect_timeout_ms: 2500,
            control_timeout_ms: 2500,
            discover_timeout_ms: 500,
            max_results: 64,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load from a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&contents)?;
        config.apply_env();
        debug!("Loaded client config from {:?}: {:?}", path, config);
        Ok(config)
    }

    /// Override fields from `HDHOMERUN_*` environment variables.
    pub fn apply_env(&mut self) {
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(key: &str, value: Option<String>, target: &mut T) {
            if let Some(value) = value {
                match value.trim().parse() {
                    Ok(parsed) => *target = parsed,
                    Err(_) => warn!("Ignoring invalid {}={:?}", key, value),
                }
            }
        }

        for (key, target) in [
            ("HDHOMERUN_DISCOVERY_PORT", &mut self.discovery_port),
            ("HDHOMERUN_CONTROL_PORT", &mut self.control_port),
        ] {
            parse(key, lookup(key), target);
        }
        for (key, target) in [
            ("HDHOMERUN_CONNECT_TIMEOUT_MS", &mut self.connect_timeout_ms),
            ("HDHOMERUN_CONTROL_TIMEOUT_MS", &mut self.control_timeout_ms),
            ("HDHOMERUN_DISCOVER_TIMEOUT_MS", &mut self.discover_timeout_ms),
        ] {
            parse(key, lookup(key), target);
        }
        parse(
            "HDHOMERUN_MAX_RESULTS",
            lookup("HDHOMERUN_MAX_RESULTS"),
            &mut self.max_results,
        );
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn discover_timeout(&self) -> Duration {
        Duration::from_millis(self.discover_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.discovery_port, 65001);
        assert_eq!(config.control_port, 65001);
        assert_eq!(config.control_timeout(), Duration::from_millis(2500));
        assert_eq!(config.max_results, 64);
    }

    #[test]
    fn test_partial_toml() {
        let config = ClientConfig::from_toml_str("control_port = 5004\nmax_results = 4\n").unwrap();
        assert_eq!(config.control_port, 5004);
        assert_eq!(config.max_results, 4);
        assert_eq!(config.discovery_port, 65001);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            ClientConfig::from_toml_str("control_port = \"abc\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("HDHOMERUN_CONTROL_TIMEOUT_MS", "100"),
            ("HDHOMERUN_DISCOVERY_PORT", "not-a-port"),
            ("HDHOMERUN_MAX_RESULTS", " 8 "),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_vars(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.control_timeout_ms, 100);
        assert_eq!(config.discovery_port, 65001);
        assert_eq!(config.max_results, 8);
    }

    #[test]
    fn test_load_missing_file() {
        let result = ClientConfig::load(Path::new("/nonexistent/hdhomerun.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
