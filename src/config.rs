//! Client configuration
//!
//! Connection settings for the target cluster: seed brokers, client id,
//! request timeout and the alter-configs method. Loaded from an optional
//! YAML file with `-X key=value` command-line overrides applied on top.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{KdeclError, Result};

/// How topic and broker configs are altered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlterConfigsMethod {
    /// Incremental when the broker supports it, non-incremental otherwise.
    #[default]
    Auto,
    Incremental,
    NonIncremental,
}

impl AlterConfigsMethod {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "auto" => Ok(AlterConfigsMethod::Auto),
            "incremental" => Ok(AlterConfigsMethod::Incremental),
            "non-incremental" => Ok(AlterConfigsMethod::NonIncremental),
            _ => Err(KdeclError::Config(format!(
                "alterConfigsMethod must be one of \"auto|incremental|non-incremental\", got {value:?}"
            ))),
        }
    }
}

/// Kafka client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ClientConfig {
    /// Bootstrap addresses, `host:port`.
    #[serde(default = "default_seed_brokers")]
    pub seed_brokers: Vec<String>,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub alter_configs_method: AlterConfigsMethod,
}

fn default_seed_brokers() -> Vec<String> {
    vec!["localhost:9092".to_string()]
}

fn default_client_id() -> String {
    "kdecl".to_string()
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            seed_brokers: default_seed_brokers(),
            client_id: default_client_id(),
            timeout_ms: default_timeout_ms(),
            alter_configs_method: AlterConfigsMethod::default(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from an optional file, then apply `key=value`
    /// overrides. A missing explicit file is an error; a missing default
    /// path silently yields defaults.
    pub fn load(path: Option<&Path>, overrides: &[String]) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    KdeclError::Config(format!("failed to read {}: {e}", path.display()))
                })?;
                serde_yaml::from_str(&content)
                    .map_err(|e| KdeclError::Config(format!("{}: {e}", path.display())))?
            }
            None => ClientConfig::default(),
        };

        for entry in overrides {
            let (key, value) = entry.split_once('=').ok_or_else(|| {
                KdeclError::Config(format!("option {entry:?} is not of the form key=value"))
            })?;
            config.set(key, value)?;
        }

        if config.seed_brokers.is_empty() {
            return Err(KdeclError::Config("seedBrokers cannot be empty".into()));
        }
        Ok(config)
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "seedBrokers" => {
                self.seed_brokers = value.split(',').map(|s| s.trim().to_string()).collect();
            }
            "clientId" => self.client_id = value.to_string(),
            "timeoutMs" => {
                self.timeout_ms = value
                    .parse()
                    .map_err(|_| KdeclError::Config(format!("timeoutMs {value:?} is not an integer")))?;
            }
            "alterConfigsMethod" => {
                self.alter_configs_method = AlterConfigsMethod::parse(value)?;
            }
            _ => {
                return Err(KdeclError::Config(format!("unknown config option {key:?}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_without_file() {
        let config = ClientConfig::load(None, &[]).unwrap();
        assert_eq!(config.seed_brokers, vec!["localhost:9092"]);
        assert_eq!(config.alter_configs_method, AlterConfigsMethod::Auto);
    }

    #[test]
    fn overrides_take_precedence() {
        let overrides = vec![
            "seedBrokers=b1:9092, b2:9092".to_string(),
            "alterConfigsMethod=non-incremental".to_string(),
            "timeoutMs=5000".to_string(),
        ];
        let config = ClientConfig::load(None, &overrides).unwrap();
        assert_eq!(config.seed_brokers, vec!["b1:9092", "b2:9092"]);
        assert_eq!(
            config.alter_configs_method,
            AlterConfigsMethod::NonIncremental
        );
        assert_eq!(config.timeout_ms, 5000);
    }

    #[test]
    fn rejects_malformed_overrides() {
        assert!(ClientConfig::load(None, &["seedBrokers".to_string()]).is_err());
        assert!(ClientConfig::load(None, &["alterConfigsMethod=sometimes".to_string()]).is_err());
        assert!(ClientConfig::load(None, &["unknown=1".to_string()]).is_err());
    }

    #[test]
    fn parses_config_file_fields() {
        let yaml = "seedBrokers: [broker:9092]\nalterConfigsMethod: incremental\n";
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.alter_configs_method, AlterConfigsMethod::Incremental);
        assert_eq!(config.timeout_ms, 30_000);
    }
}
