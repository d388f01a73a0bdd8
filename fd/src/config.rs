//! fednestd configuration types and loading

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::coordinator::CoordinatorConfig;
use crate::domain::{AggregationPolicy, Tier};
use crate::session::EdgeConfig;

/// Main fednestd configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Message bus and topic provisioning
    pub messaging: MessagingConfig,

    /// Default policy for new rounds
    pub round: RoundConfig,

    /// Coordinator retry, timeout and sweep settings
    pub coordinator: CoordinatorConfig,

    /// On-disk locations
    pub storage: StorageConfig,

    /// Edge client settings (tier2/tier3 nodes)
    pub edge: EdgeConfig,

    /// Log level when not given on the command line
    pub log_level: Option<String>,
}

impl Config {
    /// Validate configuration before use
    ///
    /// Call this early in startup to fail fast with clear error messages.
    pub fn validate(&self) -> Result<()> {
        if self.messaging.num_partitions == 0 {
            return Err(eyre::eyre!("messaging.num_partitions must be at least 1"));
        }
        if self.messaging.replication_factor == 0 {
            return Err(eyre::eyre!("messaging.replication_factor must be at least 1"));
        }
        if self.round.min_contributors == 0 {
            return Err(eyre::eyre!("round.min_contributors must be at least 1"));
        }
        if self.round.timeout_seconds == 0 {
            return Err(eyre::eyre!("round.timeout_seconds must be positive"));
        }
        if self.coordinator.store_timeout_ms == 0 {
            return Err(eyre::eyre!("coordinator.store_timeout_ms must be positive"));
        }
        if self.edge.participant_id.trim().is_empty() {
            return Err(eyre::eyre!("edge.participant_id must not be empty"));
        }
        if !self.edge.tier.is_edge() {
            return Err(eyre::eyre!("edge.tier must be tier2 or tier3, got {}", self.edge.tier));
        }
        if let Some(level) = &self.log_level
            && level.parse::<tracing::Level>().is_err()
        {
            return Err(eyre::eyre!("log_level '{}' is not a valid level", level));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        // If explicit config path provided, try to load it
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try project-local config: .fednestd.yml
        let local_config = PathBuf::from(".fednestd.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/fednestd/fednestd.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("fednestd").join("fednestd.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        // No config file found, use defaults
        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load a YAML or JSON document (chosen by extension, YAML otherwise)
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let is_json = path
            .as_ref()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        let config: Self = if is_json {
            serde_json::from_str(&content).context("Failed to parse JSON config file")?
        } else {
            serde_yaml::from_str(&content).context("Failed to parse config file")?
        };

        config.validate()?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Starter configuration for a node of the given tier
    pub fn template(tier: Tier) -> Self {
        let mut config = Self::default();
        if tier.is_edge() {
            config.edge.tier = tier;
            config.edge.participant_id = format!("{}-edge-001", tier);
        }
        config.log_level = Some("info".to_string());
        config
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }
}

/// Per-topic provisioning overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TopicOverride {
    pub num_partitions: Option<u32>,
    pub replication_factor: Option<u16>,
    pub retention_ms: Option<i64>,
}

/// Message bus configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MessagingConfig {
    /// Broker addresses (comma separated)
    pub bootstrap_servers: String,

    /// Client id presented to the broker
    pub client_id: String,

    pub num_partitions: u32,

    pub replication_factor: u16,

    /// Message retention in milliseconds
    pub retention_ms: i64,

    /// Settings that differ for individual topics
    pub topic_overrides: BTreeMap<String, TopicOverride>,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "fednestd".to_string(),
            num_partitions: 3,
            replication_factor: 1,
            retention_ms: 604_800_000,
            topic_overrides: BTreeMap::new(),
        }
    }
}

/// Default round policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RoundConfig {
    pub min_contributors: u32,
    pub timeout_seconds: u64,
    pub all_or_nothing: bool,
}

impl Default for RoundConfig {
    fn default() -> Self {
        Self {
            min_contributors: 2,
            timeout_seconds: 60,
            all_or_nothing: false,
        }
    }
}

impl RoundConfig {
    pub fn policy(&self) -> AggregationPolicy {
        AggregationPolicy {
            min_contributors: self.min_contributors,
            timeout_secs: self.timeout_seconds,
            all_or_nothing: self.all_or_nothing,
        }
    }
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory for the round state database
    pub state_dir: String,

    /// Directory for the model payload store
    pub model_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        // Use XDG data directory (~/.local/share/fednestd on Linux)
        let base = dirs::data_local_dir()
            .map(|d| d.join("fednestd"))
            .unwrap_or_else(|| PathBuf::from(".fednestd"));

        Self {
            state_dir: base.join("state").to_string_lossy().into_owned(),
            model_dir: base.join("models").to_string_lossy().into_owned(),
        }
    }
}

/// Resolve a leading `~/` against the home directory
fn expand_home(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

impl StorageConfig {
    pub fn state_path(&self) -> PathBuf {
        expand_home(&self.state_dir)
    }

    pub fn model_path(&self) -> PathBuf {
        expand_home(&self.model_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.messaging.bootstrap_servers, "localhost:9092");
        assert_eq!(config.round.min_contributors, 2);
        assert_eq!(config.coordinator.publish_max_retries, 3);
        assert_eq!(config.edge.tier, Tier::Tier2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_config() {
        let yaml = r#"
messaging:
  bootstrap_servers: "kafka-1:9092,kafka-2:9092"
  client_id: "core"
  num_partitions: 6
  replication_factor: 3
  retention_ms: 86400000
  topic_overrides:
    tasks.training:
      num_partitions: 12
round:
  min_contributors: 5
  timeout_seconds: 120
  all_or_nothing: true
coordinator:
  publish_max_retries: 5
storage:
  state_dir: /srv/fed/state
  model_dir: /srv/fed/models
edge:
  participant_id: edge-777
  tier: tier3
  trainer_command: "python train.py"
log_level: debug
"#;

        let config: Config = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.messaging.num_partitions, 6);
        assert_eq!(
            config.messaging.topic_overrides["tasks.training"].num_partitions,
            Some(12)
        );
        assert_eq!(config.round.policy().min_contributors, 5);
        assert!(config.round.all_or_nothing);
        assert_eq!(config.coordinator.publish_max_retries, 5);
        assert_eq!(config.coordinator.publish_backoff_ms, 200);
        assert_eq!(config.storage.state_path(), PathBuf::from("/srv/fed/state"));
        assert_eq!(config.edge.tier, Tier::Tier3);
        assert_eq!(config.edge.trainer_command.as_deref(), Some("python train.py"));
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("round:\n  min_contributors: 3\n").unwrap();

        assert_eq!(config.round.min_contributors, 3);
        assert_eq!(config.round.timeout_seconds, 60);
        assert_eq!(config.messaging.client_id, "fednestd");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert!(serde_yaml::from_str::<Config>("roundz: {}\n").is_err());
        assert!(serde_yaml::from_str::<Config>("round:\n  min: 3\n").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.round.min_contributors = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.edge.tier = Tier::Tier1;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.log_level = Some("loud".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_json_and_yaml_files() {
        let temp = tempfile::tempdir().unwrap();

        let json_path = temp.path().join("fed.json");
        fs::write(&json_path, r#"{"round": {"min_contributors": 4}}"#).unwrap();
        let config = Config::load(Some(&json_path)).unwrap();
        assert_eq!(config.round.min_contributors, 4);

        let yaml_path = temp.path().join("fed.yml");
        fs::write(&yaml_path, "round:\n  timeout_seconds: 30\n").unwrap();
        let config = Config::load(Some(&yaml_path)).unwrap();
        assert_eq!(config.round.timeout_seconds, 30);

        let missing = temp.path().join("missing.yml");
        assert!(Config::load(Some(&missing)).is_err());
    }

    #[test]
    fn test_template_round_trips() {
        let template = Config::template(Tier::Tier3);
        assert_eq!(template.edge.tier, Tier::Tier3);
        assert_eq!(template.edge.participant_id, "tier3-edge-001");

        let yaml = template.to_yaml().unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, template);
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), PathBuf::from("/abs/path"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/fed"), home.join("fed"));
        }
    }
}
