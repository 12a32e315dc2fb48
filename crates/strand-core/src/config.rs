//! Runtime configuration
//!
//! Configuration is layered: defaults, then an optional TOML file, then `STRAND_*`
//! environment variables (`STRAND_<SECTION>_<FIELD>`, for example
//! `STRAND_GOSSIP_ANTI_ENTROPY_PERIOD_MS=2000`). Durations are milliseconds.

use crate::errors::{Result, StrandError};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment overrides
pub const ENV_PREFIX: &str = "STRAND_";

// =============================================================================
// Sections
// =============================================================================

/// Gossip map tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GossipConfig {
    /// Period of anti-entropy rounds and tombstone purges
    pub anti_entropy_period_ms: u64,

    /// Delay before the first anti-entropy round
    pub initial_delay_ms: u64,

    /// Run the periodic anti-entropy task. Tests drive rounds by hand when disabled.
    pub background_tasks: bool,

    /// Remove entries outright instead of keeping tombstones
    pub tombstones_disabled: bool,

    /// Accumulator flushes once this many updates are queued for one peer
    pub max_events: usize,

    /// Accumulator flushes this long after the first queued update
    pub max_batch_ms: u64,

    /// Accumulator flushes after this much idle time
    pub max_idle_ms: u64,

    /// Timeout of one anti-entropy request
    pub anti_entropy_timeout_ms: u64,

    /// Overall bootstrap timeout
    pub bootstrap_timeout_ms: u64,

    /// Number of one-second slots in the load window
    pub load_window_slots: usize,

    /// Slots considered when deciding whether the map is under high load
    pub high_load_window: usize,

    /// Writes within `high_load_window` slots above which anti-entropy is shed
    pub high_load_threshold: u64,
}

impl Default for GossipConfig {
    fn default() -> Self {
        Self {
            anti_entropy_period_ms: 5_000,
            initial_delay_ms: 5_000,
            background_tasks: true,
            tombstones_disabled: false,
            max_events: 1_000,
            max_batch_ms: 50,
            max_idle_ms: 10,
            anti_entropy_timeout_ms: 5_000,
            bootstrap_timeout_ms: 5_000,
            load_window_slots: 5,
            high_load_window: 2,
            high_load_threshold: 2,
        }
    }
}

impl GossipConfig {
    /// Anti-entropy period
    pub fn anti_entropy_period(&self) -> Duration {
        Duration::from_millis(self.anti_entropy_period_ms)
    }

    /// Delay before the first round
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    /// Accumulator batch deadline
    pub fn max_batch(&self) -> Duration {
        Duration::from_millis(self.max_batch_ms)
    }

    /// Accumulator idle deadline
    pub fn max_idle(&self) -> Duration {
        Duration::from_millis(self.max_idle_ms)
    }

    /// Anti-entropy request timeout
    pub fn anti_entropy_timeout(&self) -> Duration {
        Duration::from_millis(self.anti_entropy_timeout_ms)
    }

    /// Bootstrap timeout
    pub fn bootstrap_timeout(&self) -> Duration {
        Duration::from_millis(self.bootstrap_timeout_ms)
    }

    /// Validate the section
    pub fn validate(&self) -> Result<()> {
        if self.anti_entropy_period_ms == 0 {
            return Err(StrandError::config("gossip.anti_entropy_period_ms must be > 0"));
        }
        if self.max_events == 0 {
            return Err(StrandError::config("gossip.max_events must be > 0"));
        }
        if self.load_window_slots == 0 {
            return Err(StrandError::config("gossip.load_window_slots must be > 0"));
        }
        if self.high_load_window == 0 || self.high_load_window > self.load_window_slots {
            return Err(StrandError::config(format!(
                "gossip.high_load_window must be within 1..={}",
                self.load_window_slots
            )));
        }
        Ok(())
    }
}

/// Partition layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Number of partitions
    pub count: u32,
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self { count: 3 }
    }
}

impl PartitionConfig {
    /// Validate the section
    pub fn validate(&self) -> Result<()> {
        if self.count == 0 {
            return Err(StrandError::config("partitions.count must be > 0"));
        }
        Ok(())
    }
}

/// Transaction coordinator tuning
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Timeout of one begin/prepare/commit/rollback call on a participant
    pub operation_timeout_ms: u64,

    /// Extra attempts of a commit or rollback after the first failure
    pub completion_retries: u32,

    /// Name of the durable transaction registry map
    pub registry_name: String,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            operation_timeout_ms: 5_000,
            completion_retries: 2,
            registry_name: "strand-transactions".to_string(),
        }
    }
}

impl TransactionConfig {
    /// Participant operation timeout
    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    /// Validate the section
    pub fn validate(&self) -> Result<()> {
        if self.operation_timeout_ms == 0 {
            return Err(StrandError::config(
                "transactions.operation_timeout_ms must be > 0",
            ));
        }
        if self.registry_name.trim().is_empty() {
            return Err(StrandError::config("transactions.registry_name is empty"));
        }
        Ok(())
    }
}

// =============================================================================
// Root
// =============================================================================

/// Complete Strand configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrandConfig {
    /// Gossip map tuning
    pub gossip: GossipConfig,
    /// Partition layout
    pub partitions: PartitionConfig,
    /// Transaction coordinator tuning
    pub transactions: TransactionConfig,
}

impl StrandConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StrandError::config(format!("Failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Defaults, then `path` if given, then the process environment, then validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => Self::default(),
        };
        config.merge_with_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `STRAND_*` variables from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `STRAND_*` variables from an explicit list
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            if let Some(config_key) = key.strip_prefix(ENV_PREFIX) {
                let config_key = config_key.to_lowercase();
                match config_key.split_once('_') {
                    Some((section, field)) => self.set_from_string(section, field, &value)?,
                    None => {
                        tracing::debug!(variable = %key, "Ignoring environment variable without section");
                    }
                }
            }
        }
        Ok(())
    }

    /// Set one field from its string form
    pub fn set_from_string(&mut self, section: &str, field: &str, value: &str) -> Result<()> {
        match (section, field) {
            ("gossip", "anti_entropy_period_ms") => {
                self.gossip.anti_entropy_period_ms = parse(section, field, value)?;
            }
            ("gossip", "initial_delay_ms") => {
                self.gossip.initial_delay_ms = parse(section, field, value)?;
            }
            ("gossip", "background_tasks") => {
                self.gossip.background_tasks = parse(section, field, value)?;
            }
            ("gossip", "tombstones_disabled") => {
                self.gossip.tombstones_disabled = parse(section, field, value)?;
            }
            ("gossip", "max_events") => self.gossip.max_events = parse(section, field, value)?,
            ("gossip", "max_batch_ms") => self.gossip.max_batch_ms = parse(section, field, value)?,
            ("gossip", "max_idle_ms") => self.gossip.max_idle_ms = parse(section, field, value)?,
            ("gossip", "anti_entropy_timeout_ms") => {
                self.gossip.anti_entropy_timeout_ms = parse(section, field, value)?;
            }
            ("gossip", "bootstrap_timeout_ms") => {
                self.gossip.bootstrap_timeout_ms = parse(section, field, value)?;
            }
            ("gossip", "load_window_slots") => {
                self.gossip.load_window_slots = parse(section, field, value)?;
            }
            ("gossip", "high_load_window") => {
                self.gossip.high_load_window = parse(section, field, value)?;
            }
            ("gossip", "high_load_threshold") => {
                self.gossip.high_load_threshold = parse(section, field, value)?;
            }
            ("partitions", "count") => self.partitions.count = parse(section, field, value)?,
            ("transactions", "operation_timeout_ms") => {
                self.transactions.operation_timeout_ms = parse(section, field, value)?;
            }
            ("transactions", "completion_retries") => {
                self.transactions.completion_retries = parse(section, field, value)?;
            }
            ("transactions", "registry_name") => {
                self.transactions.registry_name = value.to_string();
            }
            _ => {
                return Err(StrandError::config(format!(
                    "Unknown configuration key {section}.{field}"
                )))
            }
        }
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.gossip.validate()?;
        self.partitions.validate()?;
        self.transactions.validate()
    }
}

fn parse<T: std::str::FromStr>(section: &str, field: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        StrandError::config(format!("Invalid value '{value}' for {section}.{field}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = StrandConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.gossip.max_events, 1_000);
        assert_eq!(config.transactions.registry_name, "strand-transactions");
    }

    #[test]
    fn test_load_shedding_defaults() {
        let gossip = GossipConfig::default();
        assert_eq!(gossip.load_window_slots, 5);
        assert_eq!(gossip.high_load_window, 2);
        assert_eq!(gossip.high_load_threshold, 2);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gossip]\nanti_entropy_period_ms = 250\n\n[partitions]\ncount = 7").unwrap();

        let config = StrandConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.gossip.anti_entropy_period_ms, 250);
        assert_eq!(config.gossip.max_idle_ms, 10);
        assert_eq!(config.partitions.count, 7);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = StrandConfig::default();
        config
            .merge_with_vars(vec![
                ("STRAND_GOSSIP_TOMBSTONES_DISABLED".to_string(), "true".to_string()),
                ("STRAND_TRANSACTIONS_REGISTRY_NAME".to_string(), "txs".to_string()),
                ("UNRELATED".to_string(), "1".to_string()),
            ])
            .unwrap();
        assert!(config.gossip.tombstones_disabled);
        assert_eq!(config.transactions.registry_name, "txs");
    }

    #[test]
    fn test_bad_env_value_is_rejected() {
        let mut config = StrandConfig::default();
        let err = config
            .merge_with_vars(vec![(
                "STRAND_PARTITIONS_COUNT".to_string(),
                "many".to_string(),
            )])
            .unwrap_err();
        assert!(matches!(err, StrandError::Config { .. }));
    }

    #[test]
    fn test_validation_rejects_bad_window() {
        let mut config = StrandConfig::default();
        config.gossip.high_load_window = 9;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = StrandConfig::default();
        let rendered = config.to_toml().unwrap();
        assert_eq!(StrandConfig::from_toml(&rendered).unwrap(), config);
    }
}
