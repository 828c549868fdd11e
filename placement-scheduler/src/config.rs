//! Scheduler configuration
//!
//! Loaded from a TOML file, then overridden by `PLACEMENT_*` environment
//! variables. Every section falls back to its defaults when omitted.

use placement_metadata::{HotThresholds, StoreInfo};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Complete scheduler configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementConfig {
    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub replication: ReplicationConfig,

    #[serde(default)]
    pub metrics: MetricsSettings,
}

impl PlacementConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: PlacementConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration with fallback to defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Override values from `PLACEMENT_*` environment variables
    pub fn apply_env(self) -> Self {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    /// Override values from an arbitrary variable lookup
    pub fn apply_env_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(
            lookup: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            lookup(key).and_then(|v| v.trim().parse().ok())
        }

        if let Some(v) = parsed(&lookup, "PLACEMENT_MAX_REPLICAS") {
            self.replication.max_replicas = v;
        }
        if let Some(labels) = lookup("PLACEMENT_LOCATION_LABELS") {
            self.replication.location_labels = labels
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
        if let Some(v) = parsed(&lookup, "PLACEMENT_LEADER_SCHEDULE_LIMIT") {
            self.schedule.leader_schedule_limit = v;
        }
        if let Some(v) = parsed(&lookup, "PLACEMENT_REGION_SCHEDULE_LIMIT") {
            self.schedule.region_schedule_limit = v;
        }
        if let Some(v) = parsed(&lookup, "PLACEMENT_REPLICA_SCHEDULE_LIMIT") {
            self.schedule.replica_schedule_limit = v;
        }
        if let Some(v) = parsed(&lookup, "PLACEMENT_MERGE_SCHEDULE_LIMIT") {
            self.schedule.merge_schedule_limit = v;
        }
        if let Some(v) = parsed(&lookup, "PLACEMENT_MAX_STORE_DOWN_TIME_SECS") {
            self.schedule.max_store_down_time_secs = v;
        }
        if let Some(v) = lookup("PLACEMENT_ENABLE_ONE_WAY_MERGE") {
            self.schedule.enable_one_way_merge = v == "true" || v == "1";
        }
        if let Some(v) = parsed(&lookup, "PLACEMENT_METRICS_PORT") {
            self.metrics.port = v;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule.validate()?;
        self.replication.validate()
    }
}

/// Scheduling knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Starting interval of leader schedulers
    pub leader_schedule_interval_ms: u64,
    /// Starting interval of region schedulers
    pub region_schedule_interval_ms: u64,
    /// Ceiling the back-off may grow an interval to
    pub max_schedule_interval_ms: u64,
    /// Attempts per tick before a scheduler backs off
    pub max_schedule_retries: usize,

    /// In-flight operators per kind
    pub leader_schedule_limit: u64,
    pub region_schedule_limit: u64,
    pub replica_schedule_limit: u64,
    pub merge_schedule_limit: u64,

    /// Smallest relative gap between source and target worth balancing
    pub min_balance_diff_ratio: f64,
    /// Source stores with fewer leaders are not balanced
    pub min_leader_count: usize,
    /// Source stores with fewer regions are not balanced
    pub min_region_count: usize,

    pub max_snapshot_count: u64,
    pub max_pending_peer_count: usize,
    pub max_store_down_time_secs: u64,
    /// Stores whose used ratio exceeds this receive no new replicas
    pub low_space_ratio: f64,
    /// How long a source store without a legal target is skipped
    pub store_balance_skip_secs: u64,

    /// Grace period after start-up and after a split before merging
    pub split_merge_interval_secs: u64,
    pub max_merge_region_size_mb: u64,
    pub max_merge_region_keys: u64,
    /// Only merge with the next region
    pub enable_one_way_merge: bool,

    /// Bytes/s before a region's writes count as hot
    pub hot_region_min_write_rate: u64,
    /// Bytes/s before a region's reads count as hot
    pub hot_region_min_read_rate: u64,
    pub hot_region_cache_hits_threshold: u32,

    /// Capacity of the region change notification queue
    pub region_change_queue_size: usize,

    pub enable_make_up_replica: bool,
    pub enable_remove_down_replica: bool,
    pub enable_replace_offline_replica: bool,
    pub enable_remove_extra_replica: bool,
    pub enable_location_replacement: bool,
    pub enable_namespace_relocation: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            leader_schedule_interval_ms: 100,
            region_schedule_interval_ms: 100,
            max_schedule_interval_ms: 5_000,
            max_schedule_retries: 10,
            leader_schedule_limit: 4,
            region_schedule_limit: 4,
            replica_schedule_limit: 8,
            merge_schedule_limit: 8,
            min_balance_diff_ratio: 0.01,
            min_leader_count: 10,
            min_region_count: 10,
            max_snapshot_count: 3,
            max_pending_peer_count: 16,
            max_store_down_time_secs: 30 * 60,
            low_space_ratio: 0.8,
            store_balance_skip_secs: 30,
            split_merge_interval_secs: 60 * 60,
            max_merge_region_size_mb: 20,
            max_merge_region_keys: 200_000,
            enable_one_way_merge: false,
            hot_region_min_write_rate: 16 * 1024,
            hot_region_min_read_rate: 128 * 1024,
            hot_region_cache_hits_threshold: 3,
            region_change_queue_size: 1024,
            enable_make_up_replica: true,
            enable_remove_down_replica: true,
            enable_replace_offline_replica: true,
            enable_remove_extra_replica: true,
            enable_location_replacement: true,
            enable_namespace_relocation: true,
        }
    }
}

impl ScheduleConfig {
    pub fn leader_schedule_interval(&self) -> Duration {
        Duration::from_millis(self.leader_schedule_interval_ms)
    }

    pub fn region_schedule_interval(&self) -> Duration {
        Duration::from_millis(self.region_schedule_interval_ms)
    }

    pub fn max_schedule_interval(&self) -> Duration {
        Duration::from_millis(self.max_schedule_interval_ms)
    }

    pub fn max_store_down_time(&self) -> Duration {
        Duration::from_secs(self.max_store_down_time_secs)
    }

    pub fn store_balance_skip(&self) -> Duration {
        Duration::from_secs(self.store_balance_skip_secs)
    }

    pub fn split_merge_interval(&self) -> Duration {
        Duration::from_secs(self.split_merge_interval_secs)
    }

    pub fn hot_thresholds(&self) -> HotThresholds {
        HotThresholds {
            min_write_rate: self.hot_region_min_write_rate,
            min_read_rate: self.hot_region_min_read_rate,
            hits_threshold: self.hot_region_cache_hits_threshold,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.leader_schedule_interval_ms == 0 || self.region_schedule_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "schedule intervals must be positive".to_string(),
            ));
        }
        if self.max_schedule_interval_ms < self.leader_schedule_interval_ms
            || self.max_schedule_interval_ms < self.region_schedule_interval_ms
        {
            return Err(ConfigError::ValidationError(
                "max_schedule_interval_ms is below a starting interval".to_string(),
            ));
        }
        let limits = [
            ("leader_schedule_limit", self.leader_schedule_limit),
            ("region_schedule_limit", self.region_schedule_limit),
            ("replica_schedule_limit", self.replica_schedule_limit),
            ("merge_schedule_limit", self.merge_schedule_limit),
        ];
        if let Some((name, _)) = limits.iter().find(|(_, v)| *v == 0) {
            return Err(ConfigError::ValidationError(format!("{name} must be positive")));
        }
        if !(0.0..=1.0).contains(&self.min_balance_diff_ratio) {
            return Err(ConfigError::ValidationError(
                "min_balance_diff_ratio must be within [0, 1]".to_string(),
            ));
        }
        if !(self.low_space_ratio > 0.0 && self.low_space_ratio <= 1.0) {
            return Err(ConfigError::ValidationError(
                "low_space_ratio must be within (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Hard placement rule: stores matching `labels` hold exactly `replicas`
/// replicas of every region
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConstraint {
    pub labels: BTreeMap<String, String>,
    pub replicas: usize,
}

impl LabelConstraint {
    pub fn matches(&self, store: &StoreInfo) -> bool {
        self.labels
            .iter()
            .all(|(key, value)| store.label(key).is_some_and(|v| v.eq_ignore_ascii_case(value)))
    }

    /// No store can match both constraints
    pub fn is_exclusive_with(&self, other: &LabelConstraint) -> bool {
        self.labels
            .iter()
            .any(|(key, value)| {
                other
                    .labels
                    .iter()
                    .any(|(k, v)| k.eq_ignore_ascii_case(key) && !v.eq_ignore_ascii_case(value))
            })
    }
}

/// Replication policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicationConfig {
    pub max_replicas: usize,
    /// Label keys from coarsest to finest, e.g. zone, rack, host
    pub location_labels: Vec<String>,
    pub constraints: Vec<LabelConstraint>,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            max_replicas: 3,
            location_labels: Vec::new(),
            constraints: Vec::new(),
        }
    }
}

impl ReplicationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_replicas == 0 {
            return Err(ConfigError::ValidationError(
                "max_replicas must be positive".to_string(),
            ));
        }
        if self.constraints.is_empty() {
            return Ok(());
        }
        if self.max_replicas % 2 == 0 {
            return Err(ConfigError::ValidationError(
                "max_replicas must be odd when constraints are set".to_string(),
            ));
        }
        let total: usize = self.constraints.iter().map(|c| c.replicas).sum();
        if total > self.max_replicas {
            return Err(ConfigError::ValidationError(format!(
                "constraints require {total} replicas, more than max_replicas {}",
                self.max_replicas
            )));
        }
        for (i, a) in self.constraints.iter().enumerate() {
            for b in &self.constraints[i + 1..] {
                if !a.is_exclusive_with(b) {
                    return Err(ConfigError::ValidationError(format!(
                        "constraints {:?} and {:?} are not mutually exclusive",
                        a.labels, b.labels
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Metrics exporter settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    pub enabled: bool,
    pub port: u16,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = PlacementConfig::default();
        assert_eq!(config.replication.max_replicas, 3);
        assert_eq!(config.schedule.min_leader_count, 10);
        assert_eq!(config.schedule.max_schedule_retries, 10);
        assert!(config.schedule.enable_make_up_replica);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [schedule]
            leader_schedule_limit = 2
            enable_one_way_merge = true

            [replication]
            max_replicas = 5
            location_labels = ["zone", "rack", "host"]

            [[replication.constraints]]
            labels = { zone = "z1" }
            replicas = 2

            [metrics]
            port = 9191
        "#;

        let config: PlacementConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.schedule.leader_schedule_limit, 2);
        assert_eq!(config.schedule.region_schedule_limit, 4);
        assert!(config.schedule.enable_one_way_merge);
        assert_eq!(config.replication.location_labels, vec!["zone", "rack", "host"]);
        assert_eq!(config.replication.constraints[0].replicas, 2);
        assert_eq!(config.metrics.port, 9191);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("placement.toml");
        std::fs::write(&path, "[replication]\nmax_replicas = 1\n").unwrap();
        let config = PlacementConfig::from_file(&path).unwrap();
        assert_eq!(config.replication.max_replicas, 1);

        std::fs::write(&path, "[schedule]\nleader_schedule_limit = 0\n").unwrap();
        assert!(matches!(
            PlacementConfig::from_file(&path),
            Err(ConfigError::ValidationError(_))
        ));

        let missing = PlacementConfig::load_or_default(dir.path().join("missing.toml"));
        assert_eq!(missing, PlacementConfig::default());
    }

    #[test]
    fn test_constraint_validation() {
        let zone = |z: &str, n: usize| LabelConstraint {
            labels: BTreeMap::from([("zone".to_string(), z.to_string())]),
            replicas: n,
        };

        let mut replication = ReplicationConfig {
            max_replicas: 3,
            location_labels: vec![],
            constraints: vec![zone("z1", 2), zone("z2", 1)],
        };
        assert!(replication.validate().is_ok());

        replication.constraints = vec![zone("z1", 2), zone("z1", 1)];
        assert!(replication.validate().is_err());

        replication.constraints = vec![zone("z1", 2), zone("z2", 2)];
        assert!(replication.validate().is_err());

        replication.max_replicas = 4;
        replication.constraints = vec![zone("z1", 1)];
        assert!(replication.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PLACEMENT_MAX_REPLICAS", "5"),
            ("PLACEMENT_LOCATION_LABELS", "zone, host"),
            ("PLACEMENT_ENABLE_ONE_WAY_MERGE", "true"),
            ("PLACEMENT_LEADER_SCHEDULE_LIMIT", "not-a-number"),
        ]);
        let config = PlacementConfig::default()
            .apply_env_from(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.replication.max_replicas, 5);
        assert_eq!(config.replication.location_labels, vec!["zone", "host"]);
        assert!(config.schedule.enable_one_way_merge);
        assert_eq!(config.schedule.leader_schedule_limit, 4);
    }
}
