//! mirrorshard configuration file handling
//!
//! Operator settings in TOML. Durations are humantime strings ("2s", "500ms",
//! "5m"). Every section is optional and falls back to the defaults below.

use crate::breach::BreachPolicy;
use crate::node::HealthPolicy;
use crate::service::GuardSettings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default log level
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write config file '{path}': {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid duration for {field}: {message}")]
    Duration { field: &'static str, message: String },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MirrorConfig {
    #[serde(default)]
    pub protection: ProtectionConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub breach: BreachConfig,

    #[serde(default)]
    pub manifest: ManifestConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults applied to `protect` when the caller gives no n/k.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtectionConfig {
    pub n: usize,
    pub k: usize,

    /// Extra holders fetched in the first retrieval wave
    pub padding: usize,

    pub node_timeout: String,
    pub retrieve_deadline: String,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            n: 5,
            k: 3,
            padding: 2,
            node_timeout: "2s".to_string(),
            retrieve_deadline: "10s".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub poll_interval: String,
    pub probe_timeout: String,
    pub alpha: f64,
    pub failure_threshold: u32,
    pub recovery_threshold: u32,
    pub degraded_load: f64,
    pub score_threshold: f64,
    pub latency_budget: String,

    /// How long a holder may stay unreachable before its records rebalance
    pub rebalance_grace: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval: "10s".to_string(),
            probe_timeout: "2s".to_string(),
            alpha: 0.3,
            failure_threshold: 3,
            recovery_threshold: 2,
            degraded_load: 0.9,
            score_threshold: 0.5,
            latency_budget: "500ms".to_string(),
            rebalance_grace: "5m".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreachConfig {
    pub window: String,
    pub max_fetches_per_window: usize,
    pub max_distinct_records: usize,
    pub max_unauthorized_per_window: usize,
}

impl Default for BreachConfig {
    fn default() -> Self {
        Self {
            window: "60s".to_string(),
            max_fetches_per_window: 20,
            max_distinct_records: 3,
            max_unauthorized_per_window: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    pub replicas: usize,
}

impl Default for ManifestConfig {
    fn default() -> Self {
        Self { replicas: 3 }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional, logs to stderr if not specified)
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            file: None,
        }
    }
}

fn duration(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(value).map_err(|e| ConfigError::Duration {
        field,
        message: e.to_string(),
    })
}

/// Default config location: `~/.config/mirrorshard/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mirrorshard")
        .join("config.toml")
}

impl MirrorConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: MirrorConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        fs::write(path, contents).map_err(write_err)
    }

    /// Check that every duration parses and the thresholds make sense.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.protection;
        if p.k < 1 || p.k > p.n || p.n > 255 {
            return Err(ConfigError::Invalid(format!(
                "protection needs 1 <= k <= n <= 255 (n = {}, k = {})",
                p.n, p.k
            )));
        }
        if !(0.0..=1.0).contains(&self.health.alpha) || self.health.alpha == 0.0 {
            return Err(ConfigError::Invalid(format!(
                "health.alpha must be in (0, 1], got {}",
                self.health.alpha
            )));
        }
        if self.manifest.replicas < 3 {
            return Err(ConfigError::Invalid(format!(
                "manifest.replicas must be at least 3, got {}",
                self.manifest.replicas
            )));
        }
        self.guard_settings().map(|_| ())
    }

    pub fn health_policy(&self) -> Result<HealthPolicy, ConfigError> {
        let h = &self.health;
        Ok(HealthPolicy {
            poll_interval: duration("health.poll_interval", &h.poll_interval)?,
            probe_timeout: duration("health.probe_timeout", &h.probe_timeout)?,
            alpha: h.alpha,
            failure_threshold: h.failure_threshold,
            recovery_threshold: h.recovery_threshold,
            degraded_load: h.degraded_load,
            score_threshold: h.score_threshold,
            latency_budget: duration("health.latency_budget", &h.latency_budget)?,
        })
    }

    pub fn breach_policy(&self) -> Result<BreachPolicy, ConfigError> {
        let b = &self.breach;
        Ok(BreachPolicy {
            window: duration("breach.window", &b.window)?,
            max_fetches_per_window: b.max_fetches_per_window,
            max_distinct_records: b.max_distinct_records,
            max_unauthorized_per_window: b.max_unauthorized_per_window,
        })
    }

    /// Settings for constructing a `MirrorGuard`.
    pub fn guard_settings(&self) -> Result<GuardSettings, ConfigError> {
        let p = &self.protection;
        Ok(GuardSettings {
            default_n: p.n,
            default_k: p.k,
            padding: p.padding,
            node_timeout: duration("protection.node_timeout", &p.node_timeout)?,
            retrieve_deadline: duration("protection.retrieve_deadline", &p.retrieve_deadline)?,
            rebalance_grace: duration("health.rebalance_grace", &self.health.rebalance_grace)?,
            health: self.health_policy()?,
            breach: self.breach_policy()?,
        })
    }

    /// Generate default configuration content as a string with comments
    pub fn generate_default_toml() -> String {
        format!(
            r#"# mirrorshard configuration
#
# Durations use humantime syntax: "500ms", "2s", "5m".

[protection]
# Fragments per record (n) and fragments needed to rebuild it (k)
n = 5
k = 3

# Extra holders fetched in the first retrieval wave
padding = 2

# Deadline for one node call, and for a whole retrieval
node_timeout = "2s"
retrieve_deadline = "10s"

[health]
poll_interval = "10s"
probe_timeout = "2s"

# EWMA weight of the newest health sample
alpha = 0.3

# Consecutive failed polls before a node is unreachable, and consecutive
# successful polls before it is readmitted
failure_threshold = 3
recovery_threshold = 2

degraded_load = 0.9
score_threshold = 0.5
latency_budget = "500ms"

# Unreachable holders older than this trigger a rebalance
rebalance_grace = "5m"

[breach]
window = "60s"
max_fetches_per_window = 20
max_distinct_records = 3
max_unauthorized_per_window = 3

[manifest]
# Independent manifest replicas; writes and reads need a majority
replicas = 3

[logging]
# Log level: trace, debug, info, warn, error
level = "{level}"

# Optional log file (logs to stderr if not specified)
# file = "/var/log/mirrorshard.log"
"#,
            level = DEFAULT_LOG_LEVEL
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_toml_parses_to_defaults() {
        let parsed: MirrorConfig = toml::from_str(&MirrorConfig::generate_default_toml()).unwrap();
        assert_eq!(parsed, MirrorConfig::default());
        parsed.validate().unwrap();
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = MirrorConfig::default();
        config.protection.n = 7;
        config.protection.k = 4;
        config.logging.level = "debug".to_string();
        config.save(&path).unwrap();

        let loaded = MirrorConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[protection]\nn = 9\nk = 5\n").unwrap();

        let loaded = MirrorConfig::load(&path).unwrap();
        assert_eq!(loaded.protection.n, 9);
        assert_eq!(loaded.protection.padding, 2);
        assert_eq!(loaded.health, HealthConfig::default());
    }

    #[test]
    fn test_durations_convert() {
        let settings = MirrorConfig::default().guard_settings().unwrap();
        assert_eq!(settings.node_timeout, Duration::from_secs(2));
        assert_eq!(settings.rebalance_grace, Duration::from_secs(300));
        assert_eq!(settings.health.latency_budget, Duration::from_millis(500));
        assert_eq!(settings.breach.window, Duration::from_secs(60));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = MirrorConfig::default();
        config.health.poll_interval = "soon".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Duration {
                field: "health.poll_interval",
                ..
            })
        ));

        let mut config = MirrorConfig::default();
        config.protection.k = 6;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = MirrorConfig::default();
        config.manifest.replicas = 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            MirrorConfig::load(Path::new("/nonexistent/mirrorshard.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
