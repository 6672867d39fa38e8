//! Configuration loading and database path resolution
//!
//! Bootstrap configuration comes from a TOML file. Resolution priority for the
//! config file and the database path:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file (database path only)
//! 4. OS-dependent compiled default (fallback)
//!
//! A missing config file is not an error: defaults are used and a warning is
//! logged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::assignment::SelfServePolicy;
use crate::tags::{PluginFailurePolicy, TagGroup, TagSchema};
use crate::{Error, Result};

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "GTC_CONFIG";
/// Environment variable naming the SQLite database file
pub const DATABASE_ENV: &str = "GTC_DATABASE";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TomlConfig {
    /// SQLite database file (relative or absolute)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub allocation: AllocationConfig,

    #[serde(default)]
    pub buckets: BucketConfig,

    #[serde(default)]
    pub self_serve: SelfServeConfig,

    #[serde(default)]
    pub tags: TagConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Dataset sampling weights for self-serve
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AllocationConfig {
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Buckets per dataset
    #[serde(default = "default_bucket_count")]
    pub count: usize,
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self {
            count: default_bucket_count(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfServeConfig {
    #[serde(default)]
    pub allow_own_skipped: bool,

    /// Items requested when the caller gives no limit
    #[serde(default = "default_self_serve_limit")]
    pub default_limit: usize,
}

impl Default for SelfServeConfig {
    fn default() -> Self {
        Self {
            allow_own_skipped: false,
            default_limit: default_self_serve_limit(),
        }
    }
}

impl SelfServeConfig {
    pub fn policy(&self) -> SelfServePolicy {
        SelfServePolicy {
            allow_own_skipped: self.allow_own_skipped,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TagConfig {
    #[serde(default)]
    pub plugin_failure: PluginFailurePolicy,

    /// Replaces the built-in catalog when non-empty
    #[serde(default)]
    pub groups: Vec<TagGroup>,
}

impl TagConfig {
    pub fn schema(&self) -> TagSchema {
        if self.groups.is_empty() {
            TagSchema::builtin()
        } else {
            TagSchema::new(self.groups.clone())
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_bucket_count() -> usize {
    5
}

fn default_self_serve_limit() -> usize {
    10
}

impl TomlConfig {
    /// Parse TOML text and check value ranges
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; a missing file yields defaults
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file not found: {} (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
        let config = Self::from_toml_str(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.buckets.count == 0 {
            return Err(Error::Config("buckets.count must be at least 1".to_string()));
        }
        for (dataset, weight) in &self.allocation.weights {
            if !weight.is_finite() || *weight < 0.0 {
                return Err(Error::Config(format!(
                    "allocation weight for '{}' must be a non-negative number, got {}",
                    dataset, weight
                )));
            }
        }
        Ok(())
    }

    /// Serialize back to TOML text
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))
    }
}

/// Resolve the config file path
///
/// Priority:
/// 1. Command-line argument
/// 2. `GTC_CONFIG` environment variable (ignored when blank)
/// 3. Platform config dir
pub fn resolve_config_path(cli_arg: Option<&Path>) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    default_config_path()
}

/// Resolve the SQLite database path
///
/// Priority:
/// 1. Command-line argument
/// 2. `GTC_DATABASE` environment variable (ignored when blank)
/// 3. `database_path` from the TOML config
/// 4. Platform data dir
pub fn resolve_database_path(cli_arg: Option<&Path>, config: &TomlConfig) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var(DATABASE_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    if let Some(path) = &config.database_path {
        return path.clone();
    }
    default_database_path()
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("gtc").join("config.toml"))
        .unwrap_or_else(|| PathBuf::from("./gtc.toml"))
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("gtc").join("gtc.db"))
        .unwrap_or_else(|| PathBuf::from("./gtc_data/gtc.db"))
}
