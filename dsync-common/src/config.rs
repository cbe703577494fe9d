//! Configuration loading and config file resolution
//!
//! The configuration file is TOML. Resolution priority:
//! 1. Command-line argument (highest priority)
//! 2. `DSYNC_CONFIG` environment variable
//! 3. `<config_dir>/dicom-sync/config.toml`

use crate::node::DicomNode;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the configuration file
pub const CONFIG_ENV_VAR: &str = "DSYNC_CONFIG";

const APP_DIR: &str = "dicom-sync";

/// Longest accepted rolling window (one year)
pub const MAX_LOOKBACK_HOURS: u32 = 8760;

/// Top-level configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    /// AE title used for outgoing associations
    #[serde(default = "default_calling_ae_title")]
    pub calling_ae_title: String,

    /// Stability state file (default: `<data_dir>/dicom-sync/stability.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_file: Option<PathBuf>,

    /// The local (destination) archive
    pub local: DicomNode,

    /// Remote (source) archives keyed by short name
    #[serde(default)]
    pub remotes: BTreeMap<String, DicomNode>,

    /// Legacy single-remote layout, folded into `remotes` on load
    #[serde(default, skip_serializing)]
    pub remote: Option<DicomNode>,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub dcmtk: DcmtkSettings,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Reconciliation tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Rolling window for continuous mode
    pub lookback_hours: u32,
    /// Wait after a cycle that moved little or nothing
    pub idle_delay_secs: u64,
    /// Pause after a busy cycle
    pub busy_pause_secs: u64,
    /// Images moved in one cycle that count as "busy"
    pub busy_threshold_images: u64,
    /// Run stability cleanup every N cycles
    pub cleanup_every_cycles: u64,
    /// Stability records unseen for longer than this are purged
    pub retention_hours: u32,
    /// Threshold used by `--bounded` when no explicit `--max-images` is given
    pub default_max_images: u32,
    /// Locally-present fraction above which image-level transfer is used
    pub image_level_threshold: f64,
    pub completion_timeout_secs: u64,
    pub completion_poll_secs: u64,
    /// Consecutive unchanged polls after which the count is considered settled
    pub completion_stagnant_polls: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            lookback_hours: 3,
            idle_delay_secs: 60,
            busy_pause_secs: 1,
            busy_threshold_images: 30,
            cleanup_every_cycles: 10,
            retention_hours: 48,
            default_max_images: 10,
            image_level_threshold: 0.7,
            completion_timeout_secs: 60,
            completion_poll_secs: 5,
            completion_stagnant_polls: 3,
        }
    }
}

impl SyncSettings {
    pub fn idle_delay(&self) -> Duration {
        Duration::from_secs(self.idle_delay_secs)
    }

    pub fn busy_pause(&self) -> Duration {
        Duration::from_secs(self.busy_pause_secs)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_secs(self.completion_timeout_secs)
    }

    pub fn completion_poll_interval(&self) -> Duration {
        Duration::from_secs(self.completion_poll_secs)
    }
}

/// Locations of the dcmtk tools used by the network adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DcmtkSettings {
    pub findscu: PathBuf,
    pub movescu: PathBuf,
    /// Upper bound for a single tool invocation
    pub timeout_secs: u64,
}

impl Default for DcmtkSettings {
    fn default() -> Self {
        Self {
            findscu: PathBuf::from("findscu"),
            movescu: PathBuf::from("movescu"),
            timeout_secs: 300,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
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

fn default_calling_ae_title() -> String {
    "QUERY_CLIENT".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TomlConfig {
    /// Parse, migrate and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: TomlConfig = toml::from_str(content)?;
        config.migrate_legacy_remote();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Cannot read config file {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&content)?;
        info!(
            path = %path.display(),
            remotes = config.remotes.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Fold a legacy `[remote]` table into `remotes`.
    ///
    /// The short name is the node name lower-cased with spaces replaced by
    /// underscores, or `default` when the name is empty.
    pub fn migrate_legacy_remote(&mut self) {
        if let Some(node) = self.remote.take() {
            let short_name = if node.name.trim().is_empty() {
                "default".to_string()
            } else {
                node.name.trim().to_lowercase().replace(' ', "_")
            };
            warn!(
                short_name = %short_name,
                "Migrated legacy [remote] table; node now addressable by short name"
            );
            self.remotes.entry(short_name).or_insert(node);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.remotes.is_empty() {
            return Err(Error::Config("No remote nodes configured".to_string()));
        }
        validate_node("local", &self.local)?;
        for (short_name, node) in &self.remotes {
            validate_node(short_name, node)?;
            if let Some(dest) = &node.local_config {
                if dest.ae_title.trim().is_empty() || dest.port == 0 {
                    return Err(Error::Config(format!(
                        "Remote '{}' has an invalid local_config",
                        short_name
                    )));
                }
            }
        }
        if !(1..=MAX_LOOKBACK_HOURS).contains(&self.sync.lookback_hours) {
            return Err(Error::Config(format!(
                "sync.lookback_hours must be in 1..={}, got {}",
                MAX_LOOKBACK_HOURS, self.sync.lookback_hours
            )));
        }
        let threshold = self.sync.image_level_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(Error::Config(format!(
                "sync.image_level_threshold must be in (0, 1], got {}",
                threshold
            )));
        }
        if self.sync.completion_poll_secs == 0 {
            return Err(Error::Config(
                "sync.completion_poll_secs must be positive".to_string(),
            ));
        }
        if self.sync.cleanup_every_cycles == 0 {
            return Err(Error::Config(
                "sync.cleanup_every_cycles must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Look up a remote by short name
    pub fn remote(&self, short_name: &str) -> Result<&DicomNode> {
        self.remotes.get(short_name).ok_or_else(|| {
            Error::NotFound(format!(
                "Remote node '{}' not found in configuration (available: {})",
                short_name,
                self.remote_names().join(", ")
            ))
        })
    }

    pub fn remote_names(&self) -> Vec<String> {
        self.remotes.keys().cloned().collect()
    }

    /// Stability state file, falling back to the platform data directory
    pub fn state_file_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(default_state_file)
    }
}

fn validate_node(label: &str, node: &DicomNode) -> Result<()> {
    if node.ae_title.trim().is_empty() {
        return Err(Error::Config(format!("Node '{}' has an empty AE title", label)));
    }
    if node.ae_title.len() > 16 {
        return Err(Error::Config(format!(
            "Node '{}' AE title exceeds 16 characters",
            label
        )));
    }
    if node.port == 0 {
        return Err(Error::Config(format!("Node '{}' has port 0", label)));
    }
    Ok(())
}

/// Resolve which configuration file to load
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Result<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Ok(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }

    // Priority 3: platform config directory
    dirs::config_dir()
        .map(|d| d.join(APP_DIR).join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))
}

fn default_state_file() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join(APP_DIR))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("stability.json")
}
