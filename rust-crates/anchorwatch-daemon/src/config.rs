//! Configuration management

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anchorwatch_acquisition::{AnchorDescriptor, SerialSettings};
use anchorwatch_broadcaster::BroadcastSettings;
use anchorwatch_fusion::{Baseline, BaselinePair, PositionTag};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Which two anchors span the baseline, and how far apart they are
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineConfig {
    /// Anchor id of the first receiver (angle θ₀)
    pub left: String,
    /// Anchor id of the second receiver (angle θ₁)
    pub right: String,
    /// Distance between the receivers in meters
    pub distance_m: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            left: "CCF95781E4A1".to_string(),
            right: "CCF95781E4B2".to_string(),
            distance_m: 0.5,
        }
    }
}

/// Main loop and supervisor tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Pause after a cycle that published nothing
    pub idle_interval_ms: u64,
    /// Consecutive failed reads before an anchor is declared failed
    pub max_consecutive_read_errors: u32,
    /// Restarts after unrecoverable faults before the daemon gives up
    pub max_restarts: u32,
    pub restart_delay_ms: u64,
    /// Log an info line every N publishes
    pub progress_every: u64,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            idle_interval_ms: 10,
            max_consecutive_read_errors: 50,
            max_restarts: 3,
            restart_delay_ms: 2000,
            progress_every: 100,
        }
    }
}

impl PipelineSettings {
    pub fn idle_interval(&self) -> Duration {
        Duration::from_millis(self.idle_interval_ms)
    }

    pub fn restart_delay(&self) -> Duration {
        Duration::from_millis(self.restart_delay_ms)
    }
}

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Path to configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// TCP address clients connect to
    pub listen_addr: String,

    /// Anchors in snapshot order
    pub anchors: Vec<AnchorDescriptor>,

    pub baseline: BaselineConfig,

    pub serial: SerialSettings,

    pub broadcast: BroadcastSettings,

    pub pipeline: PipelineSettings,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_path: Self::default_config_path(),
            listen_addr: "127.0.0.1:12345".to_string(),
            anchors: vec![
                AnchorDescriptor {
                    id: "CCF95781E4A1".to_string(),
                    serial_port: "/dev/ttyACM0".to_string(),
                    theta: 0.0,
                    pos: PositionTag::Label("left".to_string()),
                },
                AnchorDescriptor {
                    id: "CCF95781E4B2".to_string(),
                    serial_port: "/dev/ttyACM1".to_string(),
                    theta: 0.0,
                    pos: PositionTag::Label("right".to_string()),
                },
            ],
            baseline: BaselineConfig::default(),
            serial: SerialSettings::default(),
            broadcast: BroadcastSettings::default(),
            pipeline: PipelineSettings::default(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from `path`, or from the default location
    ///
    /// A missing file at the default location is created with defaults; a
    /// missing explicit path is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path),
            None => {
                let config_path = Self::default_config_path();
                if config_path.exists() {
                    Self::load_from(&config_path)
                } else {
                    let config = Self::default();
                    config.save().context("Failed to save default config")?;
                    Ok(config)
                }
            }
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let mut config: DaemonConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        std::fs::write(&self.config_path, self.to_toml()?).context("Failed to write config file")?;

        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize config")
    }

    /// Replace the anchor list with a legacy JSON sensor list
    ///
    /// The file is an array of `{"id", "serial_port", "theta", "pos"}` objects;
    /// unknown keys are ignored.
    pub fn apply_legacy_anchors(&mut self, path: &Path) -> Result<()> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read anchor list {}", path.display()))?;

        self.anchors = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse anchor list {}", path.display()))?;

        Ok(())
    }

    /// Check everything the pipeline relies on before any device is opened
    pub fn validate(&self) -> Result<()> {
        if self.anchors.is_empty() {
            bail!("No anchors configured");
        }

        let mut seen = HashSet::new();
        for anchor in &self.anchors {
            if anchor.id.trim().is_empty() {
                bail!("Anchor on {} has an empty id", anchor.serial_port);
            }
            if !seen.insert(anchor.id.as_str()) {
                bail!("Anchor id {} is configured twice", anchor.id);
            }
        }

        if self.serial.read_chunk_bytes == 0 {
            bail!("serial.read_chunk_bytes must be at least 1");
        }

        self.broadcast.validate()?;
        self.baseline()?;

        Ok(())
    }

    /// Resolve the baseline anchor ids to snapshot indices
    pub fn baseline(&self) -> Result<Baseline> {
        let index_of = |id: &str| {
            self.anchors
                .iter()
                .position(|a| a.id == id)
                .with_context(|| format!("Baseline anchor {} is not configured", id))
        };

        let pair = BaselinePair::new(index_of(&self.baseline.left)?, index_of(&self.baseline.right)?)?;
        Ok(Baseline::new(pair, self.baseline.distance_m)?)
    }

    /// Get default config path
    fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("anchorwatch")
            .join("config.toml")
    }
}
