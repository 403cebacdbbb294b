//! Configuration file support for the annotation engine.
//!
//! Thresholds, history depth, skeleton flag aggregation and auto-save timing
//! can be tuned per deployment and stored as JSON.

use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_AUTOSAVE_DEBOUNCE_SECS, DEFAULT_AUTOSAVE_INTERVAL_SECS, DEFAULT_MAX_HISTORY,
    DEFAULT_MIN_SHAPE_AREA, DEFAULT_MIN_SHAPE_LENGTH, DEFAULT_SELECT_TOLERANCE,
};

/// Current configuration file format version.
/// Increment this when making breaking changes to the config format.
pub const CONFIG_VERSION: u32 = 1;

/// Engine configuration that can be exported and imported.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Version of the configuration file format
    pub version: u32,

    /// Geometry thresholds
    #[serde(default)]
    pub geometry: GeometryConfig,

    /// Undo/redo settings
    #[serde(default)]
    pub history: HistoryConfig,

    /// How skeleton parents derive their flags from elements
    #[serde(default)]
    pub skeleton: SkeletonFlagPolicy,

    /// Auto-save timing
    #[serde(default)]
    pub autosave: AutoSaveConfig,
}

/// Thresholds used for validation and hit testing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeometryConfig {
    /// Closed shapes with a smaller area are rejected
    #[serde(default = "default_min_shape_area")]
    pub min_shape_area: f64,

    /// Polylines with a smaller extent are rejected
    #[serde(default = "default_min_shape_length")]
    pub min_shape_length: f64,

    /// Maximum distance for `select` to consider a shape hit
    #[serde(default = "default_select_tolerance")]
    pub select_tolerance: f64,
}

fn default_min_shape_area() -> f64 {
    DEFAULT_MIN_SHAPE_AREA
}

fn default_min_shape_length() -> f64 {
    DEFAULT_MIN_SHAPE_LENGTH
}

fn default_select_tolerance() -> f64 {
    DEFAULT_SELECT_TOLERANCE
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            min_shape_area: default_min_shape_area(),
            min_shape_length: default_min_shape_length(),
            select_tolerance: default_select_tolerance(),
        }
    }
}

/// Configuration for the undo stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Maximum number of actions to keep in history
    #[serde(default = "default_max_history")]
    pub max_history: usize,
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_history: default_max_history(),
        }
    }
}

/// Aggregation function over the elements of a skeleton.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// True iff every element is true
    All,
    /// True iff at least one element is true
    Any,
}

impl Aggregation {
    /// Fold element flags. An empty skeleton yields `false`.
    pub fn fold(self, mut flags: impl Iterator<Item = bool>) -> bool {
        match self {
            Aggregation::All => {
                let mut seen = false;
                for flag in flags.by_ref() {
                    if !flag {
                        return false;
                    }
                    seen = true;
                }
                seen
            }
            Aggregation::Any => flags.any(|flag| flag),
        }
    }
}

/// Policy deriving a skeleton's flags from its elements on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkeletonFlagPolicy {
    pub outside: Aggregation,
    pub occluded: Aggregation,
    pub hidden: Aggregation,
    pub lock: Aggregation,
}

impl Default for SkeletonFlagPolicy {
    fn default() -> Self {
        Self {
            outside: Aggregation::All,
            occluded: Aggregation::All,
            hidden: Aggregation::All,
            lock: Aggregation::Any,
        }
    }
}

/// Auto-save section of the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoSaveConfig {
    /// Whether the session saves on its own
    #[serde(default)]
    pub enabled: bool,

    /// Seconds to wait after the last change
    #[serde(default = "default_debounce_secs")]
    pub debounce_secs: u64,

    /// Minimum seconds between two saves
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_debounce_secs() -> u64 {
    DEFAULT_AUTOSAVE_DEBOUNCE_SECS
}

fn default_interval_secs() -> u64 {
    DEFAULT_AUTOSAVE_INTERVAL_SECS
}

impl Default for AutoSaveConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_secs: default_debounce_secs(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl EngineConfig {
    /// Create a new configuration with default values.
    pub fn new() -> Self {
        Self {
            version: CONFIG_VERSION,
            geometry: GeometryConfig::default(),
            history: HistoryConfig::default(),
            skeleton: SkeletonFlagPolicy::default(),
            autosave: AutoSaveConfig::default(),
        }
    }

    /// Serialize the configuration to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Deserialize configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;

        if config.version > CONFIG_VERSION {
            return Err(ConfigError::VersionTooNew {
                file_version: config.version,
                supported_version: CONFIG_VERSION,
            });
        }

        Ok(config)
    }

    /// Get the default filename for the config file.
    pub fn default_filename() -> &'static str {
        "annocore.json"
    }

    /// Get the default config file path.
    pub fn default_path() -> Option<std::path::PathBuf> {
        if let Some(config_dir) = dirs::config_dir() {
            Some(config_dir.join("annocore").join(Self::default_filename()))
        } else {
            dirs::home_dir().map(|home_dir| {
                home_dir
                    .join(".config")
                    .join("annocore")
                    .join(Self::default_filename())
            })
        }
    }

    /// Load configuration from a file.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json(&json)?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to a file, creating parent directories if needed.
    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_json()?)?;
        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Try to load configuration from the default path.
    /// Returns None if the file doesn't exist or can't be read.
    pub fn load_from_default_path() -> Option<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            log::debug!("No config file found at {:?}", path);
            return None;
        }

        match Self::load(&path) {
            Ok(config) => Some(config),
            Err(e) => {
                log::warn!("Failed to load config file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Save configuration to the default path.
    pub fn save_to_default_path(&self) -> Result<(), ConfigError> {
        let path = Self::default_path().ok_or_else(|| {
            ConfigError::IoError(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "Could not determine config directory",
            ))
        })?;
        self.save(&path)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Configuration version is newer than supported
    #[error(
        "Configuration file version {file_version} is newer than supported version {supported_version}"
    )]
    VersionTooNew {
        file_version: u32,
        supported_version: u32,
    },

    /// I/O error when reading/writing config
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
