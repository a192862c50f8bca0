//! Configuration system

use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::LevelFilter;
pub use serde::{Deserialize, Serialize};

use crate::foundation::time::checked_rate_to_interval;

/// Configuration trait
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from file
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;

        // Try different formats
        match extension(path) {
            Some("toml") => toml::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            Some("ron") => ron::from_str(&contents).map_err(|e| ConfigError::Parse(e.to_string())),
            _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Save configuration to file
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = match extension(path) {
            Some("toml") => toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?,
            Some("ron") => ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())
                .map_err(|e| ConfigError::Serialize(e.to_string()))?,
            _ => return Err(ConfigError::UnsupportedFormat(path.display().to_string())),
        };

        std::fs::write(path, contents).map_err(ConfigError::Io)
    }
}

fn extension(path: &Path) -> Option<&str> {
    path.extension().and_then(|ext| ext.to_str())
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Value out of range
    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

/// Engine loop and runtime settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed update rate in ticks per second
    pub updates_per_second: f32,
    /// Render rate cap; `None` renders every loop iteration
    pub fps_limit: Option<f32>,
    /// Sleep until the next tick instead of spinning when nothing is due
    pub idle_sleep: bool,
    /// Default log level (`RUST_LOG` overrides it)
    pub log_level: String,
    /// Number of frames the renderer may have in flight
    pub frames_in_flight: u32,
    /// Where the final settings are written on shutdown, if anywhere
    pub persist_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            updates_per_second: 66.0,
            fps_limit: None,
            idle_sleep: true,
            log_level: "info".to_string(),
            frames_in_flight: 2,
            persist_path: None,
        }
    }
}

impl Config for EngineConfig {}

impl EngineConfig {
    /// Check that every value is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_rate("updates_per_second", self.updates_per_second)?;
        if let Some(limit) = self.fps_limit {
            check_rate("fps_limit", limit)?;
        }
        if self.frames_in_flight == 0 {
            return Err(ConfigError::Invalid {
                field: "frames_in_flight",
                reason: "must be at least 1".to_string(),
            });
        }
        self.level_filter().map(|_| ())
    }

    /// Parsed log level
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        LevelFilter::from_str(&self.log_level).map_err(|_| ConfigError::Invalid {
            field: "log_level",
            reason: format!("unknown level '{}'", self.log_level),
        })
    }
}

/// A tick rate must be positive, finite and give a representable interval
pub(crate) fn check_rate(field: &'static str, rate: f32) -> Result<(), ConfigError> {
    if !(rate > 0.0 && rate.is_finite()) {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("must be positive and finite, got {}", rate),
        });
    }
    if checked_rate_to_interval(rate).is_none() {
        return Err(ConfigError::Invalid {
            field,
            reason: format!("{} ticks per second is too slow", rate),
        });
    }
    Ok(())
}
