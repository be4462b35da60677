//! # Engine Configuration
//!
//! The configuration object constructed once at startup and passed by
//! reference down to the window and renderer. There is no process-wide
//! settings store; ownership is explicit and teardown follows normal
//! drop order.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    /// Config file is not valid TOML
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Requested window dimensions
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WindowSettings {
    /// Client-area width in pixels
    pub width: u32,
    /// Client-area height in pixels
    pub height: u32,
}

impl Default for WindowSettings {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
        }
    }
}

/// Top-level engine configuration
///
/// The `application_name` labels the Vulkan instance for diagnostics
/// and doubles as the window caption; it has no functional effect on
/// rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Application name used for the Vulkan instance and window title
    pub application_name: String,
    /// Requested window dimensions
    pub window: WindowSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            application_name: "Vulkan".to_string(),
            window: WindowSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Load configuration from a TOML file, falling back to defaults
    /// when the file does not exist
    pub fn from_file_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = EngineConfig::default();
        assert_eq!(config.application_name, "Vulkan");
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 480);
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            application_name = "Demo"
            "#,
        )
        .unwrap();
        assert_eq!(config.application_name, "Demo");
        assert_eq!(config.window.width, 640);
        assert_eq!(config.window.height, 480);
    }

    #[test]
    fn parses_window_settings() {
        let config: EngineConfig = toml::from_str(
            r#"
            [window]
            width = 1280
            height = 720
            "#,
        )
        .unwrap();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
    }
}
