//! Configuration for the Glass X11 backend
//!
//! Loads configuration from TOML file at `~/.config/glass-x11/config.toml`
//! Auto-generates default config file on first run if missing.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scroll: ScrollConfig,
    pub size_hints: SizeHintsConfig,
    pub frame_extents: FrameExtentsConfig,
}

impl Config {
    /// Load configuration from file, or use defaults if file doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!("Config file not found at {:?}, using defaults", config_path);
            if let Err(e) = Self::save_default(config_path) {
                warn!("Failed to create default config file: {}", e);
            }
            return Ok(Self::default());
        }

        let content = fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Configuration loaded from {:?}", config_path);
        debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Get the path to the config file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("glass-x11");

        Ok(config_dir.join("config.toml"))
    }

    /// Save default configuration to file
    fn save_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let toml_string = toml::to_string_pretty(&Self::default())
            .context("Failed to serialize default config")?;

        fs::write(path, toml_string).context("Failed to write default config file")?;

        info!("Created default config file at {:?}", path);
        Ok(())
    }
}

/// Scroll configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrollConfig {
    /// Pixels reported per discrete horizontal wheel step
    pub multiplier_x: f64,
    /// Pixels reported per discrete vertical wheel step
    pub multiplier_y: f64,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            multiplier_x: 40.0,
            multiplier_y: 40.0,
        }
    }
}

/// Size-hint limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizeHintsConfig {
    /// Maximum width advertised when the toolkit sets no maximum
    pub max_width: i32,
    /// Maximum height advertised when the toolkit sets no maximum
    pub max_height: i32,
}

impl Default for SizeHintsConfig {
    fn default() -> Self {
        Self {
            max_width: 100_000,
            max_height: 100_000,
        }
    }
}

/// Frame-extents discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameExtentsConfig {
    /// Ask the window manager for extents when a titled window is created
    pub request: bool,
    /// Read the extents property synchronously on the first bounds change
    pub sync_initialize: bool,
}

impl Default for FrameExtentsConfig {
    fn default() -> Self {
        Self {
            request: true,
            sync_initialize: true,
        }
    }
}
