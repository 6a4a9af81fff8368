//! Settings parser for the foretrack config.toml
//!
//! Settings live at `~/.config/foretrack/config.toml` by default; the
//! binary's `--config` flag points at an alternative file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use tracing::{debug, info, warn};

const CONFIG_DIR: &str = "foretrack";
const CONFIG_FILENAME: &str = "config.toml";

/// Application settings (config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub polling: PollingSettings,

    #[serde(default)]
    pub transport: TransportSettings,
}

/// Polling settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PollingSettings {
    /// Poll interval handed to the agent in START_TRACKING (milliseconds)
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    1000
}

/// Transport settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportSettings {
    /// Agent host for TCP mode
    #[serde(default = "default_host")]
    pub host: String,

    /// Agent port for TCP mode
    #[serde(default = "default_port")]
    pub port: u16,

    /// Agent command for subprocess mode (empty = not configured)
    #[serde(default)]
    pub agent: String,

    /// Extra arguments passed to the agent command
    #[serde(default)]
    pub agent_args: Vec<String>,

    /// How long to wait for the agent to acknowledge shutdown
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            agent: String::new(),
            agent_args: Vec::new(),
            command_timeout_ms: default_command_timeout_ms(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    7878
}

fn default_command_timeout_ms() -> u64 {
    5000
}

// ─────────────────────────────────────────────────────────────────────────────
// Settings Loading
// ─────────────────────────────────────────────────────────────────────────────

/// Default location of the config file (`~/.config/foretrack/config.toml`)
pub fn default_config_path() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
    base.join(CONFIG_DIR).join(CONFIG_FILENAME)
}

/// Load settings from the given config file.
///
/// Returns default settings if the file doesn't exist or can't be parsed.
pub fn load_settings(config_path: &Path) -> Settings {
    if !config_path.exists() {
        debug!("No config file at {:?}, using defaults", config_path);
        return Settings::default();
    }

    match std::fs::read_to_string(config_path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(settings) => {
                debug!("Loaded settings from {:?}", config_path);
                settings
            }
            Err(e) => {
                warn!("Failed to parse {:?}: {}", config_path, e);
                Settings::default()
            }
        },
        Err(e) => {
            warn!("Failed to read {:?}: {}", config_path, e);
            Settings::default()
        }
    }
}

/// Load settings from an explicitly requested config file.
///
/// Unlike [`load_settings`], a missing or unparsable file is an error here.
/// Used for the `--config` flag, where silently falling back to defaults
/// would hide a typo.
pub fn load_settings_required(config_path: &Path) -> Result<Settings> {
    if !config_path.exists() {
        return Err(Error::ConfigNotFound {
            path: config_path.to_path_buf(),
        });
    }

    let content = std::fs::read_to_string(config_path)?;
    toml::from_str(&content)
        .map_err(|e| Error::config(format!("Failed to parse {:?}: {}", config_path, e)))
}

/// Save settings to the given config file.
///
/// Uses atomic write (temp file + rename) for safety.
pub fn save_settings(config_path: &Path, settings: &Settings) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        if !parent.exists() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::config(format!("Failed to create config dir: {}", e)))?;
        }
    }

    let temp_path = config_path.with_extension("toml.tmp");

    let header = "# Foretrack Configuration\n\
                  # See: https://github.com/example/foretrack#configuration\n\n";
    let content = toml::to_string_pretty(settings)
        .map_err(|e| Error::config(format!("Failed to serialize settings: {}", e)))?;

    let full_content = format!("{}{}", header, content);

    // Atomic write: write to temp, then rename
    std::fs::write(&temp_path, &full_content)
        .map_err(|e| Error::config(format!("Failed to write temp file: {}", e)))?;

    std::fs::rename(&temp_path, config_path)
        .map_err(|e| Error::config(format!("Failed to rename temp file: {}", e)))?;

    info!("Saved settings to {:?}", config_path);
    Ok(())
}
