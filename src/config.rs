// src/config.rs

//! Configuration for the blit engine driver.
//!
//! The structures deserialize from JSON. Every section and field has a
//! default, so an empty object (or no file at all) yields a usable
//! configuration. The file is named by the `GFX2D_CONFIG` environment
//! variable; see `Config::load`.

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming the JSON configuration file.
pub const CONFIG_ENV: &str = "GFX2D_CONFIG";

/// Driver name of the operation-record generation.
pub const GFX2D_DRIVER: &str = "microchip-gfx2d";
/// Driver name of the word-stream generation.
pub const LEGACY_DRIVER: &str = "atmel-hlcdc";

/// Root of the configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub encoder: EncoderConfig,
    pub sync: SyncConfig,
}

// --- Device ---

/// Which hardware generation to drive.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Pick by the driver name of the device node.
    #[default]
    Auto,
    /// Operation-record interface.
    Gfx2d,
    /// Raw word-stream interface.
    Legacy,
}

impl BackendChoice {
    /// Whether a device whose driver reports `driver` satisfies this choice.
    pub fn accepts(self, driver: &str) -> bool {
        match self {
            BackendChoice::Auto => driver == GFX2D_DRIVER || driver == LEGACY_DRIVER,
            BackendChoice::Gfx2d => driver == GFX2D_DRIVER,
            BackendChoice::Legacy => driver == LEGACY_DRIVER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device node to open. When unset, `/dev/dri/card*` nodes are probed.
    pub path: Option<PathBuf>,
    pub backend: BackendChoice,
}

// --- Encoder ---

/// Batching parameters for the word-stream encoder.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EncoderConfig {
    /// Queued words past which the encoder submits before appending more.
    pub auto_submit_threshold_words: usize,
    /// Capacity of the submission buffer in words.
    pub page_words: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        EncoderConfig {
            auto_submit_threshold_words: 512,
            page_words: page_size() / 4,
        }
    }
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => 4096,
    }
}

// --- Sync ---

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Timeout used by callers that do not pick their own.
    pub default_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            default_timeout_ms: 1000,
        }
    }
}

impl Config {
    /// Loads the file named by `GFX2D_CONFIG`, or the defaults when the
    /// variable is unset.
    pub fn load() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => {
                debug!("{} not set, using default configuration", CONFIG_ENV);
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!("Loaded configuration from {}: {:?}", path.display(), config);
        Ok(config)
    }
}
