// src/config.rs

//! Defines the configuration structures for `winbus`.
//!
//! The configuration is a small JSON document. Every section carries
//! `#[serde(default)]`, so a file only needs the keys it wants to change and
//! a missing file simply means "all defaults".

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, info, warn};
use once_cell::sync::Lazy;

use crate::color::Color;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_PATH_ENV: &str = "WINBUS_CONFIG";

/// The process-wide configuration, loaded on first access.
pub static CONFIG: Lazy<Config> = Lazy::new(Config::load_or_default);

// --- Top-Level Configuration Structure ---

/// Root of the configuration tree.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Windows created at startup.
    pub window: WindowConfig,
    /// Bus naming and object layout.
    pub bus: BusConfig,
}

// --- Window Configuration ---

/// Geometry and initial appearance of the windows opened at startup.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    /// Number of windows opened before the loop starts.
    pub count: usize,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    /// Fill color a window starts with until its first `SetColor`.
    pub fill_color: Color,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig {
            count: 2,
            x: 0,
            y: 0,
            width: 512,
            height: 512,
            fill_color: Color::WHITE,
        }
    }
}

// --- Bus Configuration ---

/// Well-known name and object paths exported on the session bus.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BusConfig {
    /// Well-known name to request. If another client owns it we keep going
    /// under the unique connection name.
    pub name: String,
    /// Parent path of the per-window objects, `<windows_root>/<surface-id>`.
    pub windows_root: String,
    /// Path of the echo object.
    pub echo_path: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            name: "com.example.WinBus".to_string(),
            windows_root: "/com/example/WinBus/windows".to_string(),
            echo_path: "/com/example/WinBus/echo".to_string(),
        }
    }
}

impl Config {
    /// Parses a configuration document.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("Failed to parse configuration JSON")
    }

    /// Reads and parses the configuration file at `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("In configuration file {}", path.display()))
    }

    /// Loads the configuration from the default location.
    ///
    /// A missing file yields the defaults. A file that exists but cannot be
    /// read or parsed is reported and also yields the defaults.
    pub fn load_or_default() -> Self {
        let Some(path) = Self::default_path() else {
            debug!("No configuration directory available, using defaults.");
            return Config::default();
        };
        if !path.exists() {
            debug!("No configuration at {}, using defaults.", path.display());
            return Config::default();
        }
        match Self::load_from(&path) {
            Ok(config) => {
                info!("Configuration loaded from {}", path.display());
                config
            }
            Err(e) => {
                warn!("{:#}. Falling back to the default configuration.", e);
                Config::default()
            }
        }
    }

    /// `$WINBUS_CONFIG`, else `$XDG_CONFIG_HOME/winbus/config.json`, else
    /// `$HOME/.config/winbus/config.json`.
    pub fn default_path() -> Option<PathBuf> {
        if let Some(explicit) = std::env::var_os(CONFIG_PATH_ENV) {
            return Some(PathBuf::from(explicit));
        }
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config")))?;
        Some(base.join("winbus").join("config.json"))
    }
}
