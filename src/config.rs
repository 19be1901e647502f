//! Configuration loading.
//!
//! Settings come from `<config_dir>/playground/config.json` when it exists,
//! then environment variables override individual fields. The file is only
//! ever read; nothing here writes it.
//!
//! | Variable                           | Field                   |
//! |------------------------------------|-------------------------|
//! | `PLAYGROUND_SERVER_URL`            | `server_url`            |
//! | `PLAYGROUND_FLUSH_INTERVAL_MS`     | `flush_interval_ms`     |
//! | `PLAYGROUND_RECONNECT_INTERVAL_MS` | `reconnect_interval_ms` |
//! | `PLAYGROUND_RESIZE_DEBOUNCE_MS`    | `resize_debounce_ms`    |
//! | `PLAYGROUND_PROTOCOL`              | `protocol`              |
//! | `PLAYGROUND_CONFIG_DIR`            | directory of the file   |

use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{env, fs};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants;
use crate::protocol::ProtocolVersion;

/// Configuration for the playground client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Backend origin, e.g. `https://labs.example.com`.
    pub server_url: String,
    /// Input flush period in milliseconds.
    pub flush_interval_ms: u64,
    /// Delay between reconnection attempts in milliseconds.
    pub reconnect_interval_ms: u64,
    /// Quiet period for local resizes in milliseconds.
    pub resize_debounce_ms: u64,
    /// Outbound event naming.
    pub protocol: ProtocolVersion,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: constants::DEFAULT_SERVER_URL.to_string(),
            flush_interval_ms: duration_ms(constants::INPUT_FLUSH_INTERVAL),
            reconnect_interval_ms: duration_ms(constants::RECONNECT_INTERVAL),
            resize_debounce_ms: duration_ms(constants::RESIZE_DEBOUNCE),
            protocol: ProtocolVersion::default(),
        }
    }
}

impl Config {
    /// Directory holding `config.json`.
    ///
    /// `PLAYGROUND_CONFIG_DIR` wins; otherwise the platform config directory
    /// (`~/.config/playground` on Linux).
    pub fn config_dir() -> Result<PathBuf> {
        if let Ok(dir) = env::var("PLAYGROUND_CONFIG_DIR") {
            return Ok(PathBuf::from(dir));
        }
        Ok(dirs::config_dir()
            .context("Could not determine config directory")?
            .join("playground"))
    }

    /// Load from the default location with environment overrides.
    ///
    /// A missing or unreadable file falls back to defaults.
    pub fn load() -> Result<Self> {
        let path = Self::config_dir()?.join("config.json");
        let mut config = match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                log::debug!("Using default config ({:#})", e);
                Self::default()
            }
        };
        config.apply_overrides(|key| env::var(key).ok());
        Ok(config)
    }

    /// Read one config file without overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    /// Apply overrides from a variable lookup (normally the environment).
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(server_url) = lookup("PLAYGROUND_SERVER_URL") {
            self.server_url = server_url;
        }

        for (key, slot) in [
            ("PLAYGROUND_FLUSH_INTERVAL_MS", &mut self.flush_interval_ms),
            ("PLAYGROUND_RECONNECT_INTERVAL_MS", &mut self.reconnect_interval_ms),
            ("PLAYGROUND_RESIZE_DEBOUNCE_MS", &mut self.resize_debounce_ms),
        ] {
            if let Some(raw) = lookup(key) {
                match raw.parse::<u64>() {
                    Ok(ms) if ms > 0 => *slot = ms,
                    _ => log::warn!("Ignoring invalid {}={}", key, raw),
                }
            }
        }

        if let Some(raw) = lookup("PLAYGROUND_PROTOCOL") {
            match raw.parse() {
                Ok(protocol) => self.protocol = protocol,
                Err(e) => log::warn!("Ignoring PLAYGROUND_PROTOCOL: {}", e),
            }
        }
    }

    /// Input flush period.
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    /// Reconnection delay.
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    /// Resize debounce period.
    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
