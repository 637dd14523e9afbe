//! Configuration loading and persistence.
//!
//! Settings resolve in layers, later layers winning: built-in defaults, the
//! `config.json` file, `PEERCHAT_*` environment variables, then CLI flags
//! (applied by the binary).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use std::fs;

use crate::constants::{DEFAULT_HOST, DEFAULT_PORT};
use crate::socket::endpoint::Endpoint;
use crate::socket::framing::TextEncoding;
use crate::socket::session::SessionConfig;

const CONFIG_FILE: &str = "config.json";

/// Keys accepted by [`Config::get`] and [`Config::set`].
pub const KEYS: [&str; 4] = ["host", "port", "encoding", "connect_timeout_secs"];

/// Configuration for peerchat.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Host the listener binds or the connector dials.
    pub host: String,
    /// TCP port.
    pub port: u16,
    /// Encoding for outgoing messages.
    pub encoding: TextEncoding,
    /// Connect timeout in seconds; unset leaves it to the OS.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            encoding: TextEncoding::default(),
            connect_timeout_secs: None,
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `PEERCHAT_CONFIG_DIR` env var: explicit override
    /// 2. `PEERCHAT_ENV=test`: `<temp dir>/peerchat-test`
    /// 3. Default: platform config dir + `peerchat`
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("PEERCHAT_CONFIG_DIR") {
            PathBuf::from(dir)
        } else if crate::env::is_test_mode() {
            std::env::temp_dir().join("peerchat-test")
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("peerchat")
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Path of the config file inside [`Config::config_dir`].
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    /// Loads configuration from file, with environment variable overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads `path`, falling back to defaults if it does not exist.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("[Config] No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Persists the configuration to the config file.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Persists the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        log::info!("[Config] Saved {}", path.display());
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply `PEERCHAT_*` overrides from `lookup`. Unparseable values are
    /// logged and ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        for (var, key) in [
            ("PEERCHAT_HOST", "host"),
            ("PEERCHAT_PORT", "port"),
            ("PEERCHAT_ENCODING", "encoding"),
            ("PEERCHAT_CONNECT_TIMEOUT", "connect_timeout_secs"),
        ] {
            if let Some(value) = lookup(var) {
                if let Err(e) = self.set(key, &value) {
                    log::warn!("[Config] Ignoring {var}: {e:#}");
                }
            }
        }
    }

    /// Value of `key` as displayed by `peerchat config KEY`.
    pub fn get(&self, key: &str) -> Result<String> {
        Ok(match key {
            "host" => self.host.clone(),
            "port" => self.port.to_string(),
            "encoding" => self.encoding.to_string(),
            "connect_timeout_secs" => self
                .connect_timeout_secs
                .map_or_else(|| "none".to_string(), |secs| secs.to_string()),
            _ => anyhow::bail!("Unknown config key '{key}' (expected one of: {})", KEYS.join(", ")),
        })
    }

    /// Set `key` from its string form.
    ///
    /// `connect_timeout_secs` accepts `none` or `0` to clear the timeout.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "host" => {
                anyhow::ensure!(!value.trim().is_empty(), "host must not be empty");
                self.host = value.trim().to_string();
            }
            "port" => {
                self.port = value
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid port '{value}'"))?;
            }
            "encoding" => self.encoding = value.parse()?,
            "connect_timeout_secs" => {
                self.connect_timeout_secs = match value.trim() {
                    "" | "none" | "0" => None,
                    secs => Some(
                        secs.parse()
                            .with_context(|| format!("Invalid timeout '{value}'"))?,
                    ),
                };
            }
            _ => anyhow::bail!("Unknown config key '{key}' (expected one of: {})", KEYS.join(", ")),
        }
        Ok(())
    }

    /// Endpoint built from `host` and `port`.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Transport settings for a [`crate::Session`].
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            endpoint: self.endpoint(),
            encoding: self.encoding,
            connect_timeout: self.connect_timeout_secs.map(Duration::from_secs),
        }
    }
}
