//! Configuration system for Burrow.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $BURROW_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/burrow/config.toml
//!   3. ~/.config/burrow/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{
    DIAL_TIMEOUT_MS, LIFETIME_MS, PING_PERIOD_MS, PONG_PERIOD_MS, PUNCH_INTERVAL_MS,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BurrowConfig {
    pub server: ServerConfig,
    pub peer: PeerConfig,
    pub timing: Timing,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// UDP address the rendezvous server receives pings on.
    pub bind: String,
    /// TCP address of the lookup API.
    pub api_bind: String,
    /// Concurrent lookup requests admitted before answering 503.
    pub api_max_connections: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    /// This peer's id. Opaque, at most 64 bytes.
    pub id: String,
    /// Local UDP address. Port 0 = OS-assigned.
    pub bind: String,
    /// Rendezvous server UDP address.
    pub server: String,
}

/// Protocol timing. Shared by server and agent; both sides must agree on
/// `lifetime` relative to `ping_period` for introductions to survive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Timing {
    pub ping_period_ms: u64,
    pub pong_period_ms: u64,
    pub dial_timeout_ms: u64,
    pub lifetime_ms: u64,
    pub punch_interval_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:62077".to_string(),
            api_bind: "127.0.0.1:62070".to_string(),
            api_max_connections: 200,
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            bind: "0.0.0.0:0".to_string(),
            server: "127.0.0.1:62077".to_string(),
        }
    }
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            ping_period_ms: PING_PERIOD_MS,
            pong_period_ms: PONG_PERIOD_MS,
            dial_timeout_ms: DIAL_TIMEOUT_MS,
            lifetime_ms: LIFETIME_MS,
            punch_interval_ms: PUNCH_INTERVAL_MS,
        }
    }
}

impl Timing {
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn pong_period(&self) -> Duration {
        Duration::from_millis(self.pong_period_ms)
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.lifetime_ms)
    }

    pub fn punch_interval(&self) -> Duration {
        Duration::from_millis(self.punch_interval_ms)
    }

    /// Every period scaled down by `factor`. Used by tests that need the
    /// protocol to converge in milliseconds rather than seconds.
    pub fn scaled_down(factor: u64) -> Self {
        let base = Self::default();
        let factor = factor.max(1);
        Self {
            ping_period_ms: base.ping_period_ms / factor,
            pong_period_ms: base.pong_period_ms / factor,
            dial_timeout_ms: base.dial_timeout_ms / factor,
            lifetime_ms: base.lifetime_ms / factor,
            punch_interval_ms: base.punch_interval_ms / factor,
        }
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("burrow")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl BurrowConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            BurrowConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Parse a config file without applying env overrides.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("BURROW_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&BurrowConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply BURROW_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("BURROW_SERVER__BIND") {
            self.server.bind = v;
        }
        if let Some(v) = lookup("BURROW_SERVER__API_BIND") {
            self.server.api_bind = v;
        }
        if let Some(v) = lookup("BURROW_SERVER__API_MAX_CONNECTIONS") {
            if let Ok(n) = v.parse() {
                self.server.api_max_connections = n;
            }
        }
        if let Some(v) = lookup("BURROW_PEER__ID") {
            self.peer.id = v;
        }
        if let Some(v) = lookup("BURROW_PEER__BIND") {
            self.peer.bind = v;
        }
        if let Some(v) = lookup("BURROW_PEER__SERVER") {
            self.peer.server = v;
        }
    }
}
