//! Harness configuration.
//!
//! Values come from [`HarnessConfig::default`], an optional TOML file and
//! environment overrides, in that order. Durations use humantime syntax
//! (`"3s"`, `"250ms"`).
//!
//! ```toml
//! server_url = "wss://push.example.com/"
//! receive_timeout = "3s"
//! race_window = "1s"
//!
//! [capabilities]
//! duplicate_conflict = true
//! ```

use crate::error::{HarnessError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const ENV_SERVER_URL: &str = "SIMPLEPUSH_SERVER_URL";
pub const ENV_CONFIG_PATH: &str = "SIMPLEPUSH_CONFIG";

/// Optional server behaviours a scenario must check for before asserting
/// on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Re-registering an already registered channel answers 409.
    DuplicateConflict,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub duplicate_conflict: bool,
}

impl Capabilities {
    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        match capability {
            Capability::DuplicateConflict => self.duplicate_conflict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// WebSocket URL of the server under test.
    pub server_url: String,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Default bound for every request/response receive.
    #[serde(with = "humantime_serde")]
    pub receive_timeout: Duration,
    /// Silence window used to prove a message is *not* delivered.
    ///
    /// A server that delivers late, after the window closes, passes. Raising
    /// the window narrows that gap and slows every negative assertion.
    #[serde(with = "humantime_serde")]
    pub race_window: Duration,
    #[serde(with = "humantime_serde")]
    pub trigger_timeout: Duration,
    /// Number of back-to-back pings sent by the keep-alive scenario.
    pub ping_rounds: usize,
    pub capabilities: Capabilities,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://localhost:8080/".to_owned(),
            connect_timeout: Duration::from_secs(5),
            receive_timeout: Duration::from_secs(3),
            race_window: Duration::from_secs(1),
            trigger_timeout: Duration::from_secs(10),
            ping_rounds: 100,
            capabilities: Capabilities::default(),
        }
    }
}

impl HarnessConfig {
    #[must_use]
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    /// Loads a TOML configuration file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::Config(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), url = %config.server_url, "loaded harness config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| HarnessError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from the environment.
    ///
    /// `SIMPLEPUSH_CONFIG` names a TOML file to start from;
    /// `SIMPLEPUSH_SERVER_URL` overrides the server URL.
    pub fn from_env() -> Result<Self> {
        let mut config = match std::env::var(ENV_CONFIG_PATH) {
            Ok(path) => Self::load(path)?,
            Err(_) => Self::default(),
        };
        if let Ok(url) = std::env::var(ENV_SERVER_URL) {
            config.server_url = url;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let url = Url::parse(&self.server_url)
            .map_err(|e| HarnessError::Config(format!("server_url {:?}: {e}", self.server_url)))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(HarnessError::Config(format!(
                "server_url must use ws:// or wss://, got {}://",
                url.scheme()
            )));
        }
        for (name, value) in [
            ("connect_timeout", self.connect_timeout),
            ("receive_timeout", self.receive_timeout),
            ("race_window", self.race_window),
            ("trigger_timeout", self.trigger_timeout),
        ] {
            if value.is_zero() {
                return Err(HarnessError::Config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_race_window(mut self, window: Duration) -> Self {
        self.race_window = window;
        self
    }

    #[must_use]
    pub fn with_trigger_timeout(mut self, timeout: Duration) -> Self {
        self.trigger_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_ping_rounds(mut self, rounds: usize) -> Self {
        self.ping_rounds = rounds;
        self
    }

    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    #[must_use]
    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities.supports(capability)
    }
}
