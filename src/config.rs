//! Process configuration.
//!
//! Loaded from a TOML file once at startup, validated, then immutable.
//! Every field has a default, so an empty file is a valid config:
//!
//! ```toml
//! listen_addr = "0.0.0.0:3000"
//! deadline_ms = 30000
//!
//! [[limits]]
//! prefix = "/api"
//! limit = 100
//! window_ms = 60000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Root configuration.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Bind address, `host:port`.
    pub listen_addr: String,

    /// Default per-request deadline, in milliseconds.
    pub deadline_ms: u64,

    /// Rate-limit budgets per route group.
    pub limits: Vec<RouteLimit>,
}

/// One route group's admission budget.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct RouteLimit {
    /// Path prefix the budget applies to.
    pub prefix: String,
    /// Admissions per window.
    pub limit: u32,
    /// Window length, in milliseconds.
    pub window_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:3000".to_owned(),
            deadline_ms: 30_000,
            limits: Vec::new(),
        }
    }
}

impl Config {
    /// Loads and validates a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses and validates TOML config text.
    pub fn from_toml(contents: &str) -> Result<Self, Error> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), Error> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::Config(format!(
                "listen_addr `{}` is not a host:port address",
                self.listen_addr
            )));
        }
        if self.deadline_ms == 0 {
            return Err(Error::Config("deadline_ms must be positive".to_owned()));
        }
        for limit in &self.limits {
            if limit.limit == 0 {
                return Err(Error::Config(format!(
                    "limit for `{}` must be positive",
                    limit.prefix
                )));
            }
            if limit.window_ms == 0 {
                return Err(Error::Config(format!(
                    "window_ms for `{}` must be positive",
                    limit.prefix
                )));
            }
        }
        Ok(())
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

impl RouteLimit {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}
