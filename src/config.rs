//! Server configuration: listen address and log level, loaded from an
//! optional TOML file and overridden by CLI/env at the call site (`main.rs`).
//! Kept in the teacher's layered-override shape, scoped down to what a pure
//! wire-protocol façade needs — no backend connection string, no shadow/TLS
//! fields (see DESIGN.md for what was dropped and why).

use crate::error::{Error, Result};
use serde::Deserialize;
use std::fs;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub listen_addr: String,
    pub log_level: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Mongo's standard port, same default the teacher uses.
            listen_addr: "127.0.0.1:27017".to_string(),
            log_level: None,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file. If `path_opt` is `None` or the
    /// file is missing/unreadable, returns defaults. Parse errors propagate.
    pub fn load_from_file(path_opt: Option<&str>) -> Result<Self> {
        let path = path_opt.unwrap_or("config.toml");
        match fs::read_to_string(path) {
            Ok(contents) => toml::from_str::<Config>(&contents)
                .map_err(|e| Error::Msg(format!("Failed to parse {path}: {e}"))),
            Err(_e) => Ok(Self::default()),
        }
    }

    /// Apply CLI/env overrides (highest precedence) to an existing config.
    pub fn with_overrides(mut self, listen_addr: Option<String>, log_level: Option<String>) -> Self {
        if let Some(addr) = listen_addr {
            self.listen_addr = addr;
        }
        if let Some(ll) = log_level {
            self.log_level = Some(ll);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.is_empty() {
            return Err(Error::Msg("listen_addr cannot be empty".to_string()));
        }
        if !self.listen_addr.contains(':') {
            return Err(Error::Msg(format!(
                "listen_addr '{}' must be in host:port format",
                self.listen_addr
            )));
        }
        Ok(())
    }
}
