use std::path::PathBuf;
use std::time::Duration;

use directories::ProjectDirs;
use serde::Deserialize;

use crate::error::{Result, TmsError};

pub const DEFAULT_API_URL: &str = "http://localhost:3000/api/v1";
pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:3000";

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    pub api_url: Option<String>,
    pub socket_url: Option<String>,
    pub default_project: Option<String>,
    #[serde(default)]
    pub realtime: RealtimeSettings,
}

/// Reconnection policy for the live-update channel.
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RealtimeSettings {
    pub reconnect_delay_ms: u64,
    pub reconnect_attempts: u32,
}

impl Default for RealtimeSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 1000,
            reconnect_attempts: 5,
        }
    }
}

impl RealtimeSettings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            return Ok(Config::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).map_err(|e| TmsError::ConfigRead {
                path: config_path.clone(),
                source: e,
            })?;

        Self::parse(&contents).map_err(|e| TmsError::ConfigParse {
            path: config_path,
            source: e,
        })
    }

    pub fn parse(contents: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    pub fn config_path() -> Result<PathBuf> {
        ProjectDirs::from("", "", "tms")
            .map(|dirs| dirs.config_dir().join("config.toml"))
            .ok_or(TmsError::NoConfigDir)
    }

    /// REST base URL with env var taking precedence over config file
    pub fn api_url(&self) -> String {
        std::env::var("TMS_API_URL")
            .ok()
            .or_else(|| self.api_url.clone())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string()
    }

    pub fn socket_url(&self) -> String {
        std::env::var("TMS_SOCKET_URL")
            .ok()
            .or_else(|| self.socket_url.clone())
            .unwrap_or_else(|| DEFAULT_SOCKET_URL.to_string())
    }

    /// Get project, preferring explicit argument over default
    pub fn resolve_project(&self, explicit: Option<&str>) -> Result<String> {
        explicit
            .map(String::from)
            .or_else(|| self.default_project.clone())
            .ok_or(TmsError::NoProject)
    }
}
