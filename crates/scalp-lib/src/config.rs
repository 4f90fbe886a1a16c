use crate::session::{FilterParameters, TimeFrequencyParams};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_SERVICE_URL: &str = "http://127.0.0.1:8000";
pub const DEFAULT_POINT_BUDGET: usize = 2048;
/// Environment override for the service endpoint, checked after any file.
pub const SERVICE_URL_ENV: &str = "SCALP_SERVICE_URL";
const CONFIG_FILE: &str = "scalp.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct ScalpConfig {
    #[serde(default = "default_service_url")]
    pub service_url: String,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default = "default_point_budget")]
    pub point_budget: usize,
    /// Initial display window in seconds; absent means the full recording.
    #[serde(default)]
    pub window_seconds: Option<f64>,
    #[serde(default)]
    pub filters: FilterParameters,
    #[serde(default)]
    pub time_frequency: TimeFrequencyParams,
}

fn default_service_url() -> String {
    DEFAULT_SERVICE_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_debounce_ms() -> u64 {
    500
}

fn default_point_budget() -> usize {
    DEFAULT_POINT_BUDGET
}

impl Default for ScalpConfig {
    fn default() -> Self {
        Self {
            service_url: default_service_url(),
            request_timeout_secs: default_timeout_secs(),
            debounce_ms: default_debounce_ms(),
            point_budget: default_point_budget(),
            window_seconds: Some(10.0),
            filters: FilterParameters::default(),
            time_frequency: TimeFrequencyParams::default(),
        }
    }
}

impl ScalpConfig {
    /// Reads a config file, then applies the environment override. With no
    /// explicit path, `scalp.toml` in the working directory is used when
    /// present, otherwise defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let fallback = Path::new(CONFIG_FILE);
                if fallback.exists() {
                    Self::from_file(fallback)?
                } else {
                    Self::default()
                }
            }
        };
        if let Ok(url) = std::env::var(SERVICE_URL_ENV) {
            if !url.is_empty() {
                config.service_url = url;
            }
        }
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&contents).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}
