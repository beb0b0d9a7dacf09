use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::error::ClientError;

pub const CONFIG_DIR_NAME: &str = "gradportrait";
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Which entitlement rules a deployment runs. Only one is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EntitlementModel {
    /// Free trial once, then a premium purchase with a fixed number of generations.
    #[default]
    Tier,
    /// Legacy per-image credit balance.
    Credits,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetRetryConfig {
    pub max_retries: u32,
    pub delay_ms: u64,
}

impl Default for AssetRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            delay_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL all API paths are appended to, including the `/api` prefix.
    pub api_base_url: String,
    /// Web front end the login entry point and checkout return routes live on.
    pub frontend_url: String,
    pub request_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub jobs_page_limit: u32,
    pub asset_retry: AssetRetryConfig,
    pub entitlement_model: EntitlementModel,
    pub keyring_service: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8000/api".to_string(),
            frontend_url: "http://localhost:3000".to_string(),
            request_timeout_secs: 30,
            poll_interval_secs: 3,
            jobs_page_limit: 50,
            asset_retry: AssetRetryConfig::default(),
            entitlement_model: EntitlementModel::Tier,
            keyring_service: "gradportrait".to_string(),
        }
    }
}

impl ClientConfig {
    /// Default location: `<config dir>/gradportrait/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load configuration. An explicit path must exist and parse; the default
    /// path is optional. Environment overrides are applied last.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ClientError> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ClientError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("Failed to read {:?}: {}", path, e)))?;
        let config = Self::from_toml(&raw)
            .map_err(|e| ClientError::Config(format!("Invalid config {:?}: {}", path, e)))?;
        info!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(raw)
    }

    /// Apply `GRADPORTRAIT_*` overrides. The lookup is injected so tests do
    /// not have to mutate the process environment.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("GRADPORTRAIT_API_URL") {
            self.api_base_url = url;
        }
        if let Some(url) = lookup("GRADPORTRAIT_FRONTEND_URL") {
            self.frontend_url = url;
        }
        if let Some(secs) = lookup("GRADPORTRAIT_TIMEOUT_SECS") {
            self.request_timeout_secs = secs.trim().parse().map_err(|_| {
                ClientError::Config(format!("GRADPORTRAIT_TIMEOUT_SECS is not a number: {}", secs))
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        self.api_url()?;
        self.frontend()?;
        if self.request_timeout_secs == 0 {
            return Err(ClientError::Config("request_timeout_secs must be > 0".into()));
        }
        if self.poll_interval_secs == 0 {
            return Err(ClientError::Config("poll_interval_secs must be > 0".into()));
        }
        Ok(())
    }

    /// Parsed API base, always with a trailing slash so relative joins keep
    /// the `/api` prefix.
    pub fn api_url(&self) -> Result<Url, ClientError> {
        parse_base(&self.api_base_url, "api_base_url")
    }

    pub fn frontend(&self) -> Result<Url, ClientError> {
        parse_base(&self.frontend_url, "frontend_url")
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn asset_retry_delay(&self) -> Duration {
        Duration::from_millis(self.asset_retry.delay_ms)
    }
}

fn parse_base(raw: &str, field: &str) -> Result<Url, ClientError> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let url = Url::parse(&normalized)
        .map_err(|e| ClientError::Config(format!("{} '{}' is invalid: {}", field, raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ClientError::Config(format!(
            "{} must be http or https, got '{}'",
            field, other
        ))),
    }
}
