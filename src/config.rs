use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Config file looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "rdbaasmetrics.toml";

#[derive(Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// Per-request timeout in seconds. Bounds how long a single database
    /// can stall the cycle; the original exporter relied on the HTTP
    /// client default instead.
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_secret: String,
    #[serde(default)]
    pub databases: Vec<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            poll_interval: default_poll_interval(),
            listen_addr: default_listen_addr(),
            api_base_url: default_api_base_url(),
            request_timeout: default_request_timeout(),
            api_key: String::new(),
            api_secret: String::new(),
            databases: Vec::new(),
        }
    }
}

fn default_poll_interval() -> u64 {
    30
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_api_base_url() -> String {
    "https://api-de-muc-1.exoscale.com/v2/dbaas-service-metrics".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("api key is not set (config `api_key` or EXOSCALE_KEY)")]
    MissingKey,
    #[error("api secret is not set (config `api_secret` or EXOSCALE_SECRET)")]
    MissingSecret,
    #[error("no databases to monitor (config `databases` or DATABASE_NAMES)")]
    NoDatabases,
}

impl Config {
    /// Load configuration from `path`, apply environment overrides, and
    /// validate. A missing config file is fine as long as the environment
    /// supplies the credentials and database list.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?
        } else {
            Config::default()
        };

        config.apply_overrides(
            env::var("EXOSCALE_KEY").ok(),
            env::var("EXOSCALE_SECRET").ok(),
            env::var("DATABASE_NAMES").ok(),
        );
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides(
        &mut self,
        key: Option<String>,
        secret: Option<String>,
        databases: Option<String>,
    ) {
        if let Some(key) = key.filter(|k| !k.is_empty()) {
            self.api_key = key;
        }
        if let Some(secret) = secret.filter(|s| !s.is_empty()) {
            self.api_secret = secret;
        }
        if let Some(databases) = databases {
            let names = split_database_list(&databases);
            if !names.is_empty() {
                self.databases = names;
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingKey);
        }
        if self.api_secret.is_empty() {
            return Err(ConfigError::MissingSecret);
        }
        if self.databases.is_empty() {
            return Err(ConfigError::NoDatabases);
        }
        Ok(())
    }
}

/// Split a comma-separated database list, dropping blanks.
pub fn split_database_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}
