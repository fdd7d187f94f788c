use anyhow::{Result, bail};
use std::time::Duration;

use crate::operation::encoder::ResponseFormat;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_MAX_POOL_SIZE: u32 = 5;
const DEFAULT_SERVER_SELECTION_TIMEOUT_SECS: u64 = 10;

/// Process configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub mongodb_uri: String,
    pub api_secret: Option<String>,
    pub default_database: Option<String>,
    pub default_collection: Option<String>,
    pub bind_addr: String,
    pub max_pool_size: u32,
    pub server_selection_timeout: Duration,
    pub response_format: ResponseFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let Some(mongodb_uri) = get("MONGODB_URI") else {
            bail!("MONGODB_URI not set");
        };

        let max_pool_size = get("MONGODB_MAX_POOL_SIZE")
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);

        let server_selection_timeout_secs = get("MONGODB_SERVER_SELECTION_TIMEOUT_SECS")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SERVER_SELECTION_TIMEOUT_SECS);

        let response_format = match get("RESPONSE_FORMAT") {
            Some(value) => value.parse::<ResponseFormat>()?,
            None => ResponseFormat::default(),
        };

        Ok(Self {
            mongodb_uri,
            api_secret: get("SHORTCUTS_API_KEY"),
            default_database: get("DEFAULT_DATABASE"),
            default_collection: get("DEFAULT_COLLECTION"),
            bind_addr: get("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string()),
            max_pool_size,
            server_selection_timeout: Duration::from_secs(server_selection_timeout_secs),
            response_format,
        })
    }
}
