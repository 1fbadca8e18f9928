use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tasknest_core::config::{optional_trimmed, required_trimmed, value_or_default};
use tasknest_core::{ConfigError, GatewayConfig, RemoteConfig};
use url::Url;

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8787";
const DEFAULT_DB_PATH: &str = "tasknest-gateway.db";
const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Origin of the web app the gateway sits in front of
    pub upstream_url: Url,
    pub upstream_timeout: Duration,
    pub db_path: PathBuf,
    pub max_body_bytes: usize,
    /// Caching behaviour of the version installed at startup
    pub gateway: GatewayConfig,
    /// Remote store used to drain the queue; sync is disabled without it
    pub remote: Option<RemoteConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind_addr = value_or_default(&lookup, "TASKNEST_GATEWAY_BIND_ADDR", DEFAULT_BIND_ADDR);

        let upstream_raw = required_trimmed(&lookup, "TASKNEST_UPSTREAM_URL")?;
        let upstream_url = Url::parse(&upstream_raw).map_err(|error| {
            ConfigError::Invalid(format!("TASKNEST_UPSTREAM_URL is not a valid URL: {error}"))
        })?;
        if !matches!(upstream_url.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(
                "TASKNEST_UPSTREAM_URL must start with http:// or https://".to_string(),
            ));
        }

        let upstream_timeout = Duration::from_secs(parse_number(
            &lookup,
            "TASKNEST_UPSTREAM_TIMEOUT_SECS",
            DEFAULT_UPSTREAM_TIMEOUT_SECS,
        )?);
        let max_body_bytes = usize::try_from(parse_number(
            &lookup,
            "TASKNEST_MAX_BODY_BYTES",
            DEFAULT_MAX_BODY_BYTES as u64,
        )?)
        .map_err(|_| ConfigError::Invalid("TASKNEST_MAX_BODY_BYTES is too large".to_string()))?;

        let remote = if optional_trimmed(&lookup, "TASKNEST_REMOTE_URL").is_some() {
            Some(RemoteConfig::from_lookup(&lookup)?)
        } else {
            None
        };

        Ok(Self {
            bind_addr,
            upstream_url,
            upstream_timeout,
            db_path: PathBuf::from(value_or_default(
                &lookup,
                "TASKNEST_DB_PATH",
                DEFAULT_DB_PATH,
            )),
            max_body_bytes,
            gateway: GatewayConfig::from_lookup(&lookup)?,
            remote,
        })
    }

    /// User whose queue the gateway drains, when sync is configured.
    pub fn sync_user(&self) -> Option<&str> {
        self.remote.as_ref()?.user_id.as_deref()
    }
}

fn parse_number(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
) -> Result<u64, ConfigError> {
    optional_trimmed(lookup, name).map_or(Ok(default), |raw| {
        raw.parse::<u64>()
            .ok()
            .filter(|value| *value > 0)
            .ok_or_else(|| ConfigError::Invalid(format!("{name} must be a positive integer")))
    })
}
