//! Environment-driven configuration shared by the CLI and the gateway.
//!
//! Values are read through a lookup closure so tests can feed a map instead of
//! the process environment.

use std::collections::HashMap;
use std::env;
use std::fmt;

use regex::Regex;
use thiserror::Error;

use crate::util::{is_http_url, normalize_text_option};

pub const DEFAULT_API_PATTERN: &str = r"^/(rest|api)/v1/";
pub const DEFAULT_STATIC_PATTERN: &str =
    r"\.(?:js|mjs|css|png|jpe?g|gif|svg|ico|webp|woff2?|ttf|json|webmanifest)$";
pub const DEFAULT_CACHE_VERSION: &str = "v1";
pub const DEFAULT_SHELL_PATH: &str = "/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Connection settings for the remote store.
#[derive(Clone, PartialEq, Eq)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
    pub access_token: Option<String>,
    pub user_id: Option<String>,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RemoteConfig")
            .field("url", &self.url)
            .field("anon_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("user_id", &self.user_id)
            .finish()
    }
}

impl RemoteConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let url = required_trimmed(&lookup, "TASKNEST_REMOTE_URL")?;
        if !is_http_url(&url) {
            return Err(ConfigError::Invalid(
                "TASKNEST_REMOTE_URL must start with http:// or https://".to_string(),
            ));
        }

        Ok(Self {
            url: url.trim_end_matches('/').to_string(),
            anon_key: required_trimmed(&lookup, "TASKNEST_REMOTE_ANON_KEY")?,
            access_token: optional_trimmed(&lookup, "TASKNEST_ACCESS_TOKEN"),
            user_id: optional_trimmed(&lookup, "TASKNEST_USER_ID"),
        })
    }
}

/// Caching behaviour of a gateway version.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Suffix of every cache this version owns
    pub cache_version: String,
    /// Paths stored in the static cache during install
    pub precache_urls: Vec<String>,
    pub api_pattern: Regex,
    pub static_pattern: Regex,
    /// Path of the application shell used as the navigation fallback
    pub shell_path: String,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let cache_version =
            value_or_default(&lookup, "TASKNEST_CACHE_VERSION", DEFAULT_CACHE_VERSION);
        if cache_version.contains(char::is_whitespace) {
            return Err(ConfigError::Invalid(
                "TASKNEST_CACHE_VERSION must not contain whitespace".to_string(),
            ));
        }

        let shell_path = value_or_default(&lookup, "TASKNEST_SHELL_PATH", DEFAULT_SHELL_PATH);
        if !shell_path.starts_with('/') {
            return Err(ConfigError::Invalid(
                "TASKNEST_SHELL_PATH must start with '/'".to_string(),
            ));
        }

        let precache_urls = optional_trimmed(&lookup, "TASKNEST_PRECACHE_URLS").map_or_else(
            || vec![shell_path.clone()],
            |value| {
                value
                    .split(',')
                    .filter_map(|item| normalize_text_option(Some(item.to_string())))
                    .collect()
            },
        );

        Ok(Self {
            cache_version,
            precache_urls,
            api_pattern: pattern(&lookup, "TASKNEST_API_PATTERN", DEFAULT_API_PATTERN)?,
            static_pattern: pattern(&lookup, "TASKNEST_STATIC_PATTERN", DEFAULT_STATIC_PATTERN)?,
            shell_path,
        })
    }

    #[must_use]
    pub fn with_cache_version(mut self, version: impl Into<String>) -> Self {
        self.cache_version = version.into();
        self
    }

    #[must_use]
    pub fn with_precache_urls(mut self, urls: Vec<String>) -> Self {
        self.precache_urls = urls;
        self
    }
}

fn pattern(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: &str,
) -> Result<Regex, ConfigError> {
    let raw = value_or_default(lookup, name, default);
    Regex::new(&raw).map_err(|error| ConfigError::Invalid(format!("{name} is not a valid regex: {error}")))
}

pub fn value_or_default(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> String {
    optional_trimmed(lookup, name).unwrap_or_else(|| default.to_string())
}

pub fn required_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
) -> Result<String, ConfigError> {
    optional_trimmed(lookup, name).ok_or(ConfigError::MissingVar(name))
}

pub fn optional_trimmed(lookup: impl Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    normalize_text_option(lookup(name))
}
