//! Request classification and cache naming.

use super::GatewayRequest;
use crate::config::GatewayConfig;

/// Which caching policy handles a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestClass {
    /// Forwarded untouched
    Bypass,
    /// API read: stale-while-revalidate
    ApiRead,
    /// API mutation: network first, queued when offline
    ApiMutation,
    /// Static asset: cache first
    Static,
    /// Page load: network first with cached fallbacks
    Navigation,
    /// Any other read: network only
    NetworkOnly,
}

pub fn static_cache(version: &str) -> String {
    format!("static-{version}")
}

pub fn api_cache(version: &str) -> String {
    format!("api-{version}")
}

pub fn pages_cache(version: &str) -> String {
    format!("pages-{version}")
}

/// Caches a gateway version keeps on activation; every other cache is purged.
pub fn allowed_caches(version: &str) -> [String; 3] {
    [
        static_cache(version),
        api_cache(version),
        pages_cache(version),
    ]
}

pub fn classify(config: &GatewayConfig, request: &GatewayRequest) -> RequestClass {
    if !matches!(request.url.scheme(), "http" | "https") {
        return RequestClass::Bypass;
    }

    let path = request.url.path();
    if config.api_pattern.is_match(path) {
        return if request.is_get() {
            RequestClass::ApiRead
        } else {
            RequestClass::ApiMutation
        };
    }

    if !request.is_get() {
        RequestClass::Bypass
    } else if request.navigation {
        RequestClass::Navigation
    } else if config.static_pattern.is_match(path) {
        RequestClass::Static
    } else {
        RequestClass::NetworkOnly
    }
}
