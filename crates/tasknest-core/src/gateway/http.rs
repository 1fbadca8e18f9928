//! Transport-neutral request and response values.

use serde_json::{json, Value};
use url::Url;

use super::{GatewayError, GatewayResult};

/// Response header telling clients where a response came from.
pub const CACHE_STATUS_HEADER: &str = "x-tasknest-cache";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayRequest {
    pub method: String,
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Top-level page load rather than a subresource fetch
    pub navigation: bool,
}

impl GatewayRequest {
    pub fn new(method: impl Into<String>, url: &str) -> GatewayResult<Self> {
        let url = Url::parse(url)
            .map_err(|error| GatewayError::InvalidRequest(format!("{url}: {error}")))?;
        Ok(Self {
            method: method.into().to_ascii_uppercase(),
            url,
            headers: Vec::new(),
            body: None,
            navigation: false,
        })
    }

    pub fn get(url: &str) -> GatewayResult<Self> {
        Self::new("GET", url)
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    #[must_use]
    pub const fn as_navigation(mut self) -> Self {
        self.navigation = true;
        self
    }

    pub fn is_get(&self) -> bool {
        self.method == "GET"
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Whether the request headers describe a page navigation.
    pub fn looks_like_navigation(headers: &[(String, String)]) -> bool {
        if let Some(mode) = find_header(headers, "sec-fetch-mode") {
            return mode.eq_ignore_ascii_case("navigate");
        }
        find_header(headers, "accept").is_some_and(|accept| accept.contains("text/html"))
    }

    /// The request body parsed as JSON, `null` when absent or not JSON.
    pub fn json_body(&self) -> Value {
        self.body
            .as_deref()
            .and_then(|body| serde_json::from_slice(body).ok())
            .unwrap_or(Value::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl GatewayResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    pub fn json(status: u16, value: &Value) -> Self {
        Self::new(status, value.to_string()).with_header("content-type", "application/json")
    }

    pub fn html(status: u16, body: &str) -> Self {
        Self::new(status, body).with_header("content-type", "text/html; charset=utf-8")
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        self.headers
            .retain(|(existing, _)| !existing.eq_ignore_ascii_case(&name));
        self.headers.push((name, value.into()));
        self
    }

    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Synthetic answer for an API read that missed the cache while offline.
    pub fn offline_api() -> Self {
        Self::json(
            503,
            &json!({
                "error": "offline",
                "message": "No network connection and no cached response available",
            }),
        )
        .with_header(CACHE_STATUS_HEADER, "offline")
    }

    /// Synthetic answer for a mutation queued while offline.
    pub fn queued(operation_id: &str) -> Self {
        Self::json(202, &json!({"queued": true, "operationId": operation_id}))
            .with_header(CACHE_STATUS_HEADER, "queued")
    }

    /// Minimal page shown when neither the network nor any cache can serve
    /// a navigation.
    pub fn offline_page() -> Self {
        Self::html(
            503,
            "<!doctype html><html><head><meta charset=\"utf-8\"><title>Offline</title></head>\
             <body><h1>You are offline</h1><p>TaskNest will reconnect automatically.</p></body></html>",
        )
        .with_header(CACHE_STATUS_HEADER, "offline")
    }

    pub fn offline_text() -> Self {
        Self::new(503, "Offline")
            .with_header("content-type", "text/plain; charset=utf-8")
            .with_header(CACHE_STATUS_HEADER, "offline")
    }

    pub fn bad_gateway(reason: &str) -> Self {
        Self::new(502, format!("Bad gateway: {reason}"))
            .with_header("content-type", "text/plain; charset=utf-8")
    }
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}
