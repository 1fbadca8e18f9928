//! PostgREST client for the remote store

use std::fmt;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteError, RemoteResult, RemoteStore};
use crate::config::RemoteConfig;
use crate::util::{compact_text, is_http_url, normalize_text_option};

const REST_PATH: &str = "rest/v1";

/// [`RemoteStore`] speaking the PostgREST dialect exposed by Supabase.
#[derive(Clone)]
pub struct RestRemoteStore {
    base_url: String,
    anon_key: String,
    access_token: Option<String>,
    client: Client,
}

impl fmt::Debug for RestRemoteStore {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("RestRemoteStore")
            .field("base_url", &self.base_url)
            .field("anon_key", &"[REDACTED]")
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish_non_exhaustive()
    }
}

impl RestRemoteStore {
    pub fn new(url: impl AsRef<str>, anon_key: impl Into<String>) -> RemoteResult<Self> {
        let base_url = normalize_base_url(url.as_ref())?;
        let anon_key = anon_key.into().trim().to_string();
        if anon_key.is_empty() {
            return Err(RemoteError::InvalidConfiguration(
                "anon key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            base_url,
            anon_key,
            access_token: None,
            client: Client::builder().build()?,
        })
    }

    pub fn from_config(config: &RemoteConfig) -> RemoteResult<Self> {
        let store = Self::new(&config.url, config.anon_key.clone())?;
        Ok(match config.access_token.as_deref() {
            Some(token) => store.with_access_token(token),
            None => store,
        })
    }

    /// Authenticate requests as a signed-in user instead of the anon role.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = normalize_text_option(Some(token.into()));
        self
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{REST_PATH}/{table}", self.base_url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self.access_token.as_deref().unwrap_or(&self.anon_key);
        request
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
            .header("Accept", "application/json")
    }

    async fn send(&self, request: RequestBuilder) -> RemoteResult<Option<Value>> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(RemoteError::Api {
                status: status.as_u16(),
                message: parse_api_error(status, &body),
            });
        }

        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))
    }
}

impl RemoteStore for RestRemoteStore {
    async fn select(&self, table: &str, user_id: &str) -> RemoteResult<Vec<Value>> {
        let request = self
            .client
            .get(self.table_url(table))
            .query(&[("user_id", eq_filter(user_id)), ("select", "*".to_string())]);

        match self.send(request).await? {
            Some(Value::Array(rows)) => Ok(rows),
            None => Ok(Vec::new()),
            Some(other) => Err(RemoteError::InvalidPayload(format!(
                "expected an array of {table} rows, got {other}"
            ))),
        }
    }

    async fn insert(&self, table: &str, row: &Value) -> RemoteResult<Option<Value>> {
        let request = self
            .client
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(row);
        Ok(self.send(request).await?.and_then(first_row))
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        user_id: Option<&str>,
        changes: &Value,
    ) -> RemoteResult<Option<Value>> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&row_filter(id, user_id))
            .header("Prefer", "return=representation")
            .json(changes);
        matched_row(table, id, self.send(request).await?).map(Some)
    }

    async fn delete(&self, table: &str, id: &str, user_id: Option<&str>) -> RemoteResult<()> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&row_filter(id, user_id));
        self.send(request).await?;
        Ok(())
    }
}

fn eq_filter(value: &str) -> String {
    format!("eq.{value}")
}

/// Query selecting one row by id, scoped to its owner when known.
fn row_filter(id: &str, user_id: Option<&str>) -> Vec<(&'static str, String)> {
    let mut filter = vec![("id", eq_filter(id))];
    if let Some(user_id) = user_id {
        filter.push(("user_id", eq_filter(user_id)));
    }
    filter
}

/// A PATCH that matches nothing still succeeds, with an empty array.
fn matched_row(table: &str, id: &str, payload: Option<Value>) -> RemoteResult<Value> {
    payload.and_then(first_row).ok_or_else(|| RemoteError::Api {
        status: 404,
        message: format!("No {table} row with id {id}"),
    })
}

/// `return=representation` answers with an array of affected rows.
fn first_row(payload: Value) -> Option<Value> {
    match payload {
        Value::Array(rows) => rows.into_iter().next(),
        Value::Object(_) => Some(payload),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct PostgrestErrorBody {
    message: Option<String>,
    error: Option<String>,
    details: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<PostgrestErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return match payload.details.filter(|details| !details.trim().is_empty()) {
                Some(details) => format!("{} ({}): {}", message.trim(), status.as_u16(), details.trim()),
                None => format!("{} ({})", message.trim(), status.as_u16()),
            };
        }
    }

    let compact = compact_text(body);
    if compact.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact, status.as_u16())
    }
}

fn normalize_base_url(raw: &str) -> RemoteResult<String> {
    let url = normalize_text_option(Some(raw.to_string())).ok_or_else(|| {
        RemoteError::InvalidConfiguration("remote URL must not be empty".to_string())
    })?;
    if !is_http_url(&url) {
        return Err(RemoteError::InvalidConfiguration(
            "remote URL must include http:// or https://".to_string(),
        ));
    }
    Ok(url.trim_end_matches('/').to_string())
}
