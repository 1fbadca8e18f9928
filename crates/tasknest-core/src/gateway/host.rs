//! Gateway lifecycle and fetch interception.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use url::Url;

use super::policy::{allowed_caches, api_cache, classify, pages_cache, static_cache, RequestClass};
use super::upstream::is_hop_by_hop;
use super::{
    CacheStorage, GatewayError, GatewayMessage, GatewayRequest, GatewayResponse, GatewayResult,
    MessageReply, Upstream, CACHE_STATUS_HEADER, SYNC_TAG,
};
use crate::config::GatewayConfig;
use crate::events::{Event, EventChannel};
use crate::models::{Operation, OperationKind, QueuedRequest};
use crate::services::LocalStore;

/// Request headers never persisted with a queued operation.
const UNQUEUED_HEADERS: &[&str] = &["authorization", "apikey", "cookie"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Installing,
    Waiting,
    Active,
    Redundant,
}

#[derive(Default)]
struct Versions {
    installing: Option<String>,
    waiting: Option<Arc<GatewayConfig>>,
    active: Option<Arc<GatewayConfig>>,
    redundant: Vec<String>,
}

/// Hosts gateway versions for one origin and answers intercepted requests
/// with the active version's policies.
pub struct GatewayHost<C, U> {
    origin: Url,
    storage: C,
    upstream: U,
    store: LocalStore,
    events: EventChannel,
    versions: RwLock<Versions>,
}

impl<C: CacheStorage, U: Upstream> GatewayHost<C, U> {
    pub fn new(origin: Url, storage: C, upstream: U, store: LocalStore, events: EventChannel) -> Self {
        Self {
            origin,
            storage,
            upstream,
            store,
            events,
            versions: RwLock::new(Versions::default()),
        }
    }

    pub const fn origin(&self) -> &Url {
        &self.origin
    }

    pub const fn events(&self) -> &EventChannel {
        &self.events
    }

    pub async fn active_version(&self) -> Option<String> {
        self.versions
            .read()
            .await
            .active
            .as_ref()
            .map(|config| config.cache_version.clone())
    }

    pub async fn state_of(&self, version: &str) -> Option<LifecycleState> {
        let versions = self.versions.read().await;
        let is = |slot: &Option<Arc<GatewayConfig>>| {
            slot.as_ref()
                .is_some_and(|config| config.cache_version == version)
        };

        if is(&versions.active) {
            Some(LifecycleState::Active)
        } else if is(&versions.waiting) {
            Some(LifecycleState::Waiting)
        } else if versions.installing.as_deref() == Some(version) {
            Some(LifecycleState::Installing)
        } else if versions.redundant.iter().any(|old| old == version) {
            Some(LifecycleState::Redundant)
        } else {
            None
        }
    }

    // ---------------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------------

    /// Install a version: pre-cache its static assets, then activate it when
    /// nothing is active or park it as waiting.
    ///
    /// A failed install leaves the previously installed versions untouched.
    pub async fn install(&self, config: GatewayConfig) -> GatewayResult<LifecycleState> {
        let version = config.cache_version.clone();
        if let Some(state) = self.state_of(&version).await {
            if matches!(state, LifecycleState::Active | LifecycleState::Waiting) {
                tracing::debug!("Gateway {version} is already {state:?}");
                return Ok(state);
            }
        }

        self.versions.write().await.installing = Some(version.clone());
        tracing::info!("Installing gateway {version}");

        if let Err(error) = self.precache(&config).await {
            self.versions.write().await.installing = None;
            if let Err(cleanup) = self.storage.delete(&static_cache(&version)).await {
                tracing::warn!("Failed to drop partial cache of {version}: {cleanup}");
            }
            tracing::warn!("Install of gateway {version} failed: {error}");
            return Err(GatewayError::InstallFailed {
                version,
                reason: error.to_string(),
            });
        }

        self.events.emit(&Event::GatewayInstalled {
            version: version.clone(),
        });

        let mut versions = self.versions.write().await;
        versions.installing = None;
        let config = Arc::new(config);
        if versions.active.is_none() {
            self.activate(&mut versions, config).await?;
            return Ok(LifecycleState::Active);
        }

        if let Some(previous) = versions.waiting.replace(config) {
            self.retire(&mut versions, &previous.cache_version);
        }
        tracing::info!("Gateway {version} installed and waiting");
        self.events.emit(&Event::UpdateAvailable { version });
        Ok(LifecycleState::Waiting)
    }

    /// Promote the waiting version. Returns false when nothing was waiting.
    pub async fn skip_waiting(&self) -> GatewayResult<bool> {
        let mut versions = self.versions.write().await;
        let Some(waiting) = versions.waiting.take() else {
            return Ok(false);
        };
        self.activate(&mut versions, waiting).await?;
        Ok(true)
    }

    async fn precache(&self, config: &GatewayConfig) -> GatewayResult<()> {
        let cache = static_cache(&config.cache_version);
        for path in &config.precache_urls {
            let url = self.resolve(path)?;
            let request = GatewayRequest::get(url.as_str())?;
            let response = self.upstream.fetch(&request).await?;
            if !response.is_success() {
                return Err(GatewayError::Network(format!(
                    "{url} answered {}",
                    response.status
                )));
            }
            self.storage.put(&cache, url.as_str(), &response).await?;
        }
        Ok(())
    }

    async fn activate(
        &self,
        versions: &mut Versions,
        config: Arc<GatewayConfig>,
    ) -> GatewayResult<()> {
        let version = config.cache_version.clone();
        if let Some(previous) = versions.active.replace(config) {
            self.retire(versions, &previous.cache_version);
        }
        tracing::info!("Gateway {version} activated");
        self.events.emit(&Event::GatewayActivated {
            version: version.clone(),
        });
        self.purge_caches(&version).await
    }

    fn retire(&self, versions: &mut Versions, version: &str) {
        versions.redundant.push(version.to_string());
        self.events.emit(&Event::GatewayRedundant {
            version: version.to_string(),
        });
    }

    async fn purge_caches(&self, version: &str) -> GatewayResult<()> {
        let allowed = allowed_caches(version);
        for name in self.storage.cache_names().await? {
            if !allowed.contains(&name) {
                self.storage.delete(&name).await?;
                tracing::info!("Deleted stale cache {name}");
            }
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Messages and background sync
    // ---------------------------------------------------------------------

    pub async fn handle_message(&self, message: GatewayMessage) -> MessageReply {
        match message {
            GatewayMessage::SkipWaiting => match self.skip_waiting().await {
                Ok(activated) => MessageReply::ok()
                    .with("activated", activated)
                    .with("version", self.active_version().await),
                Err(error) => MessageReply::error(error.to_string()),
            },
            GatewayMessage::ClearCache => match self.clear_caches().await {
                Ok(cleared) => MessageReply::ok().with("cleared", cleared),
                Err(error) => MessageReply::error(error.to_string()),
            },
            GatewayMessage::QueueOfflineOperation { operation } => {
                match self.enqueue(operation).await {
                    Ok(operation) => {
                        MessageReply::ok().with("operationId", operation.id.to_string())
                    }
                    Err(error) => MessageReply::error(error.to_string()),
                }
            }
            GatewayMessage::SyncOfflineOperations => {
                self.request_sync();
                MessageReply::ok()
            }
        }
    }

    /// Handle a background-sync trigger. Unknown tags are ignored.
    pub fn background_sync(&self, tag: &str) -> bool {
        if tag != SYNC_TAG {
            tracing::debug!("Ignoring background sync tag {tag}");
            return false;
        }
        self.request_sync();
        true
    }

    fn request_sync(&self) {
        self.events.emit(&Event::SyncRequested {
            tag: SYNC_TAG.to_string(),
        });
    }

    async fn clear_caches(&self) -> GatewayResult<usize> {
        let mut cleared = 0;
        for name in self.storage.cache_names().await? {
            if self.storage.delete(&name).await? {
                cleared += 1;
            }
        }
        tracing::info!("Cleared {cleared} caches");
        Ok(cleared)
    }

    async fn enqueue(&self, operation: Operation) -> GatewayResult<Operation> {
        self.store.enqueue(&operation).await?;
        tracing::warn!(
            "Queued offline {} on {} as {}",
            operation.kind,
            operation.table,
            operation.id
        );
        self.events.emit(&Event::OperationQueued {
            operation_id: operation.id,
            table: operation.table.clone(),
        });
        Ok(operation)
    }

    // ---------------------------------------------------------------------
    // Fetch
    // ---------------------------------------------------------------------

    /// Answer an intercepted request. Failures become synthetic responses.
    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        let active = self.versions.read().await.active.clone();
        let Some(config) = active else {
            return self.forward(&request).await;
        };

        match classify(&config, &request) {
            RequestClass::Bypass => self.forward(&request).await,
            RequestClass::ApiRead => self.stale_while_revalidate(&config, request).await,
            RequestClass::ApiMutation => self.network_or_queue(&config, &request).await,
            RequestClass::Static => self.cache_first(&config, &request).await,
            RequestClass::Navigation => self.navigate(&config, &request).await,
            RequestClass::NetworkOnly => match self.upstream.fetch(&request).await {
                Ok(response) => response,
                Err(error) => {
                    tracing::debug!("{} {} failed: {error}", request.method, request.url);
                    GatewayResponse::offline_text()
                }
            },
        }
    }

    async fn forward(&self, request: &GatewayRequest) -> GatewayResponse {
        match self.upstream.fetch(request).await {
            Ok(response) => response,
            Err(error) => GatewayResponse::bad_gateway(&error.to_string()),
        }
    }

    async fn cached(&self, cache: &str, url: &str) -> Option<GatewayResponse> {
        match self.storage.lookup(cache, url).await {
            Ok(hit) => hit,
            Err(error) => {
                tracing::warn!("Cache lookup in {cache} failed: {error}");
                None
            }
        }
    }

    async fn remember(&self, cache: &str, url: &str, response: &GatewayResponse) {
        if let Err(error) = self.storage.put(cache, url, response).await {
            tracing::warn!("Failed to cache {url} in {cache}: {error}");
        }
    }

    async fn stale_while_revalidate(
        &self,
        config: &GatewayConfig,
        request: GatewayRequest,
    ) -> GatewayResponse {
        let cache = api_cache(&config.cache_version);
        let key = request.url.to_string();

        if let Some(hit) = self.cached(&cache, &key).await {
            let storage = self.storage.clone();
            let upstream = self.upstream.clone();
            tokio::spawn(async move {
                match upstream.fetch(&request).await {
                    Ok(fresh) if fresh.is_success() => {
                        if let Err(error) = storage.put(&cache, &key, &fresh).await {
                            tracing::warn!("Failed to refresh {key}: {error}");
                        }
                    }
                    Ok(fresh) => tracing::debug!("Refresh of {key} answered {}", fresh.status),
                    Err(error) => tracing::debug!("Refresh of {key} failed: {error}"),
                }
            });
            return hit.with_header(CACHE_STATUS_HEADER, "hit");
        }

        match self.upstream.fetch(&request).await {
            Ok(response) => {
                if response.is_success() {
                    self.remember(&cache, &key, &response).await;
                }
                response.with_header(CACHE_STATUS_HEADER, "miss")
            }
            Err(error) => {
                tracing::debug!("API read {key} failed offline: {error}");
                GatewayResponse::offline_api()
            }
        }
    }

    async fn network_or_queue(
        &self,
        config: &GatewayConfig,
        request: &GatewayRequest,
    ) -> GatewayResponse {
        let error = match self.upstream.fetch(request).await {
            Ok(response) => return response,
            Err(error) => error,
        };
        tracing::debug!("{} {} failed: {error}", request.method, request.url);

        let queued = match operation_from_request(config, request) {
            Ok(operation) => self.enqueue(operation).await,
            Err(error) => Err(error),
        };
        match queued {
            Ok(operation) => GatewayResponse::queued(&operation.id.to_string()),
            Err(error) => {
                tracing::error!("Could not queue {} {}: {error}", request.method, request.url);
                GatewayResponse::offline_api()
            }
        }
    }

    async fn cache_first(&self, config: &GatewayConfig, request: &GatewayRequest) -> GatewayResponse {
        let cache = static_cache(&config.cache_version);
        let key = request.url.to_string();
        if let Some(hit) = self.cached(&cache, &key).await {
            return hit.with_header(CACHE_STATUS_HEADER, "hit");
        }

        match self.upstream.fetch(request).await {
            Ok(response) => {
                if response.is_success() {
                    self.remember(&cache, &key, &response).await;
                }
                response.with_header(CACHE_STATUS_HEADER, "miss")
            }
            Err(error) => {
                tracing::debug!("Static asset {key} unavailable: {error}");
                GatewayResponse::offline_text()
            }
        }
    }

    async fn navigate(&self, config: &GatewayConfig, request: &GatewayRequest) -> GatewayResponse {
        let pages = pages_cache(&config.cache_version);
        let key = request.url.to_string();
        let shell = self.resolve(&config.shell_path).ok().map(|url| url.to_string());

        match self.upstream.fetch(request).await {
            Ok(response) if response.is_success() => {
                self.remember(&pages, &key, &response).await;
                if let Some(shell) = shell.as_deref() {
                    self.remember(&pages, shell, &response).await;
                }
                return response;
            }
            Ok(response) => return response,
            Err(error) => tracing::debug!("Navigation to {key} offline: {error}"),
        }

        let mut fallbacks = vec![(pages.clone(), key)];
        if let Some(shell) = shell {
            fallbacks.push((pages, shell.clone()));
            fallbacks.push((static_cache(&config.cache_version), shell));
        }
        for (cache, url) in fallbacks {
            if let Some(hit) = self.cached(&cache, &url).await {
                return hit.with_header(CACHE_STATUS_HEADER, "fallback");
            }
        }
        GatewayResponse::offline_page()
    }

    fn resolve(&self, path: &str) -> GatewayResult<Url> {
        self.origin
            .join(path)
            .map_err(|error| GatewayError::InvalidRequest(format!("{path}: {error}")))
    }
}

/// Turn an intercepted API mutation into a queued operation.
fn operation_from_request(
    config: &GatewayConfig,
    request: &GatewayRequest,
) -> GatewayResult<Operation> {
    let kind = OperationKind::from_method(&request.method).ok_or_else(|| {
        GatewayError::InvalidRequest(format!("{} cannot be queued", request.method))
    })?;

    let path = request.url.path();
    let table = config
        .api_pattern
        .find(path)
        .and_then(|prefix| path[prefix.end()..].split('/').find(|segment| !segment.is_empty()))
        .ok_or_else(|| GatewayError::InvalidRequest(format!("no table in {path}")))?
        .to_string();

    let payload = request.json_body();
    let record_id = request
        .url
        .query_pairs()
        .find(|(key, _)| key == "id")
        .map(|(_, value)| value.trim_start_matches("eq.").to_string())
        .or_else(|| payload.get("id").and_then(Value::as_str).map(str::to_string));
    let user_id = payload
        .get("user_id")
        .and_then(Value::as_str)
        .map(str::to_string);

    let headers: BTreeMap<String, String> = request
        .headers
        .iter()
        .filter(|(name, _)| {
            !is_hop_by_hop(name)
                && !UNQUEUED_HEADERS
                    .iter()
                    .any(|secret| secret.eq_ignore_ascii_case(name))
        })
        .map(|(name, value)| (name.to_ascii_lowercase(), value.clone()))
        .collect();

    let mut operation = Operation::new(kind, table, payload).with_request(QueuedRequest {
        method: request.method.clone(),
        url: request.url.to_string(),
        headers,
        body: request
            .body
            .as_deref()
            .map(|body| String::from_utf8_lossy(body).into_owned()),
    });
    if let Some(record_id) = record_id {
        operation = operation.with_record_id(record_id);
    }
    if let Some(user_id) = user_id {
        operation = operation.with_user_id(user_id);
    }
    Ok(operation)
}
