use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tasknest_core::gateway::{
    GatewayHost, GatewayMessage, GatewayRequest, GatewayResponse, LibSqlCacheStorage,
    LifecycleState, MessageReply, Upstream,
};
use tasknest_core::{
    Event, EventChannel, LocalStore, RestRemoteStore, SyncEngine, SyncError, SyncResult,
    SyncStatus,
};
use tower_http::trace::TraceLayer;
use url::Url;

use crate::config::AppConfig;
use crate::error::AppError;

/// Response headers recomputed by the HTTP server.
const SERVER_MANAGED_HEADERS: &[&str] = &["connection", "content-length", "transfer-encoding"];

pub struct AppState<U> {
    pub config: Arc<AppConfig>,
    store: LocalStore,
    host: Arc<GatewayHost<LibSqlCacheStorage, U>>,
    engine: Option<Arc<SyncEngine<RestRemoteStore>>>,
}

impl<U> Clone for AppState<U> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            store: self.store.clone(),
            host: Arc::clone(&self.host),
            engine: self.engine.clone(),
        }
    }
}

impl<U: Upstream> AppState<U> {
    pub fn new(config: Arc<AppConfig>, store: LocalStore, upstream: U) -> Result<Self, AppError> {
        let events = EventChannel::new();
        let host = GatewayHost::new(
            config.upstream_url.clone(),
            LibSqlCacheStorage::new(store.clone()),
            upstream,
            store.clone(),
            events.clone(),
        );

        let engine = match &config.remote {
            Some(remote) => {
                let remote = RestRemoteStore::from_config(remote)
                    .map_err(|error| AppError::internal(error.to_string()))?;
                Some(Arc::new(SyncEngine::new(store.clone(), remote, events)))
            }
            None => None,
        };

        Ok(Self {
            config,
            store,
            host: Arc::new(host),
            engine,
        })
    }

    pub const fn host(&self) -> &Arc<GatewayHost<LibSqlCacheStorage, U>> {
        &self.host
    }

    /// Install the configured version, activating it when nothing is active.
    pub async fn install_configured_version(&self) -> Result<LifecycleState, AppError> {
        Ok(self.host.install(self.config.gateway.clone()).await?)
    }

    /// Run a sync pass whenever the host asks for one.
    ///
    /// Returns false when no remote store or user is configured.
    pub fn watch_sync_requests(&self) -> bool {
        let (Some(engine), Some(user_id)) = (self.engine.clone(), self.config.sync_user()) else {
            tracing::info!("Background sync disabled: no remote store or user configured");
            return false;
        };

        let user_id = user_id.to_string();
        let runtime = tokio::runtime::Handle::current();
        self.host
            .events()
            .subscribe(move |event| {
                let Event::SyncRequested { tag } = event else {
                    return;
                };
                tracing::info!("Sync requested by {tag}");
                let engine = Arc::clone(&engine);
                let user_id = user_id.clone();
                runtime.spawn(async move {
                    match engine.perform_sync(&user_id).await {
                        Ok(result) => tracing::info!(
                            "Background sync finished: {} ({} synced, {} failed)",
                            result.outcome(),
                            result.synced,
                            result.failed
                        ),
                        Err(SyncError::InProgress) => {
                            tracing::debug!("Background sync skipped: a pass is running");
                        }
                        Err(error) => tracing::warn!("Background sync failed: {error}"),
                    }
                });
            })
            .detach();
        true
    }

    fn sync_target(&self) -> Result<(&Arc<SyncEngine<RestRemoteStore>>, &str), AppError> {
        match (&self.engine, self.config.sync_user()) {
            (Some(engine), Some(user_id)) => Ok((engine, user_id)),
            _ => Err(AppError::SyncNotConfigured),
        }
    }
}

pub fn app_router<U: Upstream>(state: AppState<U>) -> Router {
    let control_routes = Router::new()
        .route("/healthz", get(healthz::<U>))
        .route("/status", get(status::<U>))
        .route("/message", post(message::<U>))
        .route("/sync", post(sync_now::<U>))
        .route("/background-sync", post(background_sync::<U>))
        .route("/install", post(install::<U>));

    Router::new()
        .nest("/__gateway", control_routes)
        .fallback(proxy::<U>)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
    active_version: Option<String>,
    sync_enabled: bool,
    sync_in_progress: bool,
}

async fn healthz<U: Upstream>(State(state): State<AppState<U>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
        active_version: state.host.active_version().await,
        sync_enabled: state.sync_target().is_ok(),
        sync_in_progress: state
            .engine
            .as_ref()
            .is_some_and(|engine| engine.is_sync_in_progress()),
    })
}

async fn status<U: Upstream>(
    State(state): State<AppState<U>>,
) -> Result<Json<SyncStatus>, AppError> {
    let (engine, user_id) = state.sync_target()?;
    Ok(Json(engine.sync_status(user_id).await?))
}

async fn message<U: Upstream>(
    State(state): State<AppState<U>>,
    Json(message): Json<GatewayMessage>,
) -> Json<MessageReply> {
    Json(state.host.handle_message(message).await)
}

async fn sync_now<U: Upstream>(
    State(state): State<AppState<U>>,
) -> Result<Json<SyncResult>, AppError> {
    let (engine, user_id) = state.sync_target()?;
    let result = engine.perform_sync(user_id).await?;
    tracing::info!(
        endpoint = "sync",
        outcome = %result.outcome(),
        synced = result.synced,
        failed = result.failed,
        "Sync pass finished"
    );
    Ok(Json(result))
}

#[derive(Debug, Deserialize)]
struct BackgroundSyncRequest {
    tag: String,
}

#[derive(Debug, Serialize)]
struct BackgroundSyncResponse {
    accepted: bool,
}

async fn background_sync<U: Upstream>(
    State(state): State<AppState<U>>,
    Json(request): Json<BackgroundSyncRequest>,
) -> Json<BackgroundSyncResponse> {
    Json(BackgroundSyncResponse {
        accepted: state.host.background_sync(&request.tag),
    })
}

#[derive(Debug, Deserialize)]
struct InstallRequest {
    cache_version: String,
    #[serde(default)]
    precache_urls: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct InstallResponse {
    version: String,
    state: LifecycleState,
}

async fn install<U: Upstream>(
    State(state): State<AppState<U>>,
    Json(request): Json<InstallRequest>,
) -> Result<Json<InstallResponse>, AppError> {
    let version = request.cache_version.trim().to_string();
    if version.is_empty() || version.contains(char::is_whitespace) {
        return Err(AppError::bad_request(
            "cache_version must be a non-empty token",
        ));
    }

    let mut config = state.config.gateway.clone().with_cache_version(&version);
    if let Some(urls) = request.precache_urls {
        config = config.with_precache_urls(urls);
    }
    let lifecycle = state.host.install(config).await?;
    Ok(Json(InstallResponse {
        version,
        state: lifecycle,
    }))
}

async fn proxy<U: Upstream>(
    State(state): State<AppState<U>>,
    request: Request,
) -> Result<Response, AppError> {
    let request =
        to_gateway_request(&state.config.upstream_url, request, state.config.max_body_bytes)
            .await?;
    into_axum_response(state.host.handle(request).await)
}

/// Rebase an incoming request onto the upstream origin.
pub async fn to_gateway_request(
    upstream: &Url,
    request: Request,
    max_body_bytes: usize,
) -> Result<GatewayRequest, AppError> {
    let (parts, body) = request.into_parts();
    let path_and_query = parts
        .uri
        .path_and_query()
        .map_or("/", |path_and_query| path_and_query.as_str());
    let url = upstream
        .join(path_and_query)
        .map_err(|error| AppError::bad_request(format!("{path_and_query}: {error}")))?;

    let headers = parts
        .headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect::<Vec<_>>();
    let navigation = GatewayRequest::looks_like_navigation(&headers);

    let bytes = axum::body::to_bytes(body, max_body_bytes)
        .await
        .map_err(|_| AppError::PayloadTooLarge(max_body_bytes))?;

    let mut gateway_request = GatewayRequest::new(parts.method.as_str(), url.as_str())?;
    gateway_request.headers = headers;
    if !bytes.is_empty() {
        gateway_request = gateway_request.with_body(bytes.to_vec());
    }
    if navigation {
        gateway_request = gateway_request.as_navigation();
    }
    Ok(gateway_request)
}

pub fn into_axum_response(response: GatewayResponse) -> Result<Response, AppError> {
    let status = StatusCode::from_u16(response.status)
        .map_err(|error| AppError::internal(format!("upstream status: {error}")))?;

    let mut builder = axum::http::Response::builder().status(status);
    for (name, value) in &response.headers {
        if SERVER_MANAGED_HEADERS
            .iter()
            .any(|managed| managed.eq_ignore_ascii_case(name))
        {
            continue;
        }
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder
        .body(Body::from(response.body))
        .map_err(|error| AppError::internal(format!("response headers: {error}")))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Mutex, PoisonError};

    use axum::http::header;
    use serde_json::{json, Value};
    use tasknest_core::gateway::{GatewayError, GatewayResult, CACHE_STATUS_HEADER, SYNC_TAG};
    use tower::ServiceExt;

    use super::*;

    #[derive(Clone, Default)]
    struct FakeUpstream {
        offline: Arc<AtomicBool>,
        routes: Arc<Mutex<HashMap<String, (u16, String)>>>,
    }

    impl FakeUpstream {
        fn with_route(self, path: &str, status: u16, body: &str) -> Self {
            self.routes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(path.to_string(), (status, body.to_string()));
            self
        }

        fn go_offline(&self) {
            self.offline.store(true, Ordering::SeqCst);
        }
    }

    impl Upstream for FakeUpstream {
        async fn fetch(&self, request: &GatewayRequest) -> GatewayResult<GatewayResponse> {
            if self.offline.load(Ordering::SeqCst) {
                return Err(GatewayError::Network("connection refused".to_string()));
            }
            let routes = self.routes.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(routes.get(request.url.path()).map_or_else(
                || GatewayResponse::new(404, "missing"),
                |(status, body)| GatewayResponse::new(*status, body.clone()),
            ))
        }
    }

    async fn test_state(upstream: FakeUpstream) -> AppState<FakeUpstream> {
        let config = AppConfig::from_lookup(|key| match key {
            "TASKNEST_UPSTREAM_URL" => Some("https://app.test".to_string()),
            _ => None,
        })
        .unwrap();
        let store = LocalStore::open_in_memory().await.unwrap();
        AppState::new(Arc::new(config), store, upstream).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn json_request(method: &str, uri: &str, body: &Value) -> Request {
        axum::http::Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn healthz_reports_active_version() {
        let upstream = FakeUpstream::default().with_route("/", 200, "<html>shell</html>");
        let state = test_state(upstream).await;
        assert_eq!(
            state.install_configured_version().await.unwrap(),
            LifecycleState::Active
        );

        let response = app_router(state)
            .oneshot(
                axum::http::Request::builder()
                    .uri("/__gateway/healthz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["active_version"], "v1");
        assert_eq!(body["sync_enabled"], false);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn proxy_passes_online_requests_through() {
        let upstream = FakeUpstream::default()
            .with_route("/", 200, "<html>shell</html>")
            .with_route("/about", 200, "about page");
        let state = test_state(upstream).await;
        state.install_configured_version().await.unwrap();

        let response = app_router(state)
            .oneshot(axum::http::Request::builder().uri("/about").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"about page");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_mutation_is_queued() {
        let upstream = FakeUpstream::default().with_route("/", 200, "<html>shell</html>");
        let state = test_state(upstream.clone()).await;
        state.install_configured_version().await.unwrap();
        upstream.go_offline();

        let store = state.store.clone();
        let response = app_router(state)
            .oneshot(json_request(
                "POST",
                "/rest/v1/tasks",
                &json!({"id": "task-1", "user_id": "user-1", "title": "Offline"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body = body_json(response).await;
        assert_eq!(body["queued"], true);

        let operations = store.operations().await.unwrap();
        assert_eq!(operations.len(), 1);
        assert_eq!(operations[0].table, "tasks");
        assert_eq!(operations[0].record_id.as_deref(), Some("task-1"));
        assert_eq!(operations[0].id.to_string(), body["operationId"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_api_read_is_served_from_cache() {
        let upstream = FakeUpstream::default()
            .with_route("/", 200, "<html>shell</html>")
            .with_route("/rest/v1/lists", 200, r#"[{"id":"1"}]"#);
        let state = test_state(upstream.clone()).await;
        state.install_configured_version().await.unwrap();
        let router = app_router(state);

        let first = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/rest/v1/lists")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(first.status(), StatusCode::OK);

        upstream.go_offline();
        let second = router
            .oneshot(
                axum::http::Request::builder()
                    .uri("/rest/v1/lists")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(
            second
                .headers()
                .get(CACHE_STATUS_HEADER)
                .and_then(|value| value.to_str().ok()),
            Some("hit")
        );
        assert_eq!(body_json(second).await, json!([{"id": "1"}]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn message_endpoint_clears_caches() {
        let upstream = FakeUpstream::default().with_route("/", 200, "<html>shell</html>");
        let state = test_state(upstream).await;
        state.install_configured_version().await.unwrap();

        let response = app_router(state)
            .oneshot(json_request(
                "POST",
                "/__gateway/message",
                &json!({"type": "CLEAR_CACHE"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["cleared"], 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn install_endpoint_parks_new_version_as_waiting() {
        let upstream = FakeUpstream::default().with_route("/", 200, "<html>shell</html>");
        let state = test_state(upstream).await;
        state.install_configured_version().await.unwrap();

        let response = app_router(state.clone())
            .oneshot(json_request(
                "POST",
                "/__gateway/install",
                &json!({"cache_version": "v2"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["state"], "waiting");
        assert_eq!(state.host().active_version().await.as_deref(), Some("v1"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sync_endpoints_require_remote_configuration() {
        let state = test_state(FakeUpstream::default()).await;
        assert!(!state.watch_sync_requests());
        let router = app_router(state);

        let sync = router
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/__gateway/sync")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(sync.status(), StatusCode::SERVICE_UNAVAILABLE);

        let background = router
            .oneshot(json_request(
                "POST",
                "/__gateway/background-sync",
                &json!({"tag": SYNC_TAG}),
            ))
            .await
            .unwrap();
        assert_eq!(background.status(), StatusCode::OK);
        assert_eq!(body_json(background).await["accepted"], true);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn to_gateway_request_rebases_onto_upstream() {
        let upstream = Url::parse("https://app.test").unwrap();
        let request = axum::http::Request::builder()
            .method("GET")
            .uri("/lists?filter=open")
            .header(header::ACCEPT, "text/html,application/xhtml+xml")
            .body(Body::empty())
            .unwrap();

        let converted = to_gateway_request(&upstream, request, 1024).await.unwrap();

        assert_eq!(converted.method, "GET");
        assert_eq!(converted.url.as_str(), "https://app.test/lists?filter=open");
        assert!(converted.navigation);
        assert!(converted.body.is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn to_gateway_request_rejects_oversized_bodies() {
        let upstream = Url::parse("https://app.test").unwrap();
        let request = json_request("POST", "/rest/v1/tasks", &json!({"title": "x".repeat(64)}));

        let error = to_gateway_request(&upstream, request, 16).await.unwrap_err();
        assert!(matches!(error, AppError::PayloadTooLarge(16)));
    }

    #[test]
    fn into_axum_response_drops_server_managed_headers() {
        let response = GatewayResponse::new(203, "cached")
            .with_header("content-length", "999")
            .with_header(CACHE_STATUS_HEADER, "hit");

        let converted = into_axum_response(response).unwrap();
        assert_eq!(converted.status(), StatusCode::NON_AUTHORITATIVE_INFORMATION);
        assert!(converted.headers().get("content-length").is_none());
        assert_eq!(
            converted.headers().get(CACHE_STATUS_HEADER).unwrap(),
            "hit"
        );
    }
}
