//! Named response caches.

use std::future::Future;

use super::{GatewayResponse, GatewayResult};
use crate::services::LocalStore;

/// Storage for versioned response caches, keyed by cache name and URL.
pub trait CacheStorage: Clone + Send + Sync + 'static {
    fn lookup(
        &self,
        cache: &str,
        url: &str,
    ) -> impl Future<Output = GatewayResult<Option<GatewayResponse>>> + Send;

    fn put(
        &self,
        cache: &str,
        url: &str,
        response: &GatewayResponse,
    ) -> impl Future<Output = GatewayResult<()>> + Send;

    fn cache_names(&self) -> impl Future<Output = GatewayResult<Vec<String>>> + Send;

    /// Drop a whole cache, returning whether it existed.
    fn delete(&self, cache: &str) -> impl Future<Output = GatewayResult<bool>> + Send;
}

/// Response caches persisted in the local store's `cache_entries` table.
#[derive(Clone)]
pub struct LibSqlCacheStorage {
    store: LocalStore,
}

impl LibSqlCacheStorage {
    pub const fn new(store: LocalStore) -> Self {
        Self { store }
    }
}

impl CacheStorage for LibSqlCacheStorage {
    async fn lookup(&self, cache: &str, url: &str) -> GatewayResult<Option<GatewayResponse>> {
        Ok(self
            .store
            .cache_get(cache, url)
            .await?
            .map(|entry| GatewayResponse {
                status: entry.status,
                headers: entry.headers,
                body: entry.body,
            }))
    }

    async fn put(&self, cache: &str, url: &str, response: &GatewayResponse) -> GatewayResult<()> {
        self.store
            .cache_put(cache, url, response.status, &response.headers, &response.body)
            .await?;
        Ok(())
    }

    async fn cache_names(&self) -> GatewayResult<Vec<String>> {
        Ok(self.store.cache_names().await?)
    }

    async fn delete(&self, cache: &str) -> GatewayResult<bool> {
        Ok(self.store.delete_cache(cache).await?)
    }
}
