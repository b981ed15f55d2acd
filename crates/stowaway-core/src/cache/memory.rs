//! In-process store directory. Contents vanish with the process.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{Cache, CacheStorage, CachedResponse, StoreResult};
use crate::request::RequestIdentity;
use crate::response::Response;

#[derive(Debug, Default)]
pub struct MemoryStorage {
    stores: RwLock<HashMap<String, Arc<MemoryCache>>>,
    active: RwLock<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn Cache>> {
        let mut stores = self.stores.write().await;
        let cache = stores
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryCache::new(name)));
        Ok(Arc::clone(cache) as Arc<dyn Cache>)
    }

    async fn has(&self, name: &str) -> StoreResult<bool> {
        Ok(self.stores.read().await.contains_key(name))
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let mut names: Vec<String> = self.stores.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn delete(&self, name: &str) -> StoreResult<bool> {
        Ok(self.stores.write().await.remove(name).is_some())
    }

    async fn active(&self) -> StoreResult<Option<String>> {
        Ok(self.active.read().await.clone())
    }

    async fn set_active(&self, name: &str) -> StoreResult<()> {
        *self.active.write().await = Some(name.to_string());
        Ok(())
    }
}

#[derive(Debug)]
pub struct MemoryCache {
    name: String,
    entries: RwLock<HashMap<RequestIdentity, CachedResponse>>,
}

impl MemoryCache {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl Cache for MemoryCache {
    fn name(&self) -> &str {
        &self.name
    }

    async fn lookup(&self, identity: &RequestIdentity) -> StoreResult<Option<CachedResponse>> {
        Ok(self.entries.read().await.get(identity).cloned())
    }

    async fn put(&self, identity: &RequestIdentity, response: Response) -> StoreResult<()> {
        self.entries
            .write()
            .await
            .insert(identity.clone(), CachedResponse::new(response));
        Ok(())
    }

    async fn remove(&self, identity: &RequestIdentity) -> StoreResult<bool> {
        Ok(self.entries.write().await.remove(identity).is_some())
    }

    async fn keys(&self) -> StoreResult<Vec<RequestIdentity>> {
        Ok(self.entries.read().await.keys().cloned().collect())
    }
}
