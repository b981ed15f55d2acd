//! Precache loader: populates the manifest into the store created at install.
//!
//! Population is best effort. Every entry is fetched independently and a
//! failing entry only shows up in the [`PrecacheReport`]; it never prevents
//! the others from being stored.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::Cache;
use crate::network::Network;
use crate::request::{Request, RequestIdentity, RequestMode};
use crate::response::ResponseType;

/// Maximum manifest fetches in flight at once
const MAX_CONCURRENT_PRECACHE: usize = 6;

/// A manifest entry that could not be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecacheFailure {
    pub entry: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrecacheReport {
    pub stored: Vec<RequestIdentity>,
    pub failed: Vec<PrecacheFailure>,
}

impl PrecacheReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct PrecacheLoader {
    network: Arc<dyn Network>,
    origin: Url,
}

impl PrecacheLoader {
    pub fn new(network: Arc<dyn Network>, origin: Url) -> Self {
        Self { network, origin }
    }

    /// Build the install-time request for a manifest entry. Cross-origin
    /// resources are requested in no-cors mode so they can be stored even
    /// though their content cannot be verified.
    fn request_for(&self, entry: &str) -> Result<Request, String> {
        let url = self
            .origin
            .join(entry)
            .map_err(|e| format!("invalid manifest entry: {}", e))?;
        let request = Request::get(url);
        let mode = if request.is_same_origin(&self.origin) {
            RequestMode::SameOrigin
        } else {
            RequestMode::NoCors
        };
        Ok(request.with_mode(mode))
    }

    async fn store_entry(&self, cache: &dyn Cache, entry: &str) -> Result<RequestIdentity, String> {
        let request = self.request_for(entry)?;
        let response = self
            .network
            .fetch(&request)
            .await
            .map_err(|e| e.to_string())?;

        // Opaque responses are stored unverified; anything we can inspect
        // must be a success.
        if response.response_type != ResponseType::Opaque && !response.ok() {
            return Err(format!("HTTP {}", response.status));
        }

        let identity = request.identity();
        cache
            .put(&identity, response)
            .await
            .map_err(|e| e.to_string())?;
        debug!(%identity, "Precached");
        Ok(identity)
    }

    /// Fetch and store every manifest entry into `cache`.
    pub async fn populate(&self, cache: &dyn Cache, manifest: &[String]) -> PrecacheReport {
        info!(store = cache.name(), entries = manifest.len(), "Caching resources");

        let results: Vec<(String, Result<RequestIdentity, String>)> =
            stream::iter(manifest.iter().cloned())
                .map(|entry: String| async move {
                    let result = self.store_entry(cache, &entry).await;
                    (entry, result)
                })
                .buffer_unordered(MAX_CONCURRENT_PRECACHE)
                .collect()
                .await;

        let mut report = PrecacheReport::default();
        for (entry, result) in results {
            match result {
                Ok(identity) => report.stored.push(identity),
                Err(reason) => {
                    warn!(entry = %entry, reason = %reason, "Failed to cache resource");
                    report.failed.push(PrecacheFailure { entry, reason });
                }
            }
        }

        // buffer_unordered completes out of order; keep the report stable
        report.stored.sort();
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStorage, MemoryStorage};
    use crate::error::NetworkError;
    use crate::response::Response;
    use async_trait::async_trait;

    /// Serves anything under /missing as 404, anything under /down as a
    /// transport error, everything else as 200 with the path as body.
    struct FakeNetwork {
        origin: Url,
    }

    #[async_trait]
    impl Network for FakeNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
            let path = request.url.path();
            if path.starts_with("/down") {
                return Err(NetworkError::Unreachable(request.url.to_string()));
            }
            let status = if path.starts_with("/missing") { 404 } else { 200 };
            let response_type = if request.is_same_origin(&self.origin) {
                ResponseType::Basic
            } else if request.mode == RequestMode::NoCors {
                ResponseType::Opaque
            } else {
                ResponseType::Cors
            };
            Ok(Response::new(status, response_type, path.to_string()))
        }
    }

    fn loader() -> PrecacheLoader {
        let origin = Url::parse("https://example.com/").expect("origin");
        PrecacheLoader::new(
            Arc::new(FakeNetwork {
                origin: origin.clone(),
            }),
            origin,
        )
    }

    fn manifest(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_partial_failure_stores_the_rest() {
        let storage = MemoryStorage::new();
        let cache = storage.open("v1").await.expect("open");

        let report = loader()
            .populate(
                cache.as_ref(),
                &manifest(&["/", "/app.js", "/down/x.css", "/missing.png"]),
            )
            .await;

        assert_eq!(report.stored.len(), 2);
        assert_eq!(report.failed.len(), 2);
        assert!(!report.is_complete());
        assert_eq!(cache.keys().await.expect("keys").len(), 2);
    }

    #[tokio::test]
    async fn test_cross_origin_stored_as_opaque_even_on_error_status() {
        let storage = MemoryStorage::new();
        let cache = storage.open("v1").await.expect("open");

        let report = loader()
            .populate(
                cache.as_ref(),
                &manifest(&["https://cdn.example.net/missing/font.css"]),
            )
            .await;

        assert!(report.is_complete());
        let hit = cache
            .lookup(&report.stored[0])
            .await
            .expect("lookup")
            .expect("stored");
        assert_eq!(hit.response.response_type, ResponseType::Opaque);
        assert_eq!(hit.response.status, 404);
    }

    #[tokio::test]
    async fn test_relative_entries_resolve_against_origin() {
        let request = loader().request_for("/assets/css/styles.css").expect("request");
        assert_eq!(request.url.as_str(), "https://example.com/assets/css/styles.css");
        assert_eq!(request.mode, RequestMode::SameOrigin);

        let request = loader()
            .request_for("https://fonts.example.net/css2?family=Montserrat")
            .expect("request");
        assert_eq!(request.mode, RequestMode::NoCors);
    }

    #[tokio::test]
    async fn test_default_manifest_mixes_same_and_cross_origin() {
        let storage = MemoryStorage::new();
        let cache = storage.open("v1").await.expect("open");
        let origin = Url::parse("https://example.com/").expect("origin");
        let config = crate::config::WorkerConfig::new(origin);

        let report = loader().populate(cache.as_ref(), &config.manifest).await;
        assert!(report.is_complete());

        let mut kinds = Vec::new();
        for identity in &report.stored {
            let hit = cache.lookup(identity).await.expect("lookup").expect("stored");
            kinds.push(hit.response.response_type);
        }
        assert!(kinds.contains(&ResponseType::Basic));
        assert!(kinds.contains(&ResponseType::Opaque));
    }

    #[tokio::test]
    async fn test_populate_runs_on_a_spawned_task() {
        let storage = MemoryStorage::new();
        let cache = storage.open("v1").await.expect("open");
        let loader = loader();
        let entries = manifest(&["/", "https://cdn.example.net/icons.css"]);

        let report = tokio::spawn(async move { loader.populate(cache.as_ref(), &entries).await })
            .await
            .expect("join");

        assert_eq!(report.stored.len(), 2);
        assert!(report.is_complete());
    }

    #[tokio::test]
    async fn test_populate_twice_yields_same_keys() {
        let storage = MemoryStorage::new();
        let cache = storage.open("v1").await.expect("open");
        let entries = manifest(&["/", "/index.html", "/down/a.js"]);

        loader().populate(cache.as_ref(), &entries).await;
        let mut first = cache.keys().await.expect("keys");
        loader().populate(cache.as_ref(), &entries).await;
        let mut second = cache.keys().await.expect("keys");

        first.sort();
        second.sort();
        assert_eq!(first, second);
    }
}
