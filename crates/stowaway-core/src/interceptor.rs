//! The per-request fetch strategy: cache first, network fallback, write back
//! on success.
//!
//! For every request:
//! 1. Non-GET requests pass through untouched.
//! 2. Requests matching an exclusion pattern pass through, so live APIs
//!    always reflect server state and are never cached.
//! 3. A hit in the current store is returned as-is. There is no freshness
//!    check; staleness is bounded by version rollover only.
//! 4. On a miss the network is asked. A cacheable answer is written back on a
//!    separate task tracked by the event's [`Lifetime`] and returned without
//!    waiting for the write.
//! 5. If the network fails, navigations get the offline page; every other
//!    request sees the error.

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::cache::{CacheStorage, CachedResponse};
use crate::config::WorkerConfig;
use crate::error::NetworkError;
use crate::fallback::offline_page;
use crate::lifetime::Lifetime;
use crate::network::Network;
use crate::request::{Request, RequestIdentity};
use crate::response::{Response, ResponseType};

/// Where an answered response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Cache,
    Network,
    OfflineFallback,
}

/// Result of offering a request to the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum Interception {
    /// The worker answered the request
    Respond {
        response: Response,
        source: ResponseSource,
    },
    /// The worker declined; the host performs the request itself
    PassThrough,
}

impl Interception {
    pub fn response(&self) -> Option<&Response> {
        match self {
            Interception::Respond { response, .. } => Some(response),
            Interception::PassThrough => None,
        }
    }

    pub fn source(&self) -> Option<ResponseSource> {
        match self {
            Interception::Respond { source, .. } => Some(*source),
            Interception::PassThrough => None,
        }
    }
}

pub struct FetchStrategy {
    config: Arc<WorkerConfig>,
    storage: Arc<dyn CacheStorage>,
    network: Arc<dyn Network>,
}

impl FetchStrategy {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
    ) -> Self {
        Self {
            config,
            storage,
            network,
        }
    }

    /// Whether the worker takes part in this request at all
    pub fn intercepts(&self, request: &Request) -> bool {
        request.method == reqwest::Method::GET && !self.config.is_excluded(&request.url)
    }

    /// Only complete same-origin 200s are written back. Opaque and error
    /// responses never are, and neither is anything over the size cap.
    fn is_cacheable(&self, response: &Response) -> bool {
        response.status == 200
            && response.response_type == ResponseType::Basic
            && self.config.within_size_cap(response.body_len())
    }

    /// A failed lookup is logged and treated as a miss.
    async fn lookup(&self, identity: &RequestIdentity) -> Option<CachedResponse> {
        let name = self.config.cache_name();
        let cache = match self.storage.open(&name).await {
            Ok(cache) => cache,
            Err(e) => {
                warn!(store = %name, error = %e, "Cache store unavailable, going to network");
                return None;
            }
        };
        match cache.lookup(identity).await {
            Ok(hit) => hit,
            Err(e) => {
                warn!(%identity, error = %e, "Cache lookup failed, going to network");
                None
            }
        }
    }

    fn write_back(&self, identity: RequestIdentity, response: Response, lifetime: &Lifetime) {
        let storage = Arc::clone(&self.storage);
        let name = self.config.cache_name();
        lifetime.wait_until(async move {
            let result = match storage.open(&name).await {
                Ok(cache) => cache.put(&identity, response).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => debug!(store = %name, %identity, "Cached network response"),
                Err(e) => warn!(store = %name, %identity, error = %e, "Failed to cache network response"),
            }
        });
    }

    /// Handle one request. Errors are only returned for failed non-navigation
    /// requests.
    pub async fn handle(
        &self,
        request: &Request,
        lifetime: &Lifetime,
    ) -> Result<Interception, NetworkError> {
        if !self.intercepts(request) {
            debug!(method = %request.method, url = %request.url, "Passing through");
            return Ok(Interception::PassThrough);
        }

        let identity = request.identity();
        if let Some(hit) = self.lookup(&identity).await {
            debug!(url = %request.url, age = %hit.age_display(), "Serving from cache");
            return Ok(Interception::Respond {
                response: hit.response,
                source: ResponseSource::Cache,
            });
        }

        debug!(url = %request.url, "Fetching from network");
        match self.network.fetch(request).await {
            Ok(response) => {
                if self.is_cacheable(&response) {
                    self.write_back(identity, response.clone(), lifetime);
                } else {
                    debug!(
                        url = %request.url,
                        status = response.status,
                        kind = %response.response_type,
                        bytes = response.body_len(),
                        "Response not cacheable"
                    );
                }
                Ok(Interception::Respond {
                    response,
                    source: ResponseSource::Network,
                })
            }
            Err(e) => {
                error!(url = %request.url, error = %e, "Fetch failed");
                if request.destination.is_navigation() {
                    Ok(Interception::Respond {
                        response: offline_page(&self.config.app_name),
                        source: ResponseSource::OfflineFallback,
                    })
                } else {
                    Err(e)
                }
            }
        }
    }
}
