//! Deferred retry: background sync tags and the replay queue behind them.
//!
//! Hosts register sync tags. When connectivity returns the host fires a
//! sync event for each tag; the [`BACKGROUND_SYNC_TAG`] replays the
//! [`RetryQueue`] of write requests that failed while offline. Entries
//! replay in submission order and each is removed only once the network
//! confirms it with a 2xx. Replay stops at the first failure so later
//! requests never overtake an earlier one.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{WorkerError, WorkerResult};
use crate::network::Network;
use crate::request::Request;

/// Tag whose sync event replays the retry queue
pub const BACKGROUND_SYNC_TAG: &str = "background-sync";

/// Queue file name in the cache root
pub const QUEUE_FILE: &str = "retry-queue.json";

/// A request waiting to be replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRequest {
    pub id: u64,
    pub method: String,
    pub url: Url,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<Vec<u8>>,
    pub queued_at: DateTime<Utc>,
}

impl QueuedRequest {
    fn to_request(&self) -> WorkerResult<Request> {
        let method = Method::from_bytes(self.method.as_bytes())
            .map_err(|e| WorkerError::Queue(format!("invalid method {}: {}", self.method, e)))?;
        let mut request = Request::get(self.url.clone()).with_method(method);
        request.headers = self.headers.clone();
        request.body = self.body.clone();
        Ok(request)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QueueState {
    next_id: u64,
    entries: VecDeque<QueuedRequest>,
}

/// Outcome of one replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReplayReport {
    pub replayed: usize,
    pub remaining: usize,
}

/// Persistent FIFO of failed write requests.
#[derive(Debug)]
pub struct RetryQueue {
    path: Option<PathBuf>,
    state: Mutex<QueueState>,
}

impl RetryQueue {
    /// A queue that lives only as long as the process
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Load the queue persisted at `path`, or start an empty one there
    pub fn load(path: &Path) -> WorkerResult<Self> {
        let state = if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| WorkerError::Queue(format!("failed to read {}: {}", path.display(), e)))?;
            serde_json::from_str(&contents)
                .map_err(|e| WorkerError::Queue(format!("failed to parse {}: {}", path.display(), e)))?
        } else {
            QueueState::default()
        };
        Ok(Self {
            path: Some(path.to_path_buf()),
            state: Mutex::new(state),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn persist(&self, state: &QueueState) -> WorkerResult<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| WorkerError::Queue(format!("failed to create {}: {}", parent.display(), e)))?;
        }
        let contents = serde_json::to_string_pretty(state)
            .map_err(|e| WorkerError::Queue(e.to_string()))?;
        std::fs::write(path, contents)
            .map_err(|e| WorkerError::Queue(format!("failed to write {}: {}", path.display(), e)))
    }

    /// Append a request. Returns its queue id.
    pub fn enqueue(&self, request: &Request) -> WorkerResult<u64> {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.entries.push_back(QueuedRequest {
            id,
            method: request.method.as_str().to_string(),
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            queued_at: Utc::now(),
        });
        self.persist(&state)?;
        info!(id, method = %request.method, url = %request.url, "Request queued for retry");
        Ok(id)
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queued requests in submission order
    pub fn entries(&self) -> Vec<QueuedRequest> {
        self.lock().entries.iter().cloned().collect()
    }

    fn front(&self) -> Option<QueuedRequest> {
        self.lock().entries.front().cloned()
    }

    fn remove(&self, id: u64) -> WorkerResult<()> {
        let mut state = self.lock();
        state.entries.retain(|e| e.id != id);
        self.persist(&state)
    }

    /// Replay queued requests in order until one fails.
    pub async fn replay(&self, network: &dyn Network) -> WorkerResult<ReplayReport> {
        let mut report = ReplayReport::default();

        while let Some(entry) = self.front() {
            let request = match entry.to_request() {
                Ok(request) => request,
                Err(e) => {
                    // Would never succeed; keeping it would block the queue
                    warn!(id = entry.id, error = %e, "Dropping unreplayable request");
                    self.remove(entry.id)?;
                    continue;
                }
            };

            match network.fetch(&request).await {
                Ok(response) if response.ok() => {
                    debug!(id = entry.id, url = %entry.url, "Replayed queued request");
                    self.remove(entry.id)?;
                    report.replayed += 1;
                }
                Ok(response) => {
                    warn!(id = entry.id, status = response.status, "Replay rejected, keeping request queued");
                    break;
                }
                Err(e) => {
                    warn!(id = entry.id, error = %e, "Replay failed, keeping request queued");
                    break;
                }
            }
        }

        report.remaining = self.len();
        Ok(report)
    }
}

/// Tag registry and sync event handling.
pub struct SyncScheduler {
    tags: Mutex<HashSet<String>>,
    queue: Arc<RetryQueue>,
    network: Arc<dyn Network>,
}

impl SyncScheduler {
    pub fn new(queue: Arc<RetryQueue>, network: Arc<dyn Network>) -> Self {
        Self {
            tags: Mutex::new(HashSet::new()),
            queue,
            network,
        }
    }

    pub fn register(&self, tag: &str) {
        self.tags
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(tag.to_string());
        debug!(tag, "Sync registered");
    }

    pub fn is_registered(&self, tag: &str) -> bool {
        self.tags
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(tag)
    }

    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    /// Run the sync for `tag`. Unknown tags and tags without work resolve
    /// immediately with None.
    pub async fn on_sync(&self, tag: &str) -> WorkerResult<Option<ReplayReport>> {
        if !self.is_registered(tag) {
            debug!(tag, "Sync for unregistered tag ignored");
            return Ok(None);
        }
        if tag != BACKGROUND_SYNC_TAG {
            return Ok(None);
        }
        info!(tag, queued = self.queue.len(), "Background sync triggered");
        self.queue.replay(self.network.as_ref()).await.map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NetworkError;
    use crate::response::{Response, ResponseType};
    use async_trait::async_trait;
    use tempfile::TempDir;

    /// Records replayed URLs; fails any URL containing "fail"
    #[derive(Default)]
    struct RecordingNetwork {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Network for RecordingNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
            self.seen.lock().expect("lock").push(request.url.path().to_string());
            if request.url.path().contains("fail") {
                return Err(NetworkError::Unreachable(request.url.to_string()));
            }
            let status = if request.url.path().contains("reject") { 500 } else { 201 };
            Ok(Response::new(status, ResponseType::Basic, ""))
        }
    }

    fn post(path: &str) -> Request {
        let url = Url::parse("https://example.com/")
            .and_then(|u| u.join(path))
            .expect("url");
        Request::get(url).with_method(Method::POST).with_body("x=1")
    }

    #[tokio::test]
    async fn test_replay_in_order_and_empty_queue() {
        let queue = RetryQueue::in_memory();
        queue.enqueue(&post("/a")).expect("enqueue");
        queue.enqueue(&post("/b")).expect("enqueue");

        let network = RecordingNetwork::default();
        let report = queue.replay(&network).await.expect("replay");

        assert_eq!(report, ReplayReport { replayed: 2, remaining: 0 });
        assert_eq!(*network.seen.lock().expect("lock"), vec!["/a", "/b"]);
        assert!(queue.is_empty());

        let report = queue.replay(&network).await.expect("replay empty");
        assert_eq!(report, ReplayReport::default());
    }

    #[tokio::test]
    async fn test_replay_stops_at_first_failure() {
        let queue = RetryQueue::in_memory();
        queue.enqueue(&post("/a")).expect("enqueue");
        queue.enqueue(&post("/fail")).expect("enqueue");
        queue.enqueue(&post("/c")).expect("enqueue");

        let network = RecordingNetwork::default();
        let report = queue.replay(&network).await.expect("replay");

        assert_eq!(report, ReplayReport { replayed: 1, remaining: 2 });
        assert_eq!(*network.seen.lock().expect("lock"), vec!["/a", "/fail"]);
        let left: Vec<String> = queue.entries().iter().map(|e| e.url.path().to_string()).collect();
        assert_eq!(left, vec!["/fail", "/c"]);
    }

    #[tokio::test]
    async fn test_rejected_status_keeps_entry() {
        let queue = RetryQueue::in_memory();
        queue.enqueue(&post("/reject")).expect("enqueue");
        let report = queue.replay(&RecordingNetwork::default()).await.expect("replay");
        assert_eq!(report, ReplayReport { replayed: 0, remaining: 1 });
    }

    #[test]
    fn test_queue_persists_across_loads() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join(QUEUE_FILE);

        let queue = RetryQueue::load(&path).expect("load");
        queue.enqueue(&post("/a")).expect("enqueue");
        queue.enqueue(&post("/b")).expect("enqueue");

        let reloaded = RetryQueue::load(&path).expect("reload");
        let entries = reloaded.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].method, "POST");
        assert_eq!(entries[0].body.as_deref(), Some(&b"x=1"[..]));

        // ids keep increasing after reload
        let id = reloaded.enqueue(&post("/c")).expect("enqueue");
        assert_eq!(id, 2);
    }

    #[tokio::test]
    async fn test_scheduler_only_runs_registered_tags() {
        let queue = Arc::new(RetryQueue::in_memory());
        queue.enqueue(&post("/a")).expect("enqueue");
        let scheduler = SyncScheduler::new(Arc::clone(&queue), Arc::new(RecordingNetwork::default()));

        assert_eq!(scheduler.on_sync(BACKGROUND_SYNC_TAG).await.expect("sync"), None);
        assert_eq!(queue.len(), 1);

        scheduler.register(BACKGROUND_SYNC_TAG);
        scheduler.register("refresh-feed");
        assert_eq!(scheduler.on_sync("refresh-feed").await.expect("sync"), None);

        let report = scheduler
            .on_sync(BACKGROUND_SYNC_TAG)
            .await
            .expect("sync")
            .expect("replayed");
        assert_eq!(report.replayed, 1);
        assert!(queue.is_empty());
    }
}
