//! Event dispatch.
//!
//! The host drives the worker by dispatching typed [`WorkerEvent`]s. Each
//! event kind maps to one handler in an explicit table; handlers get the
//! event and a [`Lifetime`] on which to register work that must finish
//! after they return. [`Dispatched::settled`] waits for that work.
//!
//! [`Worker`] wires the standard handlers (lifecycle, fetch strategy, sync,
//! notifications) into a [`Dispatcher`].

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::interceptor::{FetchStrategy, Interception};
use crate::lifecycle::{ActivateReport, InstallReport, LifecycleManager, WorkerState};
use crate::lifetime::Lifetime;
use crate::network::Network;
use crate::notification::{ClickOutcome, Notification, NotificationDispatcher, Notifier};
use crate::request::Request;
use crate::sync::{ReplayReport, RetryQueue, SyncScheduler, BACKGROUND_SYNC_TAG};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Install,
    Activate,
    Fetch,
    Sync,
    Push,
    NotificationClick,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Install => "install",
            EventKind::Activate => "activate",
            EventKind::Fetch => "fetch",
            EventKind::Sync => "sync",
            EventKind::Push => "push",
            EventKind::NotificationClick => "notificationclick",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Sync { tag: String },
    Push { data: Option<Vec<u8>> },
    NotificationClick(Notification),
}

impl WorkerEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            WorkerEvent::Install => EventKind::Install,
            WorkerEvent::Activate => EventKind::Activate,
            WorkerEvent::Fetch(_) => EventKind::Fetch,
            WorkerEvent::Sync { .. } => EventKind::Sync,
            WorkerEvent::Push { .. } => EventKind::Push,
            WorkerEvent::NotificationClick(_) => EventKind::NotificationClick,
        }
    }
}

#[derive(Debug, Clone)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivateReport),
    Fetched(Interception),
    Synced(Option<ReplayReport>),
    Pushed(Option<Notification>),
    Clicked(ClickOutcome),
    /// No handler is registered for the event kind
    Unhandled,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: WorkerEvent, lifetime: &Lifetime) -> WorkerResult<EventOutcome>;
}

/// Result of a dispatch: the handler's answer, available immediately, and
/// the lifetime of the work it left running.
#[derive(Debug)]
pub struct Dispatched {
    pub outcome: EventOutcome,
    lifetime: Lifetime,
}

impl Dispatched {
    /// Wait until every task the handler extended the event with is done
    pub async fn settled(&self) {
        self.lifetime.settled().await;
    }

    pub fn lifetime(&self) -> &Lifetime {
        &self.lifetime
    }
}

#[derive(Default)]
pub struct Dispatcher {
    handlers: HashMap<EventKind, Arc<dyn EventHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `kind`, replacing any earlier one
    pub fn on(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) -> &mut Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handles(&self, kind: EventKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub async fn dispatch(&self, event: WorkerEvent) -> WorkerResult<Dispatched> {
        let kind = event.kind();
        let lifetime = Lifetime::new();
        let outcome = match self.handlers.get(&kind) {
            Some(handler) => handler.handle(event, &lifetime).await?,
            None if kind == EventKind::Fetch => EventOutcome::Fetched(Interception::PassThrough),
            None => {
                debug!(event = %kind, "No handler registered");
                EventOutcome::Unhandled
            }
        };
        Ok(Dispatched { outcome, lifetime })
    }
}

// ===== Standard handlers =====

struct LifecycleHandler {
    lifecycle: Arc<LifecycleManager>,
}

#[async_trait]
impl EventHandler for LifecycleHandler {
    async fn handle(&self, event: WorkerEvent, _lifetime: &Lifetime) -> WorkerResult<EventOutcome> {
        match event {
            WorkerEvent::Install => Ok(EventOutcome::Installed(self.lifecycle.install().await?)),
            WorkerEvent::Activate => Ok(EventOutcome::Activated(self.lifecycle.activate().await?)),
            _ => Ok(EventOutcome::Unhandled),
        }
    }
}

/// The fetch strategy, gated on the worker being active.
struct FetchHandler {
    lifecycle: Arc<LifecycleManager>,
    strategy: FetchStrategy,
}

#[async_trait]
impl EventHandler for FetchHandler {
    async fn handle(&self, event: WorkerEvent, lifetime: &Lifetime) -> WorkerResult<EventOutcome> {
        let WorkerEvent::Fetch(request) = event else {
            return Ok(EventOutcome::Unhandled);
        };
        if !self.lifecycle.state().can_intercept_fetch() {
            debug!(url = %request.url, state = %self.lifecycle.state(), "Worker not active, passing through");
            return Ok(EventOutcome::Fetched(Interception::PassThrough));
        }
        let interception = self.strategy.handle(&request, lifetime).await?;
        Ok(EventOutcome::Fetched(interception))
    }
}

struct SyncHandler {
    scheduler: Arc<SyncScheduler>,
}

#[async_trait]
impl EventHandler for SyncHandler {
    async fn handle(&self, event: WorkerEvent, _lifetime: &Lifetime) -> WorkerResult<EventOutcome> {
        match event {
            WorkerEvent::Sync { tag } => Ok(EventOutcome::Synced(self.scheduler.on_sync(&tag).await?)),
            _ => Ok(EventOutcome::Unhandled),
        }
    }
}

struct NotificationHandler {
    dispatcher: Arc<NotificationDispatcher>,
}

#[async_trait]
impl EventHandler for NotificationHandler {
    async fn handle(&self, event: WorkerEvent, _lifetime: &Lifetime) -> WorkerResult<EventOutcome> {
        match event {
            WorkerEvent::Push { data } => Ok(EventOutcome::Pushed(
                self.dispatcher.on_push(data.as_deref()).await,
            )),
            WorkerEvent::NotificationClick(notification) => Ok(EventOutcome::Clicked(
                self.dispatcher.on_click(&notification).await,
            )),
            _ => Ok(EventOutcome::Unhandled),
        }
    }
}

/// Platform services a worker runs against.
pub struct WorkerParts {
    pub storage: Arc<dyn CacheStorage>,
    pub network: Arc<dyn Network>,
    pub clients: Arc<dyn Clients>,
    pub notifier: Arc<dyn Notifier>,
    pub retry_queue: Arc<RetryQueue>,
}

/// A fully wired worker for one version.
pub struct Worker {
    config: Arc<WorkerConfig>,
    lifecycle: Arc<LifecycleManager>,
    scheduler: Arc<SyncScheduler>,
    dispatcher: Dispatcher,
}

impl Worker {
    pub fn new(config: WorkerConfig, parts: WorkerParts) -> Self {
        let config = Arc::new(config);

        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::clone(&config),
            Arc::clone(&parts.storage),
            Arc::clone(&parts.network),
            Arc::clone(&parts.clients),
        ));
        let strategy = FetchStrategy::new(
            Arc::clone(&config),
            Arc::clone(&parts.storage),
            Arc::clone(&parts.network),
        );
        let scheduler = Arc::new(SyncScheduler::new(parts.retry_queue, Arc::clone(&parts.network)));
        scheduler.register(BACKGROUND_SYNC_TAG);
        let notifications = Arc::new(NotificationDispatcher::new(
            parts.notifier,
            parts.clients,
            config.origin.clone(),
        ));

        let lifecycle_handler: Arc<dyn EventHandler> = Arc::new(LifecycleHandler {
            lifecycle: Arc::clone(&lifecycle),
        });
        let notification_handler: Arc<dyn EventHandler> = Arc::new(NotificationHandler {
            dispatcher: notifications,
        });

        let mut dispatcher = Dispatcher::new();
        dispatcher
            .on(EventKind::Install, Arc::clone(&lifecycle_handler))
            .on(EventKind::Activate, lifecycle_handler)
            .on(
                EventKind::Fetch,
                Arc::new(FetchHandler {
                    lifecycle: Arc::clone(&lifecycle),
                    strategy,
                }),
            )
            .on(
                EventKind::Sync,
                Arc::new(SyncHandler {
                    scheduler: Arc::clone(&scheduler),
                }),
            )
            .on(EventKind::Push, Arc::clone(&notification_handler))
            .on(EventKind::NotificationClick, notification_handler);

        Self {
            config,
            lifecycle,
            scheduler,
            dispatcher,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    pub fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    /// Pick up the lifecycle state left in storage by an earlier process
    pub async fn restore(&self) -> WorkerResult<WorkerState> {
        self.lifecycle.restore().await
    }

    pub async fn dispatch(&self, event: WorkerEvent) -> WorkerResult<Dispatched> {
        self.dispatcher.dispatch(event).await
    }

    /// Install, then activate straight away when the install asks to skip
    /// waiting. Returns the activation report if activation ran.
    pub async fn roll_out(&self) -> WorkerResult<(InstallReport, Option<ActivateReport>)> {
        let installed = self.dispatch(WorkerEvent::Install).await?;
        installed.settled().await;
        let EventOutcome::Installed(install) = installed.outcome else {
            return Ok((empty_install(&self.config), None));
        };

        if !install.skip_waiting {
            return Ok((install, None));
        }

        info!(store = %install.store, "Skipping wait, activating now");
        let activated = self.dispatch(WorkerEvent::Activate).await?;
        activated.settled().await;
        match activated.outcome {
            EventOutcome::Activated(report) => Ok((install, Some(report))),
            _ => Ok((install, None)),
        }
    }
}

fn empty_install(config: &WorkerConfig) -> InstallReport {
    InstallReport {
        store: config.cache_name(),
        precache: Default::default(),
        skip_waiting: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::clients::ClientRegistry;
    use crate::error::{NetworkError, WorkerError};
    use crate::interceptor::ResponseSource;
    use crate::notification::NotificationOptions;
    use crate::response::{Response, ResponseType};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use url::Url;

    struct SwitchNetwork {
        offline: AtomicBool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Network for SwitchNetwork {
        async fn fetch(&self, request: &Request) -> Result<Response, NetworkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.offline.load(Ordering::SeqCst) {
                return Err(NetworkError::Unreachable(request.url.to_string()));
            }
            Ok(Response::new(200, ResponseType::Basic, request.url.path().to_string()))
        }
    }

    struct SilentNotifier;

    #[async_trait]
    impl Notifier for SilentNotifier {
        async fn show(
            &self,
            title: &str,
            options: NotificationOptions,
        ) -> Result<Notification, WorkerError> {
            Ok(Notification {
                id: 1,
                title: title.to_string(),
                options,
            })
        }

        async fn close(&self, _id: u64) {}
    }

    fn worker(tag: &str, storage: Arc<MemoryStorage>, network: Arc<SwitchNetwork>) -> Worker {
        let config = WorkerConfig::new(Url::parse("https://example.com/").expect("origin"))
            .with_version_tag(tag)
            .with_manifest(["/", "/index.html"]);
        Worker::new(
            config,
            WorkerParts {
                storage,
                network,
                clients: Arc::new(ClientRegistry::new()),
                notifier: Arc::new(SilentNotifier),
                retry_queue: Arc::new(RetryQueue::in_memory()),
            },
        )
    }

    fn network() -> Arc<SwitchNetwork> {
        Arc::new(SwitchNetwork {
            offline: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        })
    }

    fn get(path: &str) -> WorkerEvent {
        let url = Url::parse("https://example.com/")
            .and_then(|u| u.join(path))
            .expect("url");
        WorkerEvent::Fetch(Request::get(url))
    }

    #[tokio::test]
    async fn test_fetch_passes_through_until_activated() {
        let worker = worker("v1", Arc::new(MemoryStorage::new()), network());
        let dispatched = worker.dispatch(get("/app.js")).await.expect("dispatch");
        assert!(matches!(
            dispatched.outcome,
            EventOutcome::Fetched(Interception::PassThrough)
        ));

        worker.roll_out().await.expect("roll out");
        assert_eq!(worker.state(), WorkerState::Activated);

        let dispatched = worker.dispatch(get("/app.js")).await.expect("dispatch");
        assert!(matches!(
            dispatched.outcome,
            EventOutcome::Fetched(Interception::Respond { .. })
        ));
    }

    #[tokio::test]
    async fn test_precached_resource_served_offline() {
        let net = network();
        let worker = worker("v1", Arc::new(MemoryStorage::new()), Arc::clone(&net));
        worker.roll_out().await.expect("roll out");
        net.offline.store(true, Ordering::SeqCst);
        let calls_before = net.calls.load(Ordering::SeqCst);

        let dispatched = worker.dispatch(get("/index.html")).await.expect("dispatch");
        match dispatched.outcome {
            EventOutcome::Fetched(interception) => {
                assert_eq!(interception.source(), Some(ResponseSource::Cache))
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(net.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn test_version_rollover_purges_previous_store() {
        let storage = Arc::new(MemoryStorage::new());
        let v1 = worker("v1", Arc::clone(&storage), network());
        v1.roll_out().await.expect("v1");
        v1.dispatch(get("/late.js"))
            .await
            .expect("dispatch")
            .settled()
            .await;

        let v2 = worker("v2", Arc::clone(&storage), network());
        let (_, activation) = v2.roll_out().await.expect("v2");
        let activation = activation.expect("activated");

        assert_eq!(activation.deleted, vec!["stowaway-v1".to_string()]);
        assert_eq!(storage.keys().await.expect("keys"), vec!["stowaway-v2".to_string()]);
    }

    #[tokio::test]
    async fn test_restore_picks_up_activated_store() {
        let storage = Arc::new(MemoryStorage::new());
        worker("v1", Arc::clone(&storage), network())
            .roll_out()
            .await
            .expect("roll out");

        let restarted = worker("v1", storage, network());
        assert_eq!(restarted.restore().await.expect("restore"), WorkerState::Activated);
    }

    #[tokio::test]
    async fn test_push_and_sync_events() {
        let worker = worker("v1", Arc::new(MemoryStorage::new()), network());

        let pushed = worker
            .dispatch(WorkerEvent::Push {
                data: Some(br#"{"title":"t"}"#.to_vec()),
            })
            .await
            .expect("malformed push is not an error");
        assert!(matches!(pushed.outcome, EventOutcome::Pushed(None)));

        let synced = worker
            .dispatch(WorkerEvent::Sync {
                tag: BACKGROUND_SYNC_TAG.to_string(),
            })
            .await
            .expect("sync");
        assert!(matches!(
            synced.outcome,
            EventOutcome::Synced(Some(ReplayReport { replayed: 0, remaining: 0 }))
        ));
    }

    #[tokio::test]
    async fn test_empty_dispatcher() {
        let dispatcher = Dispatcher::new();
        assert!(!dispatcher.handles(EventKind::Push));
        let outcome = dispatcher
            .dispatch(WorkerEvent::Install)
            .await
            .expect("dispatch")
            .outcome;
        assert!(matches!(outcome, EventOutcome::Unhandled));

        let outcome = dispatcher.dispatch(get("/")).await.expect("dispatch").outcome;
        assert!(matches!(outcome, EventOutcome::Fetched(Interception::PassThrough)));
    }
}
