//! Core library for stowaway - an offline caching intermediary.
//!
//! Every outgoing request of a client application is offered to a
//! [`Worker`], which answers from a versioned on-disk store, forwards to the
//! network and writes the answer back, or passes the request through
//! untouched. Each deployment gets its own store (`base_name + version_tag`);
//! activating a new version deletes every other store.
//!
//! Main pieces:
//! - [`cache`]: the store directory (`CacheStorage`) and the stores (`Cache`)
//! - [`interceptor`]: the cache-first fetch strategy
//! - [`lifecycle`]: install (precache) and activate (version garbage collection)
//! - [`worker`]: the event dispatch table the host drives

pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod fallback;
pub mod interceptor;
pub mod lifecycle;
pub mod lifetime;
pub mod network;
pub mod notification;
pub mod precache;
pub mod request;
pub mod response;
pub mod sync;
pub mod worker;

pub use cache::{Cache, CacheStorage, CachedResponse, DiskStorage, MemoryStorage};
pub use clients::{ClientInfo, ClientRegistry, Clients};
pub use config::WorkerConfig;
pub use error::{NetworkError, StoreError, WorkerError, WorkerResult};
pub use interceptor::{FetchStrategy, Interception, ResponseSource};
pub use lifecycle::{ActivateReport, InstallReport, LifecycleManager, WorkerState};
pub use lifetime::Lifetime;
pub use network::{HttpNetwork, Network};
pub use notification::{
    ClickOutcome, Notification, NotificationDispatcher, NotificationOptions, Notifier, PushPayload,
};
pub use precache::{PrecacheLoader, PrecacheReport};
pub use request::{Destination, Request, RequestIdentity, RequestMode};
pub use response::{Response, ResponseType};
pub use sync::{ReplayReport, RetryQueue, SyncScheduler, BACKGROUND_SYNC_TAG};
pub use worker::{
    Dispatched, Dispatcher, EventHandler, EventKind, EventOutcome, Worker, WorkerEvent, WorkerParts,
};
