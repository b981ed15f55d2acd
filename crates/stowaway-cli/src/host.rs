//! The command-line host: configuration loading and the platform services
//! (disk storage, HTTP network, client table, console notifications) the
//! worker runs against.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use stowaway_core::notification::NotificationOptions;
use stowaway_core::sync::QUEUE_FILE;
use stowaway_core::{
    ClientRegistry, DiskStorage, HttpNetwork, Notification, Notifier, RetryQueue, Worker,
    WorkerConfig, WorkerError, WorkerParts,
};
use tracing::debug;
use url::Url;

use crate::args::Cli;

/// Prints notifications to stdout.
#[derive(Debug, Default)]
pub struct ConsoleNotifier {
    next_id: AtomicU64,
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    async fn show(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<Notification, WorkerError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        println!("[notification #{}] {}: {}", id, title, options.body);
        Ok(Notification {
            id,
            title: title.to_string(),
            options,
        })
    }

    async fn close(&self, id: u64) {
        debug!(id, "Notification closed");
    }
}

/// Load the configuration file, then apply environment and flag overrides
/// in that order.
pub fn load_config(cli: &Cli) -> Result<WorkerConfig> {
    let path = match cli.config {
        Some(ref path) => path.clone(),
        None => WorkerConfig::config_path()?,
    };
    let mut config = WorkerConfig::load_from(&path)?;
    config.apply_env()?;

    if let Some(ref tag) = cli.version_tag {
        config.version_tag = tag.clone();
    }
    if let Some(ref origin) = cli.origin {
        config.origin =
            Url::parse(origin).with_context(|| format!("Invalid --origin: {}", origin))?;
    }
    if let Some(ref dir) = cli.cache_dir {
        config.cache_dir = Some(dir.clone());
    }

    debug!(store = %config.cache_name(), origin = %config.origin, "Config loaded");
    Ok(config)
}

pub struct Host {
    pub worker: Worker,
    pub storage: Arc<DiskStorage>,
    pub network: Arc<HttpNetwork>,
    pub queue: Arc<RetryQueue>,
}

impl Host {
    pub fn new(config: WorkerConfig) -> Result<Self> {
        let root = config.cache_root()?;
        let storage = Arc::new(
            DiskStorage::new(root.clone())
                .with_context(|| format!("Failed to open cache root {}", root.display()))?,
        );
        let network = Arc::new(
            HttpNetwork::new(config.origin.clone(), config.request_timeout())
                .context("Failed to create HTTP client")?,
        );
        let queue = Arc::new(
            RetryQueue::load(&root.join(QUEUE_FILE)).context("Failed to load retry queue")?,
        );

        let worker = Worker::new(
            config,
            WorkerParts {
                storage: Arc::clone(&storage) as _,
                network: Arc::clone(&network) as _,
                clients: Arc::new(ClientRegistry::new()),
                notifier: Arc::new(ConsoleNotifier::default()),
                retry_queue: Arc::clone(&queue),
            },
        );

        Ok(Self {
            worker,
            storage,
            network,
            queue,
        })
    }
}
