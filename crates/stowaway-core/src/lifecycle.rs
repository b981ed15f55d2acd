//! Install and activate: the two-phase rollout of a new version.
//!
//! Install opens the store named after the current version and precaches
//! the manifest into it. Activate is the version garbage collector: every
//! store whose name is not the current one is deleted, then open clients are
//! claimed so they use the new version without a reload. Before deleting
//! anything, activation records the current store as the active one; a
//! later process reads that record back in [`LifecycleManager::restore`].
//!
//! Neither phase fails on partial problems. Precache misses are reported and
//! logged; a store that cannot be deleted stays on disk and is retried by the
//! next activation. Install only fails when the store itself cannot be opened.

use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{error, info, warn};

use crate::cache::CacheStorage;
use crate::clients::Clients;
use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::network::Network;
use crate::precache::{PrecacheLoader, PrecacheReport};

/// A freshly installed version supersedes the active one immediately
/// instead of waiting for every client to close.
const SKIP_WAITING: bool = true;

/// Worker lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not installed yet
    Parsed,
    Installing,
    /// Installed, older stores may still exist
    Installed,
    Activating,
    /// Active and controlling clients
    Activated,
    /// Install failed; this version will never activate
    Redundant,
}

impl WorkerState {
    /// Only an active worker intercepts fetches
    pub fn can_intercept_fetch(&self) -> bool {
        matches!(self, WorkerState::Activated)
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Parsed => "parsed",
            WorkerState::Installing => "installing",
            WorkerState::Installed => "installed",
            WorkerState::Activating => "activating",
            WorkerState::Activated => "activated",
            WorkerState::Redundant => "redundant",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone)]
pub struct InstallReport {
    pub store: String,
    pub precache: PrecacheReport,
    /// Activate right away rather than waiting for clients to close
    pub skip_waiting: bool,
}

/// A stale store that could not be deleted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteFailure {
    pub store: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ActivateReport {
    pub current: String,
    pub deleted: Vec<String>,
    pub failed: Vec<DeleteFailure>,
    pub claimed: usize,
}

pub struct LifecycleManager {
    config: Arc<WorkerConfig>,
    storage: Arc<dyn CacheStorage>,
    loader: PrecacheLoader,
    clients: Arc<dyn Clients>,
    state: Mutex<WorkerState>,
}

impl LifecycleManager {
    pub fn new(
        config: Arc<WorkerConfig>,
        storage: Arc<dyn CacheStorage>,
        network: Arc<dyn Network>,
        clients: Arc<dyn Clients>,
    ) -> Self {
        let loader = PrecacheLoader::new(network, config.origin.clone());
        Self {
            config,
            storage,
            loader,
            clients,
            state: Mutex::new(WorkerState::Parsed),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }

    /// Recover the lifecycle state of the current version from what is in
    /// storage. A current store that the last activation recorded is
    /// activated, whatever stale stores are left next to it; a current store
    /// without that record is installed but not yet activated.
    pub async fn restore(&self) -> WorkerResult<WorkerState> {
        let current = self.config.cache_name();
        let names = self.storage.keys().await?;
        let active = self.storage.active().await?;

        let state = if !names.contains(&current) {
            WorkerState::Parsed
        } else if active.as_deref() == Some(current.as_str()) {
            WorkerState::Activated
        } else {
            WorkerState::Installed
        };

        self.set_state(state);
        Ok(state)
    }

    pub async fn install(&self) -> WorkerResult<InstallReport> {
        let store = self.config.cache_name();
        self.set_state(WorkerState::Installing);
        info!(store = %store, "Installing");

        let cache = match self.storage.open(&store).await {
            Ok(cache) => cache,
            Err(e) => {
                error!(store = %store, error = %e, "Failed to open cache store, install aborted");
                self.set_state(WorkerState::Redundant);
                return Err(e.into());
            }
        };

        let precache = self.loader.populate(cache.as_ref(), &self.config.manifest).await;
        if !precache.is_complete() {
            warn!(
                store = %store,
                failed = precache.failed.len(),
                "Failed to cache some resources, continuing install"
            );
        }

        self.set_state(WorkerState::Installed);
        info!(store = %store, stored = precache.stored.len(), "Installed");

        Ok(InstallReport {
            store,
            precache,
            skip_waiting: SKIP_WAITING,
        })
    }

    pub async fn activate(&self) -> WorkerResult<ActivateReport> {
        let current = self.config.cache_name();
        self.set_state(WorkerState::Activating);

        if let Err(e) = self.storage.set_active(&current).await {
            error!(store = %current, error = %e, "Failed to record active store, activation aborted");
            self.set_state(WorkerState::Installed);
            return Err(e.into());
        }

        let names = match self.storage.keys().await {
            Ok(names) => names,
            Err(e) => {
                // Stale stores survive until an activation can list them
                warn!(error = %e, "Failed to enumerate cache stores");
                Vec::new()
            }
        };

        let mut report = ActivateReport {
            current: current.clone(),
            ..ActivateReport::default()
        };

        for name in names.into_iter().filter(|n| *n != current) {
            info!(store = %name, "Deleting old cache");
            match self.storage.delete(&name).await {
                Ok(true) => report.deleted.push(name),
                Ok(false) => {}
                Err(e) => {
                    warn!(store = %name, error = %e, "Failed to delete old cache, will retry on next activation");
                    report.failed.push(DeleteFailure {
                        store: name,
                        reason: e.to_string(),
                    });
                }
            }
        }

        report.claimed = self.clients.claim(&current).await;
        self.set_state(WorkerState::Activated);
        info!(
            store = %current,
            deleted = report.deleted.len(),
            claimed = report.claimed,
            "Activated"
        );

        Ok(report)
    }
}
