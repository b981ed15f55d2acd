//! Client windows of the hosted application.
//!
//! Activation claims every open client for the new version; a notification
//! click brings one of them to the application root or opens a new window
//! there.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

/// A window of the application known to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub id: u64,
    pub url: Url,
    pub focused: bool,
    /// Store name of the version controlling this client, if any
    pub controller: Option<String>,
}

#[async_trait]
pub trait Clients: Send + Sync {
    /// Put every open client under the control of `version`. Returns how
    /// many clients changed controller.
    async fn claim(&self, version: &str) -> usize;

    /// All open clients
    async fn match_all(&self) -> Vec<ClientInfo>;

    /// Bring a client to the foreground. Returns false if it no longer exists.
    async fn focus(&self, id: u64) -> bool;

    /// Open a new window at `url`
    async fn open_window(&self, url: &Url) -> Option<ClientInfo>;

    /// Load `url` in an existing client. Returns the updated client, or None
    /// if it no longer exists.
    async fn navigate(&self, id: u64, url: &Url) -> Option<ClientInfo>;
}

#[derive(Debug, Default)]
struct RegistryState {
    clients: Vec<ClientInfo>,
    next_id: u64,
}

/// In-process client table. Hosts register windows as they connect.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    state: RwLock<RegistryState>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a window that is already open, uncontrolled
    pub async fn connect(&self, url: Url) -> u64 {
        let mut state = self.state.write().await;
        let id = state.next_id;
        state.next_id += 1;
        state.clients.push(ClientInfo {
            id,
            url,
            focused: false,
            controller: None,
        });
        id
    }

    pub async fn disconnect(&self, id: u64) -> bool {
        let mut state = self.state.write().await;
        let before = state.clients.len();
        state.clients.retain(|c| c.id != id);
        state.clients.len() != before
    }

    pub async fn get(&self, id: u64) -> Option<ClientInfo> {
        self.state
            .read()
            .await
            .clients
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }
}

#[async_trait]
impl Clients for ClientRegistry {
    async fn claim(&self, version: &str) -> usize {
        let mut state = self.state.write().await;
        let mut claimed = 0;
        for client in state.clients.iter_mut() {
            if client.controller.as_deref() != Some(version) {
                client.controller = Some(version.to_string());
                claimed += 1;
            }
        }
        debug!(version, claimed, "Clients claimed");
        claimed
    }

    async fn match_all(&self) -> Vec<ClientInfo> {
        self.state.read().await.clients.clone()
    }

    async fn focus(&self, id: u64) -> bool {
        let mut state = self.state.write().await;
        if !state.clients.iter().any(|c| c.id == id) {
            return false;
        }
        for client in state.clients.iter_mut() {
            client.focused = client.id == id;
        }
        true
    }

    async fn open_window(&self, url: &Url) -> Option<ClientInfo> {
        let mut state = self.state.write().await;
        let id = state.next_id;
        state.next_id += 1;
        for client in state.clients.iter_mut() {
            client.focused = false;
        }
        let client = ClientInfo {
            id,
            url: url.clone(),
            focused: true,
            controller: None,
        };
        state.clients.push(client.clone());
        Some(client)
    }

    async fn navigate(&self, id: u64, url: &Url) -> Option<ClientInfo> {
        let mut state = self.state.write().await;
        let client = state.clients.iter_mut().find(|c| c.id == id)?;
        client.url = url.clone();
        debug!(id, url = %url, "Client navigated");
        Some(client.clone())
    }
}
