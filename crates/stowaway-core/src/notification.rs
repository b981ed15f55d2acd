//! Push notifications.
//!
//! A push payload `{ "title": ..., "body": ... }` becomes a displayed
//! notification; clicking it brings the application to the foreground.
//! Payloads that are missing or malformed are logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use url::Url;

use crate::clients::{ClientInfo, Clients};
use crate::error::WorkerError;

/// Icon shown with every notification
const NOTIFICATION_ICON: &str = "/assets/img/favicon.ico";

/// Vibration pattern in milliseconds: vibrate, pause, vibrate
const VIBRATE_PATTERN: [u32; 3] = [100, 50, 100];

/// Path a notification click navigates to
const CLICK_TARGET_PATH: &str = "/";

/// Expected shape of a push message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PushPayload {
    pub title: String,
    pub body: String,
}

impl PushPayload {
    /// Parse push data, returning None (and logging why) when it is absent
    /// or does not have the expected shape.
    pub fn parse(data: Option<&[u8]>) -> Option<Self> {
        let Some(data) = data else {
            debug!("Push event without data");
            return None;
        };
        match serde_json::from_slice(data) {
            Ok(payload) => Some(payload),
            Err(e) => {
                warn!(error = %e, "Malformed push payload, skipping notification");
                None
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationData {
    /// Milliseconds since the Unix epoch
    pub date_of_arrival: i64,
    pub primary_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
}

impl NotificationOptions {
    pub fn for_payload(payload: &PushPayload) -> Self {
        Self {
            body: payload.body.clone(),
            icon: NOTIFICATION_ICON.to_string(),
            badge: NOTIFICATION_ICON.to_string(),
            vibrate: VIBRATE_PATTERN.to_vec(),
            data: NotificationData {
                date_of_arrival: Utc::now().timestamp_millis(),
                primary_key: "1".to_string(),
            },
        }
    }
}

/// A notification as displayed by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub id: u64,
    pub title: String,
    pub options: NotificationOptions,
}

/// Platform notification display.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn show(
        &self,
        title: &str,
        options: NotificationOptions,
    ) -> Result<Notification, WorkerError>;

    async fn close(&self, id: u64);
}

/// What a notification click ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    Focused(ClientInfo),
    Opened(ClientInfo),
    /// The platform refused to open a window
    NoWindow,
}

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
    clients: Arc<dyn Clients>,
    origin: Url,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>, clients: Arc<dyn Clients>, origin: Url) -> Self {
        Self {
            notifier,
            clients,
            origin,
        }
    }

    /// Handle push data. Returns the displayed notification, or None when
    /// the payload was unusable or display failed.
    pub async fn on_push(&self, data: Option<&[u8]>) -> Option<Notification> {
        let payload = PushPayload::parse(data)?;
        let options = NotificationOptions::for_payload(&payload);
        match self.notifier.show(&payload.title, options).await {
            Ok(notification) => {
                info!(id = notification.id, title = %notification.title, "Notification shown");
                Some(notification)
            }
            Err(e) => {
                warn!(error = %e, "Failed to show notification");
                None
            }
        }
    }

    /// Close the notification, then bring the user to the application root:
    /// focus a window already there, or focus another application window
    /// and navigate it to the root, or open a new window at the root.
    pub async fn on_click(&self, notification: &Notification) -> ClickOutcome {
        info!(id = notification.id, "Notification click received");
        self.notifier.close(notification.id).await;

        let target = match self.origin.join(CLICK_TARGET_PATH) {
            Ok(url) => url,
            Err(_) => self.origin.clone(),
        };

        let windows: Vec<ClientInfo> = self
            .clients
            .match_all()
            .await
            .into_iter()
            .filter(|c| c.url.origin() == self.origin.origin())
            .collect();
        let preferred = windows
            .iter()
            .find(|c| c.url == target)
            .or_else(|| windows.first());

        if let Some(client) = preferred {
            if self.clients.focus(client.id).await {
                let routed = if client.url == target {
                    Some(client.clone())
                } else {
                    self.clients.navigate(client.id, &target).await
                };
                if let Some(mut focused) = routed {
                    focused.focused = true;
                    return ClickOutcome::Focused(focused);
                }
            }
        }

        match self.clients.open_window(&target).await {
            Some(client) => ClickOutcome::Opened(client),
            None => ClickOutcome::NoWindow,
        }
    }
}
