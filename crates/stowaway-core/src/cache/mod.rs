//! Versioned response stores.
//!
//! A [`CacheStorage`] is the directory of named stores; a [`Cache`] is one
//! store mapping request identities to whole responses. Stores are named
//! `base_name + version_tag`, so each deployment writes into a store that is
//! disjoint from every earlier one. Entries never expire individually; a
//! store is deleted as a whole when a newer version activates.
//!
//! Two backends:
//! - [`DiskStorage`]: one directory per store under the cache root, durable
//!   across restarts
//! - [`MemoryStorage`]: in-process, used for ephemeral hosts and tests

pub mod disk;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::request::RequestIdentity;
use crate::response::Response;

pub use disk::DiskStorage;
pub use memory::MemoryStorage;

pub type StoreResult<T> = Result<T, StoreError>;

/// A stored response and when it was written.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    pub response: Response,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(response: Response) -> Self {
        Self {
            response,
            stored_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        let now = Utc::now();
        (now - self.stored_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}

/// One named store.
///
/// Writes are last-write-wins per identity; no write depends on an earlier
/// read of the same key, so concurrent writers need no coordination.
#[async_trait]
pub trait Cache: Send + Sync {
    fn name(&self) -> &str;

    /// Look up the stored response for `identity`
    async fn lookup(&self, identity: &RequestIdentity) -> StoreResult<Option<CachedResponse>>;

    /// Store `response` under `identity`, replacing any previous entry
    async fn put(&self, identity: &RequestIdentity, response: Response) -> StoreResult<()>;

    /// Remove one entry. Returns false if there was nothing to remove.
    async fn remove(&self, identity: &RequestIdentity) -> StoreResult<bool>;

    /// All identities currently stored, in no particular order
    async fn keys(&self) -> StoreResult<Vec<RequestIdentity>>;
}

/// The directory of named stores.
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Open the store called `name`, creating it if it does not exist
    async fn open(&self, name: &str) -> StoreResult<Arc<dyn Cache>>;

    async fn has(&self, name: &str) -> StoreResult<bool>;

    /// Names of all existing stores
    async fn keys(&self) -> StoreResult<Vec<String>>;

    /// Delete a store and everything in it. Returns false if it did not exist.
    async fn delete(&self, name: &str) -> StoreResult<bool>;

    /// Name of the store recorded by the last completed activation
    async fn active(&self) -> StoreResult<Option<String>>;

    /// Record `name` as the activated store. Survives restarts for
    /// persistent backends.
    async fn set_active(&self, name: &str) -> StoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ResponseType;
    use chrono::Duration;

    fn cached() -> CachedResponse {
        CachedResponse::new(Response::new(200, ResponseType::Basic, "x"))
    }

    #[test]
    fn test_age_display_just_now() {
        assert_eq!(cached().age_display(), "just now");
    }

    #[test]
    fn test_age_display_rounding() {
        let mut entry = cached();
        entry.stored_at = Utc::now() - Duration::minutes(5);
        assert_eq!(entry.age_display(), "5m ago");

        entry.stored_at = Utc::now() - Duration::minutes(95);
        assert_eq!(entry.age_display(), "2h ago");

        entry.stored_at = Utc::now() - Duration::hours(26);
        assert_eq!(entry.age_display(), "1d ago");

        entry.stored_at = Utc::now() - Duration::hours(40);
        assert_eq!(entry.age_display(), "2d ago");
    }

    #[test]
    fn test_age_display_future_timestamp() {
        let mut entry = cached();
        entry.stored_at = Utc::now() + Duration::minutes(10);
        assert_eq!(entry.age_display(), "just now");
    }
}
