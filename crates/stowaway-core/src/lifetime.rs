//! Lifetime extension for event handlers.
//!
//! A handler returns as soon as it has its answer, but it may have started
//! work that must still finish (a cache write-back, a notification display).
//! That work is registered on the event's [`Lifetime`]; the host awaits
//! [`Lifetime::settled`] before it treats the event as done or shuts down.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::error;

#[derive(Debug, Clone, Default)]
pub struct Lifetime {
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl Lifetime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` on its own task and keep the event alive until it ends.
    ///
    /// The task is detached from the caller: dropping the caller's future
    /// does not cancel it.
    pub fn wait_until<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(work);
        self.lock().push(handle);
    }

    /// Number of registered tasks not yet collected by `settled`
    pub fn pending(&self) -> usize {
        self.lock().len()
    }

    /// Wait for every registered task, including ones registered while
    /// waiting.
    pub async fn settled(&self) {
        loop {
            let batch: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock());
            if batch.is_empty() {
                return;
            }
            for result in futures::future::join_all(batch).await {
                if let Err(e) = result {
                    error!(error = %e, "Extended task failed");
                }
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        // A panic while holding the lock cannot leave the Vec inconsistent
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_settled_waits_for_all_tasks() {
        let lifetime = Lifetime::new();
        let done = Arc::new(AtomicUsize::new(0));

        for i in 0..3u64 {
            let done = Arc::clone(&done);
            lifetime.wait_until(async move {
                tokio::time::sleep(Duration::from_millis(10 * i)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }

        lifetime.settled().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert_eq!(lifetime.pending(), 0);
    }

    #[tokio::test]
    async fn test_settled_includes_nested_registrations() {
        let lifetime = Lifetime::new();
        let done = Arc::new(AtomicUsize::new(0));

        let inner_lifetime = lifetime.clone();
        let inner_done = Arc::clone(&done);
        lifetime.wait_until(async move {
            let done = Arc::clone(&inner_done);
            inner_lifetime.wait_until(async move {
                done.fetch_add(1, Ordering::SeqCst);
            });
            inner_done.fetch_add(1, Ordering::SeqCst);
        });

        lifetime.settled().await;
        assert_eq!(done.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_poison_settled() {
        let lifetime = Lifetime::new();
        lifetime.wait_until(async { panic!("boom") });
        lifetime.settled().await;
        assert_eq!(lifetime.pending(), 0);
    }
}
