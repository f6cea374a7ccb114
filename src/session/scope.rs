//! Cancellation scope
//!
//! One scope per gateway instance. Every session pipeline started by that
//! instance observes it; tripping the scope terminates all of them.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::info;

struct ScopeInner {
    name: String,
    tx: watch::Sender<bool>,
}

/// Shared shutdown switch
#[derive(Clone)]
pub struct CancellationScope {
    inner: Arc<ScopeInner>,
}

impl CancellationScope {
    pub fn new(name: impl Into<String>) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            inner: Arc::new(ScopeInner {
                name: name.into(),
                tx,
            }),
        }
    }

    /// Trip the scope. Returns true if this call performed the shutdown.
    pub fn shutdown(&self) -> bool {
        let was_shutdown = self.inner.tx.send_replace(true);
        if !was_shutdown {
            info!("Shutting down gateway scope '{}'", self.inner.name);
        }
        !was_shutdown
    }

    pub fn is_shutdown(&self) -> bool {
        *self.inner.tx.borrow()
    }

    /// Resolves once the scope has been shut down
    pub async fn cancelled(&self) {
        let mut rx = self.inner.tx.subscribe();
        // The sender lives in `inner`, so the channel cannot close under us
        let _ = rx.wait_for(|shutdown| *shutdown).await;
    }
}

impl std::fmt::Debug for CancellationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationScope")
            .field("name", &self.inner.name)
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_shutdown_is_idempotent() {
        let scope = CancellationScope::new("test");
        assert!(!scope.is_shutdown());
        assert!(scope.shutdown());
        assert!(!scope.shutdown());
        assert!(scope.is_shutdown());
    }

    #[tokio::test]
    async fn test_cancelled_wakes_observers() {
        let scope = CancellationScope::new("test");
        let observer = {
            let scope = scope.clone();
            tokio::spawn(async move { scope.cancelled().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        scope.shutdown();
        tokio::time::timeout(Duration::from_secs(1), observer)
            .await
            .expect("observer not woken")
            .unwrap();
    }

    #[tokio::test]
    async fn test_late_observer_sees_shutdown() {
        let scope = CancellationScope::new("test");
        scope.shutdown();
        tokio::time::timeout(Duration::from_millis(100), scope.cancelled())
            .await
            .expect("late observer should complete immediately");
    }
}
