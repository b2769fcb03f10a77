//! In-process serialisation of replaces per term revision

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

type RevisionKey = (String, i32);

/// One async mutex per `(term, revision)` pair
#[derive(Default)]
pub struct TermLocks {
    inner: Mutex<HashMap<RevisionKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl TermLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a term revision
    pub async fn lock(&self, numero_termo: &str, aditivo: i32) -> OwnedMutexGuard<()> {
        let mutex = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // Drop entries nobody holds or waits on
            map.retain(|_, m| Arc::strong_count(m) > 1);
            Arc::clone(map.entry((numero_termo.to_string(), aditivo)).or_default())
        };
        mutex.lock_owned().await
    }

    /// Number of revisions currently locked or waited on
    #[cfg(test)]
    fn active(&self) -> usize {
        let map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        map.values().filter(|m| Arc::strong_count(m) > 1).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_revision_is_exclusive() {
        let locks = Arc::new(TermLocks::new());
        let guard = locks.lock("T-001", 0).await;

        let other = Arc::clone(&locks);
        let waiter = tokio::spawn(async move {
            let _g = other.lock("T-001", 0).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_different_revisions_do_not_block() {
        let locks = TermLocks::new();
        let _a = locks.lock("T-001", 0).await;
        let _b = locks.lock("T-001", 1).await;
        assert_eq!(locks.active(), 2);
    }
}
