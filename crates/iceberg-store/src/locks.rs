//! Per-CID write serialization.
//!
//! Every mutation of a post (its insert, its votes and reports, its level)
//! runs while holding that post's lock. Writes on different posts proceed
//! concurrently.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use iceberg_core::Cid;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Proof that the holder is the only writer of a post.
pub type CidGuard = OwnedMutexGuard<Cid>;

/// Table of lazily created per-CID mutexes.
///
/// Entries are weak: a mutex lives only as long as someone holds or awaits
/// it, and dead entries are swept as the table grows.
#[derive(Default)]
pub struct CidLocks {
    table: parking_lot::Mutex<HashMap<Cid, Weak<Mutex<Cid>>>>,
}

const SWEEP_THRESHOLD: usize = 1024;

impl CidLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `cid`.
    pub async fn lock(&self, cid: Cid) -> CidGuard {
        let mutex = {
            let mut table = self.table.lock();
            if table.len() >= SWEEP_THRESHOLD {
                table.retain(|_, weak| weak.strong_count() > 0);
            }
            match table.get(&cid).and_then(Weak::upgrade) {
                Some(mutex) => mutex,
                None => {
                    let mutex = Arc::new(Mutex::new(cid));
                    table.insert(cid, Arc::downgrade(&mutex));
                    mutex
                }
            }
        };

        match mutex.clone().try_lock_owned() {
            Ok(guard) => guard,
            Err(_) => mutex.lock_owned().await,
        }
    }

    /// Number of live entries. Test hook.
    #[cfg(test)]
    fn live(&self) -> usize {
        self.table
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_cid_is_exclusive() {
        let locks = Arc::new(CidLocks::new());
        let cid = Cid::from_bytes([1; 32]);
        let guard = locks.lock(cid).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move { *locks.lock(cid).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        assert_eq!(contender.await.unwrap(), cid);
    }

    #[tokio::test]
    async fn test_different_cids_do_not_block() {
        let locks = CidLocks::new();
        let _a = locks.lock(Cid::from_bytes([1; 32])).await;
        let b = tokio::time::timeout(
            Duration::from_millis(100),
            locks.lock(Cid::from_bytes([2; 32])),
        )
        .await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_entries_die_with_guards() {
        let locks = CidLocks::new();
        {
            let _guard = locks.lock(Cid::from_bytes([3; 32])).await;
            assert_eq!(locks.live(), 1);
        }
        assert_eq!(locks.live(), 0);
    }
}
