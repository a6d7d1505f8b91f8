use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Serializes mutations per container id so two concurrent reports cannot
/// interleave the read-modify-write of the open episode.
#[derive(Default)]
pub struct ContainerLocks {
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

impl ContainerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, container_id: i64) -> OwnedMutexGuard<()> {
        // The shard guard must be released before awaiting.
        let lock = self.locks.entry(container_id).or_default().clone();
        lock.lock_owned().await
    }

    /// Locks several containers in id order to avoid lock-order inversions.
    pub async fn lock_many(&self, container_ids: &[i64]) -> Vec<OwnedMutexGuard<()>> {
        let mut ids = container_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();

        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock(id).await);
        }
        guards
    }

    /// Drops the entry of a deleted container unless someone still waits on it.
    pub fn forget(&self, container_id: i64) {
        self.locks
            .remove_if(&container_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
