use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::model::SlotKey;

/// One async mutex per slot key. Admissions for the same slot queue up behind
/// each other; admissions for different slots never touch the same lock.
///
/// The returned guard is owned, so dropping it (normal return, `?`, or the
/// caller's future being cancelled) always releases the slot.
#[derive(Default)]
pub struct SlotGuards {
    locks: DashMap<SlotKey, Arc<Mutex<()>>>,
}

impl SlotGuards {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &SlotKey) -> OwnedMutexGuard<()> {
        // Clone the Arc out first; the shard lock must not be held across the await.
        let lock = self.locks.entry(*key).or_default().clone();
        lock.lock_owned().await
    }

    /// Number of slot keys that have ever been locked.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
