use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::types::{CredentialDescriptor, Slot, UsageSnapshot};

/// Holds the current descriptor list and, per slot, the latest
/// `UsageSnapshot` (spec §4.1).
///
/// `atomic_swap` replaces the entire vector and discards dependent caches;
/// readers always see a consistent pre- or post-swap view, never a partial
/// one, because the swap takes the writer lock for its full duration.
#[derive(Clone)]
pub struct CredentialStore {
    inner: Arc<RwLock<Inner>>,
}

struct Inner {
    descriptors: Vec<CredentialDescriptor>,
    snapshots: HashMap<Slot, UsageSnapshot>,
}

impl CredentialStore {
    pub fn new(descriptors: Vec<CredentialDescriptor>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Inner {
                descriptors,
                snapshots: HashMap::new(),
            })),
        }
    }

    pub async fn list(&self) -> Vec<CredentialDescriptor> {
        self.inner.read().await.descriptors.clone()
    }

    pub async fn get(&self, slot: Slot) -> Option<CredentialDescriptor> {
        self.inner
            .read()
            .await
            .descriptors
            .iter()
            .find(|d| d.slot_index == slot)
            .cloned()
    }

    pub async fn usage(&self, slot: Slot) -> Option<UsageSnapshot> {
        self.inner.read().await.snapshots.get(&slot).cloned()
    }

    /// The sole writer path for usage snapshots; concurrent callers race on
    /// the write lock but never see a torn snapshot.
    pub async fn set_usage(&self, slot: Slot, snapshot: UsageSnapshot) {
        self.inner.write().await.snapshots.insert(slot, snapshot);
    }

    /// Replaces the descriptor list wholesale and drops all usage snapshots,
    /// since they are keyed to the pre-reload slot identities.
    pub async fn atomic_swap(&self, new_descriptors: Vec<CredentialDescriptor>) {
        let mut guard = self.inner.write().await;
        guard.descriptors = new_descriptors;
        guard.snapshots.clear();
    }
}
