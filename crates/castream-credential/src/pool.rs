use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::RwLock;

use crate::types::{PoolSlot, Slot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted;

/// Round-robin selector with per-slot failure counters (spec §4.6).
///
/// Failure counters are **per refresh attempt**, not per request: a cached
/// hit never touches `mark_failure`/`mark_success`.
pub struct CredentialPool {
    slots: RwLock<Vec<PoolSlot>>,
    max_retries: u32,
    access_cursor: AtomicUsize,
    refresh_cursor: AtomicUsize,
}

impl CredentialPool {
    pub fn new(slots: Vec<PoolSlot>, max_retries: u32) -> Self {
        Self {
            slots: RwLock::new(slots),
            max_retries,
            access_cursor: AtomicUsize::new(0),
            refresh_cursor: AtomicUsize::new(0),
        }
    }

    pub async fn len(&self) -> usize {
        self.slots.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Monotonically advances the access cursor, skipping dead slots. Used
    /// purely to round-robin over *already-cached* credentials.
    pub async fn next_access_slot(&self) -> Option<Slot> {
        self.next_alive_slot(&self.access_cursor).await
    }

    /// Same cursor discipline, used when refreshing. Returns `Exhausted`
    /// when every slot is dead.
    pub async fn next_refresh_slot(&self) -> Result<Slot, Exhausted> {
        self.next_alive_slot(&self.refresh_cursor).await.ok_or(Exhausted)
    }

    async fn next_alive_slot(&self, cursor: &AtomicUsize) -> Option<Slot> {
        let slots = self.slots.read().await;
        if slots.is_empty() {
            return None;
        }
        let len = slots.len();
        for _ in 0..len {
            let idx = cursor.fetch_add(1, Ordering::Relaxed) % len;
            if !slots[idx].is_dead(self.max_retries) {
                return Some(slots[idx].descriptor.slot_index);
            }
        }
        None
    }

    pub async fn mark_failure(&self, slot: Slot) {
        let mut slots = self.slots.write().await;
        if let Some(s) = slots.iter_mut().find(|s| s.descriptor.slot_index == slot) {
            s.failure_count = s.failure_count.saturating_add(1);
        }
    }

    pub async fn mark_success(&self, slot: Slot) {
        let mut slots = self.slots.write().await;
        if let Some(s) = slots.iter_mut().find(|s| s.descriptor.slot_index == slot) {
            s.failure_count = 0;
        }
    }

    pub async fn is_dead(&self, slot: Slot) -> bool {
        let slots = self.slots.read().await;
        slots
            .iter()
            .find(|s| s.descriptor.slot_index == slot)
            .map(|s| s.is_dead(self.max_retries))
            .unwrap_or(true)
    }

    pub async fn slots_snapshot(&self) -> Vec<PoolSlot> {
        self.slots.read().await.clone()
    }

    /// Rebuilds the pool wholesale on reload; resets both cursors.
    pub async fn reload(&self, slots: Vec<PoolSlot>) {
        *self.slots.write().await = slots;
        self.access_cursor.store(0, Ordering::Relaxed);
        self.refresh_cursor.store(0, Ordering::Relaxed);
    }
}

pub fn build_slots(
    descriptors: Vec<crate::types::CredentialDescriptor>,
) -> Vec<PoolSlot> {
    descriptors
        .into_iter()
        .filter(|d| !d.disabled)
        .map(PoolSlot::new)
        .collect()
}
