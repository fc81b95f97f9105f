use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use tokio::sync::RwLock;

use crate::types::{AccessCredential, Slot};

/// Index-addressed cache of valid access credentials (spec §4.5).
///
/// A single-slot rotation (the common case: one credential in active use)
/// is served through the `hot` atomic pointer without taking the `RwLock`
/// at all; multi-slot rotations fall through to the sharded map.
pub struct AccessTokenCache {
    safety_margin: Duration,
    hot_slot: ArcSwapOption<(Slot, AccessCredential)>,
    entries: RwLock<HashMap<Slot, AccessCredential>>,
}

impl AccessTokenCache {
    pub fn new(safety_margin: Duration) -> Self {
        Self {
            safety_margin,
            hot_slot: ArcSwapOption::from(None),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get(&self, slot: Slot, now: i64) -> Option<AccessCredential> {
        if let Some(hot) = self.hot_slot.load_full()
            && hot.0 == slot
        {
            if hot.1.is_near_expiry(now, self.safety_margin) {
                return None;
            }
            return Some(hot.1.clone());
        }
        let entries = self.entries.read().await;
        let cred = entries.get(&slot)?;
        if cred.is_near_expiry(now, self.safety_margin) {
            return None;
        }
        Some(cred.clone())
    }

    pub async fn put(&self, slot: Slot, cred: AccessCredential) {
        self.hot_slot.store(Some(Arc::new((slot, cred.clone()))));
        self.entries.write().await.insert(slot, cred);
    }

    pub async fn delete(&self, slot: Slot) {
        if let Some(hot) = self.hot_slot.load_full()
            && hot.0 == slot
        {
            self.hot_slot.store(None);
        }
        self.entries.write().await.remove(&slot);
    }

    pub async fn clear(&self) {
        self.hot_slot.store(None);
        self.entries.write().await.clear();
    }

    /// Background sweep: evicts entries that have crossed
    /// `expires_at - safety_margin`. Intended to run on a timer from the
    /// composition root; harmless to call repeatedly.
    pub async fn sweep_expired(&self, now: i64) {
        let mut entries = self.entries.write().await;
        entries.retain(|_, cred| !cred.is_near_expiry(now, self.safety_margin));
        if let Some(hot) = self.hot_slot.load_full()
            && hot.1.is_near_expiry(now, self.safety_margin)
        {
            self.hot_slot.store(None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuthKind;

    fn cred(expires_at: i64) -> AccessCredential {
        AccessCredential {
            access_secret: "at".to_string(),
            refresh_secret: "rt".to_string(),
            expires_at,
            profile_identifier: None,
            auth_kind: AuthKind::Social,
        }
    }

    #[tokio::test]
    async fn near_expiry_is_treated_as_absent() {
        let cache = AccessTokenCache::new(Duration::from_secs(30));
        cache.put(0, cred(1_000)).await;
        assert!(cache.get(0, 900).await.is_some());
        // expires_at - safety_margin = 970; now == 970 => absent.
        assert!(cache.get(0, 970).await.is_none());
    }

    #[tokio::test]
    async fn delete_clears_hot_pointer() {
        let cache = AccessTokenCache::new(Duration::from_secs(30));
        cache.put(3, cred(10_000)).await;
        cache.delete(3).await;
        assert!(cache.get(3, 0).await.is_none());
    }

    #[tokio::test]
    async fn sweep_drops_expired_entries() {
        let cache = AccessTokenCache::new(Duration::from_secs(30));
        cache.put(1, cred(100)).await;
        cache.sweep_expired(1_000).await;
        assert!(cache.get(1, 0).await.is_none());
    }
}
