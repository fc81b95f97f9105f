use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::AccessTokenCache;
use crate::coordinator::{RefreshCoordinator, RefreshRole, WaitOutcome};
use crate::pool::{CredentialPool, build_slots};
use crate::refresh_client::RefreshClient;
use crate::store::CredentialStore;
use crate::types::{AccessCredential, CredentialDescriptor, Slot};

#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_retries: u32,
    pub safety_margin: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            safety_margin: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unavailable;

/// Facade composing C2–C7 behind `acquire()`/`invalidate()`/`reload()`
/// (spec §4.7). Safe to call `acquire` from any number of concurrent tasks.
pub struct CredentialManager {
    store: CredentialStore,
    pool: Arc<CredentialPool>,
    cache: Arc<AccessTokenCache>,
    coordinator: Arc<RefreshCoordinator>,
    refresh_client: Arc<RefreshClient>,
    config: ManagerConfig,
}

impl CredentialManager {
    pub fn new(
        descriptors: Vec<CredentialDescriptor>,
        refresh_client: Arc<RefreshClient>,
        config: ManagerConfig,
    ) -> Self {
        let store = CredentialStore::new(descriptors.clone());
        let pool = Arc::new(CredentialPool::new(build_slots(descriptors), config.max_retries));
        Self {
            store,
            pool,
            cache: Arc::new(AccessTokenCache::new(config.safety_margin)),
            coordinator: Arc::new(RefreshCoordinator::default()),
            refresh_client,
            config,
        }
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn cache(&self) -> &AccessTokenCache {
        &self.cache
    }

    /// Picks a slot, serves it from cache if warm, otherwise leads or
    /// follows a refresh; retries up to the pool size before giving up.
    /// `cancel` unblocks a following task waiting on `coordinator.wait`
    /// without affecting a leader, which always publishes its result (spec
    /// §5).
    pub async fn acquire(
        &self,
        now: i64,
        cancel: &CancellationToken,
    ) -> Result<AccessCredential, Unavailable> {
        self.acquire_with_slot(now, cancel).await.map(|(_, cred)| cred)
    }

    /// Same as `acquire`, but also returns which slot served the credential
    /// so a caller that later learns the credential was rejected (401/403)
    /// can call `invalidate` on the exact slot.
    pub async fn acquire_with_slot(
        &self,
        now: i64,
        cancel: &CancellationToken,
    ) -> Result<(Slot, AccessCredential), Unavailable> {
        let pool_len = self.pool.len().await;
        if pool_len == 0 {
            return Err(Unavailable);
        }

        for _ in 0..pool_len {
            let Some(slot) = self.pool.next_access_slot().await else {
                break;
            };
            if let Some(cred) = self.cache.get(slot, now).await {
                return Ok((slot, cred));
            }
            match self.acquire_for_slot(slot, now, cancel).await {
                Ok(cred) => return Ok((slot, cred)),
                Err(()) => continue,
            }
        }
        Err(Unavailable)
    }

    async fn acquire_for_slot(
        &self,
        slot: Slot,
        now: i64,
        cancel: &CancellationToken,
    ) -> Result<AccessCredential, ()> {
        match self.coordinator.start_refresh(slot).await {
            RefreshRole::Leader => self.lead_refresh(slot, now).await,
            RefreshRole::Follower(rx) => {
                match self.coordinator.wait(rx, cancel.cancelled()).await {
                    Ok(cred) => Ok(cred),
                    Err(WaitOutcome::Failed(err)) => {
                        debug!(slot, %err, "follower observed refresh failure");
                        Err(())
                    }
                    Err(WaitOutcome::TimedOut) => Err(()),
                    Err(WaitOutcome::Cancelled) => {
                        debug!(slot, "follower cancelled while waiting on leader refresh");
                        Err(())
                    }
                }
            }
        }
    }

    async fn lead_refresh(&self, slot: Slot, now: i64) -> Result<AccessCredential, ()> {
        let Some(descriptor) = self.store.get(slot).await else {
            self.coordinator
                .complete(slot, Err(crate::refresh_client::RefreshError::MalformedResponse(
                    "slot has no descriptor".to_string(),
                )))
                .await;
            return Err(());
        };

        // Spawned so the leader still publishes a result even if the
        // acquiring request's own future is dropped by cancellation
        // elsewhere (spec §5: "a leader who is cancelled must still publish
        // its refresh result before returning").
        let refresh_client = self.refresh_client.clone();
        let coordinator = self.coordinator.clone();
        let pool = self.pool.clone();
        let cache = self.cache.clone();
        let handle = tokio::spawn(async move {
            let result = refresh_client.refresh(&descriptor, now).await;
            match &result {
                Ok(cred) => {
                    cache.put(slot, cred.clone()).await;
                    pool.mark_success(slot).await;
                }
                Err(err) => {
                    warn!(slot, %err, "refresh attempt failed");
                    pool.mark_failure(slot).await;
                }
            }
            coordinator.complete(slot, result.clone()).await;
            result
        });

        match handle.await {
            Ok(Ok(cred)) => Ok(cred),
            Ok(Err(_)) | Err(_) => Err(()),
        }
    }

    /// Called when a downstream call proves the cached credential stale
    /// (e.g. 401/403).
    pub async fn invalidate(&self, slot: Slot) {
        self.cache.delete(slot).await;
    }

    /// Rebuilds slots, clears the cache, and drains the coordinator so a
    /// reload is linearizable with respect to `acquire`.
    pub async fn reload(&self, new_descriptors: Vec<CredentialDescriptor>) {
        self.store.atomic_swap(new_descriptors.clone()).await;
        self.pool.reload(build_slots(new_descriptors)).await;
        self.cache.clear().await;
        self.coordinator.drain().await;
    }
}
