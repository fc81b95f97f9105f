use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use tokio::sync::{Mutex, watch};

use crate::refresh_client::RefreshError;
use crate::types::{AccessCredential, Slot};

/// Single-flight leader/follower result, shared verbatim with every waiter
/// (spec §4.4).
pub type RefreshCompletion = Result<AccessCredential, RefreshError>;

const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(30);

pub enum RefreshRole {
    /// Caller must perform the refresh itself and call `complete`.
    Leader,
    /// Caller must `wait` on this receiver for the leader's result.
    Follower(watch::Receiver<Option<RefreshCompletion>>),
}

#[derive(Debug)]
pub enum WaitOutcome {
    /// The leader published this failure.
    Failed(RefreshError),
    /// `wait`'s timeout elapsed before the leader published anything.
    TimedOut,
    /// The caller's own cancellation signal fired first.
    Cancelled,
}

/// Per-slot single-flight latch. At any time at most one leader exists per
/// slot; every leader `start_refresh` is paired with exactly one `complete`.
pub struct RefreshCoordinator {
    latches: Mutex<HashMap<Slot, watch::Sender<Option<RefreshCompletion>>>>,
    wait_timeout: Duration,
}

impl Default for RefreshCoordinator {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_TIMEOUT)
    }
}

impl RefreshCoordinator {
    pub fn new(wait_timeout: Duration) -> Self {
        Self {
            latches: Mutex::new(HashMap::new()),
            wait_timeout,
        }
    }

    /// Atomically reserves leadership for `slot`, or joins the in-flight
    /// refresh as a follower.
    pub async fn start_refresh(&self, slot: Slot) -> RefreshRole {
        let mut guard = self.latches.lock().await;
        if let Some(tx) = guard.get(&slot) {
            return RefreshRole::Follower(tx.subscribe());
        }
        let (tx, _rx) = watch::channel(None);
        guard.insert(slot, tx);
        RefreshRole::Leader
    }

    /// Leader-only: publishes the result to every waiter and releases the
    /// slot so a future cold `acquire` can lead a fresh refresh.
    pub async fn complete(&self, slot: Slot, result: RefreshCompletion) {
        let tx = self.latches.lock().await.remove(&slot);
        if let Some(tx) = tx {
            let _ = tx.send(Some(result));
        }
    }

    /// Drops every in-flight latch, used by a credential reload. Followers
    /// already waiting simply time out against their receiver's last value
    /// (`None`); a reload is a rare administrative action, not a hot path,
    /// so this favors simplicity over waking them early.
    pub async fn drain(&self) {
        self.latches.lock().await.clear();
    }

    /// Follower path: blocks until the leader publishes, the 30s default
    /// timeout elapses, or `cancelled` resolves first.
    pub async fn wait(
        &self,
        mut rx: watch::Receiver<Option<RefreshCompletion>>,
        cancelled: impl Future<Output = ()>,
    ) -> Result<AccessCredential, WaitOutcome> {
        tokio::pin!(cancelled);
        let deadline = tokio::time::sleep(self.wait_timeout);
        tokio::pin!(deadline);

        loop {
            if let Some(result) = rx.borrow().clone() {
                return result.map_err(WaitOutcome::Failed);
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        // Leader dropped the sender without completing; treat
                        // as a transport-equivalent failure so followers
                        // never hang.
                        return Err(WaitOutcome::TimedOut);
                    }
                }
                _ = &mut deadline => return Err(WaitOutcome::TimedOut),
                _ = &mut cancelled => return Err(WaitOutcome::Cancelled),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuthKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn credential() -> AccessCredential {
        AccessCredential {
            access_secret: "at".to_string(),
            refresh_secret: "rt".to_string(),
            expires_at: 9999,
            profile_identifier: None,
            auth_kind: AuthKind::Social,
        }
    }

    #[tokio::test]
    async fn exactly_one_leader_per_cold_slot() {
        let coordinator = Arc::new(RefreshCoordinator::default());
        let leader_count = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();

        for _ in 0..10 {
            let coordinator = coordinator.clone();
            let leader_count = leader_count.clone();
            handles.push(tokio::spawn(async move {
                match coordinator.start_refresh(7).await {
                    RefreshRole::Leader => {
                        leader_count.fetch_add(1, Ordering::SeqCst);
                        // Simulate network latency so followers actually queue up.
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        coordinator.complete(7, Ok(credential())).await;
                        Ok(credential())
                    }
                    RefreshRole::Follower(rx) => coordinator
                        .wait(rx, std::future::pending())
                        .await
                        .map_err(|_| ()),
                }
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }
        assert_eq!(leader_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn follower_times_out_if_leader_never_completes() {
        let coordinator = RefreshCoordinator::new(Duration::from_millis(10));
        let role = coordinator.start_refresh(1).await;
        assert!(matches!(role, RefreshRole::Leader));

        let follower_role = coordinator.start_refresh(1).await;
        let RefreshRole::Follower(rx) = follower_role else {
            panic!("expected follower");
        };
        let outcome = coordinator.wait(rx, std::future::pending()).await;
        assert!(matches!(outcome, Err(WaitOutcome::TimedOut)));
    }

    #[tokio::test]
    async fn a_new_leader_can_claim_the_slot_after_complete() {
        let coordinator = RefreshCoordinator::default();
        let role = coordinator.start_refresh(2).await;
        assert!(matches!(role, RefreshRole::Leader));
        coordinator.complete(2, Ok(credential())).await;

        let role = coordinator.start_refresh(2).await;
        assert!(matches!(role, RefreshRole::Leader));
    }
}
