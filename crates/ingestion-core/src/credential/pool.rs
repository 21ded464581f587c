use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify, RwLock};
use tokio::time::Instant;

use crate::errors::ConnectorResult;
use crate::events::{CredentialEvent, CredentialRefreshedEvent, Event, UnavailableStartEvent};
use crate::{
    Credential, CredentialId, CredentialProvider, CredentialState, EventHub, UnavailableReason,
};

use super::unavailable_queue::UnavailableQueue;

/// 60 second safety window before expiry, per §4.1's refresh policy.
const DEFAULT_SAFETY_WINDOW: time::Duration = time::Duration::seconds(60);

#[derive(Debug, Clone)]
pub enum AcquireError {
    InstanceUnknown,
    Unavailable,
}

/// Performs the actual network round-trip to mint or renew a `Credential`.
/// `current` is `None` on first acquisition, `Some` on a refresh.
#[async_trait]
pub trait Refresher: Send + Sync {
    async fn refresh(
        &self,
        instance_id: &str,
        current: Option<&Credential>,
    ) -> ConnectorResult<Credential>;
}

enum RefreshSlot {
    /// This caller is the one that gets to call `Refresher::refresh`.
    Leader,
    /// Another caller already owns the in-flight refresh; wait on this.
    Follower(Arc<Notify>),
}

/// Single-flight credential pool (§4.1, §11 test scenario 5): concurrent callers
/// observing an expired or absent lease for the same instance share one refresh —
/// exactly one call reaches `Refresher::refresh`, the rest wait on a `Notify` and
/// then read the value the winner produced.
pub struct CredentialPool<R: Refresher> {
    refresher: R,
    leases: RwLock<HashMap<CredentialId, Credential>>,
    inflight: Mutex<HashMap<CredentialId, Arc<Notify>>>,
    states: Arc<RwLock<HashMap<CredentialId, CredentialState>>>,
    events: EventHub,
    queue: Arc<UnavailableQueue>,
    safety_window: time::Duration,
}

impl<R: Refresher> CredentialPool<R> {
    pub fn new(refresher: R, events: EventHub) -> Self {
        let states = Arc::new(RwLock::new(HashMap::new()));
        let queue = Arc::new(UnavailableQueue::new());
        queue
            .clone()
            .spawn_recover_task(states.clone(), events.clone());
        Self {
            refresher,
            leases: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            states,
            events,
            queue,
            safety_window: DEFAULT_SAFETY_WINDOW,
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub async fn state(&self, instance_id: &str) -> Option<CredentialState> {
        self.states.read().await.get(instance_id).cloned()
    }

    /// Cools down an instance's lease for `duration` without discarding the
    /// underlying token — used when a transport classifies a response as
    /// rate-limited or auth-invalid but a refresh wouldn't help (§4.3, §4.1).
    pub async fn mark_unavailable(
        &self,
        instance_id: &str,
        duration: Duration,
        reason: UnavailableReason,
    ) {
        let until_instant = Instant::now() + duration;
        self.states.write().await.insert(
            instance_id.to_string(),
            CredentialState::Unavailable {
                until: until_instant,
                reason,
            },
        );
        self.queue
            .push(until_instant, instance_id.to_string())
            .await;

        let until_wall = SystemTime::now()
            .checked_add(duration)
            .unwrap_or_else(SystemTime::now);
        self.events
            .emit(Event::Credential(CredentialEvent::UnavailableStart(
                UnavailableStartEvent {
                    at: SystemTime::now(),
                    credential_id: instance_id.to_string(),
                    reason,
                    until: until_wall,
                },
            )))
            .await;
    }

    /// Either claims leadership of the in-flight refresh for `instance_id`, or
    /// returns the `Notify` to wait on if someone else already holds it.
    async fn claim_refresh_slot(&self, instance_id: &str) -> RefreshSlot {
        let mut inflight = self.inflight.lock().await;
        if let Some(existing) = inflight.get(instance_id) {
            return RefreshSlot::Follower(existing.clone());
        }
        inflight.insert(instance_id.to_string(), Arc::new(Notify::new()));
        RefreshSlot::Leader
    }

    async fn release_refresh_slot(&self, instance_id: &str) {
        let mut inflight = self.inflight.lock().await;
        if let Some(notify) = inflight.remove(instance_id) {
            notify.notify_waiters();
        }
    }
}

#[async_trait]
impl<R: Refresher + Send + Sync> CredentialProvider for CredentialPool<R> {
    async fn acquire(&self, instance_id: &str) -> ConnectorResult<Credential> {
        loop {
            let current = self.leases.read().await.get(instance_id).cloned();
            if let Some(cred) = &current
                && !cred.needs_refresh(self.safety_window)
            {
                return Ok(cred.clone());
            }

            match self.claim_refresh_slot(instance_id).await {
                RefreshSlot::Follower(notify) => {
                    notify.notified().await;
                    continue;
                }
                RefreshSlot::Leader => {
                    let result = self.refresher.refresh(instance_id, current.as_ref()).await;
                    if let Ok(refreshed) = &result {
                        self.leases
                            .write()
                            .await
                            .insert(instance_id.to_string(), refreshed.clone());
                        self.events
                            .emit(Event::Credential(CredentialEvent::Refreshed(
                                CredentialRefreshedEvent {
                                    at: SystemTime::now(),
                                    credential_id: instance_id.to_string(),
                                },
                            )))
                            .await;
                    }
                    self.release_refresh_slot(instance_id).await;
                    return result;
                }
            }
        }
    }

    async fn invalidate(&self, instance_id: &str) {
        self.leases.write().await.remove(instance_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRefresher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Refresher for CountingRefresher {
        async fn refresh(
            &self,
            _instance_id: &str,
            _current: Option<&Credential>,
        ) -> ConnectorResult<Credential> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Credential {
                scheme: crate::CredentialScheme::Bearer,
                value: "fresh-token".into(),
                expires_at: Some(time::OffsetDateTime::now_utc() + time::Duration::hours(1)),
                refresh_token: None,
                header_name: None,
            })
        }
    }

    #[tokio::test]
    async fn concurrent_acquires_share_one_refresh() {
        let pool = Arc::new(CredentialPool::new(
            CountingRefresher {
                calls: AtomicUsize::new(0),
            },
            EventHub::new(16),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move { pool.acquire("inst-1").await }));
        }
        for handle in handles {
            let cred = handle.await.unwrap().unwrap();
            assert_eq!(cred.value, "fresh-token");
        }

        assert_eq!(pool.refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_a_fresh_refresh() {
        let pool = CredentialPool::new(
            CountingRefresher {
                calls: AtomicUsize::new(0),
            },
            EventHub::new(16),
        );
        pool.acquire("inst-1").await.unwrap();
        pool.invalidate("inst-1").await;
        pool.acquire("inst-1").await.unwrap();

        assert_eq!(pool.refresher.calls.load(Ordering::SeqCst), 2);
    }
}
