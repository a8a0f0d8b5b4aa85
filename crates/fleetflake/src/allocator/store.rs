use std::{collections::HashSet, sync::Arc};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use tokio::{
    sync::Mutex as AsyncMutex,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    allocator::{InstanceRecord, Keys, NodeIdAllocator, StoreAllocatorConfig},
    error::{Error, Result},
    partition::{NODES_PER_CATEGORY, NodeId, ServiceCategory, node_id},
    store::{CoordinationStore, LeaseId, LockHandle},
};

/// Claims node IDs from a [`CoordinationStore`] shared by the whole fleet.
///
/// Allocation takes the category's lock, scans the claimed slots, writes an
/// [`InstanceRecord`] into the first free one under a fresh lease and drops
/// the lock again. From then on the lease alone keeps the slot reserved: a
/// background task renews it every `renew_interval` until
/// [`release_node_id`](NodeIdAllocator::release_node_id) cancels the task,
/// waits for it to exit and revokes the lease.
///
/// Renewal failures are logged and retried on the next tick. The session is
/// never torn down because of them, so if the store stays unreachable past
/// the lease TTL another instance may claim the same node ID while this one
/// is still generating with it.
///
/// One allocator holds at most one node ID at a time.
pub struct StoreAllocator {
    store: Arc<dyn CoordinationStore>,
    config: StoreAllocatorConfig,
    keys: Keys,
    instance_id: String,
    hostname: String,
    session: AsyncMutex<Option<Session>>,
}

struct Session {
    category: ServiceCategory,
    node_id: NodeId,
    renewal: Arc<Renewal>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// State shared between the session and its renewal task.
struct Renewal {
    store: Arc<dyn CoordinationStore>,
    lease: LeaseId,
    key: String,
    record: Mutex<InstanceRecord>,
}

impl Renewal {
    /// One keep-alive round trip followed by a `last_renew_time` update.
    async fn renew_once(&self) -> Result<()> {
        self.store.keep_alive(self.lease).await?;

        let body = {
            let mut record = self.record.lock();
            record.last_renew_time = Utc::now();
            record.encode(&self.key)?
        };
        self.store.put(&self.key, body, Some(self.lease)).await?;
        Ok(())
    }
}

impl StoreAllocator {
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate.
    pub fn new(store: Arc<dyn CoordinationStore>, config: StoreAllocatorConfig) -> Result<Self> {
        config.validate()?;
        let hostname = whoami::hostname().unwrap_or_else(|_| "unknown".to_owned());
        Ok(Self {
            store,
            keys: Keys::new(&config.key_prefix),
            config,
            instance_id: uuid::Uuid::new_v4().to_string(),
            hostname,
            session: AsyncMutex::new(None),
        })
    }

    pub fn config(&self) -> &StoreAllocatorConfig {
        &self.config
    }

    /// Identifier written into this allocator's instance records.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// The node ID currently held, if any.
    pub async fn held(&self) -> Option<(ServiceCategory, NodeId)> {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| (s.category, s.node_id))
    }

    /// Live instance records of `category`, in slot order.
    ///
    /// # Errors
    ///
    /// [`Error::Store`] if the read fails, [`Error::InvalidRecord`] if a
    /// stored record does not decode.
    pub async fn instances(&self, category: ServiceCategory) -> Result<Vec<InstanceRecord>> {
        let kvs = self.store.get_prefix(&self.keys.allocated(category)).await?;
        let mut records = kvs
            .iter()
            .filter(|kv| self.keys.offset_of(category, &kv.key).is_some())
            .map(InstanceRecord::decode)
            .collect::<Result<Vec<_>>>()?;
        records.sort_by_key(|r| r.node_id);
        Ok(records)
    }

    /// Grants the lock lease, takes the category lock, claims a slot and
    /// drops the lock again.
    ///
    /// Every lease granted on the way is recorded in `granted` so the caller
    /// can revoke it even when this future is dropped halfway.
    async fn claim(
        &self,
        category: ServiceCategory,
        granted: &mut Granted,
    ) -> Result<(NodeId, Renewal)> {
        // The lock is bound to its own lease so a crash while holding it
        // cannot wedge the category.
        let lock_lease = self
            .store
            .grant_lease(self.config.lease_ttl)
            .await
            .map_err(Error::StoreUnavailable)?;
        granted.lock = Some(lock_lease);

        let handle = self
            .store
            .lock(&self.keys.lock(category), lock_lease)
            .await
            .map_err(Error::StoreUnavailable)?;

        let claimed = self.claim_free_slot(category, granted).await;
        self.unlock(handle).await;
        claimed
    }

    async fn unlock(&self, handle: LockHandle) {
        if let Err(e) = self.store.unlock(handle).await {
            // The lock lease is revoked right after, which frees it anyway.
            tracing::debug!(error = %e, "failed to release allocation lock");
        }
    }

    /// Runs with the category lock held.
    async fn claim_free_slot(
        &self,
        category: ServiceCategory,
        granted: &mut Granted,
    ) -> Result<(NodeId, Renewal)> {
        let taken: HashSet<u16> = self
            .store
            .get_prefix(&self.keys.allocated(category))
            .await
            .map_err(Error::StoreUnavailable)?
            .iter()
            .filter_map(|kv| self.keys.offset_of(category, &kv.key))
            .collect();

        let offset = (0..NODES_PER_CATEGORY)
            .find(|offset| !taken.contains(offset))
            .ok_or(Error::RangeExhausted { category })?;
        let node_id = node_id(category, i64::from(offset))?;

        let lease = self
            .store
            .grant_lease(self.config.lease_ttl)
            .await
            .map_err(Error::StoreUnavailable)?;
        granted.record = Some(lease);

        let now = Utc::now();
        let record = InstanceRecord {
            node_id: node_id.get(),
            service_category: category,
            instance_id: self.instance_id.clone(),
            hostname: self.hostname.clone(),
            start_time: now,
            last_renew_time: now,
        };
        let key = self.keys.slot(category, offset);
        let body = record.encode(&key)?;
        self.store
            .put(&key, body, Some(lease))
            .await
            .map_err(Error::StoreUnavailable)?;

        let renewal = Renewal {
            store: Arc::clone(&self.store),
            lease,
            key,
            record: Mutex::new(record),
        };
        Ok((node_id, renewal))
    }

    /// Best-effort revocation, bounded by `allocate_timeout` so a store that
    /// stopped answering cannot stall the caller.
    async fn revoke(&self, lease: LeaseId) {
        let timeout = self.config.allocate_timeout;
        match tokio::time::timeout(timeout, self.store.revoke_lease(lease)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    %lease,
                    error = %e,
                    "failed to revoke lease, it will lapse after its TTL"
                );
            }
            Err(_) => {
                tracing::warn!(%lease, "lease revocation timed out, it will lapse after its TTL");
            }
        }
    }
}

/// Leases granted while claiming a node ID.
#[derive(Debug, Default)]
struct Granted {
    lock: Option<LeaseId>,
    record: Option<LeaseId>,
}

#[async_trait]
impl NodeIdAllocator for StoreAllocator {
    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    async fn allocate_node_id(&self, category: ServiceCategory) -> Result<NodeId> {
        let mut session = self.session.lock().await;
        if let Some(held) = session.as_ref() {
            if held.category == category {
                return Ok(held.node_id);
            }
            return Err(Error::NodeIdOutsideCategory {
                node_id: held.node_id.get(),
                category,
            });
        }

        // One deadline covers every store round trip of the claim.
        let timeout = self.config.allocate_timeout;
        let mut granted = Granted::default();
        let claimed = tokio::time::timeout(timeout, self.claim(category, &mut granted))
            .await
            .unwrap_or(Err(Error::AllocationTimeout { category, timeout }));

        // Revoking the lock lease also frees a lock abandoned by a timeout.
        if let Some(lease) = granted.lock {
            self.revoke(lease).await;
        }
        let (node_id, renewal) = match claimed {
            Ok(claimed) => claimed,
            Err(e) => {
                if let Some(lease) = granted.record {
                    self.revoke(lease).await;
                }
                return Err(e);
            }
        };
        let renewal = Arc::new(renewal);
        tracing::info!(%node_id, lease = %renewal.lease, key = %renewal.key, "claimed node id");

        let cancel = CancellationToken::new();
        let task = self.config.auto_renew.then(|| {
            tokio::spawn(renew_loop(
                Arc::clone(&renewal),
                self.config.clone(),
                cancel.clone(),
            ))
        });

        *session = Some(Session {
            category,
            node_id,
            renewal,
            cancel,
            task,
        });
        Ok(node_id)
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    async fn release_node_id(&self, category: ServiceCategory, node_id: NodeId) -> Result<()> {
        let mut guard = self.session.lock().await;
        let Some(mut session) = guard.take_if(|s| s.category == category && s.node_id == node_id)
        else {
            tracing::debug!("node id not held, nothing to release");
            return Ok(());
        };

        // Stop renewing before revoking so a late keep-alive cannot race
        // the revocation.
        session.cancel.cancel();
        if let Some(task) = session.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "renewal task ended abnormally");
            }
        }

        self.revoke(session.renewal.lease).await;
        tracing::info!("released node id");
        Ok(())
    }

    #[instrument(skip(self), fields(instance_id = %self.instance_id))]
    async fn refresh_lease(&self, category: ServiceCategory, node_id: NodeId) -> Result<()> {
        let guard = self.session.lock().await;
        match guard.as_ref() {
            Some(s) if s.category == category && s.node_id == node_id => {
                s.renewal.renew_once().await
            }
            _ => Err(Error::NotAllocated {
                node_id: node_id.get(),
            }),
        }
    }
}

impl Drop for StoreAllocator {
    fn drop(&mut self) {
        // Without an explicit release the lease simply runs out.
        if let Some(session) = self.session.get_mut() {
            session.cancel.cancel();
        }
    }
}

impl core::fmt::Debug for StoreAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StoreAllocator")
            .field("config", &self.config)
            .field("instance_id", &self.instance_id)
            .finish_non_exhaustive()
    }
}

async fn renew_loop(
    renewal: Arc<Renewal>,
    config: StoreAllocatorConfig,
    cancel: CancellationToken,
) {
    let mut ticker =
        tokio::time::interval_at(Instant::now() + config.renew_interval, config.renew_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_success = Instant::now();
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // A round trip stuck on an unresponsive store must not hold up
        // release, which revokes the lease right after.
        let renewed = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            renewed = renewal.renew_once() => renewed,
        };

        match renewed {
            Ok(()) => {
                if failures > 0 {
                    tracing::info!(failures, "lease renewal recovered");
                }
                failures = 0;
                last_success = Instant::now();
            }
            Err(e) => {
                failures += 1;
                let stale_for = last_success.elapsed();
                if stale_for >= config.lease_ttl {
                    tracing::error!(
                        lease = %renewal.lease,
                        failures,
                        ?stale_for,
                        error = %e,
                        "lease renewal failing past its TTL, node id may be claimed elsewhere"
                    );
                } else {
                    tracing::warn!(
                        lease = %renewal.lease,
                        failures,
                        error = %e,
                        "lease renewal failed"
                    );
                }
            }
        }
    }
    tracing::debug!(lease = %renewal.lease, "renewal task stopped");
}
