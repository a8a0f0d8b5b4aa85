use core::time::Duration;
use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{sync::Notify, time::Instant};

use crate::store::{CoordinationStore, KeyValue, LeaseId, LockHandle, StoreError};

/// An in-process [`CoordinationStore`].
///
/// Lease deadlines are measured on the Tokio clock, so tests can pause time
/// and step past a TTL with `tokio::time::advance`. Expired leases are swept
/// lazily on every operation, which is indistinguishable from eager expiry
/// for any observer.
///
/// Sharing one `MemoryStore` (behind an `Arc`) between several allocators
/// models several instances racing against the same cluster.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    released: Notify,
}

#[derive(Debug, Default)]
struct State {
    next_lease: i64,
    leases: HashMap<LeaseId, Lease>,
    kvs: BTreeMap<String, Entry>,
    locks: HashMap<String, LeaseId>,
}

#[derive(Debug)]
struct Lease {
    ttl: Duration,
    deadline: Instant,
}

#[derive(Debug)]
struct Entry {
    value: Vec<u8>,
    lease: Option<LeaseId>,
}

impl State {
    /// Drops expired leases together with their keys and locks. Returns
    /// `true` if a lock was freed.
    fn sweep(&mut self, now: Instant) -> bool {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();

        let mut freed = false;
        for id in expired {
            freed |= self.drop_lease(id);
        }
        freed
    }

    fn drop_lease(&mut self, id: LeaseId) -> bool {
        self.leases.remove(&id);
        self.kvs.retain(|_, entry| entry.lease != Some(id));
        let before = self.locks.len();
        self.locks.retain(|_, holder| *holder != id);
        before != self.locks.len()
    }

    fn require_lease(&self, id: LeaseId) -> Result<&Lease, StoreError> {
        self.leases.get(&id).ok_or(StoreError::LeaseNotFound(id))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` against swept state and wakes lock waiters if anything was
    /// released along the way.
    fn with_state<R>(&self, f: impl FnOnce(&mut State) -> (R, bool)) -> R {
        let (out, freed) = {
            let mut state = self.state.lock();
            let swept = state.sweep(Instant::now());
            let (out, freed) = f(&mut state);
            (out, swept || freed)
        };
        if freed {
            self.released.notify_waiters();
        }
        out
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError> {
        Ok(self.with_state(|state| {
            state.next_lease += 1;
            let id = LeaseId(state.next_lease);
            state.leases.insert(id, Lease {
                ttl,
                deadline: Instant::now() + ttl,
            });
            (id, false)
        }))
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<Duration, StoreError> {
        self.with_state(|state| match state.leases.get_mut(&lease) {
            Some(entry) => {
                entry.deadline = Instant::now() + entry.ttl;
                (Ok(entry.ttl), false)
            }
            None => (Err(StoreError::LeaseNotFound(lease)), false),
        })
    }

    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError> {
        self.with_state(|state| {
            if state.leases.contains_key(&lease) {
                let freed = state.drop_lease(lease);
                (Ok(()), freed)
            } else {
                (Err(StoreError::LeaseNotFound(lease)), false)
            }
        })
    }

    async fn lock(&self, name: &str, lease: LeaseId) -> Result<LockHandle, StoreError> {
        loop {
            // Register interest before inspecting state so a release between
            // the check and the await is not missed.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let holder_deadline = self.with_state(|state| {
                if let Err(e) = state.require_lease(lease) {
                    return (Err(e), false);
                }
                match state.locks.get(name) {
                    Some(holder) if *holder == lease => (Ok(None), false),
                    Some(holder) => {
                        let deadline = state.leases.get(holder).map(|l| l.deadline);
                        (Ok(deadline), false)
                    }
                    None => {
                        state.locks.insert(name.to_owned(), lease);
                        (Ok(None), false)
                    }
                }
            })?;

            match holder_deadline {
                None => {
                    return Ok(LockHandle {
                        name: name.to_owned(),
                        key: format!("{name}/{lease}").into_bytes(),
                        lease,
                    });
                }
                Some(deadline) => {
                    tokio::select! {
                        () = &mut notified => {}
                        () = tokio::time::sleep_until(deadline) => {}
                    }
                }
            }
        }
    }

    async fn unlock(&self, handle: LockHandle) -> Result<(), StoreError> {
        self.with_state(|state| {
            let held = state.locks.get(&handle.name) == Some(&handle.lease);
            if held {
                state.locks.remove(&handle.name);
            }
            (Ok(()), held)
        })
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError> {
        Ok(self.with_state(|state| {
            let kvs = state
                .kvs
                .range(prefix.to_owned()..)
                .take_while(|(key, _)| key.starts_with(prefix))
                .map(|(key, entry)| KeyValue {
                    key: key.clone(),
                    value: entry.value.clone(),
                })
                .collect();
            (kvs, false)
        }))
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    ) -> Result<(), StoreError> {
        self.with_state(|state| {
            if let Some(id) = lease {
                if let Err(e) = state.require_lease(id) {
                    return (Err(e), false);
                }
            }
            state.kvs.insert(key.to_owned(), Entry { value, lease });
            (Ok(()), false)
        })
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.with_state(|state| {
            state.kvs.remove(key);
            (Ok(()), false)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn leased_keys_vanish_when_lease_expires() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(30)).await.unwrap();
        store.put("/a/1", b"one".to_vec(), Some(lease)).await.unwrap();
        store.put("/a/2", b"two".to_vec(), None).await.unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;
        assert_eq!(store.get_prefix("/a/").await.unwrap().len(), 2);

        tokio::time::advance(Duration::from_secs(2)).await;
        let left = store.get_prefix("/a/").await.unwrap();
        assert_eq!(left, vec![KeyValue {
            key: "/a/2".into(),
            value: b"two".to_vec()
        }]);
        assert_eq!(
            store.keep_alive(lease).await,
            Err(StoreError::LeaseNotFound(lease))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_extends_deadline() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(10)).await.unwrap();
        store.put("/k", vec![1], Some(lease)).await.unwrap();

        for _ in 0..5 {
            tokio::time::advance(Duration::from_secs(8)).await;
            assert_eq!(store.keep_alive(lease).await.unwrap(), Duration::from_secs(10));
        }
        assert_eq!(store.get_prefix("/k").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn revoke_deletes_attached_keys() {
        let store = MemoryStore::new();
        let lease = store.grant_lease(Duration::from_secs(30)).await.unwrap();
        store.put("/x", vec![0], Some(lease)).await.unwrap();
        store.revoke_lease(lease).await.unwrap();
        assert!(store.get_prefix("/").await.unwrap().is_empty());
        assert!(store.revoke_lease(lease).await.is_err());
        assert!(store.put("/y", vec![0], Some(lease)).await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn prefix_reads_do_not_leak_siblings() {
        let store = MemoryStore::new();
        store.put("/p/user/allocated/1", vec![], None).await.unwrap();
        store.put("/p/user/lock", vec![], None).await.unwrap();
        store.put("/p/userx/allocated/1", vec![], None).await.unwrap();

        let keys: Vec<_> = store
            .get_prefix("/p/user/allocated/")
            .await
            .unwrap()
            .into_iter()
            .map(|kv| kv.key)
            .collect();
        assert_eq!(keys, vec!["/p/user/allocated/1".to_owned()]);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_waits_for_unlock() {
        let store = Arc::new(MemoryStore::new());
        let l1 = store.grant_lease(Duration::from_secs(30)).await.unwrap();
        let l2 = store.grant_lease(Duration::from_secs(30)).await.unwrap();
        let held = store.lock("cat", l1).await.unwrap();

        let waiter = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.lock("cat", l2).await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        store.unlock(held).await.unwrap();
        let second = waiter.await.unwrap().unwrap();
        assert_eq!(second.lease, l2);
    }

    #[tokio::test(start_paused = true)]
    async fn lock_is_released_when_holder_lease_expires() {
        let store = MemoryStore::new();
        let crashed = store.grant_lease(Duration::from_secs(5)).await.unwrap();
        let _abandoned = store.lock("cat", crashed).await.unwrap();

        let next = store.grant_lease(Duration::from_secs(60)).await.unwrap();
        let started = Instant::now();
        let handle = store.lock("cat", next).await.unwrap();
        assert_eq!(handle.lease, next);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn lock_with_unknown_lease_fails() {
        let store = MemoryStore::new();
        let err = store.lock("cat", LeaseId(99)).await.unwrap_err();
        assert_eq!(err, StoreError::LeaseNotFound(LeaseId(99)));
    }
}
