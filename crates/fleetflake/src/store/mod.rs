//! Coordination-store abstraction.
//!
//! The allocator needs four primitives from the store shared by the fleet:
//! TTL leases, keys attached to leases (removed when the lease lapses or is
//! revoked), prefix reads, and a named mutual-exclusion lock that is itself
//! bound to a lease so a crashed holder cannot wedge the category.
//!
//! - [`MemoryStore`]: in-process implementation driven by the Tokio clock.
//! - [`EtcdStore`]: etcd v3 over its JSON gateway (feature `etcd`).

#[cfg(feature = "etcd")]
mod etcd;
mod memory;

use core::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(feature = "etcd")]
pub use etcd::*;
pub use memory::*;

/// Identifier of a lease issued by the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(pub i64);

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// A key and its raw value as read from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
}

/// Proof of holding a named lock. Pass it back to
/// [`CoordinationStore::unlock`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LockHandle {
    /// The lock name that was requested.
    pub name: String,
    /// Store-specific ownership key.
    pub key: Vec<u8>,
    /// Lease the lock is bound to.
    pub lease: LeaseId,
}

/// Failures reported by a coordination store backend.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// No endpoint could be reached.
    #[error("store unreachable: {0}")]
    Unavailable(String),

    /// The lease expired or was revoked.
    #[error("lease {0} not found")]
    LeaseNotFound(LeaseId),

    /// The store answered with an error.
    #[error("store rejected request ({status}): {message}")]
    Upstream { status: u16, message: String },

    /// The store answered with something we could not parse.
    #[error("malformed store response: {0}")]
    Decode(String),
}

/// Operations the allocator needs from a distributed key-value store.
///
/// Implementations must make keys written with a lease invisible to every
/// reader as soon as that lease expires or is revoked.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Issues a lease that expires `ttl` after its last keep-alive.
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, StoreError>;

    /// Refreshes a lease, returning its renewed TTL.
    async fn keep_alive(&self, lease: LeaseId) -> Result<Duration, StoreError>;

    /// Revokes a lease and deletes every key attached to it.
    async fn revoke_lease(&self, lease: LeaseId) -> Result<(), StoreError>;

    /// Waits until the named lock is free and takes it under `lease`.
    ///
    /// Callers bound the wait themselves; dropping the future abandons the
    /// attempt.
    async fn lock(&self, name: &str, lease: LeaseId) -> Result<LockHandle, StoreError>;

    /// Releases a lock taken with [`CoordinationStore::lock`].
    async fn unlock(&self, handle: LockHandle) -> Result<(), StoreError>;

    /// Reads every key starting with `prefix`, in key order.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>, StoreError>;

    /// Writes `value` under `key`, optionally attached to `lease`.
    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>)
    -> Result<(), StoreError>;

    /// Deletes `key` if present.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}
