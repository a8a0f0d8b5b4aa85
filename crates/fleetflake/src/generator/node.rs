use core::fmt;

use crate::{
    generator::{IdGenStatus, LockSnowflakeGenerator},
    id::SnowflakeId,
    partition::NodeId,
    time::{MonotonicClock, TimeSource},
};

/// A Snowflake generator bound to one allocated [`NodeId`].
///
/// The generator is immutable once built and safe to share between threads;
/// clones draw from the same sequence. It never performs I/O: uniqueness
/// across the fleet relies entirely on the allocator having handed out a
/// node ID no other live generator holds.
///
/// Only the category-relative offset of the node ID is embedded in the
/// generated IDs.
#[derive(Clone)]
pub struct Generator<T = MonotonicClock>
where
    T: TimeSource,
{
    node_id: NodeId,
    inner: LockSnowflakeGenerator<T>,
}

impl Generator<MonotonicClock> {
    /// Creates a generator for `node_id` on a fresh [`MonotonicClock`].
    pub fn new(node_id: NodeId) -> Self {
        Self::with_time(node_id, MonotonicClock::default())
    }
}

impl<T> Generator<T>
where
    T: TimeSource,
{
    /// Creates a generator for `node_id` over an explicit time source.
    pub fn with_time(node_id: NodeId, time: T) -> Self {
        Self {
            node_id,
            inner: LockSnowflakeGenerator::new(u64::from(node_id.offset()), time),
        }
    }

    /// The node ID this generator was built for.
    pub const fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Returns the next ID, yielding the thread while the current
    /// millisecond's sequence is exhausted.
    pub fn next_id(&self) -> SnowflakeId {
        loop {
            match self.inner.poll_id() {
                IdGenStatus::Ready { id } => break id,
                IdGenStatus::Pending { .. } => std::thread::yield_now(),
            }
        }
    }

    /// Attempts to produce an ID without blocking.
    pub fn poll_id(&self) -> IdGenStatus {
        self.inner.poll_id()
    }

    /// Next ID rendered as a decimal string.
    pub fn generate(&self) -> String {
        self.next_id().to_string()
    }

    /// Next ID as a signed 64-bit integer.
    pub fn generate_i64(&self) -> i64 {
        self.next_id().to_i64()
    }
}

impl<T> fmt::Debug for Generator<T>
where
    T: TimeSource,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generator")
            .field("node_id", &self.node_id)
            .field("category", &self.node_id.category())
            .finish_non_exhaustive()
    }
}
