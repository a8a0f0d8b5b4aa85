use core::cmp::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::instrument;

use crate::{generator::IdGenStatus, id::SnowflakeId, time::TimeSource};

/// A lock-based Snowflake ID generator suitable for multi-threaded
/// environments.
///
/// The last issued ID lives behind an [`Arc<Mutex<_>>`]; clones share that
/// state, so every clone draws from the same timestamp/sequence pair and
/// never repeats an ID. `parking_lot` mutexes do not poison, which keeps
/// generation infallible.
///
/// ## Recommended When
/// - Many tasks or threads generate IDs for the same node offset
/// - Fair access across threads is important
pub struct LockSnowflakeGenerator<T>
where
    T: TimeSource,
{
    pub(crate) state: Arc<Mutex<SnowflakeId>>,
    pub(crate) time: T,
}

impl<T> Clone for LockSnowflakeGenerator<T>
where
    T: TimeSource + Clone,
{
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            time: self.time.clone(),
        }
    }
}

impl<T> LockSnowflakeGenerator<T>
where
    T: TimeSource,
{
    /// Creates a new generator for `node_offset`, starting from timestamp and
    /// sequence zero.
    ///
    /// # Example
    /// ```
    /// use fleetflake::{IdGenStatus, LockSnowflakeGenerator, MonotonicClock};
    ///
    /// let generator = LockSnowflakeGenerator::new(7, MonotonicClock::default());
    ///
    /// let id = loop {
    ///     match generator.poll_id() {
    ///         IdGenStatus::Ready { id } => break id,
    ///         IdGenStatus::Pending { .. } => std::thread::yield_now(),
    ///     }
    /// };
    /// assert_eq!(id.node_offset(), 7);
    /// ```
    pub fn new(node_offset: u64, time: T) -> Self {
        Self::from_components(SnowflakeId::ZERO, node_offset, SnowflakeId::ZERO, time)
    }

    /// Creates a generator preloaded with explicit component values.
    ///
    /// Useful for restoring state or steering the generator in tests. Prefer
    /// [`Self::new`] otherwise.
    pub fn from_components(timestamp: u64, node_offset: u64, sequence: u64, time: T) -> Self {
        let id = SnowflakeId::from_components(timestamp, node_offset, sequence);
        Self {
            state: Arc::new(Mutex::new(id)),
            time,
        }
    }

    /// Attempts to generate the next available ID without blocking.
    ///
    /// Returns [`IdGenStatus::Pending`] when the sequence for the current
    /// millisecond is exhausted or when the clock reads earlier than the last
    /// issued timestamp.
    #[instrument(level = "trace", skip(self))]
    pub fn poll_id(&self) -> IdGenStatus {
        let now = self.time.current_millis();
        let mut id = self.state.lock();

        let current_ts = id.timestamp();
        match now.cmp(&current_ts) {
            Ordering::Equal => {
                if id.has_sequence_room() {
                    *id = id.increment_sequence();
                    IdGenStatus::Ready { id: *id }
                } else {
                    IdGenStatus::Pending { yield_for: 1 }
                }
            }
            Ordering::Greater => {
                *id = id.rollover_to_timestamp(now);
                IdGenStatus::Ready { id: *id }
            }
            Ordering::Less => Self::cold_clock_behind(now, current_ts),
        }
    }

    #[cold]
    #[inline(never)]
    fn cold_clock_behind(now: u64, current_ts: u64) -> IdGenStatus {
        IdGenStatus::Pending {
            yield_for: current_ts - now,
        }
    }
}
