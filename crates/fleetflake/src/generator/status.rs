use crate::id::SnowflakeId;

/// Represents the result of attempting to generate a new Snowflake ID.
///
/// - [`IdGenStatus::Ready`] indicates a new ID was successfully generated.
/// - [`IdGenStatus::Pending`] means the sequence for the current millisecond
///   is exhausted (or the clock is behind the last issued ID) and the caller
///   should retry after `yield_for` milliseconds.
///
/// # Example
///
/// ```
/// use fleetflake::{IdGenStatus, LockSnowflakeGenerator, SnowflakeId, TimeSource};
///
/// struct FixedTime;
/// impl TimeSource for FixedTime {
///     fn current_millis(&self) -> u64 {
///         1
///     }
/// }
///
/// let generator =
///     LockSnowflakeGenerator::from_components(1, 0, SnowflakeId::max_sequence(), FixedTime);
/// match generator.poll_id() {
///     IdGenStatus::Ready { id } => println!("ID: {}", id.timestamp()),
///     IdGenStatus::Pending { yield_for } => println!("Back off for: {yield_for}ms"),
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenStatus {
    /// A unique ID was generated and is ready to use.
    Ready {
        /// The generated Snowflake ID.
        id: SnowflakeId,
    },
    /// No ID could be generated in the current tick.
    Pending {
        /// Milliseconds to wait before trying again.
        yield_for: u64,
    },
}
