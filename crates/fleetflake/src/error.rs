//! Error types for node-identifier allocation and ID generation.
//!
//! ## Error Cases
//! - Validation: `OutOfRange`, `UnknownCategory`, `NodeIdOutsideCategory`.
//!   Always surfaced to the caller, never retried.
//! - Coordination: `AllocationTimeout`, `StoreUnavailable`, `RangeExhausted`.
//!   Terminal for a single allocation attempt; the composition layer decides
//!   whether to fall back to another strategy.
//! - Lifecycle: `NotAllocated`, `Store`, `InvalidRecord`.
//! - Setup: `InvalidConfig`.

use core::time::Duration;

use crate::{partition::ServiceCategory, store::StoreError};

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Unified error type for the allocation subsystem.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The instance offset does not fit in a category's 1024-slot range.
    #[error("instance offset {offset} is outside [0, {max}]")]
    OutOfRange { offset: i64, max: u16 },

    /// A service category string did not name a known category.
    #[error("unknown service category: {0:?}")]
    UnknownCategory(String),

    /// A node ID was supplied for a category whose range does not contain it.
    #[error("node id {node_id} is outside the range reserved for {category}")]
    NodeIdOutsideCategory {
        node_id: u16,
        category: ServiceCategory,
    },

    /// The distributed lock could not be acquired in time.
    #[error("timed out after {timeout:?} allocating a node id for {category}")]
    AllocationTimeout {
        category: ServiceCategory,
        timeout: Duration,
    },

    /// The coordination store could not be reached or refused the request.
    #[error("coordination store unavailable: {0}")]
    StoreUnavailable(StoreError),

    /// All 1024 offsets of the category are claimed by live instances.
    #[error("all node ids reserved for {category} are in use")]
    RangeExhausted { category: ServiceCategory },

    /// The allocator does not currently hold the given node ID.
    #[error("node id {node_id} is not held by this allocator")]
    NotAllocated { node_id: u16 },

    /// A store operation failed outside of allocation (renewal, release).
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A stored instance record could not be decoded.
    #[error("invalid instance record under {key}: {reason}")]
    InvalidRecord { key: String, reason: String },

    /// Allocator configuration is inconsistent.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Returns `true` for failures a caller may recover from by switching to
    /// a coordination-free allocator.
    pub const fn is_coordination_failure(&self) -> bool {
        matches!(
            self,
            Self::AllocationTimeout { .. } | Self::StoreUnavailable(_) | Self::RangeExhausted { .. }
        )
    }
}
