//! Fleet-safe Snowflake IDs.
//!
//! Each running instance claims a node ID from the range reserved for its
//! [`ServiceCategory`], then generates 64-bit IDs locally without touching
//! the network. See [`NodeIdFacade`] for the startup flow and
//! [`StoreAllocator`] for the lease-backed claim protocol.

mod allocator;
mod error;
mod facade;
mod generator;
mod id;
mod partition;
pub mod store;
mod time;

pub use crate::allocator::*;
pub use crate::error::*;
pub use crate::facade::*;
pub use crate::generator::*;
pub use crate::id::*;
pub use crate::partition::*;
pub use crate::time::*;
