//! Node-identifier allocation strategies.
//!
//! Every strategy implements [`NodeIdAllocator`]. [`Allocator`] is the closed
//! set the facade picks from at startup:
//!
//! - [`StoreAllocator`]: lease-backed claim against a coordination store.
//! - [`FingerprintAllocator`]: hash of stable machine characteristics.
//! - [`FallbackAllocator`]: static assignment if it fits, else fingerprint.
//! - [`StaticAllocator`]: an assignment taken from configuration as-is.

mod config;
mod fallback;
mod fingerprint;
mod fixed;
mod record;
mod store;

use async_trait::async_trait;

pub use config::*;
pub use fallback::*;
pub use fingerprint::*;
pub use fixed::*;
pub use record::*;
pub use store::*;

use crate::{
    error::Result,
    partition::{NodeId, ServiceCategory},
};

/// The node-identifier lifecycle every strategy provides.
#[async_trait]
pub trait NodeIdAllocator: Send + Sync {
    /// Obtains a node ID inside `category`'s reserved range.
    async fn allocate_node_id(&self, category: ServiceCategory) -> Result<NodeId>;

    /// Gives up `node_id`. Releasing something not held is a no-op.
    async fn release_node_id(&self, category: ServiceCategory, node_id: NodeId) -> Result<()>;

    /// Extends whatever keeps `node_id` reserved, if anything does.
    async fn refresh_lease(&self, category: ServiceCategory, node_id: NodeId) -> Result<()>;
}

/// One of the supported allocation strategies.
#[derive(Debug)]
pub enum Allocator {
    Store(StoreAllocator),
    Fingerprint(FingerprintAllocator),
    Fallback(FallbackAllocator),
    Static(StaticAllocator),
}

impl Allocator {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Store(_) => "store",
            Self::Fingerprint(_) => "fingerprint",
            Self::Fallback(_) => "fallback",
            Self::Static(_) => "static",
        }
    }
}

#[async_trait]
impl NodeIdAllocator for Allocator {
    async fn allocate_node_id(&self, category: ServiceCategory) -> Result<NodeId> {
        match self {
            Self::Store(a) => a.allocate_node_id(category).await,
            Self::Fingerprint(a) => a.allocate_node_id(category).await,
            Self::Fallback(a) => a.allocate_node_id(category).await,
            Self::Static(a) => a.allocate_node_id(category).await,
        }
    }

    async fn release_node_id(&self, category: ServiceCategory, node_id: NodeId) -> Result<()> {
        match self {
            Self::Store(a) => a.release_node_id(category, node_id).await,
            Self::Fingerprint(a) => a.release_node_id(category, node_id).await,
            Self::Fallback(a) => a.release_node_id(category, node_id).await,
            Self::Static(a) => a.release_node_id(category, node_id).await,
        }
    }

    async fn refresh_lease(&self, category: ServiceCategory, node_id: NodeId) -> Result<()> {
        match self {
            Self::Store(a) => a.refresh_lease(category, node_id).await,
            Self::Fingerprint(a) => a.refresh_lease(category, node_id).await,
            Self::Fallback(a) => a.refresh_lease(category, node_id).await,
            Self::Static(a) => a.refresh_lease(category, node_id).await,
        }
    }
}
