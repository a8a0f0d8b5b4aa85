use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    allocator::NodeIdAllocator,
    error::{Error, Result},
    partition::{NodeId, ServiceCategory, node_id},
};

/// A node ID pre-assigned through process configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaticAssignment {
    /// A raw fleet-wide node ID.
    NodeId(u16),
    /// A slot within a category's range.
    Offset {
        category: ServiceCategory,
        offset: i64,
    },
}

impl StaticAssignment {
    /// Resolves the assignment to a node ID without checking which category
    /// asks for it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfRange`] if the value lies outside every range.
    pub fn resolve(&self) -> Result<NodeId> {
        match *self {
            Self::NodeId(raw) => NodeId::new(raw),
            Self::Offset { category, offset } => node_id(category, offset),
        }
    }

    /// Resolves the assignment and checks it belongs to `category`.
    ///
    /// # Errors
    ///
    /// [`Error::OutOfRange`] as in [`Self::resolve`], or
    /// [`Error::NodeIdOutsideCategory`] if it falls in another category.
    pub fn resolve_for(&self, category: ServiceCategory) -> Result<NodeId> {
        let id = self.resolve()?;
        if category.contains(id) {
            Ok(id)
        } else {
            Err(Error::NodeIdOutsideCategory {
                node_id: id.get(),
                category,
            })
        }
    }
}

/// Hands out the configured node ID and nothing else.
#[derive(Clone, Copy, Debug)]
pub struct StaticAllocator {
    assignment: StaticAssignment,
}

impl StaticAllocator {
    pub const fn new(assignment: StaticAssignment) -> Self {
        Self { assignment }
    }

    pub const fn assignment(&self) -> StaticAssignment {
        self.assignment
    }
}

#[async_trait]
impl NodeIdAllocator for StaticAllocator {
    async fn allocate_node_id(&self, category: ServiceCategory) -> Result<NodeId> {
        let id = self.assignment.resolve_for(category)?;
        tracing::info!(%category, node_id = %id, "using statically assigned node id");
        Ok(id)
    }

    async fn release_node_id(&self, _: ServiceCategory, _: NodeId) -> Result<()> {
        Ok(())
    }

    async fn refresh_lease(&self, _: ServiceCategory, _: NodeId) -> Result<()> {
        Ok(())
    }
}
