use async_trait::async_trait;

use crate::{
    allocator::{FingerprintAllocator, NodeIdAllocator, StaticAssignment},
    error::Result,
    partition::{NodeId, ServiceCategory},
};

/// Prefers a configured assignment, otherwise derives one from the machine.
///
/// The configured value is used as-is only when it lies inside the requested
/// category's range; anything else is ignored in favour of the fingerprint.
#[derive(Debug, Default)]
pub struct FallbackAllocator {
    assignment: Option<StaticAssignment>,
    fingerprint: FingerprintAllocator,
}

impl FallbackAllocator {
    pub fn new(assignment: Option<StaticAssignment>) -> Self {
        Self::with_fingerprint(assignment, FingerprintAllocator::new())
    }

    pub fn with_fingerprint(
        assignment: Option<StaticAssignment>,
        fingerprint: FingerprintAllocator,
    ) -> Self {
        Self {
            assignment,
            fingerprint,
        }
    }
}

#[async_trait]
impl NodeIdAllocator for FallbackAllocator {
    async fn allocate_node_id(&self, category: ServiceCategory) -> Result<NodeId> {
        if let Some(assignment) = &self.assignment {
            match assignment.resolve_for(category) {
                Ok(id) => {
                    tracing::info!(%category, node_id = %id, "using configured node id");
                    return Ok(id);
                }
                Err(e) => {
                    tracing::warn!(%category, error = %e, "ignoring configured node id");
                }
            }
        }
        self.fingerprint.allocate_node_id(category).await
    }

    async fn release_node_id(&self, category: ServiceCategory, node_id: NodeId) -> Result<()> {
        self.fingerprint.release_node_id(category, node_id).await
    }

    async fn refresh_lease(&self, category: ServiceCategory, node_id: NodeId) -> Result<()> {
        self.fingerprint.refresh_lease(category, node_id).await
    }
}
