//! Startup composition: pick one allocator, claim a node ID, hand back a
//! generator bound to it.
//!
//! ```
//! use std::sync::Arc;
//!
//! use fleetflake::{FacadeConfig, NodeIdFacade, ServiceCategory, Strategy, store::MemoryStore};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> fleetflake::Result<()> {
//! let service = NodeIdFacade::new(FacadeConfig::new(ServiceCategory::Order))
//!     .with_store(Arc::new(MemoryStore::new()))
//!     .start()
//!     .await?;
//!
//! assert_eq!(service.strategy(), Strategy::Store);
//! assert_eq!(service.node_id().get(), 1024);
//! let id: i64 = service.generate_i64();
//! assert!(id > 0);
//!
//! service.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use core::{fmt, str::FromStr, time::Duration};
use std::sync::Arc;

use tracing::instrument;

use crate::{
    allocator::{
        Allocator, FallbackAllocator, FingerprintAllocator, NodeIdAllocator, StaticAllocator,
        StaticAssignment, StoreAllocator, StoreAllocatorConfig,
    },
    error::{Error, Result},
    generator::Generator,
    id::SnowflakeId,
    partition::{NodeId, ServiceCategory},
    store::{CoordinationStore, StoreError},
};

/// Which allocator the facade uses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Strategy {
    /// Store if one is configured, else fingerprint if opted in, else
    /// fallback.
    #[default]
    Auto,
    Store,
    Fingerprint,
    Fallback,
    Static,
}

impl Strategy {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Store => "store",
            Self::Fingerprint => "fingerprint",
            Self::Fallback => "fallback",
            Self::Static => "static",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "store" | "etcd" => Ok(Self::Store),
            "fingerprint" => Ok(Self::Fingerprint),
            "fallback" => Ok(Self::Fallback),
            "static" => Ok(Self::Static),
            other => Err(Error::InvalidConfig(format!("unknown strategy {other:?}"))),
        }
    }
}

/// Everything the facade needs to decide how to obtain a node ID.
#[derive(Clone, Debug)]
pub struct FacadeConfig {
    pub category: ServiceCategory,
    pub strategy: Strategy,
    /// Coordination store endpoints. Non-empty selects the store allocator
    /// under [`Strategy::Auto`].
    pub store_endpoints: Vec<String>,
    pub static_assignment: Option<StaticAssignment>,
    /// Explicit opt-in to the machine-fingerprint allocator.
    pub use_fingerprint: bool,
    pub store: StoreAllocatorConfig,
    /// Retry through the fallback allocator when the store allocator fails
    /// with a coordination failure.
    pub fallback_on_store_failure: bool,
}

impl FacadeConfig {
    pub fn new(category: ServiceCategory) -> Self {
        Self {
            category,
            strategy: Strategy::Auto,
            store_endpoints: Vec::new(),
            static_assignment: None,
            use_fingerprint: false,
            store: StoreAllocatorConfig::default(),
            fallback_on_store_failure: true,
        }
    }
}

/// Chooses an allocation strategy once and runs it.
#[derive(Clone)]
pub struct NodeIdFacade {
    config: FacadeConfig,
    store: Option<Arc<dyn CoordinationStore>>,
}

impl NodeIdFacade {
    pub fn new(config: FacadeConfig) -> Self {
        Self {
            config,
            store: None,
        }
    }

    /// Uses `store` for the store strategy instead of connecting to the
    /// configured endpoints.
    pub fn with_store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &FacadeConfig {
        &self.config
    }

    /// Resolves [`Strategy::Auto`] against the configuration.
    pub fn select_strategy(&self) -> Strategy {
        match self.config.strategy {
            Strategy::Auto if self.store.is_some() || !self.config.store_endpoints.is_empty() => {
                Strategy::Store
            }
            Strategy::Auto if self.config.use_fingerprint => Strategy::Fingerprint,
            Strategy::Auto => Strategy::Fallback,
            explicit => explicit,
        }
    }

    /// Allocates a node ID and builds the generator for it.
    ///
    /// # Errors
    ///
    /// Any allocation failure. Coordination failures of the store allocator
    /// are only returned when `fallback_on_store_failure` is off.
    #[instrument(skip(self), fields(category = %self.config.category))]
    pub async fn start(self) -> Result<IdService> {
        let strategy = self.select_strategy();
        tracing::info!(%strategy, "selected node id allocator");

        let allocator = match strategy {
            Strategy::Store => self.store_allocator(),
            Strategy::Fingerprint => Ok(Allocator::Fingerprint(FingerprintAllocator::new())),
            Strategy::Static => self.static_allocator(),
            Strategy::Fallback | Strategy::Auto => Ok(self.fallback_allocator()),
        };

        match self.allocate_with(strategy, allocator).await {
            Err(e)
                if strategy == Strategy::Store
                    && e.is_coordination_failure()
                    && self.config.fallback_on_store_failure =>
            {
                tracing::warn!(error = %e, "store allocation failed, falling back");
                self.allocate_with(Strategy::Fallback, Ok(self.fallback_allocator()))
                    .await
            }
            other => other,
        }
    }

    async fn allocate_with(
        &self,
        strategy: Strategy,
        allocator: Result<Allocator>,
    ) -> Result<IdService> {
        let allocator = allocator?;
        let category = self.config.category;
        let node_id = allocator.allocate_node_id(category).await?;
        Ok(IdService {
            strategy,
            category,
            generator: Generator::new(node_id),
            allocator,
        })
    }

    fn store_allocator(&self) -> Result<Allocator> {
        let store = match &self.store {
            Some(store) => Arc::clone(store),
            None => connect(&self.config.store_endpoints, self.config.store.lease_ttl)?,
        };
        StoreAllocator::new(store, self.config.store.clone()).map(Allocator::Store)
    }

    fn static_allocator(&self) -> Result<Allocator> {
        let assignment = self.config.static_assignment.ok_or_else(|| {
            Error::InvalidConfig("static strategy requires a node id assignment".to_owned())
        })?;
        Ok(Allocator::Static(StaticAllocator::new(assignment)))
    }

    fn fallback_allocator(&self) -> Allocator {
        Allocator::Fallback(FallbackAllocator::new(self.config.static_assignment))
    }
}

impl fmt::Debug for NodeIdFacade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeIdFacade")
            .field("config", &self.config)
            .field("store_injected", &self.store.is_some())
            .finish()
    }
}

#[cfg(feature = "etcd")]
fn connect(endpoints: &[String], request_timeout: Duration) -> Result<Arc<dyn CoordinationStore>> {
    if endpoints.is_empty() {
        return Err(Error::StoreUnavailable(StoreError::Unavailable(
            "no coordination store configured".to_owned(),
        )));
    }
    // Longer than any claim, so the allocator's own deadline fires first.
    let store = crate::store::EtcdStore::new(endpoints)
        .map_err(Error::StoreUnavailable)?
        .with_request_timeout(request_timeout);
    Ok(Arc::new(store))
}

#[cfg(not(feature = "etcd"))]
fn connect(endpoints: &[String], _request_timeout: Duration) -> Result<Arc<dyn CoordinationStore>> {
    let reason = if endpoints.is_empty() {
        "no coordination store configured"
    } else {
        "store endpoints given but built without the `etcd` feature"
    };
    Err(Error::StoreUnavailable(StoreError::Unavailable(reason.to_owned())))
}

/// A claimed node ID with its generator and the allocator that claimed it.
///
/// Hand it (or [`IdService::generator`]) to whatever needs IDs. Call
/// [`IdService::shutdown`] on the way out so the node ID is released through
/// the same allocator.
#[derive(Debug)]
pub struct IdService {
    strategy: Strategy,
    category: ServiceCategory,
    generator: Generator,
    allocator: Allocator,
}

impl IdService {
    /// The strategy that actually produced the node ID.
    pub const fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub const fn category(&self) -> ServiceCategory {
        self.category
    }

    pub const fn node_id(&self) -> NodeId {
        self.generator.node_id()
    }

    pub fn allocator(&self) -> &Allocator {
        &self.allocator
    }

    pub fn generator(&self) -> &Generator {
        &self.generator
    }

    pub fn next_id(&self) -> SnowflakeId {
        self.generator.next_id()
    }

    pub fn generate(&self) -> String {
        self.generator.generate()
    }

    pub fn generate_i64(&self) -> i64 {
        self.generator.generate_i64()
    }

    /// Renews the node ID's lease out of band.
    ///
    /// # Errors
    ///
    /// Whatever the allocator reports; a no-op for coordination-free
    /// strategies.
    pub async fn refresh_lease(&self) -> Result<()> {
        self.allocator
            .refresh_lease(self.category, self.node_id())
            .await
    }

    /// Releases the node ID. The generator goes with it.
    ///
    /// # Errors
    ///
    /// Whatever the allocator reports on release.
    #[instrument(skip(self), fields(node_id = %self.node_id(), allocator = self.allocator.name()))]
    pub async fn shutdown(self) -> Result<()> {
        self.allocator
            .release_node_id(self.category, self.node_id())
            .await
    }
}
