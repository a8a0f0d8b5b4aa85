use std::{collections::HashSet, sync::Arc, time::Duration};

use fleetflake::{
    Error, FacadeConfig, NodeIdFacade, ServiceCategory, StaticAssignment, StoreAllocatorConfig,
    Strategy,
    store::{CoordinationStore, MemoryStore},
};
use futures::future::join_all;

fn facade(store: &Arc<MemoryStore>, category: ServiceCategory) -> NodeIdFacade {
    NodeIdFacade::new(FacadeConfig::new(category)).with_store(store.clone())
}

#[tokio::test(start_paused = true)]
async fn fleet_of_instances_gets_disjoint_node_ids() {
    let store = Arc::new(MemoryStore::new());

    let services = join_all((0..16).map(|_| facade(&store, ServiceCategory::User).start()))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();

    let node_ids: HashSet<_> = services.iter().map(|s| s.node_id()).collect();
    assert_eq!(node_ids.len(), services.len());
    assert!(services.iter().all(|s| s.strategy() == Strategy::Store));
    assert!(node_ids.iter().all(|id| id.get() < 16));

    let mut ids = HashSet::new();
    for service in &services {
        for _ in 0..1_000 {
            assert!(ids.insert(service.generate_i64()));
        }
    }

    for service in services {
        service.shutdown().await.unwrap();
    }
    assert!(store.get_prefix("/fleetflake/").await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_frees_the_node_id_for_the_next_instance() {
    let store = Arc::new(MemoryStore::new());

    let first = facade(&store, ServiceCategory::Order).start().await.unwrap();
    let second = facade(&store, ServiceCategory::Order).start().await.unwrap();
    assert_eq!(first.node_id().get(), 1024);
    assert_eq!(second.node_id().get(), 1025);

    let freed = first.node_id();
    first.shutdown().await.unwrap();

    let third = facade(&store, ServiceCategory::Order).start().await.unwrap();
    assert_eq!(third.node_id(), freed);
    assert_ne!(third.node_id(), second.node_id());
}

#[tokio::test(start_paused = true)]
async fn crashed_instance_is_reclaimed_after_its_ttl() {
    let store = Arc::new(MemoryStore::new());
    let mut config = FacadeConfig::new(ServiceCategory::Payment);
    config.store = StoreAllocatorConfig {
        lease_ttl: Duration::from_secs(30),
        auto_renew: false,
        ..Default::default()
    };

    let crashed = NodeIdFacade::new(config.clone())
        .with_store(store.clone())
        .start()
        .await
        .unwrap();
    let lost = crashed.node_id();
    // No shutdown: the process went away.
    drop(crashed);

    tokio::time::advance(Duration::from_secs(31)).await;

    let next = NodeIdFacade::new(config)
        .with_store(store.clone())
        .start()
        .await
        .unwrap();
    assert_eq!(next.node_id(), lost);
}

#[tokio::test]
async fn unreachable_store_falls_back_to_configured_id() {
    let mut config = FacadeConfig::new(ServiceCategory::Gateway);
    config.strategy = Strategy::Store;
    config.static_assignment = Some(StaticAssignment::Offset {
        category: ServiceCategory::Gateway,
        offset: 12,
    });

    let service = NodeIdFacade::new(config).start().await.unwrap();
    assert_eq!(service.strategy(), Strategy::Fallback);
    assert_eq!(service.node_id().get(), 4096 + 12);
    assert_eq!(service.allocator().name(), "fallback");
    service.refresh_lease().await.unwrap();
    service.shutdown().await.unwrap();
}

#[tokio::test]
async fn store_failure_is_fatal_without_fallback() {
    let mut config = FacadeConfig::new(ServiceCategory::Auth);
    config.strategy = Strategy::Store;
    config.fallback_on_store_failure = false;

    let err = NodeIdFacade::new(config).start().await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert!(err.is_coordination_failure());
}

#[tokio::test(start_paused = true)]
async fn exhausted_category_falls_back() {
    let store = Arc::new(MemoryStore::new());
    for offset in 0..1024 {
        store
            .put(&format!("/fleetflake/auth/allocated/{offset}"), Vec::new(), None)
            .await
            .unwrap();
    }

    let service = facade(&store, ServiceCategory::Auth).start().await.unwrap();
    assert_eq!(service.strategy(), Strategy::Fallback);
    assert!(ServiceCategory::Auth.contains(service.node_id()));
}

#[tokio::test]
async fn fingerprint_opt_in_skips_the_fallback() {
    let mut config = FacadeConfig::new(ServiceCategory::User);
    config.use_fingerprint = true;
    config.static_assignment = Some(StaticAssignment::NodeId(1023));

    let service = NodeIdFacade::new(config).start().await.unwrap();
    assert_eq!(service.strategy(), Strategy::Fingerprint);
    assert_eq!(service.allocator().name(), "fingerprint");
    assert!(ServiceCategory::User.contains(service.node_id()));
}

#[tokio::test]
async fn explicit_static_strategy_rejects_foreign_ids() {
    let mut config = FacadeConfig::new(ServiceCategory::User);
    config.strategy = Strategy::Static;
    config.static_assignment = Some(StaticAssignment::NodeId(2048));

    let err = NodeIdFacade::new(config.clone()).start().await.unwrap_err();
    assert!(matches!(err, Error::NodeIdOutsideCategory { node_id: 2048, .. }));

    config.category = ServiceCategory::Payment;
    let service = NodeIdFacade::new(config).start().await.unwrap();
    assert_eq!(service.node_id().get(), 2048);
    assert_eq!(service.node_id().offset(), 0);
    assert_eq!(service.next_id().node_offset(), 0);
}
