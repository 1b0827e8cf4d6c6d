//! Road registry end-to-end tests: runtime composition, the topic agent and
//! the patch loop through an in-process changelog.

mod common;

use common::wait_for;
use roadworks::changelog::memory::MemoryLog;
use roadworks::changelog::LogTransport;
use roadworks::core::config::{Config, LogMode};
use roadworks::core::runtime::{ComponentHealth, Components, Runtime};
use roadworks::core::time::ManualClock;
use roadworks::reconcile::{PatchOperation, PatchSet};
use roadworks::roads::{road_serializer, InMemoryTopicAdmin, Road, RoadPhase, RoadStatus};
use roadworks::store::serializer::frame_data;
use roadworks::store::Serializer;
use std::sync::Arc;
use std::time::Duration;

struct Harness {
    road_log: MemoryLog,
    patch_log: MemoryLog,
    admin: Arc<InMemoryTopicAdmin>,
    runtime: Runtime,
}

fn harness(configure: impl FnOnce(&mut Config)) -> Harness {
    let mut config = Config::with_mode(LogMode::Memory);
    config.store.poll_timeout_ms = 10;
    config.store.sync_timeout_ms = 5_000;
    config.store.catch_up_timeout_ms = 5_000;
    config.reconciler.enabled = false;
    configure(&mut config);

    let road_log = MemoryLog::new("_roads");
    let patch_log = MemoryLog::new("_roadmodification");
    let admin = Arc::new(InMemoryTopicAdmin::new());
    let runtime = Runtime::with_components(
        config,
        Components {
            road_log: Arc::new(road_log.clone()),
            patch_log: Arc::new(patch_log.clone()),
            admin: admin.clone(),
            clock: Arc::new(ManualClock::new(0)),
        },
    )
    .unwrap();

    Harness {
        road_log,
        patch_log,
        admin,
        runtime,
    }
}

fn patches(log: &MemoryLog) -> Vec<PatchSet> {
    log.records(0)
        .into_iter()
        .map(|r| serde_json::from_slice(r.value.as_deref().unwrap()).unwrap())
        .collect()
}

/// Fold a patch set into a road the way the merge process does.
fn merge(road: &Road, patch: &PatchSet) -> Road {
    let mut road = road.clone();
    for op in &patch.operations {
        match op {
            PatchOperation::Add { path, value } | PatchOperation::Replace { path, value }
                if path == "/status" =>
            {
                road.status = Some(serde_json::from_value::<RoadStatus>(value.clone()).unwrap());
            }
            other => panic!("unexpected operation {:?}", other),
        }
    }
    road
}

fn seed(log: &MemoryLog, road: &Road) {
    let serializer = road_serializer();
    log.append(
        &serializer.serialize_key(&road.name),
        Some(&serializer.serialize_value(Some(road)).unwrap()),
    )
    .unwrap();
}

#[tokio::test]
async fn new_road_converges_through_patch_loop() {
    let mut h = harness(|_| {});
    h.runtime.start().await.unwrap();
    assert!(h.runtime.is_ready());
    let store = h.runtime.store().unwrap().clone();

    let road = Road::new("orders");
    store.put("orders".to_string(), road.clone()).unwrap();

    let emitted = patches(&h.patch_log);
    assert_eq!(emitted.len(), 1);
    assert_eq!(emitted[0].document_id, "orders");
    assert_eq!(h.admin.topics(), vec!["road.orders".to_string()]);

    // First merge: PENDING comes back, the agent confirms the topic.
    let road = merge(&road, &emitted[0]);
    assert_eq!(road.phase(), RoadPhase::Pending);
    store.put("orders".to_string(), road.clone()).unwrap();
    let emitted = patches(&h.patch_log);
    assert_eq!(emitted.len(), 2);

    // Second merge: READY comes back, nothing left to say.
    let road = merge(&road, &emitted[1]);
    assert_eq!(road.phase(), RoadPhase::Ready);
    store.put("orders".to_string(), road).unwrap();
    assert_eq!(patches(&h.patch_log).len(), 2);

    assert_eq!(h.runtime.reaction_stats().emitted, 2);
    h.runtime.stop().await.unwrap();
    assert_eq!(h.runtime.health().store, ComponentHealth::Stopped);
}

#[tokio::test]
async fn replayed_roads_do_not_trigger_the_agent() {
    let h = harness(|_| {});
    seed(&h.road_log, &Road::new("legacy"));
    let mut runtime = h.runtime;
    runtime.start().await.unwrap();

    let store = runtime.store().unwrap().clone();
    assert!(store.contains_key("legacy"));
    assert!(patches(&h.patch_log).is_empty());
    assert!(h.admin.topics().is_empty());

    runtime.stop().await.unwrap();
}

#[tokio::test]
async fn passive_runtime_replicates_without_reacting() {
    let mut h = harness(|c| {
        c.agent.enabled = false;
        c.reconciler.enabled = true;
    });
    h.runtime.start().await.unwrap();
    assert_eq!(h.runtime.health().reaction, ComponentHealth::Disabled);
    assert_eq!(h.runtime.health().reconciler, ComponentHealth::Disabled);
    assert!(h.runtime.is_ready());

    let store = h.runtime.store().unwrap().clone();
    store.put("r1".to_string(), Road::new("r1")).unwrap();
    assert_eq!(store.get("r1"), Some(Road::new("r1")));
    assert!(patches(&h.patch_log).is_empty());

    h.runtime.stop().await.unwrap();
}

#[tokio::test]
async fn reconciler_repairs_missing_topic() {
    let mut h = harness(|c| {
        c.reconciler.enabled = true;
        c.reconciler.interval_seconds = 1;
    });
    let mut road = Road::new("clicks");
    road.status = Some(RoadStatus::new(RoadPhase::Ready, "road.clicks").with_partitions(3));
    seed(&h.road_log, &road);

    h.runtime.start().await.unwrap();
    assert_eq!(h.runtime.health().reconciler, ComponentHealth::Healthy);

    let patch_log = h.patch_log.clone();
    let drifted = tokio::task::spawn_blocking(move || {
        wait_for(Duration::from_secs(5), || patch_log.len() >= 1)
    })
    .await
    .unwrap();
    assert!(drifted);

    let emitted = patches(&h.patch_log);
    assert_eq!(merge(&road, &emitted[0]).phase(), RoadPhase::Drifted);
    assert!(h.admin.topics().contains(&"road.clicks".to_string()));

    h.runtime.stop().await.unwrap();
    assert_eq!(h.runtime.health().reconciler, ComponentHealth::Stopped);
}

#[tokio::test]
async fn catch_up_failure_fails_start() {
    let mut h = harness(|_| {});
    h.road_log
        .append(&[0x09], Some(&[0x01, b'{', b'}']))
        .unwrap();

    let err = h.runtime.start().await.unwrap_err();
    assert!(format!("{:#}", err).contains("catch up"));
    assert_eq!(h.runtime.health().store, ComponentHealth::Failed);
    assert!(!h.runtime.is_alive());
}

#[tokio::test]
async fn store_failure_while_running_fails_the_runtime() {
    let mut h = harness(|config| config.reconciler.enabled = true);
    h.runtime.start().await.unwrap();
    assert!(h.runtime.is_ready());
    assert_eq!(h.runtime.health().reconciler, ComponentHealth::Healthy);

    h.road_log
        .append(&frame_data(b"r1"), Some(&frame_data(b"{not json")))
        .unwrap();

    let outcome = tokio::time::timeout(Duration::from_secs(5), h.runtime.supervise())
        .await
        .expect("supervision should end on store failure");
    let err = outcome.unwrap_err();
    assert!(format!("{:#}", err).contains("road store failed"));

    let health = h.runtime.health();
    assert_eq!(health.store, ComponentHealth::Failed);
    assert_eq!(health.reconciler, ComponentHealth::Stopped);
    assert!(!h.runtime.is_alive());
    assert!(!h.runtime.is_ready());
    assert!(!h.runtime.is_running());
}

#[tokio::test]
async fn requested_shutdown_ends_supervision_cleanly() {
    let mut h = harness(|_| {});
    h.runtime.start().await.unwrap();

    h.runtime.shutdown();
    h.runtime.supervise().await.unwrap();
    assert_eq!(h.runtime.health().store, ComponentHealth::Stopped);
    assert!(h.runtime.is_alive());
}
