use std::path::Path;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use super::*;
use crate::destination::{MockDestination, SubscriptionFilter};
use crate::event::{EXECUTION_ID_KEY, NODE_FINISHED, NODE_STARTED, WORKFLOW_STARTED};
use crate::storage::{MockDestinationStore, MockExecutionStore};

fn test_config(dir: &Path) -> Config {
    let mut config = Config::for_test(dir);
    config.bus.drain_timeout_ms = 500;
    config
}

async fn make_bus(config: &Config) -> (EventBus, Arc<MockDestinationStore>) {
    let destinations = Arc::new(MockDestinationStore::new());
    let bus = EventBus::initialize(
        config,
        destinations.clone(),
        Arc::new(MockExecutionStore::new()),
    )
    .await
    .unwrap();
    (bus, destinations)
}

async fn is_sent(bus: &EventBus, id: Uuid) -> bool {
    bus.events_sent().await.unwrap().iter().any(|r| r.id == id)
}

async fn wait_until_sent(bus: &EventBus, id: Uuid, timeout: Duration) -> bool {
    tokio::time::timeout(timeout, async {
        while !is_sent(bus, id).await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .is_ok()
}

#[tokio::test]
async fn test_send_without_destinations_auto_confirms() {
    let temp = TempDir::new().unwrap();
    let (bus, _) = make_bus(&test_config(temp.path())).await;

    let record = EventRecord::generic("generic.ping");
    let id = record.id;
    bus.send(record).await.unwrap();

    assert!(is_sent(&bus, id).await);
    assert!(bus.events_unsent().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsubscribed_record_skips_destination_and_auto_confirms() {
    let temp = TempDir::new().unwrap();
    let (bus, _) = make_bus(&test_config(temp.path())).await;
    let d1 = Arc::new(MockDestination::new(
        "d1",
        SubscriptionFilter::events(["node."]),
    ));
    bus.add_destination(d1.clone()).await.unwrap();

    let id = bus
        .send_audit("audit.login", Map::new())
        .await
        .unwrap();

    assert!(is_sent(&bus, id).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(d1.attempts(), 0);
}

#[tokio::test]
async fn test_subscribed_destination_receives_and_confirms() {
    let temp = TempDir::new().unwrap();
    let (bus, _) = make_bus(&test_config(temp.path())).await;
    let d1 = Arc::new(MockDestination::new(
        "d1",
        SubscriptionFilter::events(["node."]),
    ));
    bus.add_destination(d1.clone()).await.unwrap();

    let id = bus
        .send_node(NODE_STARTED, "e1", "A", Map::new())
        .await
        .unwrap();

    assert!(d1.wait_for_deliveries(1, Duration::from_secs(2)).await);
    assert!(wait_until_sent(&bus, id, Duration::from_secs(2)).await);
    assert_eq!(d1.delivered().await[0].id, id);
}

#[tokio::test]
async fn test_unconfirmed_delivery_stays_unsent() {
    let temp = TempDir::new().unwrap();
    let (bus, _) = make_bus(&test_config(temp.path())).await;
    let d1 = Arc::new(MockDestination::new("d1", SubscriptionFilter::all()).without_confirm());
    bus.add_destination(d1.clone()).await.unwrap();

    let record = EventRecord::generic("generic.ping");
    let id = record.id;
    bus.send(record).await.unwrap();

    assert!(d1.wait_for_deliveries(1, Duration::from_secs(2)).await);
    let unsent = bus.events_unsent().await.unwrap();
    assert_eq!(unsent.len(), 1);
    assert_eq!(unsent[0].id, id);
}

#[tokio::test]
async fn test_confirm_is_idempotent() {
    let temp = TempDir::new().unwrap();
    let (bus, _) = make_bus(&test_config(temp.path())).await;
    let d1 = Arc::new(MockDestination::new("d1", SubscriptionFilter::all()).without_confirm());
    bus.add_destination(d1.clone()).await.unwrap();

    let record = EventRecord::generic("generic.ping");
    let id = record.id;
    bus.send(record).await.unwrap();

    let source = ConfirmSource::new("d1", "d1");
    bus.confirm(id, &source).await.unwrap();
    let once = bus.events_sent().await.unwrap();
    bus.confirm(id, &source).await.unwrap();
    let twice = bus.events_sent().await.unwrap();

    assert_eq!(once, twice);
    assert_eq!(bus.events_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_retry_unsent_resends_with_same_id() {
    let temp = TempDir::new().unwrap();
    let (bus, _) = make_bus(&test_config(temp.path())).await;
    let d1 = Arc::new(MockDestination::new("d1", SubscriptionFilter::all()).failing(1));
    bus.add_destination(d1.clone()).await.unwrap();

    let record = EventRecord::generic("generic.ping");
    let id = record.id;
    bus.send(record).await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!is_sent(&bus, id).await);

    assert_eq!(bus.retry_unsent().await.unwrap(), 1);
    assert!(wait_until_sent(&bus, id, Duration::from_secs(2)).await);
    assert_eq!(d1.delivered().await[0].id, id);
    assert_eq!(bus.events_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_sweep_converges_after_failures() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(temp.path());
    config.bus.check_unsent_interval_ms = 50;
    let (bus, _) = make_bus(&config).await;
    let d1 = Arc::new(MockDestination::new("d1", SubscriptionFilter::all()).failing(3));
    bus.add_destination(d1.clone()).await.unwrap();

    let record = EventRecord::generic("generic.ping");
    let id = record.id;
    bus.send(record).await.unwrap();

    assert!(wait_until_sent(&bus, id, Duration::from_secs(5)).await);
    assert!(d1.attempts() >= 4);

    bus.close().await.unwrap();
}

#[tokio::test]
async fn test_streaming_disabled_confirms_without_delivery() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(temp.path());
    config.bus.streaming_enabled = false;
    let (bus, _) = make_bus(&config).await;
    let d1 = Arc::new(MockDestination::new("d1", SubscriptionFilter::all()));
    bus.add_destination(d1.clone()).await.unwrap();

    let id = bus.emit("generic.ping", Map::new()).await.unwrap();

    assert!(is_sent(&bus, id).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(d1.attempts(), 0);
}

#[tokio::test]
async fn test_emit_infers_kind_from_name() {
    let temp = TempDir::new().unwrap();
    let (bus, _) = make_bus(&test_config(temp.path())).await;

    let mut payload = Map::new();
    payload.insert(EXECUTION_ID_KEY.to_string(), json!("e1"));
    bus.emit(WORKFLOW_STARTED, payload).await.unwrap();
    bus.emit("audit.user.login", Map::new()).await.unwrap();

    let kinds: Vec<EventKind> = bus
        .events_all()
        .await
        .unwrap()
        .iter()
        .map(|r| r.kind)
        .collect();
    assert_eq!(kinds, vec![EventKind::Workflow, EventKind::Audit]);
}

#[tokio::test]
async fn test_events_by_execution_id_in_order() {
    let temp = TempDir::new().unwrap();
    let (bus, _) = make_bus(&test_config(temp.path())).await;

    let started = bus
        .send_workflow(WORKFLOW_STARTED, "e1", Map::new())
        .await
        .unwrap();
    let node_started = bus
        .send_node(NODE_STARTED, "e1", "A", Map::new())
        .await
        .unwrap();
    bus.send_node(NODE_STARTED, "e2", "A", Map::new())
        .await
        .unwrap();
    let node_finished = bus
        .send_node(NODE_FINISHED, "e1", "A", Map::new())
        .await
        .unwrap();

    let ids: Vec<Uuid> = bus
        .events_by_execution_id("e1", Some(1))
        .await
        .unwrap()
        .iter()
        .map(|r| r.id)
        .collect();
    assert_eq!(ids, vec![started, node_started, node_finished]);
}

#[tokio::test]
async fn test_test_destination() {
    let temp = TempDir::new().unwrap();
    let (bus, _) = make_bus(&test_config(temp.path())).await;
    let d1 = Arc::new(MockDestination::new("d1", SubscriptionFilter::all()));
    let broken = Arc::new(MockDestination::new("broken", SubscriptionFilter::all()).failing(1));
    bus.add_destination(d1.clone()).await.unwrap();
    bus.add_destination(broken.clone()).await.unwrap();

    assert!(bus.test_destination("d1").await.unwrap());
    assert!(!bus.test_destination("broken").await.unwrap());
    assert!(!bus.test_destination("missing").await.unwrap());

    assert_eq!(d1.delivered().await[0].event_name, DESTINATION_TEST);
    assert!(bus.events_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_destination_admin_passthroughs() {
    let temp = TempDir::new().unwrap();
    let (bus, store) = make_bus(&test_config(temp.path())).await;

    bus.add_destination_from_options(
        DestinationOptions::new("log-1", crate::destination::TransportOptions::Log)
            .with_subscription(SubscriptionFilter::all()),
    )
    .await
    .unwrap();

    assert_eq!(bus.find_destination(None).await.len(), 1);
    assert_eq!(store.saved_ids().await, vec!["log-1".to_string()]);

    assert!(!bus.remove_destination("never-added").await.unwrap());
    assert_eq!(bus.find_destination(None).await.len(), 1);

    assert!(bus.remove_destination("log-1").await.unwrap());
    assert!(bus.find_destination(Some("log-1")).await.is_empty());
    assert!(store.saved_ids().await.is_empty());
}

#[tokio::test]
async fn test_close_is_idempotent_and_rejects_sends() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(temp.path());
    config.bus.check_unsent_interval_ms = 20;
    let (bus, _) = make_bus(&config).await;
    let d1 = Arc::new(MockDestination::new("d1", SubscriptionFilter::all()));
    bus.add_destination(d1.clone()).await.unwrap();

    bus.close().await.unwrap();
    bus.close().await.unwrap();

    assert!(bus.is_closed());
    assert_eq!(d1.state(), crate::destination::LifecycleState::Closed);
    assert!(matches!(
        bus.send(EventRecord::generic("generic.ping")).await,
        Err(BusError::Closed)
    ));
}

#[tokio::test]
async fn test_restart_restores_destinations_and_resends_unsent() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path());
    let destinations = Arc::new(MockDestinationStore::new());
    let executions = Arc::new(MockExecutionStore::new());

    let id = {
        let bus = EventBus::initialize(&config, destinations.clone(), executions.clone())
            .await
            .unwrap();
        let d1 = Arc::new(MockDestination::new("d1", SubscriptionFilter::all()).without_confirm());
        bus.add_destination(d1.clone()).await.unwrap();

        let record = EventRecord::generic("generic.ping");
        let id = record.id;
        bus.send(record).await.unwrap();
        assert!(d1.wait_for_deliveries(1, Duration::from_secs(2)).await);
        bus.close().await.unwrap();
        id
    };

    // The persisted config comes back as a log destination, which confirms.
    let bus = EventBus::initialize(&config, destinations, executions)
        .await
        .unwrap();

    assert_eq!(bus.find_destination(Some("d1")).await.len(), 1);
    assert!(wait_until_sent(&bus, id, Duration::from_secs(2)).await);
    assert_eq!(bus.events_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_bad_persisted_destination_is_skipped() {
    use crate::destination::{TransportOptions, WebhookOptions};

    let temp = TempDir::new().unwrap();
    let destinations = Arc::new(MockDestinationStore::with_destinations([
        DestinationOptions::new("good", TransportOptions::Log),
        DestinationOptions::new("bad", TransportOptions::Webhook(WebhookOptions::new(""))),
    ]));

    let bus = EventBus::initialize(
        &test_config(temp.path()),
        destinations,
        Arc::new(MockExecutionStore::new()),
    )
    .await
    .unwrap();

    let ids: Vec<String> = bus
        .find_destination(None)
        .await
        .into_iter()
        .map(|d| d.id)
        .collect();
    assert_eq!(ids, vec!["good".to_string()]);
}

#[tokio::test]
async fn test_failing_destination_store_does_not_block_startup() {
    let temp = TempDir::new().unwrap();
    let destinations = Arc::new(MockDestinationStore::new());
    destinations.set_fail_on_load(true).await;

    let bus = EventBus::initialize(
        &test_config(temp.path()),
        destinations,
        Arc::new(MockExecutionStore::new()),
    )
    .await
    .unwrap();

    assert!(bus.find_destination(None).await.is_empty());
}

#[tokio::test]
async fn test_durability_failure_halts_bus() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(&temp.path().join("log"));
    config.event_log.max_segment_bytes = 1;
    let (bus, _) = make_bus(&config).await;

    // Rotation after the next write has nowhere to create the new segment.
    tokio::fs::remove_dir_all(&config.event_log.dir).await.unwrap();

    let first = bus.send(EventRecord::generic("generic.first")).await;
    assert!(matches!(first, Err(BusError::Durability(_))));
    assert!(bus.is_halted());
    assert!(bus.log().is_failed().await);

    let second = bus.send(EventRecord::generic("generic.second")).await;
    assert!(matches!(second, Err(BusError::Halted)));
    assert!(matches!(
        bus.confirm(Uuid::new_v4(), &ConfirmSource::bus()).await,
        Err(BusError::Halted)
    ));
}
