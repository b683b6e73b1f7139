use proptest::prelude::*;
use rustbac_bridge::network::{CovSubscription, DiscoveredDevice};
use rustbac_bridge::{
    BridgeConfig, Coordinator, CovNotification, CovPropertyValue, DeviceAddress, NetworkCall,
    NetworkError, NetworkStack, ObjectId, ObjectType, PropertyId, PropertyKey, PropertyValue,
    SimulatedNetwork, SubscribeRequest, SubscriptionManager, TaskKind, UnsubscribeRequest,
    UpdateSource, WriteProperty, WriteRequest,
};
use std::time::Duration;
use tokio::time::{sleep, timeout};

fn av(instance: u32) -> ObjectId {
    ObjectId::new(ObjectType::AnalogValue, instance)
}

fn quiet_config() -> BridgeConfig {
    BridgeConfig::default()
        .with_poll_interval(Duration::from_secs(3600))
        .with_discovery(false)
}

fn subscribe(device_id: u32, object_id: ObjectId) -> SubscribeRequest {
    SubscribeRequest {
        device_id,
        object_id,
        confirmed: false,
        lifetime_seconds: 600,
    }
}

async fn wait_for_active(subscriptions: &SubscriptionManager, count: usize) {
    timeout(Duration::from_secs(5), async {
        while subscriptions.active().await.len() != count {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("subscription count not reached in time");
}

async fn started<N: NetworkStack>(network: N, config: BridgeConfig) -> Coordinator<N> {
    let mut coordinator = Coordinator::new(network, config).unwrap();
    coordinator.start().await.unwrap();
    coordinator
}

#[tokio::test]
async fn later_write_wins_after_both_confirm() {
    let network = SimulatedNetwork::fleet(1, 1, 1, 0).await;
    let coordinator = started(network.clone(), quiet_config()).await;
    let mut updates = coordinator.registry().subscribe_updates();
    let requests = coordinator.requests();

    for value in [10.0, 20.0] {
        requests
            .write(WriteRequest::new(
                1,
                av(0),
                PropertyId::PresentValue,
                PropertyValue::Real(value),
            ))
            .unwrap();
    }
    for _ in 0..2 {
        updates.recv().await.unwrap();
    }

    let key = PropertyKey::new(1, av(0), PropertyId::PresentValue);
    let record = coordinator.registry().get(&key).await.unwrap();
    assert_eq!(record.value, PropertyValue::Real(20.0));
    assert_eq!(record.source, UpdateSource::Write);
    assert_eq!(
        network.value(1, av(0), PropertyId::PresentValue).await,
        Some(PropertyValue::Real(20.0))
    );
    coordinator.shutdown().await;
}

#[tokio::test]
async fn unknown_device_does_not_block_the_next_write() {
    let network = SimulatedNetwork::fleet(1, 1, 1, 0).await;
    let coordinator = started(network.clone(), quiet_config()).await;
    let mut updates = coordinator.registry().subscribe_updates();
    let requests = coordinator.requests();

    requests
        .write(WriteRequest::new(
            404,
            av(0),
            PropertyId::PresentValue,
            PropertyValue::Real(1.0),
        ))
        .unwrap();
    requests
        .write(WriteRequest::new(
            1,
            av(0),
            PropertyId::PresentValue,
            PropertyValue::Real(2.0),
        ))
        .unwrap();

    let record = updates.recv().await.unwrap();
    assert_eq!(record.key.device_id, 1);
    assert_eq!(record.value, PropertyValue::Real(2.0));
    assert_eq!(
        network
            .count_calls(|c| matches!(c, NetworkCall::ResolveAddress { device_id: 404 }))
            .await,
        1
    );
    assert_eq!(coordinator.running_tasks().len(), 4);
    coordinator.shutdown().await;
}

#[tokio::test]
async fn only_one_write_is_ever_in_flight() {
    let network = SimulatedNetwork::fleet(1, 4, 2, 0)
        .await
        .with_latency(Duration::from_millis(3));
    let coordinator = started(network.clone(), quiet_config()).await;
    let mut updates = coordinator.registry().subscribe_updates();
    let requests = coordinator.requests();

    for device_id in 1..=4 {
        for instance in 0..2 {
            requests
                .write(WriteRequest::new(
                    device_id,
                    av(instance),
                    PropertyId::PresentValue,
                    PropertyValue::Real(device_id as f32),
                ))
                .unwrap();
        }
    }
    for _ in 0..8 {
        updates.recv().await.unwrap();
    }
    assert_eq!(network.max_concurrent_writes().await, 1);
    coordinator.shutdown().await;
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn writes_reach_devices_in_submission_order(
        writes in proptest::collection::vec((1u32..=3, -1000i32..1000), 1..20)
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let (sent, last_per_device, stored) = runtime.block_on(async {
            let network = SimulatedNetwork::fleet(1, 3, 1, 0).await;
            let coordinator = started(network.clone(), quiet_config()).await;
            let mut updates = coordinator.registry().subscribe_updates();
            let requests = coordinator.requests();

            for &(device_id, value) in &writes {
                requests
                    .write(WriteRequest::new(
                        device_id,
                        av(0),
                        PropertyId::PresentValue,
                        PropertyValue::Real(value as f32),
                    ))
                    .unwrap();
            }
            for _ in 0..writes.len() {
                updates.recv().await.unwrap();
            }

            let sent: Vec<(DeviceAddress, PropertyValue)> = network
                .calls()
                .await
                .into_iter()
                .filter_map(|call| match call {
                    NetworkCall::Write { address, request } => Some((address, request.value)),
                    _ => None,
                })
                .collect();

            let mut last_per_device = Vec::new();
            let mut stored = Vec::new();
            for device_id in 1..=3u32 {
                let last = writes
                    .iter()
                    .rev()
                    .find(|(id, _)| *id == device_id)
                    .map(|(_, value)| PropertyValue::Real(*value as f32));
                last_per_device.push(last);
                stored.push(
                    coordinator
                        .registry()
                        .get(&PropertyKey::new(device_id, av(0), PropertyId::PresentValue))
                        .await
                        .map(|record| record.value),
                );
            }
            coordinator.shutdown().await;
            (sent, last_per_device, stored)
        });

        let expected: Vec<(DeviceAddress, PropertyValue)> = writes
            .iter()
            .map(|&(device_id, value)| {
                (
                    SimulatedNetwork::address_for(device_id),
                    PropertyValue::Real(value as f32),
                )
            })
            .collect();
        prop_assert_eq!(sent, expected);
        prop_assert_eq!(stored, last_per_device);
    }
}

#[tokio::test]
async fn duplicate_subscription_leaves_one_active_record() {
    let network = SimulatedNetwork::fleet(5, 1, 13, 0).await;
    let coordinator = started(network.clone(), quiet_config()).await;
    let requests = coordinator.requests();
    let subscriptions = coordinator.subscriptions();

    requests.subscribe(subscribe(5, av(12))).unwrap();
    requests.subscribe(subscribe(5, av(12))).unwrap();
    requests.subscribe(subscribe(5, av(3))).unwrap();
    wait_for_active(&subscriptions, 2).await;

    let on_pair = subscriptions
        .active()
        .await
        .into_iter()
        .filter(|record| record.object_id == av(12))
        .count();
    assert_eq!(on_pair, 1);
    assert_eq!(
        network
            .count_calls(|c| matches!(c, NetworkCall::Subscribe { .. }))
            .await,
        2
    );
    coordinator.shutdown().await;
}

#[tokio::test]
async fn unsubscribe_of_unknown_pair_changes_nothing() {
    let network = SimulatedNetwork::fleet(1, 1, 3, 0).await;
    let coordinator = started(network.clone(), quiet_config()).await;
    let requests = coordinator.requests();
    let subscriptions = coordinator.subscriptions();

    requests.subscribe(subscribe(1, av(0))).unwrap();
    requests.subscribe(subscribe(1, av(1))).unwrap();
    wait_for_active(&subscriptions, 2).await;

    requests
        .unsubscribe(UnsubscribeRequest {
            device_id: 1,
            object_id: av(2),
        })
        .unwrap();
    requests
        .unsubscribe(UnsubscribeRequest {
            device_id: 1,
            object_id: av(1),
        })
        .unwrap();
    wait_for_active(&subscriptions, 1).await;

    assert_eq!(subscriptions.active().await[0].object_id, av(0));
    assert_eq!(
        network
            .count_calls(|c| matches!(c, NetworkCall::Unsubscribe { .. }))
            .await,
        1
    );
    coordinator.shutdown().await;
}

fn present_value_reads(call: &NetworkCall) -> bool {
    matches!(
        call,
        NetworkCall::Read {
            property_id: PropertyId::PresentValue,
            ..
        }
    )
}

#[tokio::test(start_paused = true)]
async fn refresh_restarts_the_poll_interval() {
    let network = SimulatedNetwork::fleet(1, 1, 1, 0).await;
    let config = BridgeConfig::default().with_poll_interval(Duration::from_secs(5));
    let coordinator = started(network.clone(), config).await;
    let start = tokio::time::Instant::now();

    tokio::time::sleep_until(start + Duration::from_secs(1)).await;
    coordinator.requests().refresh();

    tokio::time::sleep_until(start + Duration::from_millis(5_500)).await;
    assert_eq!(network.count_calls(present_value_reads).await, 0);

    tokio::time::sleep_until(start + Duration::from_millis(6_100)).await;
    assert_eq!(network.count_calls(present_value_reads).await, 1);

    tokio::time::sleep_until(start + Duration::from_millis(11_100)).await;
    assert_eq!(network.count_calls(present_value_reads).await, 2);
    coordinator.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn polls_on_the_interval_without_refresh() {
    let network = SimulatedNetwork::fleet(1, 2, 2, 1).await;
    let config = BridgeConfig::default().with_poll_interval(Duration::from_secs(5));
    let coordinator = started(network.clone(), config).await;
    let start = tokio::time::Instant::now();

    tokio::time::sleep_until(start + Duration::from_millis(4_900)).await;
    assert_eq!(network.count_calls(present_value_reads).await, 0);
    tokio::time::sleep_until(start + Duration::from_millis(5_100)).await;
    assert_eq!(network.count_calls(present_value_reads).await, 6);

    let snapshot = coordinator.registry().snapshot().await;
    assert_eq!(snapshot.values.len(), 6);
    assert!(snapshot
        .values
        .iter()
        .all(|record| record.source == UpdateSource::Poll));
    coordinator.shutdown().await;
}

#[tokio::test]
async fn shutdown_unsubscribes_everything_then_closes() {
    let network = SimulatedNetwork::fleet(1, 3, 1, 0).await;
    let coordinator = started(network.clone(), quiet_config()).await;
    let requests = coordinator.requests();
    let subscriptions = coordinator.subscriptions();
    for device_id in 1..=3 {
        requests.subscribe(subscribe(device_id, av(0))).unwrap();
    }
    wait_for_active(&subscriptions, 3).await;

    let report = coordinator.shutdown().await;
    assert_eq!(report.stopped.len(), 4);
    assert!(report.failed_tasks.is_empty());
    assert_eq!(report.teardown.attempted, 3);
    assert!(report.teardown.failed.is_empty());

    let calls = network.calls().await;
    let unsubscribes = calls
        .iter()
        .filter(|c| matches!(c, NetworkCall::Unsubscribe { .. }))
        .count();
    assert_eq!(unsubscribes, 3);
    assert_eq!(calls.last(), Some(&NetworkCall::Close));
    assert!(network.is_closed().await);
    assert_eq!(network.open_subscriptions().await, 0);
    assert!(subscriptions.active().await.is_empty());
    assert!(requests
        .write(WriteRequest::new(
            1,
            av(0),
            PropertyId::PresentValue,
            PropertyValue::Null
        ))
        .is_err());
}

#[tokio::test]
async fn shutdown_completes_when_unsubscribes_fail() {
    let network = SimulatedNetwork::fleet(1, 2, 1, 0).await;
    let coordinator = started(network.clone(), quiet_config()).await;
    let requests = coordinator.requests();
    let subscriptions = coordinator.subscriptions();
    requests.subscribe(subscribe(1, av(0))).unwrap();
    requests.subscribe(subscribe(2, av(0))).unwrap();
    wait_for_active(&subscriptions, 2).await;
    network.fail_unsubscribes(1).await;
    network.fail_unsubscribes(2).await;

    let report = coordinator.shutdown().await;
    assert_eq!(report.teardown.attempted, 2);
    assert_eq!(report.teardown.failed.len(), 2);
    assert!(network.is_closed().await);
}

#[tokio::test]
async fn cov_notifications_reach_the_registry() {
    let network = SimulatedNetwork::fleet(7, 1, 1, 0).await;
    let coordinator = started(network.clone(), quiet_config()).await;
    let subscriptions = coordinator.subscriptions();
    coordinator.requests().subscribe(subscribe(7, av(0))).unwrap();
    wait_for_active(&subscriptions, 1).await;
    let record = subscriptions.active().await.remove(0);

    let mut updates = coordinator.registry().subscribe_updates();
    let applied = coordinator
        .ingest_notification(CovNotification {
            source: record.address,
            subscriber_process_id: record.subscriber_process_id,
            initiating_device_id: 7,
            monitored_object_id: av(0),
            time_remaining_seconds: 590,
            values: vec![
                CovPropertyValue {
                    property_id: PropertyId::PresentValue,
                    array_index: None,
                    value: PropertyValue::Real(23.25),
                },
                CovPropertyValue {
                    property_id: PropertyId::StatusFlags,
                    array_index: None,
                    value: PropertyValue::BitString {
                        unused_bits: 4,
                        data: vec![0x00],
                    },
                },
            ],
        })
        .await;
    assert_eq!(applied, 2);

    let first = updates.recv().await.unwrap();
    assert_eq!(first.source, UpdateSource::Cov);
    assert_eq!(first.value, PropertyValue::Real(23.25));
    coordinator.shutdown().await;
}

/// Delegates to a simulated fleet but panics on every write.
struct PanicOnWrite(SimulatedNetwork);

impl NetworkStack for PanicOnWrite {
    async fn resolve_address(&self, device_id: u32) -> Result<Option<DeviceAddress>, NetworkError> {
        self.0.resolve_address(device_id).await
    }

    async fn who_is(&self, range: Option<(u32, u32)>) -> Result<Vec<DiscoveredDevice>, NetworkError> {
        self.0.who_is(range).await
    }

    async fn read_property(
        &self,
        address: DeviceAddress,
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
    ) -> Result<PropertyValue, NetworkError> {
        self.0
            .read_property(address, object_id, property_id, array_index)
            .await
    }

    async fn write_property(
        &self,
        _address: DeviceAddress,
        _request: &WriteProperty,
    ) -> Result<(), NetworkError> {
        panic!("write path fault")
    }

    async fn subscribe_cov(
        &self,
        address: DeviceAddress,
        request: &CovSubscription,
    ) -> Result<(), NetworkError> {
        self.0.subscribe_cov(address, request).await
    }

    async fn unsubscribe_cov(
        &self,
        address: DeviceAddress,
        subscriber_process_id: u32,
        object_id: ObjectId,
    ) -> Result<(), NetworkError> {
        self.0
            .unsubscribe_cov(address, subscriber_process_id, object_id)
            .await
    }

    async fn close(&self) {
        self.0.close().await
    }
}

#[tokio::test]
async fn a_panicking_loop_does_not_take_down_the_others() {
    let fleet = SimulatedNetwork::fleet(1, 1, 2, 0).await;
    let coordinator = started(PanicOnWrite(fleet.clone()), quiet_config()).await;
    let requests = coordinator.requests();

    requests
        .write(WriteRequest::new(
            1,
            av(0),
            PropertyId::PresentValue,
            PropertyValue::Real(1.0),
        ))
        .unwrap();
    timeout(Duration::from_secs(5), async {
        while coordinator
            .running_tasks()
            .contains(&TaskKind::WriteSerializer)
        {
            sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("write serializer should have stopped");

    let subscriptions = coordinator.subscriptions();
    requests.subscribe(subscribe(1, av(1))).unwrap();
    wait_for_active(&subscriptions, 1).await;
    assert_eq!(coordinator.running_tasks().len(), 3);

    let report = coordinator.shutdown().await;
    assert_eq!(report.failed_tasks, vec![TaskKind::WriteSerializer]);
    assert_eq!(report.stopped.len(), 3);
    assert_eq!(report.teardown.attempted, 1);
    assert!(fleet.is_closed().await);
}

#[tokio::test]
async fn startup_discovery_feeds_the_first_poll() {
    let network = SimulatedNetwork::fleet(20, 2, 1, 1).await;
    let coordinator = started(network.clone(), quiet_config().with_discovery(true)).await;
    assert!(*coordinator.startup_complete().borrow());

    let targets = coordinator.registry().polling_targets().await;
    assert_eq!(targets.len(), 2);
    assert!(targets.iter().all(|target| target.objects.len() == 2));

    let summary = rustbac_bridge::poller::poll_once(
        coordinator.network(),
        &coordinator.registry(),
        &[PropertyId::PresentValue],
    )
    .await;
    assert_eq!(summary.reads, 4);
    assert_eq!(summary.failures, 0);
    coordinator.shutdown().await;
}
