//! Periodic refresh of every known object.

use crate::network::NetworkStack;
use crate::registry::{DeviceRegistry, PropertyKey, UpdateSource};
use crate::supervisor::{cancelled, Shared};
use crate::types::PropertyId;
use std::sync::Arc;
use tokio::sync::watch;

/// Counters for one full poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub reads: usize,
    pub failures: usize,
}

/// Reads `properties` of every known object on every known device.
///
/// A failed read is logged and counted; it never stops the rest of the poll.
pub async fn poll_once<N: NetworkStack>(
    network: &N,
    registry: &DeviceRegistry,
    properties: &[PropertyId],
) -> PollSummary {
    poll_until(network, registry, properties, || false).await
}

async fn poll_until<N: NetworkStack>(
    network: &N,
    registry: &DeviceRegistry,
    properties: &[PropertyId],
    stop: impl Fn() -> bool,
) -> PollSummary {
    let mut summary = PollSummary::default();
    for target in registry.polling_targets().await {
        for &object_id in &target.objects {
            for &property_id in properties {
                if stop() {
                    return summary;
                }
                summary.reads += 1;
                match network
                    .read_property(target.address, object_id, property_id, None)
                    .await
                {
                    Ok(value) => {
                        let key = PropertyKey::new(target.device_id, object_id, property_id);
                        registry.upsert(key, value, UpdateSource::Poll).await;
                    }
                    Err(err) => {
                        summary.failures += 1;
                        log::warn!(
                            "poll of device {} {} {} failed: {err}",
                            target.device_id,
                            object_id,
                            property_id
                        );
                    }
                }
            }
        }
    }
    summary
}

/// Waits for the refresh signal or the poll interval, whichever comes first.
/// A raised signal is cleared and restarts the interval without polling; an
/// elapsed interval runs a full poll.
pub(crate) async fn run_poller<N: NetworkStack>(
    shared: Arc<Shared<N>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = shared.config.poll_interval();
    loop {
        tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => break,
            _ = shared.refresh.wait() => {
                log::debug!("refresh signal consumed; poll interval restarted");
                continue;
            }
            _ = tokio::time::sleep(interval) => {}
        }

        let stop = shutdown.clone();
        let summary = poll_until(
            &shared.network,
            &shared.registry,
            &shared.config.poll_properties,
            move || *stop.borrow(),
        )
        .await;
        if summary.failures > 0 {
            log::warn!(
                "poll finished: {} reads, {} failed",
                summary.reads,
                summary.failures
            );
        } else {
            log::debug!("poll finished: {} reads", summary.reads);
        }
    }
    log::debug!("poller stopped");
}

#[cfg(test)]
mod tests {
    use super::poll_once;
    use crate::registry::{DeviceRegistry, PropertyKey, UpdateSource};
    use crate::simulator::SimulatedNetwork;
    use crate::types::{ObjectId, ObjectType, PropertyId, PropertyValue};

    #[tokio::test]
    async fn failed_reads_do_not_stop_the_poll() {
        let network = SimulatedNetwork::fleet(1, 2, 2, 0).await;
        let registry = DeviceRegistry::new();
        for device_id in 1..=2 {
            registry
                .register_device(device_id, SimulatedNetwork::address_for(device_id))
                .await;
            registry
                .add_objects(
                    device_id,
                    (0..2).map(|i| ObjectId::new(ObjectType::AnalogValue, i)),
                )
                .await;
        }
        let broken = ObjectId::new(ObjectType::AnalogValue, 0);
        network.fail_reads(1, broken).await;
        network
            .set_value(
                2,
                ObjectId::new(ObjectType::AnalogValue, 1),
                PropertyId::PresentValue,
                PropertyValue::Real(22.5),
            )
            .await;

        let summary = poll_once(&network, &registry, &[PropertyId::PresentValue]).await;
        assert_eq!(summary.reads, 4);
        assert_eq!(summary.failures, 1);

        let snapshot = registry.snapshot().await;
        assert_eq!(snapshot.values.len(), 3);
        let record = snapshot
            .value(&PropertyKey::new(
                2,
                ObjectId::new(ObjectType::AnalogValue, 1),
                PropertyId::PresentValue,
            ))
            .unwrap();
        assert_eq!(record.value, PropertyValue::Real(22.5));
        assert_eq!(record.source, UpdateSource::Poll);
    }

    #[tokio::test]
    async fn polls_every_configured_property() {
        let network = SimulatedNetwork::fleet(3, 1, 1, 1).await;
        let registry = DeviceRegistry::new();
        registry
            .register_device(3, SimulatedNetwork::address_for(3))
            .await;
        registry
            .add_objects(
                3,
                [
                    ObjectId::new(ObjectType::AnalogValue, 0),
                    ObjectId::new(ObjectType::BinaryValue, 0),
                ],
            )
            .await;

        let summary = poll_once(
            &network,
            &registry,
            &[PropertyId::PresentValue, PropertyId::StatusFlags],
        )
        .await;
        assert_eq!(summary.reads, 4);
        assert_eq!(summary.failures, 0);
    }
}
