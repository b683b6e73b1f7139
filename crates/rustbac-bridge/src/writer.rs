//! The write serializer: one write in flight at a time, in submission order,
//! each confirmed by reading the property back.

use crate::network::NetworkStack;
use crate::registry::{DeviceRegistry, PropertyKey, PropertyRecord, UpdateSource};
use crate::request::QueuedWrite;
use crate::supervisor::{cancelled, Shared};
use crate::BridgeError;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Applies a single write and publishes the device's confirmed value.
///
/// The registry receives the value read back after the write, not the value
/// submitted, so a device that clamps or ignores the write is reflected
/// faithfully.
pub async fn apply_write<N: NetworkStack>(
    network: &N,
    registry: &DeviceRegistry,
    queued: &QueuedWrite,
) -> Result<PropertyRecord, BridgeError> {
    let write = &queued.write;
    let address = registry
        .resolve_or_lookup(network, queued.device_id)
        .await?;

    network.write_property(address, write).await?;
    let confirmed = network
        .read_property(address, write.object_id, write.property_id, write.array_index)
        .await?;

    if confirmed != write.value {
        log::warn!(
            "device {} {} {}: wrote {:?} but read back {:?}",
            queued.device_id,
            write.object_id,
            write.property_id,
            write.value,
            confirmed
        );
    }

    let key = PropertyKey::new(queued.device_id, write.object_id, write.property_id)
        .with_array_index(write.array_index);
    Ok(registry.upsert(key, confirmed, UpdateSource::Write).await)
}

pub(crate) async fn run_write_serializer<N: NetworkStack>(
    shared: Arc<Shared<N>>,
    mut writes: mpsc::UnboundedReceiver<QueuedWrite>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let queued = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => break,
            queued = writes.recv() => match queued {
                Some(queued) => queued,
                None => break,
            },
        };

        match apply_write(&shared.network, &shared.registry, &queued).await {
            Ok(record) => log::info!(
                "write to device {} {} {} confirmed: {:?} (priority {})",
                queued.device_id,
                queued.write.object_id,
                queued.write.property_id,
                record.value,
                queued.write.priority
            ),
            Err(err) => log::error!(
                "write to device {} {} {} failed: {err}",
                queued.device_id,
                queued.write.object_id,
                queued.write.property_id
            ),
        }
    }
    log::debug!("write serializer stopped");
}
