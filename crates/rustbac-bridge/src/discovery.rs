//! Who-Is discovery and object-list walk.

use crate::network::{NetworkError, NetworkStack};
use crate::registry::DeviceRegistry;
use crate::types::{DeviceAddress, ObjectId, PropertyId, PropertyValue};
use crate::BridgeError;

/// Upper bound on an object-list length reported element by element; one
/// object per possible instance.
const MAX_OBJECT_LIST_LENGTH: u32 = ObjectId::MAX_INSTANCE + 1;

/// Broadcasts a Who-Is, registers every device that answers and learns its
/// objects. Returns the ids of the devices that answered, in order.
///
/// A device whose object list cannot be read stays registered with no known
/// objects; the walk moves on to the next device.
pub async fn discover<N: NetworkStack>(
    network: &N,
    registry: &DeviceRegistry,
    range: Option<(u32, u32)>,
) -> Result<Vec<u32>, BridgeError> {
    let found = network.who_is(range).await?;
    log::info!("discovery: {} device(s) answered", found.len());

    let mut device_ids = Vec::with_capacity(found.len());
    for device in found {
        registry
            .register_device(device.device_id, device.address)
            .await;
        match walk_objects(network, device.address, device.device_id).await {
            Ok(objects) => {
                log::debug!(
                    "device {} at {}: {} object(s)",
                    device.device_id,
                    device.address,
                    objects.len()
                );
                registry.add_objects(device.device_id, objects).await;
            }
            Err(err) => log::warn!(
                "object walk of device {} failed: {err}",
                device.device_id
            ),
        }
        device_ids.push(device.device_id);
    }
    Ok(device_ids)
}

/// Reads the object list of a device's device object.
///
/// Devices that cannot return the whole list in one response are walked
/// element by element: index 0 gives the length, then indexes `1..=len`.
pub async fn walk_objects<N: NetworkStack>(
    network: &N,
    address: DeviceAddress,
    device_id: u32,
) -> Result<Vec<ObjectId>, BridgeError> {
    let device = ObjectId::device(device_id);
    match network
        .read_property(address, device, PropertyId::ObjectList, None)
        .await
    {
        Ok(value) => return Ok(value.object_ids()),
        Err(err) => log::debug!(
            "device {device_id}: whole object-list read failed ({err}), reading by index"
        ),
    }

    let length = network
        .read_property(address, device, PropertyId::ObjectList, Some(0))
        .await?;
    let length = match length {
        PropertyValue::Unsigned(n) if n <= MAX_OBJECT_LIST_LENGTH => n,
        other => {
            return Err(NetworkError::Remote(format!(
                "device {device_id} reported object-list length {other:?}"
            ))
            .into())
        }
    };

    let mut objects = Vec::new();
    for index in 1..=length {
        let value = network
            .read_property(address, device, PropertyId::ObjectList, Some(index))
            .await?;
        objects.extend(value.object_ids());
    }
    Ok(objects)
}
