//! Shared cache of device addresses and last-known property values.
//!
//! The write serializer, the poller and COV ingest publish whole
//! [`PropertyRecord`]s here; the request layer reads them through
//! [`DeviceRegistry::snapshot`] or [`DeviceRegistry::get`] and can follow
//! changes with [`DeviceRegistry::subscribe_updates`].

use crate::network::NetworkStack;
use crate::types::{DeviceAddress, ObjectId, PropertyId, PropertyValue};
use crate::BridgeError;
use std::collections::{BTreeSet, HashMap};
use std::time::SystemTime;
use tokio::sync::{broadcast, RwLock};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// Origin of a registry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum UpdateSource {
    /// Confirming read after a write.
    Write,
    Poll,
    Cov,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropertyKey {
    pub device_id: u32,
    pub object_id: ObjectId,
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
}

impl PropertyKey {
    pub fn new(device_id: u32, object_id: ObjectId, property_id: PropertyId) -> Self {
        Self {
            device_id,
            object_id,
            property_id,
            array_index: None,
        }
    }

    pub fn with_array_index(mut self, array_index: Option<u32>) -> Self {
        self.array_index = array_index;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PropertyRecord {
    pub key: PropertyKey,
    pub value: PropertyValue,
    pub updated_at: SystemTime,
    pub source: UpdateSource,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Device {
    pub device_id: u32,
    pub address: DeviceAddress,
    pub objects: BTreeSet<ObjectId>,
}

/// One device's share of a full poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTarget {
    pub device_id: u32,
    pub address: DeviceAddress,
    pub objects: Vec<ObjectId>,
}

/// Owned, point-in-time copy of the registry for the request layer.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegistrySnapshot {
    pub devices: Vec<Device>,
    pub values: Vec<PropertyRecord>,
}

impl RegistrySnapshot {
    pub fn value(&self, key: &PropertyKey) -> Option<&PropertyRecord> {
        self.values.iter().find(|record| record.key == *key)
    }
}

#[derive(Debug)]
pub struct DeviceRegistry {
    devices: RwLock<HashMap<u32, Device>>,
    values: RwLock<HashMap<PropertyKey, PropertyRecord>>,
    updates: broadcast::Sender<PropertyRecord>,
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceRegistry {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            devices: RwLock::new(HashMap::new()),
            values: RwLock::new(HashMap::new()),
            updates,
        }
    }

    /// Cached address of `device_id`.
    pub async fn resolve_address(&self, device_id: u32) -> Result<DeviceAddress, BridgeError> {
        self.devices
            .read()
            .await
            .get(&device_id)
            .map(|device| device.address)
            .ok_or(BridgeError::DeviceNotFound(device_id))
    }

    /// Cached address of `device_id`, asking the network stack on a miss and
    /// registering the device when it answers.
    pub async fn resolve_or_lookup<N: NetworkStack>(
        &self,
        network: &N,
        device_id: u32,
    ) -> Result<DeviceAddress, BridgeError> {
        if let Ok(address) = self.resolve_address(device_id).await {
            return Ok(address);
        }
        match network.resolve_address(device_id).await? {
            Some(address) => {
                self.register_device(device_id, address).await;
                Ok(address)
            }
            None => Err(BridgeError::DeviceNotFound(device_id)),
        }
    }

    /// Records (or re-addresses) a device. Known objects are kept.
    pub async fn register_device(&self, device_id: u32, address: DeviceAddress) {
        let mut devices = self.devices.write().await;
        devices
            .entry(device_id)
            .and_modify(|device| device.address = address)
            .or_insert_with(|| Device {
                device_id,
                address,
                objects: BTreeSet::new(),
            });
    }

    /// Adds objects to a registered device. Returns `false` when the device
    /// is unknown. The device object itself is never listed.
    pub async fn add_objects(
        &self,
        device_id: u32,
        objects: impl IntoIterator<Item = ObjectId>,
    ) -> bool {
        let mut devices = self.devices.write().await;
        let Some(device) = devices.get_mut(&device_id) else {
            return false;
        };
        let own = ObjectId::device(device_id);
        device
            .objects
            .extend(objects.into_iter().filter(|oid| *oid != own));
        true
    }

    /// Publishes a new value for `key`, replacing any previous record.
    pub async fn upsert(
        &self,
        key: PropertyKey,
        value: PropertyValue,
        source: UpdateSource,
    ) -> PropertyRecord {
        let record = {
            let mut values = self.values.write().await;
            // Stamped under the lock so the newest record carries the newest time.
            let record = PropertyRecord {
                key,
                value,
                updated_at: SystemTime::now(),
                source,
            };
            values.insert(key, record.clone());
            record
        };

        if key.object_id != ObjectId::device(key.device_id) {
            if let Some(device) = self.devices.write().await.get_mut(&key.device_id) {
                device.objects.insert(key.object_id);
            }
        }

        // No receivers is fine.
        let _ = self.updates.send(record.clone());
        record
    }

    pub async fn get(&self, key: &PropertyKey) -> Option<PropertyRecord> {
        self.values.read().await.get(key).cloned()
    }

    pub async fn device(&self, device_id: u32) -> Option<Device> {
        self.devices.read().await.get(&device_id).cloned()
    }

    pub async fn polling_targets(&self) -> Vec<PollTarget> {
        let devices = self.devices.read().await;
        let mut targets: Vec<PollTarget> = devices
            .values()
            .map(|device| PollTarget {
                device_id: device.device_id,
                address: device.address,
                objects: device.objects.iter().copied().collect(),
            })
            .collect();
        targets.sort_by_key(|target| target.device_id);
        targets
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let mut devices: Vec<Device> = self.devices.read().await.values().cloned().collect();
        devices.sort_by_key(|device| device.device_id);
        let mut values: Vec<PropertyRecord> = self.values.read().await.values().cloned().collect();
        values.sort_by_key(|record| record.key);
        RegistrySnapshot { devices, values }
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<PropertyRecord> {
        self.updates.subscribe()
    }
}
