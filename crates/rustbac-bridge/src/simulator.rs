//! In-memory simulated BACnet fleet.
//!
//! [`SimulatedNetwork`] implements [`NetworkStack`] over a set of fake
//! devices. It records every call and supports fault injection, which makes
//! it useful for development and tests without physical hardware.

use crate::network::{CovSubscription, DiscoveredDevice, NetworkError, NetworkStack, WriteProperty};
use crate::types::{DeviceAddress, ObjectId, ObjectType, PropertyId, PropertyValue};
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// A call received by the simulated network, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum NetworkCall {
    ResolveAddress {
        device_id: u32,
    },
    WhoIs {
        range: Option<(u32, u32)>,
    },
    Read {
        address: DeviceAddress,
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
    },
    Write {
        address: DeviceAddress,
        request: WriteProperty,
    },
    Subscribe {
        address: DeviceAddress,
        request: CovSubscription,
    },
    Unsubscribe {
        address: DeviceAddress,
        subscriber_process_id: u32,
        object_id: ObjectId,
    },
    Close,
}

type ObjectTable = HashMap<ObjectId, HashMap<PropertyId, PropertyValue>>;

#[derive(Debug)]
struct SimDevice {
    device_id: u32,
    address: DeviceAddress,
    objects: ObjectTable,
}

#[derive(Debug, Default)]
struct SimState {
    devices: HashMap<u32, SimDevice>,
    calls: Vec<NetworkCall>,
    failing_reads: HashSet<(u32, ObjectId)>,
    failing_writes: HashSet<(u32, ObjectId)>,
    failing_subscribes: HashSet<u32>,
    failing_unsubscribes: HashSet<u32>,
    clamps: HashMap<(u32, ObjectId), (f64, f64)>,
    unsegmented: HashSet<u32>,
    object_list_lengths: HashMap<u32, PropertyValue>,
    subscriptions: HashSet<(u32, u32, ObjectId)>,
    writes_in_flight: usize,
    max_writes_in_flight: usize,
    closed: bool,
}

impl SimState {
    fn device_at(&self, address: DeviceAddress) -> Result<&SimDevice, NetworkError> {
        self.devices
            .values()
            .find(|device| device.address == address)
            .ok_or(NetworkError::Unreachable(address))
    }

    fn device_at_mut(&mut self, address: DeviceAddress) -> Result<&mut SimDevice, NetworkError> {
        self.devices
            .values_mut()
            .find(|device| device.address == address)
            .ok_or(NetworkError::Unreachable(address))
    }

    fn ensure_open(&self) -> Result<(), NetworkError> {
        if self.closed {
            Err(NetworkError::Closed)
        } else {
            Ok(())
        }
    }
}

/// A simulated fleet of BACnet devices. Clones share the same fleet.
#[derive(Debug, Clone, Default)]
pub struct SimulatedNetwork {
    state: Arc<Mutex<SimState>>,
    latency: Duration,
}

impl SimulatedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds `devices` devices numbered from `first_device_id`, each with
    /// `analog_values` analog-value and `binary_values` binary-value objects.
    pub async fn fleet(
        first_device_id: u32,
        devices: u32,
        analog_values: u32,
        binary_values: u32,
    ) -> Self {
        let network = Self::new();
        for device_id in first_device_id..first_device_id.saturating_add(devices) {
            network.add_device(device_id).await;
            for i in 0..analog_values {
                let oid = ObjectId::new(ObjectType::AnalogValue, i);
                network
                    .add_object(device_id, oid, analog_properties(&format!("AV-{i}")))
                    .await;
            }
            for i in 0..binary_values {
                let oid = ObjectId::new(ObjectType::BinaryValue, i);
                network
                    .add_object(device_id, oid, binary_properties(&format!("BV-{i}")))
                    .await;
            }
        }
        network
    }

    /// Delays every call by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Deterministic address for a simulated device.
    pub fn address_for(device_id: u32) -> DeviceAddress {
        let [_, hi, mid, lo] = device_id.to_be_bytes();
        DeviceAddress::bacnet_default(IpAddr::V4(Ipv4Addr::new(10, hi, mid, lo)))
    }

    pub async fn add_device(&self, device_id: u32) {
        let device_oid = ObjectId::device(device_id);
        let mut device_props = HashMap::new();
        device_props.insert(
            PropertyId::ObjectIdentifier,
            PropertyValue::ObjectId(device_oid),
        );
        device_props.insert(
            PropertyId::ObjectName,
            PropertyValue::CharacterString(format!("SimDevice-{device_id}")),
        );
        device_props.insert(
            PropertyId::ObjectType,
            PropertyValue::Enumerated(ObjectType::Device.to_u16() as u32),
        );
        let mut objects = HashMap::new();
        objects.insert(device_oid, device_props);

        self.state.lock().await.devices.insert(
            device_id,
            SimDevice {
                device_id,
                address: Self::address_for(device_id),
                objects,
            },
        );
    }

    /// Adds (or replaces) an object on a device. Ignored for unknown devices.
    pub async fn add_object(
        &self,
        device_id: u32,
        object_id: ObjectId,
        properties: HashMap<PropertyId, PropertyValue>,
    ) {
        if let Some(device) = self.state.lock().await.devices.get_mut(&device_id) {
            device.objects.insert(object_id, properties);
        }
    }

    /// Changes a value on the device side, as a local operator would.
    pub async fn set_value(
        &self,
        device_id: u32,
        object_id: ObjectId,
        property_id: PropertyId,
        value: PropertyValue,
    ) {
        if let Some(props) = self
            .state
            .lock()
            .await
            .devices
            .get_mut(&device_id)
            .and_then(|device| device.objects.get_mut(&object_id))
        {
            props.insert(property_id, value);
        }
    }

    pub async fn value(
        &self,
        device_id: u32,
        object_id: ObjectId,
        property_id: PropertyId,
    ) -> Option<PropertyValue> {
        self.state
            .lock()
            .await
            .devices
            .get(&device_id)
            .and_then(|device| device.objects.get(&object_id))
            .and_then(|props| props.get(&property_id))
            .cloned()
    }

    pub async fn fail_reads(&self, device_id: u32, object_id: ObjectId) {
        self.state
            .lock()
            .await
            .failing_reads
            .insert((device_id, object_id));
    }

    pub async fn fail_writes(&self, device_id: u32, object_id: ObjectId) {
        self.state
            .lock()
            .await
            .failing_writes
            .insert((device_id, object_id));
    }

    pub async fn fail_subscribes(&self, device_id: u32) {
        self.state.lock().await.failing_subscribes.insert(device_id);
    }

    pub async fn fail_unsubscribes(&self, device_id: u32) {
        self.state.lock().await.failing_unsubscribes.insert(device_id);
    }

    /// Makes the device silently clamp numeric writes to `min..=max`.
    pub async fn clamp_writes(&self, device_id: u32, object_id: ObjectId, min: f64, max: f64) {
        self.state
            .lock()
            .await
            .clamps
            .insert((device_id, object_id), (min, max));
    }

    /// Makes the device refuse to return its object list in one piece, as a
    /// device without segmentation support would.
    pub async fn reject_whole_object_list(&self, device_id: u32) {
        self.state.lock().await.unsegmented.insert(device_id);
    }

    /// Overrides what the device answers for `object-list[0]`.
    pub async fn report_object_list_length(&self, device_id: u32, length: PropertyValue) {
        self.state
            .lock()
            .await
            .object_list_lengths
            .insert(device_id, length);
    }

    pub async fn calls(&self) -> Vec<NetworkCall> {
        self.state.lock().await.calls.clone()
    }

    pub async fn count_calls(&self, filter: impl Fn(&NetworkCall) -> bool) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|call| filter(call))
            .count()
    }

    /// Subscriptions the devices currently believe are open.
    pub async fn open_subscriptions(&self) -> usize {
        self.state.lock().await.subscriptions.len()
    }

    pub async fn max_concurrent_writes(&self) -> usize {
        self.state.lock().await.max_writes_in_flight
    }

    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    async fn delay(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }
}

impl NetworkStack for SimulatedNetwork {
    async fn resolve_address(&self, device_id: u32) -> Result<Option<DeviceAddress>, NetworkError> {
        let mut state = self.state.lock().await;
        state.calls.push(NetworkCall::ResolveAddress { device_id });
        state.ensure_open()?;
        Ok(state.devices.get(&device_id).map(|device| device.address))
    }

    async fn who_is(&self, range: Option<(u32, u32)>) -> Result<Vec<DiscoveredDevice>, NetworkError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.calls.push(NetworkCall::WhoIs { range });
        state.ensure_open()?;
        let mut found: Vec<DiscoveredDevice> = state
            .devices
            .values()
            .filter(|device| match range {
                None => true,
                Some((low, high)) => device.device_id >= low && device.device_id <= high,
            })
            .map(|device| DiscoveredDevice {
                device_id: device.device_id,
                address: device.address,
            })
            .collect();
        found.sort_by_key(|device| device.device_id);
        Ok(found)
    }

    async fn read_property(
        &self,
        address: DeviceAddress,
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
    ) -> Result<PropertyValue, NetworkError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.calls.push(NetworkCall::Read {
            address,
            object_id,
            property_id,
            array_index,
        });
        state.ensure_open()?;
        let device = state.device_at(address)?;
        if state.failing_reads.contains(&(device.device_id, object_id)) {
            return Err(NetworkError::Timeout);
        }

        let props = device
            .objects
            .get(&object_id)
            .ok_or_else(|| NetworkError::Remote("unknown-object".to_string()))?;
        let object_list =
            property_id == PropertyId::ObjectList && object_id.object_type() == ObjectType::Device;
        if object_list {
            match array_index {
                None if state.unsegmented.contains(&device.device_id) => {
                    return Err(NetworkError::Remote("segmentation-not-supported".to_string()));
                }
                Some(0) => {
                    if let Some(length) = state.object_list_lengths.get(&device.device_id) {
                        return Ok(length.clone());
                    }
                }
                _ => {}
            }
        }
        let value = if object_list {
            let mut ids: Vec<ObjectId> = device.objects.keys().copied().collect();
            ids.sort();
            PropertyValue::List(ids.into_iter().map(PropertyValue::ObjectId).collect())
        } else {
            props
                .get(&property_id)
                .cloned()
                .ok_or_else(|| NetworkError::Remote("unknown-property".to_string()))?
        };

        match (array_index, value) {
            (None, value) => Ok(value),
            (Some(0), PropertyValue::List(items)) => Ok(PropertyValue::Unsigned(items.len() as u32)),
            (Some(index), PropertyValue::List(items)) => items
                .get(index as usize - 1)
                .cloned()
                .ok_or_else(|| NetworkError::Remote("invalid-array-index".to_string())),
            (Some(_), _) => Err(NetworkError::Remote("property-is-not-an-array".to_string())),
        }
    }

    async fn write_property(
        &self,
        address: DeviceAddress,
        request: &WriteProperty,
    ) -> Result<(), NetworkError> {
        {
            let mut state = self.state.lock().await;
            state.calls.push(NetworkCall::Write {
                address,
                request: request.clone(),
            });
            state.writes_in_flight += 1;
            state.max_writes_in_flight = state.max_writes_in_flight.max(state.writes_in_flight);
        }
        self.delay().await;

        let mut state = self.state.lock().await;
        state.writes_in_flight -= 1;
        state.ensure_open()?;
        let device_id = state.device_at(address)?.device_id;
        if state.failing_writes.contains(&(device_id, request.object_id)) {
            return Err(NetworkError::Remote("write-access-denied".to_string()));
        }
        let clamp = state.clamps.get(&(device_id, request.object_id)).copied();
        let value = match clamp {
            Some((min, max)) => clamp_value(&request.value, min, max),
            None => request.value.clone(),
        };

        let device = state.device_at_mut(address)?;
        let props = device
            .objects
            .get_mut(&request.object_id)
            .ok_or_else(|| NetworkError::Remote("unknown-object".to_string()))?;
        match request.array_index {
            None => {
                props.insert(request.property_id, value);
            }
            Some(index) => {
                let Some(PropertyValue::List(items)) = props.get_mut(&request.property_id) else {
                    return Err(NetworkError::Remote("property-is-not-an-array".to_string()));
                };
                let slot = index
                    .checked_sub(1)
                    .and_then(|i| items.get_mut(i as usize))
                    .ok_or_else(|| NetworkError::Remote("invalid-array-index".to_string()))?;
                *slot = value;
            }
        }
        Ok(())
    }

    async fn subscribe_cov(
        &self,
        address: DeviceAddress,
        request: &CovSubscription,
    ) -> Result<(), NetworkError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.calls.push(NetworkCall::Subscribe {
            address,
            request: *request,
        });
        state.ensure_open()?;
        let device = state.device_at(address)?;
        let device_id = device.device_id;
        if !device.objects.contains_key(&request.object_id) {
            return Err(NetworkError::Remote("unknown-object".to_string()));
        }
        if state.failing_subscribes.contains(&device_id) {
            return Err(NetworkError::Timeout);
        }
        state
            .subscriptions
            .insert((device_id, request.subscriber_process_id, request.object_id));
        Ok(())
    }

    async fn unsubscribe_cov(
        &self,
        address: DeviceAddress,
        subscriber_process_id: u32,
        object_id: ObjectId,
    ) -> Result<(), NetworkError> {
        self.delay().await;
        let mut state = self.state.lock().await;
        state.calls.push(NetworkCall::Unsubscribe {
            address,
            subscriber_process_id,
            object_id,
        });
        state.ensure_open()?;
        let device_id = state.device_at(address)?.device_id;
        if state.failing_unsubscribes.contains(&device_id) {
            return Err(NetworkError::Timeout);
        }
        state
            .subscriptions
            .remove(&(device_id, subscriber_process_id, object_id));
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock().await;
        state.calls.push(NetworkCall::Close);
        state.closed = true;
    }
}

fn clamp_value(value: &PropertyValue, min: f64, max: f64) -> PropertyValue {
    match value {
        PropertyValue::Real(v) => PropertyValue::Real((*v as f64).clamp(min, max) as f32),
        PropertyValue::Double(v) => PropertyValue::Double(v.clamp(min, max)),
        PropertyValue::Unsigned(v) => PropertyValue::Unsigned((*v as f64).clamp(min, max) as u32),
        PropertyValue::Signed(v) => PropertyValue::Signed((*v as f64).clamp(min, max) as i32),
        other => other.clone(),
    }
}

fn analog_properties(name: &str) -> HashMap<PropertyId, PropertyValue> {
    let mut props = HashMap::new();
    props.insert(
        PropertyId::ObjectName,
        PropertyValue::CharacterString(name.to_string()),
    );
    props.insert(PropertyId::PresentValue, PropertyValue::Real(0.0));
    props.insert(
        PropertyId::ObjectType,
        PropertyValue::Enumerated(ObjectType::AnalogValue.to_u16() as u32),
    );
    // degrees-celsius
    props.insert(PropertyId::Units, PropertyValue::Enumerated(62));
    props.insert(PropertyId::StatusFlags, status_flags());
    props.insert(
        PropertyId::PriorityArray,
        PropertyValue::List(vec![PropertyValue::Null; 16]),
    );
    props
}

fn binary_properties(name: &str) -> HashMap<PropertyId, PropertyValue> {
    let mut props = HashMap::new();
    props.insert(
        PropertyId::ObjectName,
        PropertyValue::CharacterString(name.to_string()),
    );
    props.insert(PropertyId::PresentValue, PropertyValue::Enumerated(0));
    props.insert(
        PropertyId::ObjectType,
        PropertyValue::Enumerated(ObjectType::BinaryValue.to_u16() as u32),
    );
    props.insert(PropertyId::StatusFlags, status_flags());
    props
}

fn status_flags() -> PropertyValue {
    PropertyValue::BitString {
        unused_bits: 4,
        data: vec![0],
    }
}
