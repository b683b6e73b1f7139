use crate::types::{DeviceAddress, ObjectId, PropertyId, PropertyValue};

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CovPropertyValue {
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub value: PropertyValue,
}

/// A COV notification handed to the coordinator by the network stack.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CovNotification {
    pub source: DeviceAddress,
    pub subscriber_process_id: u32,
    pub initiating_device_id: u32,
    pub monitored_object_id: ObjectId,
    pub time_remaining_seconds: u32,
    pub values: Vec<CovPropertyValue>,
}
