//! The seam between the coordinator and the BACnet network stack.
//!
//! Encoding, transport framing, segmentation, retries and timeouts all live
//! behind [`NetworkStack`]. The coordinator only sees the primitives below and
//! treats every failure as an opaque [`NetworkError`].

use crate::types::{DeviceAddress, ObjectId, PropertyId, PropertyValue};
use std::future::Future;
use thiserror::Error;

/// Errors surfaced by a [`NetworkStack`] implementation.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("request timed out")]
    Timeout,
    #[error("device at {0} is unreachable")]
    Unreachable(DeviceAddress),
    #[error("remote device rejected the request: {0}")]
    Remote(String),
    #[error("network resource closed")]
    Closed,
}

/// A WriteProperty service request with the priority already resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteProperty {
    pub object_id: ObjectId,
    pub property_id: PropertyId,
    pub array_index: Option<u32>,
    pub value: PropertyValue,
    pub priority: u8,
}

/// A SubscribeCOV service request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CovSubscription {
    pub subscriber_process_id: u32,
    pub object_id: ObjectId,
    pub confirmed: bool,
    pub lifetime_seconds: u32,
}

/// A device that answered a Who-Is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DiscoveredDevice {
    pub device_id: u32,
    pub address: DeviceAddress,
}

/// Async primitives the coordinator consumes from the network stack.
///
/// Returned futures must be `Send` because the coordinator drives them from
/// spawned tokio tasks.
pub trait NetworkStack: Send + Sync + 'static {
    /// Resolves a device instance to its network address. `Ok(None)` means
    /// the device is not known to the stack.
    fn resolve_address(
        &self,
        device_id: u32,
    ) -> impl Future<Output = Result<Option<DeviceAddress>, NetworkError>> + Send;

    /// Broadcasts a Who-Is, optionally limited to an instance range, and
    /// returns the devices that answered.
    fn who_is(
        &self,
        range: Option<(u32, u32)>,
    ) -> impl Future<Output = Result<Vec<DiscoveredDevice>, NetworkError>> + Send;

    fn read_property(
        &self,
        address: DeviceAddress,
        object_id: ObjectId,
        property_id: PropertyId,
        array_index: Option<u32>,
    ) -> impl Future<Output = Result<PropertyValue, NetworkError>> + Send;

    fn write_property(
        &self,
        address: DeviceAddress,
        request: &WriteProperty,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    fn subscribe_cov(
        &self,
        address: DeviceAddress,
        request: &CovSubscription,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// Cancels a COV subscription (a SubscribeCOV without lifetime).
    fn unsubscribe_cov(
        &self,
        address: DeviceAddress,
        subscriber_process_id: u32,
        object_id: ObjectId,
    ) -> impl Future<Output = Result<(), NetworkError>> + Send;

    /// Releases the underlying network resource. Called once, last, during
    /// shutdown.
    fn close(&self) -> impl Future<Output = ()> + Send;
}
