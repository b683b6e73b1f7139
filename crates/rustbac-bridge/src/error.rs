use crate::network::NetworkError;
use crate::types::ObjectId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("device {0} not found")]
    DeviceNotFound(u32),
    #[error("subscription for device {device_id} object {object_id} already exists")]
    DuplicateSubscription { device_id: u32, object_id: ObjectId },
    #[error("no active subscription for device {device_id} object {object_id}")]
    SubscriptionNotFound { device_id: u32, object_id: ObjectId },
    #[error("communication error: {0}")]
    Communication(#[from] NetworkError),
    #[error("malformed request: {0}")]
    MalformedRequest(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("coordinator already started")]
    AlreadyStarted,
    #[error("coordinator is shut down")]
    ShutDown,
}
