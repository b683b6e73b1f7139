//! Coordinator for a fleet of BACnet devices.
//!
//! The [`Coordinator`] keeps a [`DeviceRegistry`] of last-known property
//! values current by serializing writes, polling on an interval and
//! managing COV subscriptions, all on top of a [`NetworkStack`].

pub mod config;
pub mod cov;
pub mod discovery;
pub mod error;
pub mod network;
pub mod poller;
pub mod refresh;
pub mod registry;
pub mod request;
pub mod simulator;
pub mod subscription;
pub mod supervisor;
pub mod types;
pub mod writer;

pub use config::BridgeConfig;
pub use cov::{CovNotification, CovPropertyValue};
pub use error::BridgeError;
pub use network::{CovSubscription, DiscoveredDevice, NetworkError, NetworkStack, WriteProperty};
pub use poller::PollSummary;
pub use refresh::RefreshSignal;
pub use registry::{
    Device, DeviceRegistry, PollTarget, PropertyKey, PropertyRecord, RegistrySnapshot,
    UpdateSource,
};
pub use request::{
    QueuedWrite, Request, RequestSender, SubscribeRequest, UnsubscribeRequest, WriteRequest,
};
pub use simulator::{NetworkCall, SimulatedNetwork};
pub use subscription::{SubscriptionManager, SubscriptionRecord, TeardownReport};
pub use supervisor::{Coordinator, ShutdownReport, TaskKind};
pub use types::{DeviceAddress, ObjectId, ObjectType, PropertyId, PropertyValue};
