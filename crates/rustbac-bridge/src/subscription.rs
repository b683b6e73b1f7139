//! COV subscription lifecycle: `Requested -> Active -> Cancelled`.
//!
//! At most one subscription may be requested or active per
//! `(device, object)` pair. Expiry is advisory: records keep their
//! `expires_at`, but nothing here unsubscribes on a timer.

use crate::cov::CovNotification;
use crate::network::{CovSubscription, NetworkStack};
use crate::registry::{DeviceRegistry, PropertyKey, UpdateSource};
use crate::request::{SubscribeRequest, UnsubscribeRequest};
use crate::supervisor::{cancelled, Shared};
use crate::types::{DeviceAddress, ObjectId};
use crate::BridgeError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{mpsc, watch, Mutex};

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubscriptionRecord {
    pub subscriber_process_id: u32,
    pub device_id: u32,
    pub object_id: ObjectId,
    pub address: DeviceAddress,
    pub confirmed: bool,
    pub lifetime_seconds: u32,
    pub created_at: SystemTime,
    pub expires_at: SystemTime,
}

impl SubscriptionRecord {
    /// Time left before the remote device drops the subscription, as far as
    /// this process knows.
    pub fn time_remaining(&self, now: SystemTime) -> Duration {
        self.expires_at
            .duration_since(now)
            .unwrap_or(Duration::ZERO)
    }

    pub fn is_expired(&self, now: SystemTime) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone)]
enum Slot {
    /// Pair reserved while the subscribe request is on the wire.
    Requested,
    Active(SubscriptionRecord),
}

/// Outcome of [`SubscriptionManager::teardown_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TeardownReport {
    pub attempted: usize,
    /// Pairs whose unsubscribe could not be confirmed by the device.
    pub failed: Vec<(u32, ObjectId)>,
}

#[derive(Debug)]
pub struct SubscriptionManager {
    slots: Mutex<HashMap<(u32, ObjectId), Slot>>,
    next_process_id: AtomicU32,
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionManager {
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            next_process_id: AtomicU32::new(1),
        }
    }

    /// Subscribes to COV notifications for `request.object_id`.
    ///
    /// Fails with [`BridgeError::DuplicateSubscription`] without touching the
    /// network when the pair is already requested or active.
    pub async fn create<N: NetworkStack>(
        &self,
        network: &N,
        registry: &DeviceRegistry,
        request: SubscribeRequest,
    ) -> Result<SubscriptionRecord, BridgeError> {
        let pair = (request.device_id, request.object_id);
        let subscriber_process_id = {
            let mut slots = self.slots.lock().await;
            if slots.contains_key(&pair) {
                return Err(BridgeError::DuplicateSubscription {
                    device_id: request.device_id,
                    object_id: request.object_id,
                });
            }
            let id = self.next_process_id.fetch_add(1, Ordering::Relaxed);
            slots.insert(pair, Slot::Requested);
            id
        };

        match self
            .subscribe_remote(network, registry, request, subscriber_process_id)
            .await
        {
            Ok(record) => {
                self.slots
                    .lock()
                    .await
                    .insert(pair, Slot::Active(record.clone()));
                Ok(record)
            }
            Err(err) => {
                self.slots.lock().await.remove(&pair);
                Err(err)
            }
        }
    }

    async fn subscribe_remote<N: NetworkStack>(
        &self,
        network: &N,
        registry: &DeviceRegistry,
        request: SubscribeRequest,
        subscriber_process_id: u32,
    ) -> Result<SubscriptionRecord, BridgeError> {
        let address = registry
            .resolve_or_lookup(network, request.device_id)
            .await?;
        network
            .subscribe_cov(
                address,
                &CovSubscription {
                    subscriber_process_id,
                    object_id: request.object_id,
                    confirmed: request.confirmed,
                    lifetime_seconds: request.lifetime_seconds,
                },
            )
            .await?;

        let created_at = SystemTime::now();
        Ok(SubscriptionRecord {
            subscriber_process_id,
            device_id: request.device_id,
            object_id: request.object_id,
            address,
            confirmed: request.confirmed,
            lifetime_seconds: request.lifetime_seconds,
            created_at,
            expires_at: created_at + Duration::from_secs(u64::from(request.lifetime_seconds)),
        })
    }

    /// Cancels the active subscription for the pair.
    ///
    /// The record is removed even when the device does not acknowledge the
    /// unsubscribe.
    pub async fn cancel<N: NetworkStack>(
        &self,
        network: &N,
        device_id: u32,
        object_id: ObjectId,
    ) -> Result<SubscriptionRecord, BridgeError> {
        let pair = (device_id, object_id);
        let record = {
            let mut slots = self.slots.lock().await;
            match slots.remove(&pair) {
                Some(Slot::Active(record)) => record,
                Some(requested) => {
                    slots.insert(pair, requested);
                    return Err(BridgeError::SubscriptionNotFound { device_id, object_id });
                }
                None => return Err(BridgeError::SubscriptionNotFound { device_id, object_id }),
            }
        };

        if let Err(err) = unsubscribe_remote(network, &record).await {
            log::warn!(
                "unsubscribe for device {} object {} (process {}) not confirmed: {err}",
                record.device_id,
                record.object_id,
                record.subscriber_process_id
            );
        }
        Ok(record)
    }

    /// Cancels every active subscription. A failure on one device does not
    /// stop the others.
    pub async fn teardown_all<N: NetworkStack>(&self, network: &N) -> TeardownReport {
        let mut records: Vec<SubscriptionRecord> = {
            let mut slots = self.slots.lock().await;
            let active: Vec<(u32, ObjectId)> = slots
                .iter()
                .filter(|(_, slot)| matches!(slot, Slot::Active(_)))
                .map(|(pair, _)| *pair)
                .collect();
            active
                .into_iter()
                .filter_map(|pair| match slots.remove(&pair) {
                    Some(Slot::Active(record)) => Some(record),
                    _ => None,
                })
                .collect()
        };
        records.sort_by_key(|record| record.subscriber_process_id);

        let mut report = TeardownReport {
            attempted: records.len(),
            failed: Vec::new(),
        };
        for record in records {
            if let Err(err) = unsubscribe_remote(network, &record).await {
                log::warn!(
                    "teardown: unsubscribe for device {} object {} failed: {err}",
                    record.device_id,
                    record.object_id
                );
                report.failed.push((record.device_id, record.object_id));
            }
        }
        log::info!(
            "teardown: {} subscription(s) cancelled, {} unconfirmed",
            report.attempted,
            report.failed.len()
        );
        report
    }

    /// Active subscriptions ordered by subscriber process id.
    pub async fn active(&self) -> Vec<SubscriptionRecord> {
        let mut records: Vec<SubscriptionRecord> = self
            .slots
            .lock()
            .await
            .values()
            .filter_map(|slot| match slot {
                Slot::Active(record) => Some(record.clone()),
                Slot::Requested => None,
            })
            .collect();
        records.sort_by_key(|record| record.subscriber_process_id);
        records
    }

    /// Active subscriptions whose declared lifetime has elapsed at `now`.
    pub async fn expired(&self, now: SystemTime) -> Vec<SubscriptionRecord> {
        self.active()
            .await
            .into_iter()
            .filter(|record| record.is_expired(now))
            .collect()
    }

    pub async fn find_by_process_id(&self, subscriber_process_id: u32) -> Option<SubscriptionRecord> {
        self.slots.lock().await.values().find_map(|slot| match slot {
            Slot::Active(record) if record.subscriber_process_id == subscriber_process_id => {
                Some(record.clone())
            }
            _ => None,
        })
    }

    /// Publishes the values of a COV notification that belongs to one of our
    /// active subscriptions. Returns the number of values applied.
    pub async fn apply_notification(
        &self,
        registry: &DeviceRegistry,
        notification: CovNotification,
    ) -> usize {
        let Some(record) = self
            .find_by_process_id(notification.subscriber_process_id)
            .await
        else {
            log::debug!(
                "ignoring COV notification for unknown process {}",
                notification.subscriber_process_id
            );
            return 0;
        };
        if record.object_id != notification.monitored_object_id
            || record.device_id != notification.initiating_device_id
        {
            log::debug!(
                "ignoring COV notification for {} from device {}: does not match process {}",
                notification.monitored_object_id,
                notification.initiating_device_id,
                record.subscriber_process_id
            );
            return 0;
        }

        let applied = notification.values.len();
        for value in notification.values {
            let key = PropertyKey::new(record.device_id, record.object_id, value.property_id)
                .with_array_index(value.array_index);
            registry.upsert(key, value.value, UpdateSource::Cov).await;
        }
        applied
    }
}

async fn unsubscribe_remote<N: NetworkStack>(
    network: &N,
    record: &SubscriptionRecord,
) -> Result<(), BridgeError> {
    network
        .unsubscribe_cov(record.address, record.subscriber_process_id, record.object_id)
        .await?;
    Ok(())
}

pub(crate) async fn run_subscribe_consumer<N: NetworkStack>(
    shared: Arc<Shared<N>>,
    mut requests: mpsc::UnboundedReceiver<SubscribeRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let request = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        match shared
            .subscriptions
            .create(&shared.network, &shared.registry, request)
            .await
        {
            Ok(record) => log::info!(
                "subscribed to device {} object {} (process {}, lifetime {}s)",
                record.device_id,
                record.object_id,
                record.subscriber_process_id,
                record.lifetime_seconds
            ),
            Err(err) => log::error!(
                "subscribe to device {} object {} failed: {err}",
                request.device_id,
                request.object_id
            ),
        }
    }
    log::debug!("subscribe consumer stopped");
}

pub(crate) async fn run_unsubscribe_consumer<N: NetworkStack>(
    shared: Arc<Shared<N>>,
    mut requests: mpsc::UnboundedReceiver<UnsubscribeRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let request = tokio::select! {
            biased;
            _ = cancelled(&mut shutdown) => break,
            request = requests.recv() => match request {
                Some(request) => request,
                None => break,
            },
        };

        match shared
            .subscriptions
            .cancel(&shared.network, request.device_id, request.object_id)
            .await
        {
            Ok(record) => log::info!(
                "unsubscribed from device {} object {} (process {})",
                record.device_id,
                record.object_id,
                record.subscriber_process_id
            ),
            Err(err) => log::error!("{err}"),
        }
    }
    log::debug!("unsubscribe consumer stopped");
}
