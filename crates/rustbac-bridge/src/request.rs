//! Typed requests from the external request layer and the queues that carry
//! them to the coordinator's loops.

use crate::network::WriteProperty;
use crate::refresh::RefreshSignal;
use crate::types::{ObjectId, PropertyId, PropertyValue};
use crate::BridgeError;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WriteRequest {
    pub device_id: u32,
    pub object_id: ObjectId,
    pub property_id: PropertyId,
    pub value: PropertyValue,
    #[cfg_attr(feature = "serde", serde(default))]
    pub array_index: Option<u32>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub priority: Option<u8>,
}

impl WriteRequest {
    pub fn new(
        device_id: u32,
        object_id: ObjectId,
        property_id: PropertyId,
        value: PropertyValue,
    ) -> Self {
        Self {
            device_id,
            object_id,
            property_id,
            value,
            array_index: None,
            priority: None,
        }
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_array_index(mut self, array_index: u32) -> Self {
        self.array_index = Some(array_index);
        self
    }

    /// Checks the request and substitutes `default_priority` when none was
    /// given.
    pub fn validate(self, default_priority: u8) -> Result<QueuedWrite, BridgeError> {
        let priority = self.priority.unwrap_or(default_priority);
        if !(1..=16).contains(&priority) {
            return Err(BridgeError::MalformedRequest(format!(
                "write priority {priority} outside 1..=16"
            )));
        }
        Ok(QueuedWrite {
            device_id: self.device_id,
            write: WriteProperty {
                object_id: self.object_id,
                property_id: self.property_id,
                array_index: self.array_index,
                value: self.value,
                priority,
            },
        })
    }
}

/// A validated write waiting in the write queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedWrite {
    pub device_id: u32,
    pub write: WriteProperty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SubscribeRequest {
    pub device_id: u32,
    pub object_id: ObjectId,
    #[cfg_attr(feature = "serde", serde(default))]
    pub confirmed: bool,
    pub lifetime_seconds: u32,
}

impl SubscribeRequest {
    pub fn validate(self) -> Result<Self, BridgeError> {
        if self.lifetime_seconds == 0 {
            return Err(BridgeError::MalformedRequest(
                "subscription lifetime must be greater than zero".to_string(),
            ));
        }
        Ok(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct UnsubscribeRequest {
    pub device_id: u32,
    pub object_id: ObjectId,
}

/// Everything the request layer can ask of the coordinator.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Request {
    Write(WriteRequest),
    Subscribe(SubscribeRequest),
    Unsubscribe(UnsubscribeRequest),
    Refresh,
}

impl Request {
    /// Parses a JSON request. Missing or ill-typed fields become
    /// [`BridgeError::MalformedRequest`].
    #[cfg(feature = "serde")]
    pub fn from_json(input: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(input).map_err(|err| BridgeError::MalformedRequest(err.to_string()))
    }
}

/// Producer handle for the request layer. Cheap to clone.
#[derive(Debug, Clone)]
pub struct RequestSender {
    writes: mpsc::UnboundedSender<QueuedWrite>,
    subscribes: mpsc::UnboundedSender<SubscribeRequest>,
    unsubscribes: mpsc::UnboundedSender<UnsubscribeRequest>,
    refresh: RefreshSignal,
    default_priority: u8,
}

impl RequestSender {
    pub fn write(&self, request: WriteRequest) -> Result<(), BridgeError> {
        let queued = request.validate(self.default_priority)?;
        self.writes.send(queued).map_err(|_| BridgeError::ShutDown)
    }

    pub fn subscribe(&self, request: SubscribeRequest) -> Result<(), BridgeError> {
        let request = request.validate()?;
        self.subscribes
            .send(request)
            .map_err(|_| BridgeError::ShutDown)
    }

    pub fn unsubscribe(&self, request: UnsubscribeRequest) -> Result<(), BridgeError> {
        self.unsubscribes
            .send(request)
            .map_err(|_| BridgeError::ShutDown)
    }

    /// Raises the refresh signal.
    pub fn refresh(&self) {
        self.refresh.raise();
    }

    pub fn submit(&self, request: Request) -> Result<(), BridgeError> {
        match request {
            Request::Write(request) => self.write(request),
            Request::Subscribe(request) => self.subscribe(request),
            Request::Unsubscribe(request) => self.unsubscribe(request),
            Request::Refresh => {
                self.refresh();
                Ok(())
            }
        }
    }
}

/// Consumer side of the request queues, handed to the loops at start.
#[derive(Debug)]
pub(crate) struct Inbox {
    pub writes: mpsc::UnboundedReceiver<QueuedWrite>,
    pub subscribes: mpsc::UnboundedReceiver<SubscribeRequest>,
    pub unsubscribes: mpsc::UnboundedReceiver<UnsubscribeRequest>,
}

pub(crate) fn request_channel(refresh: RefreshSignal, default_priority: u8) -> (RequestSender, Inbox) {
    let (writes_tx, writes_rx) = mpsc::unbounded_channel();
    let (subscribes_tx, subscribes_rx) = mpsc::unbounded_channel();
    let (unsubscribes_tx, unsubscribes_rx) = mpsc::unbounded_channel();
    (
        RequestSender {
            writes: writes_tx,
            subscribes: subscribes_tx,
            unsubscribes: unsubscribes_tx,
            refresh,
            default_priority,
        },
        Inbox {
            writes: writes_rx,
            subscribes: subscribes_rx,
            unsubscribes: unsubscribes_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::{request_channel, Request, SubscribeRequest, UnsubscribeRequest, WriteRequest};
    use crate::refresh::RefreshSignal;
    use crate::types::{ObjectId, ObjectType, PropertyId, PropertyValue};
    use crate::BridgeError;

    fn av(instance: u32) -> ObjectId {
        ObjectId::new(ObjectType::AnalogValue, instance)
    }

    #[test]
    fn missing_priority_takes_the_default() {
        let queued = WriteRequest::new(1, av(1), PropertyId::PresentValue, PropertyValue::Real(4.0))
            .validate(12)
            .unwrap();
        assert_eq!(queued.write.priority, 12);

        let queued = WriteRequest::new(1, av(1), PropertyId::PresentValue, PropertyValue::Real(4.0))
            .with_priority(3)
            .validate(12)
            .unwrap();
        assert_eq!(queued.write.priority, 3);
    }

    #[test]
    fn out_of_range_priority_is_malformed() {
        let err = WriteRequest::new(1, av(1), PropertyId::PresentValue, PropertyValue::Null)
            .with_priority(17)
            .validate(16)
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedRequest(_)));
    }

    #[test]
    fn zero_lifetime_subscription_is_malformed() {
        let err = SubscribeRequest {
            device_id: 1,
            object_id: av(1),
            confirmed: false,
            lifetime_seconds: 0,
        }
        .validate()
        .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedRequest(_)));
    }

    #[tokio::test]
    async fn submit_routes_each_kind_to_its_queue() {
        let refresh = RefreshSignal::new();
        let (sender, mut inbox) = request_channel(refresh.clone(), 16);

        sender
            .submit(Request::Write(WriteRequest::new(
                3,
                av(2),
                PropertyId::PresentValue,
                PropertyValue::Real(1.5),
            )))
            .unwrap();
        sender
            .submit(Request::Subscribe(SubscribeRequest {
                device_id: 3,
                object_id: av(2),
                confirmed: true,
                lifetime_seconds: 300,
            }))
            .unwrap();
        sender
            .submit(Request::Unsubscribe(UnsubscribeRequest {
                device_id: 3,
                object_id: av(2),
            }))
            .unwrap();
        sender.submit(Request::Refresh).unwrap();

        assert_eq!(inbox.writes.recv().await.unwrap().write.priority, 16);
        assert!(inbox.subscribes.recv().await.unwrap().confirmed);
        assert_eq!(inbox.unsubscribes.recv().await.unwrap().device_id, 3);
        tokio::time::timeout(std::time::Duration::from_millis(50), refresh.wait())
            .await
            .expect("refresh should be raised");
    }

    #[tokio::test]
    async fn send_after_consumer_drop_reports_shutdown() {
        let (sender, inbox) = request_channel(RefreshSignal::new(), 16);
        drop(inbox);
        let err = sender
            .unsubscribe(UnsubscribeRequest {
                device_id: 1,
                object_id: av(1),
            })
            .unwrap_err();
        assert!(matches!(err, BridgeError::ShutDown));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn parses_json_requests() {
        let request = Request::from_json(
            r#"{"Write":{"device_id":5,"object_id":"analog-value,12","property_id":"present-value","value":{"Real":21.5}}}"#,
        )
        .unwrap();
        let Request::Write(write) = request else {
            panic!("expected a write");
        };
        assert_eq!(write.object_id, av(12));
        assert_eq!(write.priority, None);
        assert_eq!(write.value, PropertyValue::Real(21.5));

        assert_eq!(Request::from_json(r#""Refresh""#).unwrap(), Request::Refresh);

        let err = Request::from_json(r#"{"Subscribe":{"device_id":5,"object_id":"analog-value,12"}}"#)
            .unwrap_err();
        assert!(matches!(err, BridgeError::MalformedRequest(_)));
        let err = Request::from_json(r#"{"Write":{"device_id":"five"}}"#).unwrap_err();
        assert!(matches!(err, BridgeError::MalformedRequest(_)));
    }
}
