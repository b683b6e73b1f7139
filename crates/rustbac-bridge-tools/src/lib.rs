use clap::ValueEnum;
use rustbac_bridge::{BridgeError, PropertyId, PropertyRecord, Request};
use tokio::sync::broadcast::{self, error::RecvError};

/// CLI-friendly names for the properties the poller can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PollPropertyArg {
    PresentValue,
    StatusFlags,
    OutOfService,
    PriorityArray,
    RelinquishDefault,
    Units,
    ObjectName,
    Description,
}

impl PollPropertyArg {
    pub const fn into_property_id(self) -> PropertyId {
        match self {
            Self::PresentValue => PropertyId::PresentValue,
            Self::StatusFlags => PropertyId::StatusFlags,
            Self::OutOfService => PropertyId::OutOfService,
            Self::PriorityArray => PropertyId::PriorityArray,
            Self::RelinquishDefault => PropertyId::RelinquishDefault,
            Self::Units => PropertyId::Units,
            Self::ObjectName => PropertyId::ObjectName,
            Self::Description => PropertyId::Description,
        }
    }
}

/// Read-only queries answered directly by the console.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
enum Query {
    Snapshot,
    Subscriptions,
}

/// One line of console input.
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    /// Print the registry snapshot.
    Snapshot,
    /// Print the active subscriptions.
    Subscriptions,
    /// Hand a request to the coordinator.
    Submit(Request),
}

impl ConsoleCommand {
    /// Parses a JSON line. Queries take precedence; anything else must be a
    /// [`Request`].
    pub fn parse(line: &str) -> Result<Self, BridgeError> {
        if let Ok(query) = serde_json::from_str::<Query>(line) {
            return Ok(match query {
                Query::Snapshot => Self::Snapshot,
                Query::Subscriptions => Self::Subscriptions,
            });
        }
        Request::from_json(line).map(Self::Submit)
    }
}

/// Renders every registry update as a JSON line until the registry goes
/// away. A receiver that falls behind logs the gap and keeps going.
pub async fn forward_updates(
    mut updates: broadcast::Receiver<PropertyRecord>,
    mut emit: impl FnMut(String),
) {
    loop {
        match updates.recv().await {
            Ok(record) => match serde_json::to_string(&record) {
                Ok(line) => emit(line),
                Err(err) => log::warn!("cannot encode update: {err}"),
            },
            Err(RecvError::Lagged(skipped)) => {
                log::warn!("update printer fell behind, {skipped} update(s) skipped")
            }
            Err(RecvError::Closed) => return,
        }
    }
}
