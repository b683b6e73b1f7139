use crate::types::PropertyId;
use crate::BridgeError;
use std::time::Duration;

/// Lowest BACnet command priority (relinquish-default side of the array).
pub const DEFAULT_WRITE_PRIORITY: u8 = 16;
pub const DEFAULT_POLL_INTERVAL_SECONDS: u64 = 60;

/// Runtime settings for a [`Coordinator`](crate::Coordinator).
///
/// Loading the values is up to the caller; the coordinator only validates
/// them.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default, deny_unknown_fields)
)]
pub struct BridgeConfig {
    /// Priority applied to writes that do not carry one.
    pub default_priority: u8,
    pub poll_interval_seconds: u64,
    pub log_level: log::LevelFilter,
    /// Properties read for every known object on each poll cycle.
    pub poll_properties: Vec<PropertyId>,
    /// Run a Who-Is and object walk before raising startup-complete.
    pub discover_on_startup: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_WRITE_PRIORITY,
            poll_interval_seconds: DEFAULT_POLL_INTERVAL_SECONDS,
            log_level: log::LevelFilter::Info,
            poll_properties: vec![PropertyId::PresentValue],
            discover_on_startup: true,
        }
    }
}

impl BridgeConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds)
    }

    pub fn with_default_priority(mut self, priority: u8) -> Self {
        self.default_priority = priority;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_seconds = interval.as_secs();
        self
    }

    pub fn with_poll_properties(mut self, properties: Vec<PropertyId>) -> Self {
        self.poll_properties = properties;
        self
    }

    pub fn with_discovery(mut self, enabled: bool) -> Self {
        self.discover_on_startup = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), BridgeError> {
        if !(1..=16).contains(&self.default_priority) {
            return Err(BridgeError::InvalidConfig(format!(
                "default priority {} outside 1..=16",
                self.default_priority
            )));
        }
        if self.poll_interval_seconds == 0 {
            return Err(BridgeError::InvalidConfig(
                "poll interval must be at least one second".to_string(),
            ));
        }
        if self.poll_properties.is_empty() {
            return Err(BridgeError::InvalidConfig(
                "at least one poll property is required".to_string(),
            ));
        }
        Ok(())
    }

    #[cfg(feature = "serde")]
    pub fn from_json_str(input: &str) -> Result<Self, BridgeError> {
        let config: Self = serde_json::from_str(input)
            .map_err(|err| BridgeError::InvalidConfig(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}
