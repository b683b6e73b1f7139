use crate::types::object_type::normalize_name;
use core::fmt;
use core::str::FromStr;

/// BACnet property identifiers used by the bridge.
///
/// Vendor-specific or unrecognised identifiers use
/// [`Proprietary`](Self::Proprietary).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyId {
    Description,
    ObjectIdentifier,
    ObjectList,
    ObjectName,
    ObjectType,
    OutOfService,
    PresentValue,
    PriorityArray,
    RelinquishDefault,
    StatusFlags,
    Units,
    VendorName,
    Proprietary(u32),
}

const NAMES: &[(PropertyId, &str)] = &[
    (PropertyId::Description, "description"),
    (PropertyId::ObjectIdentifier, "object-identifier"),
    (PropertyId::ObjectList, "object-list"),
    (PropertyId::ObjectName, "object-name"),
    (PropertyId::ObjectType, "object-type"),
    (PropertyId::OutOfService, "out-of-service"),
    (PropertyId::PresentValue, "present-value"),
    (PropertyId::PriorityArray, "priority-array"),
    (PropertyId::RelinquishDefault, "relinquish-default"),
    (PropertyId::StatusFlags, "status-flags"),
    (PropertyId::Units, "units"),
    (PropertyId::VendorName, "vendor-name"),
];

impl PropertyId {
    pub const fn to_u32(self) -> u32 {
        match self {
            Self::Description => 28,
            Self::ObjectIdentifier => 75,
            Self::ObjectList => 76,
            Self::ObjectName => 77,
            Self::ObjectType => 79,
            Self::OutOfService => 81,
            Self::PresentValue => 85,
            Self::PriorityArray => 87,
            Self::RelinquishDefault => 104,
            Self::StatusFlags => 111,
            Self::Units => 117,
            Self::VendorName => 121,
            Self::Proprietary(v) => v,
        }
    }

    pub const fn from_u32(value: u32) -> Self {
        match value {
            28 => Self::Description,
            75 => Self::ObjectIdentifier,
            76 => Self::ObjectList,
            77 => Self::ObjectName,
            79 => Self::ObjectType,
            81 => Self::OutOfService,
            85 => Self::PresentValue,
            87 => Self::PriorityArray,
            104 => Self::RelinquishDefault,
            111 => Self::StatusFlags,
            117 => Self::Units,
            121 => Self::VendorName,
            v => Self::Proprietary(v),
        }
    }
}

impl fmt::Display for PropertyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match NAMES.iter().find(|(id, _)| id == self) {
            Some((_, name)) => f.write_str(name),
            None => write!(f, "{}", self.to_u32()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsePropertyIdError(pub String);

impl fmt::Display for ParsePropertyIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown property identifier `{}`", self.0)
    }
}

impl std::error::Error for ParsePropertyIdError {}

impl FromStr for PropertyId {
    type Err = ParsePropertyIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(raw) = trimmed.parse::<u32>() {
            return Ok(Self::from_u32(raw));
        }
        let normalized = normalize_name(trimmed);
        NAMES
            .iter()
            .find(|(_, name)| *name == normalized)
            .map(|(id, _)| *id)
            .ok_or_else(|| ParsePropertyIdError(s.to_string()))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for PropertyId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for PropertyId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::PropertyId;

    #[test]
    fn numeric_and_named_forms_agree() {
        assert_eq!(PropertyId::from_u32(85), PropertyId::PresentValue);
        assert_eq!("presentValue".parse::<PropertyId>().unwrap(), PropertyId::PresentValue);
        assert_eq!("85".parse::<PropertyId>().unwrap(), PropertyId::PresentValue);
        assert_eq!(
            "512".parse::<PropertyId>().unwrap(),
            PropertyId::Proprietary(512)
        );
        assert_eq!(PropertyId::Proprietary(512).to_string(), "512");
    }
}
