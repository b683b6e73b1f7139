use crate::types::object_type::ParseObjectTypeError;
use crate::types::ObjectType;
use core::fmt;
use core::str::FromStr;

/// A packed BACnet object identifier: 10-bit object type, 22-bit instance.
///
/// The text form is `<type>,<instance>` (for example `analog-value,3`), which
/// is also how it is serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    pub const MAX_INSTANCE: u32 = 0x3F_FFFF;
    pub const MAX_OBJECT_TYPE: u16 = 0x03FF;

    /// Packs `object_type` and `instance`, masking each to its field width.
    /// Use [`ObjectId::try_new`] for values that come from outside.
    pub const fn new(object_type: ObjectType, instance: u32) -> Self {
        Self((((object_type.to_u16() as u32) & 0x03FF) << 22) | (instance & Self::MAX_INSTANCE))
    }

    /// Packs `object_type` and `instance`, or `None` when either does not
    /// fit its field.
    pub const fn try_new(object_type: ObjectType, instance: u32) -> Option<Self> {
        if object_type.to_u16() > Self::MAX_OBJECT_TYPE || instance > Self::MAX_INSTANCE {
            None
        } else {
            Some(Self::new(object_type, instance))
        }
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn object_type(self) -> ObjectType {
        ObjectType::from_u16(((self.0 >> 22) & 0x03FF) as u16)
    }

    pub const fn instance(self) -> u32 {
        self.0 & Self::MAX_INSTANCE
    }

    /// Object identifier of the device object for `device_id`.
    pub const fn device(device_id: u32) -> Self {
        Self::new(ObjectType::Device, device_id)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.object_type(), self.instance())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseObjectIdError {
    MissingSeparator(String),
    ObjectType(ParseObjectTypeError),
    ObjectTypeOutOfRange(u16),
    Instance(String),
}

impl fmt::Display for ParseObjectIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSeparator(s) => write!(f, "expected `<type>,<instance>`, got `{s}`"),
            Self::ObjectType(err) => err.fmt(f),
            Self::ObjectTypeOutOfRange(v) => {
                write!(f, "object type {v} exceeds {}", ObjectId::MAX_OBJECT_TYPE)
            }
            Self::Instance(s) => write!(f, "invalid object instance `{s}`"),
        }
    }
}

impl std::error::Error for ParseObjectIdError {}

impl FromStr for ObjectId {
    type Err = ParseObjectIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ty, instance) = s
            .split_once(',')
            .or_else(|| s.split_once(':'))
            .ok_or_else(|| ParseObjectIdError::MissingSeparator(s.to_string()))?;
        let object_type = ty
            .parse::<ObjectType>()
            .map_err(ParseObjectIdError::ObjectType)?;
        if object_type.to_u16() > Self::MAX_OBJECT_TYPE {
            return Err(ParseObjectIdError::ObjectTypeOutOfRange(object_type.to_u16()));
        }
        let instance = instance
            .trim()
            .parse::<u32>()
            .ok()
            .filter(|v| *v <= Self::MAX_INSTANCE)
            .ok_or_else(|| ParseObjectIdError::Instance(instance.to_string()))?;
        Ok(Self::new(object_type, instance))
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for ObjectId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for ObjectId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}
