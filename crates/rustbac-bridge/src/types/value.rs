use crate::types::ObjectId;

/// An owned BACnet application value as read from, or written to, a device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PropertyValue {
    Null,
    Boolean(bool),
    Unsigned(u32),
    Signed(i32),
    Real(f32),
    Double(f64),
    OctetString(Vec<u8>),
    CharacterString(String),
    BitString { unused_bits: u8, data: Vec<u8> },
    Enumerated(u32),
    ObjectId(ObjectId),
    List(Vec<PropertyValue>),
}

impl PropertyValue {
    /// Object identifiers carried by an `object-list` style value.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        match self {
            Self::ObjectId(oid) => vec![*oid],
            Self::List(values) => values
                .iter()
                .filter_map(|v| match v {
                    Self::ObjectId(oid) => Some(*oid),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        }
    }
}
