use core::fmt;
use core::str::FromStr;

/// BACnet object types the bridge knows by name.
///
/// Anything else is carried as [`Proprietary`](Self::Proprietary) with its raw
/// numeric type so it still round-trips through the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    Calendar,
    Device,
    File,
    Loop,
    MultiStateInput,
    MultiStateOutput,
    NotificationClass,
    Schedule,
    MultiStateValue,
    TrendLog,
    Accumulator,
    PulseConverter,
    Proprietary(u16),
}

const NAMES: &[(ObjectType, &str)] = &[
    (ObjectType::AnalogInput, "analog-input"),
    (ObjectType::AnalogOutput, "analog-output"),
    (ObjectType::AnalogValue, "analog-value"),
    (ObjectType::BinaryInput, "binary-input"),
    (ObjectType::BinaryOutput, "binary-output"),
    (ObjectType::BinaryValue, "binary-value"),
    (ObjectType::Calendar, "calendar"),
    (ObjectType::Device, "device"),
    (ObjectType::File, "file"),
    (ObjectType::Loop, "loop"),
    (ObjectType::MultiStateInput, "multi-state-input"),
    (ObjectType::MultiStateOutput, "multi-state-output"),
    (ObjectType::NotificationClass, "notification-class"),
    (ObjectType::Schedule, "schedule"),
    (ObjectType::MultiStateValue, "multi-state-value"),
    (ObjectType::TrendLog, "trend-log"),
    (ObjectType::Accumulator, "accumulator"),
    (ObjectType::PulseConverter, "pulse-converter"),
];

impl ObjectType {
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::AnalogInput => 0,
            Self::AnalogOutput => 1,
            Self::AnalogValue => 2,
            Self::BinaryInput => 3,
            Self::BinaryOutput => 4,
            Self::BinaryValue => 5,
            Self::Calendar => 6,
            Self::Device => 8,
            Self::File => 10,
            Self::Loop => 12,
            Self::MultiStateInput => 13,
            Self::MultiStateOutput => 14,
            Self::NotificationClass => 15,
            Self::Schedule => 17,
            Self::MultiStateValue => 19,
            Self::TrendLog => 20,
            Self::Accumulator => 23,
            Self::PulseConverter => 24,
            Self::Proprietary(v) => v,
        }
    }

    pub const fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::AnalogInput,
            1 => Self::AnalogOutput,
            2 => Self::AnalogValue,
            3 => Self::BinaryInput,
            4 => Self::BinaryOutput,
            5 => Self::BinaryValue,
            6 => Self::Calendar,
            8 => Self::Device,
            10 => Self::File,
            12 => Self::Loop,
            13 => Self::MultiStateInput,
            14 => Self::MultiStateOutput,
            15 => Self::NotificationClass,
            17 => Self::Schedule,
            19 => Self::MultiStateValue,
            20 => Self::TrendLog,
            23 => Self::Accumulator,
            24 => Self::PulseConverter,
            v => Self::Proprietary(v),
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match NAMES.iter().find(|(ty, _)| ty == self) {
            Some((_, name)) => f.write_str(name),
            None => write!(f, "{}", self.to_u16()),
        }
    }
}

/// Error returned when an object type name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseObjectTypeError(pub String);

impl fmt::Display for ParseObjectTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown object type `{}`", self.0)
    }
}

impl std::error::Error for ParseObjectTypeError {}

impl FromStr for ObjectType {
    type Err = ParseObjectTypeError;

    /// Accepts kebab-case names (`analog-value`), camelCase names as used by
    /// common BACnet tooling (`analogValue`), or the raw numeric type.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(raw) = trimmed.parse::<u16>() {
            return Ok(Self::from_u16(raw));
        }
        let normalized = normalize_name(trimmed);
        NAMES
            .iter()
            .find(|(_, name)| *name == normalized)
            .map(|(ty, _)| *ty)
            .ok_or_else(|| ParseObjectTypeError(s.to_string()))
    }
}

/// Folds `analogValue`, `analog_value` and `Analog-Value` onto `analog-value`.
pub(crate) fn normalize_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    for (i, ch) in input.chars().enumerate() {
        if ch == '_' {
            out.push('-');
        } else if ch.is_ascii_uppercase() {
            if i > 0 && !out.ends_with('-') {
                out.push('-');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}
