pub mod address;
pub mod object_id;
pub mod object_type;
pub mod property_id;
pub mod value;

pub use address::DeviceAddress;
pub use object_id::{ObjectId, ParseObjectIdError};
pub use object_type::{ObjectType, ParseObjectTypeError};
pub use property_id::{ParsePropertyIdError, PropertyId};
pub use value::PropertyValue;
