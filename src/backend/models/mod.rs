pub mod value;

pub use value::{RefBox, Value, ValueType};
