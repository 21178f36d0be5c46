use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// A runtime value flowing through lambda parameters, locals and closure cells
#[derive(Debug, Clone)]
pub enum Value {
    /// The "no value" result of void functions and statements
    Unit,
    /// A boolean
    Bool(bool),
    /// A 64-bit signed integer
    Int(i64),
    /// A 64-bit float
    Float(f64),
    /// An immutable string
    Str(Arc<str>),
    /// A shared box carrying a by-reference argument through the canonical
    /// calling convention
    Ref(RefBox),
}

/// Runtime type tag of a [`Value`], used in error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Unit,
    Bool,
    Int,
    Float,
    Str,
    Ref,
}

impl Value {
    /// Create a string value
    pub fn str(s: impl AsRef<str>) -> Self {
        Value::Str(Arc::from(s.as_ref()))
    }

    /// Get the type tag of this value
    #[inline]
    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Unit => ValueType::Unit,
            Value::Bool(_) => ValueType::Bool,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Str(_) => ValueType::Str,
            Value::Ref(_) => ValueType::Ref,
        }
    }

    /// Get the integer payload, if this is an `Int`
    #[inline]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Get the boolean payload, if this is a `Bool`
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Check if this is the unit value
    #[inline]
    pub fn is_unit(&self) -> bool {
        matches!(self, Value::Unit)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Unit, Value::Unit) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            // Boxes have identity semantics
            (Value::Ref(a), Value::Ref(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Unit
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Unit => write!(f, "()"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => write!(f, "\"{}\"", s),
            Value::Ref(b) => write!(f, "&{}", b.get()),
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Unit => "unit",
            ValueType::Bool => "bool",
            ValueType::Int => "int",
            ValueType::Float => "float",
            ValueType::Str => "str",
            ValueType::Ref => "ref",
        };
        f.write_str(name)
    }
}

/// Shared mutable box used to pass a by-reference argument through a
/// uniform (slice-of-values) entry point.
///
/// The caller boxes its slot, the callee reads and writes through the box,
/// and the caller copies the final contents back into its slot.
#[derive(Clone)]
pub struct RefBox(Arc<Mutex<Value>>);

impl RefBox {
    /// Box a value
    pub fn new(value: Value) -> Self {
        RefBox(Arc::new(Mutex::new(value)))
    }

    /// Read the boxed value
    #[inline]
    pub fn get(&self) -> Value {
        self.0.lock().clone()
    }

    /// Replace the boxed value
    #[inline]
    pub fn set(&self, value: Value) {
        *self.0.lock() = value;
    }

    /// Move the boxed value out, leaving `Unit` behind
    pub fn take(&self) -> Value {
        std::mem::replace(&mut *self.0.lock(), Value::Unit)
    }

    /// Check if two boxes are the same allocation
    #[inline]
    pub fn ptr_eq(&self, other: &RefBox) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for RefBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RefBox").field(&*self.0.lock()).finish()
    }
}
