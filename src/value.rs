//! Runtime field values and explicit conversions between them.

use std::fmt;

use crate::{
    array::IntArray,
    element::DataElement,
    field::FieldType,
    int::IntType,
};

/// The current value of a record field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    UInt(u128),
    Int(i128),
    Array(IntArray),
    Bytes(Vec<u8>),
    Text(String),
    Element(DataElement),
}

impl Value {
    /// Encoded length in bytes for values that can report one. Integers
    /// cannot: their length comes from their declared type.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::UInt(_) | Value::Int(_) => None,
            Value::Array(a) => Some(a.len()),
            Value::Bytes(b) => Some(b.len()),
            Value::Text(s) => Some(s.len()),
            Value::Element(e) => Some(e.len()),
        }
    }

    /// True for empty byte, text and array values.
    pub fn is_empty(&self) -> bool {
        match self {
            Value::Array(a) => a.is_empty(),
            Value::Bytes(b) => b.is_empty(),
            Value::Text(s) => s.is_empty(),
            _ => false,
        }
    }

    /// The value as a signed length quantity, if it is an integer.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::UInt(v) => i64::try_from(v).ok(),
            Value::Int(v) => i64::try_from(v).ok(),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Converts the value to `ty`, if that conversion is allowed:
    ///
    /// - integers between signed and unsigned forms when the value fits;
    /// - text to its UTF-8 bytes and valid UTF-8 bytes to text;
    /// - bytes to an array with one element per byte;
    /// - an array to another element width when every element fits, and a
    ///   one-byte array to bytes.
    ///
    /// Values already of the right shape are returned unchanged.
    pub fn coerce(&self, ty: &FieldType) -> Option<Value> {
        match (ty, self) {
            (FieldType::Int(t), Value::UInt(_) | Value::Int(_)) => {
                t.raw(self).map(|raw| t.value(raw))
            }
            (FieldType::Bits(n), &Value::UInt(v)) => {
                (v <= crate::bits::mask(*n as usize)).then_some(Value::UInt(v))
            }
            (FieldType::Bits(n), &Value::Int(v)) => (v >= 0
                && (v as u128) <= crate::bits::mask(*n as usize))
            .then_some(Value::UInt(v as u128)),
            (FieldType::Array(t), Value::Array(a)) => {
                if a.element() == *t {
                    Some(self.clone())
                } else {
                    a.retype(*t).map(Value::Array)
                }
            }
            (FieldType::Array(t), Value::Bytes(b)) => {
                Some(Value::Array(IntArray::from_byte_values(*t, b)))
            }
            (FieldType::Bytes, Value::Bytes(_)) => Some(self.clone()),
            (FieldType::Bytes, Value::Text(s)) => Some(Value::Bytes(s.as_bytes().to_vec())),
            (FieldType::Bytes, Value::Array(a)) if a.element().width == 1 => {
                Some(Value::Bytes(a.items().iter().map(|&v| v as u8).collect()))
            }
            (FieldType::Text, Value::Text(_)) => Some(self.clone()),
            (FieldType::Text, Value::Bytes(b)) => String::from_utf8(b.clone()).ok().map(Value::Text),
            (FieldType::Element, Value::Element(_)) => Some(self.clone()),
            _ => None,
        }
    }

    /// Renders the value using the printable form of `ty`.
    pub fn display<'a>(&'a self, ty: &'a FieldType) -> impl fmt::Display + 'a {
        TypedValue { value: self, ty }
    }
}

struct TypedValue<'a> {
    value: &'a Value,
    ty: &'a FieldType,
}

impl fmt::Display for TypedValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.ty, self.value) {
            (FieldType::Int(t), Value::UInt(_) | Value::Int(_)) => match t.raw(self.value) {
                Some(raw) => f.write_str(&t.format(raw)),
                None => write!(f, "{}", self.value),
            },
            _ => write!(f, "{}", self.value),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::UInt(v) => write!(f, "{}", v),
            Value::Int(v) => write!(f, "{}", v),
            Value::Array(a) => write!(f, "{}", a),
            Value::Bytes(b) => {
                f.write_str("b'")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                f.write_str("'")
            }
            Value::Text(s) => write!(f, "{:?}", s),
            Value::Element(e) => write!(f, "{}", e),
        }
    }
}

macro_rules! impl_from_unsigned {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Value::UInt(value as u128)
            }
        })*
    };
}

macro_rules! impl_from_signed {
    ($($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(value: $t) -> Self {
                Value::Int(value as i128)
            }
        })*
    };
}

impl_from_unsigned!(u8, u16, u32, u64, u128, usize);
impl_from_signed!(i8, i16, i32, i64, i128);

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl<const N: usize> From<&[u8; N]> for Value {
    fn from(value: &[u8; N]) -> Self {
        Value::Bytes(value.to_vec())
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<IntArray> for Value {
    fn from(value: IntArray) -> Self {
        Value::Array(value)
    }
}

impl From<DataElement> for Value {
    fn from(value: DataElement) -> Self {
        Value::Element(value)
    }
}

/// Convenience for building an unsigned array value.
pub fn array(element: IntType, items: impl IntoIterator<Item = u128>) -> Value {
    Value::Array(IntArray::new(element, items.into_iter().collect()))
}
