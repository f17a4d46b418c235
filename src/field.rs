//! Definition of the named, typed fields used to build a [crate::schema::Schema].

use crate::{int::IntType, value::Value};

/// A single named field in a schema, plus the metadata linking it to its
/// siblings.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Name used to address the field in a [crate::record::Record].
    pub name: String,
    pub ty: FieldType,
    /// Initial value of a fresh record and, when non-empty, the value a
    /// decoded field must equal for unpacking to succeed.
    pub default: Option<Value>,
    /// Marks this field as the length field of the named sibling. Its value
    /// is derived from that sibling and never supplied by the caller.
    pub data_field: Option<String>,
    /// Where this field's own length comes from.
    pub length_field: Option<LengthRef>,
    /// Added to the length resolved through `length_field`.
    pub length_offset: Option<LengthRef>,
    /// The field aliases the bytes of every field declared after it.
    pub union: bool,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: FieldType) -> Self {
        FieldDef {
            name: name.into(),
            ty,
            default: None,
            data_field: None,
            length_field: None,
            length_offset: None,
            union: false,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Makes this field the length field of `data_field`.
    pub fn length_of(mut self, data_field: impl Into<String>) -> Self {
        self.data_field = Some(data_field.into());
        self
    }

    /// Reads this field's length from `length`.
    pub fn length_from(mut self, length: impl Into<LengthRef>) -> Self {
        self.length_field = Some(length.into());
        self
    }

    pub fn length_offset(mut self, offset: impl Into<LengthRef>) -> Self {
        self.length_offset = Some(offset.into());
        self
    }

    pub fn union(mut self) -> Self {
        self.union = true;
        self
    }

    pub fn is_length_field(&self) -> bool {
        self.data_field.is_some()
    }

    pub fn is_data_field(&self) -> bool {
        self.length_field.is_some()
    }

    /// True for fields that are neither derived nor linked to another field.
    pub fn is_independent(&self) -> bool {
        !self.union && !self.is_length_field() && !self.is_data_field()
    }

    /// The default, if it is present and not an empty byte/text/array value.
    pub fn match_default(&self) -> Option<&Value> {
        self.default.as_ref().filter(|v| !v.is_empty())
    }
}

/// Declared type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Whole-byte integer.
    Int(IntType),
    /// Unsigned integer of 1..=15 bits, packed in a bitfield group.
    Bits(u8),
    /// Homogeneous integer array.
    Array(IntType),
    /// Opaque byte blob.
    Bytes,
    /// UTF-8 text.
    Text,
    /// Self-describing nested [crate::element::DataElement].
    Element,
}

impl FieldType {
    /// Intrinsic encoded length in bits, if the type has one.
    pub fn static_bits(&self) -> Option<usize> {
        match self {
            FieldType::Int(t) => Some(t.bits()),
            FieldType::Bits(n) => Some(*n as usize),
            _ => None,
        }
    }
}

/// A length reference: either a sibling field's current value or a constant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LengthRef {
    Field(String),
    Literal(i64),
}

impl From<&str> for LengthRef {
    fn from(value: &str) -> Self {
        LengthRef::Field(value.to_string())
    }
}

impl From<String> for LengthRef {
    fn from(value: String) -> Self {
        LengthRef::Field(value)
    }
}

impl From<i64> for LengthRef {
    fn from(value: i64) -> Self {
        LengthRef::Literal(value)
    }
}

#[cfg(feature = "serde")]
impl From<crate::serde::FieldDef> for FieldDef {
    fn from(value: crate::serde::FieldDef) -> Self {
        FieldDef {
            name: value.name,
            ty: value.ty.into(),
            default: value.default.map(Into::into),
            data_field: value.length_of,
            length_field: value.length_from.map(Into::into),
            length_offset: value.length_offset.map(Into::into),
            union: value.union,
        }
    }
}

#[cfg(feature = "serde")]
impl From<crate::serde::FieldTypeDef> for FieldType {
    fn from(value: crate::serde::FieldTypeDef) -> Self {
        match value {
            crate::serde::FieldTypeDef::Int(t) => FieldType::Int(t.into()),
            crate::serde::FieldTypeDef::Bits { bits } => FieldType::Bits(bits),
            crate::serde::FieldTypeDef::Array(t) => FieldType::Array(t.into()),
            crate::serde::FieldTypeDef::Bytes => FieldType::Bytes,
            crate::serde::FieldTypeDef::Text => FieldType::Text,
            crate::serde::FieldTypeDef::Element => FieldType::Element,
        }
    }
}

#[cfg(feature = "serde")]
impl From<crate::serde::LengthRefDef> for LengthRef {
    fn from(value: crate::serde::LengthRefDef) -> Self {
        match value {
            crate::serde::LengthRefDef::Field(name) => LengthRef::Field(name),
            crate::serde::LengthRefDef::Literal(n) => LengthRef::Literal(n),
        }
    }
}
