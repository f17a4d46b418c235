//! JSON-deserializable schema description.
//!
//! These types describe the layout of a record. They are intended to be
//! loaded from a schema file shipped with your application and compiled
//! with [crate::schema::Schema::compile_def].

use serde::{Deserialize, Serialize};

use crate::{
    element::ElementLimits,
    int::{Endian, IntType},
    value::{self, Value},
};

/// Top-level schema definition.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SchemaDef {
    pub name: String,
    /// Fields in wire order.
    pub fields: Vec<FieldDef>,
    /// Budget for element fields; defaults apply when absent.
    #[serde(default)]
    pub element_limits: Option<ElementLimits>,
}

/// Description of a single field.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FieldDef {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: FieldTypeDef,
    #[serde(default)]
    pub default: Option<ValueDef>,
    /// Marks this field as the length of the named data field.
    #[serde(default)]
    pub length_of: Option<String>,
    /// Takes this field's length from a sibling field or a literal.
    #[serde(default)]
    pub length_from: Option<LengthRefDef>,
    #[serde(default)]
    pub length_offset: Option<LengthRefDef>,
    /// Derive this field from the packed bytes of the fields after it.
    #[serde(default)]
    pub union: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(tag = "kind")]
pub enum FieldTypeDef {
    Int(IntTypeDef),
    Bits { bits: u8 },
    Array(IntTypeDef),
    Bytes,
    Text,
    Element,
}

#[derive(Debug, Deserialize, Serialize, Default, Clone, Copy)]
pub enum EndianDef {
    #[default]
    Little,
    Big,
}

/// Fixed-width integer layout.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct IntTypeDef {
    /// Width in bytes.
    pub width: usize,
    #[serde(default)]
    pub endian: EndianDef,
    #[serde(default)]
    pub signed: bool,
}

impl From<IntTypeDef> for IntType {
    fn from(value: IntTypeDef) -> Self {
        let endian = match value.endian {
            EndianDef::Little => Endian::Little,
            EndianDef::Big => Endian::Big,
        };
        IntType::new(value.width, endian, value.signed)
    }
}

/// Either the name of a sibling field or a constant.
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(untagged)]
pub enum LengthRefDef {
    Literal(i64),
    Field(String),
}

/// Default values expressible in a schema file.
#[derive(Debug, Deserialize, Serialize, Clone)]
pub enum ValueDef {
    UInt(u64),
    Int(i64),
    Bytes(Vec<u8>),
    Text(String),
    Array { element: IntTypeDef, items: Vec<u64> },
}

impl From<ValueDef> for Value {
    fn from(value: ValueDef) -> Self {
        match value {
            ValueDef::UInt(v) => Value::UInt(v as u128),
            ValueDef::Int(v) => Value::Int(v as i128),
            ValueDef::Bytes(b) => Value::Bytes(b),
            ValueDef::Text(s) => Value::Text(s),
            ValueDef::Array { element, items } => {
                value::array(element.into(), items.into_iter().map(u128::from))
            }
        }
    }
}
