//! # packcraft
//!
//! A declarative codec for binary protocol records.
//!
//! Describe a record as an ordered list of fields (fixed-width integers,
//! integer arrays, raw bytes, text, sub-byte bitfields and nested data
//! elements), link length fields to the data they measure, then pack
//! records to bytes and unpack bytes into records. Length fields and union
//! fields, which alias the packed bytes of the fields after them, are
//! derived automatically.
//!
//! ## Example
//!
//! ```
//! use packcraft::field::{FieldDef, FieldType};
//! use packcraft::int::IntType;
//! use packcraft::schema::Schema;
//! use packcraft::value::Value;
//!
//! let schema = Schema::compile(
//!     "frame",
//!     vec![
//!         FieldDef::new("length", FieldType::Int(IntType::U8)).length_of("data"),
//!         FieldDef::new("data", FieldType::Bytes).length_from("length"),
//!     ],
//! )
//! .unwrap();
//!
//! let record = schema.build([("data", &[0x01u8, 0x02])]).unwrap();
//! assert_eq!(record.pack().unwrap(), vec![0x02, 0x01, 0x02]);
//!
//! let parsed = schema.unpack(&[0x01, 0xFF]).unwrap();
//! assert_eq!(parsed.get("data"), Some(&Value::Bytes(vec![0xFF])));
//! ```

pub mod array;
pub mod bits;
pub mod element;
pub mod errors;
pub mod field;
pub mod int;
pub mod record;
pub mod schema;
#[cfg(feature = "serde")]
pub mod serde;
pub mod value;
