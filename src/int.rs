//! Fixed-width integer codec.
//!
//! An [IntType] describes a whole-byte integer slot: width in bytes, byte
//! order and signedness. Values travel through the codec as raw two's
//! complement bits in a `u128`; [IntType::raw] and [IntType::value] convert
//! between raw bits and [Value]s with range checking.

use crate::{bits, errors::SchemaError, value::Value};

/// Widths, in bytes, an [IntType] may declare.
pub const VALID_WIDTHS: [usize; 6] = [1, 2, 3, 4, 8, 16];

/// Byte order of a multi-byte integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
}

/// A whole-byte integer type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntType {
    /// Encoded width in bytes.
    pub width: usize,
    pub endian: Endian,
    /// If true, values are two's complement and sign-extended on decode.
    pub signed: bool,
}

impl IntType {
    pub const I8: IntType = IntType::new(1, Endian::Little, true);
    pub const I16: IntType = IntType::new(2, Endian::Little, true);
    pub const I24: IntType = IntType::new(3, Endian::Little, true);
    pub const I32: IntType = IntType::new(4, Endian::Little, true);
    pub const U8: IntType = IntType::new(1, Endian::Little, false);
    pub const U16: IntType = IntType::new(2, Endian::Little, false);
    pub const U24: IntType = IntType::new(3, Endian::Little, false);
    pub const U32: IntType = IntType::new(4, Endian::Little, false);
    pub const U64: IntType = IntType::new(8, Endian::Little, false);
    pub const U128: IntType = IntType::new(16, Endian::Little, false);
    pub const U16_BE: IntType = IntType::new(2, Endian::Big, false);
    pub const U32_BE: IntType = IntType::new(4, Endian::Big, false);
    pub const U64_BE: IntType = IntType::new(8, Endian::Big, false);
    pub const U128_BE: IntType = IntType::new(16, Endian::Big, false);

    pub const fn new(width: usize, endian: Endian, signed: bool) -> Self {
        IntType {
            width,
            endian,
            signed,
        }
    }

    /// Fails if the width is not one of [VALID_WIDTHS].
    pub fn validate(&self) -> Result<(), SchemaError> {
        if VALID_WIDTHS.contains(&self.width) {
            Ok(())
        } else {
            Err(SchemaError::InvalidWidth(self.width))
        }
    }

    pub fn bits(&self) -> usize {
        self.width * 8
    }

    /// Encodes the low `width` bytes of `raw` in this type's byte order.
    pub fn encode(&self, raw: u128) -> Result<Vec<u8>, SchemaError> {
        self.validate()?;

        let mut out = raw.to_le_bytes()[..self.width].to_vec();
        if self.endian == Endian::Big {
            out.reverse();
        }

        Ok(out)
    }

    /// Decodes the first `width` bytes of `data` into raw bits, ignoring the
    /// remainder. Returns `None` if the width is invalid or `data` is too
    /// short.
    pub fn decode(&self, data: &[u8]) -> Option<u128> {
        self.validate().ok()?;
        let bytes = data.get(..self.width)?;
        let mut raw = [0u8; 16];
        raw[..self.width].copy_from_slice(bytes);
        if self.endian == Endian::Big {
            raw[..self.width].reverse();
        }

        Some(u128::from_le_bytes(raw))
    }

    /// Converts a value to raw bits. Returns `None` if the value is not an
    /// integer or does not fit this type.
    pub fn raw(&self, value: &Value) -> Option<u128> {
        let bits = self.bits();
        match (value, self.signed) {
            (&Value::UInt(v), false) => (v <= bits::mask(bits)).then_some(v),
            (&Value::Int(v), false) => {
                (v >= 0 && (v as u128) <= bits::mask(bits)).then_some(v as u128)
            }
            (&Value::UInt(v), true) => (v <= signed_max(bits) as u128).then_some(v),
            (&Value::Int(v), true) => (v >= signed_min(bits) && v <= signed_max(bits))
                .then_some(v as u128 & bits::mask(bits)),
            _ => None,
        }
    }

    /// Interprets raw bits as a [Value] of this type.
    pub fn value(&self, raw: u128) -> Value {
        let raw = raw & bits::mask(self.bits());
        if self.signed {
            Value::Int(bits::sign_extend(raw, self.bits()))
        } else {
            Value::UInt(raw)
        }
    }

    /// Renders raw bits as zero-padded hex matching the width followed by the
    /// decimal value, e.g. `0x0102(258)`. Unknown widths print plain decimal.
    pub fn format(&self, raw: u128) -> String {
        if self.validate().is_err() {
            return raw.to_string();
        }

        let decimal = match self.value(raw) {
            Value::Int(v) => v.to_string(),
            _ => (raw & bits::mask(self.bits())).to_string(),
        };
        let raw = raw & bits::mask(self.bits());

        format!("0x{:0w$x}({})", raw, decimal, w = self.width * 2)
    }
}

fn signed_max(bits: usize) -> i128 {
    if bits >= 128 {
        i128::MAX
    } else {
        (1i128 << (bits - 1)) - 1
    }
}

fn signed_min(bits: usize) -> i128 {
    if bits >= 128 {
        i128::MIN
    } else {
        -(1i128 << (bits - 1))
    }
}
