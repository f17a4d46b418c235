//! Record: one instance of a [Schema] and the engine that packs it to bytes
//! and unpacks bytes into it.
//!
//! ## Field lengths
//!
//! A field's length is resolved with the first rule that applies:
//!
//! 1. the type's intrinsic width (integers and bitfields);
//! 2. the `length_field` metadata: a sibling's current value or a literal,
//!    plus `length_offset`, times the element width for arrays;
//! 3. the length of the field's current value, or of its default;
//! 4. zero.
//!
//! ## Derived fields
//!
//! Length fields and union fields are derived, last field first, whenever
//! the record is built, modified through [Record::set], or packed.

use std::{fmt, ops::Range};

use tracing::{debug, info, warn};

use crate::{
    array::IntArray,
    bits::{self, BitGroup},
    element::DataElement,
    errors::{ReadError, WriteError},
    field::{FieldDef, FieldType, LengthRef},
    schema::Schema,
    value::Value,
};

/// Ordered field values of one schema instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Record<'s> {
    schema: &'s Schema,
    values: Vec<Option<Value>>,
}

impl<'s> Record<'s> {
    pub(crate) fn new(schema: &'s Schema) -> Self {
        let mut record = Record {
            schema,
            values: schema.fields().iter().map(|f| f.default.clone()).collect(),
        };
        record.refresh();
        record
    }

    pub fn schema(&self) -> &'s Schema {
        self.schema
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schema
            .index_of(name)
            .and_then(|i| self.values[i].as_ref())
    }

    /// Fields paired with their current values, in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (&'s FieldDef, Option<&Value>)> {
        self.schema
            .fields()
            .iter()
            .zip(self.values.iter().map(Option::as_ref))
    }

    /// Sets a field and re-derives length and union fields.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), WriteError> {
        self.set_raw(name, value.into())?;
        self.refresh();
        Ok(())
    }

    /// Unsets a field. Unset fields match anything in [Record::almost_equal].
    pub fn clear(&mut self, name: &str) -> Result<(), WriteError> {
        let i = self
            .schema
            .index_of(name)
            .ok_or_else(|| WriteError::UnknownField(name.to_string()))?;
        self.values[i] = None;
        Ok(())
    }

    pub(crate) fn set_raw(&mut self, name: &str, value: Value) -> Result<(), WriteError> {
        let i = self
            .schema
            .index_of(name)
            .ok_or_else(|| WriteError::UnknownField(name.to_string()))?;
        self.values[i] = Some(value);
        Ok(())
    }

    /// Re-derives length and union fields, last field first, then converts
    /// every value to its declared type where that conversion is allowed.
    ///
    /// A union field takes the packed bytes of every field after it; if
    /// those pack to nothing, its current value is kept.
    pub fn refresh(&mut self) {
        let schema = self.schema;
        let fields = schema.fields();

        for (idx, field) in fields.iter().enumerate().rev() {
            if let Some(target) = field.data_field.as_deref().and_then(|n| schema.index_of(n)) {
                match self.derived_length(target, idx) {
                    Ok(units) => self.values[idx] = Some(Value::UInt(units as u128)),
                    Err(err) => warn!(field = %field.name, error = %err, "length not derived"),
                }
            }

            if field.union {
                match self.emit(idx + 1..fields.len(), true) {
                    Ok(joined) if !joined.is_empty() => {
                        self.values[idx] = Some(Value::Bytes(joined));
                    }
                    _ => {}
                }
            }
        }

        for (field, slot) in fields.iter().zip(self.values.iter_mut()) {
            if let Some(value) = slot {
                match value.coerce(&field.ty) {
                    Some(coerced) => *value = coerced,
                    None => debug!(field = %field.name, "value left unconverted"),
                }
            }
        }
    }

    /// Total encoded length in bytes. Only the last field may contribute
    /// union bytes; earlier union fields count as empty.
    ///
    /// Saturates at `usize::MAX` if a length cannot be represented; use
    /// [Record::try_length] to tell that case apart.
    pub fn length(&self) -> usize {
        self.try_length().unwrap_or_else(|err| {
            warn!(schema = %self.schema.name(), error = %err, "record length cannot be represented");
            usize::MAX
        })
    }

    pub fn try_length(&self) -> Result<usize, ReadError> {
        let fields = self.schema.fields();
        let last = fields.len().saturating_sub(1);

        let mut bits = 0usize;
        for (i, field) in fields.iter().enumerate() {
            if field.union && i != last {
                continue;
            }
            bits = bits
                .checked_add(self.resolve_bits(i)?)
                .ok_or_else(|| ReadError::LengthOverflow(field.name.clone()))?;
        }

        if bits % 8 != 0 {
            warn!(schema = %self.schema.name(), bits, "record length is not a whole number of bytes");
        }

        Ok(bits / 8)
    }

    /// Packs the record into its wire representation. Length and union
    /// fields are re-derived first, so they always reflect the current data.
    pub fn pack(&self) -> Result<Vec<u8>, WriteError> {
        info!(schema = %self.schema.name(), "pack");

        let mut work = self.clone();
        work.refresh();
        let data = work.emit(0..self.values.len(), false)?;

        debug!(schema = %self.schema.name(), len = data.len(), "packed record");
        Ok(data)
    }

    /// Structural equality over independent fields only: union, length and
    /// length-linked fields are skipped, and an unset value on either side
    /// matches anything.
    pub fn almost_equal(&self, other: &Record<'_>) -> bool {
        if !std::ptr::eq(self.schema, other.schema) && self.schema != other.schema {
            return false;
        }

        self.schema
            .fields()
            .iter()
            .zip(self.values.iter().zip(&other.values))
            .filter(|(field, _)| field.is_independent())
            .all(|(_, pair)| match pair {
                (Some(a), Some(b)) => a == b,
                _ => true,
            })
    }

    fn resolve_bits(&self, idx: usize) -> Result<usize, ReadError> {
        self.resolve_bits_skipping(idx, None)
    }

    /// Resolves a field's length in bits. `skip` names a length field whose
    /// value must not be consulted, used while deriving that length field.
    fn resolve_bits_skipping(&self, idx: usize, skip: Option<usize>) -> Result<usize, ReadError> {
        let field = &self.schema.fields()[idx];

        if let Some(bits) = field.ty.static_bits() {
            return Ok(bits);
        }

        let bytes = match self.metadata_len(idx, skip)? {
            Some(bytes) => bytes,
            None => self.values[idx]
                .as_ref()
                .and_then(Value::len)
                .or_else(|| field.default.as_ref().and_then(Value::len))
                .unwrap_or(0),
        };

        bytes
            .checked_mul(8)
            .ok_or_else(|| ReadError::LengthOverflow(field.name.clone()))
    }

    /// Length in bytes given by the `length_field` and `length_offset`
    /// metadata. `None` if the field has no such metadata or the referenced
    /// length field is unset.
    fn metadata_len(&self, idx: usize, skip: Option<usize>) -> Result<Option<usize>, ReadError> {
        let field = &self.schema.fields()[idx];
        let overflow = || ReadError::LengthOverflow(field.name.clone());

        let Some(length_ref) = field.length_field.as_ref() else {
            return Ok(None);
        };
        if skip.is_some() && self.ref_index(length_ref) == skip {
            return Ok(None);
        }
        let Some(length) = self.ref_value(idx, length_ref)? else {
            return Ok(None);
        };
        let offset = match &field.length_offset {
            Some(r) => self.ref_value(idx, r)?.unwrap_or(0),
            None => 0,
        };

        let total = length.checked_add(offset).ok_or_else(overflow)?;
        if total < 0 {
            warn!(field = %field.name, total = %total, "negative resolved length");
            return Ok(Some(0));
        }
        let total = usize::try_from(total).map_err(|_| overflow())?;

        let bytes = match field.ty {
            FieldType::Array(t) => total.checked_mul(t.width).ok_or_else(overflow)?,
            _ => total,
        };

        Ok(Some(bytes))
    }

    /// Value a length field should hold for the data field at `data_idx`.
    ///
    /// Expressed in the unit the data field reads it in (elements for
    /// arrays, bytes otherwise), less the data field's offset, when the data
    /// field takes its length from this length field.
    fn derived_length(&self, data_idx: usize, length_idx: usize) -> Result<usize, ReadError> {
        let field = &self.schema.fields()[data_idx];
        let overflow = || ReadError::LengthOverflow(field.name.clone());
        let bytes = self
            .resolve_bits_skipping(data_idx, Some(length_idx))?
            .div_ceil(8);

        let linked = field
            .length_field
            .as_ref()
            .is_some_and(|r| self.ref_index(r) == Some(length_idx));
        if !linked {
            return Ok(bytes);
        }

        let units = match field.ty {
            FieldType::Array(t) => bytes / t.width,
            _ => bytes,
        };
        let offset = match &field.length_offset {
            Some(r) => self.ref_value(data_idx, r)?.unwrap_or(0),
            None => 0,
        };

        let derived = (units as i128).checked_sub(offset).ok_or_else(overflow)?;
        if derived < 0 {
            warn!(field = %field.name, derived = %derived, "negative derived length");
            return Ok(0);
        }

        usize::try_from(derived).map_err(|_| overflow())
    }

    fn ref_index(&self, r: &LengthRef) -> Option<usize> {
        match r {
            LengthRef::Field(name) => self.schema.index_of(name),
            LengthRef::Literal(_) => None,
        }
    }

    /// Current value of a length reference made by the field at `idx`.
    /// `None` if the referenced field is unset; an error if it does not
    /// hold an integer that can serve as a length.
    fn ref_value(&self, idx: usize, r: &LengthRef) -> Result<Option<i128>, ReadError> {
        let overflow = || ReadError::LengthOverflow(self.schema.fields()[idx].name.clone());

        match r {
            LengthRef::Literal(n) => Ok(Some(*n as i128)),
            LengthRef::Field(_) => match self.ref_index(r).and_then(|i| self.values[i].as_ref()) {
                None => Ok(None),
                Some(&Value::UInt(v)) => i128::try_from(v).map(Some).map_err(|_| overflow()),
                Some(&Value::Int(v)) => Ok(Some(v)),
                Some(_) => Err(overflow()),
            },
        }
    }

    /// Packs the fields in `range`. Union fields emit nothing unless they
    /// are the last field of the schema. With `lenient`, fields that fail to
    /// pack are skipped instead of failing the whole range.
    fn emit(&self, range: Range<usize>, lenient: bool) -> Result<Vec<u8>, WriteError> {
        let fields = self.schema.fields();
        let last = fields.len().saturating_sub(1);
        let mut out = Vec::new();
        let mut group = BitGroup::new();

        for idx in range {
            let field = &fields[idx];

            if field.union {
                if idx == last {
                    match &self.values[idx] {
                        Some(Value::Bytes(b)) => out.extend_from_slice(b),
                        Some(_) => warn!(field = %field.name, "union field does not hold bytes"),
                        None => {}
                    }
                }
                continue;
            }

            let chunk = match field.ty {
                FieldType::Bits(width) => {
                    if !group.push(idx, width) {
                        continue;
                    }
                    self.pack_group(&group.take())
                }
                _ => self.pack_field(idx),
            };

            match chunk {
                Ok(bytes) => out.extend(bytes),
                Err(err) if lenient => {
                    debug!(field = %field.name, error = %err, "skipped field");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(out)
    }

    fn pack_group(&self, members: &[(usize, u8)]) -> Result<Vec<u8>, WriteError> {
        let fields = self.schema.fields();
        let mut parts = Vec::with_capacity(members.len());

        for &(idx, width) in members {
            let field = &fields[idx];
            match self.typed_value(idx)? {
                Value::UInt(v) => parts.push((width, v as u64)),
                _ => return Err(WriteError::TypeMismatch(field.name.clone())),
            }
        }

        let bytes = bits::pack_group(&parts);
        debug!(fields = members.len(), len = bytes.len(), "packed bitfield group");
        Ok(bytes)
    }

    fn pack_field(&self, idx: usize) -> Result<Vec<u8>, WriteError> {
        let field = &self.schema.fields()[idx];
        let value = self.typed_value(idx)?;

        let bytes = match (&field.ty, &value) {
            (FieldType::Int(t), _) => {
                let raw = t
                    .raw(&value)
                    .ok_or_else(|| WriteError::ValueOutOfRange(field.name.clone()))?;
                t.encode(raw)?
            }
            (FieldType::Array(_), Value::Array(a)) => {
                if !a.fits() {
                    return Err(WriteError::ValueOutOfRange(field.name.clone()));
                }
                a.encode()?
            }
            (FieldType::Bytes, Value::Bytes(b)) => b.clone(),
            (FieldType::Text, Value::Text(s)) => s.as_bytes().to_vec(),
            (FieldType::Element, Value::Element(e)) => e.encode(),
            _ => return Err(WriteError::TypeMismatch(field.name.clone())),
        };

        let expected = self
            .metadata_len(idx, None)
            .map_err(|_| WriteError::ValueOutOfRange(field.name.clone()))?;
        if let Some(expected) = expected {
            if expected != bytes.len() {
                return Err(WriteError::LengthMismatch {
                    field: field.name.clone(),
                    expected,
                    actual: bytes.len(),
                });
            }
        }

        debug!(field = %field.name, len = bytes.len(), "packed field");
        Ok(bytes)
    }

    /// The field's value converted to its declared type.
    fn typed_value(&self, idx: usize) -> Result<Value, WriteError> {
        let field = &self.schema.fields()[idx];
        let value = self.values[idx]
            .as_ref()
            .ok_or_else(|| WriteError::MissingValue(field.name.clone()))?;

        match value.coerce(&field.ty) {
            Some(v) => Ok(v),
            None if matches!(value, Value::UInt(_) | Value::Int(_)) => {
                Err(WriteError::ValueOutOfRange(field.name.clone()))
            }
            None => Err(WriteError::TypeMismatch(field.name.clone())),
        }
    }

    /// Parses `data` into this record, field by field.
    ///
    /// Fails up front if `data` is shorter than [Record::length] resolves to
    /// before any value is read.
    pub(crate) fn unpack_from(&mut self, data: &[u8]) -> Result<(), ReadError> {
        let schema = self.schema;
        let needed = self.try_length()?;
        if data.len() < needed {
            return Err(ReadError::PacketTooShort {
                needed,
                available: data.len(),
            });
        }

        info!(schema = %schema.name(), len = data.len(), "unpack");

        let mut cursor = 0;
        let mut group = BitGroup::new();

        for (idx, field) in schema.fields().iter().enumerate() {
            let (value, consumed) = match field.ty {
                FieldType::Bits(width) => {
                    if group.push(idx, width) {
                        cursor += self.unpack_group(data, cursor, &group.take())?;
                    }
                    continue;
                }
                FieldType::Element => {
                    let element =
                        DataElement::decode_with_limits(&data[cursor..], schema.element_limits())?;
                    let len = element.len();
                    (Value::Element(element), len)
                }
                FieldType::Int(t) => {
                    let bytes = self.slice(idx, data, cursor)?;
                    let raw = t
                        .decode(bytes)
                        .ok_or_else(|| ReadError::OutOfBounds(field.name.clone()))?;
                    (t.value(raw), bytes.len())
                }
                FieldType::Array(t) => {
                    let bytes = self.slice(idx, data, cursor)?;
                    (Value::Array(IntArray::decode(t, bytes)), bytes.len())
                }
                FieldType::Bytes => {
                    let bytes = self.slice(idx, data, cursor)?;
                    (Value::Bytes(bytes.to_vec()), bytes.len())
                }
                FieldType::Text => {
                    let bytes = self.slice(idx, data, cursor)?;
                    let text = String::from_utf8(bytes.to_vec())
                        .map_err(|_| ReadError::InvalidUtf8(field.name.clone()))?;
                    (Value::Text(text), bytes.len())
                }
            };

            let value = value.coerce(&field.ty).unwrap_or(value);
            if let Some(expected) = field.match_default() {
                if *expected != value {
                    return Err(ReadError::DefaultMismatch(field.name.clone()));
                }
            }

            debug!(field = %field.name, offset = cursor, len = consumed, "unpacked field");
            self.values[idx] = Some(value);

            // union fields view the bytes of the fields after them
            if !field.union {
                cursor += consumed;
            }
        }

        info!(schema = %schema.name(), consumed = cursor, "unpack succeeded");
        Ok(())
    }

    /// Bytes of the field at `idx` starting at `cursor`. Union fields are
    /// clamped to the input instead of failing.
    fn slice<'d>(&self, idx: usize, data: &'d [u8], cursor: usize) -> Result<&'d [u8], ReadError> {
        let field = &self.schema.fields()[idx];
        let len = self.resolve_bits(idx)? / 8;
        let end = cursor.saturating_add(len);

        if field.union {
            return Ok(&data[cursor..end.min(data.len())]);
        }

        data.get(cursor..end)
            .ok_or_else(|| ReadError::OutOfBounds(field.name.clone()))
    }

    /// Decodes a flushed bitfield group at `cursor`, then checks defaults.
    /// Returns the number of bytes consumed.
    fn unpack_group(
        &mut self,
        data: &[u8],
        cursor: usize,
        members: &[(usize, u8)],
    ) -> Result<usize, ReadError> {
        let fields = self.schema.fields();
        let len = members.iter().map(|&(_, w)| w as usize).sum::<usize>() / 8;
        let bytes = data.get(cursor..cursor + len).ok_or_else(|| {
            let name = members.first().map(|&(i, _)| fields[i].name.clone());
            ReadError::OutOfBounds(name.unwrap_or_default())
        })?;

        let widths: Vec<u8> = members.iter().map(|&(_, w)| w).collect();
        for (&(idx, _), v) in members.iter().zip(bits::unpack_group(bytes, &widths)) {
            self.values[idx] = Some(Value::UInt(v as u128));
        }

        for &(idx, _) in members {
            if let Some(expected) = fields[idx].match_default() {
                if self.values[idx].as_ref() != Some(expected) {
                    return Err(ReadError::DefaultMismatch(fields[idx].name.clone()));
                }
            }
        }

        debug!(fields = members.len(), offset = cursor, len, "unpacked bitfield group");
        Ok(len)
    }
}

impl fmt::Display for Record<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} (len={}):", self.schema.name(), self.length())?;
        for (field, value) in self.fields() {
            match value {
                Some(v) => writeln!(f, "  {}: {}", field.name, v.display(&field.ty))?,
                None => writeln!(f, "  {}: None", field.name)?,
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::{element::ElementLimits, errors::ElementError, int::IntType, value};

    fn length_field_schema() -> Schema {
        Schema::compile(
            "s_with_length_field",
            vec![
                FieldDef::new("length", FieldType::Int(IntType::U8)).length_of("data"),
                FieldDef::new("data", FieldType::Bytes)
                    .with_default(Vec::<u8>::new())
                    .length_from("length")
                    .union(),
            ],
        )
        .unwrap()
    }

    fn union_schema() -> Schema {
        Schema::compile(
            "s_with_union_field",
            vec![
                FieldDef::new("hci_length", FieldType::Int(IntType::U16)).length_of("hci_data"),
                FieldDef::new("hci_data", FieldType::Bytes)
                    .with_default(Vec::<u8>::new())
                    .union()
                    .length_from("hci_length"),
                FieldDef::new("l2c_length", FieldType::Int(IntType::U16)).length_of("l2c_data"),
                FieldDef::new("cid", FieldType::Int(IntType::U16)),
                FieldDef::new("l2c_data", FieldType::Bytes)
                    .with_default(Vec::<u8>::new())
                    .union()
                    .length_from("l2c_length"),
            ],
        )
        .unwrap()
    }

    fn array_schema() -> Schema {
        Schema::compile(
            "s_with_int_array",
            vec![
                FieldDef::new("array8", FieldType::Array(IntType::U8)).length_from(2),
                FieldDef::new("array16", FieldType::Array(IntType::U16)).length_from(2),
                FieldDef::new("array32", FieldType::Array(IntType::U32)).length_from(1),
            ],
        )
        .unwrap()
    }

    fn bitfield_schema() -> Schema {
        Schema::compile(
            "bitfields",
            vec![
                FieldDef::new("opcode", FieldType::Bits(8)),
                FieldDef::new("handle", FieldType::Bits(12)),
                FieldDef::new("pb", FieldType::Bits(2)),
                FieldDef::new("bc", FieldType::Bits(2)),
                FieldDef::new("tail", FieldType::Bits(8)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_length_field() {
        let schema = length_field_schema();
        let record = schema.build([("data", &[0x01u8, 0x02])]).unwrap();

        assert_eq!(record.get("length"), Some(&Value::UInt(2)));
        assert_eq!(record.length(), 3);

        let data = record.pack().unwrap();
        assert_eq!(data, vec![0x02, 0x01, 0x02]);

        let decoded = schema.unpack(&data).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_union_field() {
        let schema = union_schema();
        let record = schema
            .build([("cid", Value::UInt(0x0040)), ("l2c_data", Value::from(&[0x01u8]))])
            .unwrap();

        assert_eq!(record.get("l2c_length"), Some(&Value::UInt(1)));
        assert_eq!(record.get("hci_data"), Some(&Value::Bytes(vec![0x01, 0x00, 0x40, 0x00, 0x01])));
        assert_eq!(record.get("hci_length"), Some(&Value::UInt(5)));
        assert_eq!(record.length(), 7);

        let data = record.pack().unwrap();
        assert_eq!(data, vec![0x05, 0x00, 0x01, 0x00, 0x40, 0x00, 0x01]);

        let decoded = schema.unpack(&data).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_int_array() {
        let schema = array_schema();
        let record = schema
            .build([
                ("array8", value::array(IntType::U8, [0x01, 0x02])),
                ("array16", value::array(IntType::U16, [0x0001, 0x0002])),
                ("array32", value::array(IntType::U32, [0x00000001])),
            ])
            .unwrap();

        assert_eq!(record.length(), 10);
        let data = record.pack().unwrap();
        assert_eq!(data, vec![1, 2, 1, 0, 2, 0, 1, 0, 0, 0]);

        let decoded = schema.unpack(&data).unwrap();
        assert_eq!(decoded, record);
    }

    #[test]
    fn test_array_from_bytes_is_coerced() {
        let schema = array_schema();
        let record = schema
            .build([
                ("array8", Value::from(&[7u8, 8])),
                ("array16", value::array(IntType::U16, [1, 2])),
                ("array32", value::array(IntType::U32, [3])),
            ])
            .unwrap();
        assert_eq!(record.get("array8"), Some(&value::array(IntType::U8, [7, 8])));
    }

    #[test]
    fn test_array_count_length_field() {
        let schema = Schema::compile(
            "counted",
            vec![
                FieldDef::new("count", FieldType::Int(IntType::U8)).length_of("words"),
                FieldDef::new("words", FieldType::Array(IntType::U16_BE)).length_from("count"),
            ],
        )
        .unwrap();

        let record = schema
            .build([("words", value::array(IntType::U16_BE, [0x0102, 0x0304, 0x0506]))])
            .unwrap();
        assert_eq!(record.get("count"), Some(&Value::UInt(3)));

        let data = record.pack().unwrap();
        assert_eq!(data, vec![3, 1, 2, 3, 4, 5, 6]);
        assert_eq!(schema.unpack(&data).unwrap(), record);
    }

    #[test]
    fn test_length_offset() {
        // the length byte counts itself and a trailing checksum
        let schema = Schema::compile(
            "offset",
            vec![
                FieldDef::new("len", FieldType::Int(IntType::U8)).length_of("body"),
                FieldDef::new("body", FieldType::Bytes)
                    .length_from("len")
                    .length_offset(-2),
                FieldDef::new("crc", FieldType::Int(IntType::U8)),
            ],
        )
        .unwrap();

        let record = schema
            .build([("body", Value::from(&[0xAAu8, 0xBB, 0xCC])), ("crc", Value::UInt(0x5A))])
            .unwrap();
        assert_eq!(record.get("len"), Some(&Value::UInt(5)));

        let data = record.pack().unwrap();
        assert_eq!(data, vec![5, 0xAA, 0xBB, 0xCC, 0x5A]);
        assert_eq!(schema.unpack(&data).unwrap(), record);
    }

    #[test]
    fn test_length_rederived_on_pack() {
        let schema = length_field_schema();
        let mut record = schema.build([("data", &[0x01u8])]).unwrap();

        record.values[1] = Some(Value::Bytes(vec![9, 8, 7]));
        assert_eq!(record.pack().unwrap(), vec![3, 9, 8, 7]);

        record.set("data", &[1u8, 2, 3, 4]).unwrap();
        assert_eq!(record.get("length"), Some(&Value::UInt(4)));
    }

    #[test]
    fn test_union_keeps_manual_value_when_tail_is_empty() {
        let schema = length_field_schema();
        let mut record = schema.record();
        record.set("data", &[0xDE, 0xAD]).unwrap();
        assert_eq!(record.get("data"), Some(&Value::Bytes(vec![0xDE, 0xAD])));
    }

    #[test]
    fn test_bitfield_packing() {
        let schema = bitfield_schema();
        let record = schema
            .build([
                ("opcode", 0xAAu8),
                ("handle", 0x0BC),
                ("pb", 0b10),
                ("bc", 0b01),
                ("tail", 0x55),
            ])
            .unwrap();

        assert_eq!(record.length(), 4);
        let data = record.pack().unwrap();
        assert_eq!(data.len(), 4);

        let word = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        assert_eq!(word & 0xFF, 0xAA);
        assert_eq!((word >> 8) & 0xFFF, 0x0BC);
        assert_eq!((word >> 20) & 0b11, 0b10);
        assert_eq!((word >> 22) & 0b11, 0b01);
        assert_eq!(word >> 24, 0x55);

        assert_eq!(schema.unpack(&data).unwrap(), record);
    }

    #[test]
    fn test_bitfield_out_of_range() {
        let schema = bitfield_schema();
        let record = schema
            .build([("opcode", 0u32), ("handle", 0x1000), ("pb", 0), ("bc", 0), ("tail", 0)])
            .unwrap();
        assert_eq!(
            record.pack().unwrap_err(),
            WriteError::ValueOutOfRange("handle".to_string())
        );
    }

    #[test]
    fn test_bitfield_default_mismatch() {
        let schema = Schema::compile(
            "discriminated",
            vec![
                FieldDef::new("kind", FieldType::Bits(4)).with_default(0x3u8),
                FieldDef::new("flags", FieldType::Bits(4)),
                FieldDef::new("body", FieldType::Int(IntType::U8)),
            ],
        )
        .unwrap();

        assert!(schema.matches(&[0x53, 0x01]));
        assert_eq!(schema.unpack(&[0x53, 0x01]).unwrap().get("flags"), Some(&Value::UInt(5)));
        assert_eq!(
            schema.try_unpack(&[0x54, 0x01]).unwrap_err(),
            ReadError::DefaultMismatch("kind".to_string())
        );
        assert!(!schema.matches(&[0x54, 0x01]));
    }

    #[test]
    fn test_default_mismatch() {
        let schema = Schema::compile(
            "event",
            vec![
                FieldDef::new("opcode", FieldType::Int(IntType::U8)).with_default(0x0Eu8),
                FieldDef::new("status", FieldType::Int(IntType::U8)),
            ],
        )
        .unwrap();

        assert!(schema.matches(&[0x0E, 0x00]));
        assert_eq!(schema.unpack(&[0x0F, 0x00]), None);
        assert_eq!(
            schema.try_unpack(&[0x0F, 0x00]).unwrap_err(),
            ReadError::DefaultMismatch("opcode".to_string())
        );
    }

    #[test]
    fn test_magic_bytes_default() {
        let schema = Schema::compile(
            "magic",
            vec![
                FieldDef::new("magic", FieldType::Bytes).with_default(&[0xCA, 0xFE]),
                FieldDef::new("version", FieldType::Int(IntType::U8)),
            ],
        )
        .unwrap();

        assert_eq!(schema.record().length(), 3);
        assert!(schema.matches(&[0xCA, 0xFE, 0x01]));
        assert!(!schema.matches(&[0xCA, 0xFF, 0x01]));
    }

    #[test]
    fn test_insufficient_data() {
        let schema = union_schema();
        assert_eq!(schema.record().length(), 6);
        assert_eq!(
            schema.try_unpack(&[0x05, 0x00, 0x01]).unwrap_err(),
            ReadError::PacketTooShort {
                needed: 6,
                available: 3
            }
        );
        assert_eq!(schema.unpack(&[]), None);
    }

    #[test]
    fn test_length_field_past_end() {
        let schema = Schema::compile(
            "blob",
            vec![
                FieldDef::new("len", FieldType::Int(IntType::U8)).length_of("data"),
                FieldDef::new("data", FieldType::Bytes).length_from("len"),
            ],
        )
        .unwrap();

        assert_eq!(
            schema.try_unpack(&[0x05, 0x01]).unwrap_err(),
            ReadError::OutOfBounds("data".to_string())
        );
    }

    fn wide_length_schema() -> Schema {
        Schema::compile(
            "wide",
            vec![
                FieldDef::new("len", FieldType::Int(IntType::U64_BE)).length_of("data"),
                FieldDef::new("data", FieldType::Bytes).length_from("len"),
                FieldDef::new("tail", FieldType::Int(IntType::U8)),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_wide_length_field_overflow() {
        let schema = wide_length_schema();

        // 2^61 bytes is not addressable in bits
        let data = [0x20, 0, 0, 0, 0, 0, 0, 0, 0xAA];
        assert_eq!(
            schema.try_unpack(&data).unwrap_err(),
            ReadError::LengthOverflow("data".to_string())
        );

        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xAA];
        assert_eq!(
            schema.try_unpack(&data).unwrap_err(),
            ReadError::LengthOverflow("data".to_string())
        );
        assert!(!schema.matches(&data));

        let data = [0x10, 0, 0, 0, 0, 0, 0, 0, 0xAA];
        assert!(matches!(
            schema.try_unpack(&data).unwrap_err(),
            ReadError::PacketTooShort { .. }
        ));

        let record = schema.unpack(&[0, 0, 0, 0, 0, 0, 0, 1, 0x55, 0xAA]).unwrap();
        assert_eq!(record.get("data"), Some(&Value::Bytes(vec![0x55])));
        assert_eq!(record.get("tail"), Some(&Value::UInt(0xAA)));
    }

    #[test]
    fn test_unrepresentable_length_fails_pack() {
        let schema = Schema::compile(
            "huge",
            vec![
                FieldDef::new("len", FieldType::Int(IntType::U128)),
                FieldDef::new("data", FieldType::Bytes).length_from("len"),
            ],
        )
        .unwrap();
        let record = schema
            .build([("len", Value::UInt(1 << 100)), ("data", Value::from(&[1u8]))])
            .unwrap();
        assert_eq!(record.pack().unwrap_err(), WriteError::ValueOutOfRange("data".to_string()));
        assert_eq!(record.length(), usize::MAX);
        assert_eq!(record.try_length(), Err(ReadError::LengthOverflow("data".to_string())));

        let schema = Schema::compile(
            "words",
            vec![FieldDef::new("words", FieldType::Array(IntType::U32)).length_from(i64::MAX)],
        )
        .unwrap();
        let record = schema
            .build([("words", value::array(IntType::U32, [1]))])
            .unwrap();
        assert_eq!(record.pack().unwrap_err(), WriteError::ValueOutOfRange("words".to_string()));
    }

    #[test]
    fn test_text_field() {
        let schema = Schema::compile(
            "named",
            vec![
                FieldDef::new("len", FieldType::Int(IntType::U8)).length_of("name"),
                FieldDef::new("name", FieldType::Text).length_from("len"),
            ],
        )
        .unwrap();

        let record = schema.build([("name", "héllo")]).unwrap();
        let data = record.pack().unwrap();
        assert_eq!(data[0], 6);
        assert_eq!(schema.unpack(&data).unwrap(), record);

        assert_eq!(
            schema.try_unpack(&[0x01, 0xFF]).unwrap_err(),
            ReadError::InvalidUtf8("name".to_string())
        );
    }

    #[test]
    fn test_element_field() {
        let schema = Schema::compile(
            "attribute",
            vec![
                FieldDef::new("id", FieldType::Int(IntType::U16_BE)),
                FieldDef::new("value", FieldType::Element),
                FieldDef::new("trailer", FieldType::Int(IntType::U8)),
            ],
        )
        .unwrap();

        let element = DataElement::sequence(vec![DataElement::uuid(vec![0x11, 0x01]).unwrap()])
            .unwrap();
        let record = schema
            .build([
                ("id", Value::UInt(0x0001)),
                ("value", Value::Element(element)),
                ("trailer", Value::UInt(0xEE)),
            ])
            .unwrap();

        assert_eq!(record.length(), 9);
        let data = record.pack().unwrap();
        assert_eq!(data, vec![0x00, 0x01, 0x35, 0x04, 0x1D, 0x02, 0x11, 0x01, 0xEE]);
        assert_eq!(schema.unpack(&data).unwrap(), record);
    }

    #[test]
    fn test_element_field_limits() {
        let schema = Schema::compile("nested", vec![FieldDef::new("value", FieldType::Element)])
            .unwrap()
            .with_element_limits(ElementLimits {
                max_depth: 0,
                ..Default::default()
            });

        let element = DataElement::sequence(vec![DataElement::nil()]).unwrap();
        assert_eq!(
            schema.try_unpack(&element.encode()).unwrap_err(),
            ReadError::Element(ElementError::DepthExceeded(0))
        );
    }

    #[test]
    fn test_pack_errors() {
        let schema = Schema::compile(
            "plain",
            vec![
                FieldDef::new("a", FieldType::Int(IntType::U8)),
                FieldDef::new("b", FieldType::Bytes).length_from(2),
            ],
        )
        .unwrap();

        let record = schema.build([("b", &[1u8, 2])]).unwrap();
        assert_eq!(record.pack().unwrap_err(), WriteError::MissingValue("a".to_string()));

        let record = schema.build([("a", Value::UInt(256)), ("b", Value::from(&[1u8, 2]))]).unwrap();
        assert_eq!(record.pack().unwrap_err(), WriteError::ValueOutOfRange("a".to_string()));

        let record = schema.build([("a", Value::from("x")), ("b", Value::from(&[1u8, 2]))]).unwrap();
        assert_eq!(record.pack().unwrap_err(), WriteError::TypeMismatch("a".to_string()));

        let record = schema.build([("a", Value::UInt(1)), ("b", Value::from(&[1u8]))]).unwrap();
        assert_eq!(
            record.pack().unwrap_err(),
            WriteError::LengthMismatch {
                field: "b".to_string(),
                expected: 2,
                actual: 1
            }
        );

        assert_eq!(
            schema.build([("c", 1u8)]).unwrap_err(),
            WriteError::UnknownField("c".to_string())
        );
    }

    #[test]
    fn test_almost_equal() {
        let schema = union_schema();
        let pattern = {
            let mut r = schema.record();
            r.clear("cid").unwrap();
            r
        };
        let record = schema
            .build([("cid", Value::UInt(0x0040)), ("l2c_data", Value::from(&[0x01u8]))])
            .unwrap();
        assert!(pattern.almost_equal(&record));
        assert!(record.almost_equal(&pattern));

        let other = schema
            .build([("cid", Value::UInt(0x0041)), ("l2c_data", Value::from(&[0x02u8, 0x03]))])
            .unwrap();
        assert!(!record.almost_equal(&other));

        let same_cid = schema
            .build([("cid", Value::UInt(0x0040)), ("l2c_data", Value::from(&[0x02u8, 0x03]))])
            .unwrap();
        assert!(record.almost_equal(&same_cid));
        assert_ne!(record, same_cid);

        let foreign = length_field_schema();
        assert!(!record.almost_equal(&foreign.record()));
    }

    #[test]
    fn test_display() {
        let schema = union_schema();
        let record = schema
            .build([("cid", Value::UInt(0x0040)), ("l2c_data", Value::from(&[0x01u8]))])
            .unwrap();
        let text = record.to_string();
        assert!(text.starts_with("s_with_union_field (len=7):\n"));
        assert!(text.contains("  cid: 0x0040(64)\n"));
        assert!(text.contains("  l2c_data: b'01'\n"));
    }

    fn mixed_schema() -> Schema {
        Schema::compile(
            "mixed",
            vec![
                FieldDef::new("kind", FieldType::Int(IntType::U8)),
                FieldDef::new("flags", FieldType::Bits(3)),
                FieldDef::new("seq", FieldType::Bits(5)),
                FieldDef::new("payload_len", FieldType::Int(IntType::U16_BE)).length_of("payload"),
                FieldDef::new("payload", FieldType::Bytes).length_from("payload_len"),
                FieldDef::new("count", FieldType::Int(IntType::U8)).length_of("words"),
                FieldDef::new("words", FieldType::Array(IntType::U16)).length_from("count"),
                FieldDef::new("name_len", FieldType::Int(IntType::U8)).length_of("name"),
                FieldDef::new("name", FieldType::Text).length_from("name_len"),
            ],
        )
        .unwrap()
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            kind in any::<u8>(),
            flags in 0u8..8,
            seq in 0u8..32,
            payload in proptest::collection::vec(any::<u8>(), 0..64),
            words in proptest::collection::vec(any::<u16>(), 0..8),
            name in "[a-z]{0,12}",
        ) {
            let schema = mixed_schema();
            let record = schema
                .build([
                    ("kind", Value::from(kind)),
                    ("flags", Value::from(flags)),
                    ("seq", Value::from(seq)),
                    ("payload", Value::from(payload)),
                    ("words", value::array(IntType::U16, words.iter().map(|&w| w as u128))),
                    ("name", Value::from(name)),
                ])
                .unwrap();

            let data = record.pack().unwrap();
            prop_assert_eq!(data.len(), record.length());

            let decoded = schema.unpack(&data).unwrap();
            prop_assert!(decoded.almost_equal(&record));
            prop_assert_eq!(decoded, record);
        }

        #[test]
        fn prop_unpack_never_panics(data in proptest::collection::vec(any::<u8>(), 0..48)) {
            for schema in [mixed_schema(), wide_length_schema()] {
                if let Some(record) = schema.unpack(&data) {
                    prop_assert!(record.try_length().unwrap() <= data.len());
                }
            }
        }

        #[test]
        fn prop_wide_length_prefix_never_panics(
            len in any::<u64>(),
            rest in proptest::collection::vec(any::<u8>(), 0..16),
        ) {
            let schema = wide_length_schema();
            let mut data = len.to_be_bytes().to_vec();
            data.extend(rest);

            match schema.try_unpack(&data) {
                Ok(record) => {
                    prop_assert_eq!(record.get("data").and_then(Value::len), Some(len as usize));
                    prop_assert_eq!(record.length(), len as usize + 9);
                }
                Err(err) => prop_assert!(matches!(
                    err,
                    ReadError::PacketTooShort { .. } | ReadError::LengthOverflow(_)
                ), "unexpected error: {:?}", err),
            }
        }
    }
}
