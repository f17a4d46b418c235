//! Schema: validated, ordered field descriptors used to pack and unpack records.

use std::collections::BTreeMap;

use tracing::debug;

use crate::{
    bits::{BitGroup, MAX_GROUP_BITS},
    element::ElementLimits,
    errors::{ReadError, SchemaError, WriteError},
    field::{FieldDef, FieldType, LengthRef},
    record::Record,
    value::Value,
};

/// A compiled schema. Use [Schema::compile] to build one from [FieldDef]s,
/// then [Schema::record] / [Schema::build] to create records and
/// [Schema::unpack] to parse bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    name: String,
    /// Fields in declaration order.
    fields: Vec<FieldDef>,
    index: BTreeMap<String, usize>,
    limits: ElementLimits,
}

impl Schema {
    /// Validates `fields` and builds a schema. Fails on invalid widths, empty
    /// or duplicate names, dangling references, non-bytes union fields,
    /// defaults of the wrong type and bitfield groups that do not close on a
    /// byte boundary.
    pub fn compile(name: impl Into<String>, fields: Vec<FieldDef>) -> Result<Self, SchemaError> {
        let name = name.into();
        let mut index = BTreeMap::new();
        for (i, field) in fields.iter().enumerate() {
            if field.name.is_empty() || index.insert(field.name.clone(), i).is_some() {
                return Err(SchemaError::InvalidFieldName(field.name.clone()));
            }
        }

        let mut fields = fields;
        for field in &mut fields {
            validate_type(&field.ty)?;

            if field.union && field.ty != FieldType::Bytes {
                return Err(SchemaError::InvalidUnion(field.name.clone()));
            }

            let references = field
                .data_field
                .iter()
                .chain([&field.length_field, &field.length_offset].into_iter().flatten().filter_map(
                    |r| match r {
                        LengthRef::Field(name) => Some(name),
                        LengthRef::Literal(_) => None,
                    },
                ));
            for target in references {
                if !index.contains_key(target) || *target == field.name {
                    return Err(SchemaError::UnknownReference {
                        field: field.name.clone(),
                        target: target.clone(),
                    });
                }
            }

            if let Some(default) = &field.default {
                let coerced = default
                    .coerce(&field.ty)
                    .ok_or_else(|| SchemaError::InvalidDefault(field.name.clone()))?;
                field.default = Some(coerced);
            }
        }

        validate_bitfield_groups(&fields)?;

        debug!(schema = %name, fields = fields.len(), "compiled schema");

        Ok(Schema {
            name,
            fields,
            index,
            limits: ElementLimits::default(),
        })
    }

    /// Compiles a schema from its serializable definition.
    #[cfg(feature = "serde")]
    pub fn compile_def(def: crate::serde::SchemaDef) -> Result<Self, SchemaError> {
        let limits = def.element_limits.unwrap_or_default();
        let fields = def.fields.into_iter().map(Into::into).collect();
        Ok(Schema::compile(def.name, fields)?.with_element_limits(limits))
    }

    /// Sets the budget used when decoding element fields.
    pub fn with_element_limits(mut self, limits: ElementLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.index_of(name).map(|i| &self.fields[i])
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn element_limits(&self) -> &ElementLimits {
        &self.limits
    }

    /// A fresh record holding every field's default, with length and union
    /// fields derived.
    pub fn record(&self) -> Record<'_> {
        Record::new(self)
    }

    /// A record populated from `(name, value)` pairs, then derived.
    pub fn build<I, K, V>(&self, values: I) -> Result<Record<'_>, WriteError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut record = Record::new(self);
        for (name, value) in values {
            record.set_raw(name.as_ref(), value.into())?;
        }
        record.refresh();

        Ok(record)
    }

    /// Parses `data` into a record, reporting why it failed.
    pub fn try_unpack(&self, data: &[u8]) -> Result<Record<'_>, ReadError> {
        let mut record = Record::new(self);
        record.unpack_from(data)?;
        Ok(record)
    }

    /// Parses `data` into a record. Any decode failure, including a value
    /// that differs from its field's default, yields `None`.
    pub fn unpack(&self, data: &[u8]) -> Option<Record<'_>> {
        match self.try_unpack(data) {
            Ok(record) => Some(record),
            Err(err) => {
                debug!(schema = %self.name, error = %err, "unpack failed");
                None
            }
        }
    }

    /// True if this schema recognizes `data`, i.e. [Schema::unpack] succeeds.
    pub fn matches(&self, data: &[u8]) -> bool {
        self.unpack(data).is_some()
    }
}

fn validate_type(ty: &FieldType) -> Result<(), SchemaError> {
    match ty {
        FieldType::Int(t) | FieldType::Array(t) => t.validate(),
        FieldType::Bits(n) if !(1..=15).contains(n) => Err(SchemaError::InvalidBitWidth(*n)),
        _ => Ok(()),
    }
}

/// Every run of bitfields must reach a byte boundary before the next
/// non-bitfield field and before the end of the schema.
fn validate_bitfield_groups(fields: &[FieldDef]) -> Result<(), SchemaError> {
    let mut group = BitGroup::new();
    let mut last = "";

    for (i, field) in fields.iter().enumerate() {
        match field.ty {
            FieldType::Bits(n) => {
                let flush = group.push(i, n);
                if group.bits() > MAX_GROUP_BITS {
                    return Err(SchemaError::BitfieldTooWide(field.name.clone()));
                }
                if flush {
                    group.take();
                }
                last = field.name.as_str();
            }
            _ if !group.is_empty() => {
                return Err(SchemaError::UnalignedBitfield(last.to_string()));
            }
            _ => {}
        }
    }

    if group.is_empty() {
        Ok(())
    } else {
        Err(SchemaError::UnalignedBitfield(last.to_string()))
    }
}
