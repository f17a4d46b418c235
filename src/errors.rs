//! Error types for schema compilation, packing, unpacking and data elements.

/// Errors produced when compiling [crate::field::FieldDef]s into a [crate::schema::Schema].
///
/// These are programming mistakes in the schema, not bad input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    /// Integer width is not one of 1, 2, 3, 4, 8 or 16 bytes.
    #[error("invalid integer width: {0} bytes")]
    InvalidWidth(usize),
    /// Sub-byte field width is outside 1..=15 bits.
    #[error("invalid bitfield width: {0} bits")]
    InvalidBitWidth(u8),
    /// Field name is empty or declared twice.
    #[error("invalid field name: {0:?}")]
    InvalidFieldName(String),
    /// Metadata names a sibling field that does not exist.
    #[error("field {field} references unknown field {target}")]
    UnknownReference { field: String, target: String },
    /// Default value cannot be converted to the field's type.
    #[error("default of field {0} does not match its type")]
    InvalidDefault(String),
    /// Union fields must hold raw bytes.
    #[error("union field {0} must be of type bytes")]
    InvalidUnion(String),
    /// A bitfield group does not end on a byte boundary.
    #[error("bitfield group ending at {0} is not byte aligned")]
    UnalignedBitfield(String),
    /// A bitfield group does not fit a 128-bit aggregate.
    #[error("bitfield group ending at {0} is wider than 128 bits")]
    BitfieldTooWide(String),
}

/// Errors produced when unpacking bytes into a [crate::record::Record].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReadError {
    /// Input data is shorter than the record's statically resolved length.
    #[error("packet too short: need {needed} bytes, got {available}")]
    PacketTooShort { needed: usize, available: usize },
    /// A field extends past the end of the input.
    #[error("field {0} runs past the end of the input")]
    OutOfBounds(String),
    /// A decoded value differs from the field's declared default.
    #[error("field {0} does not match its default")]
    DefaultMismatch(String),
    /// A field's resolved length does not fit in memory addressing.
    #[error("length of field {0} cannot be represented")]
    LengthOverflow(String),
    /// A text field is not valid UTF-8.
    #[error("field {0} is not valid utf-8")]
    InvalidUtf8(String),
    /// A nested data element failed to decode.
    #[error("data element: {0}")]
    Element(#[from] ElementError),
}

/// Errors produced when packing a [crate::record::Record] into bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WriteError {
    /// Field has no value and no default.
    #[error("field {0} has no value")]
    MissingValue(String),
    /// Value does not fit the declared width.
    #[error("value of field {0} does not fit its width")]
    ValueOutOfRange(String),
    /// Value cannot be converted to the declared type.
    #[error("value of field {0} does not match its type")]
    TypeMismatch(String),
    /// Encoded value length disagrees with the length its metadata resolves to.
    #[error("field {field} encodes to {actual} bytes, expected {expected}")]
    LengthMismatch {
        field: String,
        expected: usize,
        actual: usize,
    },
    /// No field of this name exists in the schema.
    #[error("unknown field {0}")]
    UnknownField(String),
    #[error(transparent)]
    Schema(#[from] SchemaError),
}

/// Errors produced when encoding or decoding a [crate::element::DataElement].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElementError {
    /// Fewer bytes remain than the header or payload requires.
    #[error("truncated data element")]
    Truncated,
    /// Payload size is not valid for the element type.
    #[error("invalid size {0} for data element")]
    InvalidSize(usize),
    /// Size descriptor is not valid for the element type.
    #[error("invalid size descriptor {0}")]
    InvalidDescriptor(u8),
    /// Nested elements do not add up to the declared sequence size.
    #[error("nested elements exceed declared size {0}")]
    SizeMismatch(usize),
    /// Nesting is deeper than [crate::element::ElementLimits::max_depth].
    #[error("data element nesting deeper than {0}")]
    DepthExceeded(usize),
    /// Declared size is larger than [crate::element::ElementLimits::max_size].
    #[error("data element size {0} exceeds limit")]
    TooLarge(usize),
    /// Type id has no known interpretation.
    #[error("unknown data element type {0}")]
    UnknownType(u8),
    /// Payload does not match the element type.
    #[error("payload does not match data element type")]
    InvalidData,
}
