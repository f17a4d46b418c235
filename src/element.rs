//! Self-describing data elements: a type tag, a size and a payload which may
//! itself be a sequence of nested elements.
//!
//! ## Wire format
//!
//! The first byte holds the type id in its high 5 bits and a size
//! descriptor in its low 3 bits:
//!
//! | descriptor | payload size                          | header bytes |
//! |------------|---------------------------------------|--------------|
//! | 0..=4      | 1, 2, 4, 8 or 16 bytes (0 for `Nil`)  | 1            |
//! | 5          | next byte                             | 2            |
//! | 6          | next 2 bytes, big-endian              | 3            |
//! | 7          | next 4 bytes, big-endian              | 5            |
//!
//! Integers are big-endian. Sequence and alternative payloads are the
//! concatenation of their nested elements, whose lengths must add up to the
//! declared size exactly.

use std::fmt;

use tracing::{debug, warn};

use crate::{bits, errors::ElementError};

/// Inline payload sizes selected by descriptors 0..=4.
const INLINE_SIZES: [usize; 5] = [1, 2, 4, 8, 16];

/// Data element type ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
    Nil = 0,
    UInt = 1,
    SInt = 2,
    Uuid = 3,
    Text = 4,
    Bool = 5,
    Sequence = 6,
    Alternative = 7,
    Url = 8,
}

impl ElementType {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Result<Self, ElementError> {
        Ok(match id {
            0 => ElementType::Nil,
            1 => ElementType::UInt,
            2 => ElementType::SInt,
            3 => ElementType::Uuid,
            4 => ElementType::Text,
            5 => ElementType::Bool,
            6 => ElementType::Sequence,
            7 => ElementType::Alternative,
            8 => ElementType::Url,
            other => return Err(ElementError::UnknownType(other)),
        })
    }

    pub fn is_integer(self) -> bool {
        matches!(self, ElementType::UInt | ElementType::SInt)
    }

    pub fn is_container(self) -> bool {
        matches!(self, ElementType::Sequence | ElementType::Alternative)
    }
}

/// Decoding budget for untrusted input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct ElementLimits {
    /// Deepest nesting accepted; the outermost element is depth 0.
    pub max_depth: usize,
    /// Largest declared payload size accepted, in bytes.
    pub max_size: usize,
}

impl Default for ElementLimits {
    fn default() -> Self {
        ElementLimits {
            max_depth: 32,
            max_size: 1 << 20,
        }
    }
}

/// Payload of a [DataElement], interpreted per [ElementType].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementData {
    Nil,
    UInt(u128),
    SInt(i128),
    /// Opaque payload of UUID, text, bool and URL elements.
    Bytes(Vec<u8>),
    /// Nested elements of sequence and alternative elements.
    Elements(Vec<DataElement>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataElement {
    kind: ElementType,
    descriptor: u8,
    size: usize,
    data: ElementData,
}

impl DataElement {
    /// Builds an element from an explicit type, payload size and payload.
    ///
    /// Integer elements use the inline size descriptors, `Nil` uses
    /// descriptor 0 with no payload, and every other type stores its size
    /// out of line in the smallest of 1, 2 or 4 bytes that fits.
    pub fn new(kind: ElementType, size: usize, data: ElementData) -> Result<Self, ElementError> {
        let descriptor = match (kind, &data) {
            (ElementType::Nil, ElementData::Nil) => {
                if size != 0 {
                    return Err(ElementError::InvalidSize(size));
                }
                0
            }
            (ElementType::UInt, &ElementData::UInt(v)) => {
                let descriptor = inline_descriptor(size)?;
                if v > bits::mask(size * 8) {
                    return Err(ElementError::InvalidData);
                }
                descriptor
            }
            (ElementType::SInt, &ElementData::SInt(v)) => {
                let descriptor = inline_descriptor(size)?;
                if bits::sign_extend(v as u128 & bits::mask(size * 8), size * 8) != v {
                    return Err(ElementError::InvalidData);
                }
                descriptor
            }
            (
                ElementType::Uuid | ElementType::Text | ElementType::Bool | ElementType::Url,
                ElementData::Bytes(b),
            ) => {
                if b.len() != size {
                    return Err(ElementError::InvalidSize(size));
                }
                out_of_line_descriptor(size)?
            }
            (ElementType::Sequence | ElementType::Alternative, ElementData::Elements(items)) => {
                if items.iter().map(DataElement::len).sum::<usize>() != size {
                    return Err(ElementError::SizeMismatch(size));
                }
                out_of_line_descriptor(size)?
            }
            _ => return Err(ElementError::InvalidData),
        };

        Ok(DataElement {
            kind,
            descriptor,
            size,
            data,
        })
    }

    pub fn nil() -> Self {
        DataElement {
            kind: ElementType::Nil,
            descriptor: 0,
            size: 0,
            data: ElementData::Nil,
        }
    }

    /// Unsigned integer of `size` bytes (1, 2, 4, 8 or 16).
    pub fn uint(size: usize, value: u128) -> Result<Self, ElementError> {
        DataElement::new(ElementType::UInt, size, ElementData::UInt(value))
    }

    /// Signed integer of `size` bytes (1, 2, 4, 8 or 16).
    pub fn sint(size: usize, value: i128) -> Result<Self, ElementError> {
        DataElement::new(ElementType::SInt, size, ElementData::SInt(value))
    }

    pub fn uuid(bytes: impl Into<Vec<u8>>) -> Result<Self, ElementError> {
        DataElement::opaque(ElementType::Uuid, bytes.into())
    }

    pub fn text(text: &str) -> Result<Self, ElementError> {
        DataElement::opaque(ElementType::Text, text.as_bytes().to_vec())
    }

    pub fn url(url: &str) -> Result<Self, ElementError> {
        DataElement::opaque(ElementType::Url, url.as_bytes().to_vec())
    }

    pub fn boolean(value: bool) -> Self {
        DataElement {
            kind: ElementType::Bool,
            descriptor: 5,
            size: 1,
            data: ElementData::Bytes(vec![value as u8]),
        }
    }

    pub fn sequence(items: Vec<DataElement>) -> Result<Self, ElementError> {
        DataElement::container(ElementType::Sequence, items)
    }

    pub fn alternative(items: Vec<DataElement>) -> Result<Self, ElementError> {
        DataElement::container(ElementType::Alternative, items)
    }

    fn opaque(kind: ElementType, bytes: Vec<u8>) -> Result<Self, ElementError> {
        DataElement::new(kind, bytes.len(), ElementData::Bytes(bytes))
    }

    fn container(kind: ElementType, items: Vec<DataElement>) -> Result<Self, ElementError> {
        let size = items.iter().map(DataElement::len).sum();
        DataElement::new(kind, size, ElementData::Elements(items))
    }

    pub fn kind(&self) -> ElementType {
        self.kind
    }

    /// Declared payload size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn descriptor(&self) -> u8 {
        self.descriptor
    }

    pub fn data(&self) -> &ElementData {
        &self.data
    }

    /// Nested elements; empty for non-container types.
    pub fn elements(&self) -> &[DataElement] {
        match &self.data {
            ElementData::Elements(items) => items,
            _ => &[],
        }
    }

    /// Encoded length: header bytes actually used plus the declared size.
    pub fn len(&self) -> usize {
        header_len(self.descriptor) + self.size
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        self.encode_into(&mut out);
        out
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        out.push((self.kind.id() << 3) | self.descriptor);

        let size = self.size as u32;
        match self.descriptor {
            5 => out.push(size as u8),
            6 => out.extend_from_slice(&(size as u16).to_be_bytes()),
            7 => out.extend_from_slice(&size.to_be_bytes()),
            _ => {}
        }

        match &self.data {
            ElementData::Nil => {}
            ElementData::UInt(v) => out.extend_from_slice(&v.to_be_bytes()[16 - self.size..]),
            ElementData::SInt(v) => {
                out.extend_from_slice(&(*v as u128).to_be_bytes()[16 - self.size..])
            }
            ElementData::Bytes(b) => out.extend_from_slice(b),
            ElementData::Elements(items) => {
                for item in items {
                    item.encode_into(out);
                }
            }
        }
    }

    /// Decodes one element from the start of `data`, ignoring trailing bytes.
    pub fn decode(data: &[u8]) -> Result<Self, ElementError> {
        DataElement::decode_with_limits(data, &ElementLimits::default())
    }

    pub fn decode_with_limits(data: &[u8], limits: &ElementLimits) -> Result<Self, ElementError> {
        decode_at_depth(data, limits, 0, false)
    }

    /// Best-effort decode for partial or damaged captures.
    ///
    /// Truncated opaque payloads keep the bytes that are present, and a
    /// sequence stops at the first nested element that fails, keeping the
    /// elements decoded so far. The declared size is kept, so [Self::len]
    /// still reports how far the element claims to extend. Returns `None`
    /// only when not even the outermost header can be read.
    pub fn decode_lossy(data: &[u8]) -> Option<Self> {
        DataElement::decode_lossy_with_limits(data, &ElementLimits::default())
    }

    pub fn decode_lossy_with_limits(data: &[u8], limits: &ElementLimits) -> Option<Self> {
        match decode_at_depth(data, limits, 0, true) {
            Ok(element) => Some(element),
            Err(err) => {
                warn!(error = %err, "data element decode failed");
                None
            }
        }
    }

    fn fmt_indented(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        write!(f, "{:indent$}{:?} size={}", "", self.kind, self.size, indent = depth * 2)?;
        match &self.data {
            ElementData::Nil => writeln!(f),
            ElementData::UInt(v) => writeln!(f, " {:#x}", v),
            ElementData::SInt(v) => writeln!(f, " {}", v),
            ElementData::Bytes(b) if matches!(self.kind, ElementType::Text | ElementType::Url) => {
                writeln!(f, " {:?}", String::from_utf8_lossy(b))
            }
            ElementData::Bytes(b) => {
                f.write_str(" ")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                writeln!(f)
            }
            ElementData::Elements(items) => {
                writeln!(f)?;
                for item in items {
                    item.fmt_indented(f, depth + 1)?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for DataElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_indented(f, 0)
    }
}

fn header_len(descriptor: u8) -> usize {
    match descriptor {
        0..=4 => 1,
        5 => 2,
        6 => 3,
        _ => 5,
    }
}

fn inline_descriptor(size: usize) -> Result<u8, ElementError> {
    INLINE_SIZES
        .iter()
        .position(|&s| s == size)
        .map(|i| i as u8)
        .ok_or(ElementError::InvalidSize(size))
}

fn out_of_line_descriptor(size: usize) -> Result<u8, ElementError> {
    if size <= u8::MAX as usize {
        Ok(5)
    } else if size <= u16::MAX as usize {
        Ok(6)
    } else if size <= u32::MAX as usize {
        Ok(7)
    } else {
        Err(ElementError::TooLarge(size))
    }
}

/// Reads the tag byte and size. Returns `(type, descriptor, size, header_len)`.
fn read_header(data: &[u8]) -> Result<(ElementType, u8, usize, usize), ElementError> {
    let tag = *data.first().ok_or(ElementError::Truncated)?;
    let kind = ElementType::from_id(tag >> 3)?;
    let descriptor = tag & 0x07;
    let header = header_len(descriptor);
    let size_bytes = data.get(1..header).ok_or(ElementError::Truncated)?;

    let size = match descriptor {
        0 if kind == ElementType::Nil => 0,
        _ if kind == ElementType::Nil => return Err(ElementError::InvalidDescriptor(descriptor)),
        0..=4 => INLINE_SIZES[descriptor as usize],
        _ => size_bytes.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize),
    };

    if kind.is_container() && descriptor < 5 {
        return Err(ElementError::InvalidDescriptor(descriptor));
    }
    if kind.is_integer() && !INLINE_SIZES.contains(&size) {
        return Err(ElementError::InvalidSize(size));
    }

    Ok((kind, descriptor, size, header))
}

fn decode_at_depth(
    data: &[u8],
    limits: &ElementLimits,
    depth: usize,
    lossy: bool,
) -> Result<DataElement, ElementError> {
    if depth > limits.max_depth {
        return Err(ElementError::DepthExceeded(limits.max_depth));
    }

    let (kind, descriptor, size, header) = read_header(data)?;
    if size > limits.max_size {
        return Err(ElementError::TooLarge(size));
    }

    let end = header + size;
    let payload = match data.get(header..end) {
        Some(payload) => payload,
        None if lossy && !kind.is_integer() => {
            warn!(kind = ?kind, size, available = data.len() - header, "truncated data element");
            &data[header..]
        }
        None => return Err(ElementError::Truncated),
    };

    let data = match kind {
        ElementType::Nil => ElementData::Nil,
        ElementType::UInt => ElementData::UInt(read_be(payload)),
        ElementType::SInt => ElementData::SInt(bits::sign_extend(read_be(payload), size * 8)),
        ElementType::Uuid | ElementType::Text | ElementType::Bool | ElementType::Url => {
            ElementData::Bytes(payload.to_vec())
        }
        ElementType::Sequence | ElementType::Alternative => {
            ElementData::Elements(decode_items(payload, size, limits, depth, lossy)?)
        }
    };

    debug!(kind = ?kind, size, depth, "decoded data element");

    Ok(DataElement {
        kind,
        descriptor,
        size,
        data,
    })
}

/// Decodes nested elements until their lengths add up to `size`.
fn decode_items(
    payload: &[u8],
    size: usize,
    limits: &ElementLimits,
    depth: usize,
    lossy: bool,
) -> Result<Vec<DataElement>, ElementError> {
    let mut items = Vec::new();
    let mut consumed = 0;

    while consumed < size {
        let rest = match payload.get(consumed..) {
            Some(rest) if !rest.is_empty() => rest,
            _ if lossy => {
                warn!(consumed, size, "data element sequence ends early");
                break;
            }
            _ => return Err(ElementError::Truncated),
        };

        let item = match decode_at_depth(rest, limits, depth + 1, lossy) {
            Ok(item) => item,
            Err(err) if lossy => {
                warn!(error = %err, consumed, size, "stopping at malformed nested element");
                break;
            }
            Err(err) => return Err(err),
        };

        consumed += item.len();
        if consumed > size {
            if lossy {
                warn!(consumed, size, "nested elements overrun sequence");
                items.push(item);
                break;
            }
            return Err(ElementError::SizeMismatch(size));
        }

        items.push(item);
    }

    Ok(items)
}

fn read_be(payload: &[u8]) -> u128 {
    payload.iter().fold(0u128, |acc, &b| (acc << 8) | b as u128)
}
