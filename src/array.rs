//! Homogeneous integer array codec.

use std::fmt;

use crate::{bits, errors::SchemaError, int::IntType};

/// An ordered run of same-width, same-endianness unsigned integers.
///
/// Encoded as the concatenation of each element's fixed-width encoding, so
/// the byte length is always `count * width`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntArray {
    element: IntType,
    items: Vec<u128>,
}

impl IntArray {
    pub fn new(element: IntType, items: Vec<u128>) -> Self {
        IntArray { element, items }
    }

    /// Builds an array with one element per byte of `bytes`.
    pub fn from_byte_values(element: IntType, bytes: &[u8]) -> Self {
        IntArray {
            element,
            items: bytes.iter().map(|&b| b as u128).collect(),
        }
    }

    pub fn element(&self) -> IntType {
        self.element
    }

    pub fn items(&self) -> &[u128] {
        &self.items
    }

    /// Number of elements.
    pub fn count(&self) -> usize {
        self.items.len()
    }

    /// Encoded length in bytes.
    pub fn len(&self) -> usize {
        self.items.len() * self.element.width
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// True if every element fits the element width.
    pub fn fits(&self) -> bool {
        let max = bits::mask(self.element.bits());
        self.items.iter().all(|&v| v <= max)
    }

    /// Re-types the array for `element`, keeping the element values.
    /// Returns `None` if a value does not fit the new width.
    pub fn retype(&self, element: IntType) -> Option<Self> {
        let array = IntArray::new(element, self.items.clone());
        array.fits().then_some(array)
    }

    pub fn encode(&self) -> Result<Vec<u8>, SchemaError> {
        let mut out = Vec::with_capacity(self.len());
        for &item in &self.items {
            out.extend(self.element.encode(item)?);
        }

        Ok(out)
    }

    /// Decodes `data` in `width`-byte strides until exhausted. A trailing
    /// partial stride is dropped.
    pub fn decode(element: IntType, data: &[u8]) -> Self {
        let items = if element.width == 0 {
            Vec::new()
        } else {
            data.chunks_exact(element.width)
                .filter_map(|chunk| element.decode(chunk))
                .collect()
        };

        IntArray { element, items }
    }
}

impl fmt::Display for IntArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "array[{}]:", self.items.len())?;

        // 32 bytes per line
        let per_line = (32 / self.element.width.max(1)).max(1);
        for (i, item) in self.items.iter().enumerate() {
            if i % per_line == 0 {
                writeln!(f)?;
            }
            match self.element.width {
                1 => write!(f, "{:02x} ", item)?,
                2 => write!(f, "{:04x} ", item)?,
                4 => write!(f, "{:08x} ", item)?,
                _ => write!(f, "{} ", item)?,
            }
        }

        writeln!(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let array = IntArray::new(IntType::U16, vec![0x0001, 0x0002]);
        assert_eq!(array.len(), 4);
        assert_eq!(array.encode().unwrap(), vec![0x01, 0x00, 0x02, 0x00]);
    }

    #[test]
    fn test_decode_strides() {
        let array = IntArray::decode(IntType::U32, &[1, 0, 0, 0, 2, 0, 0, 0]);
        assert_eq!(array.items(), &[1, 2]);
    }

    #[test]
    fn test_decode_drops_partial_stride() {
        let array = IntArray::decode(IntType::U16, &[1, 0, 2]);
        assert_eq!(array.items(), &[1]);
        assert_eq!(array.count(), 1);
    }

    #[test]
    fn test_equality_requires_same_element_type() {
        let a = IntArray::new(IntType::U8, vec![1, 2]);
        let b = IntArray::new(IntType::U16, vec![1, 2]);
        assert_ne!(a, b);
        assert_eq!(a, IntArray::from_byte_values(IntType::U8, &[1, 2]));
    }

    #[test]
    fn test_retype() {
        let a = IntArray::new(IntType::U16, vec![1, 0x100]);
        assert_eq!(a.retype(IntType::U8), None);
        assert_eq!(
            a.retype(IntType::U32),
            Some(IntArray::new(IntType::U32, vec![1, 0x100]))
        );
    }

    #[test]
    fn test_display_line_breaks() {
        let array = IntArray::new(IntType::U32, (0..9).collect());
        let text = array.to_string();
        assert!(text.starts_with("array[9]:\n00000000 "));
        // 32 / 4 = 8 elements per line
        assert_eq!(text.lines().count(), 3);
    }
}
