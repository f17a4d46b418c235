//! Bitfield group aggregation and bit manipulation helpers.
//!
//! A bitfield group is packed least-significant field first into a
//! little-endian aggregate: the first field occupies the low bits of the
//! first byte.

/// Largest aggregate a bitfield group may occupy.
pub const MAX_GROUP_BITS: usize = 128;

/// Pending run of sub-byte fields between two flush points.
#[derive(Debug, Default, Clone)]
pub struct BitGroup {
    bits: usize,
    members: Vec<(usize, u8)>,
}

impl BitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the field at `index` with `width` bits. Returns true once the
    /// accumulated width reaches a byte boundary and the group should flush.
    pub fn push(&mut self, index: usize, width: u8) -> bool {
        self.bits += width as usize;
        self.members.push((index, width));
        self.bits % 8 == 0
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn bits(&self) -> usize {
        self.bits
    }

    /// Number of whole bytes the group occupies once flushed.
    pub fn byte_len(&self) -> usize {
        self.bits / 8
    }

    /// Drains the pending members and resets the bit count.
    pub fn take(&mut self) -> Vec<(usize, u8)> {
        self.bits = 0;
        std::mem::take(&mut self.members)
    }
}

/// Packs `(width, value)` pairs, first pair in the lowest bits, into a
/// little-endian aggregate of `sum(width) / 8` bytes.
///
/// Values must already fit their width; extra high bits are masked off.
pub(crate) fn pack_group(parts: &[(u8, u64)]) -> Vec<u8> {
    let mut acc = 0u128;
    let mut shift = 0usize;

    for &(width, value) in parts {
        acc |= ((value as u128) & mask(width as usize)) << shift;
        shift += width as usize;
    }

    acc.to_le_bytes()[..shift / 8].to_vec()
}

/// Extracts one value per entry of `widths` from the little-endian
/// aggregate in `data`. `data` must hold exactly `sum(widths) / 8` bytes.
pub(crate) fn unpack_group(data: &[u8], widths: &[u8]) -> Vec<u64> {
    let mut raw = [0u8; 16];
    let n = data.len().min(raw.len());
    raw[..n].copy_from_slice(&data[..n]);
    let acc = u128::from_le_bytes(raw);

    let mut shift = 0usize;
    let mut values = Vec::with_capacity(widths.len());
    for &width in widths {
        values.push(((acc >> shift) & mask(width as usize)) as u64);
        shift += width as usize;
    }

    values
}

/// Mask covering the low `bits` bits.
pub fn mask(bits: usize) -> u128 {
    if bits >= 128 {
        u128::MAX
    } else {
        (1u128 << bits) - 1
    }
}

/// Sign-extends the low `bits` of `value` to a full `i128`.
pub(crate) fn sign_extend(value: u128, bits: usize) -> i128 {
    let shift = 128 - bits;
    ((value << shift) as i128) >> shift
}
