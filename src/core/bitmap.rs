//! Bit-array primitives for the block allocation table and sector bitmaps
//!
//! Bits are ordered MSB-first inside each byte, as the classic VHD format
//! lays out both the BAT presence map and per-block sector bitmaps.
//! Reads past the end of the buffer report an unset bit.

/// Test bit `index`
pub fn test(bitmap: &[u8], index: u32) -> bool {
    let byte = (index >> 3) as usize;
    match bitmap.get(byte) {
        Some(&b) => (b << (index & 7)) & 0x80 != 0,
        None => false,
    }
}

/// Set bit `index`; returns false when the bit lies outside the buffer
pub fn set(bitmap: &mut [u8], index: u32) -> bool {
    let byte = (index >> 3) as usize;
    match bitmap.get_mut(byte) {
        Some(b) => {
            *b |= 0x80 >> (index & 7);
            true
        }
        None => false,
    }
}

/// Number of bytes needed to hold `bits` bits
pub fn bytes_for(bits: u32) -> usize {
    (bits as usize + 7) / 8
}

/// Iterate over the indices of set bits, lowest first
pub fn iter_set(bitmap: &[u8]) -> impl Iterator<Item = u32> + '_ {
    bitmap
        .iter()
        .enumerate()
        .filter(|(_, b)| **b != 0)
        .flat_map(|(byte, &b)| {
            (0..8u32)
                .filter(move |bit| (b << bit) & 0x80 != 0)
                .map(move |bit| byte as u32 * 8 + bit)
        })
}
