//! Little-endian bitstream packing for sub-byte integer codes.

/// Pack `bits`-wide codes into `out`, least significant bits first.
///
/// `out` must hold at least `ceil(n * bits / 8)` bytes for `n` codes.
pub(crate) fn pack_codes(codes: impl Iterator<Item = u8>, bits: u32, out: &mut [u8]) {
    let mut acc: u32 = 0;
    let mut filled: u32 = 0;
    let mut idx = 0;
    for code in codes {
        acc |= (code as u32) << filled;
        filled += bits;
        while filled >= 8 {
            out[idx] = acc as u8;
            acc >>= 8;
            filled -= 8;
            idx += 1;
        }
    }
    if filled > 0 {
        out[idx] = acc as u8;
    }
}

/// Unpack `count` codes of `bits` width, calling `sink(index, code)` for each.
pub(crate) fn unpack_codes(bytes: &[u8], bits: u32, count: usize, mut sink: impl FnMut(usize, u8)) {
    let mask = (1u32 << bits) - 1;
    let mut acc: u32 = 0;
    let mut filled: u32 = 0;
    let mut idx = 0;
    for i in 0..count {
        while filled < bits {
            acc |= (bytes[idx] as u32) << filled;
            idx += 1;
            filled += 8;
        }
        sink(i, (acc & mask) as u8);
        acc >>= bits;
        filled -= bits;
    }
}
