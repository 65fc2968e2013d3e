//! FP8 E4M3 scalar conversion (1 sign, 4 exponent, 3 mantissa bits, bias 7).
//!
//! The "fn" variant: no infinities, a single NaN pattern per sign
//! (`S.1111.111`), largest finite magnitude 448.

use std::sync::LazyLock;

/// Largest finite E4M3 magnitude.
pub(crate) const E4M3_MAX: f32 = 448.0;

/// Smallest subnormal, 2^-9.
const MIN_SUBNORMAL: f32 = 1.0 / 512.0;

/// Code for +448.
const MAX_FINITE_CODE: u8 = 0x7E;

static DECODE_TABLE: LazyLock<[f32; 256]> = LazyLock::new(|| {
    let mut table = [0.0f32; 256];
    for (code, slot) in table.iter_mut().enumerate() {
        *slot = decode_slow(code as u8);
    }
    table
});

/// Round `x` to the nearest E4M3 code (ties to even), saturating at ±448.
pub(crate) fn encode_e4m3(x: f32) -> u8 {
    let sign = if x.is_sign_negative() { 0x80u8 } else { 0 };
    let a = x.abs();
    if a.is_nan() {
        return sign | 0x7F;
    }
    if a >= E4M3_MAX {
        return sign | MAX_FINITE_CODE;
    }

    let bits = a.to_bits();
    let exp = ((bits >> 23) & 0xFF) as i32 - 127;

    if exp < -6 {
        // Subnormal range: a = m * 2^-9 with m in 0..=8. m == 8 lands on the
        // smallest normal, whose code is also 8.
        let m = (a * 512.0).round_ties_even() as u8;
        return sign | m;
    }

    let mut mant = (bits >> 20) & 0x7;
    let rem = bits & 0xF_FFFF;
    const HALF: u32 = 0x8_0000;
    if rem > HALF || (rem == HALF && mant & 1 == 1) {
        mant += 1;
    }
    let mut e = (exp + 7) as u32;
    if mant == 8 {
        mant = 0;
        e += 1;
    }
    if e > 15 || (e == 15 && mant == 7) {
        return sign | MAX_FINITE_CODE;
    }
    sign | ((e << 3) | mant) as u8
}

/// Decode an E4M3 code.
#[inline]
pub(crate) fn decode_e4m3(code: u8) -> f32 {
    DECODE_TABLE[code as usize]
}

fn decode_slow(code: u8) -> f32 {
    let sign = if code & 0x80 != 0 { -1.0f32 } else { 1.0 };
    let e = ((code >> 3) & 0xF) as i32;
    let m = (code & 0x7) as f32;
    if e == 0xF && code & 0x7 == 0x7 {
        return f32::NAN;
    }
    let mag = if e == 0 {
        m * MIN_SUBNORMAL
    } else {
        (1.0 + m / 8.0) * 2f32.powi(e - 7)
    };
    sign * mag
}
