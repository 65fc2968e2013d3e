//! Per-group wire formats, one zero-sized type per profile.

use half::f16;

use super::Element;
use super::fp8::{E4M3_MAX, decode_e4m3, encode_e4m3};
use super::pack::{pack_codes, unpack_codes};

/// Elements per group for every reduced profile.
pub const GROUP_SIZE: usize = 32;

/// Bytes of the little-endian `f32` scale that heads every reduced group.
const SCALE_BYTES: usize = 4;

/// A fixed-size group encoding.
///
/// `encode_group` receives exactly `GROUP` values and writes exactly `BYTES`
/// bytes; `decode_group` is its inverse and reports values through `sink`.
pub(crate) trait BlockFormat {
    const GROUP: usize;
    const BYTES: usize;

    fn encode_group<T: Element>(values: &[T], out: &mut [u8]);

    fn decode_group<F: FnMut(usize, f32)>(bytes: &[u8], sink: F);
}

/// Raw fp16.
pub(crate) struct Fp16;

impl BlockFormat for Fp16 {
    const GROUP: usize = 1;
    const BYTES: usize = 2;

    #[inline]
    fn encode_group<T: Element>(values: &[T], out: &mut [u8]) {
        let h = f16::from_f32(values[0].to_f32());
        out.copy_from_slice(&h.to_bits().to_le_bytes());
    }

    #[inline]
    fn decode_group<F: FnMut(usize, f32)>(bytes: &[u8], mut sink: F) {
        let h = f16::from_bits(u16::from_le_bytes([bytes[0], bytes[1]]));
        sink(0, h.to_f32());
    }
}

/// FP8 E4M3 codes, scaled so the group maximum maps to 448.
pub(crate) struct Fp8E4M3;

impl BlockFormat for Fp8E4M3 {
    const GROUP: usize = GROUP_SIZE;
    const BYTES: usize = SCALE_BYTES + GROUP_SIZE;

    fn encode_group<T: Element>(values: &[T], out: &mut [u8]) {
        let scale = group_scale(values, E4M3_MAX);
        let (head, codes) = out.split_at_mut(SCALE_BYTES);
        head.copy_from_slice(&scale.to_le_bytes());
        for (v, code) in values.iter().zip(codes.iter_mut()) {
            *code = encode_e4m3(v.to_f32() / scale);
        }
    }

    fn decode_group<F: FnMut(usize, f32)>(bytes: &[u8], mut sink: F) {
        let scale = read_scale(bytes);
        for (i, &code) in bytes[SCALE_BYTES..Self::BYTES].iter().enumerate() {
            sink(i, decode_e4m3(code) * scale);
        }
    }
}

/// Symmetric `BITS`-wide integer codes in `[-qmax, qmax]`.
pub(crate) struct IntFormat<const BITS: u32>;

impl<const BITS: u32> IntFormat<BITS> {
    const QMAX: i32 = (1 << (BITS - 1)) - 1;
    const BIAS: i32 = 1 << (BITS - 1);
}

impl<const BITS: u32> BlockFormat for IntFormat<BITS> {
    const GROUP: usize = GROUP_SIZE;
    const BYTES: usize = SCALE_BYTES + GROUP_SIZE * BITS as usize / 8;

    fn encode_group<T: Element>(values: &[T], out: &mut [u8]) {
        let qmax = Self::QMAX as f32;
        let scale = group_scale(values, qmax);
        let (head, codes) = out.split_at_mut(SCALE_BYTES);
        head.copy_from_slice(&scale.to_le_bytes());
        let quantized = values.iter().map(|v| {
            let q = (v.to_f32() / scale).round().clamp(-qmax, qmax) as i32;
            (q + Self::BIAS) as u8
        });
        pack_codes(quantized, BITS, codes);
    }

    fn decode_group<F: FnMut(usize, f32)>(bytes: &[u8], mut sink: F) {
        let scale = read_scale(bytes);
        unpack_codes(&bytes[SCALE_BYTES..], BITS, GROUP_SIZE, |i, code| {
            sink(i, (code as i32 - Self::BIAS) as f32 * scale)
        });
    }
}

pub(crate) type Int8 = IntFormat<8>;
pub(crate) type Int6 = IntFormat<6>;
pub(crate) type Int4 = IntFormat<4>;

/// Scale that maps the group's largest magnitude onto `code_max`.
///
/// Falls back to 1.0 for an all-zero (or non-finite) group so decode never
/// divides by zero and zeros stay exactly zero.
fn group_scale<T: Element>(values: &[T], code_max: f32) -> f32 {
    let amax = values
        .iter()
        .fold(0.0f32, |m, v| m.max(v.to_f32().abs()));
    let scale = amax / code_max;
    if scale > 0.0 && scale.is_finite() {
        scale
    } else {
        1.0
    }
}

#[inline]
fn read_scale(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}
