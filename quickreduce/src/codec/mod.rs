//! Quantization codec for the values exchanged between participants.
//!
//! Every profile encodes a tensor as a concatenation of fixed-size groups, so
//! any run of whole groups can be encoded, shipped, and decoded on its own.
//! That is what lets the reduction engine hand out per-rank slices of one
//! encoded buffer.
//!
//! | profile | group | bytes/group | layout |
//! |---|---|---|---|
//! | `FullPrecision` | 1 | 2 | fp16 LE |
//! | `Fp8` | 32 | 36 | `f32` scale + 32 E4M3 codes |
//! | `Q8` | 32 | 36 | `f32` scale + 32 × 8-bit codes |
//! | `Q6` | 32 | 28 | `f32` scale + 32 × 6-bit codes |
//! | `Q4` | 32 | 20 | `f32` scale + 32 × 4-bit codes |
//!
//! See [`error_bound`] for the per-element reconstruction error of each profile.

mod format;
mod fp8;
mod pack;

pub use format::GROUP_SIZE;

use half::f16;

use crate::error::{QuickReduceError, Result};
use crate::types::Profile;
use format::{BlockFormat, Fp8E4M3, Fp16, Int4, Int6, Int8};

/// Element types the codec reads and writes.
pub trait Element: Copy + Send + Sync + 'static {
    fn to_f32(self) -> f32;
    fn from_f32(v: f32) -> Self;
}

impl Element for f32 {
    #[inline]
    fn to_f32(self) -> f32 {
        self
    }
    #[inline]
    fn from_f32(v: f32) -> Self {
        v
    }
}

impl Element for f16 {
    #[inline]
    fn to_f32(self) -> f32 {
        f16::to_f32(self)
    }
    #[inline]
    fn from_f32(v: f32) -> Self {
        f16::from_f32(v)
    }
}

/// Runs `$body` with `$fmt` bound to the block format of `$profile`.
macro_rules! with_format {
    ($profile:expr, $fmt:ident => $body:expr) => {
        match $profile {
            Profile::FullPrecision => {
                type $fmt = Fp16;
                $body
            }
            Profile::Fp8 => {
                type $fmt = Fp8E4M3;
                $body
            }
            Profile::Q8 => {
                type $fmt = Int8;
                $body
            }
            Profile::Q6 => {
                type $fmt = Int6;
                $body
            }
            Profile::Q4 => {
                type $fmt = Int4;
                $body
            }
        }
    };
}

impl Profile {
    /// Element-count granularity: tensors must be a multiple of this.
    pub const fn group_size(self) -> usize {
        with_format!(self, F => F::GROUP)
    }

    /// Encoded bytes per group.
    pub const fn group_bytes(self) -> usize {
        with_format!(self, F => F::BYTES)
    }
}

/// Fail with `InvalidBlockSize` unless `count` is a whole number of groups.
pub fn check_block_size(profile: Profile, count: usize) -> Result<()> {
    let granularity = profile.group_size();
    if count % granularity != 0 {
        return Err(QuickReduceError::InvalidBlockSize {
            len: count,
            granularity,
            profile,
        });
    }
    Ok(())
}

/// Encoded size of `count` elements.
pub fn encoded_len(profile: Profile, count: usize) -> Result<usize> {
    check_block_size(profile, count)?;
    Ok(count / profile.group_size() * profile.group_bytes())
}

/// Encode `values` into a fresh buffer.
pub fn encode<T: Element>(profile: Profile, values: &[T]) -> Result<Vec<u8>> {
    let mut out = vec![0u8; encoded_len(profile, values.len())?];
    encode_into(profile, values, &mut out)?;
    Ok(out)
}

/// Encode `values` into `out`, which must be exactly `encoded_len` bytes.
pub fn encode_into<T: Element>(profile: Profile, values: &[T], out: &mut [u8]) -> Result<()> {
    let expected = encoded_len(profile, values.len())?;
    if out.len() != expected {
        return Err(QuickReduceError::BufferSizeMismatch {
            expected,
            actual: out.len(),
        });
    }
    with_format!(profile, F => encode_groups::<F, T>(values, out));
    Ok(())
}

/// Decode a whole encoded buffer into `f32` values.
pub fn decode(profile: Profile, bytes: &[u8]) -> Result<Vec<f32>> {
    let count = decoded_count(profile, bytes.len())?;
    let mut out = vec![0.0f32; count];
    with_format!(profile, F => decode_groups::<F>(bytes, |i, v| out[i] = v));
    Ok(out)
}

/// Decode `bytes` into `out`, converting to the output element type.
pub fn decode_into<T: Element>(profile: Profile, bytes: &[u8], out: &mut [T]) -> Result<()> {
    check_decode_target(profile, bytes, out.len())?;
    with_format!(profile, F => decode_groups::<F>(bytes, |i, v| out[i] = T::from_f32(v)));
    Ok(())
}

/// Decode `bytes` and add the values into `acc`.
pub fn decode_accumulate(profile: Profile, bytes: &[u8], acc: &mut [f32]) -> Result<()> {
    check_decode_target(profile, bytes, acc.len())?;
    with_format!(profile, F => decode_groups::<F>(bytes, |i, v| acc[i] += v));
    Ok(())
}

/// Sum two encoded buffers of the same profile and length, re-encoding the
/// result in that profile.
///
/// Partial sums pass through `f32` once per call, so chaining `k` calls costs
/// `k` quantization round trips. The reduction engine instead accumulates
/// every contribution in `f32` and quantizes once.
pub fn reduce_partial(
    profile: Profile,
    accumulator: &[u8],
    contribution: &[u8],
) -> Result<Vec<u8>> {
    if accumulator.len() != contribution.len() {
        return Err(QuickReduceError::BufferSizeMismatch {
            expected: accumulator.len(),
            actual: contribution.len(),
        });
    }
    let mut sum = decode(profile, accumulator)?;
    decode_accumulate(profile, contribution, &mut sum)?;
    encode(profile, &sum)
}

/// Largest reconstruction error `decode(encode(x))` may show for element
/// `value` of a group whose largest magnitude is `group_amax`.
///
/// - `FullPrecision`: zero for fp16-representable values.
/// - `Fp8`: `|value| / 16 + scale / 1024` with `scale = group_amax / 448`.
/// - `Q8` / `Q6` / `Q4`: half a quantization step, `group_amax / (2 * qmax)`.
///
/// The non-zero bounds include a few `f32` ulps of slack for the scale
/// arithmetic.
pub fn error_bound(profile: Profile, group_amax: f32, value: f32) -> f32 {
    let slack = group_amax * f32::EPSILON * 4.0;
    match profile {
        Profile::FullPrecision => 0.0,
        Profile::Fp8 => value.abs() / 16.0 + group_amax / 448.0 / 1024.0 + slack,
        Profile::Q8 => group_amax / 254.0 + slack,
        Profile::Q6 => group_amax / 62.0 + slack,
        Profile::Q4 => group_amax / 14.0 + slack,
    }
}

fn decoded_count(profile: Profile, byte_len: usize) -> Result<usize> {
    let group_bytes = profile.group_bytes();
    if byte_len % group_bytes != 0 {
        return Err(QuickReduceError::BufferSizeMismatch {
            expected: byte_len.next_multiple_of(group_bytes),
            actual: byte_len,
        });
    }
    Ok(byte_len / group_bytes * profile.group_size())
}

fn check_decode_target(profile: Profile, bytes: &[u8], count: usize) -> Result<()> {
    let expected = encoded_len(profile, count)?;
    if bytes.len() != expected {
        return Err(QuickReduceError::BufferSizeMismatch {
            expected,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn encode_groups<F: BlockFormat, T: Element>(values: &[T], out: &mut [u8]) {
    for (group, block) in values
        .chunks_exact(F::GROUP)
        .zip(out.chunks_exact_mut(F::BYTES))
    {
        F::encode_group(group, block);
    }
}

fn decode_groups<F: BlockFormat>(bytes: &[u8], mut sink: impl FnMut(usize, f32)) {
    for (g, block) in bytes.chunks_exact(F::BYTES).enumerate() {
        let base = g * F::GROUP;
        F::decode_group(block, |i, v| sink(base + i, v));
    }
}
