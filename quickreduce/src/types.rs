use crate::error::QuickReduceError;

/// Rank of a participant in a communicator group (0-indexed).
pub type Rank = u32;

/// Quantization profile applied to the values exchanged during one allreduce.
///
/// The discriminants are the public profile ids accepted by
/// [`QuickReduce::allreduce_by_id`](crate::QuickReduce::allreduce_by_id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Profile {
    /// Raw fp16 on the wire. Exact.
    FullPrecision = 1,
    /// FP8 E4M3 codes with a per-group scale.
    Fp8 = 2,
    /// 8-bit signed integer codes with a per-group scale.
    Q8 = 3,
    /// 6-bit signed integer codes with a per-group scale.
    Q6 = 4,
    /// 4-bit signed integer codes with a per-group scale.
    Q4 = 5,
}

impl Profile {
    /// All profiles, in id order.
    pub const ALL: [Profile; 5] = [
        Profile::FullPrecision,
        Profile::Fp8,
        Profile::Q8,
        Profile::Q6,
        Profile::Q4,
    ];

    /// Numeric profile id.
    pub const fn id(self) -> u8 {
        self as u8
    }

    /// Human-readable name.
    pub const fn name(self) -> &'static str {
        match self {
            Profile::FullPrecision => "fp16",
            Profile::Fp8 => "fp8",
            Profile::Q8 => "q8",
            Profile::Q6 => "q6",
            Profile::Q4 => "q4",
        }
    }

    /// True for every profile that loses precision on the wire.
    pub const fn is_lossy(self) -> bool {
        !matches!(self, Profile::FullPrecision)
    }
}

impl TryFrom<u8> for Profile {
    type Error = QuickReduceError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            1 => Ok(Profile::FullPrecision),
            2 => Ok(Profile::Fp8),
            3 => Ok(Profile::Q8),
            4 => Ok(Profile::Q6),
            5 => Ok(Profile::Q4),
            other => Err(QuickReduceError::UnsupportedProfile(other)),
        }
    }
}

impl std::fmt::Display for Profile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
