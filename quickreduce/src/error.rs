use crate::types::{Profile, Rank};

pub type Result<T> = std::result::Result<T, QuickReduceError>;

#[derive(Debug, thiserror::Error)]
pub enum QuickReduceError {
    #[error("invalid world size {world_size}: at least one participant is required")]
    InvalidWorldSize { world_size: u32 },

    #[error("invalid rank {rank}: world size is {world_size}")]
    InvalidRank { rank: Rank, world_size: u32 },

    #[error("communicator handles were already set for this context")]
    AlreadyInitialized,

    #[error("handle for rank {rank} was already imported")]
    DuplicateRank { rank: Rank },

    #[error("rank {rank} is outside the communicator (world size {world_size})")]
    UnknownRank { rank: Rank, world_size: u32 },

    #[error("no handle imported for rank {rank}")]
    UnresolvedPeer { rank: Rank },

    #[error("allreduce called before all communicator handles were set")]
    ContextNotReady,

    #[error("expected {expected} communicator handles, got {actual}")]
    IncompleteHandleSet { expected: usize, actual: usize },

    #[error("unsupported quantization profile id {0} (valid ids are 1..=5)")]
    UnsupportedProfile(u8),

    #[error("{len} elements is not a multiple of the {profile} group size {granularity}")]
    InvalidBlockSize {
        len: usize,
        granularity: usize,
        profile: Profile,
    },

    #[error("rank {rank} did not reach stage {stage} within {timeout_ms}ms")]
    PeerTimeout {
        rank: Rank,
        stage: &'static str,
        timeout_ms: u64,
    },

    #[error("handle for rank {rank} rejected: {reason}")]
    HandleMismatch { rank: Rank, reason: String },

    #[error("rank {rank} disagrees on the collective call: {reason}")]
    CollectiveMismatch { rank: Rank, reason: String },

    #[error("tensor of {count} elements exceeds the staging capacity of {capacity} elements")]
    TensorTooLarge { count: usize, capacity: usize },

    #[error("buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSizeMismatch { expected: usize, actual: usize },

    #[error("another allreduce is already running on this context")]
    CallInProgress,

    #[error("context is poisoned by an earlier failed allreduce; re-initialize")]
    ContextPoisoned,

    #[error("handle encode failed: {0}")]
    EncodeFailed(String),

    #[error("handle decode failed: {0}")]
    DecodeFailed(String),

    #[error("device adapter error: {message}")]
    DeviceError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("runtime error: {message}")]
    Runtime {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl QuickReduceError {
    /// Create a `DeviceError` with just a message.
    pub fn device(msg: impl Into<String>) -> Self {
        Self::DeviceError {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a `DeviceError` with a message and a source error.
    pub fn device_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::DeviceError {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a `Runtime` error with a message and a source error.
    pub fn runtime_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Runtime {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True for failures that leave shared buffers in an unknown state.
    pub fn is_poisoning(&self) -> bool {
        matches!(
            self,
            Self::PeerTimeout { .. } | Self::CollectiveMismatch { .. }
        )
    }
}
