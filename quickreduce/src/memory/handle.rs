//! Serializable peer memory handle.

use crate::error::{QuickReduceError, Result};
use crate::types::Rank;

/// Opaque token naming a region of memory exported by one participant.
///
/// A handle is inert: it only becomes addressable memory through
/// [`PeerRegistry::resolve`](crate::registry::PeerRegistry::resolve), which
/// asks the [`DeviceAdapter`](crate::device::DeviceAdapter) to map it.
///
/// Wire form: rkyv archive of the fields below, produced by [`to_bytes`]
/// and read back by [`from_bytes`]. Any process-to-process channel can
/// carry it.
///
/// [`to_bytes`]: PeerHandle::to_bytes
/// [`from_bytes`]: PeerHandle::from_bytes
#[derive(rkyv::Archive, rkyv::Serialize, rkyv::Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PeerHandle {
    owner: Rank,
    len: u64,
    nonce: u64,
    locator: String,
}

impl PeerHandle {
    /// Build a handle. Intended for [`DeviceAdapter`](crate::device::DeviceAdapter)
    /// implementations; `locator` is whatever the adapter needs to find the
    /// region again (a path, an IPC blob in hex, ...), and `nonce` must be
    /// unique per allocation so a stale handle cannot alias a newer region.
    pub fn new(owner: Rank, len: u64, nonce: u64, locator: impl Into<String>) -> Self {
        Self {
            owner,
            len,
            nonce,
            locator: locator.into(),
        }
    }

    /// Rank that exported the region.
    pub fn owner(&self) -> Rank {
        self.owner
    }

    /// Region size in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    /// True if the region is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Allocation nonce.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Adapter-specific locator.
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Serialize for transport to other participants.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| QuickReduceError::EncodeFailed(e.to_string()))
    }

    /// Deserialize a handle produced by [`to_bytes`](PeerHandle::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        // rkyv validates alignment; transport buffers make no promises.
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<PeerHandle, rkyv::rancor::Error>(&aligned)
            .map_err(|e| QuickReduceError::DecodeFailed(e.to_string()))
    }
}

impl std::fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "PeerHandle(rank {}, {}B, {:016x})",
            self.owner, self.len, self.nonce
        )
    }
}
