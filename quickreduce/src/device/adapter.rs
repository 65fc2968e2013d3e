use crate::error::Result;
use crate::memory::{PeerHandle, SharedRegion};
use crate::types::Rank;

/// Bridges quickreduce with memory that peers can map directly.
///
/// quickreduce never moves data through a transport. Every participant
/// exports one staging region and maps every peer's region; the collective
/// then reads and writes those mappings in place.
///
/// - `ShmAdapter` (built-in): host shared memory files, for participants that
///   are threads or processes on one machine.
/// - Accelerator adapters: IPC memory handles of the device runtime
///   (implemented externally). The handle's locator carries the opaque IPC
///   blob; `open_exported` maps it into this process.
///
/// Regions returned by either method must be 8-byte aligned, zero-filled on
/// allocation, and coherent across every participant that maps them.
pub trait DeviceAdapter: Send + Sync {
    /// Allocate `len` bytes that other participants can open, returning the
    /// local mapping and the handle that names it.
    ///
    /// The region lives until the returned [`SharedRegion`] is dropped.
    fn allocate_exportable(&self, owner: Rank, len: usize) -> Result<(SharedRegion, PeerHandle)>;

    /// Map a region another participant exported.
    ///
    /// Must fail with `HandleMismatch` if the handle no longer names the
    /// region it was created for.
    fn open_exported(&self, handle: &PeerHandle) -> Result<SharedRegion>;

    /// Short identifier for logs.
    fn name(&self) -> &'static str {
        "custom"
    }
}
