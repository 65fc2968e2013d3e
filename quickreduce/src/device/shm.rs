//! Host shared-memory adapter backed by memory-mapped files.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use memmap2::{MmapMut, MmapOptions};

use crate::device::DeviceAdapter;
use crate::error::{QuickReduceError, Result};
use crate::memory::{PeerHandle, SharedRegion};
use crate::types::Rank;

/// Header written in front of every exported region.
const PREAMBLE: usize = 64;
const MAGIC: u64 = u64::from_le_bytes(*b"QRSHM\0\x01\0");

/// Distinguishes files created by the same process.
static FILE_SEQ: AtomicU64 = AtomicU64::new(0);

/// [`DeviceAdapter`] over memory-mapped files in a shared directory.
///
/// Each exported region is one file `quickreduce-{pid}-{seq}-r{rank}` holding
/// a 64-byte preamble (magic, nonce, length) followed by the region. The
/// exporting side unlinks the file when its region is dropped; peers that
/// already mapped it keep a valid mapping.
#[derive(Debug, Clone)]
pub struct ShmAdapter {
    dir: PathBuf,
}

impl ShmAdapter {
    /// Use `/dev/shm` when it exists, the system temp dir otherwise.
    pub fn new() -> Self {
        let shm = Path::new("/dev/shm");
        let dir = if shm.is_dir() {
            shm.to_path_buf()
        } else {
            std::env::temp_dir()
        };
        Self { dir }
    }

    /// Place region files in `dir`.
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Honour `QUICKREDUCE_SHM_DIR`, falling back to [`ShmAdapter::new`].
    pub fn from_env() -> Self {
        match std::env::var_os("QUICKREDUCE_SHM_DIR") {
            Some(dir) if !dir.is_empty() => Self::with_dir(dir),
            _ => Self::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_path(&self, owner: Rank) -> (PathBuf, u64) {
        let seq = FILE_SEQ.fetch_add(1, Ordering::Relaxed);
        let pid = std::process::id();
        let path = self
            .dir
            .join(format!("quickreduce-{pid}-{seq}-r{owner}"));
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let nonce = nanos.wrapping_mul(0x9E37_79B9_7F4A_7C15) ^ ((pid as u64) << 32) ^ seq;
        (path, nonce)
    }
}

impl Default for ShmAdapter {
    fn default() -> Self {
        Self::new()
    }
}

/// Owner-side mapping; unlinks the file on drop.
struct OwnedFile {
    map: MmapMut,
    path: PathBuf,
}

impl Drop for OwnedFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::debug!(path = %self.path.display(), error = %e, "shm file already gone");
        }
    }
}

impl DeviceAdapter for ShmAdapter {
    fn allocate_exportable(&self, owner: Rank, len: usize) -> Result<(SharedRegion, PeerHandle)> {
        let (path, nonce) = self.next_path(owner);
        let total = PREAMBLE + len;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| {
                QuickReduceError::device_with_source(format!("create {}", path.display()), e)
            })?;
        file.set_len(total as u64)?;

        // SAFETY: the file was just created by us with `total` bytes.
        let mut map = unsafe { MmapOptions::new().len(total).map_mut(&file)? };
        map[0..8].copy_from_slice(&MAGIC.to_le_bytes());
        map[8..16].copy_from_slice(&nonce.to_le_bytes());
        map[16..24].copy_from_slice(&(len as u64).to_le_bytes());

        // SAFETY: PREAMBLE is within the mapping and page + 64 keeps 8-byte
        // alignment; the pointer stays valid while `OwnedFile` holds `map`.
        let ptr = unsafe { NonNull::new_unchecked(map.as_mut_ptr().add(PREAMBLE)) };
        let handle = PeerHandle::new(owner, len as u64, nonce, path.to_string_lossy());
        let region = unsafe { SharedRegion::from_raw_parts(ptr, len, OwnedFile { map, path }) };

        tracing::debug!(rank = owner, bytes = len, handle = %handle, "exported shm region");
        Ok((region, handle))
    }

    fn open_exported(&self, handle: &PeerHandle) -> Result<SharedRegion> {
        let rank = handle.owner();
        let mismatch = |reason: String| QuickReduceError::HandleMismatch { rank, reason };

        let path = PathBuf::from(handle.locator());
        let file = File::options()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| mismatch(format!("cannot open {}: {e}", path.display())))?;

        let total = usize::try_from(handle.len())
            .ok()
            .and_then(|n| n.checked_add(PREAMBLE))
            .ok_or_else(|| mismatch(format!("handle length {} is not addressable", handle.len())))?;
        let file_len = file.metadata()?.len();
        if file_len < total as u64 {
            return Err(mismatch(format!(
                "{} holds {file_len} bytes, handle needs {total}",
                path.display()
            )));
        }

        // SAFETY: the file is at least `total` bytes long.
        let map = unsafe { MmapOptions::new().len(total).map_mut(&file)? };
        let magic = u64::from_le_bytes(map[0..8].try_into().unwrap_or_default());
        let nonce = u64::from_le_bytes(map[8..16].try_into().unwrap_or_default());
        if magic != MAGIC {
            return Err(mismatch(format!("{} is not a quickreduce region", path.display())));
        }
        if nonce != handle.nonce() {
            return Err(mismatch(format!(
                "nonce {nonce:016x} does not match handle {:016x}",
                handle.nonce()
            )));
        }

        tracing::debug!(rank, bytes = handle.len(), "mapped peer shm region");
        Ok(SharedRegion::from_mmap(map, PREAMBLE))
    }

    fn name(&self) -> &'static str {
        "shm"
    }
}
