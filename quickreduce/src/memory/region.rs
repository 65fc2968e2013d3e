//! A mapped region of memory that other participants may also have mapped.
//!
//! This is the only place that turns raw addresses into references. Everything
//! above it (staging layout, reduction engine) works in offsets and slices.

use std::any::Any;
use std::ptr::NonNull;
use std::sync::atomic::AtomicU64;

use memmap2::MmapMut;

/// Byte region shared between participants.
///
/// Other processes (or other contexts in this process) may read and write the
/// same bytes concurrently. Access is therefore split in two:
///
/// - [`atomic_u64`](Self::atomic_u64) is always safe and is how control words
///   are read and written.
/// - [`bytes`](Self::bytes) / [`bytes_mut`](Self::bytes_mut) are `unsafe`: the
///   caller must hold the protocol-level right to the range (observed the
///   owning flag with acquire, or owns the range for the current call).
pub struct SharedRegion {
    ptr: NonNull<u8>,
    len: usize,
    /// Keeps the mapping alive. Dropped after the last reference goes away.
    _backing: Box<dyn Any + Send + Sync>,
}

// SAFETY: the region is plain bytes behind a mapping owned by `_backing`.
// Concurrent access goes through atomics or through the unsafe slice
// accessors whose callers uphold the exclusivity contract.
unsafe impl Send for SharedRegion {}
unsafe impl Sync for SharedRegion {}

impl SharedRegion {
    /// Wrap a writable mapping, exposing `map[offset..]`.
    ///
    /// Panics if `offset` exceeds the mapping or is not 8-byte aligned.
    pub fn from_mmap(mut map: MmapMut, offset: usize) -> Self {
        assert!(offset <= map.len(), "offset {offset} past mapping end");
        assert_eq!(offset % 8, 0, "region offset must be 8-byte aligned");
        let len = map.len() - offset;
        // SAFETY: offset is in bounds; the mapping is non-null while `map` lives.
        let ptr = unsafe { NonNull::new_unchecked(map.as_mut_ptr().add(offset)) };
        Self {
            ptr,
            len,
            _backing: Box::new(map),
        }
    }

    /// Wrap memory owned by `backing`.
    ///
    /// # Safety
    /// `ptr` must be valid for reads and writes of `len` bytes, 8-byte
    /// aligned, and stay valid for as long as `backing` is alive.
    pub unsafe fn from_raw_parts(
        ptr: NonNull<u8>,
        len: usize,
        backing: impl Any + Send + Sync,
    ) -> Self {
        Self {
            ptr,
            len,
            _backing: Box::new(backing),
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Base address, for identity comparisons.
    pub fn as_ptr(&self) -> *const u8 {
        self.ptr.as_ptr()
    }

    /// Control word at `offset`.
    ///
    /// Panics if the word is out of bounds or misaligned.
    pub fn atomic_u64(&self, offset: usize) -> &AtomicU64 {
        self.check_range(offset, 8);
        assert_eq!(offset % 8, 0, "atomic offset {offset} is not 8-byte aligned");
        // SAFETY: in bounds, aligned (base is 8-aligned), and all access to
        // this word goes through atomics.
        unsafe { AtomicU64::from_ptr(self.ptr.as_ptr().add(offset).cast::<u64>()) }
    }

    /// Read view of `len` bytes at `offset`.
    ///
    /// # Safety
    /// No one may write the range while the returned slice is alive.
    pub unsafe fn bytes(&self, offset: usize, len: usize) -> &[u8] {
        self.check_range(offset, len);
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr().add(offset), len) }
    }

    /// Write view of `len` bytes at `offset`.
    ///
    /// # Safety
    /// The caller must have exclusive access to the range while the returned
    /// slice is alive: no other reader or writer, in any process.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn bytes_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        self.check_range(offset, len);
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(offset), len) }
    }

    fn check_range(&self, offset: usize, len: usize) {
        let end = offset.checked_add(len);
        assert!(
            end.is_some_and(|end| end <= self.len),
            "range {offset}+{len} outside region of {} bytes",
            self.len
        );
    }
}

impl std::fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRegion")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}
