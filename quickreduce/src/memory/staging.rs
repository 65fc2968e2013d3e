//! Layout of a participant's exported staging buffer.
//!
//! ```text
//! line 0                  control: input_ready | slice_ready | call_count | call_profile
//! line 1 .. 1+world       consumed[p], one cache line per peer
//! stage area              this rank's encoded input (written by the owner only)
//! result area             this rank's re-encoded reduced slice
//! ```
//!
//! Line 0 is written by the owner alone; each peer writes only its own
//! `consumed` line.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::{QuickReduceError, Result};
use crate::memory::SharedRegion;
use crate::types::{Profile, Rank};

const LINE: usize = 64;

const INPUT_READY: usize = 0;
const SLICE_READY: usize = 8;
const CALL_COUNT: usize = 16;
const CALL_PROFILE: usize = 24;

/// Byte offsets of everything inside a staging buffer.
///
/// Depends only on `world_size` and `max_elements`, so every participant that
/// agrees on those two values computes the same layout for every peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StagingLayout {
    world_size: usize,
    max_elements: usize,
    area_bytes: usize,
}

impl StagingLayout {
    pub fn new(world_size: u32, max_elements: usize) -> Self {
        let area_bytes = Profile::ALL
            .iter()
            .map(|p| max_elements.next_multiple_of(p.group_size()) / p.group_size() * p.group_bytes())
            .max()
            .unwrap_or(0)
            .next_multiple_of(LINE);
        Self {
            world_size: world_size as usize,
            max_elements,
            area_bytes,
        }
    }

    pub fn max_elements(&self) -> usize {
        self.max_elements
    }

    pub fn consumed_offset(&self, peer: usize) -> usize {
        debug_assert!(peer < self.world_size);
        LINE * (1 + peer)
    }

    pub fn stage_offset(&self) -> usize {
        LINE * (1 + self.world_size)
    }

    pub fn result_offset(&self) -> usize {
        self.stage_offset() + self.area_bytes
    }

    /// Bytes reserved for each of the stage and result areas.
    pub fn area_bytes(&self) -> usize {
        self.area_bytes
    }

    pub fn total_bytes(&self) -> usize {
        self.result_offset() + self.area_bytes
    }
}

/// One participant's staging buffer, seen from any participant.
///
/// The owner writes the stage and result areas and the control line; peers
/// only read those and only write their own `consumed` slot.
#[derive(Clone)]
pub(crate) struct StagingBuffer {
    region: Arc<SharedRegion>,
    layout: StagingLayout,
}

impl StagingBuffer {
    pub fn new(region: Arc<SharedRegion>, layout: StagingLayout) -> Result<Self> {
        if region.len() < layout.total_bytes() {
            return Err(QuickReduceError::BufferSizeMismatch {
                expected: layout.total_bytes(),
                actual: region.len(),
            });
        }
        Ok(Self { region, layout })
    }

    // ── Control words ───────────────────────────────────────────────

    pub fn input_ready(&self) -> &AtomicU64 {
        self.region.atomic_u64(INPUT_READY)
    }

    pub fn slice_ready(&self) -> &AtomicU64 {
        self.region.atomic_u64(SLICE_READY)
    }

    pub fn consumed(&self, peer: Rank) -> &AtomicU64 {
        self.region
            .atomic_u64(self.layout.consumed_offset(peer as usize))
    }

    /// Record the shape of the current call. Made visible to peers by the
    /// release store of `input_ready` that follows.
    pub fn publish_call(&self, count: usize, profile: Profile) {
        self.region
            .atomic_u64(CALL_COUNT)
            .store(count as u64, Ordering::Relaxed);
        self.region
            .atomic_u64(CALL_PROFILE)
            .store(profile.id() as u64, Ordering::Relaxed);
    }

    /// `(count, profile id)` of the owner's current call. Only meaningful
    /// after `input_ready` was observed with acquire.
    pub fn call_header(&self) -> (u64, u64) {
        (
            self.region.atomic_u64(CALL_COUNT).load(Ordering::Relaxed),
            self.region.atomic_u64(CALL_PROFILE).load(Ordering::Relaxed),
        )
    }

    /// Return every flag in this buffer to the not-ready state.
    pub fn reset_flags(&self, world_size: u32) {
        self.input_ready().store(0, Ordering::Release);
        self.slice_ready().store(0, Ordering::Release);
        for peer in 0..world_size {
            self.consumed(peer).store(0, Ordering::Release);
        }
    }

    // ── Data areas ──────────────────────────────────────────────────

    /// `len` encoded bytes of the stage area starting at `offset`.
    ///
    /// # Safety
    /// The owner must have published `input_ready` for the current call and
    /// the caller must have observed it with acquire.
    pub unsafe fn stage(&self, offset: usize, len: usize) -> &[u8] {
        let base = self.area_range(self.layout.stage_offset(), offset, len);
        unsafe { self.region.bytes(base, len) }
    }

    /// Mutable view of the stage area.
    ///
    /// # Safety
    /// Only the owner may call this, and only between the end-of-call barrier
    /// and raising `input_ready`.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn stage_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        let base = self.area_range(self.layout.stage_offset(), offset, len);
        unsafe { self.region.bytes_mut(base, len) }
    }

    /// `len` bytes of the result area starting at `offset`.
    ///
    /// # Safety
    /// The owner must have published `slice_ready` for the current call and
    /// the caller must have observed it with acquire.
    pub unsafe fn result(&self, offset: usize, len: usize) -> &[u8] {
        let base = self.area_range(self.layout.result_offset(), offset, len);
        unsafe { self.region.bytes(base, len) }
    }

    /// Mutable view of the result area.
    ///
    /// # Safety
    /// Only the owner may call this, and only before raising `slice_ready`.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn result_mut(&self, offset: usize, len: usize) -> &mut [u8] {
        let base = self.area_range(self.layout.result_offset(), offset, len);
        unsafe { self.region.bytes_mut(base, len) }
    }

    fn area_range(&self, area: usize, offset: usize, len: usize) -> usize {
        assert!(
            offset + len <= self.layout.area_bytes(),
            "range {offset}+{len} exceeds staging area of {} bytes",
            self.layout.area_bytes()
        );
        area + offset
    }
}
