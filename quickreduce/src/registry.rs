//! Per-participant record of exported and imported peer memory.

use std::sync::{Arc, OnceLock};

use crate::device::DeviceAdapter;
use crate::error::{QuickReduceError, Result};
use crate::memory::{PeerHandle, SharedRegion};
use crate::types::Rank;

struct Slot {
    handle: PeerHandle,
    mapping: OnceLock<Arc<SharedRegion>>,
}

/// Turns [`PeerHandle`]s into mapped memory.
///
/// A handle is only a name. The registry is the single place where a handle
/// becomes a [`SharedRegion`], so aliasing of peer memory is confined to what
/// [`resolve`](Self::resolve) hands out.
pub struct PeerRegistry {
    world_size: u32,
    rank: Rank,
    adapter: Arc<dyn DeviceAdapter>,
    exported: Option<(Arc<SharedRegion>, PeerHandle)>,
    slots: Vec<Option<Slot>>,
}

impl PeerRegistry {
    pub fn new(world_size: u32, rank: Rank, adapter: Arc<dyn DeviceAdapter>) -> Self {
        Self {
            world_size,
            rank,
            adapter,
            exported: None,
            slots: (0..world_size).map(|_| None).collect(),
        }
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Allocate this participant's region of `len` bytes and return its handle.
    ///
    /// Idempotent: later calls return the handle of the first export and
    /// ignore `len`.
    pub fn export_local_buffer(&mut self, len: usize) -> Result<PeerHandle> {
        if let Some((_, handle)) = &self.exported {
            return Ok(handle.clone());
        }
        let (region, handle) = self.adapter.allocate_exportable(self.rank, len)?;
        tracing::debug!(
            rank = self.rank,
            adapter = self.adapter.name(),
            bytes = len,
            "exported local buffer"
        );
        self.exported = Some((Arc::new(region), handle.clone()));
        Ok(handle)
    }

    /// Handle of the exported region, if any.
    pub fn exported_handle(&self) -> Option<&PeerHandle> {
        self.exported.as_ref().map(|(_, h)| h)
    }

    /// Record `handle` as the region of `rank`. Does not map it yet.
    pub fn import_peer_handle(&mut self, rank: Rank, handle: PeerHandle) -> Result<()> {
        if rank >= self.world_size {
            return Err(QuickReduceError::UnknownRank {
                rank,
                world_size: self.world_size,
            });
        }
        if self.slots[rank as usize].is_some() {
            return Err(QuickReduceError::DuplicateRank { rank });
        }
        if handle.owner() != rank {
            return Err(QuickReduceError::HandleMismatch {
                rank,
                reason: format!("handle belongs to rank {}", handle.owner()),
            });
        }
        if let Some((_, own)) = &self.exported {
            if rank == self.rank && handle != *own {
                return Err(QuickReduceError::HandleMismatch {
                    rank,
                    reason: "not the handle this participant exported".into(),
                });
            }
            if handle.len() != own.len() {
                return Err(QuickReduceError::HandleMismatch {
                    rank,
                    reason: format!(
                        "region is {} bytes but the local one is {} (max_elements differs?)",
                        handle.len(),
                        own.len()
                    ),
                });
            }
        }

        tracing::debug!(rank = self.rank, peer = rank, %handle, "imported peer handle");
        self.slots[rank as usize] = Some(Slot {
            handle,
            mapping: OnceLock::new(),
        });
        Ok(())
    }

    /// True once every rank has an imported handle.
    pub fn is_complete(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Mapped region for `rank`, mapping it on first use.
    ///
    /// Repeated calls return the same mapping. The own rank resolves to the
    /// exported region itself.
    pub fn resolve(&self, rank: Rank) -> Result<Arc<SharedRegion>> {
        if rank >= self.world_size {
            return Err(QuickReduceError::UnknownRank {
                rank,
                world_size: self.world_size,
            });
        }
        let slot = self.slots[rank as usize]
            .as_ref()
            .ok_or(QuickReduceError::UnresolvedPeer { rank })?;
        if let Some(region) = slot.mapping.get() {
            return Ok(Arc::clone(region));
        }

        let region = match &self.exported {
            Some((local, _)) if rank == self.rank => Arc::clone(local),
            _ => Arc::new(self.adapter.open_exported(&slot.handle)?),
        };
        // A racing resolve may have won; keep whichever mapping landed first.
        Ok(Arc::clone(slot.mapping.get_or_init(|| region)))
    }
}
