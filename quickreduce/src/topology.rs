//! Resolved view of every participant's staging buffer.

use crate::error::Result;
use crate::memory::staging::{StagingBuffer, StagingLayout};
use crate::registry::PeerRegistry;
use crate::types::Rank;

/// Rank-indexed staging buffers, self included.
///
/// Built once every handle has been imported; immutable afterwards and shared
/// read-only by the reduction engine.
pub(crate) struct Topology {
    world_size: u32,
    rank: Rank,
    buffers: Vec<StagingBuffer>,
}

impl Topology {
    /// Resolve every rank through `registry`. Fails with the first
    /// `UnresolvedPeer` or mapping error.
    pub fn build(registry: &PeerRegistry, layout: StagingLayout) -> Result<Self> {
        let buffers = (0..registry.world_size())
            .map(|r| StagingBuffer::new(registry.resolve(r)?, layout))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            world_size: registry.world_size(),
            rank: registry.rank(),
            buffers,
        })
    }

    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// This participant's own buffer.
    pub fn local(&self) -> &StagingBuffer {
        &self.buffers[self.rank as usize]
    }

    pub fn buffer(&self, rank: Rank) -> &StagingBuffer {
        &self.buffers[rank as usize]
    }
}
