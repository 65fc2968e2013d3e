//! Per-participant communicator context.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use half::f16;

use crate::codec;
use crate::collective::two_shot_allreduce;
use crate::config::QuickReduceConfig;
use crate::device::{DeviceAdapter, ShmAdapter};
use crate::error::{QuickReduceError, Result};
use crate::memory::PeerHandle;
use crate::memory::staging::StagingLayout;
use crate::registry::PeerRegistry;
use crate::sync::SpinWait;
use crate::topology::Topology;
use crate::types::{Profile, Rank};

/// One participant of a quantized allreduce collective.
///
/// Lifecycle:
/// 1. [`init`](Self::init) (or [`init_with`](Self::init_with)) allocates and
///    exports this participant's staging buffer.
/// 2. The launcher gathers every participant's
///    [`get_comm_handle`](Self::get_comm_handle), ships them around as bytes,
///    and hands the full rank-ordered set to
///    [`set_comm_handles`](Self::set_comm_handles) on every participant.
/// 3. Any number of [`allreduce`](Self::allreduce) calls, issued in the same
///    order with the same shape and profile on every participant.
///
/// One call runs at a time per context. A call that times out or detects a
/// protocol mismatch poisons the context; build a new one to continue.
pub struct QuickReduce {
    world_size: u32,
    rank: Rank,
    config: QuickReduceConfig,
    layout: StagingLayout,
    registry: PeerRegistry,
    handle: PeerHandle,
    topology: Option<Topology>,
    handles_set: bool,
    wait: SpinWait,
    epoch: AtomicU64,
    in_flight: AtomicBool,
    poisoned: AtomicBool,
}

impl QuickReduce {
    /// Create the context for `rank` of `world_size` with the shared-memory
    /// adapter and config from the environment.
    pub fn init(world_size: u32, rank: Rank) -> Result<Self> {
        Self::init_with(
            world_size,
            rank,
            Arc::new(ShmAdapter::from_env()),
            QuickReduceConfig::from_env(),
        )
    }

    /// Create the context with an explicit device adapter and config.
    pub fn init_with(
        world_size: u32,
        rank: Rank,
        adapter: Arc<dyn DeviceAdapter>,
        config: QuickReduceConfig,
    ) -> Result<Self> {
        if world_size < 1 {
            return Err(QuickReduceError::InvalidWorldSize { world_size });
        }
        if rank >= world_size {
            return Err(QuickReduceError::InvalidRank { rank, world_size });
        }

        let layout = StagingLayout::new(world_size, config.max_elements);
        let mut registry = PeerRegistry::new(world_size, rank, adapter);
        let handle = registry.export_local_buffer(layout.total_bytes())?;
        tracing::debug!(
            rank,
            world_size,
            max_elements = config.max_elements,
            staging_bytes = layout.total_bytes(),
            "quickreduce context created"
        );

        Ok(Self {
            world_size,
            rank,
            wait: SpinWait::from_config(&config),
            config,
            layout,
            registry,
            handle,
            topology: None,
            handles_set: false,
            epoch: AtomicU64::new(0),
            in_flight: AtomicBool::new(false),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Bootstrap `world_size` contexts in this process, exchanging handles
    /// through their byte form as a real launcher would.
    pub fn bootstrap_local(
        world_size: u32,
        adapter: Arc<dyn DeviceAdapter>,
        config: QuickReduceConfig,
    ) -> Result<Vec<Self>> {
        if world_size < 1 {
            return Err(QuickReduceError::InvalidWorldSize { world_size });
        }
        let mut comms = (0..world_size)
            .map(|rank| Self::init_with(world_size, rank, Arc::clone(&adapter), config.clone()))
            .collect::<Result<Vec<_>>>()?;

        let wire = comms
            .iter()
            .map(|c| c.get_comm_handle().to_bytes())
            .collect::<Result<Vec<_>>>()?;
        let handles = wire
            .iter()
            .map(|bytes| PeerHandle::from_bytes(bytes))
            .collect::<Result<Vec<_>>>()?;

        for comm in &mut comms {
            comm.set_comm_handles(&handles)?;
        }
        Ok(comms)
    }

    /// This participant's exported handle. Stable for the life of the context.
    pub fn get_comm_handle(&self) -> PeerHandle {
        self.handle.clone()
    }

    /// Import every participant's handle, indexed by rank, and resolve the
    /// topology. Callable once.
    pub fn set_comm_handles(&mut self, handles: &[PeerHandle]) -> Result<()> {
        if self.handles_set {
            return Err(QuickReduceError::AlreadyInitialized);
        }
        if handles.len() != self.world_size as usize {
            return Err(QuickReduceError::IncompleteHandleSet {
                expected: self.world_size as usize,
                actual: handles.len(),
            });
        }
        self.handles_set = true;

        for (rank, handle) in handles.iter().enumerate() {
            self.registry.import_peer_handle(rank as Rank, handle.clone())?;
        }
        let topology = Topology::build(&self.registry, self.layout)?;
        self.topology = Some(topology);

        tracing::info!(
            rank = self.rank,
            world_size = self.world_size,
            "quickreduce topology ready"
        );
        Ok(())
    }

    /// Sum `input` across all participants and return the result.
    pub fn allreduce(&self, profile: Profile, input: &[f16]) -> Result<Vec<f16>> {
        let mut out = input.to_vec();
        self.allreduce_inplace(profile, &mut out)?;
        Ok(out)
    }

    /// Sum `buf` across all participants in place.
    ///
    /// Shape errors (`InvalidBlockSize`, `TensorTooLarge`) and state errors
    /// (`ContextNotReady`, `CallInProgress`, `ContextPoisoned`) are raised
    /// before anything is written to shared memory.
    pub fn allreduce_inplace(&self, profile: Profile, buf: &mut [f16]) -> Result<()> {
        let topology = self
            .topology
            .as_ref()
            .ok_or(QuickReduceError::ContextNotReady)?;
        if self.poisoned.load(Ordering::Acquire) {
            return Err(QuickReduceError::ContextPoisoned);
        }
        codec::check_block_size(profile, buf.len())?;
        if buf.len() > self.layout.max_elements() {
            return Err(QuickReduceError::TensorTooLarge {
                count: buf.len(),
                capacity: self.layout.max_elements(),
            });
        }
        if buf.is_empty() {
            return Ok(());
        }

        let _guard = CallGuard::acquire(&self.in_flight)?;
        let epoch = self.epoch.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!(rank = self.rank, epoch, count = buf.len(), %profile, "allreduce");

        two_shot_allreduce(topology, &self.wait, profile, buf, epoch).inspect_err(|e| {
            if e.is_poisoning() {
                self.poisoned.store(true, Ordering::Release);
                tracing::warn!(rank = self.rank, epoch, error = %e, "context poisoned");
            }
        })
    }

    /// [`allreduce_inplace`](Self::allreduce_inplace) with an integer profile
    /// id (`1..=5`).
    pub fn allreduce_by_id(&self, profile_id: u8, buf: &mut [f16]) -> Result<()> {
        let profile = Profile::try_from(profile_id)?;
        self.allreduce_inplace(profile, buf)
    }

    /// Run the blocking collective on tokio's blocking pool.
    pub async fn allreduce_async(
        self: &Arc<Self>,
        profile: Profile,
        mut data: Vec<f16>,
    ) -> Result<Vec<f16>> {
        let this = Arc::clone(self);
        tokio::task::spawn_blocking(move || -> Result<Vec<f16>> {
            this.allreduce_inplace(profile, &mut data)?;
            Ok(data)
        })
        .await
        .map_err(|e| QuickReduceError::runtime_with_source("allreduce task failed", e))?
    }

    /// This participant's rank (0-indexed).
    pub fn rank(&self) -> Rank {
        self.rank
    }

    /// Number of participants.
    pub fn world_size(&self) -> u32 {
        self.world_size
    }

    /// True once every handle is imported and resolved.
    pub fn is_ready(&self) -> bool {
        self.topology.is_some()
    }

    /// True after a call failed in a way that left shared state unknown.
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::Acquire)
    }

    /// Largest tensor, in elements, a single call accepts.
    pub fn capacity(&self) -> usize {
        self.layout.max_elements()
    }

    pub fn config(&self) -> &QuickReduceConfig {
        &self.config
    }
}

impl std::fmt::Debug for QuickReduce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuickReduce")
            .field("rank", &self.rank)
            .field("world_size", &self.world_size)
            .field("ready", &self.is_ready())
            .field("poisoned", &self.is_poisoned())
            .field("handle", &self.handle)
            .finish()
    }
}

/// Marks a call in flight; cleared on drop.
struct CallGuard<'a>(&'a AtomicBool);

impl<'a> CallGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| QuickReduceError::CallInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
