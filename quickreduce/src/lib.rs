//! Quantized allreduce over peer-mapped memory.
//!
//! Participants (one per device, process or thread) export a staging buffer,
//! exchange [`PeerHandle`]s through any launcher channel, and then run
//! [`QuickReduce::allreduce`] with a per-call [`Profile`] that trades precision
//! for bytes moved: fp16, FP8 E4M3, or 8/6/4-bit integer codes with a scale
//! per group of 32 elements.

pub mod codec;
mod collective;
mod comm;
pub mod config;
pub mod device;
pub mod error;
pub mod memory;
pub mod registry;
mod sync;
mod topology;
pub mod types;

pub use comm::QuickReduce;
pub use config::QuickReduceConfig;
pub use device::{DeviceAdapter, ShmAdapter};
pub use error::{QuickReduceError, Result};
pub use memory::{PeerHandle, SharedRegion};
pub use registry::PeerRegistry;
pub use types::{Profile, Rank};
