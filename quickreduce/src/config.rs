//! Runtime-configurable tuning parameters for quickreduce.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `QUICKREDUCE_`) or by constructing a custom `QuickReduceConfig`.

use std::time::Duration;

/// Tuning parameters for staging buffers and peer synchronization.
#[derive(Debug, Clone)]
pub struct QuickReduceConfig {
    /// Largest tensor (in elements) a single allreduce may carry. Staging
    /// buffers are sized from this once, at init. Every participant of a
    /// collective must use the same value.
    pub max_elements: usize,

    /// How long a participant waits on any single peer flag before failing
    /// with `PeerTimeout`.
    pub peer_timeout: Duration,

    /// Busy-spin iterations before a waiting participant starts yielding.
    pub spin_iters: u32,

    /// Yield iterations (after spinning) before falling back to short sleeps.
    pub yield_iters: u32,
}

impl Default for QuickReduceConfig {
    fn default() -> Self {
        Self {
            max_elements: 8 * 1024 * 1024, // 16 MiB of fp16
            peer_timeout: Duration::from_secs(30),
            spin_iters: 1000,
            yield_iters: 4000,
        }
    }
}

impl QuickReduceConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `QUICKREDUCE_MAX_ELEMENTS`
    /// - `QUICKREDUCE_PEER_TIMEOUT_MS`
    /// - `QUICKREDUCE_SPIN_ITERS`
    /// - `QUICKREDUCE_YIELD_ITERS`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("QUICKREDUCE_MAX_ELEMENTS") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.max_elements = n;
            }
        }
        if let Ok(v) = std::env::var("QUICKREDUCE_PEER_TIMEOUT_MS") {
            if let Ok(ms) = v.parse::<u64>() {
                cfg.peer_timeout = Duration::from_millis(ms);
            }
        }
        if let Ok(v) = std::env::var("QUICKREDUCE_SPIN_ITERS") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.spin_iters = n;
            }
        }
        if let Ok(v) = std::env::var("QUICKREDUCE_YIELD_ITERS") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.yield_iters = n;
            }
        }

        cfg
    }

    /// Builder-style override of `max_elements`.
    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements;
        self
    }

    /// Builder-style override of `peer_timeout`.
    pub fn with_peer_timeout(mut self, timeout: Duration) -> Self {
        self.peer_timeout = timeout;
        self
    }
}
