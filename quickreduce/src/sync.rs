//! Bounded busy-waiting on peer flags.
//!
//! Every wait in the collective goes through [`SpinWait::wait_for`], which is
//! where the acquire side of the flag protocol and the timeout live.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::QuickReduceConfig;
use crate::error::{QuickReduceError, Result};
use crate::types::Rank;

const SLEEP: Duration = Duration::from_micros(50);

/// Which flag a participant is waiting on, for error reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Stage {
    /// A peer's encoded input.
    Input,
    /// A peer's reduced slice.
    Slice,
    /// A peer's end-of-call acknowledgement.
    Consumed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Input => "input_ready",
            Stage::Slice => "slice_ready",
            Stage::Consumed => "consumed",
        }
    }
}

/// Tiered backoff: spin, then yield, then short sleeps, until a deadline.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SpinWait {
    timeout: Duration,
    spin_iters: u32,
    yield_iters: u32,
}

impl SpinWait {
    pub fn new(timeout: Duration, spin_iters: u32, yield_iters: u32) -> Self {
        Self {
            timeout,
            spin_iters,
            yield_iters,
        }
    }

    pub fn from_config(config: &QuickReduceConfig) -> Self {
        Self::new(config.peer_timeout, config.spin_iters, config.yield_iters)
    }

    /// Wait until `flag >= target`, loading with `Acquire` so everything the
    /// peer wrote before its `Release` store is visible on return.
    pub fn wait_for(&self, flag: &AtomicU64, target: u64, peer: Rank, stage: Stage) -> Result<()> {
        if flag.load(Ordering::Acquire) >= target {
            return Ok(());
        }
        let start = Instant::now();
        let mut backoff = Backoff::default();
        loop {
            if flag.load(Ordering::Acquire) >= target {
                return Ok(());
            }
            backoff.snooze(self.spin_iters, self.yield_iters);

            if backoff.clock_due() && start.elapsed() > self.timeout {
                if flag.load(Ordering::Acquire) >= target {
                    return Ok(());
                }
                tracing::warn!(
                    peer,
                    stage = stage.as_str(),
                    target,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "peer flag wait timed out"
                );
                return Err(QuickReduceError::PeerTimeout {
                    rank: peer,
                    stage: stage.as_str(),
                    timeout_ms: self.timeout.as_millis() as u64,
                });
            }
        }
    }
}

/// Iteration state of one wait.
///
/// `iter` picks the tier and saturates once the sleep tier is reached;
/// `polls` wraps so the clock keeps being read however long the wait runs.
#[derive(Debug, Default)]
struct Backoff {
    iter: u32,
    polls: u32,
}

impl Backoff {
    fn snooze(&mut self, spin_iters: u32, yield_iters: u32) {
        if self.iter < spin_iters {
            std::hint::spin_loop();
        } else if self.iter < spin_iters.saturating_add(yield_iters) {
            std::thread::yield_now();
        } else {
            std::thread::sleep(SLEEP);
        }
        self.iter = self.iter.saturating_add(1);
        self.polls = self.polls.wrapping_add(1);
    }

    /// Clock is read every 64 polls.
    fn clock_due(&self) -> bool {
        self.polls % 64 == 0
    }
}

/// Raise `flag` to `value`, publishing every prior write to peers.
#[inline]
pub(crate) fn raise(flag: &AtomicU64, value: u64) {
    flag.store(value, Ordering::Release);
}
