//! Uptime clocks
//!
//! Every timestamp in the ledger is an *uptime* reading in milliseconds: a
//! monotonic counter that never jumps with wall-clock adjustments. Stamps,
//! snapshots and sampler windows all read time through the [`Clock`] trait
//! so that tests can drive time by hand with [`ManualClock`].

use nix::time::{clock_gettime, ClockId};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::OnceLock;
use std::time::Instant;

/// Source of monotonic uptime in milliseconds
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary fixed origin (boot for [`SystemClock`])
    fn uptime_millis(&self) -> i64;
}

/// Uptime since boot, read from `CLOCK_MONOTONIC`
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        SystemClock
    }
}

impl Clock for SystemClock {
    fn uptime_millis(&self) -> i64 {
        match clock_gettime(ClockId::CLOCK_MONOTONIC) {
            #[allow(clippy::unnecessary_cast)]
            Ok(ts) => ts.tv_sec() as i64 * 1000 + ts.tv_nsec() as i64 / 1_000_000,
            Err(e) => {
                tracing::warn!("CLOCK_MONOTONIC unavailable, falling back to process clock: {}", e);
                fallback_uptime_millis()
            }
        }
    }
}

fn fallback_uptime_millis() -> i64 {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    // +1 keeps the reading strictly positive, callers treat 0 as "unset"
    ORIGIN.get_or_init(Instant::now).elapsed().as_millis() as i64 + 1
}

/// Hand-driven clock for deterministic tests and offline replay
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        ManualClock {
            now: AtomicI64::new(start_millis),
        }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn uptime_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}
