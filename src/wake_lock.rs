//! Wake lock acquire/release tracking
//!
//! [`WakeLockMonitor`] keeps one trace per held lock, keyed by the caller's
//! lock id. A lock held past `wake_lock_timeout_ms` is reported to the
//! [`WakeLockListener`] once per timeout period until it is released.
//! Released records are kept for snapshots; the oldest half is dropped once
//! the list grows past `overheat_count`, while the running totals stay
//! exact.

use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::scheduler::{Scheduler, TaskToken};
use crate::snapshot::{BeanEntry, DigitDiffer, DigitEntry, ListDiffer, ListEntry, Snapshot, SnapshotMeta};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// One acquire/release pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WakeLockRecord {
    pub tag: String,
    pub flags: i32,
    pub package_name: String,
    pub time_bgn: i64,
    /// Uptime at release, `None` while held
    pub time_end: Option<i64>,
}

impl WakeLockRecord {
    pub fn is_finished(&self) -> bool {
        self.time_end.is_some()
    }

    /// Held time up to release, or up to `now` while still held
    pub fn locking_millis(&self, now: i64) -> i64 {
        self.time_end.unwrap_or(now).saturating_sub(self.time_bgn).max(0)
    }
}

/// Callbacks for long-held locks
pub trait WakeLockListener: Send + Sync {
    /// `record` is still held after `warning_count` timeout periods
    fn on_wake_lock_timeout(&self, _warning_count: u32, _record: &WakeLockRecord) {}
}

/// Listener that ignores every callback
#[derive(Debug, Default)]
pub struct NoopWakeLockListener;

impl WakeLockListener for NoopWakeLockListener {}

/// Wake lock totals at one instant
#[derive(Debug, Clone)]
pub struct WakeLockSnapshot {
    pub meta: SnapshotMeta,
    /// Held time of every lock, released or not
    pub total_time_millis: DigitEntry<i64>,
    /// Acquisitions so far
    pub total_count: DigitEntry<i64>,
    /// Retained released records, oldest first, then held ones
    pub records: ListEntry<BeanEntry<WakeLockRecord>>,
}

impl Snapshot for WakeLockSnapshot {
    fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SnapshotMeta {
        &mut self.meta
    }

    fn compute_delta(bgn: &Self, end: &Self) -> Self {
        WakeLockSnapshot {
            meta: SnapshotMeta::at(end.meta.time),
            total_time_millis: DigitDiffer::global_diff(&bgn.total_time_millis, &end.total_time_millis),
            total_count: DigitDiffer::global_diff(&bgn.total_count, &end.total_count),
            records: ListDiffer::diff_beans(&bgn.records, &end.records),
        }
    }
}

struct WakeLockTrace {
    record: WakeLockRecord,
    token: TaskToken,
    warnings: u32,
}

#[derive(Default)]
struct Ledger {
    working: FnvHashMap<u64, WakeLockTrace>,
    finished: Vec<WakeLockRecord>,
    /// Includes records already dropped from `finished`
    finished_millis: i64,
    total_count: i64,
}

struct WakeLockState {
    clock: Arc<dyn Clock>,
    scheduler: Scheduler,
    timeout: Duration,
    overheat_count: usize,
    listener: Arc<dyn WakeLockListener>,
    ledger: Mutex<Ledger>,
}

impl WakeLockState {
    fn ledger(&self) -> MutexGuard<'_, Ledger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn watch(self: &Arc<Self>, id: u64, token: TaskToken) {
        let state: Weak<Self> = Arc::downgrade(self);
        let job = move || {
            if let Some(state) = state.upgrade() {
                state.on_timeout(id, token);
            }
        };
        if let Err(e) = self.scheduler.post_delayed(token, self.timeout, job) {
            tracing::warn!("wake lock {} not watched: {}", id, e);
        }
    }

    fn on_timeout(self: &Arc<Self>, id: u64, token: TaskToken) {
        let fired = {
            let mut ledger = self.ledger();
            match ledger.working.get_mut(&id) {
                Some(trace) if trace.token == token => {
                    trace.warnings += 1;
                    Some((trace.warnings, trace.record.clone()))
                }
                _ => None,
            }
        };
        let Some((warnings, record)) = fired else {
            return;
        };

        tracing::warn!(
            "wake lock {} held for {}ms (warning {})",
            record.tag,
            record.locking_millis(self.clock.uptime_millis()),
            warnings
        );
        self.listener.on_wake_lock_timeout(warnings, &record);
        self.watch(id, token);
    }
}

/// Tracks held wake locks and reports the ones held too long
///
/// # Example
///
/// ```no_run
/// use jiffies_ledger::clock::SystemClock;
/// use jiffies_ledger::config::MonitorConfig;
/// use jiffies_ledger::scheduler::Scheduler;
/// use jiffies_ledger::wake_lock::{NoopWakeLockListener, WakeLockMonitor};
/// use std::sync::Arc;
///
/// let monitor = WakeLockMonitor::new(
///     &MonitorConfig::default(),
///     Arc::new(SystemClock::new()),
///     Scheduler::new("wake-lock"),
///     Arc::new(NoopWakeLockListener),
/// );
/// monitor.on_acquire_wake_lock(1, "sync", 0x1, "com.example");
/// // ...
/// monitor.on_release_wake_lock(1);
/// println!("held {}ms", monitor.current_wake_locks().total_time_millis);
/// ```
#[derive(Clone)]
pub struct WakeLockMonitor {
    inner: Arc<WakeLockState>,
}

impl WakeLockMonitor {
    pub fn new(
        config: &MonitorConfig,
        clock: Arc<dyn Clock>,
        scheduler: Scheduler,
        listener: Arc<dyn WakeLockListener>,
    ) -> Self {
        WakeLockMonitor {
            inner: Arc::new(WakeLockState {
                clock,
                scheduler,
                timeout: Duration::from_millis(config.wake_lock_timeout_ms),
                overheat_count: config.overheat_count,
                listener,
                ledger: Mutex::new(Ledger::default()),
            }),
        }
    }

    /// Lock `id` was acquired; acquiring a held id releases it first
    pub fn on_acquire_wake_lock(&self, id: u64, tag: &str, flags: i32, package_name: &str) {
        let held = self.inner.ledger().working.contains_key(&id);
        if held {
            tracing::debug!("wake lock {} re-acquired while held", id);
            self.on_release_wake_lock(id);
        }

        tracing::info!(
            "acquire wake lock: id={} tag={} flags={:#x} package={}",
            id,
            tag,
            flags,
            package_name
        );
        let token = self.inner.scheduler.new_token();
        let record = WakeLockRecord {
            tag: tag.to_string(),
            flags,
            package_name: package_name.to_string(),
            time_bgn: self.inner.clock.uptime_millis(),
            time_end: None,
        };
        {
            let mut ledger = self.inner.ledger();
            ledger.total_count += 1;
            ledger.working.insert(
                id,
                WakeLockTrace {
                    record,
                    token,
                    warnings: 0,
                },
            );
        }
        self.inner.watch(id, token);
    }

    /// Lock `id` was released; unknown ids are ignored
    pub fn on_release_wake_lock(&self, id: u64) {
        let now = self.inner.clock.uptime_millis();
        let token = {
            let mut ledger = self.inner.ledger();
            match ledger.working.remove(&id) {
                Some(mut trace) => {
                    trace.record.time_end = Some(now);
                    let held = trace.record.locking_millis(now);
                    ledger.finished_millis = ledger.finished_millis.saturating_add(held);
                    ledger.finished.push(trace.record);
                    let len = ledger.finished.len();
                    if len > self.inner.overheat_count {
                        ledger.finished.drain(..len / 2);
                    }
                    Some(trace.token)
                }
                None => None,
            }
        };

        match token {
            Some(token) => {
                if let Err(e) = self.inner.scheduler.remove(token) {
                    tracing::debug!("wake lock {}: {}", id, e);
                }
            }
            None => tracing::debug!("release of untracked wake lock {}", id),
        }
    }

    /// Number of locks acquired and not yet released
    pub fn held_count(&self) -> usize {
        self.inner.ledger().working.len()
    }

    pub fn current_wake_locks(&self) -> WakeLockSnapshot {
        let now = self.inner.clock.uptime_millis();
        let ledger = self.inner.ledger();

        let mut held: Vec<&WakeLockRecord> = ledger.working.values().map(|t| &t.record).collect();
        held.sort_by_key(|r| r.time_bgn);

        let mut total_millis = ledger.finished_millis;
        let mut records = ledger.finished.clone();
        for record in held {
            total_millis = total_millis.saturating_add(record.locking_millis(now));
            records.push(record.clone());
        }

        WakeLockSnapshot {
            meta: SnapshotMeta::at(now),
            total_time_millis: DigitEntry::of(total_millis),
            total_count: DigitEntry::of(ledger.total_count),
            records: ListEntry::of_beans(records),
        }
    }

    /// Stop watching every held lock and forget them
    pub fn turn_off(&self) {
        let tokens: Vec<TaskToken> = self
            .inner
            .ledger()
            .working
            .drain()
            .map(|(_, trace)| trace.token)
            .collect();
        for token in tokens {
            let _ = self.inner.scheduler.remove(token);
        }
        tracing::debug!("wake lock monitor off");
    }
}
