//! Periodic sampling of a numeric producer
//!
//! A [`Sampler`] calls its sampling block on the shared work queue every
//! `interval`, folding each value into running first/last/max/min/average
//! statistics until paused or until the block reports
//! [`SamplerError::Cancelled`].

use crate::clock::Clock;
use crate::scheduler::{Scheduler, TaskToken};
use crate::snapshot::Digit;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use thiserror::Error;

/// Default sampling interval (one minute)
pub const DEFAULT_INTERVAL_MILLIS: i64 = 60 * 1000;

/// Outcome of one call to a sampling block
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SamplerError {
    /// Nothing to record this round; sampling continues
    #[error("sample unavailable")]
    Invalid,

    /// Stop sampling for good
    #[error("sampling cancelled")]
    Cancelled,

    #[error("sampling failed: {0}")]
    Failed(String),
}

/// Statistics of a finished sampling run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerResult {
    pub interval: i64,
    pub count: u32,
    pub during_millis: i64,
    pub sample_fst: f64,
    pub sample_lst: f64,
    pub sample_max: f64,
    pub sample_min: f64,
    pub sample_avg: f64,
}

#[derive(Debug)]
struct Stats {
    paused: bool,
    interval: i64,
    count: u32,
    bgn_millis: i64,
    end_millis: i64,
    fst: f64,
    lst: f64,
    max: f64,
    min: f64,
    avg: f64,
}

impl Stats {
    fn record(&mut self, sample: f64) {
        self.count += 1;
        self.lst = sample;
        self.avg = (self.avg * f64::from(self.count - 1) + sample) / f64::from(self.count);
        if self.count == 1 {
            self.fst = sample;
            self.max = sample;
            self.min = sample;
        } else {
            self.max = self.max.max(sample);
            self.min = self.min.min(sample);
        }
    }
}

type SamplingBlock = Box<dyn Fn() -> Result<f64, SamplerError> + Send + Sync>;

struct SamplerState {
    tag: String,
    scheduler: Scheduler,
    token: TaskToken,
    clock: Arc<dyn Clock>,
    block: SamplingBlock,
    stats: Mutex<Stats>,
}

impl SamplerState {
    fn stats(&self) -> MutexGuard<'_, Stats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue the next round; the job only keeps a weak handle so a dropped
    /// sampler stops on its own
    fn schedule(self: &Arc<Self>, interval: i64) {
        let state: Weak<Self> = Arc::downgrade(self);
        let delay = Duration::from_millis(u64::try_from(interval).unwrap_or(0));
        let job = move || {
            if let Some(state) = state.upgrade() {
                state.run();
            }
        };
        if let Err(e) = self.scheduler.post_delayed(self.token, delay, job) {
            tracing::warn!("{}: sampling not scheduled: {}", self.tag, e);
        }
    }

    fn run(self: &Arc<Self>) {
        match (self.block)() {
            Ok(sample) => self.stats().record(sample),
            Err(SamplerError::Invalid) => {
                tracing::debug!("{}: sample skipped", self.tag);
            }
            Err(SamplerError::Cancelled) => {
                tracing::debug!("{}: sampling cancelled", self.tag);
                return;
            }
            Err(e @ SamplerError::Failed(_)) => {
                tracing::warn!("{}: sampling failed: {}", self.tag, e);
            }
        }

        let (paused, interval) = {
            let stats = self.stats();
            (stats.paused, stats.interval)
        };
        if !paused {
            self.schedule(interval);
        }
    }
}

impl Drop for SamplerState {
    fn drop(&mut self) {
        let _ = self.scheduler.remove(self.token);
    }
}

/// Periodic sampler with running statistics
///
/// # Example
///
/// ```no_run
/// use jiffies_ledger::clock::SystemClock;
/// use jiffies_ledger::sampler::Sampler;
/// use jiffies_ledger::scheduler::Scheduler;
/// use std::sync::Arc;
///
/// let sampler = Sampler::new("temperature", Scheduler::new("sampler"), Arc::new(SystemClock::new()), || Ok(36_i32));
/// sampler.set_interval(1_000);
/// sampler.start();
/// // ... later
/// sampler.pause();
/// if let Some(result) = sampler.get_result() {
///     println!("avg = {}", result.sample_avg);
/// }
/// ```
#[derive(Clone)]
pub struct Sampler {
    inner: Arc<SamplerState>,
}

impl Sampler {
    /// # Arguments
    ///
    /// * `tag` - Label used in log lines
    /// * `scheduler` - Work queue the block runs on
    /// * `clock` - Uptime source for the run's begin/end
    /// * `block` - Produces one sample per call
    pub fn new<N, F>(tag: &str, scheduler: Scheduler, clock: Arc<dyn Clock>, block: F) -> Self
    where
        N: Digit,
        F: Fn() -> Result<N, SamplerError> + Send + Sync + 'static,
    {
        let token = scheduler.new_token();
        Sampler {
            inner: Arc::new(SamplerState {
                tag: tag.to_string(),
                scheduler,
                token,
                clock,
                block: Box::new(move || block().map(N::to_f64)),
                stats: Mutex::new(Stats {
                    paused: true,
                    interval: DEFAULT_INTERVAL_MILLIS,
                    count: 0,
                    bgn_millis: 0,
                    end_millis: 0,
                    fst: 0.0,
                    lst: 0.0,
                    max: 0.0,
                    min: 0.0,
                    avg: 0.0,
                }),
            }),
        }
    }

    pub fn tag(&self) -> &str {
        &self.inner.tag
    }

    /// Non-positive intervals are ignored
    pub fn set_interval(&self, interval_millis: i64) {
        if interval_millis > 0 {
            self.inner.stats().interval = interval_millis;
        }
    }

    pub fn interval(&self) -> i64 {
        self.inner.stats().interval
    }

    /// Begin sampling; the first sample is taken one interval from now
    pub fn start(&self) {
        let interval = {
            let mut stats = self.inner.stats();
            stats.paused = false;
            stats.bgn_millis = self.inner.clock.uptime_millis();
            stats.interval
        };
        tracing::debug!("{}: sampling started, interval = {}ms", self.inner.tag, interval);
        self.inner.schedule(interval);
    }

    /// Stop sampling and freeze the end of the run
    pub fn pause(&self) {
        {
            let mut stats = self.inner.stats();
            stats.paused = true;
            stats.end_millis = self.inner.clock.uptime_millis();
        }
        if let Err(e) = self.inner.scheduler.remove(self.inner.token) {
            tracing::debug!("{}: {}", self.inner.tag, e);
        }
        tracing::debug!("{}: sampling paused", self.inner.tag);
    }

    pub fn count(&self) -> u32 {
        self.inner.stats().count
    }

    /// Statistics of the run, `None` without samples or a started and paused run
    pub fn get_result(&self) -> Option<SamplerResult> {
        let stats = self.inner.stats();
        if stats.count == 0 {
            tracing::warn!("{}: sampling count is invalid: {}", self.inner.tag, stats.count);
            return None;
        }
        if stats.bgn_millis <= 0 || stats.end_millis <= 0 || stats.bgn_millis > stats.end_millis {
            tracing::warn!(
                "{}: sampling bgn/end millis is invalid: {} - {}",
                self.inner.tag,
                stats.bgn_millis,
                stats.end_millis
            );
            return None;
        }
        Some(SamplerResult {
            interval: stats.interval,
            count: stats.count,
            during_millis: stats.end_millis - stats.bgn_millis,
            sample_fst: stats.fst,
            sample_lst: stats.lst,
            sample_max: stats.max,
            sample_min: stats.min,
            sample_avg: stats.avg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crossbeam::channel;
    use std::sync::atomic::{AtomicI32, Ordering};

    /// Sampler producing `1..=n` then cancelling, plus a channel that fires on cancel
    fn counting_sampler(n: i32, clock: Arc<ManualClock>) -> (Sampler, channel::Receiver<()>) {
        let (tx, rx) = channel::bounded(1);
        let next = AtomicI32::new(0);
        let sampler = Sampler::new("counting", Scheduler::new("sampler-test"), clock, move || {
            let value = next.fetch_add(1, Ordering::SeqCst) + 1;
            if value > n {
                let _ = tx.try_send(());
                return Err(SamplerError::Cancelled);
            }
            Ok(value)
        });
        sampler.set_interval(1);
        (sampler, rx)
    }

    #[test]
    fn test_sequence_statistics() {
        let clock = Arc::new(ManualClock::new(100));
        let (sampler, done) = counting_sampler(10, clock.clone());
        sampler.start();
        done.recv_timeout(Duration::from_secs(10)).unwrap();

        clock.set(10_100);
        sampler.pause();
        let result = sampler.get_result().unwrap();
        assert_eq!(result.count, 10);
        assert_eq!(result.interval, 1);
        assert_eq!(result.during_millis, 10_000);
        assert_eq!(result.sample_fst, 1.0);
        assert_eq!(result.sample_lst, 10.0);
        assert_eq!(result.sample_max, 10.0);
        assert_eq!(result.sample_min, 1.0);
        assert!((result.sample_avg - 5.5).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_samples_are_skipped() {
        let clock = Arc::new(ManualClock::new(1));
        let (tx, rx) = channel::bounded(1);
        let calls = AtomicI32::new(0);
        let sampler = Sampler::new("flaky", Scheduler::new("sampler-test"), clock.clone(), move || {
            match calls.fetch_add(1, Ordering::SeqCst) {
                0 => Err(SamplerError::Invalid),
                1 => Err(SamplerError::Failed("io".to_string())),
                2 => Ok(7.5_f64),
                _ => {
                    let _ = tx.try_send(());
                    Err(SamplerError::Cancelled)
                }
            }
        });
        sampler.set_interval(1);
        sampler.start();
        rx.recv_timeout(Duration::from_secs(10)).unwrap();

        clock.set(50);
        sampler.pause();
        let result = sampler.get_result().unwrap();
        assert_eq!(result.count, 1);
        assert_eq!(result.sample_min, 7.5);
        assert_eq!(result.sample_avg, 7.5);
    }

    #[test]
    fn test_result_requires_samples_and_pause() {
        let clock = Arc::new(ManualClock::new(1));
        let sampler = Sampler::new("idle", Scheduler::new("sampler-test"), clock.clone(), || Ok(1_i64));
        assert!(sampler.get_result().is_none());

        let (counting, done) = counting_sampler(2, clock.clone());
        counting.start();
        done.recv_timeout(Duration::from_secs(10)).unwrap();
        // never paused, end is unset
        assert!(counting.get_result().is_none());

        clock.set(0);
        counting.pause();
        assert!(counting.get_result().is_none());
    }

    #[test]
    fn test_set_interval_ignores_non_positive() {
        let clock = Arc::new(ManualClock::new(1));
        let sampler = Sampler::new("interval", Scheduler::new("sampler-test"), clock, || Ok(1_i32));
        assert_eq!(sampler.interval(), DEFAULT_INTERVAL_MILLIS);
        sampler.set_interval(0);
        sampler.set_interval(-5);
        assert_eq!(sampler.interval(), DEFAULT_INTERVAL_MILLIS);
        sampler.set_interval(250);
        assert_eq!(sampler.interval(), 250);
    }

    #[test]
    fn test_dropping_running_sampler_cancels_its_job() {
        let scheduler = Scheduler::new("sampler-test");
        let sampler = Sampler::new("dropped", scheduler.clone(), Arc::new(ManualClock::new(1)), || Ok(1_i32));
        sampler.set_interval(60_000);
        sampler.start();

        let state = Arc::downgrade(&sampler.inner);
        drop(sampler);
        assert!(state.upgrade().is_none());

        scheduler.sync().unwrap();
        assert_eq!(scheduler.stats().cancelled, 1);
        scheduler.shutdown();
    }

    #[test]
    fn test_pause_stops_rescheduling() {
        let clock = Arc::new(ManualClock::new(1));
        let sampler = Sampler::new("paused", Scheduler::new("sampler-test"), clock, || Ok(1_i32));
        sampler.set_interval(60_000);
        sampler.start();
        sampler.pause();
        assert_eq!(sampler.count(), 0);
        assert_eq!(sampler.tag(), "paused");
    }
}
