// Task jiffies attribution engine

use super::concurrent::ConcurrentTrace;
use super::snapshot::{TaskJiffiesSnapshot, FULL_RATIO};
use crate::app_stat::AppStat;
use crate::clock::{Clock, SystemClock};
use crate::config::{AssertionLevel, MonitorConfig};
use crate::context::DeviceContext;
use crate::device_stat::DevStat;
use crate::jiffies::{JiffiesSource, ProcJiffiesSource, ProcStatError};
use crate::scheduler::{Debouncer, Scheduler};
use crate::snapshot::{Delta, Snapshot};
use crate::time_breaker::{configure_portions_with, gc_list, Stamp, TimePortions};
use fnv::FnvHashMap;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;

/// Stamp key for "no task running" on a thread
pub const IDLE_TASK: &str = "thread_pool@idle";

/// Jiffies reading a thread's stamp list starts from
pub const INITIAL_JIFFIES: i64 = 0;

/// Current-stamp epsilon when portioning by jiffies
pub const JIFFIES_PORTIONING_DELTA: i64 = 10;

/// Floor for the overheat threshold, whatever the configuration says
pub const DEF_STAMP_OVERHEAT: usize = 200;

const ONE_MIN_MILLIS: i64 = 60 * 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskMonitorError {
    #[error("Task tracking called on the main thread: {0}")]
    OnMainThread(String),

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, TaskMonitorError>;

/// Callbacks for the reporting side; all default to no-ops
pub trait TaskMonitorListener: Send + Sync {
    /// The pending delta list overflowed and was flushed
    fn on_trace_overheat(&self, _deltas: Vec<Delta<TaskJiffiesSnapshot>>) {}

    /// More than `concurrent_limit` tasks named `name` are in flight
    fn on_concurrent_overheat(&self, _name: &str, _count: usize, _during_millis: i64) {}

    /// A jiffies reading failed; the task invocation goes untracked
    fn on_parse_task_jiffies_fail(&self, _name: &str, _pid: i32, _tid: i32, _error: &ProcStatError) {}
}

#[derive(Debug, Default)]
pub struct NoopListener;

impl TaskMonitorListener for NoopListener {}

/// Builder for [`TaskMonitor`]
pub struct TaskMonitorBuilder {
    config: MonitorConfig,
    clock: Option<Arc<dyn Clock>>,
    source: Option<Arc<dyn JiffiesSource>>,
    context: Option<Arc<dyn DeviceContext>>,
    listener: Option<Arc<dyn TaskMonitorListener>>,
    scheduler: Option<Scheduler>,
}

impl TaskMonitorBuilder {
    pub fn new(config: MonitorConfig) -> Self {
        TaskMonitorBuilder {
            config,
            clock: None,
            source: None,
            context: None,
            listener: None,
            scheduler: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_source(mut self, source: Arc<dyn JiffiesSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Enrich deltas with app/device ratios and tag snapshots from `context`
    pub fn with_context(mut self, context: Arc<dyn DeviceContext>) -> Self {
        self.context = Some(context);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn TaskMonitorListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Share a work queue instead of spawning a dedicated one
    pub fn with_scheduler(mut self, scheduler: Scheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    pub fn build(self) -> TaskMonitor {
        let scheduler = self.scheduler.unwrap_or_else(|| Scheduler::new("task-monitor"));
        let overheat_count = self.config.overheat_count.max(DEF_STAMP_OVERHEAT);
        let cooling = Debouncer::new(scheduler.clone(), Duration::from_millis(self.config.cooling_delay_ms));
        TaskMonitor {
            inner: Arc::new(MonitorState {
                overheat_count,
                clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
                source: self.source.unwrap_or_else(|| Arc::new(ProcJiffiesSource::new())),
                context: self.context,
                listener: self.listener.unwrap_or_else(|| Arc::new(NoopListener)),
                config: self.config,
                scheduler,
                cooling,
                working: Mutex::new(HashMap::new()),
                deltas: Mutex::new(Vec::new()),
                stamps: Mutex::new(FnvHashMap::default()),
                concurrency: ConcurrentTrace::default(),
            }),
        }
    }
}

struct MonitorState {
    config: MonitorConfig,
    overheat_count: usize,
    clock: Arc<dyn Clock>,
    source: Arc<dyn JiffiesSource>,
    context: Option<Arc<dyn DeviceContext>>,
    listener: Arc<dyn TaskMonitorListener>,
    scheduler: Scheduler,
    cooling: Debouncer,
    /// task identity -> snapshot taken at start
    working: Mutex<HashMap<u64, TaskJiffiesSnapshot>>,
    deltas: Mutex<Vec<Delta<TaskJiffiesSnapshot>>>,
    /// tid -> newest-first (task, jiffies) stamps
    stamps: Mutex<FnvHashMap<i32, Vec<Stamp>>>,
    concurrency: ConcurrentTrace,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Background and non-foreground tasks first, then by jiffies descending
fn by_actionable_cost(a: &Delta<TaskJiffiesSnapshot>, b: &Delta<TaskJiffiesSnapshot>) -> Ordering {
    let (left, right) = (&a.dlt, &b.dlt);
    left.app_stat
        .is_foreground()
        .cmp(&right.app_stat.is_foreground())
        .then_with(|| right.jiffies.get().cmp(&left.jiffies.get()))
}

impl MonitorState {
    fn cool_down(&self) {
        {
            let mut stamps = lock(&self.stamps);
            for (tid, list) in stamps.iter_mut() {
                if list.len() > self.overheat_count {
                    let before = list.len();
                    gc_list(list);
                    tracing::warn!("cooling task stamps of tid {}: {} -> {}", tid, before, list.len());
                }
            }
        }

        // take under one lock so concurrent reporters never see a half-flushed list
        let mut evicted = {
            let mut deltas = lock(&self.deltas);
            if deltas.len() > self.overheat_count {
                std::mem::take(&mut *deltas)
            } else {
                Vec::new()
            }
        };
        if !evicted.is_empty() {
            tracing::warn!("cooling task jiffies list, evicted {}", evicted.len());
            evicted.sort_by(by_actionable_cost);
            self.listener.on_trace_overheat(evicted);
        }
    }

    fn check_overheat(self: &Arc<Self>, len: usize) {
        if len <= self.overheat_count {
            return;
        }
        if len >= self.overheat_count * 2 {
            // the debounce keeps restarting under a task storm
            self.cool_down();
            return;
        }
        let state = Arc::clone(self);
        if let Err(e) = self.cooling.trigger(move || state.cool_down()) {
            tracing::warn!("task cooling not scheduled: {}", e);
        }
    }
}

/// Per-task CPU jiffies attribution
///
/// Worker threads report task start and finish synchronously; each call
/// samples the calling thread's jiffies. Finished tasks that pass
/// [`should_trace_task`](TaskMonitor::should_trace_task) become pending
/// deltas, enriched with app and device ratios over the task's duration.
/// Every thread also keeps a jiffies-stamped list of which task it ran, so
/// a later jiffies window can be split among tasks.
///
/// Stamp lists and the pending list are bounded: past the overheat
/// threshold a debounced cooling pass halves stamp lists and flushes the
/// pending list to [`TaskMonitorListener::on_trace_overheat`].
///
/// # Example
/// ```no_run
/// use jiffies_ledger::config::MonitorConfig;
/// use jiffies_ledger::task_monitor::TaskMonitorBuilder;
///
/// let monitor = TaskMonitorBuilder::new(MonitorConfig::default()).build();
/// std::thread::spawn(move || {
///     monitor.on_task_started("upload", 42).unwrap();
///     // ... work ...
///     monitor.on_task_finished("upload", 42).unwrap();
///     for delta in monitor.current_jiffies() {
///         println!("{} burned {} jiffies", delta.dlt.name, delta.dlt.jiffies);
///     }
/// })
/// .join()
/// .unwrap();
/// ```
#[derive(Clone)]
pub struct TaskMonitor {
    inner: Arc<MonitorState>,
}

impl TaskMonitor {
    pub fn builder(config: MonitorConfig) -> TaskMonitorBuilder {
        TaskMonitorBuilder::new(config)
    }

    /// Effective overheat threshold
    pub fn overheat_count(&self) -> usize {
        self.inner.overheat_count
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    /// A task with `identity` began on the calling thread
    ///
    /// A failed jiffies reading leaves the invocation untracked.
    pub fn on_task_started(&self, name: &str, identity: u64) -> Result<()> {
        let state = &self.inner;
        if state.source.is_main_thread() {
            return Err(TaskMonitorError::OnMainThread(name.to_string()));
        }

        let tid = state.source.current_tid();
        if let Some(bgn) = self.create_snapshot(name, tid) {
            let jiffies = bgn.jiffies.get();
            lock(&state.working).insert(identity, bgn);
            self.on_stat_task(tid, name, jiffies);
        }

        if state.config.trace_concurrency {
            self.on_task_concurrent_inc(name, identity);
        }
        Ok(())
    }

    /// The task with `identity` ended on the calling thread
    ///
    /// The in-flight snapshot is dropped even when the call is rejected.
    pub fn on_task_finished(&self, name: &str, identity: u64) -> Result<()> {
        let state = &self.inner;
        let bgn = lock(&state.working).remove(&identity);
        if state.config.trace_concurrency {
            self.on_task_concurrent_dec(identity);
        }
        if state.source.is_main_thread() {
            return Err(TaskMonitorError::OnMainThread(name.to_string()));
        }
        let Some(bgn) = bgn else {
            return Ok(());
        };

        let tid = state.source.current_tid();
        let end = self.create_snapshot(name, tid).map(|mut end| {
            end.is_finished = true;
            end
        });
        let end_jiffies = end.as_ref().map_or(bgn.jiffies.get(), |e| e.jiffies.get());
        let outcome = match end {
            Some(end) => self.report(bgn, end),
            None => Ok(()),
        };
        self.on_stat_task(tid, IDLE_TASK, end_jiffies);
        outcome
    }

    /// Forget an in-flight task without reporting it (e.g. cancelled)
    pub fn on_task_removed(&self, identity: u64) {
        lock(&self.inner.working).remove(&identity);
        if self.inner.config.trace_concurrency {
            self.on_task_concurrent_dec(identity);
        }
    }

    /// Number of tasks started and neither finished nor removed
    pub fn in_flight(&self) -> usize {
        lock(&self.inner.working).len()
    }

    /// Duration and rate filter for finished tasks
    ///
    /// Kept when the task ran longer than `min_trace_duration_ms` and burned
    /// more than `min_jiffies_per_minute`, or unconditionally with `trace_all`.
    pub fn should_trace_task(&self, delta: &Delta<TaskJiffiesSnapshot>) -> bool {
        let config = &self.inner.config;
        if config.trace_all {
            return true;
        }
        delta.during > config.min_trace_duration_ms
            && delta.dlt.jiffies.get() / (delta.during / ONE_MIN_MILLIS).max(1) > config.min_jiffies_per_minute
    }

    /// Store `delta`, replacing unfinished deltas of the same task and thread
    ///
    /// Finished deltas accumulate. Returns the new pending count.
    pub fn update_deltas(&self, delta: Delta<TaskJiffiesSnapshot>) -> usize {
        let len = {
            let mut deltas = lock(&self.inner.deltas);
            deltas.retain(|item| {
                item.dlt.is_finished || item.dlt.name != delta.dlt.name || item.dlt.tid != delta.dlt.tid
            });
            deltas.push(delta);
            deltas.len()
        };
        if len > self.inner.overheat_count {
            tracing::warn!("task list overheat, size = {}", len);
            self.inner.check_overheat(len);
        }
        len
    }

    /// Pending deltas, background first, most jiffies first
    pub fn current_jiffies(&self) -> Vec<Delta<TaskJiffiesSnapshot>> {
        let mut list = lock(&self.inner.deltas).clone();
        list.sort_by(by_actionable_cost);
        list
    }

    pub fn clear_deltas(&self) {
        lock(&self.inner.deltas).clear();
    }

    /// Copy of the jiffies stamps of thread `tid`, newest first
    pub fn get_task_stamps(&self, tid: i32) -> Option<Vec<Stamp>> {
        lock(&self.inner.stamps).get(&tid).cloned()
    }

    /// Split the last `jiffies_delta` jiffies of thread `tid` among its tasks
    ///
    /// `jiffies_end` is the thread's current reading, used to close the
    /// newest segment.
    pub fn get_task_portions(&self, tid: i32, jiffies_delta: i64, jiffies_end: i64) -> TimePortions {
        if jiffies_delta < 0 {
            return TimePortions::invalid();
        }
        let Some(stamps) = self.get_task_stamps(tid) else {
            return TimePortions::invalid();
        };
        configure_portions_with(&stamps, jiffies_delta, JIFFIES_PORTIONING_DELTA, || {
            Stamp::new(IDLE_TASK, jiffies_end)
        })
    }

    /// Run one cooling pass now
    pub fn cool_down(&self) {
        self.inner.cool_down();
    }

    /// Drop all state; the monitor stays usable
    pub fn turn_off(&self) {
        let state = &self.inner;
        let _ = state.cooling.cancel();
        lock(&state.working).clear();
        state.concurrency.clear();
        lock(&state.deltas).clear();
        lock(&state.stamps).clear();
        tracing::debug!("task monitor turned off");
    }

    /// Count `identity` as in flight under `name`, on the work queue
    pub fn on_task_concurrent_inc(&self, name: &str, identity: u64) {
        let state = Arc::clone(&self.inner);
        let name = name.to_string();
        let posted = self.inner.scheduler.post(move || {
            let now = state.clock.uptime_millis();
            if let Some((count, during)) =
                state.concurrency.inc(&name, identity, now, state.config.concurrent_limit)
            {
                tracing::warn!(
                    "reach task concurrent limit, count = {}, key = {}, during = {}ms",
                    count,
                    name,
                    during
                );
                state.listener.on_concurrent_overheat(&name, count, during);
            }
        });
        if let Err(e) = posted {
            tracing::warn!("concurrency trace dropped: {}", e);
        }
    }

    pub fn on_task_concurrent_dec(&self, identity: u64) {
        let state = Arc::clone(&self.inner);
        if let Err(e) = self.inner.scheduler.post(move || {
            state.concurrency.dec(identity);
        }) {
            tracing::warn!("concurrency trace dropped: {}", e);
        }
    }

    /// In-flight count for `name` as of the last processed queue item
    pub fn concurrent_count(&self, name: &str) -> usize {
        self.inner.concurrency.count(name)
    }

    fn create_snapshot(&self, name: &str, tid: i32) -> Option<TaskJiffiesSnapshot> {
        let state = &self.inner;
        let reading = if state.config.use_thread_clock {
            state.source.thread_time_jiffies()
        } else {
            state.source.read_jiffies(state.source.pid(), tid)
        };
        let jiffies = match reading {
            Ok(jiffies) => jiffies,
            Err(e) => {
                let pid = state.source.pid();
                tracing::warn!("parse task jiffies fail, name = {}, tid = {}: {}", name, tid, e);
                state.listener.on_parse_task_jiffies_fail(name, pid, tid, &e);
                return None;
            }
        };

        let snapshot = TaskJiffiesSnapshot::new(state.clock.uptime_millis(), tid, name, jiffies);
        Some(match &state.context {
            Some(ctx) => snapshot.with_context(ctx.app_stat(), ctx.dev_stat(), ctx.scene()),
            None => snapshot.with_context(AppStat::Foreground, DevStat::Discharging, ""),
        })
    }

    fn on_stat_task(&self, tid: i32, name: &str, jiffies: i64) {
        let len = {
            let mut stamps = lock(&self.inner.stamps);
            let list = stamps
                .entry(tid)
                .or_insert_with(|| vec![Stamp::new(IDLE_TASK, INITIAL_JIFFIES)]);
            list.insert(0, Stamp::new(name, jiffies));
            list.len()
        };
        self.inner.check_overheat(len);
    }

    fn violation(&self, message: String) -> Result<()> {
        match self.inner.config.assertion_level {
            AssertionLevel::Strict => Err(TaskMonitorError::InvariantViolation(message)),
            AssertionLevel::Lenient => {
                tracing::warn!("{}", message);
                Ok(())
            }
        }
    }

    fn report(&self, bgn: TaskJiffiesSnapshot, end: TaskJiffiesSnapshot) -> Result<()> {
        if end.tid != bgn.tid {
            return self.violation(format!("task tid mismatch: {} vs {}", bgn, end));
        }
        if end.name != bgn.name {
            return self.violation(format!("task name mismatch: {} vs {}", bgn, end));
        }

        let mut delta = end.diff(bgn);
        if !self.should_trace_task(&delta) {
            return Ok(());
        }
        tracing::info!(
            "task report: {}, jiffies = {}, millis = {}",
            delta.dlt.name,
            delta.dlt.jiffies,
            delta.during
        );

        self.enrich(&mut delta);
        self.update_deltas(delta);
        Ok(())
    }

    fn enrich(&self, delta: &mut Delta<TaskJiffiesSnapshot>) {
        let Some(ctx) = &self.inner.context else {
            return;
        };

        let app = ctx.app_stat_snapshot(delta.during);
        if !app.is_valid() {
            delta.end.set_valid(false);
            delta.dlt.set_valid(false);
        }
        let (scene, scene_ratio) = ctx
            .scene_portions(delta.during)
            .top1()
            .map_or((delta.dlt.scene.clone(), FULL_RATIO), |top| {
                (top.key.clone(), i64::from(top.ratio))
            });
        delta.dlt.bg_ratio = app.bg_ratio.get();
        delta.dlt.scene = scene;
        delta.dlt.scene_ratio = scene_ratio;

        let dev = ctx.dev_stat_snapshot(delta.during);
        if !dev.is_valid() {
            delta.end.set_valid(false);
            delta.dlt.set_valid(false);
        }
        delta.dlt.charge_ratio = dev.charging_ratio.get();
    }
}
