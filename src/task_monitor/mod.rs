//! Per-task CPU jiffies attribution
//!
//! Worker threads report when a named task starts and finishes. The monitor
//! samples the thread's jiffies at both points, keeps the finished deltas
//! that cost enough to be worth reporting, and records per-thread jiffies
//! stamps so any slice of a thread's CPU time can be split among the tasks
//! that ran in it.

mod concurrent;
mod monitor;
mod snapshot;

pub use monitor::{
    NoopListener, Result, TaskMonitor, TaskMonitorBuilder, TaskMonitorError, TaskMonitorListener,
    DEF_STAMP_OVERHEAT, IDLE_TASK, INITIAL_JIFFIES, JIFFIES_PORTIONING_DELTA,
};
pub use snapshot::{TaskJiffiesSnapshot, FULL_RATIO};
