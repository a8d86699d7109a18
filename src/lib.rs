//! jiffies-ledger - CPU time accounting for in-process battery monitoring
//!
//! This library measures where a process's CPU time goes: which tasks burned
//! the jiffies, in which app state and scene, while charging or not. It is
//! built from three pieces:
//!
//! - [`snapshot`]: point-in-time measurements and their field-by-field deltas
//! - [`time_breaker`]: newest-first stamp lists split into per-key portions
//! - [`task_monitor`]: per-task jiffies attribution with bounded memory
//!
//! plus the stat ledgers, clock, jiffies source and work queue that feed them,
//! and wake lock and alarm counters for the same reports.

pub mod alarm;
pub mod app_stat;
pub mod cli;
pub mod clock;
pub mod config;
pub mod context;
pub mod device_stat;
pub mod jiffies;
pub mod sampler;
pub mod scheduler;
pub mod snapshot;
pub mod task_monitor;
pub mod time_breaker;
pub mod wake_lock;
