//! Per-thread CPU jiffies sources
//!
//! The task monitor samples "how much CPU has this thread burned so far" at
//! task start and finish. [`ProcJiffiesSource`] answers from
//! `/proc/<pid>/task/<tid>/stat` (utime + stime, in scheduler ticks) or,
//! when configured, from the calling thread's CPU clock converted to ticks.
//!
//! Tests substitute their own [`JiffiesSource`] to script readings.

use nix::time::{clock_gettime, ClockId};
use nix::unistd::{getpid, gettid};
use std::path::PathBuf;
use thiserror::Error;

/// Milliseconds per jiffy for the thread CPU clock conversion (USER_HZ = 100)
pub const MILLIS_PER_JIFFY: i64 = 10;

/// Errors reading a thread's CPU accounting
#[derive(Error, Debug)]
pub enum ProcStatError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed stat line: {0}")]
    Malformed(String),

    #[error("Thread CPU clock unavailable: {0}")]
    Clock(#[from] nix::errno::Errno),
}

pub type Result<T> = std::result::Result<T, ProcStatError>;

/// Where jiffies readings and thread identity come from
pub trait JiffiesSource: Send + Sync {
    fn pid(&self) -> i32;

    /// Kernel tid of the calling thread
    fn current_tid(&self) -> i32;

    /// The process's main thread has `tid == pid`
    fn is_main_thread(&self) -> bool {
        self.current_tid() == self.pid()
    }

    /// utime + stime of thread `tid` in process `pid`
    fn read_jiffies(&self, pid: i32, tid: i32) -> Result<i64>;

    /// CPU time of the calling thread, in jiffies
    fn thread_time_jiffies(&self) -> Result<i64>;
}

/// Linux `/proc` backed source
#[derive(Debug, Clone)]
pub struct ProcJiffiesSource {
    proc_root: PathBuf,
}

impl ProcJiffiesSource {
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Read stat files below `root` instead of `/proc`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        ProcJiffiesSource {
            proc_root: root.into(),
        }
    }

    fn stat_path(&self, pid: i32, tid: i32) -> PathBuf {
        self.proc_root
            .join(pid.to_string())
            .join("task")
            .join(tid.to_string())
            .join("stat")
    }
}

impl Default for ProcJiffiesSource {
    fn default() -> Self {
        Self::new()
    }
}

impl JiffiesSource for ProcJiffiesSource {
    fn pid(&self) -> i32 {
        getpid().as_raw()
    }

    fn current_tid(&self) -> i32 {
        gettid().as_raw()
    }

    fn read_jiffies(&self, pid: i32, tid: i32) -> Result<i64> {
        let path = self.stat_path(pid, tid);
        let content = std::fs::read_to_string(&path).map_err(|source| ProcStatError::Io {
            path: path.clone(),
            source,
        })?;
        parse_stat_jiffies(&content)
    }

    fn thread_time_jiffies(&self) -> Result<i64> {
        let ts = clock_gettime(ClockId::CLOCK_THREAD_CPUTIME_ID)?;
        #[allow(clippy::unnecessary_cast)]
        let millis = ts.tv_sec() as i64 * 1000 + ts.tv_nsec() as i64 / 1_000_000;
        Ok(millis / MILLIS_PER_JIFFY)
    }
}

/// Extract utime + stime from a `stat` line
///
/// The comm field sits in parentheses and may itself contain spaces or
/// `)`, so fields are counted from the last `)`. After it, utime and stime
/// are the 12th and 13th whitespace-separated fields.
///
/// # Example
/// ```
/// use jiffies_ledger::jiffies::parse_stat_jiffies;
///
/// let line = "42 (worker (1)) S 1 42 42 0 -1 4194368 100 0 0 0 250 75 0 0 20 0 4 0";
/// assert_eq!(parse_stat_jiffies(line).unwrap(), 325);
/// ```
pub fn parse_stat_jiffies(line: &str) -> Result<i64> {
    let rest = line
        .rfind(')')
        .map(|idx| &line[idx + 1..])
        .ok_or_else(|| ProcStatError::Malformed(truncate(line)))?;
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let field = |idx: usize| -> Result<i64> {
        fields
            .get(idx)
            .and_then(|f| f.parse::<i64>().ok())
            .ok_or_else(|| ProcStatError::Malformed(truncate(line)))
    };
    let utime = field(11)?;
    let stime = field(12)?;
    Ok(utime.saturating_add(stime))
}

fn truncate(line: &str) -> String {
    line.chars().take(64).collect()
}
