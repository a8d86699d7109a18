// State-change stamps and newest-first stamp lists

use crate::clock::Clock;
use serde::{Deserialize, Serialize};

/// Key of the synthetic stamp marking "now" during portioning
pub const CURR_STAMP: &str = "CURR_STAMP";

/// Minimum gap between the newest stamp and "now" before a current stamp
/// is synthesized
pub const DEFAULT_CURRENT_STAMP_DELTA: i64 = 10;

/// "State became `key` at `up_time`"
///
/// Lists of stamps are stored newest first. `up_time` is usually uptime
/// millis, but the task monitor stamps by jiffies consumed instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub key: String,
    #[serde(alias = "upTime")]
    pub up_time: i64,
}

impl Stamp {
    pub fn new(key: impl Into<String>, up_time: i64) -> Self {
        Stamp {
            key: key.into(),
            up_time,
        }
    }

    /// Stamp `key` at the clock's current uptime
    pub fn now(key: impl Into<String>, clock: &dyn Clock) -> Self {
        Self::new(key, clock.uptime_millis())
    }
}

/// Halve a newest-first list, keeping the newest half and the oldest element
///
/// Removes indices `len/2 .. len-1`, leaving `len/2 + 1` elements for any
/// non-empty list. Keeping the oldest stamp preserves the start of history
/// so later portioning still covers the full span.
///
/// # Example
/// ```
/// use jiffies_ledger::time_breaker::gc_list;
///
/// let mut list: Vec<i32> = (0..10).rev().collect(); // newest first
/// gc_list(&mut list);
/// assert_eq!(list, vec![9, 8, 7, 6, 5, 0]);
/// ```
pub fn gc_list<T>(list: &mut Vec<T>) {
    let len = list.len();
    if len < 3 {
        return;
    }
    list.drain(len / 2..len - 1);
}
