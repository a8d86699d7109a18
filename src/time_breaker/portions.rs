// Apportioning a stamp timeline among its keys

use super::stamp::{Stamp, CURR_STAMP, DEFAULT_CURRENT_STAMP_DELTA};
use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Share of the covered time spent under one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Portion {
    pub key: String,
    /// Rounded percentage, 0..=100
    pub ratio: i32,
    /// Raw time attributed to the key, in the stamp list's unit
    pub total_millis: i64,
}

/// Result of [`configure_portions`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimePortions {
    pub total_uptime: i64,
    /// Sorted by ratio, descending
    pub portions: Vec<Portion>,
    pub valid: bool,
}

impl TimePortions {
    pub fn invalid() -> Self {
        TimePortions {
            total_uptime: 0,
            portions: Vec::new(),
            valid: false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn top1(&self) -> Option<&Portion> {
        self.portions.first()
    }

    pub fn top2(&self) -> Option<&Portion> {
        self.portions.get(1)
    }

    pub fn portion(&self, key: &str) -> Option<&Portion> {
        self.portions.iter().find(|p| p.key == key)
    }

    /// Ratio of `key`, 0 when the key never appeared
    pub fn get_ratio(&self, key: &str) -> i32 {
        self.portion(key).map_or(0, |p| p.ratio)
    }
}

/// Portion `stamps` using the clock to synthesize the current stamp
///
/// See [`configure_portions_with`].
pub fn configure_portions(stamps: &[Stamp], window_millis: i64, clock: &dyn Clock) -> TimePortions {
    configure_portions_with(stamps, window_millis, DEFAULT_CURRENT_STAMP_DELTA, || {
        Stamp::now(CURR_STAMP, clock)
    })
}

/// Apportion a newest-first stamp list among its keys
///
/// # Arguments
/// * `stamps` - newest-first stamps; each interval between two neighbours is
///   credited to the older one's key
/// * `window_millis` - trailing window to cover; `<= 0` covers all history
/// * `min_delta` - a current stamp from `stamper` is put in front of the list
///   only when it is more than this far past the newest stamp
/// * `stamper` - produces the current stamp
///
/// Accumulation stops at the first out-of-order pair (older stamp later than
/// newer), treating the rest as unusable history. The result is invalid when
/// nothing was covered, or when a positive window asks for more history than
/// the list holds.
///
/// # Example
/// ```
/// use jiffies_ledger::time_breaker::{configure_portions_with, Stamp};
///
/// let stamps = vec![Stamp::new("A", 300), Stamp::new("B", 200), Stamp::new("C", 100), Stamp::new("A", 0)];
/// let portions = configure_portions_with(&stamps, 0, 10, || Stamp::new("now", 300));
/// assert_eq!(portions.total_uptime, 300);
/// assert!(portions.is_valid());
/// ```
pub fn configure_portions_with<F>(
    stamps: &[Stamp],
    window_millis: i64,
    min_delta: i64,
    stamper: F,
) -> TimePortions
where
    F: FnOnce() -> Stamp,
{
    let Some(newest) = stamps.first() else {
        return TimePortions::invalid();
    };

    let current = stamper();
    let head = (current.up_time.saturating_sub(newest.up_time) > min_delta).then_some(current);

    // key -> (covered time, first seen order)
    let mut mapper: HashMap<&str, (i64, usize)> = HashMap::new();
    let mut total: i64 = 0;
    let mut last: Option<i64> = None;

    for item in head.iter().chain(stamps.iter()) {
        if let Some(last_up_time) = last {
            if last_up_time < item.up_time {
                tracing::warn!(
                    "stamp order corrupted at {} ({} < {}), ignoring older history",
                    item.key,
                    last_up_time,
                    item.up_time
                );
                break;
            }
            let interval = last_up_time.saturating_sub(item.up_time);
            let order = mapper.len();
            let slot = mapper.entry(item.key.as_str()).or_insert((0, order));
            if window_millis > 0 && total.saturating_add(interval) >= window_millis {
                slot.0 += window_millis - total;
                total = window_millis;
                break;
            }
            slot.0 = slot.0.saturating_add(interval);
            total = total.saturating_add(interval);
        }
        last = Some(item.up_time);
    }

    let valid = total > 0 && !(window_millis > 0 && window_millis > total);

    let mut portions: Vec<(usize, Portion)> = mapper
        .into_iter()
        .map(|(key, (millis, order))| {
            let ratio = if total > 0 {
                ((millis as f64 / total as f64) * 100.0).round().clamp(0.0, 100.0) as i32
            } else {
                0
            };
            (
                order,
                Portion {
                    key: key.to_string(),
                    ratio,
                    total_millis: millis,
                },
            )
        })
        .collect();
    // ties keep timeline order, newest first
    portions.sort_by(|(oa, a), (ob, b)| b.ratio.cmp(&a.ratio).then(oa.cmp(ob)));

    TimePortions {
        total_uptime: total,
        portions: portions.into_iter().map(|(_, p)| p).collect(),
        valid,
    }
}
