//! Alarm set/remove counting
//!
//! Alarms are keyed by the caller's handle for the pending operation.
//! Setting a key that is already armed replaces its alarm and counts as a
//! duplicate; the first duplicate of a key also opens a duplicated group.

use crate::clock::Clock;
use crate::snapshot::{BeanEntry, DigitDiffer, DigitEntry, ListDiffer, ListEntry, Snapshot, SnapshotMeta};
use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Parameters of one alarm request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AlarmRequest {
    pub alarm_type: i32,
    pub trigger_at_millis: i64,
    pub window_millis: i64,
    pub interval_millis: i64,
    pub flags: i32,
}

/// An armed alarm
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmRecord {
    pub request: AlarmRequest,
    /// Uptime when the alarm was set
    pub time_bgn: i64,
}

pub trait AlarmListener: Send + Sync {
    /// `record` replaced an armed alarm of the same key for the
    /// `duplicated_count`th time
    fn on_alarm_duplicated(&self, _duplicated_count: u32, _record: &AlarmRecord) {}
}

#[derive(Debug, Default)]
pub struct NoopAlarmListener;

impl AlarmListener for NoopAlarmListener {}

/// Alarm counters at one instant
#[derive(Debug, Clone)]
pub struct AlarmSnapshot {
    pub meta: SnapshotMeta,
    pub total_count: DigitEntry<i32>,
    /// Alarms currently armed
    pub tracing_count: DigitEntry<i32>,
    pub duplicated_groups: DigitEntry<i32>,
    pub duplicated_count: DigitEntry<i32>,
    /// Armed alarms, oldest first
    pub records: ListEntry<BeanEntry<AlarmRecord>>,
}

impl Snapshot for AlarmSnapshot {
    fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SnapshotMeta {
        &mut self.meta
    }

    fn compute_delta(bgn: &Self, end: &Self) -> Self {
        AlarmSnapshot {
            meta: SnapshotMeta::at(end.meta.time),
            total_count: DigitDiffer::global_diff(&bgn.total_count, &end.total_count),
            tracing_count: DigitDiffer::global_diff(&bgn.tracing_count, &end.tracing_count),
            duplicated_groups: DigitDiffer::global_diff(&bgn.duplicated_groups, &end.duplicated_groups),
            duplicated_count: DigitDiffer::global_diff(&bgn.duplicated_count, &end.duplicated_count),
            records: ListDiffer::diff_beans(&bgn.records, &end.records),
        }
    }
}

struct Armed {
    record: AlarmRecord,
    sets: u32,
}

#[derive(Default)]
struct Counting {
    armed: FnvHashMap<u64, Armed>,
    total_count: i32,
    duplicated_groups: i32,
    duplicated_count: i32,
}

/// Counts alarm requests and flags re-arming of the same key
pub struct AlarmMonitor {
    clock: Arc<dyn Clock>,
    listener: Arc<dyn AlarmListener>,
    counting: Mutex<Counting>,
}

impl AlarmMonitor {
    pub fn new(clock: Arc<dyn Clock>, listener: Arc<dyn AlarmListener>) -> Self {
        AlarmMonitor {
            clock,
            listener,
            counting: Mutex::new(Counting::default()),
        }
    }

    fn counting(&self) -> MutexGuard<'_, Counting> {
        self.counting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn on_alarm_set(&self, key: u64, request: AlarmRequest) {
        let record = AlarmRecord {
            request,
            time_bgn: self.clock.uptime_millis(),
        };
        tracing::info!("alarm set: key={} {:?}", key, request);

        let duplicated = {
            let mut guard = self.counting();
            let counting = &mut *guard;
            counting.total_count = counting.total_count.saturating_add(1);
            match counting.armed.get_mut(&key) {
                Some(armed) => {
                    armed.sets += 1;
                    armed.record = record.clone();
                    let sets = armed.sets;
                    counting.duplicated_count = counting.duplicated_count.saturating_add(1);
                    if sets == 2 {
                        counting.duplicated_groups = counting.duplicated_groups.saturating_add(1);
                    }
                    Some(sets - 1)
                }
                None => {
                    counting.armed.insert(key, Armed { record: record.clone(), sets: 1 });
                    None
                }
            }
        };

        if let Some(count) = duplicated {
            tracing::debug!("alarm {} re-armed {} times", key, count);
            self.listener.on_alarm_duplicated(count, &record);
        }
    }

    /// Unknown keys are ignored
    pub fn on_alarm_remove(&self, key: u64) {
        if self.counting().armed.remove(&key).is_none() {
            tracing::debug!("remove of untracked alarm {}", key);
        }
    }

    pub fn current_alarms(&self) -> AlarmSnapshot {
        let counting = self.counting();
        let mut records: Vec<AlarmRecord> = counting.armed.values().map(|a| a.record.clone()).collect();
        records.sort_by_key(|r| r.time_bgn);
        AlarmSnapshot {
            meta: SnapshotMeta::at(self.clock.uptime_millis()),
            total_count: DigitEntry::of(counting.total_count),
            tracing_count: DigitEntry::of(i32::try_from(counting.armed.len()).unwrap_or(i32::MAX)),
            duplicated_groups: DigitEntry::of(counting.duplicated_groups),
            duplicated_count: DigitEntry::of(counting.duplicated_count),
            records: ListEntry::of_beans(records),
        }
    }

    /// Reset every counter
    pub fn clear(&self) {
        *self.counting() = Counting::default();
    }
}
