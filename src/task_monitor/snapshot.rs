// Jiffies reading of one task on one thread

use crate::app_stat::AppStat;
use crate::device_stat::DevStat;
use crate::snapshot::{DigitDiffer, DigitEntry, Snapshot, SnapshotMeta};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ratio fields start at 100 until a delta is enriched
pub const FULL_RATIO: i64 = 100;

/// CPU jiffies of thread `tid` while running task `name`, plus context tags
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskJiffiesSnapshot {
    pub meta: SnapshotMeta,
    pub tid: i32,
    pub name: String,
    pub jiffies: DigitEntry<i64>,
    pub app_stat: AppStat,
    pub dev_stat: DevStat,
    pub scene: String,
    pub is_finished: bool,
    /// Background share of the task's duration, percent
    pub bg_ratio: i64,
    /// Charging share of the task's duration, percent
    pub charge_ratio: i64,
    /// Share of the task's duration spent in `scene`, percent
    pub scene_ratio: i64,
}

impl TaskJiffiesSnapshot {
    pub fn new(time: i64, tid: i32, name: impl Into<String>, jiffies: i64) -> Self {
        TaskJiffiesSnapshot {
            meta: SnapshotMeta::at(time),
            tid,
            name: name.into(),
            jiffies: DigitEntry::of(jiffies),
            app_stat: AppStat::Foreground,
            dev_stat: DevStat::Discharging,
            scene: String::new(),
            is_finished: false,
            bg_ratio: FULL_RATIO,
            charge_ratio: FULL_RATIO,
            scene_ratio: FULL_RATIO,
        }
    }

    pub fn with_context(mut self, app_stat: AppStat, dev_stat: DevStat, scene: impl Into<String>) -> Self {
        self.app_stat = app_stat;
        self.dev_stat = dev_stat;
        self.scene = scene.into();
        self
    }
}

impl Snapshot for TaskJiffiesSnapshot {
    fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SnapshotMeta {
        &mut self.meta
    }

    fn compute_delta(bgn: &Self, end: &Self) -> Self {
        TaskJiffiesSnapshot {
            meta: SnapshotMeta::at(end.meta.time),
            tid: end.tid,
            name: end.name.clone(),
            jiffies: DigitDiffer::global_diff(&bgn.jiffies, &end.jiffies),
            app_stat: AppStat::merge(bgn.app_stat, end.app_stat),
            dev_stat: DevStat::merge(bgn.dev_stat, end.dev_stat),
            scene: end.scene.clone(),
            is_finished: end.is_finished,
            bg_ratio: FULL_RATIO,
            charge_ratio: FULL_RATIO,
            scene_ratio: FULL_RATIO,
        }
    }
}

impl fmt::Display for TaskJiffiesSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{} jiffies={} app={} dev={}",
            self.name, self.tid, self.jiffies, self.app_stat, self.dev_stat
        )
    }
}
