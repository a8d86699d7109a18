//! Contextual tags for task measurements
//!
//! The task monitor tags every snapshot with the app state, device state and
//! scene at capture time, and enriches finished deltas with ratios over the
//! task's duration. [`DeviceContext`] is the seam it reads them through.

use crate::app_stat::{AppStat, AppStatMonitor, AppStatSnapshot};
use crate::device_stat::{DevStat, DevStatMonitor, DevStatSnapshot};
use crate::time_breaker::TimePortions;
use std::sync::Arc;

/// Point-in-time state plus windowed ratios
pub trait DeviceContext: Send + Sync {
    fn app_stat(&self) -> AppStat;

    fn dev_stat(&self) -> DevStat;

    fn scene(&self) -> String;

    fn app_stat_snapshot(&self, window_millis: i64) -> AppStatSnapshot;

    fn scene_portions(&self, window_millis: i64) -> TimePortions;

    fn dev_stat_snapshot(&self, window_millis: i64) -> DevStatSnapshot;
}

/// Context backed by the app and device stat ledgers
#[derive(Clone)]
pub struct MonitoredContext {
    pub app: Arc<AppStatMonitor>,
    pub dev: Arc<DevStatMonitor>,
}

impl MonitoredContext {
    pub fn new(app: Arc<AppStatMonitor>, dev: Arc<DevStatMonitor>) -> Self {
        MonitoredContext { app, dev }
    }
}

impl DeviceContext for MonitoredContext {
    fn app_stat(&self) -> AppStat {
        self.app.current_app_stat()
    }

    fn dev_stat(&self) -> DevStat {
        self.dev.current_dev_stat()
    }

    fn scene(&self) -> String {
        self.app.current_scene()
    }

    fn app_stat_snapshot(&self, window_millis: i64) -> AppStatSnapshot {
        self.app.current_app_stat_snapshot(window_millis)
    }

    fn scene_portions(&self, window_millis: i64) -> TimePortions {
        self.app.current_scene_portions(window_millis)
    }

    fn dev_stat_snapshot(&self, window_millis: i64) -> DevStatSnapshot {
        self.dev.current_dev_stat_snapshot(window_millis)
    }
}
