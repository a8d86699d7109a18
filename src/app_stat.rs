//! Application foreground state and scene ledger
//!
//! Records when the app moved between foreground, background and
//! foreground-service, and which scene label was active, so that any later
//! window can be split into foreground/background/scene ratios.

use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::scheduler::{Debouncer, Scheduler};
use crate::snapshot::{DigitDiffer, DigitEntry, Snapshot, SnapshotMeta};
use crate::time_breaker::{Stamp, StampLedger, TimePortions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Process importance as seen by the battery ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppStat {
    Foreground = 1,
    Background = 2,
    ForegroundService = 3,
}

impl AppStat {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(AppStat::Foreground),
            2 => Some(AppStat::Background),
            3 => Some(AppStat::ForegroundService),
            _ => None,
        }
    }

    /// Stamp key for this state
    pub fn key(self) -> String {
        self.code().to_string()
    }

    pub fn from_key(key: &str) -> Option<Self> {
        key.parse().ok().and_then(Self::from_code)
    }

    pub fn is_foreground(self) -> bool {
        self == AppStat::Foreground
    }

    /// Summarize the state across a task's start and end
    ///
    /// Foreground at either end wins; foreground-service needs both ends;
    /// anything else is background.
    pub fn merge(bgn: AppStat, end: AppStat) -> AppStat {
        if bgn == AppStat::Foreground || end == AppStat::Foreground {
            AppStat::Foreground
        } else if bgn == AppStat::ForegroundService && end == AppStat::ForegroundService {
            AppStat::ForegroundService
        } else {
            AppStat::Background
        }
    }
}

impl fmt::Display for AppStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppStat::Foreground => "fg",
            AppStat::Background => "bg",
            AppStat::ForegroundService => "fgSrv",
        };
        f.write_str(name)
    }
}

/// Foreground/background split of a window, in percent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppStatSnapshot {
    pub meta: SnapshotMeta,
    pub uptime: DigitEntry<i64>,
    pub fg_ratio: DigitEntry<i64>,
    pub bg_ratio: DigitEntry<i64>,
    pub fg_srv_ratio: DigitEntry<i64>,
}

impl AppStatSnapshot {
    pub fn from_portions(portions: &TimePortions, time: i64) -> Self {
        let ratio = |stat: AppStat| DigitEntry::of(i64::from(portions.get_ratio(&stat.key())));
        let mut meta = SnapshotMeta::at(time);
        meta.valid = portions.is_valid();
        AppStatSnapshot {
            meta,
            uptime: DigitEntry::of(portions.total_uptime),
            fg_ratio: ratio(AppStat::Foreground),
            bg_ratio: ratio(AppStat::Background),
            fg_srv_ratio: ratio(AppStat::ForegroundService),
        }
    }

    pub fn invalid(time: i64) -> Self {
        Self::from_portions(&TimePortions::invalid(), time)
    }
}

impl Snapshot for AppStatSnapshot {
    fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SnapshotMeta {
        &mut self.meta
    }

    fn compute_delta(bgn: &Self, end: &Self) -> Self {
        AppStatSnapshot {
            meta: SnapshotMeta::at(end.meta.time),
            uptime: DigitDiffer::global_diff(&bgn.uptime, &end.uptime),
            fg_ratio: DigitDiffer::global_diff(&bgn.fg_ratio, &end.fg_ratio),
            bg_ratio: DigitDiffer::global_diff(&bgn.bg_ratio, &end.bg_ratio),
            fg_srv_ratio: DigitDiffer::global_diff(&bgn.fg_srv_ratio, &end.fg_srv_ratio),
        }
    }
}

/// Stamp ledgers for app state and scene
pub struct AppStatMonitor {
    clock: Arc<dyn Clock>,
    stamps: Arc<StampLedger>,
    scenes: Arc<StampLedger>,
    overheat_count: usize,
    window_millis: i64,
    cooling: Debouncer,
}

impl AppStatMonitor {
    pub fn new(config: &MonitorConfig, clock: Arc<dyn Clock>, scheduler: Scheduler) -> Self {
        AppStatMonitor {
            clock,
            stamps: Arc::new(StampLedger::new()),
            scenes: Arc::new(StampLedger::new()),
            overheat_count: config.overheat_count,
            window_millis: config.window_millis,
            cooling: Debouncer::new(scheduler, Duration::from_millis(config.cooling_delay_ms)),
        }
    }

    pub fn turn_on(&self, stat: AppStat, scene: &str) {
        self.stamps.turn_on(Stamp::now(stat.key(), self.clock.as_ref()));
        self.scenes.turn_on(Stamp::now(scene, self.clock.as_ref()));
        tracing::debug!("app stat ledger on: {} @ {}", stat, scene);
    }

    pub fn turn_off(&self) {
        // a shut-down scheduler has nothing pending anyway
        let _ = self.cooling.cancel();
        self.stamps.turn_off();
        self.scenes.turn_off();
    }

    pub fn on_foreground(&self, stat: AppStat) {
        if let Some(len) = self.stamps.push(Stamp::now(stat.key(), self.clock.as_ref())) {
            self.check_overheat(len);
        }
    }

    pub fn on_stat_scene(&self, scene: &str) {
        if let Some(len) = self.scenes.push(Stamp::now(scene, self.clock.as_ref())) {
            self.check_overheat(len);
        }
    }

    /// Latest recorded state, foreground until told otherwise
    pub fn current_app_stat(&self) -> AppStat {
        self.stamps
            .newest()
            .and_then(|s| AppStat::from_key(&s.key))
            .unwrap_or(AppStat::Foreground)
    }

    pub fn current_scene(&self) -> String {
        self.scenes.newest().map(|s| s.key).unwrap_or_default()
    }

    /// Foreground/background split over the trailing `window_millis`
    pub fn current_app_stat_snapshot(&self, window_millis: i64) -> AppStatSnapshot {
        let portions = self.stamps.portions(window_millis, self.clock.as_ref());
        AppStatSnapshot::from_portions(&portions, self.clock.uptime_millis())
    }

    /// Foreground/background split over the configured window
    pub fn app_stat_snapshot(&self) -> AppStatSnapshot {
        self.current_app_stat_snapshot(self.window_millis)
    }

    /// Scene split over the trailing `window_millis`
    pub fn current_scene_portions(&self, window_millis: i64) -> TimePortions {
        self.scenes.portions(window_millis, self.clock.as_ref())
    }

    pub fn stamp_count(&self) -> usize {
        self.stamps.len()
    }

    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }

    fn check_overheat(&self, len: usize) {
        if len < self.overheat_count {
            return;
        }
        if len >= self.overheat_count * 2 {
            // debounce keeps getting restarted; cool now
            self.stamps.gc_over(self.overheat_count);
            self.scenes.gc_over(self.overheat_count);
            return;
        }
        let stamps = Arc::clone(&self.stamps);
        let scenes = Arc::clone(&self.scenes);
        let threshold = self.overheat_count;
        let posted = self.cooling.trigger(move || {
            stamps.gc_over(threshold);
            scenes.gc_over(threshold);
        });
        if let Err(e) = posted {
            tracing::warn!("app stat cooling not scheduled: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn monitor(clock: &Arc<ManualClock>) -> AppStatMonitor {
        let config = MonitorConfig {
            cooling_delay_ms: 10,
            ..MonitorConfig::default()
        };
        AppStatMonitor::new(&config, clock.clone(), Scheduler::new("app-stat-test"))
    }

    #[test]
    fn test_app_stat_codes() {
        for stat in [AppStat::Foreground, AppStat::Background, AppStat::ForegroundService] {
            assert_eq!(AppStat::from_key(&stat.key()), Some(stat));
        }
        assert_eq!(AppStat::from_code(9), None);
        assert_eq!(AppStat::Background.to_string(), "bg");
    }

    #[test]
    fn test_merge_rules() {
        use AppStat::{Background as Bg, Foreground as Fg, ForegroundService as Srv};
        assert_eq!(AppStat::merge(Fg, Bg), Fg);
        assert_eq!(AppStat::merge(Bg, Fg), Fg);
        assert_eq!(AppStat::merge(Srv, Srv), Srv);
        assert_eq!(AppStat::merge(Srv, Bg), Bg);
        assert_eq!(AppStat::merge(Bg, Bg), Bg);
    }

    #[test]
    fn test_fg_bg_ratio() {
        let clock = Arc::new(ManualClock::new(1_000));
        let monitor = monitor(&clock);
        monitor.turn_on(AppStat::Foreground, "Launcher");
        clock.advance(6_000);
        monitor.on_foreground(AppStat::Background);
        clock.advance(2_000);

        let snapshot = monitor.current_app_stat_snapshot(0);
        assert!(snapshot.is_valid());
        assert_eq!(snapshot.uptime.get(), 8_000);
        assert_eq!(snapshot.fg_ratio.get(), 75);
        assert_eq!(snapshot.bg_ratio.get(), 25);
        assert_eq!(snapshot.fg_srv_ratio.get(), 0);
        assert_eq!(monitor.current_app_stat(), AppStat::Background);

        let window = monitor.current_app_stat_snapshot(2_000);
        assert_eq!(window.bg_ratio.get(), 100);

        assert!(!monitor.current_app_stat_snapshot(60_000).is_valid());
    }

    #[test]
    fn test_configured_window_applies_to_default_snapshot() {
        let clock = Arc::new(ManualClock::new(0));
        let config = MonitorConfig {
            window_millis: 2_000,
            ..MonitorConfig::default()
        };
        let monitor = AppStatMonitor::new(&config, clock.clone(), Scheduler::new("app-stat-window"));
        monitor.turn_on(AppStat::Foreground, "Main");
        clock.advance(6_000);
        monitor.on_foreground(AppStat::Background);
        clock.advance(2_000);

        let snapshot = monitor.app_stat_snapshot();
        assert!(snapshot.is_valid());
        assert_eq!(snapshot.uptime.get(), 2_000);
        assert_eq!(snapshot.bg_ratio.get(), 100);
        assert_eq!(monitor.current_app_stat_snapshot(0).bg_ratio.get(), 25);
    }

    #[test]
    fn test_scene_portions() {
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(&clock);
        monitor.turn_on(AppStat::Foreground, "Main");
        clock.advance(1_000);
        monitor.on_stat_scene("Chat");
        clock.advance(3_000);

        let portions = monitor.current_scene_portions(0);
        assert_eq!(portions.top1().map(|p| p.key.as_str()), Some("Chat"));
        assert_eq!(portions.get_ratio("Chat"), 75);
        assert_eq!(monitor.current_scene(), "Chat");
    }

    #[test]
    fn test_snapshot_delta() {
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(&clock);
        monitor.turn_on(AppStat::Foreground, "Main");
        clock.advance(1_000);
        let bgn = monitor.current_app_stat_snapshot(0);
        monitor.on_foreground(AppStat::Background);
        clock.advance(1_000);
        let end = monitor.current_app_stat_snapshot(0);

        let delta = end.diff(bgn);
        assert!(delta.is_valid());
        assert_eq!(delta.during, 1_000);
        assert_eq!(delta.dlt.uptime.get(), 1_000);
        assert_eq!(delta.dlt.fg_ratio.get(), -50);
        assert_eq!(delta.dlt.bg_ratio.get(), 50);
        assert_eq!(delta.dlt.fg_srv_ratio.get(), 0);
    }

    #[test]
    fn test_off_ledger_reports_invalid() {
        let clock = Arc::new(ManualClock::new(0));
        let monitor = monitor(&clock);
        monitor.on_foreground(AppStat::Background);
        assert_eq!(monitor.stamp_count(), 0);
        assert!(!monitor.current_app_stat_snapshot(0).is_valid());
        assert_eq!(monitor.current_app_stat(), AppStat::Foreground);
    }

    #[test]
    fn test_overheat_cools_stamp_list() {
        let clock = Arc::new(ManualClock::new(0));
        let scheduler = Scheduler::new("app-stat-cool");
        let config = MonitorConfig {
            overheat_count: 10,
            cooling_delay_ms: 5,
            ..MonitorConfig::default()
        };
        let monitor = AppStatMonitor::new(&config, clock.clone(), scheduler.clone());
        monitor.turn_on(AppStat::Foreground, "Main");
        for i in 0..11 {
            clock.advance(10);
            monitor.on_foreground(if i % 2 == 0 { AppStat::Background } else { AppStat::Foreground });
        }
        assert_eq!(monitor.stamp_count(), 12);

        std::thread::sleep(Duration::from_millis(50));
        scheduler.sync().unwrap();
        assert_eq!(monitor.stamp_count(), 7);
    }
}
