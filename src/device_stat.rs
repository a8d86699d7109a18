//! Device state ledger and device-level snapshots
//!
//! Tracks charging / screen-off / power-save transitions the same way the
//! app ledger tracks foreground state, and defines the snapshot kinds for
//! device counters (CPU frequencies, radio traffic, battery temperature).
//! Reading those counters from the platform is left to the caller.

use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::scheduler::{Debouncer, Scheduler};
use crate::snapshot::{DigitDiffer, DigitEntry, ListDiffer, ListEntry, Snapshot, SnapshotMeta};
use crate::time_breaker::{Stamp, StampLedger, TimePortions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevStat {
    Charging = 1,
    Discharging = 2,
    ScreenOff = 3,
    PowerSave = 4,
}

impl DevStat {
    pub fn code(self) -> i32 {
        self as i32
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(DevStat::Charging),
            2 => Some(DevStat::Discharging),
            3 => Some(DevStat::ScreenOff),
            4 => Some(DevStat::PowerSave),
            _ => None,
        }
    }

    pub fn key(self) -> String {
        self.code().to_string()
    }

    pub fn from_key(key: &str) -> Option<Self> {
        key.parse().ok().and_then(Self::from_code)
    }

    /// Collapse raw device flags; charging outranks screen-off, which
    /// outranks power-save
    pub fn from_flags(charging: bool, screen_off: bool, power_save: bool) -> Self {
        if charging {
            DevStat::Charging
        } else if screen_off {
            DevStat::ScreenOff
        } else if power_save {
            DevStat::PowerSave
        } else {
            DevStat::Discharging
        }
    }

    /// Summarize the state across a task's start and end
    ///
    /// Charging at either end wins; screen-off and power-save need both ends.
    pub fn merge(bgn: DevStat, end: DevStat) -> DevStat {
        if bgn == DevStat::Charging || end == DevStat::Charging {
            DevStat::Charging
        } else if bgn == end && matches!(bgn, DevStat::ScreenOff | DevStat::PowerSave) {
            bgn
        } else {
            DevStat::Discharging
        }
    }
}

impl fmt::Display for DevStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DevStat::Charging => "charging",
            DevStat::Discharging => "discharging",
            DevStat::ScreenOff => "screenOff",
            DevStat::PowerSave => "powerSave",
        };
        f.write_str(name)
    }
}

/// Charging and screen-off split of a window, in percent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevStatSnapshot {
    pub meta: SnapshotMeta,
    pub uptime: DigitEntry<i64>,
    pub charging_ratio: DigitEntry<i64>,
    pub screen_off_ratio: DigitEntry<i64>,
}

impl DevStatSnapshot {
    pub fn from_portions(portions: &TimePortions, time: i64) -> Self {
        let ratio = |stat: DevStat| DigitEntry::of(i64::from(portions.get_ratio(&stat.key())));
        let mut meta = SnapshotMeta::at(time);
        meta.valid = portions.is_valid();
        DevStatSnapshot {
            meta,
            uptime: DigitEntry::of(portions.total_uptime),
            charging_ratio: ratio(DevStat::Charging),
            screen_off_ratio: ratio(DevStat::ScreenOff),
        }
    }

    pub fn invalid(time: i64) -> Self {
        Self::from_portions(&TimePortions::invalid(), time)
    }
}

impl Snapshot for DevStatSnapshot {
    fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SnapshotMeta {
        &mut self.meta
    }

    fn compute_delta(bgn: &Self, end: &Self) -> Self {
        DevStatSnapshot {
            meta: SnapshotMeta::at(end.meta.time),
            uptime: DigitDiffer::global_diff(&bgn.uptime, &end.uptime),
            charging_ratio: DigitDiffer::global_diff(&bgn.charging_ratio, &end.charging_ratio),
            screen_off_ratio: DigitDiffer::global_diff(&bgn.screen_off_ratio, &end.screen_off_ratio),
        }
    }
}

/// Current frequency of every CPU core, in kHz
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuFreqSnapshot {
    pub meta: SnapshotMeta,
    pub cpu_freqs: ListEntry<DigitEntry<i32>>,
}

impl CpuFreqSnapshot {
    pub fn new(time: i64, freqs: &[i32]) -> Self {
        CpuFreqSnapshot {
            meta: SnapshotMeta::at(time),
            cpu_freqs: ListEntry::of_digits(freqs.iter().copied()),
        }
    }
}

impl Snapshot for CpuFreqSnapshot {
    fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SnapshotMeta {
        &mut self.meta
    }

    fn compute_delta(bgn: &Self, end: &Self) -> Self {
        let mut meta = SnapshotMeta::at(end.meta.time);
        // a core went on/offline between samples
        meta.valid = bgn.cpu_freqs.len() == end.cpu_freqs.len();
        CpuFreqSnapshot {
            meta,
            cpu_freqs: ListDiffer::global_diff(&bgn.cpu_freqs, &end.cpu_freqs),
        }
    }
}

/// Cumulative network traffic counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RadioStatSnapshot {
    pub meta: SnapshotMeta,
    pub wifi_rx_bytes: DigitEntry<i64>,
    pub wifi_tx_bytes: DigitEntry<i64>,
    pub mobile_rx_bytes: DigitEntry<i64>,
    pub mobile_tx_bytes: DigitEntry<i64>,
}

impl Snapshot for RadioStatSnapshot {
    fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SnapshotMeta {
        &mut self.meta
    }

    fn compute_delta(bgn: &Self, end: &Self) -> Self {
        RadioStatSnapshot {
            meta: SnapshotMeta::at(end.meta.time),
            wifi_rx_bytes: DigitDiffer::global_diff(&bgn.wifi_rx_bytes, &end.wifi_rx_bytes),
            wifi_tx_bytes: DigitDiffer::global_diff(&bgn.wifi_tx_bytes, &end.wifi_tx_bytes),
            mobile_rx_bytes: DigitDiffer::global_diff(&bgn.mobile_rx_bytes, &end.mobile_rx_bytes),
            mobile_tx_bytes: DigitDiffer::global_diff(&bgn.mobile_tx_bytes, &end.mobile_tx_bytes),
        }
    }
}

/// Battery temperature in tenths of a degree Celsius
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatteryTmpSnapshot {
    pub meta: SnapshotMeta,
    pub temp: DigitEntry<i32>,
}

impl Snapshot for BatteryTmpSnapshot {
    fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SnapshotMeta {
        &mut self.meta
    }

    fn compute_delta(bgn: &Self, end: &Self) -> Self {
        BatteryTmpSnapshot {
            meta: SnapshotMeta::at(end.meta.time),
            temp: DigitDiffer::global_diff(&bgn.temp, &end.temp),
        }
    }
}

/// Stamp ledger of device state
pub struct DevStatMonitor {
    clock: Arc<dyn Clock>,
    stamps: Arc<StampLedger>,
    overheat_count: usize,
    window_millis: i64,
    cooling: Debouncer,
}

impl DevStatMonitor {
    pub fn new(config: &MonitorConfig, clock: Arc<dyn Clock>, scheduler: Scheduler) -> Self {
        DevStatMonitor {
            clock,
            stamps: Arc::new(StampLedger::new()),
            overheat_count: config.overheat_count,
            window_millis: config.window_millis,
            cooling: Debouncer::new(scheduler, Duration::from_millis(config.cooling_delay_ms)),
        }
    }

    pub fn turn_on(&self, stat: DevStat) {
        self.stamps.turn_on(Stamp::now(stat.key(), self.clock.as_ref()));
        tracing::debug!("device stat ledger on: {}", stat);
    }

    pub fn turn_off(&self) {
        let _ = self.cooling.cancel();
        self.stamps.turn_off();
    }

    pub fn on_dev_stat(&self, stat: DevStat) {
        let Some(len) = self.stamps.push(Stamp::now(stat.key(), self.clock.as_ref())) else {
            return;
        };
        if len < self.overheat_count {
            return;
        }
        if len >= self.overheat_count * 2 {
            self.stamps.gc_over(self.overheat_count);
            return;
        }
        let stamps = Arc::clone(&self.stamps);
        let threshold = self.overheat_count;
        if let Err(e) = self.cooling.trigger(move || {
            stamps.gc_over(threshold);
        }) {
            tracing::warn!("device stat cooling not scheduled: {}", e);
        }
    }

    /// Latest recorded state, discharging until told otherwise
    pub fn current_dev_stat(&self) -> DevStat {
        self.stamps
            .newest()
            .and_then(|s| DevStat::from_key(&s.key))
            .unwrap_or(DevStat::Discharging)
    }

    pub fn current_dev_stat_snapshot(&self, window_millis: i64) -> DevStatSnapshot {
        let portions = self.stamps.portions(window_millis, self.clock.as_ref());
        DevStatSnapshot::from_portions(&portions, self.clock.uptime_millis())
    }

    /// Device state split over the configured window
    pub fn dev_stat_snapshot(&self) -> DevStatSnapshot {
        self.current_dev_stat_snapshot(self.window_millis)
    }

    pub fn stamp_count(&self) -> usize {
        self.stamps.len()
    }
}
