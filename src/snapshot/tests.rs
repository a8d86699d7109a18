// Diff algebra tests

use super::*;

/// Snapshot with one field of every entry shape
#[derive(Debug, Clone)]
struct RadioSnapshot {
    meta: SnapshotMeta,
    wakeups: DigitEntry<i32>,
    rx_bytes: DigitEntry<i64>,
    power_mah: DigitEntry<f64>,
    network: BeanEntry<String>,
    per_core: ListEntry<DigitEntry<i64>>,
}

impl RadioSnapshot {
    fn capture(time: i64, wakeups: i32, rx: i64, mah: f64, network: &str, cores: &[i64]) -> Self {
        RadioSnapshot {
            meta: SnapshotMeta::at(time),
            wakeups: DigitEntry::of(wakeups),
            rx_bytes: DigitEntry::of(rx),
            power_mah: DigitEntry::of(mah),
            network: BeanEntry::of(network.to_string()),
            per_core: ListEntry::of_digits(cores.iter().copied()),
        }
    }
}

impl Snapshot for RadioSnapshot {
    fn meta(&self) -> &SnapshotMeta {
        &self.meta
    }

    fn meta_mut(&mut self) -> &mut SnapshotMeta {
        &mut self.meta
    }

    fn compute_delta(bgn: &Self, end: &Self) -> Self {
        let per_core = ListDiffer::global_diff(&bgn.per_core, &end.per_core);
        let mut meta = SnapshotMeta::at(end.meta.time);
        meta.valid = per_core.len() == bgn.per_core.len();
        RadioSnapshot {
            meta,
            wakeups: DigitDiffer::global_diff(&bgn.wakeups, &end.wakeups),
            rx_bytes: DigitDiffer::global_diff(&bgn.rx_bytes, &end.rx_bytes),
            power_mah: DigitDiffer::global_diff(&bgn.power_mah, &end.power_mah),
            network: BeanDiffer::global_diff(&bgn.network, &end.network),
            per_core,
        }
    }
}

#[test]
fn test_digit_diff_keeps_type_and_sign() {
    let dlt = DigitDiffer::global_diff(&DigitEntry::of(7_i32), &DigitEntry::of(3_i32));
    let value: i32 = dlt.get();
    assert_eq!(value, -4);
    assert!(dlt.is_valid());

    let dlt = DigitDiffer::global_diff(&DigitEntry::of(0.25_f64), &DigitEntry::of(1.0_f64));
    assert!((dlt.get() - 0.75).abs() < f64::EPSILON);
}

#[test]
fn test_digit_diff_wraps_instead_of_overflowing() {
    let dlt = DigitDiffer::global_diff(&DigitEntry::of(i64::MIN), &DigitEntry::of(1_i64));
    assert_eq!(dlt.get(), 1_i64.wrapping_sub(i64::MIN));
}

#[test]
fn test_digit_diff_propagates_invalid() {
    let bgn = DigitEntry::of(1_i64).invalidated();
    let end = DigitEntry::of(5_i64);
    assert!(!DigitDiffer::global_diff(&bgn, &end).is_valid());
    assert!(!DigitDiffer::global_diff(&end, &bgn).is_valid());
}

#[test]
fn test_list_diff_aligns_by_index() {
    let bgn = ListEntry::of_digits([1_i64, 2, 3]);
    let end = ListEntry::of_digits([4_i64, 4, 4]);
    let dlt = ListDiffer::global_diff(&bgn, &end);
    assert_eq!(dlt.values(), vec![3, 2, 1]);
    assert!(dlt.is_valid());
}

#[test]
fn test_list_diff_shorter_bgn_flags_extra_items() {
    let bgn = ListEntry::of_digits([1_i64, 2]);
    let end = ListEntry::of_digits([4_i64, 4, 4]);
    let dlt = ListDiffer::global_diff(&bgn, &end);

    assert_eq!(dlt.values(), vec![3, 2, 4]);
    assert!(dlt.items()[0].is_valid());
    assert!(dlt.items()[1].is_valid());
    assert!(!dlt.items()[2].is_valid());
    assert!(!dlt.is_valid());
}

#[test]
fn test_list_diff_longer_bgn_ignores_tail() {
    let bgn = ListEntry::of_digits([1_i64, 2, 3, 4]);
    let end = ListEntry::of_digits([5_i64, 5]);
    let dlt = ListDiffer::global_diff(&bgn, &end);
    assert_eq!(dlt.values(), vec![4, 3]);
}

#[test]
fn test_list_diff_invalid_list_flag_propagates() {
    let bgn = ListEntry::of_digits([1_i64]).invalidated();
    let end = ListEntry::of_digits([2_i64]);
    let dlt = ListDiffer::global_diff(&bgn, &end);
    assert_eq!(dlt.values(), vec![1]);
    assert!(!dlt.is_valid());
}

#[test]
fn test_bean_diff_reports_change() {
    let wifi = BeanEntry::of("wifi".to_string());
    let lte = BeanEntry::of("lte".to_string());

    let same = BeanDiffer::global_diff(&wifi, &wifi.clone());
    assert!(same.is_empty());
    assert!(same.is_valid());

    let changed = BeanDiffer::global_diff(&wifi, &lte);
    assert_eq!(changed.get().map(String::as_str), Some("lte"));
}

#[test]
fn test_diff_beans_is_set_difference() {
    let bgn = ListEntry::of_beans(["a".to_string(), "b".to_string()]);
    let end = ListEntry::of_beans(["b".to_string(), "c".to_string(), "d".to_string()]);
    let dlt = ListDiffer::diff_beans(&bgn, &end);
    let added: Vec<&str> = dlt.items().iter().filter_map(|b| b.get()).map(String::as_str).collect();
    assert_eq!(added, vec!["c", "d"]);
}

#[test]
fn test_diff_keyed_survives_reordering() {
    // [core id, ticks]
    let core = |id: i64, ticks: i64| ListEntry::of_digits([id, ticks]);
    let bgn = ListEntry::of(vec![core(0, 100), core(1, 200)]);
    let end = ListEntry::of(vec![core(1, 260), core(0, 130), core(2, 50)]);

    let dlt = ListDiffer::diff_keyed(&bgn, &end, |c| c.items().first().map(DigitEntry::get));

    assert_eq!(dlt.len(), 3);
    assert_eq!(dlt.items()[0].values(), vec![0, 60]);
    assert_eq!(dlt.items()[1].values(), vec![0, 30]);
    assert!(dlt.items()[0].is_valid());
    assert!(!dlt.items()[2].is_valid());
}

#[test]
fn test_snapshot_diff_self_is_zero() {
    let snapshot = RadioSnapshot::capture(1_000, 12, 4_096, 3.5, "wifi", &[10, 20, 30]);
    let delta = snapshot.clone().diff(snapshot);

    assert!(delta.dlt.is_delta());
    assert!(delta.is_valid());
    assert_eq!(delta.during, 0);
    assert_eq!(delta.dlt.wakeups.get(), 0);
    assert_eq!(delta.dlt.rx_bytes.get(), 0);
    assert_eq!(delta.dlt.power_mah.get(), 0.0);
    assert!(delta.dlt.network.is_empty());
    assert_eq!(delta.dlt.per_core.values(), vec![0, 0, 0]);
}

#[test]
fn test_snapshot_diff_every_field() {
    let bgn = RadioSnapshot::capture(1_000, 12, 4_096, 3.5, "wifi", &[10, 20]);
    let end = RadioSnapshot::capture(4_000, 15, 5_000, 4.0, "lte", &[15, 26]);
    let delta = end.diff(bgn);

    assert_eq!(delta.during, 3_000);
    assert_eq!(delta.dlt.time(), 4_000);
    assert_eq!(delta.dlt.wakeups.get(), 3);
    assert_eq!(delta.dlt.rx_bytes.get(), 904);
    assert!((delta.dlt.power_mah.get() - 0.5).abs() < 1e-9);
    assert_eq!(delta.dlt.network.get().map(String::as_str), Some("lte"));
    assert_eq!(delta.dlt.per_core.values(), vec![5, 6]);
    assert!(!delta.bgn.is_delta());
    assert!(!delta.end.is_delta());
}

#[test]
fn test_snapshot_shape_mismatch_marks_invalid() {
    let bgn = RadioSnapshot::capture(0, 0, 0, 0.0, "wifi", &[1]);
    let end = RadioSnapshot::capture(10, 0, 0, 0.0, "wifi", &[1, 2]);
    let delta = end.diff(bgn);
    assert!(!delta.dlt.is_valid());
    assert!(!delta.is_valid());
}

#[test]
fn test_backwards_time_clamps_during() {
    let bgn = RadioSnapshot::capture(5_000, 0, 0, 0.0, "wifi", &[]);
    let end = RadioSnapshot::capture(1_000, 1, 0, 0.0, "wifi", &[]);
    let delta = end.diff(bgn);
    assert_eq!(delta.during, 0);
    assert!(!delta.is_valid());
}

#[test]
fn test_extreme_times_saturate() {
    let bgn = RadioSnapshot::capture(i64::MIN, 0, 0, 0.0, "wifi", &[]);
    let end = RadioSnapshot::capture(i64::MAX, 0, 0, 0.0, "wifi", &[]);
    let delta = end.clone().diff(bgn.clone());
    assert_eq!(delta.during, i64::MAX);
    assert!(delta.is_valid());

    let backwards = bgn.diff(end);
    assert_eq!(backwards.during, 0);
    assert!(!backwards.is_valid());
}

#[test]
fn test_invalid_end_snapshot_invalidates_delta() {
    let bgn = RadioSnapshot::capture(0, 0, 0, 0.0, "wifi", &[]);
    let mut end = RadioSnapshot::capture(10, 0, 0, 0.0, "wifi", &[]);
    end.set_valid(false);
    let delta = end.diff(bgn);
    assert!(!delta.dlt.is_valid());
    assert!(!delta.is_valid());
}
