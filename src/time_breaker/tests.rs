// Portioning tests over fixed timelines

use super::*;
use crate::clock::ManualClock;

const SEC: i64 = 1000;

/// Newest-first 400s timeline: 1@0, 2@100, 1@200, 3@300, plus `newest` on top
fn timeline(base: i64, newest: Option<&str>) -> Vec<Stamp> {
    let mut stamps = Vec::new();
    for (key, offset) in [("1", 0), ("2", 100), ("1", 200), ("3", 300)] {
        stamps.insert(0, Stamp::new(key, base + offset * SEC));
    }
    if let Some(key) = newest {
        stamps.insert(0, Stamp::new(key, base + 400 * SEC));
    }
    stamps
}

fn portions_at(stamps: &[Stamp], window: i64, now: i64) -> TimePortions {
    configure_portions_with(stamps, window, DEFAULT_CURRENT_STAMP_DELTA, || {
        Stamp::new(CURR_STAMP, now)
    })
}

#[test]
fn test_full_history_without_current_stamp() {
    // newest stamp is already "now"
    let stamps = timeline(10_000, Some("1"));
    let now = 10_000 + 400 * SEC;

    for window in [0, i64::MIN] {
        let p = portions_at(&stamps, window, now);
        assert_eq!(p.total_uptime, 400 * SEC);
        assert_eq!(p.get_ratio("1"), 50);
        assert_eq!(p.get_ratio("2"), 25);
        assert_eq!(p.get_ratio("3"), 25);
        assert_eq!(p.top1().map(|t| t.key.as_str()), Some("1"));
        assert!(p.is_valid());
        assert!(p.portion(CURR_STAMP).is_none());
    }
}

#[test]
fn test_full_history_with_current_stamp() {
    // last real stamp is 100s old, the current stamp closes segment "3"
    let stamps = timeline(10_000, None);
    let p = portions_at(&stamps, 0, 10_000 + 400 * SEC);

    assert_eq!(p.total_uptime, 400 * SEC);
    assert_eq!(p.get_ratio("1"), 50);
    assert_eq!(p.get_ratio("2"), 25);
    assert_eq!(p.get_ratio("3"), 25);
    assert!(p.is_valid());
}

#[test]
fn test_window_clipping() {
    let stamps = timeline(0, Some("1"));
    let now = 400 * SEC;

    let cases: [(i64, i64, [i32; 3]); 7] = [
        // window, total, ratios of "1", "2", "3"
        (50, 50, [0, 0, 100]),
        (100, 100, [0, 0, 100]),
        (150, 150, [33, 0, 67]),
        (200, 200, [50, 0, 50]),
        (250, 250, [40, 20, 40]),
        (350, 350, [43, 29, 29]),
        (400, 400, [50, 25, 25]),
    ];
    for (window, total, [r1, r2, r3]) in cases {
        let p = portions_at(&stamps, window * SEC, now);
        assert_eq!(p.total_uptime, total * SEC, "window {}s", window);
        assert_eq!(p.get_ratio("1"), r1, "window {}s", window);
        assert_eq!(p.get_ratio("2"), r2, "window {}s", window);
        assert_eq!(p.get_ratio("3"), r3, "window {}s", window);
        assert!(p.is_valid(), "window {}s", window);
    }
}

#[test]
fn test_window_larger_than_history_is_invalid() {
    let stamps = timeline(0, Some("1"));
    for window in [500 * SEC, i64::MAX] {
        let p = portions_at(&stamps, window, 400 * SEC);
        assert_eq!(p.total_uptime, 400 * SEC);
        assert_eq!(p.get_ratio("1"), 50);
        assert!(!p.is_valid());
    }
}

#[test]
fn test_jiffies_window_partial_segment() {
    let stamps = vec![
        Stamp::new("4", 181),
        Stamp::new("3", 149),
        Stamp::new("2", 100),
        Stamp::new("1", 0),
    ];
    let p = configure_portions_with(&stamps, 40, 10, || Stamp::new("4", 181));

    assert_eq!(p.total_uptime, 40);
    assert_eq!(p.portions.len(), 2);
    assert!(p.portions.iter().all(|item| item.total_millis > 0));
    assert_eq!(p.portion("3").map(|x| x.total_millis), Some(32));
    assert_eq!(p.portion("2").map(|x| x.total_millis), Some(8));
    assert_eq!(p.get_ratio("3"), 80);
    assert_eq!(p.get_ratio("2"), 20);
    assert!(p.is_valid());
}

#[test]
fn test_portions_sum_to_total() {
    let stamps = vec![
        Stamp::new("A", 300),
        Stamp::new("B", 200),
        Stamp::new("C", 100),
        Stamp::new("A", 0),
    ];
    let p = portions_at(&stamps, 0, 300);
    assert_eq!(p.total_uptime, 300);
    let covered: i64 = p.portions.iter().map(|x| x.total_millis).sum();
    assert_eq!(covered, 300);
    let ratio_sum: i32 = p.portions.iter().map(|x| x.ratio).sum();
    assert!((99..=101).contains(&ratio_sum));

    let p = portions_at(&stamps, 150, 300);
    assert_eq!(p.total_uptime, 150);
    assert_eq!(p.portion("B").map(|x| x.total_millis), Some(100));
    assert_eq!(p.portion("C").map(|x| x.total_millis), Some(50));
    assert!(p.portion("A").is_none());
}

#[test]
fn test_corrupt_order_stops_accumulation() {
    let stamps = vec![
        Stamp::new("A", 300),
        Stamp::new("B", 200),
        Stamp::new("C", 250),
        Stamp::new("D", 0),
    ];
    let p = portions_at(&stamps, 0, 300);
    assert_eq!(p.total_uptime, 100);
    assert_eq!(p.get_ratio("B"), 100);
    assert!(p.portion("D").is_none());
    assert!(p.is_valid());
}

#[test]
fn test_empty_and_single_stamp() {
    assert!(!portions_at(&[], 0, 1_000).is_valid());

    // a lone fresh stamp covers nothing
    let single = vec![Stamp::new("A", 1_000)];
    let p = portions_at(&single, 0, 1_005);
    assert_eq!(p.total_uptime, 0);
    assert!(!p.is_valid());

    // a lone old stamp is closed by the current stamp
    let p = portions_at(&single, 0, 2_000);
    assert_eq!(p.total_uptime, 1_000);
    assert_eq!(p.get_ratio("A"), 100);
    assert!(p.is_valid());
}

#[test]
fn test_top2_and_missing_key() {
    let stamps = timeline(0, Some("1"));
    let p = portions_at(&stamps, 0, 400 * SEC);
    assert_eq!(p.top1().map(|t| t.ratio), Some(50));
    assert_eq!(p.top2().map(|t| t.ratio), Some(25));
    assert_eq!(p.get_ratio("nope"), 0);
    assert!(TimePortions::invalid().top1().is_none());
}

#[test]
fn test_configure_portions_reads_clock() {
    let clock = ManualClock::new(5_000);
    let stamps = vec![Stamp::new("fg", 4_000), Stamp::new("bg", 3_000)];
    let p = configure_portions(&stamps, 0, &clock);
    assert_eq!(p.total_uptime, 2_000);
    assert_eq!(p.get_ratio("fg"), 50);
    assert_eq!(p.get_ratio("bg"), 50);
}

#[test]
fn test_gc_list_sizes() {
    let mut empty: Vec<Stamp> = Vec::new();
    gc_list(&mut empty);
    assert!(empty.is_empty());

    for n in [1usize, 2, 3, 4, 5, 10, 100, 1024, 2333, 65535] {
        let mut list: Vec<Stamp> = (0..n).rev().map(|i| Stamp::new(i.to_string(), i as i64)).collect();
        gc_list(&mut list);
        assert_eq!(list.len(), n - n / 2 + usize::from(n % 2 == 0), "n = {}", n);
        assert_eq!(list.len(), n / 2 + 1, "n = {}", n);
        assert_eq!(list.last().map(|s| s.key.as_str()), Some("0"));
        assert_eq!(list[0].key, (n - 1).to_string());
    }
}

#[test]
fn test_ledger_ignores_pushes_while_off() {
    let ledger = StampLedger::new();
    assert_eq!(ledger.push(Stamp::new("fg", 1)), None);
    assert!(ledger.is_empty());
    assert!(!ledger.portions(0, &ManualClock::new(100)).is_valid());

    ledger.turn_on(Stamp::new("fg", 0));
    assert_eq!(ledger.push(Stamp::new("bg", 600)), Some(2));
    assert_eq!(ledger.newest().map(|s| s.key), Some("bg".to_string()));

    ledger.turn_off();
    assert!(!ledger.is_on());
    assert_eq!(ledger.len(), 0);
}

#[test]
fn test_ledger_portions_and_gc() {
    let clock = ManualClock::new(0);
    let ledger = StampLedger::new();
    ledger.turn_on(Stamp::now("1", &clock));
    clock.advance(3_000);
    ledger.push(Stamp::now("2", &clock));
    clock.advance(1_000);

    let p = ledger.portions(0, &clock);
    assert_eq!(p.total_uptime, 4_000);
    assert_eq!(p.get_ratio("1"), 75);
    assert_eq!(p.get_ratio("2"), 25);

    for i in 0..8 {
        ledger.push(Stamp::new("2", 5_000 + i));
    }
    assert!(!ledger.gc_over(20));
    assert!(ledger.gc_over(10));
    assert_eq!(ledger.len(), 6);
    assert_eq!(ledger.stamps().and_then(|s| s.last().cloned()).map(|s| s.key), Some("1".to_string()));
}
