#![no_main]

use jiffies_ledger::time_breaker::{configure_portions_with, Stamp, CURR_STAMP};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes that happen to be a JSON stamp list
    if let Ok(stamps) = serde_json::from_slice::<Vec<Stamp>>(data) {
        let now = stamps.first().map_or(0, |s| s.up_time.saturating_add(1000));
        for window in [0, 1, 150, i64::MAX, -1] {
            // Must never panic, whatever order or magnitude the stamps have
            let portions = configure_portions_with(&stamps, window, 10, || Stamp::new(CURR_STAMP, now));
            assert!(portions.portions.iter().all(|p| (0..=100).contains(&p.ratio)));
        }
    }
});
