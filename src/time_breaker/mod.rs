// Stamp portioning
//
// Reconstructs how a continuous timeline was split among states using only a
// sparse newest-first list of state-change stamps. The same walk serves
// uptime stamps (foreground/background, scene, charging) and jiffies stamps
// (which task a thread was running as its CPU counter advanced).
//
// A stamp `(X, T)` means "state became X at T", so the interval up to the next
// newer stamp belongs to X. A synthetic current stamp closes the newest state.

mod ledger;
mod portions;
mod stamp;

pub use ledger::StampLedger;
pub use portions::{configure_portions, configure_portions_with, Portion, TimePortions};
pub use stamp::{gc_list, Stamp, CURR_STAMP, DEFAULT_CURRENT_STAMP_DELTA};

#[cfg(test)]
mod tests;
