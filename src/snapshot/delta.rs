// Point-in-time measurement bundles and their pairwise difference

use serde::{Deserialize, Serialize};

/// Bookkeeping every snapshot carries next to its entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotMeta {
    /// Uptime millis at capture
    pub time: i64,
    /// True for computed deltas, false for raw captures
    pub is_delta: bool,
    pub valid: bool,
}

impl SnapshotMeta {
    pub fn at(time: i64) -> Self {
        SnapshotMeta {
            time,
            is_delta: false,
            valid: true,
        }
    }
}

impl Default for SnapshotMeta {
    fn default() -> Self {
        Self::at(0)
    }
}

/// A bundle of entries captured at one instant
///
/// Implementors diff every field explicitly in [`Snapshot::compute_delta`]
/// using the [`Differ`](super::DigitDiffer) helpers. There is no derive: a
/// field left out of `compute_delta` simply keeps whatever the implementation
/// wrote for it, so each implementation carries a test that builds two
/// snapshots differing in every field and checks every field of the delta.
pub trait Snapshot: Clone + Sized {
    fn meta(&self) -> &SnapshotMeta;

    fn meta_mut(&mut self) -> &mut SnapshotMeta;

    /// Field-by-field `end - bgn`
    fn compute_delta(bgn: &Self, end: &Self) -> Self;

    fn time(&self) -> i64 {
        self.meta().time
    }

    fn is_delta(&self) -> bool {
        self.meta().is_delta
    }

    fn is_valid(&self) -> bool {
        self.meta().valid
    }

    fn set_valid(&mut self, valid: bool) {
        self.meta_mut().valid = valid;
    }

    /// Pair this (end) snapshot with an earlier one
    fn diff(self, bgn: Self) -> Delta<Self> {
        Delta::new(bgn, self)
    }
}

/// Two snapshots of one kind and their difference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delta<S> {
    pub bgn: S,
    pub end: S,
    pub dlt: S,
    /// `end.time - bgn.time`, never negative
    pub during: i64,
}

impl<S: Snapshot> Delta<S> {
    pub fn new(bgn: S, end: S) -> Self {
        let raw_during = end.time().saturating_sub(bgn.time());
        let mut dlt = S::compute_delta(&bgn, &end);
        {
            let meta = dlt.meta_mut();
            meta.is_delta = true;
            meta.time = end.time();
        }
        if !bgn.is_valid() || !end.is_valid() {
            dlt.set_valid(false);
        }
        if raw_during < 0 {
            tracing::warn!(
                "snapshot time went backwards: bgn={} end={}",
                bgn.time(),
                end.time()
            );
            dlt.set_valid(false);
        }
        Delta {
            bgn,
            end,
            dlt,
            during: raw_during.max(0),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.bgn.is_valid() && self.end.is_valid() && self.dlt.is_valid()
    }
}
