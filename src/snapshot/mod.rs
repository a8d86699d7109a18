//! Snapshot / Delta / Differ algebra
//!
//! A [`Snapshot`] is a bundle of measured [`Entry`] values captured at one
//! uptime instant. Two snapshots of the same kind combine into a [`Delta`]
//! holding both ends plus their difference, computed field by field with
//! the differ helpers:
//!
//! - [`DigitDiffer`]: numeric `end - bgn`, negative results preserved
//! - [`BeanDiffer`]: empty sentinel when unchanged, `end` otherwise
//! - [`ListDiffer`]: element-wise, by position or by key
//!
//! Diffing never fails. Invalid inputs or mismatched shapes yield results
//! flagged invalid.

mod delta;
mod differ;
mod entry;

pub use delta::{Delta, Snapshot, SnapshotMeta};
pub use differ::{BeanDiffer, Diffable, DigitDiffer, ListDiffer};
pub use entry::{BeanEntry, Digit, DigitEntry, Entry, ListEntry};

#[cfg(test)]
mod tests;
