// Subtraction algebra over entries
//
// Diffing never fails: mismatched validity or shape yields an entry flagged
// invalid, never an error.

use super::entry::{BeanEntry, Digit, DigitEntry, Entry, ListEntry};
use std::collections::HashMap;
use std::hash::Hash;

/// Entries that know how to subtract a begin value from an end value
pub trait Diffable: Entry {
    fn diff(bgn: &Self, end: &Self) -> Self;
}

/// Numeric subtraction, `end - bgn`, with no clamping
pub struct DigitDiffer;

impl DigitDiffer {
    /// # Example
    /// ```
    /// use jiffies_ledger::snapshot::{DigitDiffer, DigitEntry, Entry};
    ///
    /// let dlt = DigitDiffer::global_diff(&DigitEntry::of(10_i64), &DigitEntry::of(4_i64));
    /// assert_eq!(dlt.get(), -6);
    /// assert!(dlt.is_valid());
    /// ```
    pub fn global_diff<N: Digit>(bgn: &DigitEntry<N>, end: &DigitEntry<N>) -> DigitEntry<N> {
        let mut dlt = DigitEntry::of(end.get().minus(bgn.get()));
        dlt.set_valid(bgn.is_valid() && end.is_valid());
        dlt
    }
}

/// "Did it change, and to what": empty sentinel when equal, `end` otherwise
pub struct BeanDiffer;

impl BeanDiffer {
    pub fn global_diff<T: Clone + PartialEq>(bgn: &BeanEntry<T>, end: &BeanEntry<T>) -> BeanEntry<T> {
        let mut dlt = if bgn == end {
            BeanEntry::empty()
        } else {
            end.clone()
        };
        dlt.set_valid(bgn.is_valid() && end.is_valid());
        dlt
    }
}

/// Element-wise list subtraction
pub struct ListDiffer;

impl ListDiffer {
    /// Diff by positional index
    ///
    /// Elements of `end` beyond the length of `bgn` have nothing to be diffed
    /// against: they are copied through and flagged invalid. Elements of `bgn`
    /// beyond the length of `end` are ignored.
    pub fn global_diff<E: Diffable>(bgn: &ListEntry<E>, end: &ListEntry<E>) -> ListEntry<E> {
        let items = end
            .items()
            .iter()
            .enumerate()
            .map(|(i, end_item)| match bgn.items().get(i) {
                Some(bgn_item) => E::diff(bgn_item, end_item),
                None => end_item.clone().invalidated(),
            })
            .collect();
        Self::finish(bgn, end, items)
    }

    /// Diff by key instead of position
    ///
    /// Robust against reordering between samples (e.g. CPU cores coming back
    /// online in a different order). End items with no begin counterpart are
    /// flagged invalid, the same as the positional policy.
    pub fn diff_keyed<E, K, F>(bgn: &ListEntry<E>, end: &ListEntry<E>, key: F) -> ListEntry<E>
    where
        E: Diffable,
        K: Eq + Hash,
        F: Fn(&E) -> K,
    {
        let index: HashMap<K, &E> = bgn.items().iter().map(|item| (key(item), item)).collect();
        let items = end
            .items()
            .iter()
            .map(|end_item| match index.get(&key(end_item)) {
                Some(bgn_item) => E::diff(bgn_item, end_item),
                None => end_item.clone().invalidated(),
            })
            .collect();
        Self::finish(bgn, end, items)
    }

    /// Beans present in `end` but equal to no bean in `bgn`
    pub fn diff_beans<T: Clone + PartialEq>(
        bgn: &ListEntry<BeanEntry<T>>,
        end: &ListEntry<BeanEntry<T>>,
    ) -> ListEntry<BeanEntry<T>> {
        let items = end
            .items()
            .iter()
            .filter(|end_item| {
                !bgn
                    .items()
                    .iter()
                    .any(|bgn_item| BeanDiffer::global_diff(bgn_item, end_item).is_empty())
            })
            .cloned()
            .collect();
        Self::finish(bgn, end, items)
    }

    fn finish<E: Entry>(bgn: &ListEntry<E>, end: &ListEntry<E>, items: Vec<E>) -> ListEntry<E> {
        let mut dlt = ListEntry::of(items);
        // list-level flag only; element flags are already set
        dlt.set_valid(bgn.own_valid() && end.own_valid());
        dlt
    }
}

impl<N: Digit> Diffable for DigitEntry<N> {
    fn diff(bgn: &Self, end: &Self) -> Self {
        DigitDiffer::global_diff(bgn, end)
    }
}

impl<T: Clone + PartialEq> Diffable for BeanEntry<T> {
    fn diff(bgn: &Self, end: &Self) -> Self {
        BeanDiffer::global_diff(bgn, end)
    }
}

impl<E: Diffable> Diffable for ListEntry<E> {
    fn diff(bgn: &Self, end: &Self) -> Self {
        ListDiffer::global_diff(bgn, end)
    }
}
