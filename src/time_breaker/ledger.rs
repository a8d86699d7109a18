// Lock-guarded stamp list with an on/off switch

use super::portions::{configure_portions, TimePortions};
use super::stamp::{gc_list, Stamp};
use crate::clock::Clock;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Newest-first stamp list shared between event sources and readers
///
/// A ledger starts switched off and ignores pushes until [`turn_on`]
/// seeds it with a first stamp.
///
/// [`turn_on`]: StampLedger::turn_on
#[derive(Debug, Default)]
pub struct StampLedger {
    stamps: Mutex<Option<Vec<Stamp>>>,
}

impl StampLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Vec<Stamp>>> {
        self.stamps.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start recording, discarding any previous history
    pub fn turn_on(&self, first: Stamp) {
        *self.lock() = Some(vec![first]);
    }

    pub fn turn_off(&self) {
        *self.lock() = None;
    }

    pub fn is_on(&self) -> bool {
        self.lock().is_some()
    }

    /// Record a stamp as the newest entry
    ///
    /// Returns the new length, or `None` while switched off.
    pub fn push(&self, stamp: Stamp) -> Option<usize> {
        let mut guard = self.lock();
        let stamps = guard.as_mut()?;
        stamps.insert(0, stamp);
        Some(stamps.len())
    }

    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn newest(&self) -> Option<Stamp> {
        self.lock().as_ref().and_then(|s| s.first().cloned())
    }

    /// Copy of the current list, newest first
    pub fn stamps(&self) -> Option<Vec<Stamp>> {
        self.lock().clone()
    }

    /// Halve the list if it reached `threshold`; returns whether it did
    pub fn gc_over(&self, threshold: usize) -> bool {
        let mut guard = self.lock();
        match guard.as_mut() {
            Some(stamps) if stamps.len() >= threshold => {
                let before = stamps.len();
                gc_list(stamps);
                tracing::debug!("stamp ledger cooled: {} -> {}", before, stamps.len());
                true
            }
            _ => false,
        }
    }

    /// Portion the recorded history, closing it at the clock's current time
    pub fn portions(&self, window_millis: i64, clock: &dyn Clock) -> TimePortions {
        // portion outside the lock
        match self.stamps() {
            Some(stamps) => configure_portions(&stamps, window_millis, clock),
            None => TimePortions::invalid(),
        }
    }
}
