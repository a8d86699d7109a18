// Per-name count of tasks in flight

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct Working {
    identities: Vec<u64>,
    since: i64,
}

/// In-flight identities grouped by task name
#[derive(Debug, Default)]
pub(crate) struct ConcurrentTrace {
    tasks: Mutex<HashMap<String, Working>>,
}

impl ConcurrentTrace {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Working>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record `identity` under `name`
    ///
    /// Returns `(count, millis since the first of them started)` once more
    /// than `limit` are in flight.
    pub(crate) fn inc(&self, name: &str, identity: u64, now: i64, limit: usize) -> Option<(usize, i64)> {
        let mut tasks = self.lock();
        let working = tasks.entry(name.to_string()).or_insert_with(|| Working {
            identities: Vec::new(),
            since: now,
        });
        working.identities.push(identity);
        let count = working.identities.len();
        (count > limit).then(|| (count, now - working.since))
    }

    /// Forget `identity`; names with nothing left in flight are dropped
    pub(crate) fn dec(&self, identity: u64) -> bool {
        let mut tasks = self.lock();
        let Some(name) = tasks
            .iter()
            .find(|(_, w)| w.identities.contains(&identity))
            .map(|(name, _)| name.clone())
        else {
            return false;
        };
        if let Some(working) = tasks.get_mut(&name) {
            working.identities.retain(|id| *id != identity);
            if working.identities.is_empty() {
                tasks.remove(&name);
            }
        }
        true
    }

    pub(crate) fn count(&self, name: &str) -> usize {
        self.lock().get(name).map_or(0, |w| w.identities.len())
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }
}
