//! Expiration index.
//!
//! Keeps `(until, key)` pairs sorted by time so that everything due as of a
//! given instant can be taken off the front in one step. A reverse map from key
//! to its deadline guarantees at most one timer per key.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};

#[derive(Debug, Default)]
pub struct TtlIndex {
    by_time: BTreeSet<(DateTime<Utc>, String)>,
    by_key: HashMap<String, DateTime<Utc>>,
}

impl TtlIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `key` to expire at `until`, replacing any earlier timer for it.
    pub fn push(&mut self, key: &str, until: DateTime<Utc>) {
        if let Some(previous) = self.by_key.insert(key.to_string(), until) {
            self.by_time.remove(&(previous, key.to_string()));
        }
        self.by_time.insert((until, key.to_string()));
    }

    pub fn delete(&mut self, key: &str) {
        if let Some(until) = self.by_key.remove(key) {
            self.by_time.remove(&(until, key.to_string()));
        }
    }

    /// Removes and returns every key whose deadline is strictly before `now`,
    /// earliest first.
    pub fn pop_after(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let remaining = self.by_time.split_off(&(now, String::new()));
        let due = std::mem::replace(&mut self.by_time, remaining);

        due.into_iter()
            .map(|(_, key)| {
                self.by_key.remove(&key);
                key
            })
            .collect()
    }

    pub fn expiration_of(&self, key: &str) -> Option<DateTime<Utc>> {
        self.by_key.get(key).copied()
    }

    pub fn next_expiration(&self) -> Option<DateTime<Utc>> {
        self.by_time.first().map(|(until, _)| *until)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    #[cfg(test)]
    fn entries(&self) -> Vec<(DateTime<Utc>, String)> {
        self.by_time.iter().cloned().collect()
    }
}
