// Copyright (C) 2025-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Storage of running window counts.
//!
//! The store maps `(key, window_start)` to a [`WindowAggregate`]. Counts are
//! only ever incremented; entries leave the store through bulk eviction by
//! window start, never through per-entry timers.

use chrono::{DateTime, Utc};
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    hash::Hash,
};
use strum_macros::Display;

/// Running count of accepted events for one `(key, window_start)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowAggregate<K> {
    key: K,
    window_start: DateTime<Utc>,
    count: i64,
    last_updated: DateTime<Utc>,
}

impl<K> WindowAggregate<K> {
    fn new(key: K, window_start: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        Self {
            key,
            window_start,
            count: 0,
            last_updated: now,
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn count(&self) -> i64 {
        self.count
    }

    pub fn last_updated(&self) -> DateTime<Utc> {
        self.last_updated
    }

    fn increment(&mut self, now: DateTime<Utc>) {
        self.count = self.count.saturating_add(1);
        self.last_updated = now;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Display)]
pub enum StoreError {
    #[strum(to_string = "window store capacity of {capacity} aggregates exceeded")]
    CapacityExceeded { capacity: usize },
}

impl std::error::Error for StoreError {}

/// Storage backend for window aggregates.
///
/// A failed write is fatal for the processing lane that owns the store, the
/// caller must not continue counting after an error.
pub trait WindowStore<K> {
    /// Increment the count of `(key, window_start)` by one, creating the
    /// aggregate with a count of one when absent. Returns the updated
    /// aggregate.
    fn increment(
        &mut self,
        key: &K,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<WindowAggregate<K>, StoreError>;

    fn get(&self, key: &K, window_start: DateTime<Utc>) -> Option<&WindowAggregate<K>>;

    /// Remove every aggregate whose window starts strictly before `cutoff`.
    fn evict_older_than(&mut self, cutoff: DateTime<Utc>) -> Vec<WindowAggregate<K>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory [`WindowStore`] with a window-start index for bulk eviction.
#[derive(Debug, Clone)]
pub struct InMemoryWindowStore<K> {
    entries: HashMap<K, BTreeMap<DateTime<Utc>, WindowAggregate<K>>>,
    /// Keys that have an aggregate for a given window start
    by_window: BTreeMap<DateTime<Utc>, HashSet<K>>,
    len: usize,
    max_entries: Option<usize>,
}

impl<K> Default for InMemoryWindowStore<K> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            by_window: BTreeMap::new(),
            len: 0,
            max_entries: None,
        }
    }
}

impl<K> InMemoryWindowStore<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store that refuses to hold more than `max_entries` aggregates
    pub fn with_capacity_limit(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
            ..Self::default()
        }
    }

    pub fn max_entries(&self) -> Option<usize> {
        self.max_entries
    }
}

impl<K: Eq + Hash + Clone> WindowStore<K> for InMemoryWindowStore<K> {
    fn increment(
        &mut self,
        key: &K,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<WindowAggregate<K>, StoreError> {
        let exists = self
            .entries
            .get(key)
            .is_some_and(|windows| windows.contains_key(&window_start));
        if !exists {
            if let Some(capacity) = self.max_entries {
                if self.len >= capacity {
                    return Err(StoreError::CapacityExceeded { capacity });
                }
            }
            self.len += 1;
            self.by_window
                .entry(window_start)
                .or_default()
                .insert(key.clone());
        }
        let aggregate = self
            .entries
            .entry(key.clone())
            .or_default()
            .entry(window_start)
            .or_insert_with(|| WindowAggregate::new(key.clone(), window_start, now));
        aggregate.increment(now);
        Ok(aggregate.clone())
    }

    fn get(&self, key: &K, window_start: DateTime<Utc>) -> Option<&WindowAggregate<K>> {
        self.entries
            .get(key)
            .and_then(|windows| windows.get(&window_start))
    }

    fn evict_older_than(&mut self, cutoff: DateTime<Utc>) -> Vec<WindowAggregate<K>> {
        let retained = self.by_window.split_off(&cutoff);
        let expired = std::mem::replace(&mut self.by_window, retained);
        let mut evicted = Vec::new();
        for (window_start, keys) in expired {
            for key in keys {
                if let Some(windows) = self.entries.get_mut(&key) {
                    if let Some(aggregate) = windows.remove(&window_start) {
                        self.len -= 1;
                        evicted.push(aggregate);
                    }
                    if windows.is_empty() {
                        self.entries.remove(&key);
                    }
                }
            }
        }
        evicted
    }

    fn len(&self) -> usize {
        self.len
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_increment_creates_and_counts() {
        let mut store = InMemoryWindowStore::new();
        let now = t0() + TimeDelta::minutes(5);
        let first = store.increment(&"SW1", t0(), now).unwrap();
        assert_eq!(first.count(), 1);
        assert_eq!(first.key(), &"SW1");
        assert_eq!(first.window_start(), t0());
        assert_eq!(first.last_updated(), now);

        let later = now + TimeDelta::seconds(1);
        let second = store.increment(&"SW1", t0(), later).unwrap();
        assert_eq!(second.count(), 2);
        assert_eq!(second.last_updated(), later);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"SW1", t0()), Some(&second));
    }

    #[test]
    fn test_keys_and_windows_are_independent() {
        let mut store = InMemoryWindowStore::new();
        let now = t0();
        store.increment(&"SW1", t0(), now).unwrap();
        store.increment(&"EC1", t0(), now).unwrap();
        store
            .increment(&"SW1", t0() + TimeDelta::minutes(1), now)
            .unwrap();
        store.increment(&"SW1", t0(), now).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.get(&"SW1", t0()).map(|x| x.count()), Some(2));
        assert_eq!(store.get(&"EC1", t0()).map(|x| x.count()), Some(1));
        assert_eq!(
            store
                .get(&"SW1", t0() + TimeDelta::minutes(1))
                .map(|x| x.count()),
            Some(1)
        );
        assert_eq!(store.get(&"EC1", t0() + TimeDelta::minutes(1)), None);
    }

    #[test]
    fn test_evict_older_than_is_strict() {
        let mut store = InMemoryWindowStore::new();
        let now = t0();
        store.increment(&"SW1", t0(), now).unwrap();
        store.increment(&"EC1", t0(), now).unwrap();
        store
            .increment(&"SW1", t0() + TimeDelta::minutes(1), now)
            .unwrap();

        // Nothing starts strictly before t0
        assert!(store.evict_older_than(t0()).is_empty());
        assert_eq!(store.len(), 3);

        let mut evicted = store.evict_older_than(t0() + TimeDelta::minutes(1));
        evicted.sort_by_key(|x| *x.key());
        assert_eq!(evicted.len(), 2);
        assert_eq!(evicted[0].key(), &"EC1");
        assert_eq!(evicted[1].key(), &"SW1");
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"SW1", t0()), None);
        assert!(store.get(&"SW1", t0() + TimeDelta::minutes(1)).is_some());

        // A recreated aggregate starts over from one
        assert_eq!(store.increment(&"SW1", t0(), now).unwrap().count(), 1);
    }

    #[test]
    fn test_capacity_limit() {
        let mut store = InMemoryWindowStore::with_capacity_limit(1);
        assert_eq!(store.max_entries(), Some(1));
        store.increment(&"SW1", t0(), t0()).unwrap();
        // Updating an existing aggregate needs no new slot
        store.increment(&"SW1", t0(), t0()).unwrap();
        assert_eq!(
            store.increment(&"EC1", t0(), t0()),
            Err(StoreError::CapacityExceeded { capacity: 1 })
        );
        assert_eq!(store.len(), 1);
        assert!(store.get(&"EC1", t0()).is_none());
    }
}
