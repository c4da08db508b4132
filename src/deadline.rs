// Copyright 2016 The Mesh Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A small keyed container pairing a value with an absolute expiry time.
//!
//! Used for both the pending sequenced-callback table and the pending
//! connection-callback table; both only ever need "is this entry expired"
//! and "sweep out everything that is".

use std::collections::HashMap;
use std::hash::Hash;

/// A value paired with the absolute time (milliseconds since an arbitrary
/// but consistent epoch) at which it should be considered expired.
pub struct Entry<V> {
    value: V,
    expires_at_ms: u64,
}

impl<V> Entry<V> {
    /// `timeout_ms == 0` means the entry never expires.
    fn new(value: V, now_ms: u64, timeout_ms: u64) -> Entry<V> {
        let expires_at_ms = if timeout_ms == 0 { 0 } else { now_ms + timeout_ms };
        Entry { value, expires_at_ms }
    }

    fn has_expired(&self, now_ms: u64) -> bool {
        self.expires_at_ms != 0 && now_ms >= self.expires_at_ms
    }
}

/// A map from key to `(value, expiry)`, with destructive expiry sweeps.
pub struct DeadlineRegistry<K, V> {
    entries: HashMap<K, Entry<V>>,
}

impl<K: Eq + Hash, V> Default for DeadlineRegistry<K, V> {
    fn default() -> Self {
        DeadlineRegistry { entries: HashMap::new() }
    }
}

impl<K: Eq + Hash + Clone, V> DeadlineRegistry<K, V> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` under `key`, expiring at `now_ms + timeout_ms`
    /// (or never, if `timeout_ms == 0`).
    pub fn insert(&mut self, key: K, value: V, now_ms: u64, timeout_ms: u64) {
        self.entries.insert(key, Entry::new(value, now_ms, timeout_ms));
    }

    /// Removes and returns the entry for `key`, if live.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// True if `key` has a live, non-expired entry.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if there are no live entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry that has expired as of `now_ms` and returns
    /// their keys and values. Non-expired entries are left untouched.
    pub fn sweep_expired(&mut self, now_ms: u64) -> Vec<(K, V)> {
        let expired_keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.has_expired(now_ms))
            .map(|(k, _)| k.clone())
            .collect();

        expired_keys
            .into_iter()
            .filter_map(|k| {
                let entry = self.entries.remove(&k)?;
                Some((k, entry.value))
            })
            .collect()
    }

    /// Drains every live entry regardless of expiry, e.g. on shutdown.
    pub fn drain_all(&mut self) -> Vec<(K, V)> {
        self.entries.drain().map(|(k, e)| (k, e.value)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_expires_with_zero_timeout() {
        let mut reg: DeadlineRegistry<u16, &str> = DeadlineRegistry::new();
        reg.insert(1, "a", 100, 0);
        assert!(reg.sweep_expired(1_000_000).is_empty());
        assert!(reg.contains(&1));
    }

    #[test]
    fn sweeps_only_expired_entries() {
        let mut reg: DeadlineRegistry<u16, &str> = DeadlineRegistry::new();
        reg.insert(1, "a", 0, 500);
        reg.insert(2, "b", 0, 2000);

        let expired = reg.sweep_expired(600);
        assert_eq!(expired, vec![(1, "a")]);
        assert!(reg.contains(&2));
        assert!(!reg.contains(&1));
    }

    #[test]
    fn remove_is_idempotent() {
        let mut reg: DeadlineRegistry<u16, &str> = DeadlineRegistry::new();
        reg.insert(1, "a", 0, 0);
        assert_eq!(reg.remove(&1), Some("a"));
        assert_eq!(reg.remove(&1), None);
    }

    #[test]
    fn drain_all_ignores_expiry() {
        let mut reg: DeadlineRegistry<u16, &str> = DeadlineRegistry::new();
        reg.insert(1, "a", 0, 0);
        reg.insert(2, "b", 0, 1);
        let mut drained = reg.drain_all();
        drained.sort();
        assert_eq!(drained, vec![(1, "a"), (2, "b")]);
        assert!(reg.is_empty());
    }
}
