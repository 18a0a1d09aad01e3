// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

use indexmap::{IndexMap, IndexSet};
use std::hash::Hash;

/// A map from a key to an insertion-ordered set of values.
///
/// Keys iterate in the order they were first added. Adding a value that is already present for a
/// key is a no-op.
#[derive(Clone, Debug)]
pub struct MultiMap<K, V> {
    map: IndexMap<K, IndexSet<V>>,
}

impl<K: Hash + Eq, V: Hash + Eq> MultiMap<K, V> {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self {
            map: IndexMap::new(),
        }
    }

    /// Adds `value` to the set for `key`.
    pub fn set(&mut self, key: K, value: V) {
        self.map.entry(key).or_default().insert(value);
    }

    /// Returns the values for `key`, in insertion order.
    pub fn get<'a>(&'a self, key: &K) -> impl Iterator<Item = &'a V> + use<'a, K, V> {
        self.map.get(key).into_iter().flatten()
    }

    /// Returns true if `key` has at least one value.
    pub fn has(&self, key: &K) -> bool {
        self.map.get(key).is_some_and(|values| !values.is_empty())
    }

    /// Removes a single value for `key`. Returns true if it was present.
    pub fn delete(&mut self, key: &K, value: &V) -> bool {
        let Some(values) = self.map.get_mut(key) else {
            return false;
        };
        let removed = values.shift_remove(value);
        if values.is_empty() {
            self.map.shift_remove(key);
        }
        removed
    }

    /// Removes all values for `key`.
    pub fn delete_all(&mut self, key: &K) {
        self.map.shift_remove(key);
    }

    /// Removes everything.
    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Returns true if there are no values.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Iterates over keys and their values.
    pub fn iter(&self) -> impl Iterator<Item = (&K, impl Iterator<Item = &V>)> + '_ {
        self.map.iter().map(|(key, values)| (key, values.iter()))
    }
}

impl<K: Hash + Eq, V: Hash + Eq> Default for MultiMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}
