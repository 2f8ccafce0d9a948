//! Case-insensitive insertion-ordered map
//!
//! Keyword names on the wire are matched without regard to case but must be
//! echoed back in the case they were first written with. `Cimap` stores
//! `lowercase -> (original key, value)` plus an insertion-order list of the
//! lowercase keys, so enumeration is deterministic and case-preserving.

use std::collections::HashMap;

/// Case-insensitive, insertion-ordered map
#[derive(Debug, Clone, PartialEq)]
pub struct Cimap<V> {
    slots: HashMap<String, (String, V)>,
    order: Vec<String>,
}

impl<V> Default for Cimap<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Cimap<V> {
    /// Create an empty map
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            order: Vec::new(),
        }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if the map holds no entries
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Insert a value, replacing any entry whose key matches case-insensitively.
    ///
    /// A replaced entry keeps its position in the iteration order but takes on
    /// the newly written key case.
    pub fn insert(&mut self, key: impl Into<String>, value: V) -> Option<V> {
        let key = key.into();
        let folded = key.to_ascii_lowercase();
        match self.slots.insert(folded.clone(), (key, value)) {
            Some((_, old)) => Some(old),
            None => {
                self.order.push(folded);
                None
            }
        }
    }

    /// Look up a value by key, case-insensitively
    pub fn get(&self, key: &str) -> Option<&V> {
        self.slots.get(&key.to_ascii_lowercase()).map(|(_, v)| v)
    }

    /// Look up a value mutably by key, case-insensitively
    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.slots
            .get_mut(&key.to_ascii_lowercase())
            .map(|(_, v)| v)
    }

    /// Look up the originally written key case and the value
    pub fn get_entry(&self, key: &str) -> Option<(&str, &V)> {
        self.slots
            .get(&key.to_ascii_lowercase())
            .map(|(orig, v)| (orig.as_str(), v))
    }

    /// True if a key is present, case-insensitively
    pub fn contains(&self, key: &str) -> bool {
        self.slots.contains_key(&key.to_ascii_lowercase())
    }

    /// Remove an entry by key, case-insensitively
    pub fn remove(&mut self, key: &str) -> Option<V> {
        let folded = key.to_ascii_lowercase();
        let removed = self.slots.remove(&folded);
        if removed.is_some() {
            self.order.retain(|k| k != &folded);
        }
        removed.map(|(_, v)| v)
    }

    /// Iterate entries in insertion order as `(original key, value)`
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.order.iter().filter_map(move |folded| {
            self.slots.get(folded).map(|(orig, v)| (orig.as_str(), v))
        })
    }

    /// Iterate originally written key names in insertion order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(name, _)| name)
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.slots.clear();
        self.order.clear();
    }
}
