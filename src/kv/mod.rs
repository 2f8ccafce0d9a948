//! Keyword-value cache
//!
//! The hub keeps the latest value of every keyword each source has ever
//! reported, so a commander can ask about an instrument without disturbing
//! it. Sources are independent namespaces created lazily on first write and
//! dropped atomically when the owning actor disconnects; a query after
//! disconnect reports the keys as unmatched rather than serving stale data.

use std::time::SystemTime;

use crate::cimap::Cimap;
use crate::msg::{KeyValue, KeyValues};

/// Latest state of one keyword
#[derive(Debug, Clone)]
pub struct KvEntry {
    /// Last reported value
    pub value: KeyValue,
    /// xid of the reply that reported it
    pub xid: u64,
    /// When it was reported
    pub updated_at: SystemTime,
}

/// Per-source keyword cache
#[derive(Debug, Default)]
pub struct KvStore {
    sources: Cimap<Cimap<KvEntry>>,
}

impl KvStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-create a namespace for a source (registration time)
    pub fn add_source(&mut self, source: &str) {
        if !self.sources.contains(source) {
            self.sources.insert(source, Cimap::new());
        }
    }

    /// True if a namespace exists for this source
    pub fn has_source(&self, source: &str) -> bool {
        self.sources.contains(source)
    }

    /// Record every keyword of a reply under `source`
    pub fn set_keys(&mut self, source: &str, keys: &KeyValues, xid: u64) {
        if keys.is_empty() {
            return;
        }
        if !self.sources.contains(source) {
            self.sources.insert(source, Cimap::new());
        }
        // contains() above guarantees the namespace exists
        let namespace = match self.sources.get_mut(source) {
            Some(ns) => ns,
            None => return,
        };
        let now = SystemTime::now();
        for (name, value) in keys.iter() {
            namespace.insert(
                name,
                KvEntry {
                    value: value.clone(),
                    xid,
                    updated_at: now,
                },
            );
        }
    }

    /// Look up keywords by name under `source`.
    ///
    /// Returns the matched entries (originally written key case, insertion
    /// order of the request) and the names that had no cached value.
    pub fn get_keys(
        &self,
        source: &str,
        names: &[String],
    ) -> (Vec<(String, KvEntry)>, Vec<String>) {
        let mut matched = Vec::new();
        let mut unmatched = Vec::new();

        let namespace = self.sources.get(source);
        for name in names {
            match namespace.and_then(|ns| ns.get_entry(name)) {
                Some((orig, entry)) => matched.push((orig.to_string(), entry.clone())),
                None => unmatched.push(name.clone()),
            }
        }
        (matched, unmatched)
    }

    /// Every cached keyword of one source, in first-write order
    pub fn all_keys(&self, source: &str) -> Vec<(String, KvEntry)> {
        self.sources
            .get(source)
            .map(|ns| {
                ns.iter()
                    .map(|(name, entry)| (name.to_string(), entry.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Drop an entire source namespace
    pub fn drop_source(&mut self, source: &str) -> bool {
        self.sources.remove(source).is_some()
    }

    /// Names of all live sources, in registration order
    pub fn sources(&self) -> Vec<String> {
        self.sources.names().map(str::to_string).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::keys::keys_from;

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_lazy_namespace_creation() {
        let mut store = KvStore::new();
        assert!(!store.has_source("gcam"));

        store.set_keys("gcam", &keys_from([("state", "idle")]), 1);
        assert!(store.has_source("gcam"));
    }

    #[test]
    fn test_reads_are_idempotent() {
        let mut store = KvStore::new();
        store.set_keys("tcc", &keys_from([("Az", "121.3")]), 5);

        let (first, _) = store.get_keys("tcc", &names(&["az"]));
        let (second, _) = store.get_keys("tcc", &names(&["az"]));
        assert_eq!(first[0].0, "Az");
        assert_eq!(
            first[0].1.value.as_scalar(),
            second[0].1.value.as_scalar()
        );
        assert_eq!(first[0].1.xid, 5);
    }

    #[test]
    fn test_unmatched_names_reported() {
        let mut store = KvStore::new();
        store.set_keys("boss", &keys_from([("status", "ok")]), 2);

        let (matched, unmatched) = store.get_keys("boss", &names(&["status", "missing"]));
        assert_eq!(matched.len(), 1);
        assert_eq!(unmatched, vec!["missing"]);
    }

    #[test]
    fn test_drop_source_removes_everything() {
        let mut store = KvStore::new();
        store.set_keys("boss", &keys_from([("status", "ok")]), 2);
        assert!(store.drop_source("boss"));

        let (matched, unmatched) = store.get_keys("boss", &names(&["status"]));
        assert!(matched.is_empty());
        assert_eq!(unmatched, vec!["status"]);
        assert!(!store.drop_source("boss"));
    }

    #[test]
    fn test_latest_value_wins() {
        let mut store = KvStore::new();
        store.set_keys("gcam", &keys_from([("state", "exposing")]), 1);
        store.set_keys("gcam", &keys_from([("State", "reading")]), 2);

        let (matched, _) = store.get_keys("gcam", &names(&["state"]));
        assert_eq!(matched[0].1.value.as_scalar(), Some("reading"));
        assert_eq!(matched[0].1.xid, 2);
    }

    #[test]
    fn test_flag_keys_are_cached_too() {
        let mut store = KvStore::new();
        let mut keys = KeyValues::new();
        keys.insert("guiding", KeyValue::Flag);
        store.set_keys("gcam", &keys, 3);

        let (matched, _) = store.get_keys("gcam", &names(&["guiding"]));
        assert!(matched[0].1.value.is_flag());
    }
}
