//! Per-commander reply filter
//!
//! Every commander connection carries a taster deciding which replies it
//! receives. A reply is tasted against three dimensions: the source actor
//! name, the identity of the commander that issued the owning command, and
//! the keyword names in the reply. Matching any dimension delivers the
//! reply. The `*` sentinel in the actor or keyword set matches everything in
//! that dimension. Filters are mutated live while the connection is up.

use std::collections::HashSet;

use crate::msg::KeyValues;

/// Wildcard sentinel matching anything in its dimension
pub const WILDCARD: &str = "*";

/// Reply filter for one commander connection
#[derive(Debug, Clone, Default)]
pub struct Taster {
    actors: HashSet<String>,
    commanders: HashSet<String>,
    keywords: HashSet<String>,
}

/// Which dimension a filter mutation addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dimension {
    Actors,
    Commanders,
    Keywords,
}

impl Dimension {
    /// Parse a dimension name as used by the hub filter verbs
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "actors" | "actor" => Some(Dimension::Actors),
            "commanders" | "commander" | "cmdrs" => Some(Dimension::Commanders),
            "keys" | "keywords" | "key" => Some(Dimension::Keywords),
            _ => None,
        }
    }
}

impl Taster {
    /// Create an empty taster matching nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the default taster for a freshly connected commander: it hears
    /// its own replies and nothing else until it widens the filter.
    pub fn for_commander(identity: &str) -> Self {
        let mut taster = Self::new();
        taster.add(Dimension::Commanders, identity);
        taster
    }

    /// Add one name to a dimension
    pub fn add(&mut self, dimension: Dimension, name: &str) {
        self.set_mut(dimension).insert(name.to_ascii_lowercase());
    }

    /// Remove one name from a dimension
    pub fn remove(&mut self, dimension: Dimension, name: &str) {
        self.set_mut(dimension).remove(&name.to_ascii_lowercase());
    }

    /// Replace one dimension wholesale
    pub fn set(&mut self, dimension: Dimension, names: impl IntoIterator<Item = String>) {
        let set = self.set_mut(dimension);
        set.clear();
        set.extend(names.into_iter().map(|n| n.to_ascii_lowercase()));
    }

    /// Decide whether a reply is delivered
    pub fn taste(&self, source: &str, commander: &str, keys: &KeyValues) -> bool {
        if self.actors.contains(WILDCARD) || self.keywords.contains(WILDCARD) {
            return true;
        }
        if self.actors.contains(&source.to_ascii_lowercase()) {
            return true;
        }
        if self.commanders.contains(&commander.to_ascii_lowercase()) {
            return true;
        }
        keys.names()
            .any(|name| self.keywords.contains(&name.to_ascii_lowercase()))
    }

    /// Snapshot one dimension, sorted for stable display
    pub fn dimension(&self, dimension: Dimension) -> Vec<String> {
        let set = match dimension {
            Dimension::Actors => &self.actors,
            Dimension::Commanders => &self.commanders,
            Dimension::Keywords => &self.keywords,
        };
        let mut names: Vec<String> = set.iter().cloned().collect();
        names.sort();
        names
    }

    fn set_mut(&mut self, dimension: Dimension) -> &mut HashSet<String> {
        match dimension {
            Dimension::Actors => &mut self.actors,
            Dimension::Commanders => &mut self.commanders,
            Dimension::Keywords => &mut self.keywords,
        }
    }
}
