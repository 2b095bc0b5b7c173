//! Title matching for free-text dependency references
//!
//! Resolution order:
//! 1. exact (case-insensitive) title
//! 2. exact (case-insensitive) display name
//! 3. substring containment in either direction against titles, first
//!    registered title wins
//!
//! Step 3 is fuzzy on purpose and can pick the wrong node when one title is
//! a substring of another. Registration order is the tie-breaker.

use indexmap::IndexMap;
use std::hash::Hash;

/// Lower-case and trim a title for comparison
#[inline]
#[must_use]
pub fn normalize_title(title: &str) -> String {
    title.trim().to_lowercase()
}

/// Lookup table from known titles to node keys
#[derive(Debug, Clone)]
pub struct TitleIndex<K> {
    titles: IndexMap<String, K>,
    display_names: IndexMap<String, K>,
}

impl<K> Default for TitleIndex<K> {
    fn default() -> Self {
        Self {
            titles: IndexMap::new(),
            display_names: IndexMap::new(),
        }
    }
}

impl<K: Copy + Eq + Hash> TitleIndex<K> {
    /// Empty index
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a title. Blank titles are ignored; the first key registered
    /// for a title keeps it.
    pub fn insert_title(&mut self, title: &str, key: K) {
        let normalized = normalize_title(title);
        if !normalized.is_empty() {
            self.titles.entry(normalized).or_insert(key);
        }
    }

    /// Register a display name (only used for exact matches)
    pub fn insert_display_name(&mut self, name: &str, key: K) {
        let normalized = normalize_title(name);
        if !normalized.is_empty() {
            self.display_names.entry(normalized).or_insert(key);
        }
    }

    /// Resolve a reference to a key, or `None` if nothing matches
    #[must_use]
    pub fn resolve(&self, reference: &str) -> Option<K> {
        let needle = normalize_title(reference);
        if needle.is_empty() {
            return None;
        }

        if let Some(key) = self.titles.get(&needle) {
            return Some(*key);
        }
        if let Some(key) = self.display_names.get(&needle) {
            return Some(*key);
        }

        self.titles
            .iter()
            .find(|(title, _)| title.contains(needle.as_str()) || needle.contains(title.as_str()))
            .map(|(_, key)| *key)
    }

    /// Number of registered titles
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.titles.len()
    }

    /// True when no titles are registered
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.titles.is_empty()
    }
}
