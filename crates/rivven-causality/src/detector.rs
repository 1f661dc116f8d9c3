//! Causality detector
//!
//! Tracks which row keys belong to one causal group by mapping every key to
//! its group's root key. Jobs whose keys map to more than one root would
//! merge groups that apply workers may already be running concurrently; the
//! relay resolves that with a conflict barrier and a reset.
//!
//! There is no path compression: roots never change once assigned, so a
//! single lookup per key answers every query.

use std::collections::HashMap;

/// Key to root key relation table.
#[derive(Debug, Default, Clone)]
pub struct Causality {
    relations: HashMap<String, String>,
}

impl Causality {
    /// Create an empty detector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if `keys` span more than one existing group.
    ///
    /// Keys not yet known are ignored; an empty key set never conflicts.
    pub fn detect_conflict(&self, keys: &[String]) -> bool {
        let mut roots = keys.iter().filter_map(|k| self.relations.get(k));
        let Some(first) = roots.next() else {
            return false;
        };
        roots.any(|root| root != first)
    }

    /// Add `keys` to one group and return its root.
    ///
    /// The root is that of the last known key, or the first key if none is
    /// known. Must only be called when `detect_conflict` is false, so every
    /// known key shares that root. Returns `None` for an empty key set.
    pub fn add(&mut self, keys: &[String]) -> Option<String> {
        let first = keys.first()?;
        let mut root = first.clone();
        for key in keys {
            if let Some(existing) = self.relations.get(key) {
                root = existing.clone();
            }
        }
        for key in keys {
            self.relations.insert(key.clone(), root.clone());
        }
        Some(root)
    }

    /// Root of `key`, if known.
    pub fn root(&self, key: &str) -> Option<&str> {
        self.relations.get(key).map(String::as_str)
    }

    /// Forget all relations.
    pub fn reset(&mut self) {
        self.relations.clear();
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Whether no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// The relation table.
    pub fn relations(&self) -> &HashMap<String, String> {
        &self.relations
    }
}
