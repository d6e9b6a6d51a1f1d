//! Run-wide duplicate detection by content fingerprint.

use std::collections::HashSet;

/// The first leaf seen with a fingerprint is canonical; later ones are
/// duplicates. Lives on the engine thread for the whole run.
#[derive(Debug, Default)]
pub struct DuplicateIndex {
    seen: HashSet<String>,
}

impl DuplicateIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with fingerprints already written by an earlier, interrupted run.
    pub fn seeded(fingerprints: impl IntoIterator<Item = String>) -> Self {
        Self {
            seen: fingerprints.into_iter().collect(),
        }
    }

    /// Record `fingerprint`; returns `true` if it was seen before.
    pub fn observe(&mut self, fingerprint: &str) -> bool {
        if self.seen.contains(fingerprint) {
            return true;
        }
        self.seen.insert(fingerprint.to_string());
        false
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_occurrence_is_canonical() {
        let mut index = DuplicateIndex::new();
        assert!(!index.observe("h1"));
        assert!(index.observe("h1"));
        assert!(!index.observe("h2"));
        assert_eq!(index.len(), 2);
    }

    #[test]
    fn seeded_fingerprints_count_as_seen() {
        let mut index = DuplicateIndex::seeded(["h1".to_string()]);
        assert!(index.observe("h1"));
    }
}
