//! Blocked signaling endpoint patterns
//!
//! Ordered, case-insensitive substring patterns. The set is read-only after
//! construction; callers extend it through the constructor, never at runtime.

/// Ordered substring blocklist for signaling URLs
#[derive(Debug, Clone)]
pub struct BlockedPatterns {
    patterns: Vec<String>,
}

impl Default for BlockedPatterns {
    /// Ships with the retired signaling hosts clients still try to dial
    fn default() -> Self {
        Self::new(vec![
            "signal.hearth-legacy.net".to_string(),
            "ws.hearth-legacy.net".to_string(),
        ])
    }
}

impl BlockedPatterns {
    /// Build a set from `patterns`, lowercased, in the given order
    pub fn new(patterns: Vec<String>) -> Self {
        Self {
            patterns: patterns.into_iter().map(|p| p.to_lowercase()).collect(),
        }
    }

    /// Defaults plus `extra` appended after them
    pub fn with_extra(extra: Vec<String>) -> Self {
        let mut all = Self::default().patterns;
        all.extend(extra.into_iter().map(|p| p.to_lowercase()));
        Self { patterns: all }
    }

    /// First pattern contained in `url`, case-insensitively
    pub fn matched_pattern(&self, url: &str) -> Option<&str> {
        let url = url.to_lowercase();
        self.patterns
            .iter()
            .find(|p| url.contains(p.as_str()))
            .map(String::as_str)
    }

    /// Whether `url` targets a blocked endpoint
    pub fn is_blocked(&self, url: &str) -> bool {
        self.matched_pattern(url).is_some()
    }

    /// Number of patterns in the set
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    /// True when the set carries no patterns
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}
