//! HTTP parameter pollution protection.
//!
//! Duplicate keys in a query string or url-encoded form collapse to their
//! last value. Keys on the allow-list keep every value.

use std::collections::{HashMap, HashSet};

use url::form_urlencoded;

use crate::config::ParameterConfig;

/// Result of collapsing one parameter set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deduplicated {
    /// Re-encoded parameters.
    pub encoded: String,
    /// Keys that carried more than one value and were collapsed.
    pub collapsed: Vec<String>,
}

/// Collapses duplicate parameters.
#[derive(Debug, Clone)]
pub struct ParameterFilter {
    allow_multiple: HashSet<String>,
    enabled: bool,
}

impl ParameterFilter {
    /// Create a filter with the given allow-list.
    #[must_use]
    pub fn new<I, S>(allow_multiple: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allow_multiple: allow_multiple.into_iter().map(Into::into).collect(),
            enabled: true,
        }
    }

    /// Create from configuration.
    #[must_use]
    pub fn from_config(config: &ParameterConfig) -> Self {
        Self {
            allow_multiple: config.allow_multiple.clone(),
            enabled: config.enabled,
        }
    }

    /// Check whether a key may carry several values.
    #[must_use]
    pub fn allows_multiple(&self, key: &str) -> bool {
        self.allow_multiple.contains(key)
    }

    /// Collapse a pair list, keeping each key at its first position with
    /// its last value.
    #[must_use]
    pub fn dedupe_pairs(&self, pairs: Vec<(String, String)>) -> (Vec<(String, String)>, Vec<String>) {
        if !self.enabled {
            return (pairs, Vec::new());
        }

        let mut out: Vec<(String, String)> = Vec::with_capacity(pairs.len());
        let mut positions: HashMap<String, usize> = HashMap::new();
        let mut collapsed: Vec<String> = Vec::new();

        for (key, value) in pairs {
            if self.allows_multiple(&key) {
                out.push((key, value));
                continue;
            }
            if let Some(&idx) = positions.get(&key) {
                out[idx].1 = value;
                if !collapsed.contains(&key) {
                    collapsed.push(key);
                }
            } else {
                positions.insert(key.clone(), out.len());
                out.push((key, value));
            }
        }

        (out, collapsed)
    }

    /// Collapse an encoded query string or form body.
    ///
    /// Returns `None` when nothing needed collapsing, so callers can leave
    /// the original bytes untouched.
    #[must_use]
    pub fn dedupe_encoded(&self, encoded: &str) -> Option<Deduplicated> {
        if !self.enabled || encoded.is_empty() {
            return None;
        }

        let pairs: Vec<(String, String)> = form_urlencoded::parse(encoded.as_bytes())
            .into_owned()
            .collect();
        let (pairs, collapsed) = self.dedupe_pairs(pairs);
        if collapsed.is_empty() {
            return None;
        }

        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs.iter())
            .finish();
        Some(Deduplicated { encoded, collapsed })
    }
}

impl Default for ParameterFilter {
    fn default() -> Self {
        Self::from_config(&ParameterConfig::default())
    }
}
