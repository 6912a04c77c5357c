//! Virtual-pool label selector
//!
//! A selector string has the form `"k1=v1; k2=v2"` and matches a pool when
//! every term is an exact match against the pool's labels. Malformed terms
//! and keys the pool does not carry fail the match; parsing never errors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
enum SelectorTerm {
    Equals { key: String, value: String },
    /// A term that could not be understood; never matches
    Invalid(String),
}

/// Conjunction of exact-match label tests
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct LabelSelector {
    source: String,
    terms: Vec<SelectorTerm>,
}

impl LabelSelector {
    pub fn parse(source: &str) -> Self {
        let terms = source
            .split(';')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(|term| match term.split_once('=') {
                Some((key, value)) if !key.trim().is_empty() => SelectorTerm::Equals {
                    key: key.trim().to_string(),
                    value: value.trim().to_string(),
                },
                _ => SelectorTerm::Invalid(term.to_string()),
            })
            .collect();

        Self {
            source: source.to_string(),
            terms,
        }
    }

    /// Check the selector against a pool's labels
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.terms.iter().all(|term| match term {
            SelectorTerm::Equals { key, value } => labels.get(key) == Some(value),
            SelectorTerm::Invalid(_) => false,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }
}

impl From<String> for LabelSelector {
    fn from(source: String) -> Self {
        Self::parse(&source)
    }
}

impl From<LabelSelector> for String {
    fn from(selector: LabelSelector) -> Self {
        selector.source
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_conjunction() {
        let selector = LabelSelector::parse("performance=gold; region = east");
        assert!(selector.matches(&labels(&[("performance", "gold"), ("region", "east")])));
        assert!(!selector.matches(&labels(&[("performance", "gold"), ("region", "west")])));
    }

    #[test]
    fn test_missing_key_fails_closed() {
        let selector = LabelSelector::parse("performance=gold; cost=low");
        assert!(!selector.matches(&labels(&[("performance", "gold")])));
    }

    #[test]
    fn test_malformed_term_fails_closed() {
        let selector = LabelSelector::parse("performance");
        assert!(!selector.is_empty());
        assert!(!selector.matches(&labels(&[("performance", "gold")])));

        let selector = LabelSelector::parse("=gold");
        assert!(!selector.matches(&labels(&[("", "gold")])));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let selector = LabelSelector::parse(" ; ");
        assert!(selector.is_empty());
        assert!(selector.matches(&BTreeMap::new()));
    }
}
