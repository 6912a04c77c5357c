//! Encoded backend/pool lists
//!
//! Storage classes name pools with the compact form
//! `"backend1:pool1,pool2;backend2:pool1"`.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Set of pools grouped by backend name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PoolSet(BTreeMap<String, BTreeSet<String>>);

impl PoolSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the encoded `backend:pool,pool;backend:pool` form
    pub fn parse(encoded: &str) -> Result<Self> {
        let mut set = PoolSet::new();

        for entry in encoded.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (backend, pools) = entry.split_once(':').ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "pool list entry '{}' must have the form backend:pool[,pool]",
                    entry
                ))
            })?;

            let backend = backend.trim();
            if backend.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "pool list entry '{}' has no backend name",
                    entry
                )));
            }

            let pools: Vec<&str> = pools
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .collect();
            if pools.is_empty() {
                return Err(Error::InvalidArgument(format!(
                    "pool list entry '{}' names no pools",
                    entry
                )));
            }

            for pool in pools {
                set.insert(backend, pool);
            }
        }

        Ok(set)
    }

    pub fn insert(&mut self, backend: impl Into<String>, pool: impl Into<String>) {
        self.0.entry(backend.into()).or_default().insert(pool.into());
    }

    pub fn contains(&self, backend: &str, pool: &str) -> bool {
        self.0.get(backend).is_some_and(|pools| pools.contains(pool))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of (backend, pool) pairs
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeSet::len).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0
            .iter()
            .flat_map(|(b, pools)| pools.iter().map(move |p| (b.as_str(), p.as_str())))
    }
}

impl std::fmt::Display for PoolSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entries: Vec<String> = self
            .0
            .iter()
            .map(|(backend, pools)| {
                let pools: Vec<&str> = pools.iter().map(String::as_str).collect();
                format!("{}:{}", backend, pools.join(","))
            })
            .collect();
        write!(f, "{}", entries.join(";"))
    }
}
