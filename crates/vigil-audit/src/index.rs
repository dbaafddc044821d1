//! Index name resolution.
//!
//! The host owns cluster metadata; the pipeline only needs to turn index
//! patterns into concrete names. [`IndexResolver`] and
//! [`ClusterStateProvider`] are the seams, [`WildcardIndexResolver`] is a
//! ready-made resolver over a [`ClusterState`] snapshot.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;

use crate::request::IndicesOptions;
use crate::wildcard::WildcardPattern;

/// Pattern that selects every index.
pub const ALL_INDICES: &str = "_all";

/// Snapshot of the index metadata needed for resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterState {
    /// Concrete index names.
    pub indices: BTreeSet<String>,
    /// Alias name to the concrete indices it points at.
    pub aliases: BTreeMap<String, BTreeSet<String>>,
}

impl ClusterState {
    /// Creates a state with the given concrete indices.
    pub fn with_indices<I, S>(indices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            indices: indices.into_iter().map(Into::into).collect(),
            aliases: BTreeMap::new(),
        }
    }

    /// Adds an alias.
    #[must_use]
    pub fn with_alias<I, S>(mut self, alias: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases
            .insert(alias.into(), targets.into_iter().map(Into::into).collect());
        self
    }
}

/// Supplies the current cluster state.
pub trait ClusterStateProvider: Send + Sync {
    /// Returns the current snapshot.
    fn state(&self) -> ClusterState;
}

/// A provider that serves whatever snapshot was last stored.
#[derive(Debug, Default)]
pub struct StaticClusterState {
    state: RwLock<ClusterState>,
}

impl StaticClusterState {
    /// Creates a provider serving `state`.
    #[must_use]
    pub fn new(state: ClusterState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Replaces the served snapshot.
    pub fn update(&self, state: ClusterState) {
        *self.state.write() = state;
    }
}

impl ClusterStateProvider for StaticClusterState {
    fn state(&self) -> ClusterState {
        self.state.read().clone()
    }
}

/// Resolves index patterns to concrete index names.
pub trait IndexResolver: Send + Sync {
    /// Returns the concrete indices `patterns` refer to in `state`.
    fn resolve_concrete_indices(
        &self,
        state: &ClusterState,
        options: &IndicesOptions,
        patterns: &[String],
    ) -> Vec<String>;
}

/// Resolver supporting `_all`, `*`/`?` wildcards and aliases.
#[derive(Debug, Clone, Copy, Default)]
pub struct WildcardIndexResolver;

impl IndexResolver for WildcardIndexResolver {
    fn resolve_concrete_indices(
        &self,
        state: &ClusterState,
        options: &IndicesOptions,
        patterns: &[String],
    ) -> Vec<String> {
        let mut resolved = BTreeSet::new();

        if patterns.is_empty() || patterns.iter().any(|p| p == ALL_INDICES) {
            resolved.extend(state.indices.iter().cloned());
            return resolved.into_iter().collect();
        }

        for pattern in patterns {
            let compiled = WildcardPattern::new(pattern);
            if compiled.is_wildcard() {
                if !options.expand_wildcards {
                    continue;
                }
                let before = resolved.len();
                resolved.extend(state.indices.iter().filter(|i| compiled.matches(i)).cloned());
                for (alias, targets) in &state.aliases {
                    if compiled.matches(alias) {
                        resolved.extend(targets.iter().cloned());
                    }
                }
                if resolved.len() == before && !options.allow_no_indices {
                    tracing::debug!(target: "vigil_audit", pattern, "pattern matched no indices");
                }
            } else if let Some(targets) = state.aliases.get(pattern) {
                resolved.extend(targets.iter().cloned());
            } else if state.indices.contains(pattern) || !options.ignore_unavailable {
                resolved.insert(pattern.clone());
            }
        }

        resolved.into_iter().collect()
    }
}
