//! Keyed diagnostics attached to player state snapshots.
//!
//! Problems are the non-throwing half of the error model: schema failures,
//! protocol violations, and connection trouble degrade the affected topic or
//! connection and surface here for the consuming layer to render, while the
//! stream keeps flowing. Each problem is keyed so repeated identical
//! failures replace rather than accumulate.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// How bad a problem is, for display purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warn,
    Error,
}

/// A single diagnostic attached to a player state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    pub severity: Severity,
    pub message: String,

    /// Actionable hint for the user, when one exists.
    pub tip: Option<String>,

    /// Underlying error text, when the problem wraps a lower-level failure.
    pub cause: Option<String>,
}

impl Problem {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Problem { severity, message: message.into(), tip: None, cause: None }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Problem::new(Severity::Error, message)
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Problem::new(Severity::Warn, message)
    }

    pub fn with_tip(mut self, tip: impl Into<String>) -> Self {
        self.tip = Some(tip.into());
        self
    }

    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

/// Keyed, de-duplicated collection of problems.
///
/// Keys are stable strings scoped by concern (`schema:/topic`,
/// `connection-failed`, ...). Inserting under an existing key replaces the
/// previous entry. Iteration order is deterministic (sorted by key) so
/// identical player states produce identical snapshots.
#[derive(Debug, Default)]
pub struct ProblemSet {
    by_key: BTreeMap<String, Arc<Problem>>,
    cached: Option<Vec<Arc<Problem>>>,
}

impl ProblemSet {
    pub fn new() -> Self {
        ProblemSet::default()
    }

    /// Insert or replace the problem stored under `key`.
    pub fn insert(&mut self, key: impl Into<String>, problem: Problem) {
        self.by_key.insert(key.into(), Arc::new(problem));
        self.cached = None;
    }

    /// Remove the problem stored under `key`. Returns whether one existed.
    pub fn remove(&mut self, key: &str) -> bool {
        let removed = self.by_key.remove(key).is_some();
        if removed {
            self.cached = None;
        }
        removed
    }

    /// Remove every problem whose key satisfies `predicate`.
    pub fn remove_matching(&mut self, predicate: impl Fn(&str) -> bool) {
        let before = self.by_key.len();
        self.by_key.retain(|key, _| !predicate(key));
        if self.by_key.len() != before {
            self.cached = None;
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.by_key.contains_key(key)
    }

    pub fn clear(&mut self) {
        self.by_key.clear();
        self.cached = None;
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    /// Snapshot of the current problems, sorted by key.
    ///
    /// The result is cached between mutations so emitting repeated states is
    /// cheap.
    pub fn to_vec(&mut self) -> Vec<Arc<Problem>> {
        self.cached
            .get_or_insert_with(|| self.by_key.values().cloned().collect())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_keys_replace() {
        let mut problems = ProblemSet::new();
        problems.insert("connection-failed", Problem::error("attempt 1"));
        problems.insert("connection-failed", Problem::error("attempt 2"));

        let snapshot = problems.to_vec();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].message, "attempt 2");
    }

    #[test]
    fn remove_matching_by_prefix() {
        let mut problems = ProblemSet::new();
        problems.insert("pub:encoding:/a", Problem::warn("a"));
        problems.insert("pub:msgdef:/b", Problem::warn("b"));
        problems.insert("schema:/c", Problem::error("c"));

        problems.remove_matching(|key| key.starts_with("pub:"));
        assert_eq!(problems.len(), 1);
        assert!(problems.contains("schema:/c"));
    }

    #[test]
    fn snapshot_order_is_deterministic() {
        let mut problems = ProblemSet::new();
        problems.insert("b", Problem::warn("b"));
        problems.insert("a", Problem::warn("a"));

        let snapshot = problems.to_vec();
        assert_eq!(snapshot[0].message, "a");
        assert_eq!(snapshot[1].message, "b");
    }

    #[test]
    fn cache_invalidated_on_mutation() {
        let mut problems = ProblemSet::new();
        problems.insert("a", Problem::warn("a"));
        let _ = problems.to_vec();
        problems.remove("a");
        assert!(problems.to_vec().is_empty());
    }
}
