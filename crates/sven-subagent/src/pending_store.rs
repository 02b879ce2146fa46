// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! (A) PendingStore — a thread-safe `outerToolCallId → PendingContext`
//! mapping enforcing the sessionId-first lifecycle.
//!
//! Follows the read-snapshot/atomic-replace discipline of
//! `sven_runtime::shared::Shared<T>`: every read clones out of the lock,
//! every write replaces a whole map entry rather than mutating through a
//! held guard, so a snapshot returned to a caller is never retroactively
//! mutated by a later write.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use sven_tools::ToolOutput;

use crate::error::CoordinatorError;

/// A staged result from an inner tool call the sub-agent tried to run.
///
/// Maps directly onto `sven_tools::ToolOutput` (spec's `InnerToolResult`);
/// see `SPEC_FULL.md` §3 for why no separate wrapper type is introduced.
pub type InnerToolResult = ToolOutput;

/// The pending context held for one outer tool-call id: the session it
/// belongs to, plus any inner tool results staged for injection on resume.
///
/// Immutable once read out — callers never get a handle into the store's
/// internals, only an owned clone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingContext {
    pub outer_tool_call_id: String,
    pub session_id: String,
    pub pending_results: Vec<InnerToolResult>,
}

/// Whole-store snapshot used for save/load (spec §4.A "Serialization").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PendingStoreSnapshot {
    entries: HashMap<String, PendingContext>,
}

/// Thread-safe `outerToolCallId → PendingContext` map.
pub struct PendingStore {
    inner: RwLock<HashMap<String, PendingContext>>,
}

impl PendingStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// Creates or replaces the entry for `id` with an empty result list.
    ///
    /// Replacing an existing entry with a *different* `session_id` discards
    /// any staged results (spec invariant 4 — lifecycle restart).
    pub fn set_session_id(
        &self,
        id: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Result<(), CoordinatorError> {
        let id = id.into();
        let session_id = session_id.into();
        if id.is_empty() {
            return Err(CoordinatorError::InvalidArgument(
                "outer tool-call id must not be empty".into(),
            ));
        }
        if session_id.is_empty() {
            return Err(CoordinatorError::InvalidArgument(
                "session id must not be empty".into(),
            ));
        }
        let ctx = PendingContext {
            outer_tool_call_id: id.clone(),
            session_id,
            pending_results: Vec::new(),
        };
        self.inner
            .write()
            .expect("PendingStore lock poisoned")
            .insert(id, ctx);
        Ok(())
    }

    /// Appends one result to the entry's list, preserving order.
    pub fn add_result(
        &self,
        id: &str,
        result: InnerToolResult,
    ) -> Result<(), CoordinatorError> {
        self.add_results(id, vec![result])
    }

    /// Appends results to the entry's list, preserving order.
    ///
    /// Fails with [`CoordinatorError::MissingSession`] if no entry exists
    /// for `id` (spec invariant 2 — no writes before a `set_session_id`).
    pub fn add_results(
        &self,
        id: &str,
        results: Vec<InnerToolResult>,
    ) -> Result<(), CoordinatorError> {
        if id.is_empty() {
            return Err(CoordinatorError::InvalidArgument(
                "outer tool-call id must not be empty".into(),
            ));
        }
        if results.is_empty() {
            return Err(CoordinatorError::InvalidArgument(
                "result list must not be empty".into(),
            ));
        }
        let mut guard = self.inner.write().expect("PendingStore lock poisoned");
        let Some(existing) = guard.get(id) else {
            return Err(CoordinatorError::MissingSession(id.to_string()));
        };
        let mut updated = existing.clone();
        updated.pending_results.extend(results);
        guard.insert(id.to_string(), updated);
        Ok(())
    }

    /// The session id registered for `id`, if any.
    pub fn get_session_id(&self, id: &str) -> Option<String> {
        self.inner
            .read()
            .expect("PendingStore lock poisoned")
            .get(id)
            .map(|ctx| ctx.session_id.clone())
    }

    /// A defensive copy of the currently staged results for `id`.
    ///
    /// Returns an empty list (not `None`) when there is no entry — callers
    /// never need to distinguish "no entry" from "entry with no results"
    /// through this accessor; use [`contains`][Self::contains] for that.
    pub fn get_pending_results(&self, id: &str) -> Vec<InnerToolResult> {
        self.inner
            .read()
            .expect("PendingStore lock poisoned")
            .get(id)
            .map(|ctx| ctx.pending_results.clone())
            .unwrap_or_default()
    }

    /// `true` if an entry exists for `id`, regardless of whether it has
    /// staged results.
    pub fn contains(&self, id: &str) -> bool {
        self.inner
            .read()
            .expect("PendingStore lock poisoned")
            .contains_key(id)
    }

    /// `true` if an entry exists for `id` and its result list is non-empty.
    pub fn has_pending_results(&self, id: &str) -> bool {
        self.inner
            .read()
            .expect("PendingStore lock poisoned")
            .get(id)
            .is_some_and(|ctx| !ctx.pending_results.is_empty())
    }

    /// Atomically removes and returns the prior entry for `id`, if any.
    pub fn remove(&self, id: &str) -> Option<PendingContext> {
        self.inner
            .write()
            .expect("PendingStore lock poisoned")
            .remove(id)
    }

    /// Drops every entry.
    pub fn clear_all(&self) {
        self.inner.write().expect("PendingStore lock poisoned").clear();
    }

    /// Whole-state snapshot for persistence.
    pub fn snapshot(&self) -> PendingStoreSnapshot {
        PendingStoreSnapshot {
            entries: self.inner.read().expect("PendingStore lock poisoned").clone(),
        }
    }

    /// Replace the entire store with a previously saved snapshot.
    pub fn restore(&self, snapshot: PendingStoreSnapshot) {
        *self.inner.write().expect("PendingStore lock poisoned") = snapshot.entries;
    }
}

impl Default for PendingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(text: &str) -> InnerToolResult {
        ToolOutput::ok("call-1", text)
    }

    #[test]
    fn set_session_id_rejects_blank_ids() {
        let store = PendingStore::new();
        assert!(store.set_session_id("", "s1").is_err());
        assert!(store.set_session_id("outer-1", "").is_err());
    }

    #[test]
    fn add_result_before_set_session_id_fails() {
        let store = PendingStore::new();
        let err = store.add_result("outer-1", result("x")).unwrap_err();
        assert!(matches!(err, CoordinatorError::MissingSession(_)));
    }

    #[test]
    fn add_results_preserves_order() {
        let store = PendingStore::new();
        store.set_session_id("outer-1", "sess-1").unwrap();
        store.add_result("outer-1", result("a")).unwrap();
        store.add_result("outer-1", result("b")).unwrap();
        let results = store.get_pending_results("outer-1");
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "a");
        assert_eq!(results[1].content, "b");
    }

    #[test]
    fn consume_is_atomic_read_and_remove() {
        let store = PendingStore::new();
        store.set_session_id("outer-1", "sess-1").unwrap();
        store.add_result("outer-1", result("a")).unwrap();
        let ctx = store.remove("outer-1").unwrap();
        assert_eq!(ctx.pending_results.len(), 1);
        assert!(!store.contains("outer-1"));
        assert!(store.remove("outer-1").is_none());
    }

    #[test]
    fn defensive_copy_does_not_leak_mutations() {
        let store = PendingStore::new();
        store.set_session_id("outer-1", "sess-1").unwrap();
        store.add_result("outer-1", result("a")).unwrap();
        let mut copy = store.get_pending_results("outer-1");
        copy.push(result("mutated-in-caller-only"));
        assert_eq!(store.get_pending_results("outer-1").len(), 1);
    }

    #[test]
    fn overwriting_session_id_discards_prior_results() {
        let store = PendingStore::new();
        store.set_session_id("outer-1", "sess-1").unwrap();
        store.add_result("outer-1", result("a")).unwrap();
        store.set_session_id("outer-1", "sess-2").unwrap();
        assert!(store.get_pending_results("outer-1").is_empty());
        assert_eq!(store.get_session_id("outer-1").as_deref(), Some("sess-2"));
    }

    #[test]
    fn snapshot_round_trip_preserves_all_entries() {
        let store = PendingStore::new();
        store.set_session_id("outer-1", "sess-1").unwrap();
        store.add_result("outer-1", result("a")).unwrap();
        store.set_session_id("outer-2", "sess-2").unwrap();

        let snap = store.snapshot();
        let restored = PendingStore::new();
        restored.restore(snap);

        assert_eq!(restored.get_session_id("outer-1").as_deref(), Some("sess-1"));
        assert_eq!(restored.get_pending_results("outer-1").len(), 1);
        assert_eq!(restored.get_session_id("outer-2").as_deref(), Some("sess-2"));
    }

    #[test]
    fn clear_all_drops_everything() {
        let store = PendingStore::new();
        store.set_session_id("outer-1", "sess-1").unwrap();
        store.set_session_id("outer-2", "sess-2").unwrap();
        store.clear_all();
        assert!(!store.contains("outer-1"));
        assert!(!store.contains("outer-2"));
    }
}
