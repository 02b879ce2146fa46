// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! (B) CoordinatorContext — a thin façade owning one [`PendingStore`], plus
//! suspension-aware static helpers over a sub-agent tool result.

use sven_tools::ToolOutput;
use tracing::warn;

use crate::capability::TerminationReason;
use crate::error::CoordinatorError;
use crate::pending_store::{InnerToolResult, PendingContext, PendingStore, PendingStoreSnapshot};
use crate::session_store::SessionStore;

/// Fixed logical name this coordinator's pending-store snapshot is saved
/// under (spec §6 "Session storage contract").
pub const CONTEXT_LOGICAL_NAME: &str = "subagent_context";

/// Metadata key marking a result as produced by suspension.
pub const META_SUSPENDED: &str = "suspended";
/// Metadata key carrying the originating sub-agent's session id.
pub const META_SESSION_ID: &str = "subagent_session_id";
/// Metadata key carrying the [`TerminationReason`] that caused suspension.
pub const META_GENERATE_REASON: &str = "subagent_generate_reason";

/// Owns exactly one [`PendingStore`]. Each `SubAgentTool` owns its own
/// `CoordinatorContext` (spec §9 "Global state" — no process-wide
/// singletons); callers that want to share pending state across tools pass
/// an explicit context.
pub struct CoordinatorContext {
    pub store: PendingStore,
}

impl CoordinatorContext {
    pub fn new() -> Self {
        Self {
            store: PendingStore::new(),
        }
    }

    /// Stage one inner tool result for `outer_id`.
    pub fn submit_subagent_result(
        &self,
        outer_id: &str,
        result: InnerToolResult,
    ) -> Result<(), CoordinatorError> {
        self.submit_subagent_results(outer_id, vec![result])
    }

    /// Stage a batch of inner tool results for `outer_id`.
    ///
    /// Requires a prior `set_session_id` on the same id (surfaced as
    /// [`CoordinatorError::UnknownOuterCall`], not `MissingSession` —
    /// distinct from `PendingStore::add_results`'s own error because the
    /// caller here is the outer-facing submission API, not the hook).
    pub fn submit_subagent_results(
        &self,
        outer_id: &str,
        results: Vec<InnerToolResult>,
    ) -> Result<(), CoordinatorError> {
        if outer_id.is_empty() {
            return Err(CoordinatorError::InvalidArgument(
                "outer tool-call id must not be empty".into(),
            ));
        }
        if results.is_empty() {
            return Err(CoordinatorError::InvalidArgument(
                "result list must not be empty".into(),
            ));
        }
        if !self.store.contains(outer_id) {
            return Err(CoordinatorError::UnknownOuterCall(outer_id.to_string()));
        }
        self.store.add_results(outer_id, results)
    }

    /// Atomic read-and-remove of the pending context for `outer_id`.
    pub fn consume_pending_result(&self, outer_id: &str) -> Option<PendingContext> {
        self.store.remove(outer_id)
    }

    /// Returns `metadata.subagent_session_id` when present as a string.
    pub fn extract_session_id(result: &ToolOutput) -> Option<String> {
        result
            .metadata
            .get(META_SESSION_ID)
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Equivalent to `extract_session_id(result).is_some()`.
    pub fn is_subagent_result(result: &ToolOutput) -> bool {
        Self::extract_session_id(result).is_some()
    }

    /// The result's termination reason, or [`TerminationReason::ModelStop`]
    /// when the metadata key is absent or not a recognised reason.
    pub fn termination_reason(result: &ToolOutput) -> TerminationReason {
        result
            .metadata
            .get(META_GENERATE_REASON)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(TerminationReason::ModelStop)
    }

    /// Persist the pending store under `"subagent_context"` at `key`.
    pub async fn save_to(&self, store: &dyn SessionStore, key: &str) -> anyhow::Result<()> {
        let snapshot = self.store.snapshot();
        let value = serde_json::to_value(snapshot)?;
        if let Err(e) = store.save(key, CONTEXT_LOGICAL_NAME, value).await {
            warn!(error = %e, key = %key, "failed to save pending-store snapshot");
            return Err(e);
        }
        Ok(())
    }

    /// Replace the in-memory store with a previously saved snapshot. Returns
    /// `Ok(false)` when there is nothing saved under `key` yet.
    pub async fn load_from(&self, store: &dyn SessionStore, key: &str) -> anyhow::Result<bool> {
        match store.get(key, CONTEXT_LOGICAL_NAME).await {
            Ok(Some(value)) => {
                let snapshot: PendingStoreSnapshot = serde_json::from_value(value)?;
                self.store.restore(snapshot);
                Ok(true)
            }
            Ok(None) => Ok(false),
            Err(e) => {
                warn!(error = %e, key = %key, "failed to load pending-store snapshot");
                Err(e)
            }
        }
    }
}

impl Default for CoordinatorContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session_store::InMemorySessionStore;
    use serde_json::json;
    use sven_tools::ToolOutput;

    fn suspended_result(session_id: &str, reason: TerminationReason) -> ToolOutput {
        let mut metadata = serde_json::Map::new();
        metadata.insert(META_SUSPENDED.to_string(), json!(true));
        metadata.insert(META_SESSION_ID.to_string(), json!(session_id));
        metadata.insert(META_GENERATE_REASON.to_string(), serde_json::to_value(reason).unwrap());
        ToolOutput::ok("outer-1", "Calling external API…").with_metadata(metadata)
    }

    #[test]
    fn submit_fails_for_unknown_outer_id() {
        let ctx = CoordinatorContext::new();
        let err = ctx
            .submit_subagent_result("outer-1", ToolOutput::ok("x", "y"))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::UnknownOuterCall(_)));
    }

    #[test]
    fn submit_succeeds_after_set_session_id() {
        let ctx = CoordinatorContext::new();
        ctx.store.set_session_id("outer-1", "sess-1").unwrap();
        ctx.submit_subagent_result("outer-1", ToolOutput::ok("x", "y")).unwrap();
        assert!(ctx.store.has_pending_results("outer-1"));
    }

    #[test]
    fn consume_removes_entry() {
        let ctx = CoordinatorContext::new();
        ctx.store.set_session_id("outer-1", "sess-1").unwrap();
        ctx.submit_subagent_result("outer-1", ToolOutput::ok("x", "y")).unwrap();
        let consumed = ctx.consume_pending_result("outer-1").unwrap();
        assert_eq!(consumed.pending_results.len(), 1);
        assert!(!ctx.store.contains("outer-1"));
    }

    #[test]
    fn extract_session_id_reads_metadata() {
        let result = suspended_result("sess-42", TerminationReason::ToolSuspended);
        assert_eq!(CoordinatorContext::extract_session_id(&result).as_deref(), Some("sess-42"));
        assert!(CoordinatorContext::is_subagent_result(&result));
    }

    #[test]
    fn plain_result_is_not_a_subagent_result() {
        let result = ToolOutput::ok("outer-1", "plain text");
        assert!(!CoordinatorContext::is_subagent_result(&result));
        assert_eq!(CoordinatorContext::termination_reason(&result), TerminationReason::ModelStop);
    }

    #[test]
    fn termination_reason_round_trips_through_metadata() {
        let result = suspended_result("sess-1", TerminationReason::ActingStopRequested);
        assert_eq!(
            CoordinatorContext::termination_reason(&result),
            TerminationReason::ActingStopRequested
        );
    }

    #[tokio::test]
    async fn save_and_load_round_trip_preserves_entries() {
        let ctx = CoordinatorContext::new();
        ctx.store.set_session_id("outer-1", "sess-1").unwrap();
        ctx.submit_subagent_result("outer-1", ToolOutput::ok("x", "y")).unwrap();

        let backing = InMemorySessionStore::new();
        ctx.save_to(&backing, "sess-1").await.unwrap();

        let restored = CoordinatorContext::new();
        let found = restored.load_from(&backing, "sess-1").await.unwrap();
        assert!(found);
        assert_eq!(restored.store.get_session_id("outer-1").as_deref(), Some("sess-1"));
        assert_eq!(restored.store.get_pending_results("outer-1").len(), 1);
    }

    #[tokio::test]
    async fn load_from_missing_key_returns_false() {
        let ctx = CoordinatorContext::new();
        let backing = InMemorySessionStore::new();
        assert!(!ctx.load_from(&backing, "no-such-session").await.unwrap());
    }
}
