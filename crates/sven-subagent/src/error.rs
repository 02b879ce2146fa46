// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use thiserror::Error;

/// Errors raised by [`crate::pending_store::PendingStore`] and
/// [`crate::context::CoordinatorContext`].
///
/// Setup/argument errors (`InvalidArgument`, `MissingSession`,
/// `UnknownOuterCall`, `IncompatibleHitl`) are programmer errors: they
/// surface directly at the call site via `Result`. `SubAgentTool::execute`
/// never lets one of these reach the model — it only ever returns a
/// `ToolOutput`, converting any `CoordinatorError` into `ToolOutput::err`.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// A null/blank identifier, empty result list, or otherwise malformed
    /// argument was passed to a `PendingStore` or `CoordinatorContext` call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// `addResult`/`addResults` was called for an outer id with no prior
    /// `setSessionId`.
    #[error("no session registered for outer call id {0:?}")]
    MissingSession(String),
    /// `submitSubAgentResult(s)` was called for an outer id the store has
    /// never seen.
    #[error("unknown outer call id {0:?}")]
    UnknownOuterCall(String),
    /// Constructing a HITL-enabled `SubAgentTool` over an agent that does
    /// not report `can_suspend` in its `AgentCapabilities`.
    #[error("agent does not support suspension; cannot enable HITL for it")]
    IncompatibleHitl,
    /// Saving or loading session/pending state failed. Never surfaced to a
    /// tool caller — logged and treated as non-fatal wherever it occurs.
    #[error("state I/O failed: {0}")]
    StateIo(String),
}
