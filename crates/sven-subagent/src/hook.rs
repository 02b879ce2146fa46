// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! (C) InjectionHook — a pre-acting interceptor that rewrites a tool-use
//! block in place when the coordinator's [`PendingStore`] holds staged
//! results for it.
//!
//! `sven_core::Agent` has no generic pre-acting hook bus of its own (it
//! drives its own tool-call phases inline in `run_agentic_loop`), so this is
//! a plain unit the acting phase calls explicitly for each [`ToolCall`]
//! immediately before dispatch — matching spec §4.C while fitting the
//! workspace's direct-call style rather than inventing an event bus the
//! rest of it doesn't have.

use serde_json::Value;
use tracing::debug;

use crate::context::CoordinatorContext;
use sven_tools::ToolCall;

/// Metadata key the hook adds to a rewritten tool call: the staged inner
/// tool results to inject (spec §6 "Resume envelope").
pub const META_PREVIOUS_TOOL_RESULT: &str = "previous_tool_result";
/// Input-argument key the hook adds to a rewritten tool call: the session
/// id the staged results belong to.
pub const ARG_SESSION_ID: &str = "session_id";

/// Stateless interceptor over a [`CoordinatorContext`].
#[derive(Default)]
pub struct InjectionHook;

impl InjectionHook {
    pub fn new() -> Self {
        Self
    }

    /// Rewrite `call` in place if `ctx` holds staged results for its id.
    ///
    /// A no-op (not even a metadata touch) when the call has no id, its
    /// `args` is not a JSON object, or the pending store has no entry for
    /// it — spec §8 scenario S6 requires the untouched call to compare
    /// structurally equal to the original.
    pub fn intercept(&self, call: &mut ToolCall, ctx: &CoordinatorContext) {
        if call.id.is_empty() || !call.args.is_object() {
            return;
        }
        let Some(pending) = ctx.consume_pending_result(&call.id) else {
            return;
        };

        debug!(
            outer_id = %call.id,
            session_id = %pending.session_id,
            staged = pending.pending_results.len(),
            "injection hook: rewriting tool-use with staged results"
        );

        if let Value::Object(args) = &mut call.args {
            args.insert(
                ARG_SESSION_ID.to_string(),
                Value::String(pending.session_id.clone()),
            );
        }

        let staged = serde_json::to_value(&pending.pending_results)
            .unwrap_or_else(|_| Value::Array(Vec::new()));
        call.metadata
            .insert(META_PREVIOUS_TOOL_RESULT.to_string(), staged);
    }
}
