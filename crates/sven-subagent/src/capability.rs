// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Capability traits a wrapped agent must satisfy to be driven by
//! [`crate::tool::SubAgentTool`].
//!
//! Two capability surfaces exist and are feature-detected independently
//! rather than folded into one type hierarchy: [`SubAgent`] (the bare
//! reasoning/acting engine) and [`StatefulAgent`] (the optional state
//! module). An agent may implement either or both.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sven_core::AgentEvent;
use sven_model::Message;
use tokio::sync::mpsc;

use crate::session_store::SessionStore;

/// Why a [`SubAgent`] step ended.
///
/// Only [`TerminationReason::ModelStop`] is a natural completion; the other
/// three all mean the step halted mid-flight and the caller must decide
/// whether to surface a suspended result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// The model produced a final response with no outstanding tool calls.
    ModelStop,
    /// A nested tool call needs human approval before it can run.
    ToolSuspended,
    /// The reasoning phase itself asked to stop (e.g. a plan-review gate).
    ReasoningStopRequested,
    /// The acting phase asked to stop before dispatching a tool call.
    ActingStopRequested,
}

impl TerminationReason {
    /// `true` for every reason other than [`Self::ModelStop`].
    pub fn is_suspending(self) -> bool {
        !matches!(self, Self::ModelStop)
    }
}

/// Per-call overrides for [`SubAgent::stream`]. Currently a placeholder the
/// coordinator passes through unchanged — the wrapped agent (today,
/// [`crate::reasoning_agent::ReasoningActingAgent`]) interprets the fields it
/// understands and ignores the rest, so new filters can be added without
/// breaking existing callers.
#[derive(Debug, Clone, Default)]
pub struct StreamOptions {
    /// Forward `AgentEvent::TextDelta` chunks as they arrive rather than
    /// only the final accumulated text. Ignored by callers that only care
    /// about the last event.
    pub forward_deltas: bool,
}

/// Outcome of one [`SubAgent::call`] / [`SubAgent::stream`] step.
#[derive(Debug, Clone)]
pub struct AgentStepOutcome {
    /// Session id the step ran under (unchanged from the request).
    pub session_id: String,
    /// Final assistant text, if any. Empty when the step suspended before
    /// producing a text response.
    pub text: String,
    /// Inner tool calls the sub-agent wants to run. Populated exactly when
    /// `reason` is one of the suspending variants.
    pub pending_tool_calls: Vec<sven_tools::ToolCall>,
    /// Why the step ended.
    pub reason: TerminationReason,
}

/// Capability flags reported by an [`AgentProvider`], detected once at
/// [`crate::tool::SubAgentTool`] construction time without needing a live
/// agent instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AgentCapabilities {
    /// The agent can halt mid-step and resume later with injected results.
    /// Required for HITL to be enabled.
    pub can_suspend: bool,
    /// The agent implements [`StatefulAgent`] and can save/restore its
    /// conversation state under a session id.
    pub participates_in_state: bool,
}

/// The bare reasoning/acting surface a sub-agent must expose.
#[async_trait]
pub trait SubAgent: Send {
    /// Run one step to completion without forwarding intermediate events.
    async fn call(&mut self, messages: Vec<Message>) -> anyhow::Result<AgentStepOutcome>;
    /// Run one step, forwarding every [`AgentEvent`] to `tx` as it is
    /// produced. The returned outcome reflects the *last* event only — the
    /// stream itself has already carried everything before it out-of-band.
    async fn stream(
        &mut self,
        messages: Vec<Message>,
        tx: mpsc::Sender<AgentEvent>,
        opts: StreamOptions,
    ) -> anyhow::Result<AgentStepOutcome>;
    /// Capabilities this instance reports. Constant for a given agent type;
    /// queried once at tool construction.
    fn capabilities(&self) -> AgentCapabilities;
    /// The session id this instance is bound to.
    fn session_id(&self) -> &str;
    /// Downcast-free view onto this instance's [`StatefulAgent`] surface.
    /// `None` unless [`AgentCapabilities::participates_in_state`] is true;
    /// overridden by implementations that also implement `StatefulAgent`.
    fn as_stateful_mut(&mut self) -> Option<&mut dyn StatefulAgent> {
        None
    }
}

/// Optional state-persistence surface. An agent implements this in addition
/// to [`SubAgent`] when [`AgentCapabilities::participates_in_state`] is true.
#[async_trait]
pub trait StatefulAgent {
    /// Persist this agent's conversation state under `key` in `store`.
    async fn save_to(&self, store: &dyn SessionStore, key: &str) -> anyhow::Result<()>;
    /// Restore conversation state from `key` in `store`. Returns `Ok(false)`
    /// (not an error) when no state is stored under that key yet — that is
    /// the ordinary case for a brand-new session.
    async fn load_from(&mut self, store: &dyn SessionStore, key: &str) -> anyhow::Result<bool>;
}

/// A pure factory for fresh [`SubAgent`] instances, one per tool invocation.
///
/// Mirrors `sven-core/src/task_tool.rs`'s `TaskTool::build_sub_registry`
/// pattern of building fresh per-call state from shared configuration,
/// generalized to hand back a whole agent rather than just a tool registry.
pub trait AgentProvider: Send + Sync {
    /// Build a fresh agent bound to `session_id`.
    fn new_agent(&self, session_id: &str) -> Box<dyn SubAgent>;
    /// Capabilities of the agents this provider builds. Reported without
    /// constructing an instance so `SubAgentTool::new` can fail fast.
    fn capabilities(&self) -> AgentCapabilities;
    /// Display name used to derive the tool's default name/description
    /// (spec §4.D). `None` when the wrapped agent has no configured name.
    fn agent_name(&self) -> Option<&str> {
        None
    }
    /// Description used as the tool's default description when no config
    /// override is set.
    fn agent_description(&self) -> Option<&str> {
        None
    }
}
