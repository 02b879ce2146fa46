// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! A HITL-capable [`SubAgent`] / [`StatefulAgent`] wrapper around a
//! `sven_core::Agent`, driving it through
//! [`Agent::submit_suspendable`][sven_core::Agent::submit_suspendable] /
//! [`Agent::resume_suspended`][sven_core::Agent::resume_suspended] and
//! classifying the resulting [`sven_core::TurnOutcome`] into the spec's
//! [`TerminationReason`].
//!
//! `sven_core::Agent`'s suspension machinery only ever halts a round because
//! one of its tool calls matched the suspension predicate, so every
//! suspension this wrapper reports classifies as
//! [`TerminationReason::ToolSuspended`] — the `ReasoningStopRequested` /
//! `ActingStopRequested` variants exist for agent implementations with a
//! finer-grained reasoning/acting split than the teacher's single
//! `run_agentic_loop_suspendable`; this wrapper never produces them (see
//! `DESIGN.md`).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sven_core::{Agent, AgentEvent, TurnOutcome};
use sven_model::{Message, MessageContent, ToolResultContent};
use sven_tools::{ToolCall, ToolOutput, ToolOutputPart};
use tokio::sync::mpsc;
use tracing::debug;

use crate::capability::{AgentCapabilities, AgentStepOutcome, StatefulAgent, StreamOptions, SubAgent, TerminationReason};
use crate::session_store::SessionStore;

const AGENT_STATE_LOGICAL_NAME: &str = "reasoning_agent_state";

/// Predicate deciding whether a nested tool call should suspend the whole
/// round. `sven_core::Agent::submit_suspendable`/`resume_suspended` takes
/// this by reference, so the wrapper holds it as a reference-counted
/// closure that can be shared across calls without re-deriving it from
/// config each time.
pub type SuspendPredicate = dyn Fn(&ToolCall) -> bool + Send + Sync;

/// Wraps a `sven_core::Agent`, exposing it through the [`SubAgent`] /
/// [`StatefulAgent`] capability traits.
pub struct ReasoningActingAgent {
    agent: Agent,
    session_id: String,
    should_suspend: Arc<SuspendPredicate>,
    /// Tool calls from the most recent `TurnOutcome::Suspended`, kept so a
    /// later `call`/`stream` carrying tool results can be paired back up
    /// with `resume_suspended`. Cleared once resumed.
    last_pending: Option<Vec<ToolCall>>,
}

#[derive(Serialize, Deserialize)]
struct PersistedState {
    messages: Vec<Message>,
    last_pending: Option<Vec<ToolCall>>,
}

impl ReasoningActingAgent {
    pub fn new(agent: Agent, session_id: impl Into<String>, should_suspend: Arc<SuspendPredicate>) -> Self {
        Self {
            agent,
            session_id: session_id.into(),
            should_suspend,
            last_pending: None,
        }
    }

    fn tool_output_from_message(msg: &Message) -> Option<ToolOutput> {
        let MessageContent::ToolResult { tool_call_id, content } = &msg.content else {
            return None;
        };
        let parts = match content {
            ToolResultContent::Text(t) => vec![ToolOutputPart::Text(t.clone())],
            ToolResultContent::Parts(parts) => parts
                .iter()
                .map(|p| match p {
                    sven_model::ToolContentPart::Text { text } => ToolOutputPart::Text(text.clone()),
                    sven_model::ToolContentPart::Image { image_url } => ToolOutputPart::Image(image_url.clone()),
                })
                .collect(),
        };
        Some(ToolOutput::with_parts(tool_call_id.clone(), parts))
    }

    /// Pair each entry of `last_pending` with the incoming tool-result
    /// message carrying the same id, in `last_pending`'s original order.
    fn pair_with_pending(
        pending: &[ToolCall],
        messages: &[Message],
    ) -> anyhow::Result<Vec<(ToolCall, ToolOutput)>> {
        let mut pairs = Vec::with_capacity(pending.len());
        for tc in pending {
            let output = messages
                .iter()
                .find_map(|m| {
                    Self::tool_output_from_message(m).filter(|o| o.call_id == tc.id)
                })
                .ok_or_else(|| {
                    anyhow::anyhow!("no injected result for pending tool call {}", tc.id)
                })?;
            pairs.push((tc.clone(), output));
        }
        Ok(pairs)
    }

    async fn run(
        &mut self,
        messages: Vec<Message>,
        forward: Option<mpsc::Sender<AgentEvent>>,
    ) -> anyhow::Result<AgentStepOutcome> {
        let (inner_tx, mut inner_rx) = mpsc::channel::<AgentEvent>(256);

        let resuming = self.last_pending.is_some()
            && messages.iter().any(|m| matches!(m.content, MessageContent::ToolResult { .. }));

        let outcome = if resuming {
            let pending = self.last_pending.take().unwrap();
            let resolved = Self::pair_with_pending(&pending, &messages)?;
            debug!(session_id = %self.session_id, count = resolved.len(), "resuming suspended turn with injected results");
            self.agent
                .resume_suspended(resolved, inner_tx, &*self.should_suspend)
                .await?
        } else {
            let text = messages.first().and_then(|m| m.as_text()).unwrap_or("").to_string();
            debug!(session_id = %self.session_id, "driving fresh turn");
            self.agent
                .submit_suspendable(&text, inner_tx, &*self.should_suspend)
                .await?
        };

        let mut final_text = String::new();
        while let Some(event) = inner_rx.recv().await {
            if let AgentEvent::TextComplete(ref t) = event {
                final_text = t.clone();
            }
            if let Some(tx) = &forward {
                let _ = tx.send(event).await;
            }
        }

        match outcome {
            TurnOutcome::Completed => Ok(AgentStepOutcome {
                session_id: self.session_id.clone(),
                text: final_text,
                pending_tool_calls: Vec::new(),
                reason: TerminationReason::ModelStop,
            }),
            TurnOutcome::Suspended { pending } => {
                self.last_pending = Some(pending.clone());
                Ok(AgentStepOutcome {
                    session_id: self.session_id.clone(),
                    text: final_text,
                    pending_tool_calls: pending,
                    reason: TerminationReason::ToolSuspended,
                })
            }
        }
    }
}

#[async_trait]
impl SubAgent for ReasoningActingAgent {
    async fn call(&mut self, messages: Vec<Message>) -> anyhow::Result<AgentStepOutcome> {
        self.run(messages, None).await
    }

    async fn stream(
        &mut self,
        messages: Vec<Message>,
        tx: mpsc::Sender<AgentEvent>,
        _opts: StreamOptions,
    ) -> anyhow::Result<AgentStepOutcome> {
        self.run(messages, Some(tx)).await
    }

    fn capabilities(&self) -> AgentCapabilities {
        AgentCapabilities {
            can_suspend: true,
            participates_in_state: true,
        }
    }

    fn session_id(&self) -> &str {
        &self.session_id
    }

    fn as_stateful_mut(&mut self) -> Option<&mut dyn StatefulAgent> {
        Some(self)
    }
}

#[async_trait]
impl StatefulAgent for ReasoningActingAgent {
    async fn save_to(&self, store: &dyn SessionStore, key: &str) -> anyhow::Result<()> {
        let state = PersistedState {
            messages: self.agent.session().messages.clone(),
            last_pending: self.last_pending.clone(),
        };
        let value: Value = serde_json::to_value(state)?;
        store.save(key, AGENT_STATE_LOGICAL_NAME, value).await
    }

    async fn load_from(&mut self, store: &dyn SessionStore, key: &str) -> anyhow::Result<bool> {
        let Some(value) = store.get(key, AGENT_STATE_LOGICAL_NAME).await? else {
            return Ok(false);
        };
        let state: PersistedState = serde_json::from_value(value)?;
        self.agent.session_mut().replace_messages(state.messages);
        self.last_pending = state.last_pending;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sven_config::AgentConfig;
    use sven_core::AgentRuntimeContext;
    use sven_model::MockProvider;
    use sven_tools::{events::ToolEvent, ToolRegistry};
    use tokio::sync::Mutex;

    fn make_agent() -> Agent {
        let model = Arc::new(MockProvider);
        let tools = Arc::new(ToolRegistry::new());
        let config = Arc::new(AgentConfig::default());
        let runtime = AgentRuntimeContext::default();
        let mode_lock = Arc::new(Mutex::new(sven_config::AgentMode::Agent));
        let (_tx, rx) = mpsc::channel::<ToolEvent>(8);
        Agent::new(model, tools, config, runtime, mode_lock, rx, 128_000)
    }

    fn never_suspend() -> Arc<SuspendPredicate> {
        Arc::new(|_: &ToolCall| false)
    }

    #[tokio::test]
    async fn fresh_call_completes_with_model_stop() {
        let mut wrapper = ReasoningActingAgent::new(make_agent(), "sess-1", never_suspend());
        let outcome = wrapper.call(vec![Message::user("Hello")]).await.unwrap();
        assert_eq!(outcome.reason, TerminationReason::ModelStop);
        assert!(outcome.text.contains("Hello"));
        assert_eq!(outcome.session_id, "sess-1");
    }

    #[tokio::test]
    async fn state_round_trips_through_session_store() {
        use crate::session_store::InMemorySessionStore;

        let mut wrapper = ReasoningActingAgent::new(make_agent(), "sess-1", never_suspend());
        wrapper.call(vec![Message::user("Hello")]).await.unwrap();

        let store = InMemorySessionStore::new();
        wrapper.save_to(&store, "sess-1").await.unwrap();

        let mut restored = ReasoningActingAgent::new(make_agent(), "sess-1", never_suspend());
        let found = restored.load_from(&store, "sess-1").await.unwrap();
        assert!(found);
        assert_eq!(restored.agent.session().messages.len(), wrapper.agent.session().messages.len());
    }

    #[tokio::test]
    async fn load_from_missing_key_returns_false() {
        use crate::session_store::InMemorySessionStore;
        let store = InMemorySessionStore::new();
        let mut wrapper = ReasoningActingAgent::new(make_agent(), "sess-1", never_suspend());
        assert!(!wrapper.load_from(&store, "no-such-session").await.unwrap());
    }
}
