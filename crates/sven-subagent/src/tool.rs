// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! (D) SubAgentTool — the `sven_tools::Tool` a parent agent calls to drive a
//! wrapped sub-agent, mediating HITL suspension/resumption through a
//! [`CoordinatorContext`] and [`InjectionHook`].

use serde_json::{json, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use async_trait::async_trait;
use sven_config::SubAgentToolConfig;
use sven_model::Message;
use sven_tools::policy::ApprovalPolicy;
use sven_tools::{Tool, ToolCall, ToolOutput, ToolOutputPart};

use sven_core::AgentEvent;
use tokio::sync::mpsc;

use crate::capability::{AgentProvider, StreamOptions, TerminationReason};
use crate::context::{CoordinatorContext, META_GENERATE_REASON, META_SESSION_ID, META_SUSPENDED};
use crate::error::CoordinatorError;
use crate::hook::InjectionHook;
use crate::session_store::SessionStore;

/// Fallback description used when neither the config nor the wrapped agent
/// supplies one.
fn default_description(name: &str) -> String {
    format!("Call {name} to complete tasks")
}

/// `sven_tools::Tool` wrapping an [`AgentProvider`], coordinating suspension
/// and resumption for its nested agent.
pub struct SubAgentTool {
    provider: Box<dyn AgentProvider>,
    config: SubAgentToolConfig,
    context: CoordinatorContext,
    hook: InjectionHook,
    session_store: Box<dyn SessionStore>,
    name: String,
    description: String,
    /// Out-of-band sink for nested-agent events, set via [`Self::with_emitter`].
    /// `sven_tools::Tool::execute` takes `&self` with no per-call side
    /// channel, so `forward_events` can only ever forward to a sink wired in
    /// once at construction — mirroring how the TUI/CI runner each hold one
    /// long-lived `AgentEvent` sender rather than one per turn.
    emitter: Option<mpsc::Sender<AgentEvent>>,
}

impl SubAgentTool {
    /// Construct a tool around `provider`. Fails if `config.enable_hitl` is
    /// set but the provider's agents cannot suspend.
    pub fn new(
        provider: Box<dyn AgentProvider>,
        config: SubAgentToolConfig,
        session_store: Box<dyn SessionStore>,
    ) -> Result<Self, CoordinatorError> {
        if config.enable_hitl && !provider.capabilities().can_suspend {
            return Err(CoordinatorError::IncompatibleHitl);
        }

        let name = config.tool_name.clone().unwrap_or_else(|| {
            provider
                .agent_name()
                .map(Self::derive_tool_name)
                .unwrap_or_else(|| "call_agent".to_string())
        });

        let description = config
            .description
            .clone()
            .or_else(|| provider.agent_description().map(str::to_string))
            .unwrap_or_else(|| default_description(&name));

        Ok(Self {
            provider,
            config,
            context: CoordinatorContext::new(),
            hook: InjectionHook::new(),
            session_store,
            name,
            description,
            emitter: None,
        })
    }

    /// Wire a long-lived sink that receives every nested-agent [`AgentEvent`]
    /// when `config.forward_events` is set. Without this, `forward_events`
    /// still drives the agent through [`crate::capability::SubAgent::stream`]
    /// (so any forwarding the wrapped agent itself does internally still
    /// happens) but the events themselves have nowhere external to go.
    pub fn with_emitter(mut self, emitter: mpsc::Sender<AgentEvent>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Warn (non-fatal) if HITL is enabled here but the parent agent that
    /// will call this tool is known not to have its own sub-agent HITL
    /// enabled — resumption from the parent side would then be impossible.
    ///
    /// Per the no-runtime-parent-lookup constraint, `parent_has_hitl` is a
    /// flag the factory exposes synchronously rather than anything this
    /// tool looks up itself; pass `None` when the caller cannot determine
    /// it (e.g. a one-shot CLI invocation with no addressable parent), in
    /// which case no warning is emitted.
    pub fn with_parent_hitl_capability(self, parent_has_hitl: Option<bool>) -> Self {
        if self.config.enable_hitl && parent_has_hitl == Some(false) {
            warn!(
                tool = %self.name,
                "parent agent does not have sub-agent HITL enabled; resumption from the parent side would be impossible"
            );
        }
        self
    }

    /// `"Research Assistant"` → `"call_research_assistant"`.
    fn derive_tool_name(agent_name: &str) -> String {
        let slug: String = agent_name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
            .collect();
        format!("call_{slug}")
    }

    fn conversation_logical_name(&self, session_id: &str) -> String {
        format!("subagent::{session_id}")
    }

    /// Build the "normal" (non-suspended) result for `outcome`.
    fn normal_result(call_id: &str, session_id: &str, text: String) -> ToolOutput {
        let mut metadata = serde_json::Map::new();
        metadata.insert(META_SESSION_ID.to_string(), json!(session_id));
        metadata.insert(
            META_GENERATE_REASON.to_string(),
            serde_json::to_value(TerminationReason::ModelStop).unwrap_or(Value::Null),
        );
        let content = format!("session_id: {session_id}\n\n{text}");
        ToolOutput::ok(call_id, content).with_metadata(metadata)
    }

    /// Build the suspended result and stage the pending tool calls so a
    /// later `submitSubAgentResult(s)` + re-invocation can resume them.
    ///
    /// Output content is the concatenation, in order, of all `TextBlock`s
    /// then all `ToolUseBlock`s from the sub-agent's last message: one
    /// `Text` part for `text` (if non-empty) followed by one `ToolUse` part
    /// per pending call.
    fn suspended_result(
        &self,
        call_id: &str,
        session_id: &str,
        reason: TerminationReason,
        text: String,
        pending: &[sven_tools::ToolCall],
    ) -> ToolOutput {
        if let Err(e) = self.context.store.set_session_id(call_id, session_id) {
            warn!(error = %e, call_id = %call_id, "failed to register pending session for suspended call");
        }

        let mut metadata = serde_json::Map::new();
        metadata.insert(META_SUSPENDED.to_string(), json!(true));
        metadata.insert(META_SESSION_ID.to_string(), json!(session_id));
        metadata.insert(
            META_GENERATE_REASON.to_string(),
            serde_json::to_value(reason).unwrap_or(Value::Null),
        );

        let mut parts = Vec::new();
        if !text.is_empty() {
            parts.push(ToolOutputPart::Text(text));
        }
        parts.extend(pending.iter().map(|tc| ToolOutputPart::ToolUse {
            id: tc.id.clone(),
            name: tc.name.clone(),
            args: tc.args.clone(),
        }));

        let content = parts
            .iter()
            .map(|p| match p {
                ToolOutputPart::Text(t) => t.clone(),
                ToolOutputPart::Image(url) => url.clone(),
                ToolOutputPart::ToolUse { id, name, args } => {
                    format!("[tool_use {name} id={id} args={args}]")
                }
            })
            .collect::<Vec<_>>()
            .join("\n");

        ToolOutput {
            call_id: call_id.to_string(),
            content,
            parts,
            is_error: false,
            name: None,
            metadata,
        }
    }
}

#[async_trait]
impl Tool for SubAgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "The message to send to the sub-agent"
                },
                "session_id": {
                    "type": "string",
                    "description": "Resume an existing sub-agent conversation by id. \
                                     Omit to start a fresh conversation."
                }
            },
            "required": ["message"]
        })
    }

    fn default_policy(&self) -> ApprovalPolicy {
        ApprovalPolicy::Ask
    }

    async fn execute(&self, call: &ToolCall) -> ToolOutput {
        let mut call = call.clone();
        if self.config.enable_hitl {
            self.hook.intercept(&mut call, &self.context);
        }

        let resume_payload = call.metadata.get(crate::hook::META_PREVIOUS_TOOL_RESULT).cloned();
        let resuming = resume_payload.is_some();

        let session_id = call
            .args
            .get("session_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let message = call.args.get("message").and_then(|v| v.as_str()).unwrap_or("");
        if !resuming && message.is_empty() {
            return ToolOutput::err(&call.id, "Message is required");
        }

        let mut agent = self.provider.new_agent(&session_id);

        let logical_name = self.conversation_logical_name(&session_id);
        if let Some(stateful) = agent.as_stateful_mut() {
            if let Err(e) = stateful.load_from(self.session_store.as_ref(), &logical_name).await {
                warn!(error = %e, session_id = %session_id, "failed to load sub-agent state");
            }
        }

        let messages = if let Some(payload) = resume_payload {
            let outputs: Vec<ToolOutput> = match serde_json::from_value(payload) {
                Ok(v) => v,
                Err(e) => return ToolOutput::err(&call.id, format!("Execution error: {e}")),
            };
            outputs
                .into_iter()
                .map(|o| Message::tool_result(o.call_id.clone(), o.content.clone()))
                .collect()
        } else {
            vec![Message::user(message)]
        };

        debug!(session_id = %session_id, resuming, tool = %self.name, "subagent tool: driving nested agent");

        let step = if self.config.forward_events {
            if let Some(sink) = &self.emitter {
                agent.stream(messages, sink.clone(), StreamOptions::default()).await
            } else {
                let (tx, mut rx) = mpsc::channel(256);
                let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
                let result = agent.stream(messages, tx, StreamOptions::default()).await;
                let _ = drain.await;
                result
            }
        } else {
            agent.call(messages).await
        };

        let outcome = match step {
            Ok(o) => o,
            Err(e) => return ToolOutput::err(&call.id, format!("Execution error: {e}")),
        };

        if let Some(stateful) = agent.as_stateful_mut() {
            if let Err(e) = stateful.save_to(self.session_store.as_ref(), &logical_name).await {
                warn!(error = %e, session_id = %session_id, "failed to save sub-agent state");
            }
        }

        match outcome.reason {
            TerminationReason::ModelStop => {
                Self::normal_result(&call.id, &outcome.session_id, outcome.text)
            }
            suspended if self.config.enable_hitl => self.suspended_result(
                &call.id,
                &outcome.session_id,
                suspended,
                outcome.text,
                &outcome.pending_tool_calls,
            ),
            // HITL disabled: downgrade what would have been a suspended
            // result to an ordinary text result instead of surfacing it.
            _ => Self::normal_result(&call.id, &outcome.session_id, outcome.text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::{AgentCapabilities, AgentStepOutcome, SubAgent};
    use crate::session_store::InMemorySessionStore;
    use async_trait::async_trait;
    use sven_core::AgentEvent;
    use tokio::sync::mpsc;

    struct StubAgent {
        session_id: String,
        reply: String,
    }

    #[async_trait]
    impl SubAgent for StubAgent {
        async fn call(&mut self, _messages: Vec<Message>) -> anyhow::Result<AgentStepOutcome> {
            Ok(AgentStepOutcome {
                session_id: self.session_id.clone(),
                text: self.reply.clone(),
                pending_tool_calls: Vec::new(),
                reason: TerminationReason::ModelStop,
            })
        }

        async fn stream(
            &mut self,
            messages: Vec<Message>,
            tx: mpsc::Sender<AgentEvent>,
            _opts: StreamOptions,
        ) -> anyhow::Result<AgentStepOutcome> {
            let _ = tx.send(AgentEvent::TextComplete(self.reply.clone())).await;
            self.call(messages).await
        }

        fn capabilities(&self) -> AgentCapabilities {
            AgentCapabilities { can_suspend: false, participates_in_state: false }
        }

        fn session_id(&self) -> &str {
            &self.session_id
        }
    }

    struct StubProvider;

    impl AgentProvider for StubProvider {
        fn new_agent(&self, session_id: &str) -> Box<dyn SubAgent> {
            Box::new(StubAgent { session_id: session_id.to_string(), reply: "hello there".to_string() })
        }

        fn capabilities(&self) -> AgentCapabilities {
            AgentCapabilities { can_suspend: false, participates_in_state: false }
        }

        fn agent_name(&self) -> Option<&str> {
            Some("Research Assistant")
        }
    }

    fn tool() -> SubAgentTool {
        SubAgentTool::new(
            Box::new(StubProvider),
            SubAgentToolConfig::default(),
            Box::new(InMemorySessionStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn derives_name_from_agent_display_name() {
        let t = tool();
        assert_eq!(t.name(), "call_research_assistant");
    }

    #[test]
    fn construction_fails_when_hitl_requested_but_unsupported() {
        let mut config = SubAgentToolConfig::default();
        config.enable_hitl = true;
        let err = SubAgentTool::new(Box::new(StubProvider), config, Box::new(InMemorySessionStore::new()))
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::IncompatibleHitl));
    }

    #[tokio::test]
    async fn missing_message_on_fresh_call_is_an_error() {
        let t = tool();
        let call = ToolCall { id: "c1".into(), name: t.name().to_string(), args: json!({}), metadata: Default::default() };
        let out = t.execute(&call).await;
        assert!(out.is_error);
        assert_eq!(out.content, "Message is required");
    }

    #[tokio::test]
    async fn fresh_call_returns_normal_result_with_session_metadata() {
        let t = tool();
        let call = ToolCall {
            id: "c1".into(),
            name: t.name().to_string(),
            args: json!({"message": "hi"}),
            metadata: Default::default(),
        };
        let out = t.execute(&call).await;
        assert!(!out.is_error);
        assert!(out.content.starts_with("session_id: "));
        assert!(out.content.ends_with("hello there"));
        assert!(out.metadata.contains_key(META_SESSION_ID));
    }

    struct SuspendingAgent {
        session_id: String,
    }

    #[async_trait]
    impl SubAgent for SuspendingAgent {
        async fn call(&mut self, _messages: Vec<Message>) -> anyhow::Result<AgentStepOutcome> {
            Ok(AgentStepOutcome {
                session_id: self.session_id.clone(),
                text: "let me check that for you".to_string(),
                pending_tool_calls: vec![ToolCall {
                    id: "inner-1".into(),
                    name: "run_query".into(),
                    args: json!({"q": "select 1"}),
                    metadata: Default::default(),
                }],
                reason: TerminationReason::ToolSuspended,
            })
        }

        async fn stream(
            &mut self,
            messages: Vec<Message>,
            _tx: mpsc::Sender<AgentEvent>,
            _opts: StreamOptions,
        ) -> anyhow::Result<AgentStepOutcome> {
            self.call(messages).await
        }

        fn capabilities(&self) -> AgentCapabilities {
            AgentCapabilities { can_suspend: true, participates_in_state: false }
        }

        fn session_id(&self) -> &str {
            &self.session_id
        }
    }

    struct SuspendingProvider;

    impl AgentProvider for SuspendingProvider {
        fn new_agent(&self, session_id: &str) -> Box<dyn SubAgent> {
            Box::new(SuspendingAgent { session_id: session_id.to_string() })
        }

        fn capabilities(&self) -> AgentCapabilities {
            AgentCapabilities { can_suspend: true, participates_in_state: false }
        }

        fn agent_name(&self) -> Option<&str> {
            Some("Query Assistant")
        }
    }

    #[tokio::test]
    async fn suspended_result_carries_text_then_tool_use_parts() {
        let mut config = SubAgentToolConfig::default();
        config.enable_hitl = true;
        let t = SubAgentTool::new(Box::new(SuspendingProvider), config, Box::new(InMemorySessionStore::new()))
            .unwrap();
        let call = ToolCall {
            id: "c1".into(),
            name: t.name().to_string(),
            args: json!({"message": "run the query"}),
            metadata: Default::default(),
        };
        let out = t.execute(&call).await;
        assert!(!out.is_error);
        assert_eq!(out.metadata.get(META_SUSPENDED), Some(&json!(true)));
        assert!(!out.metadata.contains_key("pending_tool_calls"));

        assert_eq!(out.parts.len(), 2);
        assert!(matches!(&out.parts[0], ToolOutputPart::Text(t) if t == "let me check that for you"));
        match &out.parts[1] {
            ToolOutputPart::ToolUse { id, name, args } => {
                assert_eq!(id, "inner-1");
                assert_eq!(name, "run_query");
                assert_eq!(args, &json!({"q": "select 1"}));
            }
            other => panic!("expected ToolUse part, got {other:?}"),
        }

        assert!(out.content.contains("let me check that for you"));
        assert!(out.content.contains("run_query"));
    }
}
