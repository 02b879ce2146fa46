// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Sub-agent-as-tool coordinator: wraps a `sven_core::Agent`-shaped
//! reasoning/acting engine so a parent agent can call it as an ordinary
//! `sven_tools::Tool`, mediating human-in-the-loop suspension (a nested tool
//! call needs approval) and resumption (the parent re-invokes with staged
//! results).
//!
//! The four pieces making this work each live in their own module:
//! [`pending_store`] ((A) the outer-call-id → staged-results map),
//! [`context`] ((B) the façade owning a `PendingStore`), [`hook`] ((C) the
//! pre-dispatch rewrite that injects staged results), and [`tool`] ((D) the
//! `Tool` impl itself). [`capability`] defines the traits a wrapped agent
//! must satisfy; [`reasoning_agent`] is the concrete wrapper around
//! `sven_core::Agent`; [`session_store`] is the storage contract both
//! `context` and `reasoning_agent` persist through.

pub mod capability;
pub mod context;
pub mod error;
pub mod hook;
pub mod pending_store;
pub mod reasoning_agent;
pub mod session_store;
pub mod tool;

pub use capability::{
    AgentCapabilities, AgentProvider, AgentStepOutcome, StatefulAgent, StreamOptions, SubAgent,
    TerminationReason,
};
pub use context::CoordinatorContext;
pub use error::CoordinatorError;
pub use hook::InjectionHook;
pub use pending_store::{InnerToolResult, PendingContext, PendingStore, PendingStoreSnapshot};
pub use reasoning_agent::{ReasoningActingAgent, SuspendPredicate};
pub use session_store::{InMemorySessionStore, SessionStore};
pub use tool::SubAgentTool;
