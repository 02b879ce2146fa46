// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Session storage contract (spec §6 "Session storage contract") and a
//! default in-memory implementation.
//!
//! A real deployment backs this with a file or database (out of scope per
//! `SPEC_FULL.md` §1 — referenced only through this trait); the in-memory
//! implementation here is what `SubAgentTool` defaults to and what the test
//! suite drives end-to-end.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;

/// Keyed, logically-namespaced state storage.
///
/// `key` is the session id (or another caller-chosen identifier); each key
/// may hold several independently-versioned values distinguished by
/// `logical_name` — the coordinator uses `"subagent_context"` for the
/// `PendingStore` snapshot, and delegates agent-state keys to the wrapped
/// agent itself.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Store `value` under `(key, logical_name)`, replacing any prior value.
    async fn save(&self, key: &str, logical_name: &str, value: Value) -> anyhow::Result<()>;
    /// Retrieve the value stored under `(key, logical_name)`, if any.
    async fn get(&self, key: &str, logical_name: &str) -> anyhow::Result<Option<Value>>;
}

/// Default `SessionStore`: a process-local map, gone on restart.
///
/// Sufficient for a single-process coordinator and for tests; a multi-process
/// deployment supplies its own `SessionStore` (file-backed, Redis-backed,
/// etc.) wired in at construction.
#[derive(Default)]
pub struct InMemorySessionStore {
    entries: RwLock<HashMap<(String, String), Value>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn save(&self, key: &str, logical_name: &str, value: Value) -> anyhow::Result<()> {
        self.entries
            .write()
            .expect("InMemorySessionStore lock poisoned")
            .insert((key.to_string(), logical_name.to_string()), value);
        Ok(())
    }

    async fn get(&self, key: &str, logical_name: &str) -> anyhow::Result<Option<Value>> {
        Ok(self
            .entries
            .read()
            .expect("InMemorySessionStore lock poisoned")
            .get(&(key.to_string(), logical_name.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_value() {
        let store = InMemorySessionStore::new();
        store
            .save("sess-1", "subagent_context", serde_json::json!({"a": 1}))
            .await
            .unwrap();
        let loaded = store.get("sess-1", "subagent_context").await.unwrap();
        assert_eq!(loaded, Some(serde_json::json!({"a": 1})));
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let store = InMemorySessionStore::new();
        assert!(store.get("missing", "subagent_context").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn distinct_logical_names_do_not_collide() {
        let store = InMemorySessionStore::new();
        store.save("sess-1", "a", serde_json::json!(1)).await.unwrap();
        store.save("sess-1", "b", serde_json::json!(2)).await.unwrap();
        assert_eq!(store.get("sess-1", "a").await.unwrap(), Some(serde_json::json!(1)));
        assert_eq!(store.get("sess-1", "b").await.unwrap(), Some(serde_json::json!(2)));
    }
}
