//
// Pluggable session persistence
//
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

use crate::cache::Cache;
use crate::error::Result;
use crate::token::TokenSet;

/// Everything a session carries server-side. Copies travel out of the store;
/// changes go back through [`SessionStore::touch`].
#[derive(Debug, Clone)]
pub struct SessionData {
    pub tokens: TokenSet,
    pub user: Option<Value>,
    pub csrf_token: Option<String>,
    pub state: Option<String>,
    pub code_verifier: Option<String>,
}

impl SessionData {
    pub fn new(tokens: TokenSet) -> Self {
        Self {
            tokens,
            user: None,
            csrf_token: None,
            state: None,
            code_verifier: None,
        }
    }
}

/// Server-side session backend. The in-memory implementation below ships
/// with the library; anything else (Redis, a database) is the embedder's.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a new session and return its generated `sid`.
    async fn set(&self, data: SessionData) -> Result<String>;
    async fn get(&self, sid: &str) -> Result<Option<SessionData>>;
    /// Replace the stored data and extend the session's lifetime.
    async fn touch(&self, sid: &str, data: SessionData) -> Result<()>;
    async fn destroy(&self, sid: &str) -> Result<()>;
}

/// TTL-bound in-memory store.
pub struct MemorySessionStore {
    sessions: Arc<Cache<String, SessionData>>,
    ttl: Duration,
}

impl MemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: Arc::new(Cache::new()),
            ttl,
        }
    }

    /// Periodically drop expired sessions instead of waiting for a lookup.
    pub fn start_sweeper(&self, every: Duration) {
        self.sessions.spawn_sweeper(every);
    }

    pub fn len(&self) -> usize {
        self.sessions.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn set(&self, data: SessionData) -> Result<String> {
        let sid = Uuid::new_v4().to_string();
        self.sessions.set_with_ttl(sid.clone(), data, Some(self.ttl));
        Ok(sid)
    }

    async fn get(&self, sid: &str) -> Result<Option<SessionData>> {
        Ok(self.sessions.get(&sid.to_string()))
    }

    async fn touch(&self, sid: &str, data: SessionData) -> Result<()> {
        if self.sessions.get(&sid.to_string()).is_none() {
            err!(SessionError, format!("Cannot touch unknown session {sid}"));
        }
        self.sessions.set_with_ttl(sid.to_string(), data, Some(self.ttl));
        Ok(())
    }

    async fn destroy(&self, sid: &str) -> Result<()> {
        self.sessions.delete(&sid.to_string());
        Ok(())
    }
}
