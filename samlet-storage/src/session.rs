use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use mockall::automock;
use serde::{Deserialize, Serialize};

use samlet_connect::RawAttributes;
use samlet_core::{errors, Result};

/// Per-authenticated-party session state: the SAML name ID and session
/// index once authenticated, the pending AuthnRequest ID while a
/// response is awaited, and the raw attribute statement.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct Session {
    pub id: String,
    pub provider: String,
    pub name_id: Option<String>,
    pub name_id_format: Option<String>,
    pub session_index: Option<String>,
    /// AuthnRequest ID awaiting correlation with its ACS response.
    pub pending_request_id: Option<String>,
    pub attributes: RawAttributes,
    /// Unix timestamp after which the session is dead; zero disables
    /// expiry.
    pub expiry: i64,
}

impl Session {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expiry != 0 && now >= self.expiry
    }
}

/// Scoped key-value session storage: read at request entry, written at
/// transition points, cleared on logout.
#[automock]
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<Session>>;
    async fn put(&self, session: &Session) -> Result<()>;
    async fn clear(&self, id: &str) -> Result<()>;
}

/// In-memory store for tests and single-node deployments.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<Session>> {
        let now = Utc::now().timestamp();
        {
            let sessions = self.sessions.read().map_err(errors::any)?;
            match sessions.get(id) {
                Some(session) if !session.is_expired(now) => {
                    return Ok(Some(session.clone()));
                }
                Some(_) => {}
                None => return Ok(None),
            }
        }
        // Lazily drop the expired entry.
        let mut sessions = self.sessions.write().map_err(errors::any)?;
        sessions.remove(id);
        Ok(None)
    }

    async fn put(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(errors::any)?;
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn clear(&self, id: &str) -> Result<()> {
        let mut sessions = self.sessions.write().map_err(errors::any)?;
        sessions.remove(id);
        Ok(())
    }
}
