use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use crate::{error::Result, session::ScreeningSession};

/// Trait for storing and retrieving screening sessions
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn save(&self, session: ScreeningSession) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<ScreeningSession>>;
    async fn delete(&self, id: &str) -> Result<()>;
    /// Removes idle sessions created before `cutoff` and returns their ids.
    /// Sessions with a request in flight are kept.
    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>>;
}

/// In-memory implementation of SessionStorage.
///
/// Sessions are transient and disappear with the process.
#[derive(Clone, Default)]
pub struct InMemorySessionStorage {
    sessions: Arc<DashMap<String, ScreeningSession>>,
}

impl InMemorySessionStorage {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[async_trait]
impl SessionStorage for InMemorySessionStorage {
    async fn save(&self, session: ScreeningSession) -> Result<()> {
        self.sessions.insert(session.id().to_string(), session);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<ScreeningSession>> {
        Ok(self.sessions.get(id).map(|entry| entry.clone()))
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.sessions.remove(id);
        Ok(())
    }

    async fn purge_created_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let mut purged = Vec::new();
        self.sessions.retain(|id, session| {
            let expired = session.created_at() < cutoff && !session.is_pending();
            if expired {
                purged.push(id.clone());
            }
            !expired
        });
        Ok(purged)
    }
}
