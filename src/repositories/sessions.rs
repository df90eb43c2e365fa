use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::errors::StoreError;
use crate::models::{
    withdrawals::{SessionKey, WithdrawalSession},
    UserId,
};

/// Persistence for in-flight withdrawal sessions and their accumulated fields.
#[async_trait]
pub trait SessionStore: Send + Sync + 'static {
    async fn load(&self, key: SessionKey) -> Result<Option<WithdrawalSession>, StoreError>;

    async fn save(&self, session: WithdrawalSession) -> Result<(), StoreError>;

    async fn remove(&self, key: SessionKey) -> Result<Option<WithdrawalSession>, StoreError>;

    async fn for_user(&self, user_id: UserId) -> Result<Vec<WithdrawalSession>, StoreError>;
}

#[derive(Clone, Default)]
pub struct MemorySessionStore {
    sessions: Arc<DashMap<SessionKey, WithdrawalSession>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn load(&self, key: SessionKey) -> Result<Option<WithdrawalSession>, StoreError> {
        Ok(self.sessions.get(&key).map(|s| s.value().clone()))
    }

    async fn save(&self, session: WithdrawalSession) -> Result<(), StoreError> {
        self.sessions.insert(session.key, session);
        Ok(())
    }

    async fn remove(&self, key: SessionKey) -> Result<Option<WithdrawalSession>, StoreError> {
        Ok(self.sessions.remove(&key).map(|(_, session)| session))
    }

    async fn for_user(&self, user_id: UserId) -> Result<Vec<WithdrawalSession>, StoreError> {
        let mut sessions: Vec<WithdrawalSession> = self
            .sessions
            .iter()
            .filter(|entry| entry.key().user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        sessions.sort_by_key(|s| s.opened_at);
        Ok(sessions)
    }
}
