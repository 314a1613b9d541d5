use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::auth::Identity;
use crate::messages::DirectMessage;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("message {0} already stored")]
    DuplicateMessage(Uuid),
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserRecord {
    pub identity: Identity,
    pub online: bool,
    pub last_seen: Option<DateTime<Utc>>,
    pub avatar: Option<String>,
}

impl UserRecord {
    fn new(identity: Identity) -> Self {
        UserRecord {
            identity,
            online: false,
            last_seen: None,
            avatar: None,
        }
    }
}

/// Durable records kept outside the live registry. The online flag here is
/// best-effort and may lag behind the registry.
#[async_trait]
pub trait Store: Send + Sync {
    async fn set_presence(
        &self,
        identity: &Identity,
        online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn append_message(&self, message: &DirectMessage) -> Result<(), StoreError>;

    /// Messages exchanged between `a` and `b`, oldest first.
    async fn conversation(&self, a: &Identity, b: &Identity) -> Result<Vec<DirectMessage>, StoreError>;

    async fn set_avatar(&self, identity: &Identity, path: &str) -> Result<(), StoreError>;

    async fn user(&self, identity: &Identity) -> Result<Option<UserRecord>, StoreError>;
}

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<Identity, UserRecord>>,
    messages: RwLock<Vec<DirectMessage>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn set_presence(
        &self,
        identity: &Identity,
        online: bool,
        last_seen: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        let record = users
            .entry(identity.clone())
            .or_insert_with(|| UserRecord::new(identity.clone()));
        record.online = online;
        record.last_seen = Some(last_seen);
        Ok(())
    }

    async fn append_message(&self, message: &DirectMessage) -> Result<(), StoreError> {
        let mut messages = self.messages.write().await;
        if messages.iter().any(|m| m.id == message.id) {
            return Err(StoreError::DuplicateMessage(message.id));
        }
        messages.push(message.clone());
        Ok(())
    }

    async fn conversation(&self, a: &Identity, b: &Identity) -> Result<Vec<DirectMessage>, StoreError> {
        let messages = self.messages.read().await;
        let mut found: Vec<DirectMessage> = messages
            .iter()
            .filter(|m| (&m.from == a && &m.to == b) || (&m.from == b && &m.to == a))
            .cloned()
            .collect();
        found.sort_by_key(|m| m.created_at);
        Ok(found)
    }

    async fn set_avatar(&self, identity: &Identity, path: &str) -> Result<(), StoreError> {
        let mut users = self.users.write().await;
        users
            .entry(identity.clone())
            .or_insert_with(|| UserRecord::new(identity.clone()))
            .avatar = Some(path.to_string());
        Ok(())
    }

    async fn user(&self, identity: &Identity) -> Result<Option<UserRecord>, StoreError> {
        let users = self.users.read().await;
        Ok(users.get(identity).cloned())
    }
}
