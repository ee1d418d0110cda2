//! In-memory user and message repository.

use chat_shared::{Message, User};
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("email already registered")]
    DuplicateEmail,
    #[error("user {0} not found")]
    UnknownUser(u64),
}

/// A stored account, including its password hash.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn to_user(&self) -> User {
        User {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

#[derive(Debug, Clone)]
struct MessageRecord {
    id: u64,
    user_id: u64,
    content: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Tables {
    users: Vec<UserRecord>,
    messages: Vec<MessageRecord>,
}

impl Tables {
    fn user(&self, id: u64) -> Option<&UserRecord> {
        self.users.iter().find(|u| u.id == id)
    }

    fn hydrate(&self, record: &MessageRecord) -> Option<Message> {
        let author = self.user(record.user_id)?;
        Some(Message {
            id: record.id,
            content: record.content.clone(),
            user_id: record.user_id,
            author: author.to_user().to_ref(),
            created_at: record.created_at,
        })
    }
}

/// Ids are assigned sequentially from 1, separately for users and messages.
#[derive(Debug, Default)]
pub struct Store {
    tables: RwLock<Tables>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create_user(
        &self,
        username: &str,
        email: &str,
        password_hash: String,
    ) -> Result<User, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.users.iter().any(|u| u.email == email) {
            return Err(StoreError::DuplicateEmail);
        }

        let record = UserRecord {
            id: tables.users.len() as u64 + 1,
            username: username.to_string(),
            email: email.to_string(),
            password_hash,
            created_at: Utc::now(),
        };
        let user = record.to_user();
        tables.users.push(record);
        Ok(user)
    }

    pub async fn find_user_by_email(&self, email: &str) -> Option<UserRecord> {
        let tables = self.tables.read().await;
        tables.users.iter().find(|u| u.email == email).cloned()
    }

    pub async fn find_user(&self, id: u64) -> Option<User> {
        let tables = self.tables.read().await;
        tables.user(id).map(UserRecord::to_user)
    }

    /// Store a message and return it with its author attached.
    pub async fn insert_message(&self, user_id: u64, content: &str) -> Result<Message, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.user(user_id).is_none() {
            return Err(StoreError::UnknownUser(user_id));
        }

        let record = MessageRecord {
            id: tables.messages.len() as u64 + 1,
            user_id,
            content: content.to_string(),
            created_at: Utc::now(),
        };
        tables.messages.push(record.clone());
        tables
            .hydrate(&record)
            .ok_or(StoreError::UnknownUser(user_id))
    }

    /// Every message with its author, oldest first.
    pub async fn list_messages(&self) -> Vec<Message> {
        let tables = self.tables.read().await;
        tables
            .messages
            .iter()
            .filter_map(|record| tables.hydrate(record))
            .collect()
    }
}
