//! Storage backends behind the HTTP layer.
//!
//! Routes only see the [`JsonStore`] and [`FridaStore`] traits; the Redis and
//! PostgreSQL implementations live in their own modules, and [`memory`] holds
//! in-process versions of both.

pub mod memory;
pub mod postgres;
pub mod redis;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use self::postgres::PostgresStore;
pub use self::redis::RedisStore;

/// A document returned by a full-text search.
#[derive(Debug, Clone)]
pub struct SearchDoc {
    pub key: String,
    /// Raw JSON of the document root.
    pub json: String,
}

/// JSON documents keyed by string, with a secondary search index (Redis Stack).
#[async_trait]
pub trait JsonStore: Send + Sync {
    /// All keys matching a glob `pattern`. May contain duplicates.
    async fn scan_keys(&self, pattern: &str, count: usize) -> Result<Vec<String>>;

    /// `JSON.MGET`: one entry per key, `None` where the key is absent.
    async fn json_mget(&self, keys: &[String], path: &str) -> Result<Vec<Option<String>>>;

    /// `JSON.GET` of the document root.
    async fn json_get(&self, key: &str) -> Result<Option<String>>;

    async fn search(
        &self,
        index: &str,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SearchDoc>>;

    async fn ping(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Admin {
    pub user_id: i64,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub log_id: i64,
    pub user_id: i64,
    pub query: String,
    pub response: String,
    pub response_status: bool,
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUser {
    pub user_id: i64,
    pub username: String,
    pub first_name: String,
    pub last_name: String,
}

/// One answered question, with the knowledge-base topics it drew on.
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub user_id: i64,
    pub query: String,
    pub response: String,
    pub response_status: bool,
    pub topic_hashes: Vec<String>,
    pub category: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTopic {
    pub hash: String,
    pub title: String,
    pub text: String,
    pub user_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicText {
    pub book_name: Option<String>,
    pub text: Option<String>,
    pub url: Option<String>,
}

/// Frida's relational data: users, conversation logs, knowledge-base topics.
#[async_trait]
pub trait FridaStore: Send + Sync {
    async fn user_exists(&self, user_id: i64) -> Result<bool>;

    async fn add_user(&self, user: &NewUser) -> Result<()>;

    /// `None` when the user is unknown or the flag is unset.
    async fn is_admin(&self, user_id: i64) -> Result<Option<bool>>;

    async fn admins(&self) -> Result<Vec<Admin>>;

    /// Stores the log row and its topic hashes atomically.
    async fn log_message(&self, record: &LogRecord) -> Result<()>;

    /// Stores a user-contributed topic and marks it as extra.
    async fn insert_topic(&self, topic: &NewTopic) -> Result<()>;

    /// Last three log entries of a user, oldest first.
    async fn history(&self, user_id: i64) -> Result<Vec<HistoryEntry>>;

    async fn topics_by_hashes(&self, hashes: &[String]) -> Result<Vec<TopicText>>;

    async fn delete_topics(&self, hashes: &[String]) -> Result<u64>;

    async fn topic_count(&self) -> Result<i64>;

    async fn ping(&self) -> Result<()>;
}

/// Number of log entries returned by [`FridaStore::history`].
pub const HISTORY_DEPTH: usize = 3;
