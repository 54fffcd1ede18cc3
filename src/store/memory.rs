//! In-process stores for tests and local runs without Redis or PostgreSQL.

use super::{
    Admin, FridaStore, HISTORY_DEPTH, HistoryEntry, JsonStore, LogRecord, NewTopic, NewUser,
    SearchDoc, TopicText,
};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Glob match supporting only a trailing `*`.
fn matches_pattern(pattern: &str, key: &str) -> bool {
    match pattern.strip_suffix('*') {
        Some(prefix) => key.starts_with(prefix),
        None => key == pattern,
    }
}

#[derive(Default)]
pub struct MemoryJsonStore {
    docs: Mutex<BTreeMap<String, String>>,
    /// index name → key prefix it covers
    indexes: Mutex<HashMap<String, String>>,
    scan_duplicates: AtomicBool,
    unavailable: AtomicBool,
    /// key count of every `json_mget` call, in call order
    mget_batches: Mutex<Vec<usize>>,
}

impl MemoryJsonStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, json: &serde_json::Value) {
        lock(&self.docs).insert(key.into(), json.to_string());
    }

    /// Register a search index over all keys starting with `prefix`.
    pub fn with_index(self, index: impl Into<String>, prefix: impl Into<String>) -> Self {
        lock(&self.indexes).insert(index.into(), prefix.into());
        self
    }

    /// Make `scan_keys` report every key twice, like SCAN may during rehashing.
    pub fn set_scan_duplicates(&self, on: bool) {
        self.scan_duplicates.store(on, Ordering::SeqCst);
    }

    /// Make every call fail as if the server were down.
    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    /// Number of keys passed to each `json_mget` call so far.
    pub fn mget_batches(&self) -> Vec<usize> {
        lock(&self.mget_batches).clone()
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Redis("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl JsonStore for MemoryJsonStore {
    async fn scan_keys(&self, pattern: &str, _count: usize) -> Result<Vec<String>> {
        self.check()?;
        let keys: Vec<String> = lock(&self.docs)
            .keys()
            .filter(|k| matches_pattern(pattern, k))
            .cloned()
            .collect();
        if self.scan_duplicates.load(Ordering::SeqCst) {
            return Ok(keys.iter().chain(keys.iter()).cloned().collect());
        }
        Ok(keys)
    }

    async fn json_mget(&self, keys: &[String], path: &str) -> Result<Vec<Option<String>>> {
        self.check()?;
        lock(&self.mget_batches).push(keys.len());
        let docs = lock(&self.docs);
        Ok(keys
            .iter()
            .map(|k| {
                docs.get(k).map(|json| match path {
                    "$" => format!("[{json}]"),
                    _ => json.clone(),
                })
            })
            .collect())
    }

    async fn json_get(&self, key: &str) -> Result<Option<String>> {
        self.check()?;
        Ok(lock(&self.docs).get(key).cloned())
    }

    async fn search(
        &self,
        index: &str,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SearchDoc>> {
        self.check()?;
        let prefix = lock(&self.indexes)
            .get(index)
            .cloned()
            .ok_or_else(|| Error::Redis(format!("{index}: no such index")))?;
        let docs = lock(&self.docs);
        Ok(docs
            .iter()
            .filter(|(k, json)| k.starts_with(&prefix) && json.to_lowercase().contains(query))
            .skip(offset)
            .take(limit)
            .map(|(k, json)| SearchDoc {
                key: k.clone(),
                json: json.clone(),
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}

#[derive(Debug, Clone)]
struct UserRow {
    username: String,
    is_admin: Option<bool>,
}

#[derive(Debug, Clone)]
struct TopicRow {
    book_name: Option<String>,
    text: String,
    url: Option<String>,
}

#[derive(Default)]
struct FridaData {
    users: BTreeMap<i64, UserRow>,
    added: Vec<NewUser>,
    logs: Vec<HistoryEntry>,
    log_hashes: Vec<(i64, String)>,
    topics: BTreeMap<String, TopicRow>,
    extra_topics: Vec<(String, i64)>,
}

#[derive(Default)]
pub struct MemoryFridaStore {
    data: Mutex<FridaData>,
    unavailable: AtomicBool,
}

impl MemoryFridaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user_id: i64, username: &str, is_admin: Option<bool>) {
        lock(&self.data).users.insert(
            user_id,
            UserRow {
                username: username.into(),
                is_admin,
            },
        );
    }

    pub fn insert_topic_text(&self, hash: &str, book_name: &str, text: &str, url: &str) {
        lock(&self.data).topics.insert(
            hash.into(),
            TopicRow {
                book_name: Some(book_name.into()),
                text: text.into(),
                url: Some(url.into()),
            },
        );
    }

    /// Users created through [`FridaStore::add_user`].
    pub fn added_users(&self) -> Vec<NewUser> {
        lock(&self.data).added.clone()
    }

    pub fn logs(&self) -> Vec<HistoryEntry> {
        lock(&self.data).logs.clone()
    }

    pub fn log_hashes(&self) -> Vec<(i64, String)> {
        lock(&self.data).log_hashes.clone()
    }

    pub fn extra_topics(&self) -> Vec<(String, i64)> {
        lock(&self.data).extra_topics.clone()
    }

    pub fn set_unavailable(&self, down: bool) {
        self.unavailable.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Database("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl FridaStore for MemoryFridaStore {
    async fn user_exists(&self, user_id: i64) -> Result<bool> {
        self.check()?;
        Ok(lock(&self.data).users.contains_key(&user_id))
    }

    async fn add_user(&self, user: &NewUser) -> Result<()> {
        self.check()?;
        let mut data = lock(&self.data);
        if data.users.contains_key(&user.user_id) {
            return Err(Error::Database(format!(
                "duplicate key value violates unique constraint: user_id={}",
                user.user_id
            )));
        }
        data.users.insert(
            user.user_id,
            UserRow {
                username: user.username.clone(),
                is_admin: None,
            },
        );
        data.added.push(user.clone());
        Ok(())
    }

    async fn is_admin(&self, user_id: i64) -> Result<Option<bool>> {
        self.check()?;
        Ok(lock(&self.data).users.get(&user_id).and_then(|u| u.is_admin))
    }

    async fn admins(&self) -> Result<Vec<Admin>> {
        self.check()?;
        Ok(lock(&self.data)
            .users
            .iter()
            .filter(|(_, u)| u.is_admin == Some(true))
            .map(|(id, u)| Admin {
                user_id: *id,
                username: Some(u.username.clone()),
            })
            .collect())
    }

    async fn log_message(&self, record: &LogRecord) -> Result<()> {
        self.check()?;
        let mut data = lock(&self.data);
        let log_id = data.logs.len() as i64 + 1;
        data.logs.push(HistoryEntry {
            log_id,
            user_id: record.user_id,
            query: record.query.clone(),
            response: record.response.clone(),
            response_status: record.response_status,
            category: Some(record.category.clone()),
            created_at: Utc::now(),
        });
        for hash in &record.topic_hashes {
            data.log_hashes.push((log_id, hash.clone()));
        }
        Ok(())
    }

    async fn insert_topic(&self, topic: &NewTopic) -> Result<()> {
        self.check()?;
        let mut data = lock(&self.data);
        data.topics.insert(
            topic.hash.clone(),
            TopicRow {
                book_name: None,
                text: topic.text.clone(),
                url: None,
            },
        );
        data.extra_topics.push((topic.hash.clone(), topic.user_id));
        Ok(())
    }

    async fn history(&self, user_id: i64) -> Result<Vec<HistoryEntry>> {
        self.check()?;
        let data = lock(&self.data);
        let mine: Vec<HistoryEntry> = data
            .logs
            .iter()
            .filter(|l| l.user_id == user_id)
            .cloned()
            .collect();
        let skip = mine.len().saturating_sub(HISTORY_DEPTH);
        Ok(mine.into_iter().skip(skip).collect())
    }

    async fn topics_by_hashes(&self, hashes: &[String]) -> Result<Vec<TopicText>> {
        self.check()?;
        let data = lock(&self.data);
        Ok(hashes
            .iter()
            .filter_map(|h| data.topics.get(h))
            .map(|t| TopicText {
                book_name: t.book_name.clone(),
                text: Some(t.text.clone()),
                url: t.url.clone(),
            })
            .collect())
    }

    async fn delete_topics(&self, hashes: &[String]) -> Result<u64> {
        self.check()?;
        let mut data = lock(&self.data);
        let before = data.topics.len();
        data.topics.retain(|hash, _| !hashes.contains(hash));
        Ok((before - data.topics.len()) as u64)
    }

    async fn topic_count(&self) -> Result<i64> {
        self.check()?;
        Ok(lock(&self.data).topics.len() as i64)
    }

    async fn ping(&self) -> Result<()> {
        self.check()
    }
}
