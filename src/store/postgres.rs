use super::{
    Admin, FridaStore, HISTORY_DEPTH, HistoryEntry, LogRecord, NewTopic, NewUser, TopicText,
};
use crate::config::PostgresConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use deadpool_postgres::{
    Config as PoolSettings, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime,
};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info};

pub struct PostgresStore {
    pool: Pool,
}

impl PostgresStore {
    /// Build the pool. Connections are opened lazily on first use.
    pub fn connect(config: &PostgresConfig) -> Result<Self> {
        let settings = PoolSettings {
            url: Some(config.url.clone()),
            manager: Some(ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            }),
            pool: Some(PoolConfig::new(config.pool_size)),
            ..Default::default()
        };
        let pool = settings
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| Error::Database(format!("create pool: {e}")))?;
        info!(pool_size = config.pool_size, "PostgreSQL pool ready");
        Ok(Self { pool })
    }
}

fn history_entry(row: &Row) -> Result<HistoryEntry> {
    Ok(HistoryEntry {
        log_id: row.try_get("log_id")?,
        user_id: row.try_get("user_id")?,
        query: row.try_get("query")?,
        response: row.try_get("response")?,
        response_status: row.try_get("response_status")?,
        category: row.try_get("category")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl FridaStore for PostgresStore {
    async fn user_exists(&self, user_id: i64) -> Result<bool> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT 1 FROM users WHERE user_id = $1", &[&user_id])
            .await?;
        let exists = row.is_some();
        debug!(user_id, exists, "user lookup");
        Ok(exists)
    }

    async fn add_user(&self, user: &NewUser) -> Result<()> {
        let client = self.pool.get().await?;
        client
            .execute(
                "INSERT INTO users (user_id, username, first_name, last_name) \
                 VALUES ($1, $2, $3, $4)",
                &[
                    &user.user_id,
                    &user.username,
                    &user.first_name,
                    &user.last_name,
                ],
            )
            .await?;
        info!(user_id = user.user_id, "user added");
        Ok(())
    }

    async fn is_admin(&self, user_id: i64) -> Result<Option<bool>> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT is_admin FROM users WHERE user_id = $1", &[&user_id])
            .await?;
        let is_admin = match row {
            Some(row) => row.try_get::<_, Option<bool>>(0)?,
            None => None,
        };
        debug!(user_id, ?is_admin, "admin lookup");
        Ok(is_admin)
    }

    async fn admins(&self) -> Result<Vec<Admin>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT user_id, username FROM users WHERE is_admin = TRUE",
                &[],
            )
            .await?;
        let admins = rows
            .iter()
            .map(|row| -> Result<Admin> {
                Ok(Admin {
                    user_id: row.try_get(0)?,
                    username: row.try_get(1)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(count = admins.len(), "admins fetched");
        Ok(admins)
    }

    async fn log_message(&self, record: &LogRecord) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_one(
                "INSERT INTO bot_logs (user_id, query, response, response_status, category) \
                 VALUES ($1, $2, $3, $4, $5) \
                 RETURNING log_id::bigint",
                &[
                    &record.user_id,
                    &record.query,
                    &record.response,
                    &record.response_status,
                    &record.category,
                ],
            )
            .await?;
        let log_id: i64 = row.try_get(0)?;

        for hash in &record.topic_hashes {
            tx.execute(
                "INSERT INTO bot_log_topic_hashes (log_id, topic_hash) VALUES ($1::bigint, $2)",
                &[&log_id, hash],
            )
            .await?;
        }

        tx.commit().await?;
        info!(user_id = record.user_id, log_id, "message logged");
        Ok(())
    }

    async fn insert_topic(&self, topic: &NewTopic) -> Result<()> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        tx.execute(
            "INSERT INTO frida_storage (hash, title, text, isexstra) VALUES ($1, $2, $3, TRUE)",
            &[&topic.hash, &topic.title, &topic.text],
        )
        .await?;
        tx.execute(
            "INSERT INTO exstraTopics (hash, user_id) VALUES ($1, $2)",
            &[&topic.hash, &topic.user_id],
        )
        .await?;

        tx.commit().await?;
        info!(user_id = topic.user_id, hash = %topic.hash, "topic inserted");
        Ok(())
    }

    async fn history(&self, user_id: i64) -> Result<Vec<HistoryEntry>> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "WITH last_logs AS ( \
                     SELECT * FROM bot_logs WHERE user_id = $1 \
                     ORDER BY created_at DESC LIMIT $2 \
                 ) \
                 SELECT log_id::bigint AS log_id, user_id::bigint AS user_id, query, response, \
                        response_status, category, created_at::timestamptz AS created_at \
                 FROM last_logs ORDER BY created_at ASC",
                &[&user_id, &(HISTORY_DEPTH as i64)],
            )
            .await?;
        let entries = rows.iter().map(history_entry).collect::<Result<Vec<_>>>()?;
        debug!(user_id, count = entries.len(), "history fetched");
        Ok(entries)
    }

    async fn topics_by_hashes(&self, hashes: &[String]) -> Result<Vec<TopicText>> {
        if hashes.is_empty() {
            return Ok(Vec::new());
        }
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT book_name, text, url FROM frida_storage WHERE hash = ANY($1)",
                &[&hashes],
            )
            .await?;
        let topics = rows
            .iter()
            .map(|row| -> Result<TopicText> {
                Ok(TopicText {
                    book_name: row.try_get(0)?,
                    text: row.try_get(1)?,
                    url: row.try_get(2)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        debug!(requested = hashes.len(), found = topics.len(), "topics fetched");
        Ok(topics)
    }

    async fn delete_topics(&self, hashes: &[String]) -> Result<u64> {
        if hashes.is_empty() {
            return Ok(0);
        }
        let client = self.pool.get().await?;
        let deleted = client
            .execute("DELETE FROM frida_storage WHERE hash = ANY($1)", &[&hashes])
            .await?;
        info!(deleted, "topics deleted");
        Ok(deleted)
    }

    async fn topic_count(&self) -> Result<i64> {
        let client = self.pool.get().await?;
        let row = client
            .query_one("SELECT COUNT(*) FROM frida_storage", &[])
            .await?;
        Ok(row.try_get(0)?)
    }

    async fn ping(&self) -> Result<()> {
        let client = self.pool.get().await?;
        client.simple_query("SELECT 1").await?;
        Ok(())
    }
}
