use super::{JsonStore, SearchDoc};
use crate::error::{Error, Result};
use async_trait::async_trait;
use redis::Value;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

/// Redis Stack backend. The connection manager multiplexes commands over one
/// connection and reconnects on failure, so clones are cheap.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl JsonStore for RedisStore {
    async fn scan_keys(&self, pattern: &str, count: usize) -> Result<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(count)
                .query_async(&mut conn)
                .await?;
            debug!(cursor = next, batch = batch.len(), "scan step");
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }

    async fn json_mget(&self, keys: &[String], path: &str) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        let values: Vec<Option<String>> = redis::cmd("JSON.MGET")
            .arg(keys)
            .arg(path)
            .query_async(&mut conn)
            .await?;
        Ok(values)
    }

    async fn json_get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = redis::cmd("JSON.GET")
            .arg(key)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn search(
        &self,
        index: &str,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<SearchDoc>> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("FT.SEARCH")
            .arg(index)
            .arg(query)
            .arg("LIMIT")
            .arg(offset)
            .arg(limit)
            .query_async(&mut conn)
            .await?;
        parse_search_reply(reply)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Decode a RESP2 `FT.SEARCH` reply over JSON documents:
/// `[total, key, ["$", json], key, ["$", json], ...]`.
fn parse_search_reply(reply: Value) -> Result<Vec<SearchDoc>> {
    let Value::Array(items) = reply else {
        return Err(Error::Redis(format!("unexpected FT.SEARCH reply: {reply:?}")));
    };

    let mut docs = Vec::new();
    let mut iter = items.into_iter().skip(1);
    while let Some(key) = iter.next() {
        let key = value_to_string(&key)
            .ok_or_else(|| Error::Redis("FT.SEARCH: document key is not a string".into()))?;
        let Some(Value::Array(fields)) = iter.next() else {
            return Err(Error::Redis(format!("FT.SEARCH: missing fields for {key}")));
        };

        let json = fields
            .chunks(2)
            .find(|pair| pair.first().and_then(value_to_string).as_deref() == Some("$"))
            .and_then(|pair| pair.get(1))
            .and_then(value_to_string);

        if let Some(json) = json {
            docs.push(SearchDoc { key, json });
        }
    }

    Ok(docs)
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::BulkString(bytes) => String::from_utf8(bytes.clone()).ok(),
        Value::SimpleString(s) => Some(s.clone()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn search_reply_yields_root_documents() {
        let reply = Value::Array(vec![
            Value::Int(2),
            bulk("adds:1"),
            Value::Array(vec![bulk("$"), bulk(r#"{"id":1}"#)]),
            bulk("adds:2"),
            Value::Array(vec![bulk("$"), bulk(r#"{"id":2}"#)]),
        ]);
        let docs = parse_search_reply(reply).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].key, "adds:1");
        assert_eq!(docs[1].json, r#"{"id":2}"#);
    }

    #[test]
    fn empty_search_reply() {
        let docs = parse_search_reply(Value::Array(vec![Value::Int(0)])).unwrap();
        assert!(docs.is_empty());
    }

    #[test]
    fn documents_without_root_field_are_skipped() {
        let reply = Value::Array(vec![
            Value::Int(1),
            bulk("adds:1"),
            Value::Array(vec![bulk("title"), bulk("x")]),
        ]);
        assert!(parse_search_reply(reply).unwrap().is_empty());
    }

    #[test]
    fn non_array_reply_is_an_error() {
        assert!(parse_search_reply(Value::Nil).is_err());
    }
}
