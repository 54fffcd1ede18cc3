use crate::config::RedisConfig;
use crate::error::{Error, Result};
use crate::store::JsonStore;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const TEMP_PREFIX: &str = "temp_users_";
const TEMP_SUFFIX: &str = ".json";

/// File name offered to the client for the user export.
pub const DOWNLOAD_NAME: &str = "users_data.json";

/// Every user record stored under the user key pattern.
pub async fn collect_users(store: &dyn JsonStore, config: &RedisConfig) -> Result<Vec<Value>> {
    info!(pattern = %config.user_key_pattern, "collecting users");
    let keys: Vec<String> = store
        .scan_keys(&config.user_key_pattern, config.scan_count)
        .await?
        .into_iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    info!(keys = keys.len(), "unique user keys");

    let mut users = Vec::with_capacity(keys.len());
    for (i, batch) in keys.chunks(config.batch_size.max(1)).enumerate() {
        debug!(batch = i, size = batch.len(), "fetching user batch");
        for raw in store.json_mget(batch, "$").await?.into_iter().flatten() {
            if let Some(user) = first_match(&raw)? {
                users.push(user);
            }
        }
    }

    info!(users = users.len(), "users collected");
    Ok(users)
}

/// A `$` path query returns an array of matches; the record is the first one.
fn first_match(raw: &str) -> Result<Option<Value>> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| Error::parse(format!("user record: {e}")))?;
    Ok(match value {
        Value::Array(items) => items.into_iter().next(),
        _ => None,
    })
}

fn is_temp_export(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX) && n.ends_with(TEMP_SUFFIX))
}

/// Remove leftover export files from `dir`. Failures are logged, not returned.
pub fn cleanup_temp_dir(dir: &Path) -> usize {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), "cannot read temp dir: {e}");
            return 0;
        }
    };

    let mut removed = 0;
    for path in entries.flatten().map(|e| e.path()) {
        if !is_temp_export(&path) {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!(file = %path.display(), "failed to remove temp file: {e}"),
        }
    }

    if removed > 0 {
        info!(removed, dir = %dir.display(), "removed temporary files");
    } else {
        debug!(dir = %dir.display(), "no temporary files to remove");
    }
    removed
}

/// Serialize with four-space indentation.
pub fn to_pretty_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value
        .serialize(&mut ser)
        .map_err(|e| Error::parse(format!("serialize export: {e}")))?;
    Ok(buf)
}

/// A written export; `contents` holds the bytes written to `path`.
#[derive(Debug)]
pub struct ExportFile {
    pub path: PathBuf,
    pub contents: Vec<u8>,
    pub records: usize,
}

/// Write `users` to a fresh temp file in `dir`.
pub fn write_export(dir: &Path, users: &[Value]) -> Result<ExportFile> {
    std::fs::create_dir_all(dir)?;
    cleanup_temp_dir(dir);

    let path = dir.join(format!(
        "{TEMP_PREFIX}{}{TEMP_SUFFIX}",
        uuid::Uuid::new_v4().simple()
    ));
    debug!(file = %path.display(), "writing export");
    let contents = to_pretty_json(&users)?;
    if let Err(e) = std::fs::write(&path, &contents) {
        let _ = std::fs::remove_file(&path);
        return Err(e.into());
    }
    Ok(ExportFile {
        path,
        contents,
        records: users.len(),
    })
}

/// Collect users and write them out; the file work runs on the blocking pool.
pub async fn export_users(
    store: &dyn JsonStore,
    config: &RedisConfig,
    dir: &Path,
) -> Result<ExportFile> {
    let users = collect_users(store, config).await?;
    let dir = dir.to_path_buf();
    let file = tokio::task::spawn_blocking(move || write_export(&dir, &users))
        .await
        .map_err(std::io::Error::other)??;
    info!(records = file.records, file = %file.path.display(), "user export written");
    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryJsonStore;
    use serde_json::json;

    fn store_with_users(n: usize) -> MemoryJsonStore {
        let store = MemoryJsonStore::new();
        for i in 0..n {
            store.insert(format!("login:{i:03}"), &json!({"login": format!("user{i}")}));
        }
        store.insert("adds:1", &json!({"id": 1}));
        store
    }

    #[tokio::test]
    async fn duplicate_keys_collapse_across_batches() {
        let store = store_with_users(5);
        store.set_scan_duplicates(true);
        let config = RedisConfig {
            batch_size: 2,
            ..RedisConfig::default()
        };
        let users = collect_users(&store, &config).await.unwrap();
        assert_eq!(users.len(), 5);
        assert_eq!(users[0]["login"], "user0");
        assert_eq!(store.mget_batches(), vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn batch_size_zero_fetches_one_key_at_a_time() {
        let store = store_with_users(3);
        let config = RedisConfig {
            batch_size: 0,
            ..RedisConfig::default()
        };
        collect_users(&store, &config).await.unwrap();
        assert_eq!(store.mget_batches(), vec![1, 1, 1]);
    }

    #[tokio::test]
    async fn export_users_writes_file_in_dir() {
        let store = store_with_users(2);
        let dir = tempfile::tempdir().unwrap();
        let file = export_users(&store, &RedisConfig::default(), dir.path())
            .await
            .unwrap();
        assert_eq!(file.records, 2);
        assert_eq!(file.path.parent(), Some(dir.path()));
        assert_eq!(std::fs::read(&file.path).unwrap(), file.contents);
    }

    #[test]
    fn first_match_skips_empty_arrays() {
        assert_eq!(first_match(r#"[{"a":1}]"#).unwrap(), Some(json!({"a": 1})));
        assert_eq!(first_match("[]").unwrap(), None);
        assert!(first_match("not json").is_err());
    }

    #[test]
    fn cleanup_only_touches_export_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("temp_users_abc.json"), "[]").unwrap();
        std::fs::write(dir.path().join("temp_users_def.json"), "[]").unwrap();
        std::fs::write(dir.path().join("keep.json"), "[]").unwrap();
        std::fs::write(dir.path().join("temp_users_abc.txt"), "").unwrap();

        assert_eq!(cleanup_temp_dir(dir.path()), 2);
        assert!(dir.path().join("keep.json").exists());
        assert!(dir.path().join("temp_users_abc.txt").exists());
    }

    #[test]
    fn export_uses_four_space_indent_and_keeps_unicode() {
        let dir = tempfile::tempdir().unwrap();
        let file = write_export(dir.path(), &[json!({"name": "Фрида"})]).unwrap();
        let text = std::fs::read_to_string(&file.path).unwrap();
        assert!(text.contains("\n        \"name\": \"Фрида\""));
        assert_eq!(text.as_bytes(), file.contents.as_slice());
        assert_eq!(file.records, 1);
        assert!(is_temp_export(&file.path));
    }

    #[test]
    fn new_export_replaces_previous_one() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_export(dir.path(), &[]).unwrap();
        let second = write_export(dir.path(), &[]).unwrap();
        assert!(!first.path.exists());
        assert!(second.path.exists());
    }
}
