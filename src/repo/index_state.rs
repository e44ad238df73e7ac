//! Key/value checkpoints for background indexing.

use notestore_core::models::{now_ms, IndexStateEntry};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::backend::{Backend, Row, Statement};
use crate::error::{StorageError, StorageResult};
use crate::repo::placeholders;

pub struct IndexStateRepo<'a, B: Backend> {
    db: &'a B,
}

fn entry_from_row(row: &Row) -> StorageResult<IndexStateEntry> {
    Ok(IndexStateEntry {
        key: row.get("key")?,
        value: row.get("value")?,
        updated_at: row.get("updated_at")?,
    })
}

impl<'a, B: Backend> IndexStateRepo<'a, B> {
    pub fn new(db: &'a B) -> Self {
        Self { db }
    }

    pub async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let row = self
            .db
            .get(&Statement::new("SELECT value FROM index_state WHERE key = ?").bind(key))
            .await?;
        row.map(|r| r.get("value")).transpose()
    }

    pub async fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.db
            .run(
                &Statement::new(
                    r#"
                    INSERT INTO index_state (key, value, updated_at) VALUES (?, ?, ?)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(key)
                .bind(value)
                .bind(now_ms()),
            )
            .await?;
        Ok(())
    }

    pub async fn delete(&self, key: &str) -> StorageResult<bool> {
        let res = self
            .db
            .run(&Statement::new("DELETE FROM index_state WHERE key = ?").bind(key))
            .await?;
        Ok(res.changes > 0)
    }

    pub async fn delete_many(&self, keys: &[String]) -> StorageResult<u64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let sql = format!("DELETE FROM index_state WHERE key IN ({})", placeholders(keys.len()));
        let res = self.db.run(&super::bind_all(Statement::new(sql), keys)).await?;
        Ok(res.changes)
    }

    /// Every entry whose key starts with `prefix`, ordered by key.
    pub async fn list_prefix(&self, prefix: &str) -> StorageResult<Vec<IndexStateEntry>> {
        let rows = self
            .db
            .all(
                &Statement::new(
                    "SELECT key, value, updated_at FROM index_state \
                     WHERE substr(key, 1, length(?)) = ? ORDER BY key",
                )
                .bind(prefix)
                .bind(prefix),
            )
            .await?;
        rows.iter().map(entry_from_row).collect()
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> StorageResult<Option<T>> {
        match self.get(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StorageError::Decode(format!("index_state '{key}': {e}"))),
            None => Ok(None),
        }
    }

    pub async fn set_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> StorageResult<()> {
        let raw = serde_json::to_string(value)
            .map_err(|e| StorageError::Decode(format!("index_state '{key}': {e}")))?;
        self.set(key, &raw).await
    }

    /// Add one to an integer counter and return the new value.
    pub async fn increment(&self, key: &str) -> StorageResult<i64> {
        self.db
            .run(
                &Statement::new(
                    r#"
                    INSERT INTO index_state (key, value, updated_at) VALUES (?, '1', ?)
                    ON CONFLICT(key) DO UPDATE SET
                        value = CAST(CAST(value AS INTEGER) + 1 AS TEXT),
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(key)
                .bind(now_ms()),
            )
            .await?;
        self.counter(key).await
    }

    /// Read an integer counter (0 when unset).
    pub async fn counter(&self, key: &str) -> StorageResult<i64> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Database, EngineKind};
    use crate::migrate::{run_migrations, Schema};
    use std::time::Duration;

    async fn open(tmp: &tempfile::TempDir) -> Database {
        let db = Database::open(EngineKind::Native, &tmp.path().join("s.sqlite"), Duration::from_secs(5))
            .await
            .unwrap();
        run_migrations(&db, Schema::Meta).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = open(&tmp).await;
        let repo = IndexStateRepo::new(&db);

        assert_eq!(repo.get("k").await.unwrap(), None);
        repo.set("k", "v1").await.unwrap();
        repo.set("k", "v2").await.unwrap();
        assert_eq!(repo.get("k").await.unwrap().as_deref(), Some("v2"));
        assert!(repo.delete("k").await.unwrap());
        assert!(!repo.delete("k").await.unwrap());
    }

    #[tokio::test]
    async fn test_prefix_and_json() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = open(&tmp).await;
        let repo = IndexStateRepo::new(&db);

        repo.set_json("indexer.cursor", &vec![1, 2, 3]).await.unwrap();
        repo.set("indexer.last_run", "100").await.unwrap();
        repo.set("indexer_other", "x").await.unwrap();
        repo.set("other", "y").await.unwrap();
        repo.set("Indexer.upper", "z").await.unwrap();
        repo.set("indexer%wild", "w").await.unwrap();

        let entries = repo.list_prefix("indexer.").await.unwrap();
        let keys: Vec<&str> = entries.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["indexer.cursor", "indexer.last_run"]);

        let entries = repo.list_prefix("indexer%").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, "indexer%wild");

        let cursor: Vec<i32> = repo.get_json("indexer.cursor").await.unwrap().unwrap();
        assert_eq!(cursor, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_counter() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = open(&tmp).await;
        let repo = IndexStateRepo::new(&db);

        assert_eq!(repo.counter("n").await.unwrap(), 0);
        assert_eq!(repo.increment("n").await.unwrap(), 1);
        assert_eq!(repo.increment("n").await.unwrap(), 2);
    }
}
