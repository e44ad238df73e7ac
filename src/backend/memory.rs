//! Memory engine: the whole database resident in memory.
//!
//! At open the file (if any) is restored into an in-memory connection with
//! the SQLite backup API. Nothing reaches disk until [`Backend::save`], which
//! backs up into a temporary file and renames it over the database file.
//! `close()` saves first when there are unsaved writes.

use async_trait::async_trait;
use rusqlite::{Connection, DatabaseName};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use super::sqlite_conn::BlockingConnection;
use super::{Backend, EngineKind, Row, RunResult, Statement};
use crate::error::{StorageError, StorageResult};

pub struct MemoryBackend {
    conn: BlockingConnection,
    path: PathBuf,
    dirty: AtomicBool,
}

impl MemoryBackend {
    pub async fn open(path: &Path) -> StorageResult<Self> {
        let owned = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> StorageResult<Connection> {
            let map = |e: rusqlite::Error| StorageError::engine(EngineKind::Memory, e.to_string());
            let mut conn = Connection::open_in_memory().map_err(map)?;
            if owned.exists() {
                conn.restore(DatabaseName::Main, &owned, None::<fn(rusqlite::backup::Progress)>)
                    .map_err(map)?;
            }
            Ok(conn)
        })
        .await
        .map_err(|e| StorageError::engine(EngineKind::Memory, format!("blocking task failed: {e}")))??;

        tracing::debug!(path = %path.display(), "opened memory engine");
        Ok(Self {
            conn: BlockingConnection::new(EngineKind::Memory, conn),
            path: path.to_path_buf(),
            dirty: AtomicBool::new(false),
        })
    }

    /// True when writes happened since the last save.
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> EngineKind {
        self.conn.kind()
    }

    async fn exec(&self, sql: &str) -> StorageResult<()> {
        self.conn.exec(sql).await?;
        self.mark_dirty();
        Ok(())
    }

    async fn run(&self, stmt: &Statement) -> StorageResult<RunResult> {
        let res = self.conn.run(stmt).await?;
        if res.changes > 0 {
            self.mark_dirty();
        }
        Ok(res)
    }

    async fn all(&self, stmt: &Statement) -> StorageResult<Vec<Row>> {
        self.conn.all(stmt).await
    }

    async fn save(&self) -> StorageResult<()> {
        let target = self.path.clone();
        self.conn
            .call(move |conn| {
                let map = |e: rusqlite::Error| StorageError::engine(EngineKind::Memory, e.to_string());
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StorageError::unknown("creating storage folder", e))?;
                }
                let mut tmp = target.clone().into_os_string();
                tmp.push(".tmp");
                let tmp = PathBuf::from(tmp);
                if tmp.exists() {
                    std::fs::remove_file(&tmp)
                        .map_err(|e| StorageError::unknown("removing stale save file", e))?;
                }
                conn.backup(DatabaseName::Main, &tmp, None::<fn(rusqlite::backup::Progress)>)
                    .map_err(map)?;
                std::fs::rename(&tmp, &target)
                    .map_err(|e| StorageError::unknown("replacing database file", e))?;
                Ok(())
            })
            .await?;
        self.dirty.store(false, Ordering::SeqCst);
        tracing::debug!(path = %self.path.display(), "memory engine saved");
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        if self.is_dirty() {
            self.save().await?;
        }
        self.conn.close().await
    }
}
