//! Native engine: rusqlite on the database file.

use async_trait::async_trait;
use rusqlite::Connection;
use std::path::{Path, PathBuf};

use super::sqlite_conn::BlockingConnection;
use super::{Backend, EngineKind, Row, RunResult, Statement};
use crate::error::{StorageError, StorageResult};

const PRAGMAS: &str = "PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 5000;";

/// File-backed rusqlite engine. Writes are durable on commit.
pub struct NativeBackend {
    conn: BlockingConnection,
    path: PathBuf,
}

impl NativeBackend {
    pub async fn open(path: &Path) -> StorageResult<Self> {
        let owned = path.to_path_buf();
        let conn = tokio::task::spawn_blocking(move || -> StorageResult<Connection> {
            let map = |e: rusqlite::Error| StorageError::engine(EngineKind::Native, e.to_string());
            if let Some(parent) = owned.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StorageError::unknown("creating storage folder", e))?;
            }
            let conn = Connection::open(&owned).map_err(map)?;
            conn.execute_batch(PRAGMAS).map_err(map)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StorageError::engine(EngineKind::Native, format!("blocking task failed: {e}")))??;

        tracing::debug!(path = %path.display(), "opened native engine");
        Ok(Self {
            conn: BlockingConnection::new(EngineKind::Native, conn),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Check that the native engine works in this process by opening a
/// throwaway in-memory database.
pub fn probe() -> bool {
    let result = Connection::open_in_memory().and_then(|conn| {
        conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0))
    });
    match result {
        Ok(version) => {
            tracing::debug!(%version, "native engine probe succeeded");
            true
        }
        Err(e) => {
            tracing::warn!(error = %e, "native engine probe failed");
            false
        }
    }
}

#[async_trait]
impl Backend for NativeBackend {
    fn kind(&self) -> EngineKind {
        self.conn.kind()
    }

    async fn exec(&self, sql: &str) -> StorageResult<()> {
        self.conn.exec(sql).await
    }

    async fn run(&self, stmt: &Statement) -> StorageResult<RunResult> {
        self.conn.run(stmt).await
    }

    async fn all(&self, stmt: &Statement) -> StorageResult<Vec<Row>> {
        self.conn.all(stmt).await
    }

    async fn save(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        self.conn.close().await
    }
}
