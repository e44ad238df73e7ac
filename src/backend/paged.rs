//! Paged engine: one sqlx connection on the file.
//!
//! SQLite reads and writes individual pages, so the database is never loaded
//! whole. sqlx drives the connection on its own worker thread and is natively
//! async; every call here is bounded by a hard timeout and fails with
//! [`StorageError::Timeout`] instead of waiting forever.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteJournalMode, SqliteRow};
use sqlx::{Column, ConnectOptions, Connection, Row as _, TypeInfo, ValueRef};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{Backend, EngineKind, Row, RunResult, Statement, Value};
use crate::error::{StorageError, StorageResult};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct PagedBackend {
    conn: Mutex<Option<SqliteConnection>>,
    path: PathBuf,
    timeout: Duration,
}

fn engine_err(e: sqlx::Error) -> StorageError {
    StorageError::engine(EngineKind::Paged, e.to_string())
}

impl PagedBackend {
    pub async fn open(path: &Path, timeout: Duration) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::unknown("creating storage folder", e))?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(engine_err)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let conn = bounded(timeout, options.connect()).await?.map_err(engine_err)?;

        tracing::debug!(path = %path.display(), timeout_ms = timeout.as_millis() as u64, "opened paged engine");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: path.to_path_buf(),
            timeout,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` on the connection under the call timeout.
    async fn with_conn<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send,
        F: Send,
        F: for<'c> FnOnce(
            &'c mut SqliteConnection,
        ) -> std::pin::Pin<Box<dyn Future<Output = StorageResult<T>> + Send + 'c>>,
    {
        bounded(self.timeout, async {
            let mut guard = self.conn.lock().await;
            let conn = guard.as_mut().ok_or(StorageError::Closed)?;
            f(conn).await
        })
        .await?
    }
}

async fn bounded<T>(timeout: Duration, fut: impl Future<Output = T>) -> StorageResult<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| StorageError::Timeout {
            engine: EngineKind::Paged,
            timeout_ms: timeout.as_millis() as u64,
        })
}

fn build_query(stmt: &Statement) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    let mut query = sqlx::query(&stmt.sql);
    for param in &stmt.params {
        query = match param {
            Value::Null => query.bind(None::<i64>),
            Value::Integer(i) => query.bind(*i),
            Value::Real(f) => query.bind(*f),
            Value::Text(s) => query.bind(s.as_str()),
            Value::Blob(b) => query.bind(b.as_slice()),
        };
    }
    query
}

fn convert_row(row: &SqliteRow) -> StorageResult<Row> {
    let columns: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    let mut values = Vec::with_capacity(columns.len());
    for i in 0..columns.len() {
        let raw = row.try_get_raw(i).map_err(engine_err)?;
        if raw.is_null() {
            values.push(Value::Null);
            continue;
        }
        let type_name = raw.type_info().name().to_string();
        let value = match type_name.as_str() {
            "INTEGER" | "BOOLEAN" => Value::Integer(row.try_get_unchecked::<i64, _>(i).map_err(engine_err)?),
            "REAL" => Value::Real(row.try_get_unchecked::<f64, _>(i).map_err(engine_err)?),
            "BLOB" => Value::Blob(row.try_get_unchecked::<Vec<u8>, _>(i).map_err(engine_err)?),
            _ => Value::Text(row.try_get_unchecked::<String, _>(i).map_err(engine_err)?),
        };
        values.push(value);
    }
    Ok(Row::new(columns, values))
}

#[async_trait]
impl Backend for PagedBackend {
    fn kind(&self) -> EngineKind {
        EngineKind::Paged
    }

    async fn exec(&self, sql: &str) -> StorageResult<()> {
        let sql = sql.to_string();
        self.with_conn(move |conn| {
            Box::pin(async move {
                sqlx::query(sql.as_str()).execute(&mut *conn).await.map_err(engine_err)?;
                Ok(())
            })
        })
        .await
    }

    async fn run(&self, stmt: &Statement) -> StorageResult<RunResult> {
        let stmt = stmt.clone();
        self.with_conn(move |conn| {
            Box::pin(async move {
                let res = build_query(&stmt)
                    .execute(&mut *conn)
                    .await
                    .map_err(engine_err)?;
                Ok(RunResult {
                    changes: res.rows_affected(),
                    last_insert_rowid: res.last_insert_rowid(),
                })
            })
        })
        .await
    }

    async fn all(&self, stmt: &Statement) -> StorageResult<Vec<Row>> {
        let stmt = stmt.clone();
        self.with_conn(move |conn| {
            Box::pin(async move {
                let rows = build_query(&stmt)
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(engine_err)?;
                rows.iter().map(convert_row).collect()
            })
        })
        .await
    }

    async fn save(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        let conn = self.conn.lock().await.take();
        if let Some(conn) = conn {
            bounded(self.timeout, conn.close()).await?.map_err(engine_err)?;
        }
        Ok(())
    }
}
