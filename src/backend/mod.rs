//! # Storage engines
//!
//! One execution contract ([`Backend`]) over three embeddable SQLite engines:
//!
//! | Engine | Type | Notes |
//! |--------|------|-------|
//! | native | [`NativeBackend`] | rusqlite on the file, blocking pool, statement cache |
//! | memory | [`MemoryBackend`] | rusqlite in memory, persisted by explicit `save()` |
//! | paged | [`PagedBackend`] | single sqlx connection, partial page I/O, hard call timeout |
//!
//! [`Database`] holds exactly one engine, chosen once by
//! [`selector::open_database`]. Repositories are generic over `B: Backend`
//! and borrow the handle, so no dynamic dispatch happens per statement.

mod extension;
pub mod memory;
pub mod native;
pub mod paged;
pub mod selector;
mod sqlite_conn;
mod value;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::time::Duration;

pub use extension::register_vector_extension;
pub use memory::MemoryBackend;
pub use native::NativeBackend;
pub use paged::PagedBackend;
pub use value::{FromValue, Row, Value};

use crate::error::StorageResult;

/// Which engine serves a [`Database`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Native,
    Memory,
    Paged,
}

impl std::fmt::Display for EngineKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            EngineKind::Native => "native",
            EngineKind::Memory => "memory",
            EngineKind::Paged => "paged",
        };
        f.write_str(name)
    }
}

/// A SQL statement with positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.params.push(value.into());
        self
    }
}

/// Outcome of a write statement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunResult {
    pub changes: u64,
    pub last_insert_rowid: i64,
}

/// The execution contract every engine satisfies.
#[async_trait]
pub trait Backend: Send + Sync {
    fn kind(&self) -> EngineKind;

    /// Execute one or more `;`-separated statements without parameters.
    async fn exec(&self, sql: &str) -> StorageResult<()>;

    /// Execute a write statement.
    async fn run(&self, stmt: &Statement) -> StorageResult<RunResult>;

    /// Fetch every row of a query.
    async fn all(&self, stmt: &Statement) -> StorageResult<Vec<Row>>;

    /// Fetch the first row of a query, if any.
    async fn get(&self, stmt: &Statement) -> StorageResult<Option<Row>> {
        Ok(self.all(stmt).await?.into_iter().next())
    }

    /// Persist the database to its file. A no-op for file-backed engines.
    async fn save(&self) -> StorageResult<()>;

    /// Release the connection. Further calls fail with `Closed`.
    async fn close(&self) -> StorageResult<()>;

    /// Prepare a reusable statement.
    fn prepare(&self, sql: &str) -> Prepared<'_, Self>
    where
        Self: Sized,
    {
        Prepared {
            db: self,
            stmt: Statement::new(sql),
        }
    }

    /// Whether the ANN extension answers on this connection.
    async fn vector_available(&self) -> bool {
        self.get(&Statement::new("SELECT vec_version() AS v"))
            .await
            .map(|row| row.is_some())
            .unwrap_or(false)
    }
}

/// A prepared statement bound to one database handle.
///
/// Parameters accumulate through [`bind`](Prepared::bind) and are cleared by
/// [`reset`](Prepared::reset), so one `Prepared` serves a loop of inserts.
/// Finalization is `Drop`.
pub struct Prepared<'a, B: Backend> {
    db: &'a B,
    stmt: Statement,
}

impl<'a, B: Backend> Prepared<'a, B> {
    pub fn bind(&mut self, value: impl Into<Value>) -> &mut Self {
        self.stmt.params.push(value.into());
        self
    }

    pub fn reset(&mut self) -> &mut Self {
        self.stmt.params.clear();
        self
    }

    pub fn sql(&self) -> &str {
        &self.stmt.sql
    }

    pub async fn run(&self) -> StorageResult<RunResult> {
        self.db.run(&self.stmt).await
    }

    pub async fn get(&self) -> StorageResult<Option<Row>> {
        self.db.get(&self.stmt).await
    }

    pub async fn all(&self) -> StorageResult<Vec<Row>> {
        self.db.all(&self.stmt).await
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Run `f` inside `BEGIN IMMEDIATE` / `COMMIT`.
///
/// An error from `f` (or from `COMMIT`) always issues `ROLLBACK` before it
/// is returned.
///
/// ```ignore
/// transaction(db, |db| Box::pin(async move {
///     db.run(&Statement::new("DELETE FROM doc_chunk WHERE doc_id = ?").bind(id)).await?;
///     Ok(())
/// })).await?;
/// ```
pub async fn transaction<'a, B, T, F>(db: &'a B, f: F) -> StorageResult<T>
where
    B: Backend,
    T: Send + 'a,
    F: FnOnce(&'a B) -> BoxFuture<'a, StorageResult<T>> + Send,
{
    db.exec("BEGIN IMMEDIATE").await?;
    let outcome = match f(db).await {
        Ok(value) => db.exec("COMMIT").await.map(|_| value),
        Err(e) => Err(e),
    };
    if let Err(e) = &outcome {
        // After a paged-engine timeout the rollback waits for the runaway
        // statement and usually times out as well; the original error wins.
        if let Err(rollback) = db.exec("ROLLBACK").await {
            tracing::warn!(engine = %db.kind(), error = %rollback, cause = %e, "rollback failed");
        }
    }
    outcome
}

/// An open database served by exactly one engine.
pub enum Database {
    Native(NativeBackend),
    Memory(MemoryBackend),
    Paged(PagedBackend),
}

impl Database {
    /// Open `path` with a specific engine. Does not run migrations.
    pub async fn open(kind: EngineKind, path: &Path, timeout: Duration) -> StorageResult<Self> {
        register_vector_extension();
        match kind {
            EngineKind::Native => Ok(Database::Native(NativeBackend::open(path).await?)),
            EngineKind::Memory => Ok(Database::Memory(MemoryBackend::open(path).await?)),
            EngineKind::Paged => Ok(Database::Paged(PagedBackend::open(path, timeout).await?)),
        }
    }
}

#[async_trait]
impl Backend for Database {
    fn kind(&self) -> EngineKind {
        match self {
            Database::Native(db) => db.kind(),
            Database::Memory(db) => db.kind(),
            Database::Paged(db) => db.kind(),
        }
    }

    async fn exec(&self, sql: &str) -> StorageResult<()> {
        match self {
            Database::Native(db) => db.exec(sql).await,
            Database::Memory(db) => db.exec(sql).await,
            Database::Paged(db) => db.exec(sql).await,
        }
    }

    async fn run(&self, stmt: &Statement) -> StorageResult<RunResult> {
        match self {
            Database::Native(db) => db.run(stmt).await,
            Database::Memory(db) => db.run(stmt).await,
            Database::Paged(db) => db.run(stmt).await,
        }
    }

    async fn all(&self, stmt: &Statement) -> StorageResult<Vec<Row>> {
        match self {
            Database::Native(db) => db.all(stmt).await,
            Database::Memory(db) => db.all(stmt).await,
            Database::Paged(db) => db.all(stmt).await,
        }
    }

    async fn save(&self) -> StorageResult<()> {
        match self {
            Database::Native(db) => db.save().await,
            Database::Memory(db) => db.save().await,
            Database::Paged(db) => db.save().await,
        }
    }

    async fn close(&self) -> StorageResult<()> {
        match self {
            Database::Native(db) => db.close().await,
            Database::Memory(db) => db.close().await,
            Database::Paged(db) => db.close().await,
        }
    }
}

/// True when an engine error is SQLite reporting that an object exists.
pub(crate) fn is_already_exists(message: &str) -> bool {
    message.contains("already exists")
}

/// True when an engine error is SQLite rejecting a duplicate `ADD COLUMN`.
pub(crate) fn is_duplicate_column(message: &str) -> bool {
    message.contains("duplicate column name")
}
