//! A rusqlite connection driven from async code on the blocking pool.
//!
//! Shared by the native and memory engines. The connection sits behind a
//! `std::sync::Mutex`; every call moves its statement into a
//! `spawn_blocking` closure, so the async executor never waits on SQLite.

use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{params_from_iter, Connection, ToSql};
use std::sync::{Arc, Mutex};

use super::{EngineKind, Row, RunResult, Statement, Value};
use crate::error::{StorageError, StorageResult};

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Owned(rusqlite::types::Value::Null),
            Value::Integer(i) => ToSqlOutput::from(*i),
            Value::Real(f) => ToSqlOutput::from(*f),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn value_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}

#[derive(Clone)]
pub(crate) struct BlockingConnection {
    kind: EngineKind,
    conn: Arc<Mutex<Option<Connection>>>,
}

impl BlockingConnection {
    pub(crate) fn new(kind: EngineKind, conn: Connection) -> Self {
        Self {
            kind,
            conn: Arc::new(Mutex::new(Some(conn))),
        }
    }

    pub(crate) fn kind(&self) -> EngineKind {
        self.kind
    }

    /// Run `f` against the open connection on the blocking pool.
    pub(crate) async fn call<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let kind = self.kind;
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::engine(kind, "connection mutex poisoned"))?;
            let conn = guard.as_mut().ok_or(StorageError::Closed)?;
            f(conn)
        })
        .await
        .map_err(|e| StorageError::engine(kind, format!("blocking task failed: {e}")))?
    }

    pub(crate) async fn exec(&self, sql: &str) -> StorageResult<()> {
        let sql = sql.to_string();
        let kind = self.kind;
        self.call(move |conn| {
            conn.execute_batch(&sql)
                .map_err(|e| StorageError::engine(kind, e.to_string()))
        })
        .await
    }

    pub(crate) async fn run(&self, stmt: &Statement) -> StorageResult<RunResult> {
        let stmt = stmt.clone();
        let kind = self.kind;
        self.call(move |conn| {
            let map = |e: rusqlite::Error| StorageError::engine(kind, e.to_string());
            let mut prepared = conn.prepare_cached(&stmt.sql).map_err(map)?;
            let changes = prepared.execute(params_from_iter(stmt.params.iter())).map_err(map)?;
            Ok(RunResult {
                changes: changes as u64,
                last_insert_rowid: conn.last_insert_rowid(),
            })
        })
        .await
    }

    pub(crate) async fn all(&self, stmt: &Statement) -> StorageResult<Vec<Row>> {
        let stmt = stmt.clone();
        let kind = self.kind;
        self.call(move |conn| {
            let map = |e: rusqlite::Error| StorageError::engine(kind, e.to_string());
            let mut prepared = conn.prepare_cached(&stmt.sql).map_err(map)?;
            let columns: Vec<String> = prepared
                .column_names()
                .into_iter()
                .map(str::to_string)
                .collect();
            let mut rows = prepared.query(params_from_iter(stmt.params.iter())).map_err(map)?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().map_err(map)? {
                let mut values = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    values.push(value_from_ref(row.get_ref(i).map_err(map)?));
                }
                out.push(Row::new(columns.clone(), values));
            }
            Ok(out)
        })
        .await
    }

    /// Take the connection out and close it. Idempotent.
    pub(crate) async fn close(&self) -> StorageResult<()> {
        let kind = self.kind;
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| StorageError::engine(kind, "connection mutex poisoned"))?;
            match guard.take() {
                Some(c) => c
                    .close()
                    .map_err(|(_, e)| StorageError::engine(kind, e.to_string())),
                None => Ok(()),
            }
        })
        .await
        .map_err(|e| StorageError::engine(kind, format!("blocking task failed: {e}")))?
    }
}
