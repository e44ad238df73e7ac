//! Engine selection with fallback.
//!
//! An explicit preference opens exactly that engine. `auto` probes the
//! native engine and, if it is chosen but then fails to open or migrate,
//! retries once with the portable engine. Every successful open runs the
//! schema migrator before returning.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::{native, Backend, Database, EngineKind};
use crate::error::{StorageError, StorageResult};
use crate::migrate::{run_migrations, MigrationReport, Schema};

/// User-facing backend setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    #[default]
    Auto,
    Native,
    Portable,
}

/// Which engine serves the `portable` preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortableEngine {
    #[default]
    Paged,
    Memory,
}

impl From<PortableEngine> for EngineKind {
    fn from(p: PortableEngine) -> Self {
        match p {
            PortableEngine::Paged => EngineKind::Paged,
            PortableEngine::Memory => EngineKind::Memory,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OpenOptions {
    pub preference: BackendPreference,
    pub portable_engine: PortableEngine,
    /// Hard per-call timeout of the paged engine.
    pub timeout: Duration,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            preference: BackendPreference::Auto,
            portable_engine: PortableEngine::Paged,
            timeout: super::paged::DEFAULT_TIMEOUT,
        }
    }
}

/// Engines to try, in order, for a preference.
pub fn plan(options: &OpenOptions, native_available: bool) -> Vec<EngineKind> {
    let portable = EngineKind::from(options.portable_engine);
    match options.preference {
        BackendPreference::Native => vec![EngineKind::Native],
        BackendPreference::Portable => vec![portable],
        BackendPreference::Auto if native_available => vec![EngineKind::Native, portable],
        BackendPreference::Auto => vec![portable],
    }
}

async fn open_and_migrate(
    kind: EngineKind,
    path: &Path,
    schema: Schema,
    options: &OpenOptions,
) -> StorageResult<(Database, MigrationReport)> {
    let db = Database::open(kind, path, options.timeout).await?;
    match run_migrations(&db, schema).await {
        Ok(report) => Ok((db, report)),
        Err(e) => {
            if let Err(close_err) = db.close().await {
                tracing::debug!(engine = %kind, error = %close_err, "close after failed migration");
            }
            Err(e)
        }
    }
}

/// Open `path` for `schema` according to `options`.
pub async fn open_database(
    path: &Path,
    schema: Schema,
    options: &OpenOptions,
) -> StorageResult<(Database, MigrationReport)> {
    let native_available = match options.preference {
        BackendPreference::Auto => native::probe(),
        _ => false,
    };
    let attempts = plan(options, native_available);

    if options.preference != BackendPreference::Auto {
        let kind = attempts[0];
        tracing::debug!(engine = %kind, path = %path.display(), "opening preferred engine");
        return open_and_migrate(kind, path, schema, options).await;
    }

    let mut failures = Vec::new();
    for kind in attempts {
        match open_and_migrate(kind, path, schema, options).await {
            Ok(opened) => {
                tracing::info!(engine = %kind, path = %path.display(), "storage opened");
                return Ok(opened);
            }
            Err(e) => {
                tracing::warn!(engine = %kind, error = %e, "engine failed to open, trying fallback");
                failures.push(format!("{kind}: {e}"));
            }
        }
    }
    Err(StorageError::AllBackendsFailed(failures))
}
