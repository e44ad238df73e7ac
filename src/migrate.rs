//! Idempotent schema migration for the search and meta databases.
//!
//! Safe to run on every open:
//!
//! - tables and indexes use `IF NOT EXISTS`; any other "already exists"
//!   error is tolerated, everything else aborts;
//! - column additions swallow "duplicate column name";
//! - optional virtual tables (title/path full-text) only warn when the
//!   engine cannot create them;
//! - the ANN table is never created here for a fresh database because its
//!   width depends on the embedding model. On reopen, when embedding rows
//!   exist but the ANN table is gone, it is recreated at the latest stored
//!   dimension and refilled from the relational rows.

use crate::backend::{is_already_exists, is_duplicate_column, Backend, Statement};
use crate::error::{StorageError, StorageResult};
use crate::vector;

/// Bumped whenever a statement is added below.
pub const SCHEMA_VERSION: i64 = 3;

/// Which logical database is being migrated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
    /// Documents, chunks, statistics, embeddings, graph, index state.
    Search,
    /// Chat records and index state.
    Meta,
}

/// Outcome of one migration run.
#[derive(Debug, Clone, Default)]
pub struct MigrationReport {
    pub statements_applied: usize,
    pub columns_added: usize,
    /// Title/path full-text index present.
    pub title_index: bool,
    /// ANN table restored at this dimension during the run.
    pub vector_index_restored: Option<usize>,
    /// Capability warnings; the schema still applied.
    pub warnings: Vec<String>,
}

enum Step {
    Create(&'static str),
    AddColumn(&'static str),
    OptionalVirtual(&'static str, &'static str),
}

const SEARCH_STEPS: &[Step] = &[
    Step::Create(
        r#"
        CREATE TABLE IF NOT EXISTS doc_meta (
            id TEXT PRIMARY KEY,
            path TEXT NOT NULL UNIQUE,
            doc_type TEXT NOT NULL DEFAULT 'markdown',
            title TEXT,
            size INTEGER NOT NULL DEFAULT 0,
            ctime INTEGER NOT NULL DEFAULT 0,
            mtime INTEGER NOT NULL DEFAULT 0,
            content_hash TEXT,
            tags TEXT NOT NULL DEFAULT '[]',
            frontmatter_json TEXT
        )
        "#,
    ),
    Step::AddColumn("ALTER TABLE doc_meta ADD COLUMN summary TEXT"),
    Step::AddColumn("ALTER TABLE doc_meta ADD COLUMN last_processed_at INTEGER"),
    Step::Create("CREATE INDEX IF NOT EXISTS idx_doc_meta_mtime ON doc_meta(mtime DESC)"),
    Step::Create(
        r#"
        CREATE TABLE IF NOT EXISTS doc_chunk (
            chunk_id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            chunk_index INTEGER NOT NULL,
            title TEXT,
            mtime INTEGER NOT NULL DEFAULT 0,
            content_raw TEXT NOT NULL,
            content_fts_norm TEXT NOT NULL,
            UNIQUE(doc_id, chunk_index)
        )
        "#,
    ),
    Step::Create("CREATE INDEX IF NOT EXISTS idx_doc_chunk_doc_id ON doc_chunk(doc_id)"),
    Step::Create(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS doc_fts USING fts5(
            chunk_id UNINDEXED,
            doc_id UNINDEXED,
            path UNINDEXED,
            title,
            content
        )
        "#,
    ),
    Step::OptionalVirtual(
        "doc_meta_fts",
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS doc_meta_fts USING fts5(
            doc_id UNINDEXED,
            path,
            title
        )
        "#,
    ),
    Step::Create(
        r#"
        CREATE TABLE IF NOT EXISTS doc_statistics (
            doc_id TEXT PRIMARY KEY,
            word_count INTEGER NOT NULL DEFAULT 0,
            char_count INTEGER NOT NULL DEFAULT 0,
            open_count INTEGER NOT NULL DEFAULT 0,
            last_open_ts INTEGER,
            updated_at INTEGER NOT NULL
        )
        "#,
    ),
    // `rid INTEGER PRIMARY KEY` aliases the rowid, so it survives VACUUM and
    // stays equal to the ANN row id.
    Step::Create(
        r#"
        CREATE TABLE IF NOT EXISTS embedding (
            rid INTEGER PRIMARY KEY,
            id TEXT NOT NULL UNIQUE,
            doc_id TEXT NOT NULL,
            chunk_id TEXT,
            chunk_index INTEGER,
            content_hash TEXT NOT NULL,
            embedding BLOB NOT NULL,
            embedding_model TEXT NOT NULL,
            embedding_len INTEGER NOT NULL,
            ctime INTEGER NOT NULL,
            mtime INTEGER NOT NULL
        )
        "#,
    ),
    Step::Create("CREATE INDEX IF NOT EXISTS idx_embedding_doc_id ON embedding(doc_id)"),
    Step::Create(
        r#"
        CREATE TABLE IF NOT EXISTS graph_nodes (
            id TEXT PRIMARY KEY,
            node_type TEXT NOT NULL,
            label TEXT NOT NULL,
            attributes TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ),
    Step::Create("CREATE INDEX IF NOT EXISTS idx_graph_nodes_type ON graph_nodes(node_type)"),
    Step::Create(
        r#"
        CREATE TABLE IF NOT EXISTS graph_edges (
            id TEXT PRIMARY KEY,
            from_node_id TEXT NOT NULL,
            to_node_id TEXT NOT NULL,
            edge_type TEXT NOT NULL,
            weight REAL NOT NULL DEFAULT 1.0,
            attributes TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ),
    Step::Create("CREATE INDEX IF NOT EXISTS idx_graph_edges_from ON graph_edges(from_node_id)"),
    Step::Create("CREATE INDEX IF NOT EXISTS idx_graph_edges_to ON graph_edges(to_node_id)"),
    Step::Create("CREATE INDEX IF NOT EXISTS idx_graph_edges_type ON graph_edges(edge_type)"),
    INDEX_STATE,
];

const META_STEPS: &[Step] = &[
    Step::Create(
        r#"
        CREATE TABLE IF NOT EXISTS chat_project (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            folder_path TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ),
    Step::AddColumn("ALTER TABLE chat_project ADD COLUMN archived INTEGER NOT NULL DEFAULT 0"),
    Step::Create(
        r#"
        CREATE TABLE IF NOT EXISTS chat_conversation (
            id TEXT PRIMARY KEY,
            project_id TEXT,
            title TEXT NOT NULL,
            file_path TEXT,
            model TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    ),
    Step::AddColumn("ALTER TABLE chat_conversation ADD COLUMN archived INTEGER NOT NULL DEFAULT 0"),
    Step::Create(
        "CREATE INDEX IF NOT EXISTS idx_chat_conversation_project ON chat_conversation(project_id)",
    ),
    Step::Create(
        r#"
        CREATE TABLE IF NOT EXISTS chat_message (
            id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            model TEXT,
            token_usage_json TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    ),
    Step::Create(
        "CREATE INDEX IF NOT EXISTS idx_chat_message_conversation ON chat_message(conversation_id, created_at)",
    ),
    Step::Create(
        r#"
        CREATE TABLE IF NOT EXISTS chat_message_resource (
            id TEXT PRIMARY KEY,
            message_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            source TEXT NOT NULL,
            summary TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    ),
    Step::Create(
        "CREATE INDEX IF NOT EXISTS idx_chat_resource_message ON chat_message_resource(message_id)",
    ),
    Step::Create(
        r#"
        CREATE TABLE IF NOT EXISTS chat_star (
            message_id TEXT PRIMARY KEY,
            conversation_id TEXT NOT NULL,
            project_id TEXT,
            created_at INTEGER NOT NULL
        )
        "#,
    ),
    INDEX_STATE,
];

const INDEX_STATE: Step = Step::Create(
    r#"
    CREATE TABLE IF NOT EXISTS index_state (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL,
        updated_at INTEGER NOT NULL
    )
    "#,
);

/// Apply `schema` to `db`.
pub async fn run_migrations<B: Backend>(db: &B, schema: Schema) -> StorageResult<MigrationReport> {
    let steps = match schema {
        Schema::Search => SEARCH_STEPS,
        Schema::Meta => META_STEPS,
    };
    let mut report = MigrationReport::default();

    for step in steps {
        match step {
            Step::Create(sql) => match db.exec(sql).await {
                Ok(()) => report.statements_applied += 1,
                Err(e) if e.engine_message().is_some_and(is_already_exists) => {}
                Err(e) => return Err(e),
            },
            Step::AddColumn(sql) => match db.exec(sql).await {
                Ok(()) => {
                    report.columns_added += 1;
                    report.statements_applied += 1;
                }
                Err(e) if e.engine_message().is_some_and(is_duplicate_column) => {}
                Err(e) => return Err(e),
            },
            Step::OptionalVirtual(name, sql) => match db.exec(sql).await {
                Ok(()) => {
                    report.statements_applied += 1;
                    if *name == "doc_meta_fts" {
                        report.title_index = true;
                    }
                }
                Err(e) => {
                    tracing::warn!(table = name, error = %e, "optional index unavailable");
                    report.warnings.push(format!("{name}: {e}"));
                }
            },
        }
    }

    if schema == Schema::Search {
        restore_vector_index(db, &mut report).await;
    }

    db.exec(&format!("PRAGMA user_version = {SCHEMA_VERSION}")).await?;
    tracing::debug!(
        ?schema,
        applied = report.statements_applied,
        warnings = report.warnings.len(),
        "migrations complete"
    );
    Ok(report)
}

/// Recreate the ANN table when embeddings exist but the table does not.
/// Failure is a capability warning.
async fn restore_vector_index<B: Backend>(db: &B, report: &mut MigrationReport) {
    let outcome: StorageResult<Option<usize>> = async {
        if vector::index_table_exists(db).await? {
            return Ok(None);
        }
        let latest = db
            .get(&Statement::new(
                "SELECT embedding_len FROM embedding ORDER BY mtime DESC, rid DESC LIMIT 1",
            ))
            .await?;
        let Some(row) = latest else {
            return Ok(None);
        };
        let dim: usize = row.get("embedding_len")?;
        if !db.vector_available().await {
            return Err(StorageError::VectorIndexExtensionMissing);
        }
        vector::create_index_table(db, dim).await?;
        let filled = vector::backfill_index(db, dim).await?;
        tracing::info!(dimension = dim, rows = filled, "restored vector index");
        Ok(Some(dim))
    }
    .await;

    match outcome {
        Ok(restored) => report.vector_index_restored = restored,
        Err(e) => {
            tracing::warn!(error = %e, "vector index could not be restored");
            report.warnings.push(format!("{}: {e}", vector::INDEX_TABLE));
        }
    }
}

/// Read `PRAGMA user_version`.
pub async fn schema_version<B: Backend>(db: &B) -> StorageResult<i64> {
    let row = db
        .get(&Statement::new("PRAGMA user_version"))
        .await?
        .ok_or_else(|| StorageError::Decode("PRAGMA user_version returned no row".into()))?;
    row.get_idx(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Database, EngineKind};
    use std::time::Duration;

    async fn open(kind: EngineKind, dir: &tempfile::TempDir) -> Database {
        Database::open(kind, &dir.path().join("t.sqlite"), Duration::from_secs(5))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = open(EngineKind::Native, &tmp).await;

        let first = run_migrations(&db, Schema::Search).await.unwrap();
        assert!(first.title_index);
        assert!(first.warnings.is_empty());

        let second = run_migrations(&db, Schema::Search).await.unwrap();
        assert_eq!(second.columns_added, 0);
        assert!(second.warnings.is_empty());
        assert_eq!(schema_version(&db).await.unwrap(), SCHEMA_VERSION);

        let idx = db
            .get(&Statement::new(
                "SELECT COUNT(*) AS n FROM sqlite_master WHERE type = 'index' AND name = 'idx_graph_edges_from'",
            ))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(idx.get::<i64>("n").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_meta_schema_on_paged_engine() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = open(EngineKind::Paged, &tmp).await;
        run_migrations(&db, Schema::Meta).await.unwrap();
        run_migrations(&db, Schema::Meta).await.unwrap();

        let rows = db
            .all(&Statement::new(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name LIKE 'chat_%' ORDER BY name",
            ))
            .await
            .unwrap();
        let names: Vec<String> = rows.iter().map(|r| r.get("name").unwrap()).collect();
        assert_eq!(
            names,
            vec![
                "chat_conversation",
                "chat_message",
                "chat_message_resource",
                "chat_project",
                "chat_star"
            ]
        );
    }

    #[tokio::test]
    async fn test_fresh_database_has_no_vector_table() {
        let tmp = tempfile::TempDir::new().unwrap();
        let db = open(EngineKind::Native, &tmp).await;
        let report = run_migrations(&db, Schema::Search).await.unwrap();
        assert_eq!(report.vector_index_restored, None);
        assert!(!vector::index_table_exists(&db).await.unwrap());
    }
}
