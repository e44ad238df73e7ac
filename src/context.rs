//! The storage context: both databases, opened once, with repositories
//! borrowing them.
//!
//! ```text
//! <folder>/search.sqlite   documents, chunks, statistics, embeddings, graph
//! <folder>/meta.sqlite     chat records
//! ```
//!
//! Each database gets its own engine selection and migration run, so one
//! may fall back to the portable engine while the other stays native.

use notestore_core::graph::document_node_id;
use notestore_core::search::{hybrid_search, SearchHit, SearchRequest};

use crate::backend::{Backend, Database, EngineKind};
use crate::backend::selector::open_database;
use crate::config::Config;
use crate::error::{StorageError, StorageResult};
use crate::graph::GraphStore;
use crate::migrate::{MigrationReport, Schema};
use crate::repo::{ChatRepo, DocumentRepo, IndexStateRepo};
use crate::search::SqliteSearchSource;
use crate::vector::VectorStore;

/// What [`StorageContext::remove_documents`] deleted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub documents: u64,
    pub embeddings: u64,
    pub graph_nodes: u64,
}

pub struct StorageContext {
    config: Config,
    search: Database,
    meta: Database,
    search_report: MigrationReport,
    meta_report: MigrationReport,
}

impl StorageContext {
    /// Open (creating if needed) both databases under `storage.folder`.
    pub async fn open(config: &Config) -> StorageResult<Self> {
        std::fs::create_dir_all(&config.storage.folder)
            .map_err(|e| StorageError::unknown("create storage folder", e))?;
        let options = config.storage.open_options();

        let (search, search_report) =
            open_database(&config.storage.search_db_path(), Schema::Search, &options).await?;
        let (meta, meta_report) =
            match open_database(&config.storage.meta_db_path(), Schema::Meta, &options).await {
                Ok(opened) => opened,
                Err(e) => {
                    if let Err(close_err) = search.close().await {
                        tracing::debug!(error = %close_err, "close search database after failed open");
                    }
                    return Err(e);
                }
            };

        tracing::debug!(
            search_engine = %search.kind(),
            meta_engine = %meta.kind(),
            folder = %config.storage.folder.display(),
            "storage context ready"
        );
        Ok(Self {
            config: config.clone(),
            search,
            meta,
            search_report,
            meta_report,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn search_db(&self) -> &Database {
        &self.search
    }

    pub fn meta_db(&self) -> &Database {
        &self.meta
    }

    /// Engines serving `(search, meta)`.
    pub fn engines(&self) -> (EngineKind, EngineKind) {
        (self.search.kind(), self.meta.kind())
    }

    /// Migration outcomes of `(search, meta)` from open.
    pub fn migration_reports(&self) -> (&MigrationReport, &MigrationReport) {
        (&self.search_report, &self.meta_report)
    }

    pub fn documents(&self) -> DocumentRepo<'_, Database> {
        DocumentRepo::new(&self.search)
    }

    pub fn vectors(&self) -> VectorStore<'_, Database> {
        VectorStore::new(&self.search, self.config.vector.options())
    }

    pub fn graph(&self) -> GraphStore<'_, Database> {
        GraphStore::new(&self.search)
    }

    /// Indexing checkpoints of the search database.
    pub fn index_state(&self) -> IndexStateRepo<'_, Database> {
        IndexStateRepo::new(&self.search)
    }

    pub fn chat(&self) -> ChatRepo<'_, Database> {
        ChatRepo::new(&self.meta)
    }

    /// Chat-side checkpoints (meta database).
    pub fn meta_state(&self) -> IndexStateRepo<'_, Database> {
        IndexStateRepo::new(&self.meta)
    }

    pub fn search_source(&self) -> SqliteSearchSource<'_, Database> {
        SqliteSearchSource::new(&self.search, self.config.vector.options())
    }

    /// Hybrid search with the configured tuning.
    pub async fn search(&self, req: &SearchRequest<'_>) -> anyhow::Result<Vec<SearchHit>> {
        hybrid_search(&self.search_source(), req, &self.config.search.params()).await
    }

    /// Remove documents and everything derived from them: chunks, full-text
    /// rows, statistics, embeddings with their ANN entries, and the
    /// documents' graph nodes with their edges.
    pub async fn remove_documents(&self, ids: &[String]) -> StorageResult<RemovalReport> {
        if ids.is_empty() {
            return Ok(RemovalReport::default());
        }
        let node_ids: Vec<String> = self
            .documents()
            .get_many(ids)
            .await?
            .iter()
            .map(|d| document_node_id(&d.path))
            .collect();
        let embeddings = self.vectors().delete_for_docs(ids).await?;
        let graph_nodes = self.graph().delete_nodes(&node_ids).await?;
        let documents = self.documents().delete_many(ids).await?;
        tracing::debug!(documents, embeddings, graph_nodes, "documents removed");
        Ok(RemovalReport {
            documents,
            embeddings,
            graph_nodes,
        })
    }

    /// Persist both databases (meaningful for the memory engine).
    pub async fn save(&self) -> StorageResult<()> {
        self.search.save().await?;
        self.meta.save().await
    }

    /// Save and close both databases. Both are attempted; the first error
    /// is returned.
    pub async fn close(self) -> StorageResult<()> {
        let search = self.search.close().await;
        let meta = self.meta.close().await;
        search.and(meta)
    }
}
