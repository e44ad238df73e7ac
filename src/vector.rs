//! # Vector store
//!
//! Embeddings live in two places that share one integer key:
//!
//! - `embedding`: the relational row (`rid INTEGER PRIMARY KEY`), the durable
//!   source of truth;
//! - `vec_embeddings`: a `vec0` ANN table whose `rowid` equals the `rid` of
//!   its embedding row.
//!
//! There is no mapping table; [`RowId`] is the join key. `vec0` cannot update
//! in place, so an index entry is always rewritten through
//! [`replace_index_entry`] (delete, then insert).
//!
//! The ANN table is created lazily at the width of the first vector stored.
//! When a vector of another width arrives the insert fails with a dimension
//! mismatch; the table is then dropped and recreated at the new width and
//! the insert retried. Previously indexed vectors are discarded from the ANN
//! side only; their relational rows survive and [`VectorStore::rebuild_index`]
//! can refill the index from them.
//!
//! Without the `sqlite-vec` extension the relational rows are still written
//! and [`VectorStore::search`] reports
//! [`StorageError::VectorIndexExtensionMissing`].

use notestore_core::embedding::{
    cosine_similarity, declared_len_matches, decode_vector, encode_vector, mean_vector, rowid_list,
    similarity_from_distance, RowId,
};
use notestore_core::models::{now_ms, EmbeddingInput, EmbeddingRecord};
use notestore_core::scope::{SearchScope, DEFAULT_MAX_SCOPE_ROWS};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use crate::backend::{transaction, Backend, Row, Statement};
use crate::error::{StorageError, StorageResult};
use crate::repo::{bind_all, placeholders, IndexStateRepo};

/// Name of the ANN virtual table.
pub const INDEX_TABLE: &str = "vec_embeddings";

/// `index_state` key counting ANN table recreations.
pub const RECREATIONS_KEY: &str = "vector_index.recreations";

/// Largest `k` accepted by `vec0` KNN queries.
const MAX_KNN: usize = 4096;

#[derive(Debug, Clone)]
pub struct VectorOptions {
    /// Scopes resolving to more row ids than this are not inlined into the
    /// KNN query; an oversampled unrestricted query is post-filtered instead.
    pub max_scope_rows: usize,
    /// Multiplier on `k` for the post-filtered path.
    pub scope_oversample: usize,
}

impl Default for VectorOptions {
    fn default() -> Self {
        Self {
            max_scope_rows: DEFAULT_MAX_SCOPE_ROWS,
            scope_oversample: 4,
        }
    }
}

/// One nearest-neighbor result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorHit {
    pub row_id: RowId,
    pub id: String,
    pub doc_id: String,
    pub chunk_id: Option<String>,
    pub distance: f64,
    pub similarity: f64,
}

/// Result of [`VectorStore::cleanup_orphans`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OrphanCleanup {
    pub found: u64,
    pub deleted: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VectorCounts {
    /// Relational embedding rows.
    pub rows: u64,
    /// Entries in the ANN table.
    pub indexed: u64,
    /// Declared ANN width, when the table exists.
    pub dimension: Option<usize>,
}

pub struct VectorStore<'a, B: Backend> {
    db: &'a B,
    options: VectorOptions,
    available: OnceLock<bool>,
}

fn record_from_row(row: &Row) -> StorageResult<EmbeddingRecord> {
    let blob: Vec<u8> = row.get("embedding")?;
    let embedding_len: usize = row.get("embedding_len")?;
    if !declared_len_matches(&blob, embedding_len) {
        return Err(StorageError::Decode(format!(
            "embedding '{}' declares {} elements but holds {} bytes",
            row.get::<String>("id")?,
            embedding_len,
            blob.len()
        )));
    }
    Ok(EmbeddingRecord {
        row_id: row.get("rid")?,
        id: row.get("id")?,
        doc_id: row.get("doc_id")?,
        chunk_id: row.get("chunk_id")?,
        chunk_index: row.get("chunk_index")?,
        content_hash: row.get("content_hash")?,
        vector: decode_vector(&blob),
        model: row.get("embedding_model")?,
        embedding_len,
        ctime: row.get("ctime")?,
        mtime: row.get("mtime")?,
    })
}

const RECORD_COLUMNS: &str = "rid, id, doc_id, chunk_id, chunk_index, content_hash, embedding, \
     embedding_model, embedding_len, ctime, mtime";

impl<'a, B: Backend> VectorStore<'a, B> {
    pub fn new(db: &'a B, options: VectorOptions) -> Self {
        Self {
            db,
            options,
            available: OnceLock::new(),
        }
    }

    /// Whether the ANN extension is usable on this connection. Probed once.
    pub async fn available(&self) -> bool {
        if let Some(v) = self.available.get() {
            return *v;
        }
        let probed = self.db.vector_available().await;
        *self.available.get_or_init(|| probed)
    }

    /// Declared width of the ANN table, if it exists.
    pub async fn index_dimension(&self) -> StorageResult<Option<usize>> {
        index_dimension(self.db).await
    }

    /// How many times the ANN table was recreated for a dimension change.
    pub async fn recreation_count(&self) -> StorageResult<i64> {
        IndexStateRepo::new(self.db).counter(RECREATIONS_KEY).await
    }

    /// Insert or update one embedding and its ANN entry atomically.
    pub async fn upsert(&self, input: &EmbeddingInput) -> StorageResult<RowId> {
        let mut ids = self.upsert_many(std::slice::from_ref(input)).await?;
        ids.pop()
            .ok_or_else(|| StorageError::Decode("upsert produced no row id".into()))
    }

    /// Upsert a batch inside one transaction.
    pub async fn upsert_many(&self, inputs: &[EmbeddingInput]) -> StorageResult<Vec<RowId>> {
        if let Some(bad) = inputs.iter().find(|i| i.vector.is_empty()) {
            return Err(StorageError::Decode(format!("embedding '{}' has no elements", bad.id)));
        }
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let ann = self.available().await;
        if !ann {
            tracing::debug!(count = inputs.len(), "vector extension missing; writing relational rows only");
        }

        transaction(self.db, |db| {
            Box::pin(async move {
                let mut ids = Vec::with_capacity(inputs.len());
                for input in inputs {
                    let blob = encode_vector(&input.vector);
                    let rid = write_row(db, input, &blob).await?;
                    if ann {
                        replace_index_entry(db, rid, &blob, input.vector.len()).await?;
                    }
                    ids.push(rid);
                }
                Ok(ids)
            })
        })
        .await
    }

    pub async fn row_id(&self, id: &str) -> StorageResult<Option<RowId>> {
        let row = self
            .db
            .get(&Statement::new("SELECT rid FROM embedding WHERE id = ?").bind(id))
            .await?;
        row.map(|r| r.get("rid")).transpose()
    }

    pub async fn get(&self, id: &str) -> StorageResult<Option<EmbeddingRecord>> {
        let sql = format!("SELECT {RECORD_COLUMNS} FROM embedding WHERE id = ?");
        let row = self.db.get(&Statement::new(sql).bind(id)).await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Every embedding of a document, chunk order first. Rows violating the
    /// length invariant are skipped.
    pub async fn get_for_doc(&self, doc_id: &str) -> StorageResult<Vec<EmbeddingRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM embedding WHERE doc_id = ? ORDER BY chunk_index IS NULL, chunk_index, id"
        );
        let rows = self.db.all(&Statement::new(sql).bind(doc_id)).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            match record_from_row(row) {
                Ok(rec) => out.push(rec),
                Err(e) => tracing::warn!(doc_id, error = %e, "skipping corrupt embedding row"),
            }
        }
        Ok(out)
    }

    /// Delete embeddings by logical id from both sides.
    pub async fn delete_by_ids(&self, ids: &[String]) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let select = format!("SELECT rid FROM embedding WHERE id IN ({})", placeholders(ids.len()));
        let delete = format!("DELETE FROM embedding WHERE id IN ({})", placeholders(ids.len()));
        self.delete_rows(bind_all(Statement::new(select), ids), bind_all(Statement::new(delete), ids))
            .await
    }

    /// Delete every embedding of the given documents from both sides.
    pub async fn delete_for_docs(&self, doc_ids: &[String]) -> StorageResult<u64> {
        if doc_ids.is_empty() {
            return Ok(0);
        }
        let n = doc_ids.len();
        let select = format!("SELECT rid FROM embedding WHERE doc_id IN ({})", placeholders(n));
        let delete = format!("DELETE FROM embedding WHERE doc_id IN ({})", placeholders(n));
        self.delete_rows(bind_all(Statement::new(select), doc_ids), bind_all(Statement::new(delete), doc_ids))
            .await
    }

    async fn delete_rows(&self, select: Statement, delete: Statement) -> StorageResult<u64> {
        let ann = self.available().await;
        transaction(self.db, |db| {
            Box::pin(async move {
                let rids: Vec<RowId> = db
                    .all(&select)
                    .await?
                    .iter()
                    .map(|r| r.get("rid"))
                    .collect::<StorageResult<_>>()?;
                let removed = db.run(&delete).await?.changes;
                if ann && index_table_exists(db).await? {
                    delete_index_entries(db, &rids).await?;
                }
                Ok(removed)
            })
        })
        .await
    }

    /// K nearest neighbors of `query` within `scope`, closest first.
    ///
    /// The scope is resolved to row ids before the KNN query, so the ANN
    /// table is only ever constrained by `rowid IN (...)`. A query of the
    /// wrong width returns no results.
    pub async fn search(
        &self,
        query: &[f32],
        k: usize,
        scope: &SearchScope,
    ) -> StorageResult<Vec<VectorHit>> {
        if k == 0 || query.is_empty() {
            return Ok(Vec::new());
        }
        if !self.available().await {
            return Err(StorageError::VectorIndexExtensionMissing);
        }
        let Some(dim) = self.index_dimension().await? else {
            if self.counts().await?.rows == 0 {
                return Ok(Vec::new());
            }
            return Err(StorageError::VectorIndexTableMissing(INDEX_TABLE.to_string()));
        };
        if dim != query.len() {
            tracing::warn!(
                index_dimension = dim,
                query_dimension = query.len(),
                "query vector width does not match the index; skipping vector search"
            );
            return Ok(Vec::new());
        }

        let k = k.min(MAX_KNN);
        let blob = encode_vector(query);
        let neighbors = match self.resolve_scope(scope).await? {
            None => knn(self.db, &blob, k, None).await?,
            Some(rids) if rids.is_empty() => return Ok(Vec::new()),
            Some(rids) if rids.len() <= self.options.max_scope_rows => {
                knn(self.db, &blob, k, Some(&rids)).await?
            }
            Some(rids) => {
                let fetch = k.saturating_mul(self.options.scope_oversample.max(1)).min(MAX_KNN);
                tracing::debug!(
                    scope_rows = rids.len(),
                    max_scope_rows = self.options.max_scope_rows,
                    fetch,
                    "scope too large to inline; post-filtering"
                );
                let allowed: HashSet<RowId> = rids.into_iter().collect();
                let mut hits = knn(self.db, &blob, fetch, None).await?;
                hits.retain(|(rid, _)| allowed.contains(rid));
                hits.truncate(k);
                hits
            }
        };

        self.resolve_hits(neighbors).await
    }

    /// Map `(row id, distance)` pairs back to logical ids in one lookup.
    async fn resolve_hits(&self, neighbors: Vec<(RowId, f64)>) -> StorageResult<Vec<VectorHit>> {
        if neighbors.is_empty() {
            return Ok(Vec::new());
        }
        let rids: Vec<RowId> = neighbors.iter().map(|(rid, _)| *rid).collect();
        let sql = format!(
            "SELECT rid, id, doc_id, chunk_id FROM embedding WHERE rid IN ({})",
            rowid_list(&rids)
        );
        let rows = self.db.all(&Statement::new(sql)).await?;
        let mut by_rid: HashMap<RowId, (String, String, Option<String>)> = HashMap::new();
        for row in &rows {
            by_rid.insert(
                row.get("rid")?,
                (row.get("id")?, row.get("doc_id")?, row.get("chunk_id")?),
            );
        }

        let mut hits = Vec::with_capacity(neighbors.len());
        for (rid, distance) in neighbors {
            let Some((id, doc_id, chunk_id)) = by_rid.remove(&rid) else {
                tracing::debug!(row_id = %rid, "ANN entry without embedding row");
                continue;
            };
            hits.push(VectorHit {
                row_id: rid,
                id,
                doc_id,
                chunk_id,
                distance,
                similarity: similarity_from_distance(distance),
            });
        }
        Ok(hits)
    }

    /// Row ids eligible under `scope`; `None` means unrestricted.
    async fn resolve_scope(&self, scope: &SearchScope) -> StorageResult<Option<Vec<RowId>>> {
        let stmt = match scope {
            _ if scope.is_unrestricted() => return Ok(None),
            SearchScope::All => return Ok(None),
            SearchScope::Path(path) => Statement::new(
                "SELECT e.rid FROM embedding e JOIN doc_meta d ON d.id = e.doc_id WHERE d.path = ?",
            )
            .bind(path.as_str()),
            SearchScope::Folder(folder) => Statement::new(
                "SELECT e.rid FROM embedding e JOIN doc_meta d ON d.id = e.doc_id \
                 WHERE substr(d.path, 1, length(?)) = ?",
            )
            .bind(SearchScope::folder_prefix(folder))
            .bind(SearchScope::folder_prefix(folder)),
            SearchScope::AllowIds(ids) => {
                if ids.is_empty() {
                    return Ok(Some(Vec::new()));
                }
                let sql = format!(
                    "SELECT rid FROM embedding WHERE doc_id IN ({})",
                    placeholders(ids.len())
                );
                bind_all(Statement::new(sql), ids)
            }
            SearchScope::DenyIds(ids) => {
                let sql = format!(
                    "SELECT rid FROM embedding WHERE doc_id NOT IN ({})",
                    placeholders(ids.len())
                );
                bind_all(Statement::new(sql), ids)
            }
        };
        let rows = self.db.all(&stmt).await?;
        let rids = rows
            .iter()
            .map(|r| r.get_idx::<RowId>(0))
            .collect::<StorageResult<Vec<_>>>()?;
        Ok(Some(rids))
    }

    /// Remove ANN entries whose row id has no embedding row.
    pub async fn cleanup_orphans(&self) -> StorageResult<OrphanCleanup> {
        if !self.available().await {
            return Err(StorageError::VectorIndexExtensionMissing);
        }
        if !index_table_exists(self.db).await? {
            return Ok(OrphanCleanup::default());
        }
        let rows = self
            .db
            .all(&Statement::new(format!(
                "SELECT rowid AS rid FROM {INDEX_TABLE} WHERE rowid NOT IN (SELECT rid FROM embedding)"
            )))
            .await?;
        let orphans = rows
            .iter()
            .map(|r| r.get::<RowId>("rid"))
            .collect::<StorageResult<Vec<_>>>()?;
        if orphans.is_empty() {
            return Ok(OrphanCleanup::default());
        }

        let deleted = transaction(self.db, |db| {
            Box::pin(async move { delete_index_entries(db, &orphans).await })
        })
        .await?;
        tracing::info!(found = rows.len(), deleted, "removed orphaned vector index entries");
        Ok(OrphanCleanup {
            found: rows.len() as u64,
            deleted,
        })
    }

    /// Element-wise mean of a document's chunk vectors.
    ///
    /// This is a lossy summary. On long or topically mixed documents the
    /// centroid drifts toward a generic direction ("semantic dilution"), so
    /// document-level similarity built on it is weaker than chunk-level
    /// search. Document-level rows (no chunk id) are not included.
    pub async fn average_embedding(&self, doc_id: &str) -> StorageResult<Option<Vec<f32>>> {
        let records = self.get_for_doc(doc_id).await?;
        Ok(mean_vector(
            records
                .iter()
                .filter(|r| r.chunk_id.is_some())
                .map(|r| r.vector.as_slice()),
        ))
    }

    /// Cosine similarity of two documents' average embeddings.
    pub async fn document_similarity(&self, a: &str, b: &str) -> StorageResult<Option<f32>> {
        let (Some(va), Some(vb)) = (self.average_embedding(a).await?, self.average_embedding(b).await?)
        else {
            return Ok(None);
        };
        if va.len() != vb.len() {
            return Ok(None);
        }
        Ok(Some(cosine_similarity(&va, &vb)))
    }

    /// Drop the ANN table and refill it from the relational rows at the most
    /// recent embedding width. Rows of other widths are left out.
    pub async fn rebuild_index(&self) -> StorageResult<u64> {
        if !self.available().await {
            return Err(StorageError::VectorIndexExtensionMissing);
        }
        let latest = self
            .db
            .get(&Statement::new(
                "SELECT embedding_len FROM embedding ORDER BY mtime DESC, rid DESC LIMIT 1",
            ))
            .await?;
        let dim: Option<usize> = latest.map(|r| r.get("embedding_len")).transpose()?;

        let filled = transaction(self.db, |db| {
            Box::pin(async move {
                db.exec(&format!("DROP TABLE IF EXISTS {INDEX_TABLE}")).await?;
                match dim {
                    Some(dim) => {
                        create_index_table(db, dim).await?;
                        backfill_index(db, dim).await
                    }
                    None => Ok(0),
                }
            })
        })
        .await?;
        tracing::info!(dimension = ?dim, rows = filled, "vector index rebuilt");
        Ok(filled)
    }

    pub async fn counts(&self) -> StorageResult<VectorCounts> {
        let rows: u64 = count(self.db, "SELECT COUNT(*) FROM embedding").await?;
        let dimension = index_dimension(self.db).await?;
        let indexed = if dimension.is_some() && self.available().await {
            count(self.db, &format!("SELECT COUNT(*) FROM {INDEX_TABLE}")).await?
        } else {
            0
        };
        Ok(VectorCounts {
            rows,
            indexed,
            dimension,
        })
    }
}

async fn count<B: Backend>(db: &B, sql: &str) -> StorageResult<u64> {
    let row = db.get(&Statement::new(sql)).await?;
    Ok(row.map(|r| r.get_idx::<i64>(0)).transpose()?.unwrap_or(0).max(0) as u64)
}

/// Update the row for `input.id` in place, or insert it; returns its row id.
async fn write_row<B: Backend>(db: &B, input: &EmbeddingInput, blob: &[u8]) -> StorageResult<RowId> {
    let now = now_ms();
    let existing = db
        .get(&Statement::new("SELECT rid FROM embedding WHERE id = ?").bind(input.id.as_str()))
        .await?;

    if let Some(row) = existing {
        let rid: RowId = row.get("rid")?;
        db.run(
            &Statement::new(
                r#"
                UPDATE embedding SET
                    doc_id = ?, chunk_id = ?, chunk_index = ?, content_hash = ?,
                    embedding = ?, embedding_model = ?, embedding_len = ?, mtime = ?
                WHERE rid = ?
                "#,
            )
            .bind(input.doc_id.as_str())
            .bind(input.chunk_id.as_deref())
            .bind(input.chunk_index)
            .bind(input.content_hash.as_str())
            .bind(blob.to_vec())
            .bind(input.model.as_str())
            .bind(input.vector.len())
            .bind(now)
            .bind(rid),
        )
        .await?;
        return Ok(rid);
    }

    let res = db
        .run(
            &Statement::new(
                r#"
                INSERT INTO embedding (id, doc_id, chunk_id, chunk_index, content_hash,
                                       embedding, embedding_model, embedding_len, ctime, mtime)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(input.id.as_str())
            .bind(input.doc_id.as_str())
            .bind(input.chunk_id.as_deref())
            .bind(input.chunk_index)
            .bind(input.content_hash.as_str())
            .bind(blob.to_vec())
            .bind(input.model.as_str())
            .bind(input.vector.len())
            .bind(now)
            .bind(now),
        )
        .await?;
    Ok(RowId(res.last_insert_rowid))
}

fn is_dimension_mismatch(err: &StorageError) -> bool {
    err.engine_message()
        .is_some_and(|m| m.to_ascii_lowercase().contains("dimension mismatch"))
}

/// Rewrite the ANN entry at `rid`: delete, then insert.
///
/// Creates the table at `dim` when missing. A dimension mismatch drops and
/// recreates the table at `dim` and retries the insert once.
pub(crate) async fn replace_index_entry<B: Backend>(
    db: &B,
    rid: RowId,
    blob: &[u8],
    dim: usize,
) -> StorageResult<()> {
    if !index_table_exists(db).await? {
        create_index_table(db, dim).await?;
    }
    db.run(&Statement::new(format!("DELETE FROM {INDEX_TABLE} WHERE rowid = ?")).bind(rid))
        .await?;

    let insert = Statement::new(format!("INSERT INTO {INDEX_TABLE} (rowid, embedding) VALUES (?, ?)"))
        .bind(rid)
        .bind(blob.to_vec());

    match db.run(&insert).await {
        Ok(_) => Ok(()),
        Err(e) if is_dimension_mismatch(&e) => {
            let previous = index_dimension(db).await?;
            tracing::warn!(
                previous_dimension = ?previous,
                new_dimension = dim,
                "embedding dimension changed; recreating vector index, previously indexed vectors were discarded"
            );
            db.exec(&format!("DROP TABLE IF EXISTS {INDEX_TABLE}")).await?;
            create_index_table(db, dim).await?;
            IndexStateRepo::new(db).increment(RECREATIONS_KEY).await?;
            db.run(&insert)
                .await
                .map_err(|e| StorageError::unknown("inserting vector index entry after recreation", e))?;
            Ok(())
        }
        Err(e) => {
            if !index_table_exists(db).await.unwrap_or(false) {
                return Err(StorageError::VectorIndexTableMissing(INDEX_TABLE.to_string()));
            }
            Err(StorageError::unknown("inserting vector index entry", e))
        }
    }
}

async fn delete_index_entries<B: Backend>(db: &B, rids: &[RowId]) -> StorageResult<u64> {
    let mut stmt = db.prepare(&format!("DELETE FROM {INDEX_TABLE} WHERE rowid = ?"));
    let mut deleted = 0;
    for rid in rids {
        deleted += stmt.reset().bind(*rid).run().await?.changes;
    }
    Ok(deleted)
}

/// Nearest neighbors as `(row id, distance)`, closest first.
async fn knn<B: Backend>(
    db: &B,
    query: &[u8],
    k: usize,
    rowids: Option<&[RowId]>,
) -> StorageResult<Vec<(RowId, f64)>> {
    let mut sql = format!("SELECT rowid AS rid, distance FROM {INDEX_TABLE} WHERE embedding MATCH ? AND k = ?");
    if let Some(rids) = rowids {
        sql.push_str(&format!(" AND rowid IN ({})", rowid_list(rids)));
    }
    sql.push_str(" ORDER BY distance");

    let rows = db
        .all(&Statement::new(sql).bind(query.to_vec()).bind(k))
        .await
        .map_err(|e| match e {
            StorageError::Engine { ref message, .. } if message.contains("no such table") => {
                StorageError::VectorIndexTableMissing(INDEX_TABLE.to_string())
            }
            other => other,
        })?;
    rows.iter()
        .map(|r| Ok((r.get("rid")?, r.get("distance")?)))
        .collect()
}

pub(crate) async fn index_table_exists<B: Backend>(db: &B) -> StorageResult<bool> {
    Ok(index_sql(db).await?.is_some())
}

async fn index_sql<B: Backend>(db: &B) -> StorageResult<Option<String>> {
    let row = db
        .get(
            &Statement::new("SELECT sql FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(INDEX_TABLE),
        )
        .await?;
    row.map(|r| r.get("sql")).transpose()
}

pub(crate) async fn index_dimension<B: Backend>(db: &B) -> StorageResult<Option<usize>> {
    Ok(index_sql(db).await?.as_deref().and_then(parse_dimension))
}

/// Width from a `vec0` declaration such as `embedding float[384]`.
fn parse_dimension(create_sql: &str) -> Option<usize> {
    let start = create_sql.find("float[")? + "float[".len();
    let rest = &create_sql[start..];
    let end = rest.find(']')?;
    rest[..end].trim().parse().ok()
}

pub(crate) async fn create_index_table<B: Backend>(db: &B, dim: usize) -> StorageResult<()> {
    db.exec(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS {INDEX_TABLE} USING vec0(embedding float[{dim}])"
    ))
    .await
}

/// Copy every relational row of width `dim` into the ANN table.
pub(crate) async fn backfill_index<B: Backend>(db: &B, dim: usize) -> StorageResult<u64> {
    let res = db
        .run(
            &Statement::new(format!(
                "INSERT INTO {INDEX_TABLE} (rowid, embedding) SELECT rid, embedding FROM embedding WHERE embedding_len = ?"
            ))
            .bind(dim),
        )
        .await?;
    Ok(res.changes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dimension() {
        assert_eq!(
            parse_dimension("CREATE VIRTUAL TABLE vec_embeddings USING vec0(embedding float[384])"),
            Some(384)
        );
        assert_eq!(parse_dimension("CREATE TABLE x (a INTEGER)"), None);
    }

    #[test]
    fn test_dimension_mismatch_detection() {
        let err = StorageError::engine(
            crate::backend::EngineKind::Native,
            "Dimension mismatch for inserted vector for the \"embedding\" column. Expected 4 dimensions but received 8.",
        );
        assert!(is_dimension_mismatch(&err));
        assert!(!is_dimension_mismatch(&StorageError::Closed));
    }
}
