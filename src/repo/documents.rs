//! Documents, chunks, full-text rows and per-document statistics.
//!
//! `doc_fts` mirrors `doc_chunk` (one row per chunk, carrying the document
//! path and title) and is rewritten with the chunks inside one transaction.
//! `doc_meta_fts` is optional; when the engine could not create it,
//! metadata search falls back to `LIKE` over title and path.

use notestore_core::models::{now_ms, DocChunk, DocStatistics, DocumentMeta};
use notestore_core::scope::SearchScope;
use notestore_core::search::Candidate;
use notestore_core::text::{fts_match_expression, normalize_for_fts, word_count};
use std::sync::OnceLock;

use crate::backend::{transaction, Backend, Row, Statement, Value};
use crate::error::{StorageError, StorageResult};
use crate::repo::{bind_all, placeholders};

const DOC_COLUMNS: &str = "id, path, doc_type, title, size, ctime, mtime, content_hash, summary, \
                           tags, frontmatter_json, last_processed_at";

/// Row counts for the document tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DocumentCounts {
    pub documents: u64,
    pub chunks: u64,
}

pub struct DocumentRepo<'a, B: Backend> {
    db: &'a B,
    title_index: OnceLock<bool>,
}

fn document_from_row(row: &Row) -> StorageResult<DocumentMeta> {
    let tags_raw: String = row.get("tags")?;
    let tags: Vec<String> = serde_json::from_str(&tags_raw)
        .map_err(|e| StorageError::Decode(format!("doc_meta.tags: {e}")))?;
    Ok(DocumentMeta {
        id: row.get("id")?,
        path: row.get("path")?,
        doc_type: row.get("doc_type")?,
        title: row.get("title")?,
        size: row.get("size")?,
        ctime: row.get("ctime")?,
        mtime: row.get("mtime")?,
        content_hash: row.get::<Option<String>>("content_hash")?.unwrap_or_default(),
        summary: row.get("summary")?,
        tags,
        frontmatter_json: row.get("frontmatter_json")?,
        last_processed_at: row.get("last_processed_at")?,
    })
}

fn chunk_from_row(row: &Row) -> StorageResult<DocChunk> {
    Ok(DocChunk {
        chunk_id: row.get("chunk_id")?,
        doc_id: row.get("doc_id")?,
        chunk_index: row.get("chunk_index")?,
        title: row.get("title")?,
        mtime: row.get("mtime")?,
        content_raw: row.get("content_raw")?,
        content_fts_norm: row.get("content_fts_norm")?,
    })
}

fn statistics_from_row(row: &Row) -> StorageResult<DocStatistics> {
    Ok(DocStatistics {
        doc_id: row.get("doc_id")?,
        word_count: row.get("word_count")?,
        char_count: row.get("char_count")?,
        open_count: row.get("open_count")?,
        last_open_ts: row.get("last_open_ts")?,
        updated_at: row.get("updated_at")?,
    })
}

/// ` AND ...` restricting the `doc_meta` alias `d` to `scope`.
pub(crate) fn scope_filter(scope: &SearchScope) -> (String, Vec<Value>) {
    match scope {
        SearchScope::All => (String::new(), Vec::new()),
        SearchScope::Path(path) => (" AND d.path = ?".into(), vec![path.as_str().into()]),
        SearchScope::Folder(folder) => (
            " AND substr(d.path, 1, length(?)) = ?".into(),
            {
                let prefix = SearchScope::folder_prefix(folder);
                vec![prefix.as_str().into(), prefix.into()]
            },
        ),
        SearchScope::AllowIds(ids) if ids.is_empty() => (" AND 0".into(), Vec::new()),
        SearchScope::AllowIds(ids) => (
            format!(" AND d.id IN ({})", placeholders(ids.len())),
            ids.iter().map(|id| id.as_str().into()).collect(),
        ),
        SearchScope::DenyIds(ids) if ids.is_empty() => (String::new(), Vec::new()),
        SearchScope::DenyIds(ids) => (
            format!(" AND d.id NOT IN ({})", placeholders(ids.len())),
            ids.iter().map(|id| id.as_str().into()).collect(),
        ),
    }
}

fn with_params(mut stmt: Statement, params: Vec<Value>) -> Statement {
    stmt.params.extend(params);
    stmt
}

impl<'a, B: Backend> DocumentRepo<'a, B> {
    pub fn new(db: &'a B) -> Self {
        Self {
            db,
            title_index: OnceLock::new(),
        }
    }

    /// Whether the optional title/path full-text table exists.
    pub async fn has_title_index(&self) -> StorageResult<bool> {
        if let Some(v) = self.title_index.get() {
            return Ok(*v);
        }
        let exists = title_index_exists(self.db).await?;
        Ok(*self.title_index.get_or_init(|| exists))
    }

    // ---- documents ----

    /// Insert or update a document by id. Paths stay unique: writing a path
    /// already owned by another id fails with the engine's constraint error.
    pub async fn upsert(&self, doc: &DocumentMeta) -> StorageResult<()> {
        let title_index = self.has_title_index().await?;
        transaction(self.db, |db| {
            Box::pin(async move { upsert_document(db, doc, title_index).await })
        })
        .await
    }

    pub async fn upsert_many(&self, docs: &[DocumentMeta]) -> StorageResult<()> {
        if docs.is_empty() {
            return Ok(());
        }
        let title_index = self.has_title_index().await?;
        transaction(self.db, |db| {
            Box::pin(async move {
                for doc in docs {
                    upsert_document(db, doc, title_index).await?;
                }
                Ok(())
            })
        })
        .await
    }

    pub async fn get(&self, id: &str) -> StorageResult<Option<DocumentMeta>> {
        let sql = format!("SELECT {DOC_COLUMNS} FROM doc_meta WHERE id = ?");
        let row = self.db.get(&Statement::new(sql).bind(id)).await?;
        row.as_ref().map(document_from_row).transpose()
    }

    pub async fn get_by_path(&self, path: &str) -> StorageResult<Option<DocumentMeta>> {
        let sql = format!("SELECT {DOC_COLUMNS} FROM doc_meta WHERE path = ?");
        let row = self.db.get(&Statement::new(sql).bind(path)).await?;
        row.as_ref().map(document_from_row).transpose()
    }

    pub async fn get_many(&self, ids: &[String]) -> StorageResult<Vec<DocumentMeta>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {DOC_COLUMNS} FROM doc_meta WHERE id IN ({}) ORDER BY path",
            placeholders(ids.len())
        );
        let rows = self.db.all(&bind_all(Statement::new(sql), ids)).await?;
        rows.iter().map(document_from_row).collect()
    }

    /// Documents under `scope`, most recently modified first.
    pub async fn list(&self, scope: &SearchScope, limit: Option<usize>) -> StorageResult<Vec<DocumentMeta>> {
        let (filter, params) = scope_filter(scope);
        let mut sql = format!(
            "SELECT {DOC_COLUMNS} FROM doc_meta d WHERE 1 = 1{filter} ORDER BY d.mtime DESC, d.path"
        );
        let mut stmt_params = params;
        if let Some(n) = limit {
            sql.push_str(" LIMIT ?");
            stmt_params.push(n.into());
        }
        let rows = self.db.all(&with_params(Statement::new(sql), stmt_params)).await?;
        rows.iter().map(document_from_row).collect()
    }

    pub async fn list_in_folder(&self, folder: &str) -> StorageResult<Vec<DocumentMeta>> {
        self.list(&SearchScope::in_folder(folder), None).await
    }

    /// Ids of every document under `scope`.
    pub async fn ids_in_scope(&self, scope: &SearchScope) -> StorageResult<Vec<String>> {
        let (filter, params) = scope_filter(scope);
        let sql = format!("SELECT d.id FROM doc_meta d WHERE 1 = 1{filter} ORDER BY d.id");
        let rows = self.db.all(&with_params(Statement::new(sql), params)).await?;
        rows.iter().map(|r| r.get_idx(0)).collect()
    }

    /// Delete documents with their chunks, full-text rows and statistics.
    /// Returns the number of documents removed.
    pub async fn delete_many(&self, ids: &[String]) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let title_index = self.has_title_index().await?;
        transaction(self.db, |db| {
            Box::pin(async move {
                let p = placeholders(ids.len());
                delete_chunk_rows(db, ids).await?;
                db.run(&bind_all(
                    Statement::new(format!("DELETE FROM doc_statistics WHERE doc_id IN ({p})")),
                    ids,
                ))
                .await?;
                if title_index {
                    db.run(&bind_all(
                        Statement::new(format!("DELETE FROM doc_meta_fts WHERE doc_id IN ({p})")),
                        ids,
                    ))
                    .await?;
                }
                let res = db
                    .run(&bind_all(
                        Statement::new(format!("DELETE FROM doc_meta WHERE id IN ({p})")),
                        ids,
                    ))
                    .await?;
                Ok(res.changes)
            })
        })
        .await
    }

    pub async fn delete(&self, id: &str) -> StorageResult<bool> {
        Ok(self.delete_many(&[id.to_string()]).await? > 0)
    }

    /// Stamp `last_processed_at` after the indexer finishes a document.
    pub async fn mark_processed(&self, id: &str, at: i64) -> StorageResult<bool> {
        let res = self
            .db
            .run(
                &Statement::new("UPDATE doc_meta SET last_processed_at = ? WHERE id = ?")
                    .bind(at)
                    .bind(id),
            )
            .await?;
        Ok(res.changes > 0)
    }

    // ---- chunks ----

    /// Replace every chunk of `doc_id` and its full-text rows.
    ///
    /// Each chunk's `doc_id` is overwritten with `doc_id`; an empty
    /// `content_fts_norm` is derived from `content_raw`.
    pub async fn replace_chunks(&self, doc_id: &str, chunks: &[DocChunk]) -> StorageResult<usize> {
        let doc = self
            .get(doc_id)
            .await?
            .ok_or_else(|| StorageError::Decode(format!("no document with id '{doc_id}'")))?;
        transaction(self.db, |db| {
            Box::pin(async move {
                let ids = [doc_id.to_string()];
                delete_chunk_rows(db, &ids).await?;

                let mut insert_chunk = db.prepare(
                    "INSERT INTO doc_chunk (chunk_id, doc_id, chunk_index, title, mtime, content_raw, content_fts_norm) \
                     VALUES (?, ?, ?, ?, ?, ?, ?)",
                );
                let mut insert_fts = db.prepare(
                    "INSERT INTO doc_fts (chunk_id, doc_id, path, title, content) VALUES (?, ?, ?, ?, ?)",
                );
                for chunk in chunks {
                    let norm = if chunk.content_fts_norm.is_empty() {
                        normalize_for_fts(&chunk.content_raw)
                    } else {
                        chunk.content_fts_norm.clone()
                    };
                    insert_chunk
                        .reset()
                        .bind(chunk.chunk_id.as_str())
                        .bind(doc_id)
                        .bind(chunk.chunk_index)
                        .bind(chunk.title.as_deref())
                        .bind(chunk.mtime)
                        .bind(chunk.content_raw.as_str())
                        .bind(norm.as_str())
                        .run()
                        .await?;
                    insert_fts
                        .reset()
                        .bind(chunk.chunk_id.as_str())
                        .bind(doc_id)
                        .bind(doc.path.as_str())
                        .bind(chunk.title.as_deref().or(doc.title.as_deref()))
                        .bind(norm)
                        .run()
                        .await?;
                }
                Ok(chunks.len())
            })
        })
        .await
    }

    pub async fn chunks_for_doc(&self, doc_id: &str) -> StorageResult<Vec<DocChunk>> {
        let rows = self
            .db
            .all(
                &Statement::new(
                    "SELECT chunk_id, doc_id, chunk_index, title, mtime, content_raw, content_fts_norm \
                     FROM doc_chunk WHERE doc_id = ? ORDER BY chunk_index",
                )
                .bind(doc_id),
            )
            .await?;
        rows.iter().map(chunk_from_row).collect()
    }

    pub async fn delete_chunks_for_docs(&self, doc_ids: &[String]) -> StorageResult<u64> {
        if doc_ids.is_empty() {
            return Ok(0);
        }
        transaction(self.db, |db| Box::pin(async move { delete_chunk_rows(db, doc_ids).await })).await
    }

    // ---- search ----

    /// BM25-ranked chunk matches for `terms` under `scope`, best first.
    pub async fn fulltext_search(
        &self,
        terms: &[String],
        limit: usize,
        scope: &SearchScope,
    ) -> StorageResult<Vec<Candidate>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let (filter, params) = scope_filter(scope);
        let sql = format!(
            r#"
            SELECT doc_fts.chunk_id AS chunk_id, doc_fts.doc_id AS doc_id, d.path AS path,
                   d.title AS title, bm25(doc_fts) AS bm25_score,
                   snippet(doc_fts, 4, '[', ']', '...', 12) AS snippet,
                   c.content_raw AS text
            FROM doc_fts
            JOIN doc_meta d ON d.id = doc_fts.doc_id
            JOIN doc_chunk c ON c.chunk_id = doc_fts.chunk_id
            WHERE doc_fts MATCH ?{filter}
            ORDER BY bm25_score
            LIMIT ?
            "#
        );
        let mut stmt = Statement::new(sql).bind(fts_match_expression(terms));
        stmt.params.extend(params);
        let rows = self.db.all(&stmt.bind(limit)).await?;
        rows.iter()
            .map(|row| {
                Ok(Candidate {
                    doc_id: row.get("doc_id")?,
                    chunk_id: row.get("chunk_id")?,
                    path: row.get("path")?,
                    title: row.get("title")?,
                    raw_score: -row.get::<f64>("bm25_score")?,
                    snippet: row.get("snippet")?,
                    text: row.get("text")?,
                })
            })
            .collect()
    }

    /// Title/path matches under `scope`, best first.
    pub async fn metadata_search(
        &self,
        terms: &[String],
        limit: usize,
        scope: &SearchScope,
    ) -> StorageResult<Vec<Candidate>> {
        if terms.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let (filter, params) = scope_filter(scope);
        let stmt = if self.has_title_index().await? {
            let sql = format!(
                r#"
                SELECT d.id AS doc_id, d.path AS path, d.title AS title,
                       -bm25(doc_meta_fts) AS score
                FROM doc_meta_fts
                JOIN doc_meta d ON d.id = doc_meta_fts.doc_id
                WHERE doc_meta_fts MATCH ?{filter}
                ORDER BY score DESC, d.path
                LIMIT ?
                "#
            );
            with_params(Statement::new(sql).bind(fts_match_expression(terms)), params).bind(limit)
        } else {
            let matched: Vec<String> = terms
                .iter()
                .map(|_| "(CASE WHEN lower(COALESCE(d.title, '')) LIKE ? ESCAPE '\\' OR lower(d.path) LIKE ? ESCAPE '\\' THEN 1 ELSE 0 END)".to_string())
                .collect();
            let score = matched.join(" + ");
            let sql = format!(
                "SELECT * FROM (SELECT d.id AS doc_id, d.path AS path, d.title AS title, ({score}) AS score \
                 FROM doc_meta d WHERE 1 = 1{filter}) WHERE score > 0 ORDER BY score DESC, path LIMIT ?"
            );
            let mut stmt = Statement::new(sql);
            for term in terms {
                let pattern = format!("%{}%", notestore_core::scope::escape_like(term));
                stmt = stmt.bind(pattern.as_str()).bind(pattern);
            }
            with_params(stmt, params).bind(limit)
        };

        let rows = self.db.all(&stmt).await?;
        rows.iter()
            .map(|row| {
                let title: Option<String> = row.get("title")?;
                let path: String = row.get("path")?;
                Ok(Candidate {
                    doc_id: row.get("doc_id")?,
                    chunk_id: None,
                    snippet: title.clone().unwrap_or_else(|| path.clone()),
                    path,
                    title,
                    raw_score: row.get("score")?,
                    text: String::new(),
                })
            })
            .collect()
    }

    // ---- statistics ----

    /// Recompute word/char counts from `text`, keeping open counters.
    pub async fn update_statistics(&self, doc_id: &str, text: &str) -> StorageResult<DocStatistics> {
        self.db
            .run(
                &Statement::new(
                    r#"
                    INSERT INTO doc_statistics (doc_id, word_count, char_count, open_count, updated_at)
                    VALUES (?, ?, ?, 0, ?)
                    ON CONFLICT(doc_id) DO UPDATE SET
                        word_count = excluded.word_count,
                        char_count = excluded.char_count,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(doc_id)
                .bind(word_count(text))
                .bind(text.chars().count())
                .bind(now_ms()),
            )
            .await?;
        self.statistics(doc_id)
            .await?
            .ok_or_else(|| StorageError::Decode(format!("statistics for '{doc_id}' vanished")))
    }

    /// Count one open of `doc_id`.
    pub async fn record_open(&self, doc_id: &str) -> StorageResult<()> {
        let now = now_ms();
        self.db
            .run(
                &Statement::new(
                    r#"
                    INSERT INTO doc_statistics (doc_id, open_count, last_open_ts, updated_at)
                    VALUES (?, 1, ?, ?)
                    ON CONFLICT(doc_id) DO UPDATE SET
                        open_count = open_count + 1,
                        last_open_ts = excluded.last_open_ts,
                        updated_at = excluded.updated_at
                    "#,
                )
                .bind(doc_id)
                .bind(now)
                .bind(now),
            )
            .await?;
        Ok(())
    }

    pub async fn statistics(&self, doc_id: &str) -> StorageResult<Option<DocStatistics>> {
        let row = self
            .db
            .get(
                &Statement::new(
                    "SELECT doc_id, word_count, char_count, open_count, last_open_ts, updated_at \
                     FROM doc_statistics WHERE doc_id = ?",
                )
                .bind(doc_id),
            )
            .await?;
        row.as_ref().map(statistics_from_row).transpose()
    }

    /// Most opened documents first.
    pub async fn most_opened(&self, limit: usize) -> StorageResult<Vec<DocStatistics>> {
        let rows = self
            .db
            .all(
                &Statement::new(
                    "SELECT doc_id, word_count, char_count, open_count, last_open_ts, updated_at \
                     FROM doc_statistics WHERE open_count > 0 \
                     ORDER BY open_count DESC, last_open_ts DESC LIMIT ?",
                )
                .bind(limit),
            )
            .await?;
        rows.iter().map(statistics_from_row).collect()
    }

    pub async fn counts(&self) -> StorageResult<DocumentCounts> {
        let row = self
            .db
            .get(&Statement::new(
                "SELECT (SELECT COUNT(*) FROM doc_meta) AS documents, (SELECT COUNT(*) FROM doc_chunk) AS chunks",
            ))
            .await?;
        match row {
            Some(r) => Ok(DocumentCounts {
                documents: r.get::<i64>("documents")? as u64,
                chunks: r.get::<i64>("chunks")? as u64,
            }),
            None => Ok(DocumentCounts::default()),
        }
    }
}

async fn title_index_exists<B: Backend>(db: &B) -> StorageResult<bool> {
    let row = db
        .get(&Statement::new(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'doc_meta_fts'",
        ))
        .await?;
    Ok(row.is_some())
}

async fn upsert_document<B: Backend>(db: &B, doc: &DocumentMeta, title_index: bool) -> StorageResult<()> {
    let tags = serde_json::to_string(&doc.tags)
        .map_err(|e| StorageError::Decode(format!("doc_meta.tags: {e}")))?;
    db.run(
        &Statement::new(
            r#"
            INSERT INTO doc_meta (id, path, doc_type, title, size, ctime, mtime, content_hash,
                                  summary, tags, frontmatter_json, last_processed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                path = excluded.path,
                doc_type = excluded.doc_type,
                title = excluded.title,
                size = excluded.size,
                ctime = excluded.ctime,
                mtime = excluded.mtime,
                content_hash = excluded.content_hash,
                summary = excluded.summary,
                tags = excluded.tags,
                frontmatter_json = excluded.frontmatter_json,
                last_processed_at = COALESCE(excluded.last_processed_at, doc_meta.last_processed_at)
            "#,
        )
        .bind(doc.id.as_str())
        .bind(doc.path.as_str())
        .bind(doc.doc_type.as_str())
        .bind(doc.title.as_deref())
        .bind(doc.size)
        .bind(doc.ctime)
        .bind(doc.mtime)
        .bind(doc.content_hash.as_str())
        .bind(doc.summary.as_deref())
        .bind(tags)
        .bind(doc.frontmatter_json.as_deref())
        .bind(doc.last_processed_at),
    )
    .await?;

    // Full-text rows carry path and title; keep them in step with a rename.
    db.run(
        &Statement::new("UPDATE doc_fts SET path = ? WHERE doc_id = ? AND path != ?")
            .bind(doc.path.as_str())
            .bind(doc.id.as_str())
            .bind(doc.path.as_str()),
    )
    .await?;

    if title_index {
        db.run(&Statement::new("DELETE FROM doc_meta_fts WHERE doc_id = ?").bind(doc.id.as_str()))
            .await?;
        db.run(
            &Statement::new("INSERT INTO doc_meta_fts (doc_id, path, title) VALUES (?, ?, ?)")
                .bind(doc.id.as_str())
                .bind(doc.path.as_str())
                .bind(doc.title.as_deref().unwrap_or_default()),
        )
        .await?;
    }
    Ok(())
}

async fn delete_chunk_rows<B: Backend>(db: &B, doc_ids: &[String]) -> StorageResult<u64> {
    let p = placeholders(doc_ids.len());
    db.run(&bind_all(
        Statement::new(format!("DELETE FROM doc_fts WHERE doc_id IN ({p})")),
        doc_ids,
    ))
    .await?;
    let res = db
        .run(&bind_all(
            Statement::new(format!("DELETE FROM doc_chunk WHERE doc_id IN ({p})")),
            doc_ids,
        ))
        .await?;
    Ok(res.changes)
}
