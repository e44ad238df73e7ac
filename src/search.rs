//! SQLite-backed retrieval channels for the hybrid search pipeline, and the
//! `nstore search` command.

use anyhow::{Context, Result};
use async_trait::async_trait;
use notestore_core::graph::document_node_id;
use notestore_core::scope::SearchScope;
use notestore_core::search::{Candidate, SearchRequest, SearchSource};
use std::collections::HashMap;

use crate::backend::Backend;
use crate::config::Config;
use crate::context::StorageContext;
use crate::graph::GraphStore;
use crate::repo::DocumentRepo;
use crate::vector::{VectorOptions, VectorStore};

/// Full-text and metadata from the document tables, nearest neighbors from
/// the vector store, degrees from the graph.
pub struct SqliteSearchSource<'a, B: Backend> {
    documents: DocumentRepo<'a, B>,
    vectors: VectorStore<'a, B>,
    graph: GraphStore<'a, B>,
}

impl<'a, B: Backend> SqliteSearchSource<'a, B> {
    pub fn new(db: &'a B, options: VectorOptions) -> Self {
        Self {
            documents: DocumentRepo::new(db),
            vectors: VectorStore::new(db, options),
            graph: GraphStore::new(db),
        }
    }
}

#[async_trait]
impl<B: Backend> SearchSource for SqliteSearchSource<'_, B> {
    async fn fulltext_candidates(
        &self,
        terms: &[String],
        limit: usize,
        scope: &SearchScope,
    ) -> Result<Vec<Candidate>> {
        self.documents
            .fulltext_search(terms, limit, scope)
            .await
            .context("full-text search failed")
    }

    async fn vector_candidates(
        &self,
        query_vec: &[f32],
        limit: usize,
        scope: &SearchScope,
    ) -> Result<Option<Vec<Candidate>>> {
        let hits = match self.vectors.search(query_vec, limit, scope).await {
            Ok(hits) => hits,
            Err(e) if e.is_capability_gap() => {
                tracing::warn!(error = %e, "vector search unavailable; continuing without it");
                return Ok(None);
            }
            Err(e) => return Err(e).context("vector search failed"),
        };

        let mut doc_ids: Vec<String> = hits.iter().map(|h| h.doc_id.clone()).collect();
        doc_ids.sort();
        doc_ids.dedup();
        let docs: HashMap<String, _> = self
            .documents
            .get_many(&doc_ids)
            .await
            .context("loading documents for vector hits")?
            .into_iter()
            .map(|d| (d.id.clone(), d))
            .collect();

        let candidates = hits
            .into_iter()
            .filter_map(|hit| {
                // Embeddings of a document removed mid-query have no metadata.
                let doc = docs.get(&hit.doc_id)?;
                Some(Candidate {
                    doc_id: hit.doc_id,
                    chunk_id: hit.chunk_id,
                    path: doc.path.clone(),
                    title: doc.title.clone(),
                    raw_score: hit.similarity,
                    snippet: doc.summary.clone().unwrap_or_default(),
                    text: String::new(),
                })
            })
            .collect();
        Ok(Some(candidates))
    }

    async fn metadata_candidates(
        &self,
        terms: &[String],
        limit: usize,
        scope: &SearchScope,
    ) -> Result<Vec<Candidate>> {
        self.documents
            .metadata_search(terms, limit, scope)
            .await
            .context("metadata search failed")
    }

    async fn document_degrees(&self, doc_ids: &[String]) -> Result<HashMap<String, i64>> {
        // Graph nodes are keyed by path; map them back to document ids.
        let by_node: HashMap<String, String> = self
            .documents
            .get_many(doc_ids)
            .await
            .context("loading documents for graph degrees")?
            .into_iter()
            .map(|d| (document_node_id(&d.path), d.id))
            .collect();
        let node_ids: Vec<String> = by_node.keys().cloned().collect();
        let degrees = self
            .graph
            .count_edges(&node_ids, None)
            .await
            .context("graph degree lookup failed")?;
        Ok(degrees
            .into_iter()
            .filter_map(|(node, d)| by_node.get(&node).map(|id| (id.clone(), d.total())))
            .collect())
    }
}

/// Options of the `nstore search` command.
#[derive(Debug, Clone, Default)]
pub struct SearchArgs {
    pub folder: Option<String>,
    pub path: Option<String>,
    pub limit: Option<usize>,
    pub explain: bool,
}

impl SearchArgs {
    fn scope(&self) -> SearchScope {
        match (&self.path, &self.folder) {
            (Some(path), _) => SearchScope::Path(path.clone()),
            (None, Some(folder)) => SearchScope::in_folder(folder),
            (None, None) => SearchScope::All,
        }
    }
}

/// Run a search from the CLI and print the ranked documents.
///
/// The CLI has no embedding model, so only the full-text and metadata
/// channels contribute.
pub async fn run_search(config: &Config, query: &str, args: &SearchArgs) -> Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }

    let ctx = StorageContext::open(config).await?;
    let req = SearchRequest {
        query,
        query_vec: None,
        scope: args.scope(),
        limit: args.limit.unwrap_or(config.search.final_limit),
        explain: args.explain,
    };
    let hits = ctx.search(&req).await;
    ctx.close().await?;
    let hits = hits?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let title_display = hit.title.as_deref().unwrap_or("(untitled)");
        println!("{}. [{:.4}] {} / {}", i + 1, hit.score, hit.path, title_display);
        if !hit.snippet.is_empty() {
            println!("    excerpt: \"{}\"", hit.snippet.replace('\n', " ").trim());
        }
        println!("    id: {}", hit.doc_id);
        if let Some(ex) = &hit.explain {
            println!(
                "    ranks: fulltext={} vector={} metadata={} graph_degree={} pre_boost={:.4}",
                rank_display(ex.fulltext_rank),
                rank_display(ex.vector_rank),
                rank_display(ex.metadata_rank),
                ex.graph_degree,
                ex.fused_score
            );
        }
        println!();
    }
    Ok(())
}

fn rank_display(rank: Option<usize>) -> String {
    rank.map(|r| r.to_string()).unwrap_or_else(|| "-".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_scope_wins_over_folder() {
        let args = SearchArgs {
            folder: Some("notes".into()),
            path: Some("notes/a.md".into()),
            ..SearchArgs::default()
        };
        assert_eq!(args.scope(), SearchScope::Path("notes/a.md".into()));
        let args = SearchArgs {
            folder: Some("/".into()),
            ..SearchArgs::default()
        };
        assert_eq!(args.scope(), SearchScope::All);
    }
}
