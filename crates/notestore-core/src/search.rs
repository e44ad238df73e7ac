//! Hybrid search pipeline: full-text + vector + metadata, fused with
//! two-stage RRF and boosted by graph degree.
//!
//! The pipeline operates entirely through the [`SearchSource`] trait, with no
//! database dependencies. The calling application embeds the query (when a
//! model is available), builds a [`SearchRequest`], and passes its storage
//! implementation.
//!
//! # Algorithm
//!
//! 1. Fetch up to `pool_size` full-text chunk candidates (BM25).
//! 2. Multiply each by the bounded keyword boost and re-rank.
//! 3. Fetch vector candidates (distance-ranked) when a query vector exists
//!    and the source supports it; a capability gap skips this list.
//! 4. Fetch metadata (title/path) candidates.
//! 5. Collapse every list to documents, keeping each document's best rank.
//! 6. Fuse with [`fuse_two_stage`].
//! 7. Apply the bounded graph-degree boost, re-sort, truncate to `limit`.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::fusion::{compare_fused, fuse_two_stage, keyword_boost, source_ranks, FusedItem, FusionConfig};
use crate::scope::SearchScope;
use crate::text::query_terms;

/// A candidate returned by one retrieval channel.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub doc_id: String,
    pub chunk_id: Option<String>,
    pub path: String,
    pub title: Option<String>,
    /// Higher is better: negated BM25 for full-text, similarity for vectors.
    pub raw_score: f64,
    pub snippet: String,
    /// Text the keyword boosts are computed over (full-text candidates).
    pub text: String,
}

/// Storage operations the search pipeline needs.
#[async_trait]
pub trait SearchSource: Send + Sync {
    /// Full-text candidates for the query terms, best first.
    async fn fulltext_candidates(
        &self,
        terms: &[String],
        limit: usize,
        scope: &SearchScope,
    ) -> Result<Vec<Candidate>>;

    /// Nearest-neighbor candidates, closest first.
    ///
    /// Returns `Ok(None)` when the vector index is unavailable, so the
    /// pipeline can continue without the semantic list.
    async fn vector_candidates(
        &self,
        query_vec: &[f32],
        limit: usize,
        scope: &SearchScope,
    ) -> Result<Option<Vec<Candidate>>>;

    /// Title/path matches, best first.
    async fn metadata_candidates(
        &self,
        terms: &[String],
        limit: usize,
        scope: &SearchScope,
    ) -> Result<Vec<Candidate>>;

    /// Total graph degree of each document node.
    async fn document_degrees(&self, doc_ids: &[String]) -> Result<HashMap<String, i64>>;
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone)]
pub struct SearchParams {
    pub fusion: FusionConfig,
    /// Weight of the graph-degree multiplier (`0` disables it).
    pub graph_boost: f64,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            fusion: FusionConfig::default(),
            graph_boost: 0.1,
        }
    }
}

/// Bundles all inputs for a single search invocation.
#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub query: &'a str,
    /// Pre-computed query embedding, if an embedding model is configured.
    pub query_vec: Option<&'a [f32]>,
    pub scope: SearchScope,
    pub limit: usize,
    /// If true, populate [`RankExplanation`] on each hit.
    pub explain: bool,
}

/// One ranked document.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub doc_id: String,
    pub path: String,
    pub title: Option<String>,
    pub score: f64,
    pub snippet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub explain: Option<RankExplanation>,
}

/// Per-source ranks behind a hit.
#[derive(Debug, Clone, Serialize)]
pub struct RankExplanation {
    pub fulltext_rank: Option<usize>,
    pub vector_rank: Option<usize>,
    pub metadata_rank: Option<usize>,
    pub fused_score: f64,
    pub graph_degree: i64,
    pub vector_available: bool,
}

/// Run a hybrid search against a [`SearchSource`].
pub async fn hybrid_search<S: SearchSource>(
    source: &S,
    req: &SearchRequest<'_>,
    params: &SearchParams,
) -> Result<Vec<SearchHit>> {
    let terms = query_terms(req.query);
    if terms.is_empty() && req.query_vec.is_none() {
        return Ok(Vec::new());
    }
    let pool = params.fusion.pool_size.max(1);

    let mut fulltext = if terms.is_empty() {
        Vec::new()
    } else {
        source.fulltext_candidates(&terms, pool, &req.scope).await?
    };
    for c in fulltext.iter_mut() {
        c.raw_score *= keyword_boost(&c.text, &terms);
    }
    fulltext.sort_by(|a, b| {
        b.raw_score
            .partial_cmp(&a.raw_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let (vector, vector_available) = match req.query_vec {
        Some(qv) => match source.vector_candidates(qv, pool, &req.scope).await? {
            Some(list) => (list, true),
            None => (Vec::new(), false),
        },
        None => (Vec::new(), false),
    };

    let metadata = if terms.is_empty() {
        Vec::new()
    } else {
        source.metadata_candidates(&terms, pool, &req.scope).await?
    };

    let ft_docs = collapse_to_documents(&fulltext);
    let vec_docs = collapse_to_documents(&vector);
    let meta_docs = collapse_to_documents(&metadata);

    let fused = fuse_two_stage(&ft_docs, &vec_docs, &meta_docs, &params.fusion);
    if fused.is_empty() {
        return Ok(Vec::new());
    }

    let fused_ids: Vec<String> = fused.iter().map(|f| f.id.clone()).collect();
    let degrees = if params.graph_boost > 0.0 {
        source.document_degrees(&fused_ids).await?
    } else {
        HashMap::new()
    };
    let boosted = apply_graph_boost(fused, &degrees, params.graph_boost);

    // First candidate per document, in channel priority order, supplies the
    // display fields.
    let mut info: HashMap<&str, &Candidate> = HashMap::new();
    for c in fulltext.iter().chain(vector.iter()).chain(metadata.iter()) {
        info.entry(c.doc_id.as_str()).or_insert(c);
    }

    let ranks = source_ranks(&ft_docs, &vec_docs, &meta_docs);
    let mut hits = Vec::with_capacity(req.limit.min(boosted.len()));
    for (item, fused_score) in boosted.into_iter().take(req.limit) {
        let Some(cand) = info.get(item.id.as_str()) else {
            continue;
        };
        let explain = if req.explain {
            let r = ranks.get(&item.id).copied().unwrap_or_default();
            Some(RankExplanation {
                fulltext_rank: r.fulltext,
                vector_rank: r.vector,
                metadata_rank: r.metadata,
                fused_score,
                graph_degree: degrees.get(&item.id).copied().unwrap_or(0),
                vector_available,
            })
        } else {
            None
        };
        hits.push(SearchHit {
            doc_id: item.id,
            path: cand.path.clone(),
            title: cand.title.clone(),
            score: item.score,
            snippet: cand.snippet.clone(),
            explain,
        });
    }

    Ok(hits)
}

/// Reduce a ranked chunk list to a ranked document list, keeping each
/// document at its best (first) position.
pub fn collapse_to_documents(candidates: &[Candidate]) -> Vec<String> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut out = Vec::new();
    for c in candidates {
        if seen.insert(c.doc_id.as_str()) {
            out.push(c.doc_id.clone());
        }
    }
    out
}

/// Multiply fused scores by `1 + weight * degree / max_degree` and re-sort.
///
/// Returns each item paired with its pre-boost score.
pub fn apply_graph_boost(
    fused: Vec<FusedItem>,
    degrees: &HashMap<String, i64>,
    weight: f64,
) -> Vec<(FusedItem, f64)> {
    let max_degree = degrees.values().copied().max().unwrap_or(0);
    let mut out: Vec<(FusedItem, f64)> = fused
        .into_iter()
        .map(|mut item| {
            let original = item.score;
            if weight > 0.0 && max_degree > 0 {
                let d = degrees.get(&item.id).copied().unwrap_or(0).max(0);
                item.score *= 1.0 + weight * d as f64 / max_degree as f64;
            }
            (item, original)
        })
        .collect();
    out.sort_by(|a, b| compare_fused(&a.0, &b.0));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource {
        fulltext: Vec<Candidate>,
        vector: Option<Vec<Candidate>>,
        metadata: Vec<Candidate>,
        degrees: HashMap<String, i64>,
    }

    fn cand(doc: &str, score: f64, text: &str) -> Candidate {
        Candidate {
            doc_id: doc.to_string(),
            chunk_id: Some(format!("{doc}#0")),
            path: format!("notes/{doc}.md"),
            title: Some(doc.to_uppercase()),
            raw_score: score,
            snippet: text.chars().take(20).collect(),
            text: text.to_string(),
        }
    }

    #[async_trait]
    impl SearchSource for FixedSource {
        async fn fulltext_candidates(
            &self,
            _terms: &[String],
            limit: usize,
            _scope: &SearchScope,
        ) -> Result<Vec<Candidate>> {
            Ok(self.fulltext.iter().take(limit).cloned().collect())
        }

        async fn vector_candidates(
            &self,
            _query_vec: &[f32],
            limit: usize,
            _scope: &SearchScope,
        ) -> Result<Option<Vec<Candidate>>> {
            Ok(self
                .vector
                .as_ref()
                .map(|v| v.iter().take(limit).cloned().collect()))
        }

        async fn metadata_candidates(
            &self,
            _terms: &[String],
            limit: usize,
            _scope: &SearchScope,
        ) -> Result<Vec<Candidate>> {
            Ok(self.metadata.iter().take(limit).cloned().collect())
        }

        async fn document_degrees(&self, doc_ids: &[String]) -> Result<HashMap<String, i64>> {
            Ok(doc_ids
                .iter()
                .filter_map(|id| self.degrees.get(id).map(|d| (id.clone(), *d)))
                .collect())
        }
    }

    fn request<'a>(query: &'a str, vec: Option<&'a [f32]>) -> SearchRequest<'a> {
        SearchRequest {
            query,
            query_vec: vec,
            scope: SearchScope::All,
            limit: 10,
            explain: true,
        }
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let source = FixedSource {
            fulltext: vec![cand("a", 1.0, "rust")],
            vector: None,
            metadata: vec![],
            degrees: HashMap::new(),
        };
        let hits = hybrid_search(&source, &request("  ", None), &SearchParams::default())
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_chunks_collapse_to_documents() {
        let source = FixedSource {
            fulltext: vec![
                cand("a", 3.0, "rust rust"),
                cand("a", 2.0, "rust"),
                cand("b", 1.0, "rust"),
            ],
            vector: None,
            metadata: vec![],
            degrees: HashMap::new(),
        };
        let hits = hybrid_search(&source, &request("rust", None), &SearchParams::default())
            .await
            .unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_vector_gap_is_recovered() {
        let source = FixedSource {
            fulltext: vec![cand("a", 1.0, "rust")],
            vector: None,
            metadata: vec![],
            degrees: HashMap::new(),
        };
        let qv = [0.1f32, 0.2];
        let hits = hybrid_search(&source, &request("rust", Some(&qv)), &SearchParams::default())
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(!hits[0].explain.as_ref().unwrap().vector_available);
    }

    #[tokio::test]
    async fn test_keyword_boost_reorders_fulltext() {
        // "b" has a slightly lower raw score but matches both terms densely.
        let source = FixedSource {
            fulltext: vec![
                cand("a", 1.0, "rust and a great many other unrelated words here"),
                cand("b", 0.95, "rust async rust async"),
            ],
            vector: None,
            metadata: vec![],
            degrees: HashMap::new(),
        };
        let hits = hybrid_search(&source, &request("rust async", None), &SearchParams::default())
            .await
            .unwrap();
        assert_eq!(hits[0].doc_id, "b");
    }

    #[tokio::test]
    async fn test_graph_degree_breaks_equal_scores() {
        let source = FixedSource {
            fulltext: vec![cand("a", 1.0, "rust")],
            vector: Some(vec![cand("b", 0.9, "")]),
            metadata: vec![],
            degrees: HashMap::from([("b".to_string(), 5)]),
        };
        let qv = [0.1f32];
        let hits = hybrid_search(&source, &request("rust", Some(&qv)), &SearchParams::default())
            .await
            .unwrap();
        assert_eq!(hits[0].doc_id, "b");
        assert_eq!(hits[0].explain.as_ref().unwrap().graph_degree, 5);
    }

    #[test]
    fn test_graph_boost_disabled_keeps_order() {
        let fused = vec![
            FusedItem { id: "a".into(), score: 0.2, min_rank: 1 },
            FusedItem { id: "b".into(), score: 0.1, min_rank: 2 },
        ];
        let degrees = HashMap::from([("b".to_string(), 100)]);
        let out = apply_graph_boost(fused, &degrees, 0.0);
        assert_eq!(out[0].0.id, "a");
    }
}
