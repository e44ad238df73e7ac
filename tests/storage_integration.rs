use notestore::backend::selector::{BackendPreference, PortableEngine};
use notestore::backend::{transaction, Backend, EngineKind, Statement};
use notestore::config::Config;
use notestore::error::StorageError;
use notestore::vector::{VectorOptions, VectorStore, INDEX_TABLE};
use notestore::StorageContext;
use notestore_core::embedding::encode_vector;
use notestore_core::graph::{
    document_node_id, edge_id, tag_node_id, EDGE_LINK, EDGE_TAGGED, NODE_DOCUMENT, NODE_TAG,
};
use notestore_core::models::{DocChunk, DocumentMeta, EmbeddingInput, GraphEdge, GraphNode};
use notestore_core::scope::SearchScope;
use notestore_core::search::SearchRequest;
use tempfile::TempDir;

async fn open(tmp: &TempDir) -> StorageContext {
    StorageContext::open(&Config::for_folder(tmp.path().join("store")))
        .await
        .unwrap()
}

fn doc(id: &str, path: &str, title: &str) -> DocumentMeta {
    DocumentMeta {
        id: id.into(),
        path: path.into(),
        doc_type: "markdown".into(),
        title: Some(title.into()),
        size: 100,
        ctime: 1,
        mtime: 2,
        content_hash: format!("h{id}"),
        summary: None,
        tags: Vec::new(),
        frontmatter_json: None,
        last_processed_at: None,
    }
}

fn chunk(doc_id: &str, index: i64, text: &str) -> DocChunk {
    DocChunk {
        chunk_id: format!("{doc_id}#{index}"),
        doc_id: doc_id.into(),
        chunk_index: index,
        title: None,
        mtime: 2,
        content_raw: text.into(),
        content_fts_norm: String::new(),
    }
}

fn embedding(doc_id: &str, index: i64, vector: Vec<f32>) -> EmbeddingInput {
    EmbeddingInput {
        id: format!("{doc_id}#{index}"),
        doc_id: doc_id.into(),
        chunk_id: Some(format!("{doc_id}#{index}")),
        chunk_index: Some(index),
        content_hash: format!("h{doc_id}{index}"),
        model: "test-model".into(),
        vector,
    }
}

fn node(id: &str, node_type: &str) -> GraphNode {
    GraphNode {
        id: id.into(),
        node_type: node_type.into(),
        label: id.into(),
        attributes: serde_json::json!({}),
        created_at: 0,
        updated_at: 0,
    }
}

fn edge(from: &str, to: &str, edge_type: &str) -> GraphEdge {
    GraphEdge {
        id: String::new(),
        from_node_id: from.into(),
        to_node_id: to.into(),
        edge_type: edge_type.into(),
        weight: 1.0,
        attributes: serde_json::json!({}),
        created_at: 0,
        updated_at: 0,
    }
}

/// Three notes: 1 and 2 under `notes/`, 3 under `archive/`. Document 3's
/// vector is closer to document 2's than document 1's is.
async fn seed_three(ctx: &StorageContext) {
    let docs = ctx.documents();
    docs.upsert(&doc("1", "notes/one.md", "One")).await.unwrap();
    docs.upsert(&doc("2", "notes/two.md", "Two")).await.unwrap();
    docs.upsert(&doc("3", "archive/three.md", "Three")).await.unwrap();
    ctx.vectors()
        .upsert_many(&[
            embedding("1", 0, vec![1.0, 0.0, 0.0, 0.0]),
            embedding("2", 0, vec![0.0, 1.0, 0.0, 0.0]),
            embedding("3", 0, vec![0.0, 0.9, 0.1, 0.0]),
        ])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_folder_scoped_knn_never_leaks_other_folders() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    seed_three(&ctx).await;

    let query = vec![0.0f32, 1.0, 0.0, 0.0];
    let hits = ctx
        .vectors()
        .search(&query, 3, &SearchScope::in_folder("notes"))
        .await
        .unwrap();
    let docs: Vec<&str> = hits.iter().map(|h| h.doc_id.as_str()).collect();
    assert_eq!(docs, vec!["2", "1"]);
    assert!(hits[0].similarity >= hits[1].similarity);

    // Unscoped, document 3 ranks between them.
    let all = ctx.vectors().search(&query, 3, &SearchScope::All).await.unwrap();
    let docs: Vec<&str> = all.iter().map(|h| h.doc_id.as_str()).collect();
    assert_eq!(docs, vec!["2", "3", "1"]);
    ctx.close().await.unwrap();
}

/// `notes/` and `Notes/` are different folders.
async fn seed_case_siblings(ctx: &StorageContext) {
    let docs = ctx.documents();
    docs.upsert(&doc("1", "notes/a.md", "Lower")).await.unwrap();
    docs.upsert(&doc("2", "Notes/b.md", "Upper")).await.unwrap();
    docs.replace_chunks("1", &[chunk("1", 0, "garden tomatoes")]).await.unwrap();
    docs.replace_chunks("2", &[chunk("2", 0, "garden tomatoes")]).await.unwrap();
    ctx.vectors()
        .upsert_many(&[
            embedding("1", 0, vec![1.0, 0.0, 0.0, 0.0]),
            embedding("2", 0, vec![0.0, 1.0, 0.0, 0.0]),
        ])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_folder_scope_is_case_sensitive_for_knn() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    seed_case_siblings(&ctx).await;
    let scope = SearchScope::in_folder("notes");
    let query = [0.0f32, 1.0, 0.0, 0.0];

    let hits = ctx.vectors().search(&query, 5, &scope).await.unwrap();
    let docs: Vec<&str> = hits.iter().map(|h| h.doc_id.as_str()).collect();
    assert_eq!(docs, vec!["1"]);

    // Same result when the scope is too large to inline.
    let store = VectorStore::new(
        ctx.search_db(),
        VectorOptions {
            max_scope_rows: 0,
            scope_oversample: 4,
        },
    );
    let hits = store.search(&query, 5, &scope).await.unwrap();
    let docs: Vec<&str> = hits.iter().map(|h| h.doc_id.as_str()).collect();
    assert_eq!(docs, vec!["1"]);
    ctx.close().await.unwrap();
}

#[tokio::test]
async fn test_folder_scope_is_case_sensitive_for_text() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    seed_case_siblings(&ctx).await;
    let docs = ctx.documents();
    let scope = SearchScope::in_folder("notes");
    let terms = vec!["tomatoes".to_string()];

    let hits = docs.fulltext_search(&terms, 10, &scope).await.unwrap();
    let ids: Vec<&str> = hits.iter().map(|c| c.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["1"]);

    let listed: Vec<String> = docs.list_in_folder("notes").await.unwrap().into_iter().map(|d| d.id).collect();
    assert_eq!(listed, vec!["1"]);
    let upper: Vec<String> = docs.ids_in_scope(&SearchScope::in_folder("Notes")).await.unwrap();
    assert_eq!(upper, vec!["2"]);
    ctx.close().await.unwrap();
}

#[tokio::test]
async fn test_large_scope_post_filters() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    seed_three(&ctx).await;

    let store = VectorStore::new(
        ctx.search_db(),
        VectorOptions {
            max_scope_rows: 1,
            scope_oversample: 4,
        },
    );
    let hits = store
        .search(&[0.0, 1.0, 0.0, 0.0], 3, &SearchScope::in_folder("notes"))
        .await
        .unwrap();
    let docs: Vec<&str> = hits.iter().map(|h| h.doc_id.as_str()).collect();
    assert_eq!(docs, vec!["2", "1"]);
}

#[tokio::test]
async fn test_row_ids_stay_aligned_across_updates() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    seed_three(&ctx).await;
    let vectors = ctx.vectors();

    let before = vectors.row_id("1#0").await.unwrap().unwrap();
    let after = vectors.upsert(&embedding("1", 0, vec![0.0, 0.0, 0.0, 1.0])).await.unwrap();
    assert_eq!(before, after);

    let counts = vectors.counts().await.unwrap();
    assert_eq!(counts.rows, 3);
    assert_eq!(counts.indexed, 3);

    let hits = vectors
        .search(&[0.0, 0.0, 0.0, 1.0], 1, &SearchScope::All)
        .await
        .unwrap();
    assert_eq!(hits[0].row_id, after);
    assert_eq!(hits[0].id, "1#0");
}

#[tokio::test]
async fn test_dimension_change_recreates_index_once() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    ctx.documents().upsert(&doc("1", "a.md", "A")).await.unwrap();
    ctx.documents().upsert(&doc("2", "b.md", "B")).await.unwrap();
    let vectors = ctx.vectors();

    vectors.upsert(&embedding("1", 0, vec![1.0, 0.0, 0.0, 0.0])).await.unwrap();
    assert_eq!(vectors.index_dimension().await.unwrap(), Some(4));
    assert_eq!(vectors.recreation_count().await.unwrap(), 0);

    vectors.upsert(&embedding("2", 0, vec![0.0, 1.0, 0.0])).await.unwrap();
    assert_eq!(vectors.index_dimension().await.unwrap(), Some(3));
    assert_eq!(vectors.recreation_count().await.unwrap(), 1);

    // Relational rows of the old width survive; only the ANN side was reset.
    assert!(vectors.get("1#0").await.unwrap().is_some());
    let counts = vectors.counts().await.unwrap();
    assert_eq!((counts.rows, counts.indexed), (2, 1));
    assert_eq!(ctx.documents().counts().await.unwrap().documents, 2);

    let hits = vectors.search(&[0.0, 1.0, 0.0], 5, &SearchScope::All).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].doc_id, "2");

    // A query of the old width finds nothing instead of failing.
    assert!(vectors
        .search(&[1.0, 0.0, 0.0, 0.0], 5, &SearchScope::All)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_orphan_cleanup() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    seed_three(&ctx).await;

    ctx.search_db()
        .run(
            &Statement::new(format!("INSERT INTO {INDEX_TABLE} (rowid, embedding) VALUES (?, ?)"))
                .bind(9_999i64)
                .bind(encode_vector(&[0.5, 0.5, 0.5, 0.5])),
        )
        .await
        .unwrap();

    let cleanup = ctx.vectors().cleanup_orphans().await.unwrap();
    assert_eq!(cleanup.found, 1);
    assert_eq!(cleanup.deleted, 1);
    assert_eq!(ctx.vectors().cleanup_orphans().await.unwrap().found, 0);
    assert_eq!(ctx.vectors().counts().await.unwrap().indexed, 3);
}

#[tokio::test]
async fn test_missing_index_table_is_restored_on_reopen() {
    let tmp = TempDir::new().unwrap();
    {
        let ctx = open(&tmp).await;
        seed_three(&ctx).await;
        ctx.search_db()
            .exec(&format!("DROP TABLE {INDEX_TABLE}"))
            .await
            .unwrap();
        let err = ctx
            .vectors()
            .search(&[1.0, 0.0, 0.0, 0.0], 1, &SearchScope::All)
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::VectorIndexTableMissing(_)));
        ctx.close().await.unwrap();
    }

    let ctx = open(&tmp).await;
    assert_eq!(ctx.migration_reports().0.vector_index_restored, Some(4));
    let hits = ctx
        .vectors()
        .search(&[1.0, 0.0, 0.0, 0.0], 1, &SearchScope::All)
        .await
        .unwrap();
    assert_eq!(hits[0].doc_id, "1");
}

#[tokio::test]
async fn test_average_embedding_and_similarity() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    ctx.documents().upsert(&doc("1", "a.md", "A")).await.unwrap();
    ctx.documents().upsert(&doc("2", "b.md", "B")).await.unwrap();
    let vectors = ctx.vectors();
    vectors
        .upsert_many(&[
            embedding("1", 0, vec![1.0, 0.0]),
            embedding("1", 1, vec![0.0, 1.0]),
            embedding("2", 0, vec![1.0, 1.0]),
        ])
        .await
        .unwrap();

    assert_eq!(vectors.average_embedding("1").await.unwrap(), Some(vec![0.5, 0.5]));
    assert_eq!(vectors.average_embedding("missing").await.unwrap(), None);
    let sim = vectors.document_similarity("1", "2").await.unwrap().unwrap();
    assert!((sim - 1.0).abs() < 1e-5);
}

#[tokio::test]
async fn test_graph_degrees_and_orphans() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    let graph = ctx.graph();
    graph
        .upsert_nodes(&[
            node("A", NODE_DOCUMENT),
            node("B", NODE_DOCUMENT),
            node("C", NODE_TAG),
            node("D", NODE_DOCUMENT),
        ])
        .await
        .unwrap();
    graph.upsert_edge(&edge("A", "B", EDGE_LINK)).await.unwrap();
    graph.upsert_edge(&edge("A", "C", EDGE_TAGGED)).await.unwrap();
    // Re-deriving the same relationship overwrites it.
    graph.upsert_edge(&edge("A", "B", EDGE_LINK)).await.unwrap();

    let degrees = graph.count_edges(&["A".to_string()], None).await.unwrap();
    assert_eq!(degrees["A"].outgoing, 2);
    assert_eq!(degrees["A"].incoming, 0);

    let orphans: Vec<String> = graph.hard_orphans(None).await.unwrap().into_iter().map(|n| n.id).collect();
    assert_eq!(orphans, vec!["D"]);
    assert_eq!(graph.counts().await.unwrap(), (4, 2));
    assert!(graph.get_edge(&edge_id("A", "B", EDGE_LINK)).await.unwrap().is_some());
}

#[tokio::test]
async fn test_hybrid_search_end_to_end() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    seed_three(&ctx).await;
    let docs = ctx.documents();
    docs.replace_chunks("1", &[chunk("1", 0, "ownership and borrowing in rust")])
        .await
        .unwrap();
    docs.replace_chunks("2", &[chunk("2", 0, "the borrow checker enforces rules")])
        .await
        .unwrap();
    docs.replace_chunks("3", &[chunk("3", 0, "borrow checker archive notes")])
        .await
        .unwrap();
    ctx.graph()
        .upsert_nodes(&[
            node(&document_node_id("notes/two.md"), NODE_DOCUMENT),
            node(&tag_node_id("#rust"), NODE_TAG),
        ])
        .await
        .unwrap();
    ctx.graph()
        .upsert_edge(&edge("notes/two.md", &tag_node_id("rust"), EDGE_TAGGED))
        .await
        .unwrap();

    let query_vec = [0.0f32, 1.0, 0.0, 0.0];
    let hits = ctx
        .search(&SearchRequest {
            query: "borrow checker",
            query_vec: Some(&query_vec),
            scope: SearchScope::in_folder("notes"),
            limit: 10,
            explain: true,
        })
        .await
        .unwrap();

    // Document 1 only comes from the vector list; document 3 is out of scope.
    let ids: Vec<&str> = hits.iter().map(|h| h.doc_id.as_str()).collect();
    assert_eq!(ids, vec!["2", "1"]);
    let explain = hits[0].explain.as_ref().unwrap();
    assert_eq!(explain.fulltext_rank, Some(1));
    assert_eq!(explain.vector_rank, Some(1));
    assert!(explain.vector_available);
    assert_eq!(explain.graph_degree, 1);
}

#[tokio::test]
async fn test_remove_documents_clears_derived_rows() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    seed_three(&ctx).await;
    ctx.documents()
        .replace_chunks("1", &[chunk("1", 0, "text")])
        .await
        .unwrap();
    ctx.documents().record_open("1").await.unwrap();
    ctx.graph()
        .upsert_nodes(&[node("notes/one.md", NODE_DOCUMENT), node("notes/two.md", NODE_DOCUMENT)])
        .await
        .unwrap();
    ctx.graph()
        .upsert_edge(&edge("notes/one.md", "notes/two.md", EDGE_LINK))
        .await
        .unwrap();

    let report = ctx.remove_documents(&["1".to_string()]).await.unwrap();
    assert_eq!(report.documents, 1);
    assert_eq!(report.embeddings, 1);
    assert_eq!(report.graph_nodes, 1);

    assert!(ctx.documents().get("1").await.unwrap().is_none());
    assert!(ctx.documents().chunks_for_doc("1").await.unwrap().is_empty());
    assert!(ctx.documents().statistics("1").await.unwrap().is_none());
    assert!(ctx.vectors().get_for_doc("1").await.unwrap().is_empty());
    assert_eq!(ctx.vectors().counts().await.unwrap().indexed, 2);
    assert!(ctx.graph().get_node("notes/one.md").await.unwrap().is_none());
    assert!(ctx.graph().get_node("notes/two.md").await.unwrap().is_some());
    assert!(ctx.graph().edges_from("notes/one.md", None).await.unwrap().is_empty());
    assert!(ctx.graph().edges_to("notes/two.md", None).await.unwrap().is_empty());
    assert_eq!(ctx.vectors().cleanup_orphans().await.unwrap().found, 0);
}

#[tokio::test]
async fn test_document_nodes_are_keyed_by_path() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    let docs = ctx.documents();
    docs.upsert(&doc("1", "notes/a.md", "A")).await.unwrap();
    docs.upsert(&doc("2", "notes/b.md", "B")).await.unwrap();
    docs.replace_chunks("1", &[chunk("1", 0, "compost notes")]).await.unwrap();
    ctx.graph()
        .upsert_nodes(&[node("notes/a.md", NODE_DOCUMENT), node("notes/b.md", NODE_DOCUMENT)])
        .await
        .unwrap();
    ctx.graph()
        .upsert_edge(&edge("notes/a.md", "notes/b.md", EDGE_LINK))
        .await
        .unwrap();

    // The degree boost finds the path-keyed node for document 1.
    let hits = ctx
        .search(&SearchRequest {
            query: "compost",
            query_vec: None,
            scope: SearchScope::All,
            limit: 5,
            explain: true,
        })
        .await
        .unwrap();
    assert_eq!(hits[0].doc_id, "1");
    assert_eq!(hits[0].explain.as_ref().unwrap().graph_degree, 1);

    let report = ctx.remove_documents(&["1".to_string()]).await.unwrap();
    assert_eq!(report.documents, 1);
    assert_eq!(report.graph_nodes, 1);
    assert!(ctx.graph().get_node("notes/a.md").await.unwrap().is_none());
    assert!(ctx.graph().edges_to("notes/b.md", None).await.unwrap().is_empty());
    assert_eq!(ctx.graph().counts().await.unwrap(), (1, 0));
    ctx.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_transaction_rolls_back() {
    let tmp = TempDir::new().unwrap();
    let ctx = open(&tmp).await;
    let db = ctx.search_db();

    let outcome: Result<(), StorageError> = transaction(db, |db| {
        Box::pin(async move {
            db.run(
                &Statement::new("INSERT INTO index_state (key, value, updated_at) VALUES (?, ?, ?)")
                    .bind("k")
                    .bind("v")
                    .bind(1i64),
            )
            .await?;
            db.run(&Statement::new("INSERT INTO no_such_table VALUES (1)")).await?;
            Ok(())
        })
    })
    .await;
    assert!(outcome.is_err());
    assert_eq!(ctx.index_state().get("k").await.unwrap(), None);
}

#[tokio::test]
async fn test_memory_engine_persists_on_close() {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::for_folder(tmp.path().join("store"));
    config.storage.backend = BackendPreference::Portable;
    config.storage.portable_engine = PortableEngine::Memory;

    let ctx = StorageContext::open(&config).await.unwrap();
    assert_eq!(ctx.engines(), (EngineKind::Memory, EngineKind::Memory));
    ctx.documents().upsert(&doc("1", "a.md", "A")).await.unwrap();
    ctx.chat()
        .upsert_project(&notestore_core::models::Project {
            id: "p".into(),
            name: "P".into(),
            folder_path: None,
            created_at: 1,
            updated_at: 1,
            archived: false,
        })
        .await
        .unwrap();
    ctx.close().await.unwrap();

    let ctx = StorageContext::open(&config).await.unwrap();
    assert!(ctx.documents().get("1").await.unwrap().is_some());
    assert!(ctx.chat().get_project("p").await.unwrap().is_some());
}

#[tokio::test]
async fn test_paged_engine_serves_fulltext_search() {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::for_folder(tmp.path().join("store"));
    config.storage.backend = BackendPreference::Portable;

    let ctx = StorageContext::open(&config).await.unwrap();
    assert_eq!(ctx.engines().0, EngineKind::Paged);
    ctx.documents().upsert(&doc("1", "notes/a.md", "Gardening")).await.unwrap();
    ctx.documents()
        .replace_chunks("1", &[chunk("1", 0, "tomatoes need sun")])
        .await
        .unwrap();

    let hits = ctx
        .search(&SearchRequest {
            query: "tomatoes",
            query_vec: None,
            scope: SearchScope::All,
            limit: 5,
            explain: false,
        })
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].path, "notes/a.md");
    ctx.close().await.unwrap();
}
