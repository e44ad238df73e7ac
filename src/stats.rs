//! Storage statistics and health overview.
//!
//! A quick summary of what is stored and how it is served: which engine
//! opened each database, document/chunk counts, embedding coverage of the
//! ANN table, graph size and any capability warnings from migration. Used by
//! `nstore stats`.

use anyhow::Result;
use notestore_core::models::format_ts_iso;
use std::path::Path;

use crate::config::Config;
use crate::context::StorageContext;
use crate::vector::RECREATIONS_KEY;

/// Run the stats command: open storage and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let ctx = StorageContext::open(config).await?;
    let outcome = print_stats(&ctx).await;
    ctx.close().await?;
    outcome
}

async fn print_stats(ctx: &StorageContext) -> Result<()> {
    let storage = &ctx.config().storage;
    let (search_engine, meta_engine) = ctx.engines();
    let docs = ctx.documents().counts().await?;
    let vectors = ctx.vectors();
    let vector_counts = vectors.counts().await?;
    let vector_available = vectors.available().await;
    let recreations = ctx.index_state().get(RECREATIONS_KEY).await?;
    let recreated_at = ctx
        .index_state()
        .list_prefix(RECREATIONS_KEY)
        .await?
        .into_iter()
        .next()
        .map(|e| format_ts_iso(e.updated_at));
    let (nodes, edges) = ctx.graph().counts().await?;
    let conversations = ctx.chat().list_conversations(None, true).await?.len();

    println!("notestore: storage stats");
    println!("========================");
    println!();
    println!("  Folder:      {}", storage.folder.display());
    println!(
        "  search.sqlite  {:<8} {}",
        search_engine,
        format_bytes(file_size(&storage.search_db_path()))
    );
    println!(
        "  meta.sqlite    {:<8} {}",
        meta_engine,
        format_bytes(file_size(&storage.meta_db_path()))
    );
    println!();
    println!("  Documents:   {}", docs.documents);
    println!("  Chunks:      {}", docs.chunks);
    println!(
        "  Embeddings:  {} rows, {} indexed ({}%)",
        vector_counts.rows,
        vector_counts.indexed,
        if vector_counts.rows > 0 {
            (vector_counts.indexed * 100) / vector_counts.rows
        } else {
            0
        }
    );
    match vector_counts.dimension {
        Some(dim) => println!("  Dimension:   {dim}"),
        None => println!("  Dimension:   (no vector index)"),
    }
    println!(
        "  Vector ext:  {}",
        if vector_available { "available" } else { "missing" }
    );
    if let Some(n) = recreations {
        println!(
            "  Recreated:   {n} time(s){}",
            recreated_at.map(|t| format!(", last {t}")).unwrap_or_default()
        );
    }
    println!("  Graph:       {nodes} nodes, {edges} edges");
    println!("  Chats:       {conversations} conversations");

    let (search_report, meta_report) = ctx.migration_reports();
    let warnings: Vec<&String> = search_report
        .warnings
        .iter()
        .chain(meta_report.warnings.iter())
        .collect();
    if !warnings.is_empty() {
        println!();
        println!("  Warnings:");
        for w in warnings {
            println!("    - {w}");
        }
    }
    println!();
    Ok(())
}

fn file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
