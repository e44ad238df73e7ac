//! Maintenance commands: `init`, `probe`, `vectors ...` and `graph ...`.

use anyhow::Result;

use crate::backend::native;
use crate::backend::selector::plan;
use crate::config::Config;
use crate::context::StorageContext;
use crate::graph::DegreeOrder;

/// Create both databases and apply migrations.
pub async fn run_init(config: &Config) -> Result<()> {
    let ctx = StorageContext::open(config).await?;
    let (search, meta) = ctx.engines();
    let (search_report, meta_report) = ctx.migration_reports();
    println!(
        "Storage initialized at {} (search: {}, meta: {}).",
        config.storage.folder.display(),
        search,
        meta
    );
    if let Some(dim) = search_report.vector_index_restored {
        println!("Vector index restored at dimension {dim}.");
    }
    for w in search_report.warnings.iter().chain(meta_report.warnings.iter()) {
        println!("warning: {w}");
    }
    ctx.close().await?;
    Ok(())
}

/// Report engine availability and what the configured preference resolves to.
pub async fn run_probe(config: &Config) -> Result<()> {
    let options = config.storage.open_options();
    let native_ok = native::probe();
    let planned: Vec<String> = plan(&options, native_ok).iter().map(|k| k.to_string()).collect();
    println!("native engine:   {}", if native_ok { "available" } else { "unavailable" });
    println!("preference:      {:?}", options.preference);
    println!("attempt order:   {}", planned.join(" -> "));

    let ctx = StorageContext::open(config).await?;
    let (search, meta) = ctx.engines();
    println!("search.sqlite:   {search}");
    println!("meta.sqlite:     {meta}");
    let vectors = ctx.vectors().available().await;
    println!("vector index:    {}", if vectors { "available" } else { "missing" });
    let title = ctx.documents().has_title_index().await?;
    println!("title index:     {}", if title { "available" } else { "missing (LIKE fallback)" });
    ctx.close().await?;
    Ok(())
}

/// Drop ANN entries without a backing embedding row.
pub async fn run_vectors_cleanup(config: &Config) -> Result<()> {
    let ctx = StorageContext::open(config).await?;
    let outcome = ctx.vectors().cleanup_orphans().await;
    ctx.close().await?;
    let cleanup = outcome?;
    println!(
        "Orphaned vector entries: {} found, {} deleted.",
        cleanup.found, cleanup.deleted
    );
    Ok(())
}

/// Rebuild the ANN table from the relational embedding rows.
pub async fn run_vectors_rebuild(config: &Config) -> Result<()> {
    let ctx = StorageContext::open(config).await?;
    let outcome = ctx.vectors().rebuild_index().await;
    ctx.close().await?;
    println!("Vector index rebuilt: {} rows indexed.", outcome?);
    Ok(())
}

/// List nodes without any edge.
pub async fn run_graph_orphans(config: &Config, node_type: Option<&str>) -> Result<()> {
    let ctx = StorageContext::open(config).await?;
    let outcome = ctx.graph().hard_orphans(node_type).await;
    ctx.close().await?;
    let orphans = outcome?;
    if orphans.is_empty() {
        println!("No orphaned nodes.");
        return Ok(());
    }
    for node in orphans {
        println!("{}  [{}]  {}", node.id, node.node_type, node.label);
    }
    Ok(())
}

/// List the highest-degree nodes.
pub async fn run_graph_top(
    config: &Config,
    limit: usize,
    order: DegreeOrder,
    node_type: Option<&str>,
) -> Result<()> {
    let ctx = StorageContext::open(config).await?;
    let outcome = ctx.graph().top_nodes_by_degree(limit, order, node_type).await;
    ctx.close().await?;
    let top = outcome?;
    if top.is_empty() {
        println!("No nodes.");
        return Ok(());
    }
    println!("{:<6} {:>4} {:>4}  {}", "TOTAL", "IN", "OUT", "NODE");
    for n in top {
        println!(
            "{:<6} {:>4} {:>4}  {} ({})",
            n.degree.total(),
            n.degree.incoming,
            n.degree.outgoing,
            n.label,
            n.node_id
        );
    }
    Ok(())
}
