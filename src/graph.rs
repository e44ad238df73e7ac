//! Relationship graph: node/edge CRUD plus the degree, neighbor and orphan
//! queries used for ranking boosts.
//!
//! Degree results are computed from whatever is committed at query time;
//! they feed ranking, so a batch still being written may be counted
//! partially.

use notestore_core::graph::edge_id;
use notestore_core::models::{now_ms, Degree, GraphEdge, GraphNode, NodeDegree};
use std::collections::{BTreeSet, HashMap};

use crate::backend::{transaction, Backend, Row, Statement};
use crate::error::{StorageError, StorageResult};
use crate::repo::{bind_all, placeholders};

/// Which degree [`GraphStore::top_nodes_by_degree`] ranks by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DegreeOrder {
    Incoming,
    Outgoing,
    #[default]
    Total,
}

pub struct GraphStore<'a, B: Backend> {
    db: &'a B,
}

fn parse_attributes(raw: &str) -> StorageResult<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| StorageError::Decode(format!("graph attributes: {e}")))
}

fn node_from_row(row: &Row) -> StorageResult<GraphNode> {
    Ok(GraphNode {
        id: row.get("id")?,
        node_type: row.get("node_type")?,
        label: row.get("label")?,
        attributes: parse_attributes(&row.get::<String>("attributes")?)?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn edge_from_row(row: &Row) -> StorageResult<GraphEdge> {
    Ok(GraphEdge {
        id: row.get("id")?,
        from_node_id: row.get("from_node_id")?,
        to_node_id: row.get("to_node_id")?,
        edge_type: row.get("edge_type")?,
        weight: row.get("weight")?,
        attributes: parse_attributes(&row.get::<String>("attributes")?)?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const NODE_COLUMNS: &str = "id, node_type, label, attributes, created_at, updated_at";
const EDGE_COLUMNS: &str =
    "id, from_node_id, to_node_id, edge_type, weight, attributes, created_at, updated_at";

impl<'a, B: Backend> GraphStore<'a, B> {
    pub fn new(db: &'a B) -> Self {
        Self { db }
    }

    // ---- nodes ----

    pub async fn upsert_node(&self, node: &GraphNode) -> StorageResult<()> {
        upsert_node_stmt(self.db, node).await
    }

    pub async fn upsert_nodes(&self, nodes: &[GraphNode]) -> StorageResult<()> {
        if nodes.is_empty() {
            return Ok(());
        }
        transaction(self.db, |db| {
            Box::pin(async move {
                for node in nodes {
                    upsert_node_stmt(db, node).await?;
                }
                Ok(())
            })
        })
        .await
    }

    pub async fn get_node(&self, id: &str) -> StorageResult<Option<GraphNode>> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM graph_nodes WHERE id = ?");
        let row = self.db.get(&Statement::new(sql).bind(id)).await?;
        row.as_ref().map(node_from_row).transpose()
    }

    pub async fn get_nodes(&self, ids: &[String]) -> StorageResult<Vec<GraphNode>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let sql = format!(
            "SELECT {NODE_COLUMNS} FROM graph_nodes WHERE id IN ({}) ORDER BY id",
            placeholders(ids.len())
        );
        let rows = self.db.all(&bind_all(Statement::new(sql), ids)).await?;
        rows.iter().map(node_from_row).collect()
    }

    pub async fn nodes_by_type(&self, node_type: &str) -> StorageResult<Vec<GraphNode>> {
        let sql = format!("SELECT {NODE_COLUMNS} FROM graph_nodes WHERE node_type = ? ORDER BY id");
        let rows = self.db.all(&Statement::new(sql).bind(node_type)).await?;
        rows.iter().map(node_from_row).collect()
    }

    /// Delete nodes and every edge touching them.
    pub async fn delete_nodes(&self, ids: &[String]) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        transaction(self.db, |db| {
            Box::pin(async move {
                delete_edges_touching(db, ids).await?;
                let sql = format!("DELETE FROM graph_nodes WHERE id IN ({})", placeholders(ids.len()));
                Ok(db.run(&bind_all(Statement::new(sql), ids)).await?.changes)
            })
        })
        .await
    }

    pub async fn delete_node(&self, id: &str) -> StorageResult<bool> {
        Ok(self.delete_nodes(&[id.to_string()]).await? > 0)
    }

    // ---- edges ----

    /// Insert or overwrite an edge. The id is always recomputed from
    /// `(from, to, type)`; weight and attributes are overwritten.
    pub async fn upsert_edge(&self, edge: &GraphEdge) -> StorageResult<String> {
        upsert_edge_stmt(self.db, edge).await
    }

    pub async fn upsert_edges(&self, edges: &[GraphEdge]) -> StorageResult<Vec<String>> {
        if edges.is_empty() {
            return Ok(Vec::new());
        }
        transaction(self.db, |db| {
            Box::pin(async move {
                let mut ids = Vec::with_capacity(edges.len());
                for edge in edges {
                    ids.push(upsert_edge_stmt(db, edge).await?);
                }
                Ok(ids)
            })
        })
        .await
    }

    pub async fn get_edge(&self, id: &str) -> StorageResult<Option<GraphEdge>> {
        let sql = format!("SELECT {EDGE_COLUMNS} FROM graph_edges WHERE id = ?");
        let row = self.db.get(&Statement::new(sql).bind(id)).await?;
        row.as_ref().map(edge_from_row).transpose()
    }

    pub async fn edges_from(&self, node_id: &str, edge_type: Option<&str>) -> StorageResult<Vec<GraphEdge>> {
        self.edges_where("from_node_id", node_id, edge_type).await
    }

    pub async fn edges_to(&self, node_id: &str, edge_type: Option<&str>) -> StorageResult<Vec<GraphEdge>> {
        self.edges_where("to_node_id", node_id, edge_type).await
    }

    async fn edges_where(
        &self,
        column: &str,
        node_id: &str,
        edge_type: Option<&str>,
    ) -> StorageResult<Vec<GraphEdge>> {
        let mut sql = format!("SELECT {EDGE_COLUMNS} FROM graph_edges WHERE {column} = ?");
        let mut stmt_params = vec![node_id.to_string()];
        if let Some(t) = edge_type {
            sql.push_str(" AND edge_type = ?");
            stmt_params.push(t.to_string());
        }
        sql.push_str(" ORDER BY id");
        let rows = self.db.all(&bind_all(Statement::new(sql), &stmt_params)).await?;
        rows.iter().map(edge_from_row).collect()
    }

    pub async fn delete_edges(&self, ids: &[String]) -> StorageResult<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let sql = format!("DELETE FROM graph_edges WHERE id IN ({})", placeholders(ids.len()));
        Ok(self.db.run(&bind_all(Statement::new(sql), ids)).await?.changes)
    }

    /// Delete every edge with an endpoint in `node_ids`.
    pub async fn delete_edges_for_nodes(&self, node_ids: &[String]) -> StorageResult<u64> {
        if node_ids.is_empty() {
            return Ok(0);
        }
        delete_edges_touching(self.db, node_ids).await
    }

    // ---- derived queries ----

    /// In/out degree of each node, optionally counting one edge type only.
    /// Nodes without edges are reported with zero degree.
    pub async fn count_edges(
        &self,
        node_ids: &[String],
        edge_type: Option<&str>,
    ) -> StorageResult<HashMap<String, Degree>> {
        let mut out: HashMap<String, Degree> = node_ids
            .iter()
            .map(|id| (id.clone(), Degree::default()))
            .collect();
        if node_ids.is_empty() {
            return Ok(out);
        }
        let type_clause = if edge_type.is_some() { " AND edge_type = ?" } else { "" };

        for (column, outgoing) in [("from_node_id", true), ("to_node_id", false)] {
            let sql = format!(
                "SELECT {column} AS node_id, COUNT(*) AS n FROM graph_edges \
                 WHERE {column} IN ({}){type_clause} GROUP BY {column}",
                placeholders(node_ids.len())
            );
            let mut stmt = bind_all(Statement::new(sql), node_ids);
            if let Some(t) = edge_type {
                stmt = stmt.bind(t);
            }
            for row in self.db.all(&stmt).await? {
                let id: String = row.get("node_id")?;
                let n: i64 = row.get("n")?;
                let entry = out.entry(id).or_default();
                if outgoing {
                    entry.outgoing = n;
                } else {
                    entry.incoming = n;
                }
            }
        }
        Ok(out)
    }

    /// Undirected adjacency restricted to `node_ids`: for each id, the other
    /// ids of the set it shares an edge with (either direction), sorted.
    pub async fn neighbor_ids_map(&self, node_ids: &[String]) -> StorageResult<HashMap<String, Vec<String>>> {
        let mut sets: HashMap<String, BTreeSet<String>> = node_ids
            .iter()
            .map(|id| (id.clone(), BTreeSet::new()))
            .collect();
        if node_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let p = placeholders(node_ids.len());
        let sql = format!(
            "SELECT from_node_id, to_node_id FROM graph_edges \
             WHERE from_node_id IN ({p}) AND to_node_id IN ({p})"
        );
        let stmt = bind_all(bind_all(Statement::new(sql), node_ids), node_ids);
        for row in self.db.all(&stmt).await? {
            let from: String = row.get("from_node_id")?;
            let to: String = row.get("to_node_id")?;
            if from == to {
                continue;
            }
            if let Some(s) = sets.get_mut(&from) {
                s.insert(to.clone());
            }
            if let Some(s) = sets.get_mut(&to) {
                s.insert(from);
            }
        }
        Ok(sets
            .into_iter()
            .map(|(id, s)| (id, s.into_iter().collect()))
            .collect())
    }

    /// Highest-degree nodes, optionally of one node type. Ties break by id.
    pub async fn top_nodes_by_degree(
        &self,
        limit: usize,
        order: DegreeOrder,
        node_type: Option<&str>,
    ) -> StorageResult<Vec<NodeDegree>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let rank = match order {
            DegreeOrder::Incoming => "incoming",
            DegreeOrder::Outgoing => "outgoing",
            DegreeOrder::Total => "incoming + outgoing",
        };
        let type_clause = if node_type.is_some() { "WHERE n.node_type = ?" } else { "" };
        let sql = format!(
            r#"
            SELECT node_id, label, node_type, incoming, outgoing FROM (
                SELECT n.id AS node_id, n.label, n.node_type,
                       COALESCE(i.n, 0) AS incoming,
                       COALESCE(o.n, 0) AS outgoing
                FROM graph_nodes n
                LEFT JOIN (SELECT to_node_id AS id, COUNT(*) AS n FROM graph_edges GROUP BY to_node_id) i
                    ON i.id = n.id
                LEFT JOIN (SELECT from_node_id AS id, COUNT(*) AS n FROM graph_edges GROUP BY from_node_id) o
                    ON o.id = n.id
                {type_clause}
            )
            ORDER BY ({rank}) DESC, node_id ASC
            LIMIT ?
            "#
        );
        let mut stmt = Statement::new(sql);
        if let Some(t) = node_type {
            stmt = stmt.bind(t);
        }
        let rows = self.db.all(&stmt.bind(limit)).await?;
        rows.iter()
            .map(|row| {
                Ok(NodeDegree {
                    node_id: row.get("node_id")?,
                    label: row.get("label")?,
                    node_type: row.get("node_type")?,
                    degree: Degree {
                        incoming: row.get("incoming")?,
                        outgoing: row.get("outgoing")?,
                    },
                })
            })
            .collect()
    }

    /// Nodes with zero incoming and zero outgoing edges, optionally of one
    /// node type.
    pub async fn hard_orphans(&self, node_type: Option<&str>) -> StorageResult<Vec<GraphNode>> {
        let mut sql = format!(
            "SELECT {NODE_COLUMNS} FROM graph_nodes \
             WHERE id NOT IN (SELECT to_node_id FROM graph_edges) \
             AND id NOT IN (SELECT from_node_id FROM graph_edges)"
        );
        let mut stmt_params = Vec::new();
        if let Some(t) = node_type {
            sql.push_str(" AND node_type = ?");
            stmt_params.push(t.to_string());
        }
        sql.push_str(" ORDER BY id");
        let rows = self.db.all(&bind_all(Statement::new(sql), &stmt_params)).await?;
        rows.iter().map(node_from_row).collect()
    }

    pub async fn counts(&self) -> StorageResult<(u64, u64)> {
        let row = self
            .db
            .get(&Statement::new(
                "SELECT (SELECT COUNT(*) FROM graph_nodes) AS nodes, (SELECT COUNT(*) FROM graph_edges) AS edges",
            ))
            .await?;
        match row {
            Some(r) => Ok((r.get::<i64>("nodes")? as u64, r.get::<i64>("edges")? as u64)),
            None => Ok((0, 0)),
        }
    }
}

async fn upsert_node_stmt<B: Backend>(db: &B, node: &GraphNode) -> StorageResult<()> {
    let now = now_ms();
    db.run(
        &Statement::new(
            r#"
            INSERT INTO graph_nodes (id, node_type, label, attributes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                node_type = excluded.node_type,
                label = excluded.label,
                attributes = excluded.attributes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(node.id.as_str())
        .bind(node.node_type.as_str())
        .bind(node.label.as_str())
        .bind(node.attributes.to_string())
        .bind(if node.created_at > 0 { node.created_at } else { now })
        .bind(now),
    )
    .await?;
    Ok(())
}

async fn upsert_edge_stmt<B: Backend>(db: &B, edge: &GraphEdge) -> StorageResult<String> {
    let id = edge_id(&edge.from_node_id, &edge.to_node_id, &edge.edge_type);
    let now = now_ms();
    db.run(
        &Statement::new(
            r#"
            INSERT INTO graph_edges (id, from_node_id, to_node_id, edge_type, weight,
                                     attributes, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                weight = excluded.weight,
                attributes = excluded.attributes,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(id.as_str())
        .bind(edge.from_node_id.as_str())
        .bind(edge.to_node_id.as_str())
        .bind(edge.edge_type.as_str())
        .bind(edge.weight)
        .bind(edge.attributes.to_string())
        .bind(if edge.created_at > 0 { edge.created_at } else { now })
        .bind(now),
    )
    .await?;
    Ok(id)
}

async fn delete_edges_touching<B: Backend>(db: &B, node_ids: &[String]) -> StorageResult<u64> {
    let p = placeholders(node_ids.len());
    let sql = format!("DELETE FROM graph_edges WHERE from_node_id IN ({p}) OR to_node_id IN ({p})");
    let stmt = bind_all(bind_all(Statement::new(sql), node_ids), node_ids);
    Ok(db.run(&stmt).await?.changes)
}
