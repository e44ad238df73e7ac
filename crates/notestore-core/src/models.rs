//! Core data models persisted by notestore.
//!
//! All ids are strings and all timestamps are Unix milliseconds.

use serde::{Deserialize, Serialize};

use crate::embedding::RowId;

/// Current time as Unix milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Format a Unix millisecond timestamp as ISO 8601.
pub fn format_ts_iso(ts_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts_ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ts_ms.to_string())
}

/// Metadata for one indexed file. `path` is unique across the vault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub path: String,
    pub doc_type: String,
    pub title: Option<String>,
    pub size: i64,
    pub ctime: i64,
    pub mtime: i64,
    pub content_hash: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub frontmatter_json: Option<String>,
    pub last_processed_at: Option<i64>,
}

/// A slice of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocChunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub chunk_index: i64,
    pub title: Option<String>,
    pub mtime: i64,
    pub content_raw: String,
    /// Normalized text used for full-text matching. Filled from
    /// `content_raw` when empty.
    pub content_fts_norm: String,
}

/// Per-document usage statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocStatistics {
    pub doc_id: String,
    pub word_count: i64,
    pub char_count: i64,
    pub open_count: i64,
    pub last_open_ts: Option<i64>,
    pub updated_at: i64,
}

/// Input for a vector upsert.
#[derive(Debug, Clone)]
pub struct EmbeddingInput {
    /// Logical embedding id (usually the chunk id, or `doc:<id>` for a
    /// document-level vector).
    pub id: String,
    pub doc_id: String,
    pub chunk_id: Option<String>,
    pub chunk_index: Option<i64>,
    pub content_hash: String,
    pub model: String,
    pub vector: Vec<f32>,
}

/// A stored embedding row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmbeddingRecord {
    pub row_id: RowId,
    pub id: String,
    pub doc_id: String,
    pub chunk_id: Option<String>,
    pub chunk_index: Option<i64>,
    pub content_hash: String,
    pub vector: Vec<f32>,
    pub model: String,
    pub embedding_len: usize,
    pub ctime: i64,
    pub mtime: i64,
}

/// A node in the relationship graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Document nodes use the note path (`graph::document_node_id`); tags
    /// and categories use `tag:` / `category:` ids.
    pub id: String,
    pub node_type: String,
    pub label: String,
    pub attributes: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// A directed, typed edge. `id` is derived from `(from, to, type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub id: String,
    pub from_node_id: String,
    pub to_node_id: String,
    pub edge_type: String,
    pub weight: f64,
    pub attributes: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

/// In/out degree of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Degree {
    pub incoming: i64,
    pub outgoing: i64,
}

impl Degree {
    pub fn total(&self) -> i64 {
        self.incoming + self.outgoing
    }
}

/// A node id paired with its degree, as returned by degree rankings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeDegree {
    pub node_id: String,
    pub label: String,
    pub node_type: String,
    pub degree: Degree,
}

/// Background-indexing checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStateEntry {
    pub key: String,
    pub value: String,
    pub updated_at: i64,
}

/// A chat project (a folder of conversations).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    pub folder_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub archived: bool,
}

/// A chat conversation, optionally inside a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub project_id: Option<String>,
    pub title: String,
    pub file_path: Option<String>,
    pub model: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub archived: bool,
}

/// A single chat message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub model: Option<String>,
    pub token_usage_json: Option<String>,
    pub created_at: i64,
}

/// A resource (note, file, url) attached to a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageResource {
    pub id: String,
    pub message_id: String,
    pub kind: String,
    pub source: String,
    pub summary: Option<String>,
    pub created_at: i64,
}

/// A starred message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Star {
    pub message_id: String,
    pub conversation_id: String,
    pub project_id: Option<String>,
    pub created_at: i64,
}
