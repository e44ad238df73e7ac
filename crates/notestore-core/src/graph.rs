//! Graph identifiers and well-known node/edge types.
//!
//! Edge ids are content-addressed: deriving the same relationship twice yields
//! the same id, so re-indexing a note overwrites its edges instead of
//! duplicating them.

use sha2::{Digest, Sha256};

pub const NODE_DOCUMENT: &str = "document";
pub const NODE_TAG: &str = "tag";
pub const NODE_CATEGORY: &str = "category";

pub const EDGE_LINK: &str = "link";
pub const EDGE_TAGGED: &str = "tagged";
pub const EDGE_CATEGORIZED: &str = "categorized";

/// Stable edge id: hex SHA-256 over `from`, `to` and `type`, truncated to
/// 128 bits.
pub fn edge_id(from: &str, to: &str, edge_type: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(from.as_bytes());
    hasher.update([0u8]);
    hasher.update(to.as_bytes());
    hasher.update([0u8]);
    hasher.update(edge_type.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Node id of a document: its vault-relative path. Document nodes are keyed
/// by path, never by the document id.
pub fn document_node_id(path: &str) -> String {
    path.trim().trim_start_matches('/').to_string()
}

/// Synthetic node id for a tag. Tags are case-insensitive and may be given
/// with or without the leading `#`.
pub fn tag_node_id(tag: &str) -> String {
    format!("tag:{}", tag.trim().trim_start_matches('#').to_lowercase())
}

/// Synthetic node id for a category.
pub fn category_node_id(category: &str) -> String {
    format!("category:{}", category.trim().to_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_id_is_deterministic() {
        let a = edge_id("notes/a.md", "notes/b.md", EDGE_LINK);
        let b = edge_id("notes/a.md", "notes/b.md", EDGE_LINK);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_edge_id_distinguishes_type_and_direction() {
        let link = edge_id("a", "b", EDGE_LINK);
        assert_ne!(link, edge_id("a", "b", EDGE_TAGGED));
        assert_ne!(link, edge_id("b", "a", EDGE_LINK));
        // The separator keeps ("ab", "c") apart from ("a", "bc").
        assert_ne!(edge_id("ab", "c", "t"), edge_id("a", "bc", "t"));
    }

    #[test]
    fn test_document_node_id_is_the_path() {
        assert_eq!(document_node_id("notes/a.md"), "notes/a.md");
        assert_eq!(document_node_id("/notes/a.md"), "notes/a.md");
        assert_ne!(document_node_id("Notes/a.md"), document_node_id("notes/a.md"));
    }

    #[test]
    fn test_tag_node_id() {
        assert_eq!(tag_node_id("#Rust"), "tag:rust");
        assert_eq!(tag_node_id(" rust "), "tag:rust");
        assert_eq!(category_node_id("Work"), "category:work");
    }
}
