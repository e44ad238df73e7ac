//! Search scopes: constrain a query to one file, a folder subtree, or an
//! explicit document allow/deny list.

use serde::{Deserialize, Serialize};

/// Default upper bound on the number of row ids inlined into a scoped
/// nearest-neighbor query.
pub const DEFAULT_MAX_SCOPE_ROWS: usize = 2_000;

/// Narrows a search to a subset of documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SearchScope {
    #[default]
    All,
    /// Exactly one document path.
    Path(String),
    /// Every document under a folder (recursive).
    Folder(String),
    /// Only these document ids.
    AllowIds(Vec<String>),
    /// Every document except these ids.
    DenyIds(Vec<String>),
}

impl SearchScope {
    /// Build a folder scope. The vault root (`""` or `"/"`) is unrestricted.
    pub fn in_folder(folder: &str) -> Self {
        let trimmed = folder.trim_matches('/');
        if trimmed.is_empty() {
            SearchScope::All
        } else {
            SearchScope::Folder(trimmed.to_string())
        }
    }

    pub fn is_unrestricted(&self) -> bool {
        match self {
            SearchScope::All => true,
            SearchScope::DenyIds(ids) => ids.is_empty(),
            _ => false,
        }
    }

    /// Path prefix (`folder/`) shared by every document under the folder.
    /// Compared byte for byte; `Notes/` is not inside `notes`.
    pub fn folder_prefix(folder: &str) -> String {
        format!("{}/", folder.trim_matches('/'))
    }

    /// Evaluate the scope against one document.
    pub fn matches(&self, doc_id: &str, path: &str) -> bool {
        match self {
            SearchScope::All => true,
            SearchScope::Path(p) => p == path,
            SearchScope::Folder(f) => {
                let prefix = f.trim_matches('/');
                path.len() > prefix.len()
                    && path.starts_with(prefix)
                    && path.as_bytes()[prefix.len()] == b'/'
            }
            SearchScope::AllowIds(ids) => ids.iter().any(|id| id == doc_id),
            SearchScope::DenyIds(ids) => !ids.iter().any(|id| id == doc_id),
        }
    }
}

/// Escape `%`, `_` and `\` for a `LIKE ... ESCAPE '\'` clause.
pub fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_folder_root_is_unrestricted() {
        assert_eq!(SearchScope::in_folder("/"), SearchScope::All);
        assert_eq!(SearchScope::in_folder(""), SearchScope::All);
        assert_eq!(
            SearchScope::in_folder("/notes/"),
            SearchScope::Folder("notes".to_string())
        );
    }

    #[test]
    fn test_folder_matches_subtree_only() {
        let scope = SearchScope::in_folder("notes");
        assert!(scope.matches("1", "notes/a.md"));
        assert!(scope.matches("2", "notes/deep/b.md"));
        assert!(!scope.matches("3", "notes-archive/c.md"));
        assert!(!scope.matches("4", "notes"));
        assert!(!scope.matches("5", "other/notes/d.md"));
    }

    #[test]
    fn test_allow_and_deny() {
        let allow = SearchScope::AllowIds(vec!["a".into(), "b".into()]);
        assert!(allow.matches("a", "x.md"));
        assert!(!allow.matches("c", "x.md"));

        let deny = SearchScope::DenyIds(vec!["a".into()]);
        assert!(!deny.matches("a", "x.md"));
        assert!(deny.matches("c", "x.md"));
        assert!(SearchScope::DenyIds(vec![]).is_unrestricted());
    }

    #[test]
    fn test_folder_prefix_keeps_wildcards_literal() {
        assert_eq!(SearchScope::folder_prefix("/a_b%/"), "a_b%/");
        assert_eq!(escape_like("a_b%"), "a\\_b\\%");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_folder_is_case_sensitive() {
        let scope = SearchScope::in_folder("notes");
        assert!(scope.matches("1", "notes/a.md"));
        assert!(!scope.matches("2", "Notes/b.md"));
        assert!(!scope.matches("3", "NOTES/c.md"));
    }
}
