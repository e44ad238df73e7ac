//! Text normalization for full-text matching and query term extraction.

/// Normalize chunk text for the full-text index.
///
/// Lowercases, drops markdown punctuation that carries no meaning for
/// matching, and collapses runs of whitespace to a single space.
pub fn normalize_for_fts(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut last_space = true;
    for c in text.chars() {
        let c = if matches!(c, '#' | '*' | '_' | '`' | '>' | '|' | '[' | ']' | '~' | '=') {
            ' '
        } else {
            c
        };
        if c.is_whitespace() {
            if !last_space {
                out.push(' ');
                last_space = true;
            }
        } else {
            out.extend(c.to_lowercase());
            last_space = false;
        }
    }
    if out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Split a user query into distinct lowercase terms, in first-seen order.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in query.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let term = raw.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}

/// Build an FTS5 `MATCH` expression that ORs quoted terms.
///
/// Quoting keeps operators (`AND`, `NEAR`, `-`, `*`) in user input literal.
pub fn fts_match_expression(terms: &[String]) -> String {
    terms
        .iter()
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// Count whitespace-separated words.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_markdown() {
        assert_eq!(
            normalize_for_fts("# Title\n\n**Bold**  and `code`"),
            "title bold and code"
        );
        assert_eq!(normalize_for_fts("   "), "");
    }

    #[test]
    fn test_query_terms_dedup() {
        assert_eq!(
            query_terms("Rust, rust! async-trait"),
            vec!["rust", "async", "trait"]
        );
        assert!(query_terms("  ... ").is_empty());
    }

    #[test]
    fn test_fts_expression_quotes_terms() {
        let terms = vec!["near".to_string(), "a\"b".to_string()];
        assert_eq!(fts_match_expression(&terms), "\"near\" OR \"a\"\"b\"");
    }
}
