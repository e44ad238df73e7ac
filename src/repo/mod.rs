//! Typed repositories over a [`Backend`](crate::backend::Backend).
//!
//! Each repository borrows the database handle for its lifetime and never
//! outlives it.

pub mod chat;
pub mod documents;
pub mod index_state;

pub use chat::ChatRepo;
pub use documents::DocumentRepo;
pub use index_state::IndexStateRepo;

use crate::backend::Statement;

/// `?, ?, ?` for `n` parameters.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Bind every id in order.
pub(crate) fn bind_all<S: AsRef<str>>(mut stmt: Statement, ids: &[S]) -> Statement {
    for id in ids {
        stmt = stmt.bind(id.as_ref());
    }
    stmt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(3), "?, ?, ?");
        assert_eq!(placeholders(0), "");
    }
}
