//! # notestore core
//!
//! Pure logic shared by every notestore storage engine: data models, the
//! vector codec and row-id newtype, search scopes, graph identifiers, text
//! normalization, and the rank-fusion search pipeline.
//!
//! This crate contains no tokio, sqlx, rusqlite, or filesystem I/O. Engines
//! live in the `notestore` crate and plug into the search pipeline through
//! the [`search::SearchSource`] trait.

pub mod embedding;
pub mod fusion;
pub mod graph;
pub mod models;
pub mod scope;
pub mod search;
pub mod text;
