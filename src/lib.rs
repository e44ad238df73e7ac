//! # notestore
//!
//! Embedded storage and retrieval core for a local note-taking assistant.
//!
//! Notes, their chunks, embeddings, a relationship graph and chat history
//! live in two SQLite databases served by one of three interchangeable
//! engines. Search fuses full-text, vector and title matches with
//! two-stage Reciprocal Rank Fusion.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   ┌────────────────┐   ┌───────────────────┐
//! │ StorageContext│──▶│ Repos / Vector │──▶│ Backend (native,  │
//! │  open/close   │   │ Graph / Search │   │ memory or paged)  │
//! └───────────────┘   └────────────────┘   └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`backend`] | Engine contract, the three engines, engine selection |
//! | [`migrate`] | Idempotent schema migration |
//! | [`repo`] | Documents, chunks, statistics, chat, index state |
//! | [`vector`] | Row-id aligned embedding store and ANN index |
//! | [`graph`] | Relationship graph and degree queries |
//! | [`search`] | SQLite retrieval channels for hybrid search |
//! | [`context`] | Both databases behind one handle |
//! | [`config`] | TOML configuration |
//! | [`error`] | Storage error taxonomy |

pub mod admin;
pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod graph;
pub mod migrate;
pub mod repo;
pub mod search;
pub mod stats;
pub mod vector;

pub use context::StorageContext;
pub use error::{StorageError, StorageResult};
