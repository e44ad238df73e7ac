//! Typed storage errors.
//!
//! Repositories and engines return [`StorageError`]. The CLI and the search
//! pipeline wrap it in `anyhow` at their edge.

use thiserror::Error;

use crate::backend::EngineKind;

/// Shown for every upstream AI configuration failure; the detail is logged,
/// not displayed.
pub const AI_UNAVAILABLE_MESSAGE: &str =
    "AI features are unavailable. Check the model and provider settings.";

pub type StorageResult<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Provider not found: {0}")]
    ProviderNotFound(String),

    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Vector index extension is not available on this engine")]
    VectorIndexExtensionMissing,

    #[error("Vector index table is missing: {0}")]
    VectorIndexTableMissing(String),

    #[error("Storage error while {context}: {source}")]
    UnknownStorage {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("{engine} engine error: {message}")]
    Engine { engine: EngineKind, message: String },

    #[error("{engine} engine call timed out after {timeout_ms} ms")]
    Timeout { engine: EngineKind, timeout_ms: u64 },

    #[error("Database connection is closed")]
    Closed,

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("No storage engine could be opened: {}", .0.join("; "))]
    AllBackendsFailed(Vec<String>),
}

impl StorageError {
    pub fn engine(engine: EngineKind, message: impl Into<String>) -> Self {
        StorageError::Engine {
            engine,
            message: message.into(),
        }
    }

    pub fn unknown<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StorageError::UnknownStorage {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Message safe to show to an end user.
    pub fn user_message(&self) -> String {
        match self {
            StorageError::ModelUnavailable(_)
            | StorageError::ProviderNotFound(_)
            | StorageError::ConfigurationMissing(_) => AI_UNAVAILABLE_MESSAGE.to_string(),
            StorageError::VectorIndexExtensionMissing | StorageError::VectorIndexTableMissing(_) => {
                "Semantic search is unavailable; results use keyword matching only.".to_string()
            }
            other => other.to_string(),
        }
    }

    /// Missing ANN capability: callers skip vector search instead of failing.
    pub fn is_capability_gap(&self) -> bool {
        matches!(
            self,
            StorageError::VectorIndexExtensionMissing | StorageError::VectorIndexTableMissing(_)
        )
    }

    /// Raw engine message, used to classify SQL failures by text.
    pub fn engine_message(&self) -> Option<&str> {
        match self {
            StorageError::Engine { message, .. } => Some(message),
            _ => None,
        }
    }
}
