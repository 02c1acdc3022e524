//! Error types for docsift-state

use thiserror::Error;

/// Errors returned by [`ModelRepository`](crate::ModelRepository) implementations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    /// No model with this id exists
    #[error("model not found: {id}")]
    ModelNotFound { id: String },

    /// The model is archived and cannot take part in the requested transition
    #[error("model {id} is archived")]
    ModelArchived { id: String },

    /// The model currently serves production traffic
    #[error("model {id} is the production model for {document_type}")]
    ModelInProduction { id: String, document_type: String },

    /// A record with this id already exists
    #[error("model already exists: {id}")]
    DuplicateModel { id: String },

    /// Backend failure (connection, query, transaction)
    #[error("storage backend error: {0}")]
    Backend(String),
}
