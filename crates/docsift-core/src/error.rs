//! Error taxonomy for the serving control plane.

use docsift_state::{DocumentType, ModelId, StorageError};
use serde::{Deserialize, Serialize};

/// Errors raised by a predictor loader or a loaded predictor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PredictorError {
    #[error("failed to load model from {path}: {reason}")]
    Load { path: String, reason: String },

    #[error("inference failed: {0}")]
    Inference(String),
}

/// Serving control plane errors.
#[derive(Debug, thiserror::Error)]
pub enum ServingError {
    #[error("no active model with version '{version}'")]
    ModelNotFound { version: String },

    #[error("model {0} does not exist")]
    UnknownModel(ModelId),

    #[error("{count} active models share version '{version}'; pass a document type")]
    AmbiguousModelVersion { version: String, count: usize },

    #[error("no active production model for document type '{0}'")]
    NoProductionModel(DocumentType),

    #[error("either a document type or a model version must be specified")]
    MissingSelector,

    #[error("challenger document type '{challenger}' does not match '{expected}'")]
    DocumentTypeMismatch {
        expected: DocumentType,
        challenger: DocumentType,
    },

    #[error("A/B test not found: {0}")]
    TestNotFound(String),

    #[error("traffic split must be strictly between 0 and 1, got {0}")]
    InvalidTrafficSplit(f64),

    #[error("invalid A/B test duration: {0}")]
    InvalidTestDuration(String),

    #[error("failed to load predictor for model {model_id}: {source}")]
    PredictorLoadFailed {
        model_id: ModelId,
        #[source]
        source: PredictorError,
    },

    #[error("inference with model {model_id} failed: {source}")]
    InferenceFailed {
        model_id: ModelId,
        #[source]
        source: PredictorError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Machine-readable error kind carried in [`ErrorReport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModelNotFound,
    AmbiguousModelVersion,
    NoProductionModel,
    MissingSelector,
    DocumentTypeMismatch,
    TestNotFound,
    InvalidTrafficSplit,
    InvalidTestDuration,
    PredictorLoadFailed,
    InferenceFailed,
    Storage,
    Config,
}

impl ServingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServingError::ModelNotFound { .. } | ServingError::UnknownModel(_) => {
                ErrorKind::ModelNotFound
            }
            ServingError::AmbiguousModelVersion { .. } => ErrorKind::AmbiguousModelVersion,
            ServingError::NoProductionModel(_) => ErrorKind::NoProductionModel,
            ServingError::MissingSelector => ErrorKind::MissingSelector,
            ServingError::DocumentTypeMismatch { .. } => ErrorKind::DocumentTypeMismatch,
            ServingError::TestNotFound(_) => ErrorKind::TestNotFound,
            ServingError::InvalidTrafficSplit(_) => ErrorKind::InvalidTrafficSplit,
            ServingError::InvalidTestDuration(_) => ErrorKind::InvalidTestDuration,
            ServingError::PredictorLoadFailed { .. } => ErrorKind::PredictorLoadFailed,
            ServingError::InferenceFailed { .. } => ErrorKind::InferenceFailed,
            ServingError::Storage(StorageError::ModelNotFound { .. }) => ErrorKind::ModelNotFound,
            ServingError::Storage(_) => ErrorKind::Storage,
            ServingError::Config(_) => ErrorKind::Config,
        }
    }

    /// Structured form handed to callers above the control plane.
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

/// User-visible failure: error kind plus a human-readable message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

/// Result type for control plane operations.
pub type Result<T> = std::result::Result<T, ServingError>;
