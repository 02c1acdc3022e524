//! Model loading and inference seam.
//!
//! The control plane never touches model weights. A [`PredictorLoader`]
//! turns a model directory into a shared [`Predictor`] handle, and the
//! handle turns a document into structured JSON. Implementations wrapping
//! blocking runtimes should move the work onto `tokio::task::spawn_blocking`.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use docsift_state::DocumentType;
use serde_json::Value;

use crate::error::PredictorError;

/// A loaded model, shared between the cache and in-flight requests.
#[async_trait]
pub trait Predictor: Send + Sync {
    /// Run the model on the document at `input`.
    async fn infer(&self, input: &Path, document_type: &DocumentType)
        -> Result<Value, PredictorError>;
}

/// Loads predictors from model directories.
#[async_trait]
pub trait PredictorLoader: Send + Sync {
    async fn load(&self, model_path: &Path) -> Result<Arc<dyn Predictor>, PredictorError>;
}
