//! Storage trait definitions for docsift
//!
//! `ModelRepository` is the one seam between the serving control plane and
//! whatever stores model and evaluation records. It is async and
//! backend-agnostic. An in-memory implementation lives in the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::schema::{DocumentType, EvaluationRecord, ModelId, ModelRecord, ModelStatus};

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Selection criteria for [`ModelRepository::list_models`].
///
/// Empty criteria match every record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelFilter {
    pub document_type: Option<DocumentType>,
    /// Accept any of these statuses; empty accepts all
    pub statuses: Vec<ModelStatus>,
    pub training_completed: Option<bool>,
}

impl ModelFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_document_type(document_type: DocumentType) -> Self {
        Self {
            document_type: Some(document_type),
            ..Self::default()
        }
    }

    pub fn with_statuses(mut self, statuses: &[ModelStatus]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn completed_only(mut self) -> Self {
        self.training_completed = Some(true);
        self
    }

    pub fn matches(&self, record: &ModelRecord) -> bool {
        self.document_type
            .as_ref()
            .map(|dt| record.document_type == *dt)
            .unwrap_or(true)
            && (self.statuses.is_empty() || self.statuses.contains(&record.status))
            && self
                .training_completed
                .map(|c| record.training_completed == c)
                .unwrap_or(true)
    }
}

/// Outcome of a promotion transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionReceipt {
    /// The candidate after promotion
    pub promoted: ModelRecord,
    /// Records that lost the production flag in the same transaction
    pub demoted: Vec<ModelId>,
}

/// Model and evaluation persistence.
///
/// Guarantees:
/// - `record_usage` is atomic per record; concurrent calls never lose increments.
/// - `promote` runs as one transaction scoped to the candidate's document type:
///   after any number of concurrent promotions exactly one record of that type
///   has `is_production == true`.
/// - Records are never deleted; `archive` is the terminal state.
/// - Listings are ordered by `created_at`, then id.
#[async_trait]
pub trait ModelRepository: Send + Sync {
    /// Insert a new model record. Fails with `DuplicateModel` if the id exists.
    async fn insert_model(&self, record: ModelRecord) -> StorageResult<()>;

    /// Retrieve a model by id. Returns `StorageError::ModelNotFound` if absent.
    async fn get_model(&self, id: &ModelId) -> StorageResult<ModelRecord>;

    /// List models matching the filter.
    async fn list_models(&self, filter: &ModelFilter) -> StorageResult<Vec<ModelRecord>>;

    /// All `active` models carrying this version label, optionally restricted
    /// to one document type.
    async fn find_active_by_version(
        &self,
        version: &str,
        document_type: Option<&DocumentType>,
    ) -> StorageResult<Vec<ModelRecord>>;

    /// The serving production model (`is_production` and `active`) for a type.
    async fn find_production(
        &self,
        document_type: &DocumentType,
    ) -> StorageResult<Option<ModelRecord>>;

    /// Make a document type known even before any model exists for it.
    async fn register_document_type(&self, document_type: DocumentType) -> StorageResult<()>;

    /// Registered document types plus every type that has a model, sorted.
    async fn list_document_types(&self) -> StorageResult<Vec<DocumentType>>;

    /// Apply one successful inference to the record and return the result.
    async fn record_usage(
        &self,
        id: &ModelId,
        elapsed_secs: f64,
        at: DateTime<Utc>,
    ) -> StorageResult<ModelRecord>;

    /// Demote every production record of the candidate's type and promote the
    /// candidate, in one transaction.
    async fn promote(
        &self,
        id: &ModelId,
        promoted_by: Option<&str>,
        at: DateTime<Utc>,
    ) -> StorageResult<PromotionReceipt>;

    /// Move a non-production model to `archived`.
    async fn archive(&self, id: &ModelId) -> StorageResult<ModelRecord>;

    /// Store an evaluation for an existing model.
    async fn add_evaluation(&self, evaluation: EvaluationRecord) -> StorageResult<()>;

    /// All evaluations of a model, oldest first.
    async fn list_evaluations(&self, id: &ModelId) -> StorageResult<Vec<EvaluationRecord>>;
}
