//! Record definitions for the model registry
//!
//! Records:
//! - models: Trained model versions with deployment and usage state
//! - evaluations: Per-document scoring results for a model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Opaque unique key of a trained model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(pub Uuid);

impl ModelId {
    /// Generate a new random ModelId
    pub fn new() -> Self {
        ModelId(Uuid::new_v4())
    }
}

impl Default for ModelId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ModelId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(ModelId(Uuid::parse_str(s)?))
    }
}

/// Classification key that decides which fields and rules apply to a document
/// (e.g. `invoice`, `bank_statement`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentType(String);

impl DocumentType {
    pub fn new(name: impl Into<String>) -> Self {
        DocumentType(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DocumentType {
    fn from(s: &str) -> Self {
        DocumentType(s.to_string())
    }
}

impl From<String> for DocumentType {
    fn from(s: String) -> Self {
        DocumentType(s)
    }
}

/// Deployment status of a trained model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Testing,
    Inactive,
    Active,
    Archived,
}

impl ModelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelStatus::Testing => "testing",
            ModelStatus::Inactive => "inactive",
            ModelStatus::Active => "active",
            ModelStatus::Archived => "archived",
        }
    }
}

impl std::fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A trained model version.
///
/// # Invariants
///
/// For a given `document_type` at most one record has `is_production == true`.
/// Only the repository's `promote` transaction may set that flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub id: ModelId,
    /// Version label, unique per document type
    pub version: String,
    /// Human-readable model name
    pub name: String,
    pub document_type: DocumentType,
    /// Directory the predictor loader reads weights and processor from
    pub model_path: PathBuf,
    pub status: ModelStatus,
    pub is_production: bool,
    /// Fraction of correctly extracted fields from the last evaluation run
    pub field_accuracy: Option<f64>,
    /// Fraction of documents whose full JSON matched the ground truth
    pub json_exact_match: Option<f64>,
    /// Fraction of table rows recovered
    pub row_recall: Option<f64>,
    /// Blended inference time in seconds (see [`ModelRecord::record_inference`])
    pub avg_inference_time: Option<f64>,
    pub inference_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub promoted_by: Option<String>,
    /// Whether the training job that produced this model finished successfully
    pub training_completed: bool,
    pub created_at: DateTime<Utc>,
}

impl ModelRecord {
    /// Create a freshly trained model in `testing` status.
    pub fn new(
        version: impl Into<String>,
        document_type: impl Into<DocumentType>,
        model_path: impl Into<PathBuf>,
    ) -> Self {
        let version = version.into();
        let document_type = document_type.into();
        Self {
            id: ModelId::new(),
            name: format!("{}-{}", document_type, version),
            version,
            document_type,
            model_path: model_path.into(),
            status: ModelStatus::Testing,
            is_production: false,
            field_accuracy: None,
            json_exact_match: None,
            row_recall: None,
            avg_inference_time: None,
            inference_count: 0,
            last_used_at: None,
            promoted_at: None,
            promoted_by: None,
            training_completed: true,
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: ModelStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_field_accuracy(mut self, accuracy: f64) -> Self {
        self.field_accuracy = Some(accuracy);
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_training_completed(mut self, completed: bool) -> Self {
        self.training_completed = completed;
        self
    }

    /// Mark this record as the serving production model.
    ///
    /// Intended for seeding a repository; live transitions go through
    /// [`ModelRepository::promote`](crate::ModelRepository::promote).
    pub fn into_production(mut self) -> Self {
        self.status = ModelStatus::Active;
        self.is_production = true;
        self
    }

    /// Whether this record is the one serving live traffic for its type.
    pub fn is_serving(&self) -> bool {
        self.is_production && self.status == ModelStatus::Active
    }

    /// Apply one successful inference to the usage fields.
    ///
    /// `avg_inference_time` is a two-sample blend of the previous value and
    /// the new sample, not a true moving average. Existing dashboards read
    /// this exact formula.
    pub fn record_inference(&mut self, elapsed_secs: f64, at: DateTime<Utc>) {
        self.inference_count += 1;
        self.last_used_at = Some(at);
        self.avg_inference_time = Some(match self.avg_inference_time {
            Some(previous) => (previous + elapsed_secs) / 2.0,
            None => elapsed_secs,
        });
    }
}

/// Scoring result of one model prediction against ground truth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub model_id: ModelId,
    pub field_matches: u32,
    pub total_fields: u32,
    pub is_exact_match: bool,
    /// Inference time in seconds
    pub inference_time: f64,
    pub confidence_score: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl EvaluationRecord {
    pub fn new(model_id: ModelId, field_matches: u32, total_fields: u32) -> Self {
        Self {
            model_id,
            field_matches,
            total_fields,
            is_exact_match: total_fields > 0 && field_matches == total_fields,
            inference_time: 0.0,
            confidence_score: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = Some(confidence);
        self
    }

    /// Matched fraction of fields; an evaluation with no fields counts as 0.
    pub fn accuracy(&self) -> f64 {
        f64::from(self.field_matches) / f64::from(self.total_fields.max(1))
    }

    /// Confidence score, or 0.5 when the evaluator did not record one.
    pub fn confidence_or_default(&self) -> f64 {
        self.confidence_score.unwrap_or(0.5)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_inference_blends_two_samples() {
        let mut model = ModelRecord::new("1.0.0", "invoice", "/models/invoice/1.0.0");
        let t0 = Utc::now();

        model.record_inference(2.0, t0);
        assert_eq!(model.inference_count, 1);
        assert_eq!(model.avg_inference_time, Some(2.0));
        assert_eq!(model.last_used_at, Some(t0));

        model.record_inference(4.0, t0);
        model.record_inference(1.0, t0);
        assert_eq!(model.inference_count, 3);
        // ((2 + 4) / 2 + 1) / 2
        assert_eq!(model.avg_inference_time, Some(2.0));
    }

    #[test]
    fn evaluation_accuracy_guards_zero_fields() {
        let id = ModelId::new();
        assert_eq!(EvaluationRecord::new(id, 0, 0).accuracy(), 0.0);
        assert_eq!(EvaluationRecord::new(id, 3, 4).accuracy(), 0.75);
        assert_eq!(EvaluationRecord::new(id, 3, 4).confidence_or_default(), 0.5);
        assert_eq!(
            EvaluationRecord::new(id, 3, 4)
                .with_confidence(0.9)
                .confidence_or_default(),
            0.9
        );
    }

    #[test]
    fn model_status_serializes_lowercase() {
        let json = serde_json::to_string(&ModelStatus::Archived).expect("serialize");
        assert_eq!(json, "\"archived\"");
        let parsed: ModelStatus = serde_json::from_str("\"testing\"").expect("deserialize");
        assert_eq!(parsed, ModelStatus::Testing);
    }

    #[test]
    fn model_id_parses_from_display() {
        let id = ModelId::new();
        let parsed: ModelId = id.to_string().parse().expect("parse");
        assert_eq!(parsed, id);
    }
}
