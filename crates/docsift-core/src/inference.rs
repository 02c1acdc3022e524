//! Request-time model selection, inference and scoring.
//!
//! [`InferenceEngine::extract`] resolves which model answers a request,
//! fetches its predictor from the [`ModelCache`] (loading it on a miss), runs
//! inference, scores the output and records usage. Nothing is written back
//! unless inference succeeds.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use docsift_state::{DocumentType, ModelId, ModelRecord, ModelRepository};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, Instrument};
use uuid::Uuid;

use crate::ab_test::{AbAssignment, AbTestCoordinator};
use crate::cache::ModelCache;
use crate::clock::Clock;
use crate::confidence::ConfidenceScorer;
use crate::error::{ErrorReport, Result, ServingError};
use crate::metrics::ServingMetrics;
use crate::obs;
use crate::predictor::{Predictor, PredictorLoader};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.5;

/// One document to extract.
///
/// Model selection: an explicit `model_version` wins; otherwise the
/// `document_type` selects a live challenger test or the production model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionRequest {
    pub input: PathBuf,
    pub document_type: Option<DocumentType>,
    pub model_version: Option<String>,
    /// Falls back to the engine default when unset
    pub confidence_threshold: Option<f64>,
    /// Keeps challenger assignment sticky per user
    pub user_id: Option<String>,
}

impl ExtractionRequest {
    pub fn new(input: impl Into<PathBuf>) -> Self {
        Self {
            input: input.into(),
            document_type: None,
            model_version: None,
            confidence_threshold: None,
            user_id: None,
        }
    }

    pub fn for_document_type(mut self, document_type: impl Into<DocumentType>) -> Self {
        self.document_type = Some(document_type.into());
        self
    }

    pub fn with_model_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = Some(version.into());
        self
    }

    pub fn with_confidence_threshold(mut self, threshold: f64) -> Self {
        self.confidence_threshold = Some(threshold);
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub extracted_data: Value,
    pub field_confidence: BTreeMap<String, f64>,
    pub overall_confidence: f64,
    pub threshold_met: bool,
    pub model_id: ModelId,
    pub model_version: String,
    pub document_type: DocumentType,
    /// Wall time of the inference call, in seconds
    pub elapsed_secs: f64,
    /// Stored evaluation accuracy of the model, 0.0 when never evaluated
    pub model_accuracy: f64,
    pub validation_errors: Vec<String>,
    /// Set when a challenger test picked the model
    pub ab_test: Option<AbAssignment>,
}

/// Outcome of one item in [`InferenceEngine::batch_extract`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchItem {
    Extracted(Box<ExtractionResult>),
    Failed {
        input: PathBuf,
        document_type: Option<DocumentType>,
        error: ErrorReport,
    },
}

impl BatchItem {
    pub fn is_extracted(&self) -> bool {
        matches!(self, BatchItem::Extracted(_))
    }
}

/// In-process usage statistics for one model since startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelStats {
    pub model_id: ModelId,
    pub total_inferences: u64,
    /// Running mean over every inference
    pub avg_inference_time: f64,
    pub avg_confidence: f64,
    pub last_updated: DateTime<Utc>,
}

impl ModelStats {
    fn new(model_id: ModelId, at: DateTime<Utc>) -> Self {
        Self {
            model_id,
            total_inferences: 0,
            avg_inference_time: 0.0,
            avg_confidence: 0.0,
            last_updated: at,
        }
    }

    fn observe(&mut self, elapsed_secs: f64, confidence: f64, at: DateTime<Utc>) {
        self.total_inferences += 1;
        let n = self.total_inferences as f64;
        self.avg_inference_time += (elapsed_secs - self.avg_inference_time) / n;
        self.avg_confidence += (confidence - self.avg_confidence) / n;
        self.last_updated = at;
    }
}

pub struct InferenceEngine {
    repository: Arc<dyn ModelRepository>,
    loader: Arc<dyn PredictorLoader>,
    cache: Arc<ModelCache>,
    scorer: ConfidenceScorer,
    ab_tests: Arc<AbTestCoordinator>,
    clock: Arc<dyn Clock>,
    metrics: Arc<ServingMetrics>,
    default_threshold: f64,
    stats: Mutex<HashMap<ModelId, ModelStats>>,
}

impl InferenceEngine {
    pub fn new(
        repository: Arc<dyn ModelRepository>,
        loader: Arc<dyn PredictorLoader>,
        cache: Arc<ModelCache>,
        scorer: ConfidenceScorer,
        ab_tests: Arc<AbTestCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            loader,
            cache,
            scorer,
            ab_tests,
            clock,
            metrics: Arc::new(ServingMetrics::new()),
            default_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ServingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_default_threshold(mut self, threshold: f64) -> Self {
        self.default_threshold = threshold;
        self
    }

    pub fn cache(&self) -> &ModelCache {
        &self.cache
    }

    fn stats(&self) -> MutexGuard<'_, HashMap<ModelId, ModelStats>> {
        self.stats.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Extract one document.
    pub async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionResult> {
        let request_id = Uuid::new_v4().to_string();
        let input = request.input.display().to_string();
        let outcome = self
            .run(request)
            .instrument(obs::request_span(&request_id))
            .await;

        match &outcome {
            Ok(_) => self.metrics.inc_extractions_succeeded(),
            Err(e) => {
                self.metrics.inc_extractions_failed();
                obs::emit_extraction_failed(&input, e);
            }
        }
        outcome
    }

    async fn run(&self, request: ExtractionRequest) -> Result<ExtractionResult> {
        let (model, assignment) = self.resolve(&request).await?;
        if assignment.is_some() {
            self.metrics.inc_ab_requests_routed();
        }
        let predictor = self.predictor_for(&model).await?;

        let started = Instant::now();
        let extracted = predictor
            .infer(&request.input, &model.document_type)
            .await
            .map_err(|source| ServingError::InferenceFailed {
                model_id: model.id,
                source,
            })?;
        let elapsed_secs = started.elapsed().as_secs_f64();

        let report = self.scorer.score_result(&extracted, &model.document_type);
        let validation_errors = self.scorer.validate(&extracted, &model.document_type);
        let threshold = request
            .confidence_threshold
            .unwrap_or(self.default_threshold);
        let threshold_met = report.overall >= threshold;

        let now = self.clock.now();
        self.repository
            .record_usage(&model.id, elapsed_secs, now)
            .await?;
        self.stats()
            .entry(model.id)
            .or_insert_with(|| ModelStats::new(model.id, now))
            .observe(elapsed_secs, report.overall, now);

        obs::emit_extraction_finished(
            &model.id,
            &model.version,
            &model.document_type,
            elapsed_secs,
            report.overall,
            threshold_met,
        );

        Ok(ExtractionResult {
            extracted_data: extracted,
            field_confidence: report.field_scores,
            overall_confidence: report.overall,
            threshold_met,
            model_id: model.id,
            model_version: model.version,
            document_type: model.document_type,
            elapsed_secs,
            model_accuracy: model.field_accuracy.unwrap_or(0.0),
            validation_errors,
            ab_test: assignment,
        })
    }

    /// Pick the model that answers `request`.
    async fn resolve(
        &self,
        request: &ExtractionRequest,
    ) -> Result<(ModelRecord, Option<AbAssignment>)> {
        if let Some(version) = &request.model_version {
            let mut matches = self
                .repository
                .find_active_by_version(version, request.document_type.as_ref())
                .await?;
            return match matches.len() {
                0 => Err(ServingError::ModelNotFound {
                    version: version.clone(),
                }),
                1 => Ok((matches.remove(0), None)),
                count => Err(ServingError::AmbiguousModelVersion {
                    version: version.clone(),
                    count,
                }),
            };
        }

        let Some(document_type) = &request.document_type else {
            return Err(ServingError::MissingSelector);
        };
        let routed = self
            .ab_tests
            .route_request(document_type, request.user_id.as_deref())
            .await?;
        Ok((routed.model, routed.assignment))
    }

    /// Cached predictor for `model`, loading it on a miss.
    ///
    /// The cache lock is not held during the load, so two concurrent misses
    /// for the same model may both load; the later `put` wins.
    async fn predictor_for(&self, model: &ModelRecord) -> Result<Arc<dyn Predictor>> {
        if let Some(handle) = self.cache.get(&model.id) {
            return Ok(handle);
        }

        let started = Instant::now();
        let handle = self
            .loader
            .load(&model.model_path)
            .await
            .map_err(|source| ServingError::PredictorLoadFailed {
                model_id: model.id,
                source,
            })?;
        obs::emit_model_loaded(&model.id, &model.version, started.elapsed().as_secs_f64());

        self.cache.put(model.id, Arc::clone(&handle));
        Ok(handle)
    }

    /// Extract many documents, `batch_size` at a time, isolating failures.
    ///
    /// `document_types[i]` applies to `inputs[i]`; a shorter list leaves the
    /// remaining inputs without a type.
    pub async fn batch_extract(
        &self,
        inputs: &[PathBuf],
        document_types: Option<&[DocumentType]>,
        batch_size: usize,
    ) -> Vec<BatchItem> {
        let batch_size = batch_size.max(1);
        let mut items = Vec::with_capacity(inputs.len());

        for (batch_index, chunk) in inputs.chunks(batch_size).enumerate() {
            debug!(batch = batch_index, size = chunk.len(), "processing batch");
            for (offset, input) in chunk.iter().enumerate() {
                let index = batch_index * batch_size + offset;
                let document_type = document_types.and_then(|types| types.get(index)).cloned();

                let mut request = ExtractionRequest::new(input.clone());
                request.document_type = document_type.clone();

                let item = match self.extract(request).await {
                    Ok(result) => BatchItem::Extracted(Box::new(result)),
                    Err(e) => BatchItem::Failed {
                        input: input.clone(),
                        document_type,
                        error: e.report(),
                    },
                };
                items.push(item);
            }
        }
        items
    }

    /// Statistics for one model; `None` if it has not served since startup.
    pub fn model_stats(&self, model_id: &ModelId) -> Option<ModelStats> {
        self.stats().get(model_id).cloned()
    }

    /// Statistics for every model that has served since startup.
    pub fn all_model_stats(&self) -> Vec<ModelStats> {
        let mut all: Vec<ModelStats> = self.stats().values().cloned().collect();
        all.sort_by_key(|s| s.model_id);
        all
    }
}
