//! The operations exposed to the layer above the control plane.
//!
//! [`ServingControlPlane`] wires the cache, scorer, inference engine,
//! promotion evaluator, challenger tests and health monitor around one
//! repository, one predictor loader and one clock. It holds no global state;
//! construct one per process and share it behind an `Arc`.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use docsift_state::{DocumentType, ModelId, ModelRecord, ModelRepository, PromotionReceipt};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ab_test::{AbTestCoordinator, AbTestId, AbTestResults};
use crate::cache::ModelCache;
use crate::clock::Clock;
use crate::config::ServingConfig;
use crate::confidence::ConfidenceScorer;
use crate::error::{Result, ServingError};
use crate::health::{HealthMonitor, HealthReport, ModelAnalytics};
use crate::inference::{BatchItem, ExtractionRequest, ExtractionResult, InferenceEngine, ModelStats};
use crate::metrics::ServingMetrics;
use crate::obs;
use crate::predictor::PredictorLoader;
use crate::promotion::{PromotionDecision, PromotionEvaluator, PromotionOutcome};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub id: ModelId,
    pub version: String,
}

impl From<&ModelRecord> for ModelSummary {
    fn from(m: &ModelRecord) -> Self {
        Self {
            id: m.id,
            version: m.version.clone(),
        }
    }
}

/// A challenger test started against the current production model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChallengerTest {
    pub test_id: AbTestId,
    pub document_type: DocumentType,
    pub production_model: ModelSummary,
    pub challenger_model: ModelSummary,
    pub traffic_split: f64,
    pub duration_days: i64,
}

/// Result of one health monitoring pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub report: HealthReport,
    /// Tests completed during this pass because their end time had passed
    pub expired_tests: Vec<AbTestResults>,
    pub checked_at: DateTime<Utc>,
}

pub struct ServingControlPlane {
    config: ServingConfig,
    repository: Arc<dyn ModelRepository>,
    clock: Arc<dyn Clock>,
    metrics: Arc<ServingMetrics>,
    ab_tests: Arc<AbTestCoordinator>,
    engine: InferenceEngine,
    promotion: PromotionEvaluator,
    health: HealthMonitor,
}

impl ServingControlPlane {
    pub fn new(
        config: ServingConfig,
        repository: Arc<dyn ModelRepository>,
        loader: Arc<dyn PredictorLoader>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let metrics = Arc::new(ServingMetrics::new());
        let cache = Arc::new(ModelCache::new(config.cache_capacity));
        let scorer = ConfidenceScorer::new(Arc::new(config.rule_registry()));
        let ab_tests = Arc::new(AbTestCoordinator::new(
            Arc::clone(&repository),
            Arc::clone(&clock),
        ));

        let engine = InferenceEngine::new(
            Arc::clone(&repository),
            loader,
            Arc::clone(&cache),
            scorer,
            Arc::clone(&ab_tests),
            Arc::clone(&clock),
        )
        .with_metrics(Arc::clone(&metrics))
        .with_default_threshold(config.default_confidence_threshold);

        let promotion = PromotionEvaluator::new(
            Arc::clone(&repository),
            Arc::clone(&clock),
            config.promotion.clone(),
        )
        .with_metrics(Arc::clone(&metrics));

        let health = HealthMonitor::new(
            Arc::clone(&repository),
            cache,
            Arc::clone(&ab_tests),
            Arc::clone(&clock),
        )
        .with_stale_after(config.stale_after());

        Self {
            config,
            repository,
            clock,
            metrics,
            ab_tests,
            engine,
            promotion,
            health,
        }
    }

    pub fn config(&self) -> &ServingConfig {
        &self.config
    }

    pub fn metrics(&self) -> &ServingMetrics {
        &self.metrics
    }

    pub fn cache(&self) -> &ModelCache {
        self.engine.cache()
    }

    pub async fn extract(&self, request: ExtractionRequest) -> Result<ExtractionResult> {
        self.engine.extract(request).await
    }

    /// Batch extraction; `batch_size` defaults to the configured size.
    pub async fn batch_extract(
        &self,
        inputs: &[PathBuf],
        document_types: Option<&[DocumentType]>,
        batch_size: Option<usize>,
    ) -> Vec<BatchItem> {
        let batch_size = batch_size.unwrap_or(self.config.batch_size);
        self.engine
            .batch_extract(inputs, document_types, batch_size)
            .await
    }

    pub fn model_stats(&self, model_id: &ModelId) -> Option<ModelStats> {
        self.engine.model_stats(model_id)
    }

    pub fn all_model_stats(&self) -> Vec<ModelStats> {
        self.engine.all_model_stats()
    }

    pub async fn health_report(&self) -> Result<HealthReport> {
        self.health.report().await
    }

    pub async fn analytics(&self) -> Result<ModelAnalytics> {
        self.health.analytics().await
    }

    /// Route part of `document_type`'s traffic to `challenger_id`.
    ///
    /// Split and duration default to the configured challenger settings.
    pub async fn create_challenger_test(
        &self,
        document_type: &DocumentType,
        challenger_id: &ModelId,
        traffic_split: Option<f64>,
        duration_days: Option<i64>,
    ) -> Result<ChallengerTest> {
        let traffic_split = traffic_split.unwrap_or(self.config.challenger_traffic_split);
        let duration_days = duration_days.unwrap_or(self.config.challenger_duration_days);

        let duration = chrono::Duration::try_days(duration_days).ok_or_else(|| {
            ServingError::InvalidTestDuration(format!("{} days is out of range", duration_days))
        })?;

        let production = self
            .repository
            .find_production(document_type)
            .await?
            .ok_or_else(|| ServingError::NoProductionModel(document_type.clone()))?;
        let challenger = self.repository.get_model(challenger_id).await?;
        if challenger.document_type != *document_type {
            return Err(ServingError::DocumentTypeMismatch {
                expected: document_type.clone(),
                challenger: challenger.document_type,
            });
        }

        let test_id = self
            .ab_tests
            .start(
                &production.id,
                &challenger.id,
                traffic_split,
                duration,
            )
            .await?;

        Ok(ChallengerTest {
            test_id,
            document_type: document_type.clone(),
            production_model: ModelSummary::from(&production),
            challenger_model: ModelSummary::from(&challenger),
            traffic_split,
            duration_days,
        })
    }

    pub fn test_results(&self, test_id: &AbTestId) -> Result<AbTestResults> {
        self.ab_tests.results(test_id)
    }

    pub fn record_test_result(&self, test_id: &AbTestId, model_id: &ModelId, success: bool) {
        self.ab_tests.record_result(test_id, model_id, success)
    }

    pub fn close_test(&self, test_id: &AbTestId) -> Result<AbTestResults> {
        self.ab_tests.close(test_id)
    }

    pub fn list_tests(&self) -> Vec<AbTestResults> {
        self.ab_tests.list()
    }

    pub async fn evaluate_model(&self, model_id: &ModelId) -> Result<PromotionDecision> {
        let candidate = self.repository.get_model(model_id).await?;
        self.promotion.evaluate(&candidate).await
    }

    /// Promote without evaluating; for operators overriding the gates.
    pub async fn promote(
        &self,
        model_id: &ModelId,
        promoted_by: Option<&str>,
    ) -> Result<PromotionReceipt> {
        self.promotion.promote(model_id, promoted_by).await
    }

    pub async fn auto_promote(&self) -> Result<Vec<PromotionOutcome>> {
        self.promotion.auto_promote().await
    }

    /// Archive a model and drop its cached predictor.
    pub async fn archive(&self, model_id: &ModelId) -> Result<ModelRecord> {
        let archived = self.promotion.archive(model_id).await?;
        self.cache().invalidate(model_id);
        Ok(archived)
    }

    /// Health report, expiry of finished challenger tests, and a warning
    /// for every issue found.
    pub async fn monitor_health(&self) -> Result<HealthCheck> {
        let report = self.health.report().await?;
        let checked_at = self.clock.now();
        let expired_tests = self.ab_tests.expire_stale_tests(checked_at);

        if report.issues.is_empty() {
            info!(
                status = report.overall_status.as_str(),
                expired_tests = expired_tests.len(),
                "health check passed"
            );
        } else {
            obs::emit_health_issues(&report.issues);
        }

        Ok(HealthCheck {
            report,
            expired_tests,
            checked_at,
        })
    }
}
