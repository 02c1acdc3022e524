//! Promotion gates for candidate models.
//!
//! [`PromotionEvaluator::evaluate`] runs a candidate's evaluation history
//! through an ordered list of gates and stops at the first one that fails.
//! Promotion itself is delegated to the repository's `promote` transaction,
//! which demotes the previous production model in the same step.

use std::sync::Arc;

use docsift_state::{
    EvaluationRecord, ModelFilter, ModelId, ModelRecord, ModelRepository, ModelStatus,
    PromotionReceipt,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::clock::Clock;
use crate::error::Result;
use crate::metrics::ServingMetrics;
use crate::obs;

/// Thresholds a candidate must clear before it can replace production.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionCriteria {
    pub min_accuracy: f64,
    pub min_evaluations: usize,
    /// Required accuracy gain over the current production model
    pub improvement_threshold: f64,
    pub confidence_threshold: f64,
}

impl Default for PromotionCriteria {
    fn default() -> Self {
        Self {
            min_accuracy: 0.85,
            min_evaluations: 10,
            improvement_threshold: 0.05,
            confidence_threshold: 0.8,
        }
    }
}

/// The gate that stopped a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromotionGate {
    MinEvaluations,
    MinAccuracy,
    MinConfidence,
    Improvement,
}

/// Metrics gathered up to the point evaluation stopped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromotionMetrics {
    pub evaluation_count: usize,
    pub avg_accuracy: Option<f64>,
    pub avg_confidence: Option<f64>,
    pub current_production_accuracy: Option<f64>,
    pub improvement: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromotionDecision {
    pub model_id: ModelId,
    pub promotable: bool,
    pub reasons: Vec<String>,
    pub metrics: PromotionMetrics,
    pub failed_gate: Option<PromotionGate>,
}

impl PromotionDecision {
    fn new(model_id: ModelId) -> Self {
        Self {
            model_id,
            promotable: false,
            reasons: Vec::new(),
            metrics: PromotionMetrics::default(),
            failed_gate: None,
        }
    }

    fn reject(mut self, gate: PromotionGate, reason: String) -> Self {
        self.failed_gate = Some(gate);
        self.reasons.push(reason);
        self
    }
}

/// Per-candidate result of [`PromotionEvaluator::auto_promote`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PromotionOutcome {
    Promoted {
        model_id: ModelId,
        version: String,
        document_type: String,
        metrics: PromotionMetrics,
    },
    NotPromoted {
        model_id: ModelId,
        version: String,
        document_type: String,
        reasons: Vec<String>,
        metrics: PromotionMetrics,
    },
    Error {
        model_id: ModelId,
        message: String,
    },
}

impl PromotionOutcome {
    pub fn model_id(&self) -> ModelId {
        match self {
            PromotionOutcome::Promoted { model_id, .. }
            | PromotionOutcome::NotPromoted { model_id, .. }
            | PromotionOutcome::Error { model_id, .. } => *model_id,
        }
    }

    pub fn is_promoted(&self) -> bool {
        matches!(self, PromotionOutcome::Promoted { .. })
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    sum / count.max(1) as f64
}

fn avg_accuracy(evaluations: &[EvaluationRecord]) -> f64 {
    mean(evaluations.iter().map(EvaluationRecord::accuracy))
}

fn avg_confidence(evaluations: &[EvaluationRecord]) -> f64 {
    mean(evaluations.iter().map(EvaluationRecord::confidence_or_default))
}

pub struct PromotionEvaluator {
    repository: Arc<dyn ModelRepository>,
    clock: Arc<dyn Clock>,
    criteria: PromotionCriteria,
    metrics: Arc<ServingMetrics>,
}

impl PromotionEvaluator {
    pub fn new(
        repository: Arc<dyn ModelRepository>,
        clock: Arc<dyn Clock>,
        criteria: PromotionCriteria,
    ) -> Self {
        Self {
            repository,
            clock,
            criteria,
            metrics: Arc::new(ServingMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ServingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn criteria(&self) -> &PromotionCriteria {
        &self.criteria
    }

    /// Decide whether `candidate` may replace the production model.
    ///
    /// Gates, in order:
    /// 1. at least `min_evaluations` evaluations
    /// 2. mean accuracy and mean confidence above their minimums
    /// 3. accuracy gain over the current production model, skipped when
    ///    there is no production model or it has no evaluations
    pub async fn evaluate(&self, candidate: &ModelRecord) -> Result<PromotionDecision> {
        let c = &self.criteria;
        let mut decision = PromotionDecision::new(candidate.id);

        let evaluations = self.repository.list_evaluations(&candidate.id).await?;
        decision.metrics.evaluation_count = evaluations.len();
        if evaluations.len() < c.min_evaluations {
            return Ok(decision.reject(
                PromotionGate::MinEvaluations,
                format!(
                    "Insufficient evaluations: {} < {}",
                    evaluations.len(),
                    c.min_evaluations
                ),
            ));
        }

        let accuracy = avg_accuracy(&evaluations);
        let confidence = avg_confidence(&evaluations);
        decision.metrics.avg_accuracy = Some(accuracy);
        decision.metrics.avg_confidence = Some(confidence);

        if accuracy < c.min_accuracy {
            return Ok(decision.reject(
                PromotionGate::MinAccuracy,
                format!("Accuracy too low: {:.3} < {}", accuracy, c.min_accuracy),
            ));
        }
        if confidence < c.confidence_threshold {
            return Ok(decision.reject(
                PromotionGate::MinConfidence,
                format!(
                    "Confidence too low: {:.3} < {}",
                    confidence, c.confidence_threshold
                ),
            ));
        }

        let production = self
            .repository
            .find_production(&candidate.document_type)
            .await?
            .filter(|p| p.id != candidate.id);
        if let Some(production) = production {
            let production_evaluations = self.repository.list_evaluations(&production.id).await?;
            if !production_evaluations.is_empty() {
                let production_accuracy = avg_accuracy(&production_evaluations);
                let improvement = accuracy - production_accuracy;
                decision.metrics.current_production_accuracy = Some(production_accuracy);
                decision.metrics.improvement = Some(improvement);

                if improvement < c.improvement_threshold {
                    return Ok(decision.reject(
                        PromotionGate::Improvement,
                        format!(
                            "Insufficient improvement: {:.3} < {}",
                            improvement, c.improvement_threshold
                        ),
                    ));
                }
            }
        }

        decision.promotable = true;
        decision
            .reasons
            .push("Model meets all promotion criteria".to_string());
        Ok(decision)
    }

    /// Make `candidate` the production model for its document type.
    pub async fn promote(
        &self,
        candidate: &ModelId,
        promoted_by: Option<&str>,
    ) -> Result<PromotionReceipt> {
        let receipt = self
            .repository
            .promote(candidate, promoted_by, self.clock.now())
            .await?;
        self.metrics.inc_promotions();
        obs::emit_model_promoted(
            &receipt.promoted.id,
            &receipt.promoted.document_type,
            receipt.demoted.len(),
            promoted_by,
        );
        Ok(receipt)
    }

    /// Evaluate every completed `testing`/`inactive` model, oldest first, and
    /// promote those that pass.
    ///
    /// A failure on one candidate is reported in its outcome and does not
    /// stop the run. Only listing the candidates can fail the whole call.
    pub async fn auto_promote(&self) -> Result<Vec<PromotionOutcome>> {
        let filter = ModelFilter::all()
            .with_statuses(&[ModelStatus::Testing, ModelStatus::Inactive])
            .completed_only();
        let candidates = self.repository.list_models(&filter).await?;

        let mut outcomes = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let outcome = match self.evaluate_and_promote(&candidate).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(model_id = %candidate.id, error = %e, "auto-promotion failed");
                    PromotionOutcome::Error {
                        model_id: candidate.id,
                        message: e.to_string(),
                    }
                }
            };
            outcomes.push(outcome);
        }

        let promoted = outcomes.iter().filter(|o| o.is_promoted()).count();
        info!(
            candidates = outcomes.len(),
            promoted = promoted,
            "auto-promotion pass finished"
        );
        Ok(outcomes)
    }

    async fn evaluate_and_promote(&self, candidate: &ModelRecord) -> Result<PromotionOutcome> {
        let decision = self.evaluate(candidate).await?;
        if !decision.promotable {
            return Ok(PromotionOutcome::NotPromoted {
                model_id: candidate.id,
                version: candidate.version.clone(),
                document_type: candidate.document_type.to_string(),
                reasons: decision.reasons,
                metrics: decision.metrics,
            });
        }

        self.promote(&candidate.id, Some("auto_promotion")).await?;
        Ok(PromotionOutcome::Promoted {
            model_id: candidate.id,
            version: candidate.version.clone(),
            document_type: candidate.document_type.to_string(),
            metrics: decision.metrics,
        })
    }

    /// Retire a non-production model.
    pub async fn archive(&self, model_id: &ModelId) -> Result<ModelRecord> {
        let archived = self.repository.archive(model_id).await?;
        info!(model_id = %model_id, version = %archived.version, "model archived");
        Ok(archived)
    }
}
