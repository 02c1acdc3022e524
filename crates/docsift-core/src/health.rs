//! Production coverage and usage health.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use docsift_state::{DocumentType, ModelFilter, ModelId, ModelRecord, ModelRepository};
use serde::{Deserialize, Serialize};

use crate::ab_test::AbTestCoordinator;
use crate::cache::{CacheOccupancy, ModelCache};
use crate::clock::Clock;
use crate::error::Result;

const TOP_USED_LIMIT: usize = 10;
const RECENT_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallStatus {
    Healthy,
    Degraded,
}

impl OverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OverallStatus::Healthy => "healthy",
            OverallStatus::Degraded => "degraded",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTypeHealth {
    pub has_production_model: bool,
    pub model_id: Option<ModelId>,
    pub model_version: Option<String>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub inference_count: u64,
    /// Production model unused for longer than the staleness threshold
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub overall_status: OverallStatus,
    pub document_types: BTreeMap<DocumentType, DocumentTypeHealth>,
    pub total_models: usize,
    pub production_models: usize,
    pub cache: CacheOccupancy,
    pub active_ab_tests: usize,
    /// Human-readable findings; staleness entries are advisory only
    pub issues: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsOverview {
    pub total_models: usize,
    pub production_models: usize,
    pub models_created_last_30_days: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTypeAnalytics {
    pub total_models: usize,
    pub has_production_model: bool,
    pub production_model_accuracy: Option<f64>,
    pub total_inferences: u64,
    pub avg_inference_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUsage {
    pub model_id: ModelId,
    pub version: String,
    pub document_type: DocumentType,
    pub inference_count: u64,
    pub accuracy: Option<f64>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&ModelRecord> for ModelUsage {
    fn from(m: &ModelRecord) -> Self {
        Self {
            model_id: m.id,
            version: m.version.clone(),
            document_type: m.document_type.clone(),
            inference_count: m.inference_count,
            accuracy: m.field_accuracy,
            last_used_at: m.last_used_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelAnalytics {
    pub overview: AnalyticsOverview,
    pub by_document_type: BTreeMap<DocumentType, DocumentTypeAnalytics>,
    /// Most-used production models that have served at least once
    pub top_used_models: Vec<ModelUsage>,
}

pub struct HealthMonitor {
    repository: Arc<dyn ModelRepository>,
    cache: Arc<ModelCache>,
    ab_tests: Arc<AbTestCoordinator>,
    clock: Arc<dyn Clock>,
    stale_after: Duration,
}

impl HealthMonitor {
    pub fn new(
        repository: Arc<dyn ModelRepository>,
        cache: Arc<ModelCache>,
        ab_tests: Arc<AbTestCoordinator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repository,
            cache,
            ab_tests,
            clock,
            stale_after: Duration::hours(24),
        }
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Coverage of every known document type plus cache and test state.
    ///
    /// Degraded when any type lacks a serving production model.
    pub async fn report(&self) -> Result<HealthReport> {
        let now = self.clock.now();
        let models = self.repository.list_models(&ModelFilter::all()).await?;
        let document_types = self.repository.list_document_types().await?;

        let mut coverage = BTreeMap::new();
        let mut missing = Vec::new();
        let mut stale = Vec::new();
        for document_type in document_types {
            let production = self.repository.find_production(&document_type).await?;
            let health = match &production {
                Some(model) => {
                    let is_stale = model
                        .last_used_at
                        .map(|at| now - at > self.stale_after)
                        .unwrap_or(false);
                    if is_stale {
                        stale.push(document_type.clone());
                    }
                    DocumentTypeHealth {
                        has_production_model: true,
                        model_id: Some(model.id),
                        model_version: Some(model.version.clone()),
                        last_used_at: model.last_used_at,
                        inference_count: model.inference_count,
                        stale: is_stale,
                    }
                }
                None => {
                    missing.push(document_type.clone());
                    DocumentTypeHealth {
                        has_production_model: false,
                        model_id: None,
                        model_version: None,
                        last_used_at: None,
                        inference_count: 0,
                        stale: false,
                    }
                }
            };
            coverage.insert(document_type, health);
        }

        let overall_status = if missing.is_empty() {
            OverallStatus::Healthy
        } else {
            OverallStatus::Degraded
        };

        let mut issues = Vec::new();
        if overall_status != OverallStatus::Healthy {
            issues.push(format!("Overall status is {}", overall_status.as_str()));
        }
        for document_type in &missing {
            issues.push(format!("No production model for {}", document_type));
        }
        for document_type in &stale {
            issues.push(format!(
                "Model for {} hasn't been used in {}+ hours",
                document_type,
                self.stale_after.num_hours()
            ));
        }

        Ok(HealthReport {
            overall_status,
            document_types: coverage,
            total_models: models.len(),
            production_models: models.iter().filter(|m| m.is_production).count(),
            cache: self.cache.occupancy(),
            active_ab_tests: self.ab_tests.active_count(),
            issues,
            generated_at: now,
        })
    }

    /// Fleet-wide model counts, per-type production figures and the most
    /// used production models.
    pub async fn analytics(&self) -> Result<ModelAnalytics> {
        let now = self.clock.now();
        let models = self.repository.list_models(&ModelFilter::all()).await?;
        let document_types = self.repository.list_document_types().await?;

        let overview = AnalyticsOverview {
            total_models: models.len(),
            production_models: models.iter().filter(|m| m.is_production).count(),
            models_created_last_30_days: models
                .iter()
                .filter(|m| m.created_at >= now - Duration::days(RECENT_WINDOW_DAYS))
                .count(),
        };

        let mut by_document_type = BTreeMap::new();
        for document_type in document_types {
            let of_type: Vec<&ModelRecord> = models
                .iter()
                .filter(|m| m.document_type == document_type)
                .collect();
            let production = of_type.iter().find(|m| m.is_production);
            by_document_type.insert(
                document_type,
                DocumentTypeAnalytics {
                    total_models: of_type.len(),
                    has_production_model: production.is_some(),
                    production_model_accuracy: production.and_then(|m| m.field_accuracy),
                    total_inferences: production.map(|m| m.inference_count).unwrap_or(0),
                    avg_inference_time: production.and_then(|m| m.avg_inference_time),
                },
            );
        }

        let mut used: Vec<&ModelRecord> = models
            .iter()
            .filter(|m| m.is_production && m.last_used_at.is_some())
            .collect();
        used.sort_by(|a, b| b.inference_count.cmp(&a.inference_count).then(a.id.cmp(&b.id)));
        let top_used_models = used
            .into_iter()
            .take(TOP_USED_LIMIT)
            .map(ModelUsage::from)
            .collect();

        Ok(ModelAnalytics {
            overview,
            by_document_type,
            top_used_models,
        })
    }
}
