//! docsift serving control plane
//!
//! Decides which trained model answers an extraction request, keeps loaded
//! predictors in a bounded cache, scores the confidence of extracted fields,
//! promotes candidate models that clear the promotion gates, and splits
//! traffic between production and challenger models.

pub mod ab_test;
pub mod cache;
pub mod clock;
pub mod confidence;
pub mod config;
pub mod control_plane;
pub mod error;
pub mod fakes;
pub mod health;
pub mod inference;
pub mod maintenance;
pub mod metrics;
pub mod obs;
pub mod predictor;
pub mod promotion;
pub mod telemetry;
pub mod validation;

pub use ab_test::{
    user_bucket, AbArm, AbAssignment, AbTestCoordinator, AbTestId, AbTestResults, AbTestStatus,
    ArmResults, RoutedModel, Winner,
};
pub use cache::{CacheOccupancy, ModelCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use confidence::{score_field, ConfidenceReport, ConfidenceScorer};
pub use config::ServingConfig;
pub use control_plane::{ChallengerTest, HealthCheck, ModelSummary, ServingControlPlane};
pub use error::{ErrorKind, ErrorReport, PredictorError, Result, ServingError};
pub use health::{
    AnalyticsOverview, DocumentTypeAnalytics, DocumentTypeHealth, HealthMonitor, HealthReport,
    ModelAnalytics, ModelUsage, OverallStatus,
};
pub use inference::{BatchItem, ExtractionRequest, ExtractionResult, InferenceEngine, ModelStats};
pub use maintenance::{MaintenanceReport, MaintenanceScheduler};
pub use metrics::{MetricsSnapshot, ServingMetrics};
pub use predictor::{Predictor, PredictorLoader};
pub use promotion::{
    PromotionCriteria, PromotionDecision, PromotionEvaluator, PromotionGate, PromotionMetrics,
    PromotionOutcome,
};
pub use validation::{FieldPattern, FieldRule, FieldType, ValidationRuleRegistry, ValidationRuleSet};

pub use docsift_state::{
    DocumentType, EvaluationRecord, ModelFilter, ModelId, ModelRecord, ModelRepository,
    ModelStatus, PromotionReceipt, StorageError,
};

/// Crate version, reported by the daemon at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
