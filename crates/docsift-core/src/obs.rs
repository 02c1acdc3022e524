//! Structured observability hooks for serving lifecycle events.
//!
//! Every event carries an `event = "..."` field so log pipelines can filter
//! on it regardless of the output format chosen in [`crate::telemetry`].
//!
//! - `request_span` tags everything logged while an extraction runs
//! - `emit_*` functions cover model loading, eviction, promotion, A/B tests
//!   and health issues

use docsift_state::{DocumentType, ModelId};
use tracing::{info, warn};

/// Span tagging everything logged while one extraction runs.
///
/// Attach it with `tracing::Instrument` so it follows the request across
/// await points:
///
/// ```ignore
/// engine.run(request).instrument(request_span(&request_id)).await
/// ```
pub fn request_span(request_id: &str) -> tracing::Span {
    tracing::info_span!("docsift.request", request_id = %request_id)
}

pub fn emit_extraction_finished(
    model_id: &ModelId,
    version: &str,
    document_type: &DocumentType,
    elapsed_secs: f64,
    confidence: f64,
    threshold_met: bool,
) {
    info!(
        event = "extraction.finished",
        model_id = %model_id,
        version = %version,
        document_type = %document_type,
        elapsed_secs = elapsed_secs,
        confidence = confidence,
        threshold_met = threshold_met,
    );
}

pub fn emit_extraction_failed(input: &str, error: &dyn std::fmt::Display) {
    warn!(event = "extraction.failed", input = %input, error = %error);
}

pub fn emit_model_loaded(model_id: &ModelId, version: &str, load_secs: f64) {
    info!(
        event = "model.loaded",
        model_id = %model_id,
        version = %version,
        load_secs = load_secs,
    );
}

pub fn emit_model_evicted(model_id: &ModelId) {
    info!(event = "model.evicted", model_id = %model_id);
}

pub fn emit_model_promoted(
    model_id: &ModelId,
    document_type: &DocumentType,
    demoted: usize,
    promoted_by: Option<&str>,
) {
    info!(
        event = "model.promoted",
        model_id = %model_id,
        document_type = %document_type,
        demoted = demoted,
        promoted_by = promoted_by.unwrap_or("system"),
    );
}

pub fn emit_ab_test_started(
    test_id: &str,
    document_type: &DocumentType,
    model_a: &ModelId,
    model_b: &ModelId,
    traffic_split: f64,
) {
    info!(
        event = "ab_test.started",
        test_id = %test_id,
        document_type = %document_type,
        model_a = %model_a,
        model_b = %model_b,
        traffic_split = traffic_split,
    );
}

pub fn emit_ab_test_completed(test_id: &str, winner: &str, rate_a: f64, rate_b: f64) {
    info!(
        event = "ab_test.completed",
        test_id = %test_id,
        winner = %winner,
        success_rate_a = rate_a,
        success_rate_b = rate_b,
    );
}

pub fn emit_health_issues(issues: &[String]) {
    for issue in issues {
        warn!(event = "health.issues", issue = %issue);
    }
}
