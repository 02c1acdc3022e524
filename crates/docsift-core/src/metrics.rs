//! Atomic serving counters.
//!
//! A [`ServingMetrics`] instance lives inside the control plane. Counters are
//! bumped at the call site; [`ServingMetrics::flush`] emits their values as a
//! single `info!` event, typically once per maintenance tick.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct ServingMetrics {
    extractions_succeeded: AtomicU64,
    extractions_failed: AtomicU64,
    promotions: AtomicU64,
    ab_requests_routed: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub extractions_succeeded: u64,
    pub extractions_failed: u64,
    pub promotions: u64,
    pub ab_requests_routed: u64,
}

impl ServingMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_extractions_succeeded(&self) {
        self.extractions_succeeded.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "extractions_succeeded", "counter incremented");
    }

    pub fn inc_extractions_failed(&self) {
        self.extractions_failed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "extractions_failed", "counter incremented");
    }

    pub fn inc_promotions(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "promotions", "counter incremented");
    }

    pub fn inc_ab_requests_routed(&self) {
        self.ab_requests_routed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "ab_requests_routed", "counter incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            extractions_succeeded: self.extractions_succeeded.load(Ordering::Relaxed),
            extractions_failed: self.extractions_failed.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            ab_requests_routed: self.ab_requests_routed.load(Ordering::Relaxed),
        }
    }

    /// Emit all counters as one `info!` event.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            extractions_succeeded = s.extractions_succeeded,
            extractions_failed = s.extractions_failed,
            promotions = s.promotions,
            ab_requests_routed = s.ab_requests_routed,
        );
    }
}
