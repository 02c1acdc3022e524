//! Periodic maintenance: auto-promotion followed by health monitoring.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

use crate::control_plane::{HealthCheck, ServingControlPlane};
use crate::promotion::PromotionOutcome;

/// What one maintenance pass did. A failed step leaves its field empty and
/// adds an entry to `errors`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub promotions: Vec<PromotionOutcome>,
    pub health: Option<HealthCheck>,
    pub errors: Vec<String>,
    pub started_at: DateTime<Utc>,
}

impl MaintenanceReport {
    pub fn promoted_count(&self) -> usize {
        self.promotions.iter().filter(|o| o.is_promoted()).count()
    }
}

pub struct MaintenanceScheduler {
    control_plane: Arc<ServingControlPlane>,
    interval: Duration,
}

impl MaintenanceScheduler {
    pub fn new(control_plane: Arc<ServingControlPlane>, interval: Duration) -> Self {
        Self {
            control_plane,
            interval,
        }
    }

    pub async fn tick(&self) -> MaintenanceReport {
        let started_at = Utc::now();
        let mut errors = Vec::new();

        let promotions = match self.control_plane.auto_promote().await {
            Ok(outcomes) => outcomes,
            Err(e) => {
                error!(error = %e, "auto-promotion step failed");
                errors.push(format!("auto_promote: {}", e));
                Vec::new()
            }
        };

        let health = match self.control_plane.monitor_health().await {
            Ok(check) => Some(check),
            Err(e) => {
                error!(error = %e, "health monitoring step failed");
                errors.push(format!("monitor_health: {}", e));
                None
            }
        };

        self.control_plane.metrics().flush();
        MaintenanceReport {
            promotions,
            health,
            errors,
            started_at,
        }
    }

    /// Tick immediately, then every `interval`, until `shutdown` resolves.
    /// Returns the number of completed ticks.
    pub async fn run<F>(&self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut ticks = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    ticks += 1;
                    info!(
                        tick = ticks,
                        promoted = report.promoted_count(),
                        errors = report.errors.len(),
                        "maintenance tick finished"
                    );
                }
            }
        }
        info!(ticks = ticks, "maintenance loop stopped");
        ticks
    }
}
