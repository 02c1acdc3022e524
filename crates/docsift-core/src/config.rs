//! Serving configuration.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration. Example:
//!
//! ```toml
//! cache_capacity = 5
//! stale_after_hours = 12
//!
//! [promotion]
//! min_evaluations = 20
//!
//! [validation_rules.receipt.total]
//! type = "number"
//! min_value = 0.0
//! required = true
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Duration;
use docsift_state::DocumentType;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServingError};
use crate::promotion::PromotionCriteria;
use crate::validation::{ValidationRuleRegistry, ValidationRuleSet};

/// Ten years; longer staleness windows are treated as misconfiguration.
pub const MAX_STALE_AFTER_HOURS: i64 = 24 * 365 * 10;
pub const MAX_CHALLENGER_DURATION_DAYS: i64 = 365;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServingConfig {
    /// Loaded predictors kept in memory
    pub cache_capacity: usize,
    pub default_confidence_threshold: f64,
    pub batch_size: usize,
    /// Production models unused for longer than this are reported stale
    pub stale_after_hours: i64,
    pub challenger_traffic_split: f64,
    pub challenger_duration_days: i64,
    pub maintenance_interval_secs: u64,
    pub promotion: PromotionCriteria,
    /// Merged field by field over the built-in rules
    pub validation_rules: BTreeMap<DocumentType, ValidationRuleSet>,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            cache_capacity: 3,
            default_confidence_threshold: 0.5,
            batch_size: 4,
            stale_after_hours: 24,
            challenger_traffic_split: 0.1,
            challenger_duration_days: 7,
            maintenance_interval_secs: 3600,
            promotion: PromotionCriteria::default(),
            validation_rules: BTreeMap::new(),
        }
    }
}

fn unit_interval(name: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ServingError::Config(format!(
            "{} must be within [0, 1], got {}",
            name, value
        )))
    }
}

impl ServingConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: ServingConfig =
            toml::from_str(s).map_err(|e| ServingError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ServingError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(ServingError::Config(
                "cache_capacity must be at least 1".to_string(),
            ));
        }
        if self.batch_size == 0 {
            return Err(ServingError::Config(
                "batch_size must be at least 1".to_string(),
            ));
        }
        if !(1..=MAX_STALE_AFTER_HOURS).contains(&self.stale_after_hours) {
            return Err(ServingError::Config(format!(
                "stale_after_hours must be between 1 and {}, got {}",
                MAX_STALE_AFTER_HOURS, self.stale_after_hours
            )));
        }
        if !(1..=MAX_CHALLENGER_DURATION_DAYS).contains(&self.challenger_duration_days) {
            return Err(ServingError::Config(format!(
                "challenger_duration_days must be between 1 and {}, got {}",
                MAX_CHALLENGER_DURATION_DAYS, self.challenger_duration_days
            )));
        }
        if self.maintenance_interval_secs == 0 {
            return Err(ServingError::Config(
                "maintenance_interval_secs must be at least 1".to_string(),
            ));
        }
        if !(self.challenger_traffic_split > 0.0 && self.challenger_traffic_split < 1.0) {
            return Err(ServingError::InvalidTrafficSplit(
                self.challenger_traffic_split,
            ));
        }
        unit_interval(
            "default_confidence_threshold",
            self.default_confidence_threshold,
        )?;
        unit_interval("promotion.min_accuracy", self.promotion.min_accuracy)?;
        unit_interval(
            "promotion.confidence_threshold",
            self.promotion.confidence_threshold,
        )?;
        Ok(())
    }

    /// Built-in rules with the configured overrides applied.
    pub fn rule_registry(&self) -> ValidationRuleRegistry {
        ValidationRuleRegistry::builtin().merged_with(self.validation_rules.clone())
    }

    /// Clamped to the validated range so unvalidated configs cannot overflow.
    pub fn stale_after(&self) -> Duration {
        Duration::hours(self.stale_after_hours.clamp(1, MAX_STALE_AFTER_HOURS))
    }

    pub fn challenger_duration(&self) -> Duration {
        Duration::days(
            self.challenger_duration_days
                .clamp(1, MAX_CHALLENGER_DURATION_DAYS),
        )
    }

    pub fn maintenance_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.maintenance_interval_secs)
    }
}
