//! Rule-based confidence scoring and output validation.
//!
//! Scores are heuristics derived from how well each extracted value fits the
//! [`FieldRule`] configured for its field, not model probabilities.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use docsift_state::DocumentType;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::validation::{FieldRule, FieldType, ValidationRuleRegistry};

const EMPTY_VALUE_SCORE: f64 = 0.2;
const BASE_SCORE: f64 = 0.5;
const UNRULED_PRESENT_SCORE: f64 = 0.7;
const UNRULED_EMPTY_SCORE: f64 = 0.3;
const NO_FIELDS_SCORE: f64 = 0.5;

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%d %b %Y",
    "%d %B %Y",
    "%b %d, %Y",
    "%B %d, %Y",
    "%d-%b-%Y",
];

/// Textual form of a value as the rules see it: strings verbatim, null as
/// empty, everything else as compact JSON.
pub(crate) fn textual_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Null, `false`, zero, and empty strings/arrays/objects count as empty.
pub(crate) fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().map(|f| f == 0.0).unwrap_or(false),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

pub(crate) fn parse_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        other => textual_form(other).trim().parse::<f64>().ok(),
    }
}

fn parses_as_date(text: &str) -> bool {
    let text = text.trim();
    DateTime::parse_from_rfc3339(text).is_ok()
        || DATE_FORMATS
            .iter()
            .any(|fmt| NaiveDate::parse_from_str(text, fmt).is_ok())
}

fn value_length(value: &Value) -> usize {
    match value {
        Value::Array(a) => a.len(),
        Value::Object(o) => o.len(),
        other => textual_form(other).chars().count(),
    }
}

/// Score a single value against its rule, in `[0, 1]`.
pub fn score_field(value: &Value, rule: &FieldRule) -> f64 {
    if is_empty_value(value) {
        return EMPTY_VALUE_SCORE;
    }

    let text = textual_form(value);
    let mut score = BASE_SCORE;

    let type_check = match rule.field_type {
        FieldType::Number => Some(parse_number(value).is_some()),
        FieldType::Date => Some(parses_as_date(&text)),
        FieldType::String | FieldType::Array | FieldType::Object => None,
    };
    match type_check {
        Some(true) => score += 0.2,
        Some(false) => score -= 0.3,
        None => {}
    }

    if let Some(pattern) = &rule.pattern {
        if pattern.matches_start(&text) {
            score += 0.2;
        } else {
            score -= 0.2;
        }
    }

    if rule.length_in_bounds(value_length(value)) {
        score += 0.1;
    } else {
        score -= 0.2;
    }

    score.clamp(0.0, 1.0)
}

/// Per-field scores and their mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceReport {
    pub field_scores: BTreeMap<String, f64>,
    pub overall: f64,
}

/// Scores extraction output and reports validation errors using the shared
/// rule registry.
#[derive(Debug, Clone)]
pub struct ConfidenceScorer {
    rules: Arc<ValidationRuleRegistry>,
}

impl ConfidenceScorer {
    pub fn new(rules: Arc<ValidationRuleRegistry>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ValidationRuleRegistry {
        &self.rules
    }

    /// Score every field present in `extracted`.
    ///
    /// Fields without a rule score 0.7 when non-empty and 0.3 otherwise.
    /// Output that is not a JSON object yields no field scores and an overall
    /// score of 0.5.
    pub fn score_result(&self, extracted: &Value, document_type: &DocumentType) -> ConfidenceReport {
        let mut field_scores = BTreeMap::new();
        if let Value::Object(fields) = extracted {
            let rules = self.rules.get(document_type);
            for (name, value) in fields {
                let score = match rules.and_then(|r| r.get(name)) {
                    Some(rule) => score_field(value, rule),
                    None if is_empty_value(value) => UNRULED_EMPTY_SCORE,
                    None => UNRULED_PRESENT_SCORE,
                };
                field_scores.insert(name.clone(), score);
            }
        }

        let overall = if field_scores.is_empty() {
            NO_FIELDS_SCORE
        } else {
            field_scores.values().sum::<f64>() / field_scores.len() as f64
        };

        ConfidenceReport {
            field_scores,
            overall,
        }
    }

    /// Human-readable validation errors for `extracted`; empty when valid.
    ///
    /// Besides missing required fields and non-numeric number fields, a
    /// number below its rule's `min_value` is reported too, so configured
    /// minimums are enforced rather than only carried.
    pub fn validate(&self, extracted: &Value, document_type: &DocumentType) -> Vec<String> {
        let Value::Object(fields) = extracted else {
            return vec!["Invalid output format: expected dictionary".to_string()];
        };
        let Some(rules) = self.rules.get(document_type) else {
            return Vec::new();
        };

        let mut errors = Vec::new();
        for (name, rule) in rules.iter() {
            let Some(value) = fields.get(name) else {
                if rule.required {
                    errors.push(format!("Required field '{}' is missing", name));
                }
                continue;
            };

            if rule.field_type == FieldType::Number {
                match parse_number(value) {
                    None => errors.push(format!("Field '{}' should be a number", name)),
                    Some(n) => {
                        if let Some(min) = rule.min_value {
                            if n < min {
                                errors.push(format!(
                                    "Field '{}' is below minimum value {}",
                                    name, min
                                ));
                            }
                        }
                    }
                }
            }

            if let Some(pattern) = &rule.pattern {
                if !is_empty_value(value) && !pattern.matches_start(&textual_form(value)) {
                    errors.push(format!("Field '{}' format is invalid", name));
                }
            }
        }
        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{FieldPattern, ValidationRuleSet};
    use serde_json::json;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn scorer() -> ConfidenceScorer {
        ConfidenceScorer::new(Arc::new(ValidationRuleRegistry::builtin()))
    }

    #[test]
    fn string_with_min_length_scores_base_plus_length() {
        let rule = FieldRule::of(FieldType::String).with_min_length(3);
        assert!(approx(score_field(&json!("INV-001"), &rule), 0.6));
    }

    #[test]
    fn empty_values_short_circuit() {
        let rule = FieldRule::of(FieldType::Number);
        for value in [json!(null), json!(""), json!([]), json!({}), json!(0)] {
            assert!(approx(score_field(&value, &rule), 0.2), "{}", value);
        }
    }

    #[test]
    fn number_rule_rewards_parseable_values() {
        let rule = FieldRule::of(FieldType::Number);
        assert!(approx(score_field(&json!(1250.5), &rule), 0.8));
        assert!(approx(score_field(&json!(" 1250.50 "), &rule), 0.8));
        assert!(approx(score_field(&json!("twelve"), &rule), 0.3));
    }

    #[test]
    fn date_rule_accepts_common_formats() {
        let rule = FieldRule::of(FieldType::Date);
        for text in ["2024-03-31", "31/03/2024", "31 Mar 2024", "2024-03-31T10:00:00Z"] {
            assert!(approx(score_field(&json!(text), &rule), 0.8), "{}", text);
        }
        assert!(approx(score_field(&json!("someday"), &rule), 0.3));
    }

    #[test]
    fn pattern_and_length_penalties_combine() {
        let rule = FieldRule::of(FieldType::Number)
            .with_pattern(FieldPattern::new("^[0-9]+$").expect("pattern"))
            .with_max_length(2);
        // 0.5 - 0.3 (type) - 0.2 (pattern) - 0.2 (length) clamps to 0
        assert_eq!(score_field(&json!("abcdef"), &rule), 0.0);
    }

    #[test]
    fn score_always_within_unit_interval() {
        let rules = [
            FieldRule::default(),
            FieldRule::of(FieldType::Number).with_min_length(50),
            FieldRule::of(FieldType::Date)
                .with_pattern(FieldPattern::new("^x").expect("pattern"))
                .with_max_length(0),
            FieldRule::of(FieldType::Array).with_min_length(1),
        ];
        let values = [
            json!(null),
            json!("x"),
            json!(42),
            json!(-1.5),
            json!(true),
            json!(["a", "b"]),
            json!({"k": "v"}),
            json!("2024-01-01"),
        ];
        for rule in &rules {
            for value in &values {
                let score = score_field(value, rule);
                assert!((0.0..=1.0).contains(&score), "{:?} {:?} {}", rule, value, score);
            }
        }
    }

    #[test]
    fn score_result_mixes_ruled_and_unruled_fields() {
        let report = scorer().score_result(
            &json!({"invoice_no": "INV-001", "vendor": "Acme", "notes": ""}),
            &"invoice".into(),
        );
        assert!(approx(report.field_scores["invoice_no"], 0.6));
        assert!(approx(report.field_scores["vendor"], 0.7));
        assert!(approx(report.field_scores["notes"], 0.3));
        assert!(approx(report.overall, (0.6 + 0.7 + 0.3) / 3.0));
    }

    #[test]
    fn score_result_defaults_for_non_object_output() {
        let report = scorer().score_result(&json!("raw text"), &"invoice".into());
        assert!(report.field_scores.is_empty());
        assert_eq!(report.overall, 0.5);

        let report = scorer().score_result(&json!({}), &"invoice".into());
        assert_eq!(report.overall, 0.5);
    }

    #[test]
    fn validate_reports_type_format_and_range_errors() {
        let errors = scorer().validate(
            &json!({"invoice_no": "INV-9", "gstin": "not-a-gstin", "grand_total": "abc"}),
            &"invoice".into(),
        );
        assert_eq!(
            errors,
            vec![
                "Field 'grand_total' should be a number".to_string(),
                "Field 'gstin' format is invalid".to_string(),
            ]
        );

        let errors = scorer().validate(&json!({"grand_total": -3}), &"invoice".into());
        assert_eq!(errors, vec!["Field 'grand_total' is below minimum value 0".to_string()]);
    }

    #[test]
    fn validate_flags_missing_required_fields_only() {
        let rules = ValidationRuleRegistry::empty().with_rule_set(
            "receipt".into(),
            ValidationRuleSet::new()
                .with_field("total", FieldRule::of(FieldType::Number).required())
                .with_field("store", FieldRule::default()),
        );
        let scorer = ConfidenceScorer::new(Arc::new(rules));
        let errors = scorer.validate(&json!({}), &"receipt".into());
        assert_eq!(errors, vec!["Required field 'total' is missing".to_string()]);
    }

    #[test]
    fn validate_rejects_non_object_output() {
        let errors = scorer().validate(&json!(["a"]), &"invoice".into());
        assert_eq!(errors, vec!["Invalid output format: expected dictionary".to_string()]);
    }
}
