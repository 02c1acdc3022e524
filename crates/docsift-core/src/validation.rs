//! Per-document-type field validation rules.
//!
//! A [`ValidationRuleRegistry`] maps each document type to a
//! [`ValidationRuleSet`], which maps field names to a typed [`FieldRule`].
//! The registry is built once at startup from the built-in rules, optionally
//! merged with rules from the configuration file, and shared read-only.

use std::collections::{BTreeMap, HashMap};

use docsift_state::DocumentType;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Expected type of an extracted field value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Number,
    Date,
    Array,
    Object,
}

/// Compiled regular expression that must match at the start of a value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldPattern(Regex);

impl FieldPattern {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(FieldPattern(Regex::new(pattern)?))
    }

    /// True when the pattern matches a prefix of `text`.
    ///
    /// The leftmost match starts at 0 whenever any match does.
    pub fn matches_start(&self, text: &str) -> bool {
        self.0.find(text).map(|m| m.start() == 0).unwrap_or(false)
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl PartialEq for FieldPattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl TryFrom<String> for FieldPattern {
    type Error = regex::Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        FieldPattern::new(&s)
    }
}

impl From<FieldPattern> for String {
    fn from(p: FieldPattern) -> Self {
        p.as_str().to_string()
    }
}

/// Validation rule for one field.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRule {
    #[serde(rename = "type")]
    pub field_type: FieldType,
    pub pattern: Option<FieldPattern>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    /// Lower bound for parsed numbers
    pub min_value: Option<f64>,
    pub required: bool,
}

impl FieldRule {
    pub fn of(field_type: FieldType) -> Self {
        Self {
            field_type,
            ..Self::default()
        }
    }

    pub fn with_pattern(mut self, pattern: FieldPattern) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub fn with_min_length(mut self, min: usize) -> Self {
        self.min_length = Some(min);
        self
    }

    pub fn with_max_length(mut self, max: usize) -> Self {
        self.max_length = Some(max);
        self
    }

    pub fn with_min_value(mut self, min: f64) -> Self {
        self.min_value = Some(min);
        self
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Whether `len` falls inside `[min_length, max_length]` (defaults `[0, ∞)`).
    pub fn length_in_bounds(&self, len: usize) -> bool {
        len >= self.min_length.unwrap_or(0) && self.max_length.map(|max| len <= max).unwrap_or(true)
    }
}

/// Field rules for one document type, keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationRuleSet {
    fields: BTreeMap<String, FieldRule>,
}

impl ValidationRuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, rule: FieldRule) -> Self {
        self.fields.insert(name.into(), rule);
        self
    }

    pub fn get(&self, field: &str) -> Option<&FieldRule> {
        self.fields.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldRule)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Add or replace fields from `other`.
    pub fn merge(&mut self, other: ValidationRuleSet) {
        self.fields.extend(other.fields);
    }
}

/// Document type → rule set registry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationRuleRegistry {
    rule_sets: HashMap<DocumentType, ValidationRuleSet>,
}

fn builtin_pattern(pattern: &str) -> FieldPattern {
    FieldPattern::new(pattern).expect("built-in validation pattern compiles")
}

impl ValidationRuleRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rules shipped for the bundled document types.
    pub fn builtin() -> Self {
        Self::empty()
            .with_rule_set(
                "bank_statement".into(),
                ValidationRuleSet::new()
                    .with_field(
                        "account_number",
                        FieldRule::of(FieldType::String)
                            .with_pattern(builtin_pattern(r"^[0-9]{10,20}$")),
                    )
                    .with_field(
                        "ifsc",
                        FieldRule::of(FieldType::String)
                            .with_pattern(builtin_pattern(r"^[A-Z]{4}0[A-Z0-9]{6}$")),
                    )
                    .with_field(
                        "transactions",
                        FieldRule::of(FieldType::Array).with_min_length(1),
                    ),
            )
            .with_rule_set(
                "invoice".into(),
                ValidationRuleSet::new()
                    .with_field("invoice_no", FieldRule::of(FieldType::String).with_min_length(3))
                    .with_field(
                        "gstin",
                        FieldRule::of(FieldType::String).with_pattern(builtin_pattern(
                            r"^[0-9]{2}[A-Z]{5}[0-9]{4}[A-Z]{1}[1-9A-Z]{1}Z[0-9A-Z]{1}$",
                        )),
                    )
                    .with_field(
                        "grand_total",
                        FieldRule::of(FieldType::Number).with_min_value(0.0),
                    ),
            )
            .with_rule_set(
                "form_16".into(),
                ValidationRuleSet::new()
                    .with_field(
                        "pan",
                        FieldRule::of(FieldType::String)
                            .with_pattern(builtin_pattern(r"^[A-Z]{5}[0-9]{4}[A-Z]{1}$")),
                    )
                    .with_field(
                        "tan",
                        FieldRule::of(FieldType::String)
                            .with_pattern(builtin_pattern(r"^[A-Z]{4}[0-9]{5}[A-Z]{1}$")),
                    )
                    .with_field(
                        "gross_salary",
                        FieldRule::of(FieldType::Number).with_min_value(0.0),
                    ),
            )
    }

    pub fn with_rule_set(mut self, document_type: DocumentType, rules: ValidationRuleSet) -> Self {
        self.rule_sets.insert(document_type, rules);
        self
    }

    /// Merge configured rule sets over the current ones, field by field.
    pub fn merged_with(mut self, overrides: BTreeMap<DocumentType, ValidationRuleSet>) -> Self {
        for (document_type, rules) in overrides {
            self.rule_sets.entry(document_type).or_default().merge(rules);
        }
        self
    }

    pub fn get(&self, document_type: &DocumentType) -> Option<&ValidationRuleSet> {
        self.rule_sets.get(document_type)
    }

    pub fn document_types(&self) -> impl Iterator<Item = &DocumentType> {
        self.rule_sets.keys()
    }
}
