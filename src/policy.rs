//! Declarative link policy
//!
//! A [`Rule`] states which query parameters a protocol's links must carry,
//! which values they may or may not take, and which parameters become
//! mandatory once others hold given values. Rules are loaded from a YAML,
//! JSON or TOML file keyed by protocol name, so policy can change without
//! touching the parsers.
//!
//! The engine only ever sees a flat `name -> value` map. It knows nothing of
//! protocols; every parser decides how its link flattens into that map.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

/// Flattened link parameters, the sole input of the rule engine
pub type ParameterMap = BTreeMap<String, String>;

// ============================================================================
// Rule Types
// ============================================================================

/// Parameter policy for one protocol
///
/// An empty rule accepts every parameter map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Rule {
    /// Parameters that must be present (an empty value counts as present)
    pub required_params: Vec<String>,

    /// Parameter name -> the only values it may take
    #[serde(deserialize_with = "deserialize_value_lists")]
    pub allowed_values: BTreeMap<String, Vec<String>>,

    /// Parameter name -> values it must not take
    #[serde(deserialize_with = "deserialize_value_lists")]
    pub forbidden_values: BTreeMap<String, Vec<String>>,

    /// Requirements that apply only when a predicate holds
    pub conditional: Vec<Condition>,
}

/// Conditional requirement: when every `when` pair matches exactly, each
/// name in `require` must be present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Condition {
    #[serde(deserialize_with = "deserialize_value_map")]
    pub when: BTreeMap<String, String>,
    pub require: Vec<String>,
}

/// Outcome of evaluating a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationResult {
    Valid,
    /// Carries a human-readable, non-empty reason
    Invalid(String),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Self::Valid => None,
            Self::Invalid(reason) => Some(reason),
        }
    }
}

impl Condition {
    fn matches(&self, params: &ParameterMap) -> bool {
        self.when
            .iter()
            .all(|(name, value)| params.get(name) == Some(value))
    }
}

impl fmt::Display for Condition {
    /// Renders the predicate as `name=value` pairs
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let pairs: Vec<String> = self
            .when
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        write!(f, "{}", pairs.join(", "))
    }
}

// ============================================================================
// Evaluation
// ============================================================================

impl Rule {
    /// Whether the rule imposes no constraint at all
    pub fn is_empty(&self) -> bool {
        self.required_params.is_empty()
            && self.allowed_values.is_empty()
            && self.forbidden_values.is_empty()
            && self.conditional.is_empty()
    }

    /// Evaluates the rule against a parameter map
    ///
    /// Checks run in a fixed order and the first failure is reported:
    /// required parameters, allowed values, forbidden values, then
    /// conditional requirements in declaration order.
    pub fn validate(&self, params: &ParameterMap) -> ValidationResult {
        for name in &self.required_params {
            if !params.contains_key(name) {
                return ValidationResult::Invalid(format!("missing required parameter: {name}"));
            }
        }

        for (name, allowed) in &self.allowed_values {
            if let Some(value) = params.get(name)
                && !allowed.contains(value)
            {
                return ValidationResult::Invalid(format!(
                    "invalid value for {name}: {value:?} (allowed: {allowed:?})"
                ));
            }
        }

        for (name, forbidden) in &self.forbidden_values {
            if let Some(value) = params.get(name)
                && forbidden.contains(value)
            {
                return ValidationResult::Invalid(format!(
                    "forbidden value for {name}: {value:?}"
                ));
            }
        }

        for condition in &self.conditional {
            if !condition.matches(params) {
                continue;
            }
            if let Some(missing) = condition
                .require
                .iter()
                .find(|name| !params.contains_key(name.as_str()))
            {
                return ValidationResult::Invalid(format!(
                    "missing required parameter {missing} when {condition}"
                ));
            }
        }

        ValidationResult::Valid
    }
}

/// Evaluates an optional rule; no rule means no constraint
pub fn validate(params: &ParameterMap, rule: Option<&Rule>) -> ValidationResult {
    rule.map_or(ValidationResult::Valid, |rule| rule.validate(params))
}

// ============================================================================
// Rule Set
// ============================================================================

/// Rule file syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleFormat {
    Yaml,
    Json,
    Toml,
}

impl RuleFormat {
    /// Picks the syntax from a file extension; unknown extensions read as TOML
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("yaml" | "yml") => Self::Yaml,
            Some("json") => Self::Json,
            _ => Self::Toml,
        }
    }
}

/// Rules for every configured protocol, keyed by lower-case protocol name
///
/// Loaded once before a batch and shared read-only by all parsers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct RuleSet {
    rules: HashMap<String, Rule>,
}

impl RuleSet {
    /// Creates an empty rule set, under which every protocol passes
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the rule for a protocol
    pub fn insert(&mut self, protocol: &str, rule: Rule) {
        self.rules.insert(protocol.to_ascii_lowercase(), rule);
    }

    /// Gets the rule for a protocol, if one is configured
    pub fn get(&self, protocol: &str) -> Option<&Rule> {
        self.rules.get(&protocol.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Parses a rule set from text in the given syntax
    pub fn parse(content: &str, format: RuleFormat) -> Result<Self> {
        let parsed: RuleSet = match format {
            RuleFormat::Yaml => {
                serde_yaml_ng::from_str(content).context("Failed to parse rules YAML")?
            }
            RuleFormat::Json => {
                serde_json::from_str(content).context("Failed to parse rules JSON")?
            }
            RuleFormat::Toml => toml::from_str(content).context("Failed to parse rules TOML")?,
        };

        // Normalize protocol keys so lookups are case-insensitive
        let mut rule_set = RuleSet::new();
        for (protocol, rule) in parsed.rules {
            rule_set.insert(&protocol, rule);
        }
        debug!("Parsed {} protocol rule(s)", rule_set.len());
        Ok(rule_set)
    }

    /// Loads a rule set from a file, choosing the syntax by extension
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read rules file {:?}", path))?;
        Self::parse(&content, RuleFormat::from_path(path))
            .with_context(|| format!("Invalid rules file {:?}", path))
    }
}

// ============================================================================
// Deserialization Helpers
// ============================================================================

/// Rule files may write values as bare numbers or booleans (`port: 443`,
/// `tls: true`); they are compared as their textual form.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

impl From<ScalarValue> for String {
    fn from(value: ScalarValue) -> Self {
        match value {
            ScalarValue::String(s) => s,
            ScalarValue::Integer(n) => n.to_string(),
            ScalarValue::Float(f) => f.to_string(),
            ScalarValue::Bool(b) => b.to_string(),
        }
    }
}

fn deserialize_value_lists<'de, D>(deserializer: D) -> Result<BTreeMap<String, Vec<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Vec<ScalarValue>>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, values)| (name, values.into_iter().map(String::from).collect()))
        .collect())
}

fn deserialize_value_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, ScalarValue>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(name, value)| (name, String::from(value)))
        .collect())
}
