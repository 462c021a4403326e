//! Validation rules and rule sets.

use std::fmt;
use std::path::Path;

use regex::Regex;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::debug;

use crate::error::{HarnessError, HarnessResult};

/// Address of a value inside an output set: an output name, plus an entry
/// key when the output is structured.
///
/// Written as `output` or `output.key` in rule files.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FieldRef {
    pub output: String,
    pub key: Option<String>,
}

impl FieldRef {
    pub fn output(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            key: None,
        }
    }

    pub fn entry(output: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            key: Some(key.into()),
        }
    }

    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some(key) => write!(f, "{}.{}", self.output, key),
            None => f.write_str(&self.output),
        }
    }
}

impl TryFrom<String> for FieldRef {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let (output, key) = match value.split_once('.') {
            Some((output, key)) => (output, Some(key)),
            None => (value.as_str(), None),
        };
        if output.is_empty() || key.is_some_and(str::is_empty) {
            return Err(format!("invalid field reference '{}'", value));
        }
        Ok(Self {
            output: output.to_string(),
            key: key.map(str::to_string),
        })
    }
}

impl From<FieldRef> for String {
    fn from(field: FieldRef) -> Self {
        field.to_string()
    }
}

/// When a field rule may be skipped instead of evaluated.
///
/// Written as `optional: false` (the default), `optional: true` (skip a
/// missing or empty field) or `optional: present` (skip only a missing
/// field; an empty value is still checked).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Presence {
    #[default]
    Required,
    IfNonEmpty,
    IfPresent,
}

impl Presence {
    fn is_required(&self) -> bool {
        *self == Presence::Required
    }
}

impl Serialize for Presence {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Presence::Required => serializer.serialize_bool(false),
            Presence::IfNonEmpty => serializer.serialize_bool(true),
            Presence::IfPresent => serializer.serialize_str("present"),
        }
    }
}

impl<'de> Deserialize<'de> for Presence {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PresenceVisitor;

        impl<'de> Visitor<'de> for PresenceVisitor {
            type Value = Presence;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("true, false or \"present\"")
            }

            fn visit_bool<E: de::Error>(self, value: bool) -> Result<Presence, E> {
                Ok(if value {
                    Presence::IfNonEmpty
                } else {
                    Presence::Required
                })
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<Presence, E> {
                match value {
                    "present" => Ok(Presence::IfPresent),
                    other => Err(E::invalid_value(de::Unexpected::Str(other), &self)),
                }
            }
        }

        deserializer.deserialize_any(PresenceVisitor)
    }
}

/// What a rule asserts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Check {
    /// A structured output exists and has at least one entry.
    NonEmptyOutput { output: String },

    /// The field is present and non-empty.
    Exists { field: FieldRef },

    /// The field starts with a literal prefix.
    Prefix {
        field: FieldRef,
        prefix: String,
        #[serde(default, skip_serializing_if = "Presence::is_required")]
        optional: Presence,
    },

    /// The field contains a literal substring.
    Contains {
        field: FieldRef,
        substring: String,
        #[serde(default, skip_serializing_if = "Presence::is_required")]
        optional: Presence,
    },

    /// The field matches a regular expression.
    Pattern {
        field: FieldRef,
        pattern: String,
        #[serde(default, skip_serializing_if = "Presence::is_required")]
        optional: Presence,
    },

    /// The field, upper-cased, is one of the accepted values.
    OneOf {
        field: FieldRef,
        values: Vec<String>,
        #[serde(default, skip_serializing_if = "Presence::is_required")]
        optional: Presence,
    },

    /// The bare identifier equals what follows `delimiter` in the composite.
    ConsistentSuffix {
        bare: FieldRef,
        composite: FieldRef,
        delimiter: String,
    },
}

impl Check {
    /// Fields this check reads.
    pub fn fields(&self) -> Vec<String> {
        match self {
            Check::NonEmptyOutput { output } => vec![output.clone()],
            Check::Exists { field }
            | Check::Prefix { field, .. }
            | Check::Contains { field, .. }
            | Check::Pattern { field, .. }
            | Check::OneOf { field, .. } => vec![field.to_string()],
            Check::ConsistentSuffix {
                bare, composite, ..
            } => vec![bare.to_string(), composite.to_string()],
        }
    }

    fn default_name(&self) -> String {
        match self {
            Check::NonEmptyOutput { output } => format!("{} non-empty", output),
            Check::Exists { field } => format!("{} exists", field),
            Check::Prefix { field, prefix, .. } => format!("{} starts with '{}'", field, prefix),
            Check::Contains {
                field, substring, ..
            } => format!("{} contains '{}'", field, substring),
            Check::Pattern { field, pattern, .. } => format!("{} matches /{}/", field, pattern),
            Check::OneOf { field, .. } => format!("{} accepted value", field),
            Check::ConsistentSuffix {
                bare, composite, ..
            } => format!("{} matches {}", bare, composite),
        }
    }
}

/// A named check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub check: Check,
}

impl Rule {
    pub fn new(check: Check) -> Self {
        Self { name: None, check }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.check.default_name())
    }

    pub fn non_empty_output(output: impl Into<String>) -> Self {
        Self::new(Check::NonEmptyOutput {
            output: output.into(),
        })
    }

    pub fn exists(field: FieldRef) -> Self {
        Self::new(Check::Exists { field })
    }

    pub fn prefix(field: FieldRef, prefix: impl Into<String>) -> Self {
        Self::new(Check::Prefix {
            field,
            prefix: prefix.into(),
            optional: Presence::Required,
        })
    }

    pub fn contains(field: FieldRef, substring: impl Into<String>) -> Self {
        Self::new(Check::Contains {
            field,
            substring: substring.into(),
            optional: Presence::Required,
        })
    }

    pub fn pattern(field: FieldRef, pattern: impl Into<String>) -> Self {
        Self::new(Check::Pattern {
            field,
            pattern: pattern.into(),
            optional: Presence::Required,
        })
    }

    pub fn one_of<I, S>(field: FieldRef, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Check::OneOf {
            field,
            values: values.into_iter().map(Into::into).collect(),
            optional: Presence::Required,
        })
    }

    pub fn consistent_suffix(bare: FieldRef, composite: FieldRef, delimiter: impl Into<String>) -> Self {
        Self::new(Check::ConsistentSuffix {
            bare,
            composite,
            delimiter: delimiter.into(),
        })
    }

    /// A missing or empty field is acceptable; a non-empty value must
    /// still pass.
    pub fn optional(self) -> Self {
        self.with_presence(Presence::IfNonEmpty)
    }

    /// Only a missing field is acceptable; an empty value is checked.
    pub fn if_present(self) -> Self {
        self.with_presence(Presence::IfPresent)
    }

    fn with_presence(mut self, presence: Presence) -> Self {
        match &mut self.check {
            Check::Prefix { optional, .. }
            | Check::Contains { optional, .. }
            | Check::Pattern { optional, .. }
            | Check::OneOf { optional, .. } => *optional = presence,
            other => debug!("Check {:?} has no optional form", other),
        }
        self
    }
}

/// An ordered set of rules evaluated against one run's outputs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub rules: Vec<Rule>,
}

/// Rule sets that ship with provcheck.
pub const BUILTIN_RULE_SETS: &[&str] = &["guardduty"];

impl RuleSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            rules: Vec::new(),
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Add a rule to the set.
    pub fn add(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Look up a built-in rule set by name.
    pub fn builtin(name: &str) -> HarnessResult<Self> {
        match name {
            "guardduty" => Ok(Self::guardduty()),
            other => Err(HarnessError::UnknownRuleSet(other.to_string())),
        }
    }

    /// Output contract of the GuardDuty module: detector and SNS topic
    /// bundles plus the flat detector id/ARN outputs.
    pub fn guardduty() -> Self {
        let mut rules = Self::new("guardduty").with_description(
            "GuardDuty detector, findings SNS topic and detector id/ARN outputs",
        );

        let detector = |key: &str| FieldRef::entry("guardduty_detector", key);
        rules.add(Rule::non_empty_output("guardduty_detector"));
        rules.add(Rule::exists(detector("id")));
        rules.add(Rule::exists(detector("arn")));
        rules.add(Rule::prefix(detector("arn"), "arn:aws:guardduty:"));
        rules.add(Rule::contains(detector("arn"), "detector/"));
        rules.add(Rule::one_of(detector("status"), ["ENABLED"]).if_present());
        rules.add(
            Rule::one_of(
                detector("finding_publishing_frequency"),
                ["FIFTEEN_MINUTES", "ONE_HOUR", "SIX_HOURS"],
            )
            .optional(),
        );

        let topic = |key: &str| FieldRef::entry("sns_topic", key);
        rules.add(Rule::non_empty_output("sns_topic"));
        rules.add(Rule::exists(topic("id")));
        rules.add(Rule::prefix(topic("arn"), "arn:aws:sns:").optional());
        rules.add(Rule::contains(topic("arn"), "guardduty").optional());
        rules.add(Rule::contains(topic("name"), "guardduty").optional());

        let id = FieldRef::output("guardduty_detector_id");
        let arn = FieldRef::output("guardduty_detector_arn");
        rules.add(Rule::exists(id.clone()));
        rules.add(Rule::exists(arn.clone()));
        rules.add(Rule::prefix(arn.clone(), "arn:aws:guardduty:"));
        rules.add(Rule::consistent_suffix(id, arn, "detector/"));

        rules
    }

    /// Check the set is usable: non-empty, patterns compile, enum sets and
    /// delimiters are not empty.
    pub fn validate(&self) -> HarnessResult<()> {
        if self.rules.is_empty() {
            return Err(HarnessError::InvalidSuite(format!(
                "rule set '{}' has no rules",
                self.name
            )));
        }

        for rule in &self.rules {
            let invalid = |message: String| HarnessError::InvalidRule {
                rule: rule.name(),
                message,
            };
            match &rule.check {
                Check::Pattern { pattern, .. } => {
                    Regex::new(pattern).map_err(|e| invalid(format!("invalid regex: {}", e)))?;
                }
                Check::OneOf { values, .. } if values.is_empty() => {
                    return Err(invalid("no accepted values".to_string()));
                }
                Check::ConsistentSuffix { delimiter, .. } if delimiter.is_empty() => {
                    return Err(invalid("empty delimiter".to_string()));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Load a rule set from a YAML file.
    pub fn from_file(path: &Path) -> HarnessResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let set = Self::from_yaml(&content)?;
        debug!("Loaded rule set '{}' from {:?}", set.name, path);
        Ok(set)
    }

    pub fn from_yaml(content: &str) -> HarnessResult<Self> {
        let set: Self = serde_yaml::from_str(content)?;
        set.validate()?;
        Ok(set)
    }

    /// Resolve a rule set reference: a built-in name or a YAML path.
    pub fn resolve(reference: &str) -> HarnessResult<Self> {
        if BUILTIN_RULE_SETS.contains(&reference) {
            return Self::builtin(reference);
        }
        let path = Path::new(reference);
        if path.exists() {
            return Self::from_file(path);
        }
        Err(HarnessError::UnknownRuleSet(reference.to_string()))
    }
}
