//! Rule evaluation.
//!
//! Every rule is evaluated on its own: a missing field fails only the rules
//! that read it, and a rule that panics is recorded as a failure instead of
//! taking the remaining rules down with it.

use std::panic::{catch_unwind, AssertUnwindSafe};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use provcheck_runner::OutputSet;

use crate::extract::OutputExtractor;
use crate::rules::{Check, FieldRef, Presence, Rule, RuleSet};

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckOutcome {
    Passed,
    Failed,
    /// Not applicable to this run; counts as a pass.
    Skipped,
}

/// Result of one assertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub check: String,
    pub outcome: CheckOutcome,
    pub message: String,
    pub fields: Vec<String>,
}

impl ValidationResult {
    pub fn passed(check: impl Into<String>, message: impl Into<String>, fields: Vec<String>) -> Self {
        Self::with_outcome(CheckOutcome::Passed, check, message, fields)
    }

    pub fn failed(check: impl Into<String>, message: impl Into<String>, fields: Vec<String>) -> Self {
        Self::with_outcome(CheckOutcome::Failed, check, message, fields)
    }

    pub fn skipped(check: impl Into<String>, message: impl Into<String>, fields: Vec<String>) -> Self {
        Self::with_outcome(CheckOutcome::Skipped, check, message, fields)
    }

    fn with_outcome(
        outcome: CheckOutcome,
        check: impl Into<String>,
        message: impl Into<String>,
        fields: Vec<String>,
    ) -> Self {
        Self {
            check: check.into(),
            outcome,
            message: message.into(),
            fields,
        }
    }

    /// Whether this result counts towards a passing run.
    pub fn is_pass(&self) -> bool {
        self.outcome != CheckOutcome::Failed
    }
}

type Verdict = (CheckOutcome, String);

/// Evaluates a [`RuleSet`] against an output set.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    rules: RuleSet,
}

impl RuleEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Evaluate every rule in order, one result per rule.
    pub fn evaluate(&self, outputs: &OutputSet) -> Vec<ValidationResult> {
        self.evaluate_with(outputs, Self::run_check)
    }

    fn evaluate_with<F>(&self, outputs: &OutputSet, check: F) -> Vec<ValidationResult>
    where
        F: Fn(&Check, &OutputExtractor<'_>) -> Verdict,
    {
        let extractor = OutputExtractor::new(outputs);
        self.rules
            .rules
            .iter()
            .map(|rule| Self::evaluate_rule(rule, &extractor, &check))
            .collect()
    }

    fn evaluate_rule<F>(rule: &Rule, extractor: &OutputExtractor<'_>, check: &F) -> ValidationResult
    where
        F: Fn(&Check, &OutputExtractor<'_>) -> Verdict,
    {
        let name = rule.name();
        let fields = rule.check.fields();

        let verdict = catch_unwind(AssertUnwindSafe(|| check(&rule.check, extractor)))
            .unwrap_or_else(|panic| {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!("Check '{}' panicked: {}", name, reason);
                (CheckOutcome::Failed, format!("check panicked: {}", reason))
            });

        let (outcome, message) = verdict;
        debug!("{:?}: {} ({})", outcome, name, message);
        ValidationResult::with_outcome(outcome, name, message, fields)
    }

    fn run_check(check: &Check, extractor: &OutputExtractor<'_>) -> Verdict {
        match check {
            Check::NonEmptyOutput { output } => match extractor.extract_non_empty(output) {
                Ok(value) => (CheckOutcome::Passed, format!("{} output present", value.kind())),
                Err(e) => (CheckOutcome::Failed, e.to_string()),
            },
            Check::Exists { field } => match extractor.extract_text(&field.output, field.key()) {
                Ok(value) => (CheckOutcome::Passed, format!("{} = {}", field, value)),
                Err(e) => (CheckOutcome::Failed, e.to_string()),
            },
            Check::Prefix {
                field,
                prefix,
                optional,
            } => Self::check_field(extractor, field, *optional, |value| {
                if value.starts_with(prefix.as_str()) {
                    Ok(format!("{} starts with '{}'", value, prefix))
                } else {
                    Err(format!("expected prefix '{}', got: {}", prefix, value))
                }
            }),
            Check::Contains {
                field,
                substring,
                optional,
            } => Self::check_field(extractor, field, *optional, |value| {
                if value.contains(substring.as_str()) {
                    Ok(format!("{} contains '{}'", value, substring))
                } else {
                    Err(format!("expected to contain '{}', got: {}", substring, value))
                }
            }),
            Check::Pattern {
                field,
                pattern,
                optional,
            } => match Regex::new(pattern) {
                Ok(regex) => Self::check_field(extractor, field, *optional, |value| {
                    if regex.is_match(value) {
                        Ok(format!("{} matches /{}/", value, pattern))
                    } else {
                        Err(format!("expected to match /{}/, got: {}", pattern, value))
                    }
                }),
                Err(e) => (CheckOutcome::Failed, format!("invalid regex: {}", e)),
            },
            Check::OneOf {
                field,
                values,
                optional,
            } => Self::check_field(extractor, field, *optional, |value| {
                let normalized = value.to_uppercase();
                if values.iter().any(|v| v.to_uppercase() == normalized) {
                    Ok(format!("{} accepted", value))
                } else {
                    Err(format!("expected one of {:?}, got: {}", values, value))
                }
            }),
            Check::ConsistentSuffix {
                bare,
                composite,
                delimiter,
            } => Self::check_suffix(extractor, bare, composite, delimiter),
        }
    }

    /// Read a field and apply `predicate`; a field the rule allows to be
    /// absent is skipped.
    fn check_field<F>(
        extractor: &OutputExtractor<'_>,
        field: &FieldRef,
        presence: Presence,
        predicate: F,
    ) -> Verdict
    where
        F: Fn(&str) -> Result<String, String>,
    {
        let lookup = match presence {
            Presence::Required => extractor.extract_text(&field.output, field.key()).map(Some),
            Presence::IfNonEmpty => extractor.optional_text(&field.output, field.key()),
            Presence::IfPresent => extractor.present_text(&field.output, field.key()),
        };
        let value = match lookup {
            Ok(Some(value)) => value,
            Ok(None) => return (CheckOutcome::Skipped, format!("{} not present", field)),
            Err(e) => return (CheckOutcome::Failed, e.to_string()),
        };

        match predicate(value) {
            Ok(message) => (CheckOutcome::Passed, message),
            Err(message) => (CheckOutcome::Failed, format!("{}: {}", field, message)),
        }
    }

    /// Compare a bare identifier with the tail of a composite one.
    ///
    /// A composite that does not split into exactly two parts around the
    /// delimiter is skipped.
    fn check_suffix(
        extractor: &OutputExtractor<'_>,
        bare: &FieldRef,
        composite: &FieldRef,
        delimiter: &str,
    ) -> Verdict {
        let bare_value = match extractor.extract_text(&bare.output, bare.key()) {
            Ok(v) => v,
            Err(e) => return (CheckOutcome::Failed, e.to_string()),
        };
        let composite_value = match extractor.extract_text(&composite.output, composite.key()) {
            Ok(v) => v,
            Err(e) => return (CheckOutcome::Failed, e.to_string()),
        };

        let parts: Vec<&str> = composite_value.split(delimiter).collect();
        if parts.len() != 2 {
            return (
                CheckOutcome::Skipped,
                format!(
                    "{} does not split into two parts on '{}': {}",
                    composite, delimiter, composite_value
                ),
            );
        }

        if parts[1] == bare_value {
            (
                CheckOutcome::Passed,
                format!("{} ({}) matches {}", bare, bare_value, composite),
            )
        } else {
            (
                CheckOutcome::Failed,
                format!(
                    "{} from output ({}) should match the id in {} ({})",
                    bare, bare_value, composite, parts[1]
                ),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use provcheck_runner::OutputValue;

    const DETECTOR_ID: &str = "12abc34d567e8fa901bc2d34e56789f0";

    fn detector_arn(id: &str) -> String {
        format!("arn:aws:guardduty:us-east-2:111111111111:detector/{}", id)
    }

    fn outputs_with(id: &str, arn: &str) -> OutputSet {
        let mut set = OutputSet::new();
        set.insert("guardduty_detector_id".into(), OutputValue::scalar(id));
        set.insert("guardduty_detector_arn".into(), OutputValue::scalar(arn));
        set
    }

    fn suffix_rule() -> RuleSet {
        let mut rules = RuleSet::new("suffix");
        rules.add(Rule::consistent_suffix(
            FieldRef::output("guardduty_detector_id"),
            FieldRef::output("guardduty_detector_arn"),
            "detector/",
        ));
        rules
    }

    fn status_rule() -> RuleSet {
        let mut rules = RuleSet::new("status");
        rules.add(Rule::one_of(FieldRef::entry("detector", "status"), ["ENABLED", "DISABLED"]));
        rules
    }

    fn with_status(status: &str) -> OutputSet {
        let mut set = OutputSet::new();
        set.insert("detector".into(), OutputValue::structured([("status", status)]));
        set
    }

    #[test]
    fn test_consistent_suffix_passes_when_equal() {
        let engine = RuleEngine::new(suffix_rule());
        let results = engine.evaluate(&outputs_with(DETECTOR_ID, &detector_arn(DETECTOR_ID)));
        assert_eq!(results[0].outcome, CheckOutcome::Passed);
    }

    #[test]
    fn test_consistent_suffix_fails_on_mismatch() {
        let engine = RuleEngine::new(suffix_rule());
        let results = engine.evaluate(&outputs_with("other", &detector_arn(DETECTOR_ID)));
        assert_eq!(results[0].outcome, CheckOutcome::Failed);
        assert!(results[0].message.contains(DETECTOR_ID));
    }

    #[test]
    fn test_consistent_suffix_is_byte_exact() {
        let engine = RuleEngine::new(suffix_rule());
        let upper = DETECTOR_ID.to_uppercase();
        let results = engine.evaluate(&outputs_with(&upper, &detector_arn(DETECTOR_ID)));
        assert_eq!(results[0].outcome, CheckOutcome::Failed);
    }

    #[test]
    fn test_consistent_suffix_skips_without_delimiter() {
        let engine = RuleEngine::new(suffix_rule());
        let results = engine.evaluate(&outputs_with(
            DETECTOR_ID,
            "arn:aws:guardduty:us-east-2:111111111111:something-else",
        ));
        assert_eq!(results[0].outcome, CheckOutcome::Skipped);
        assert!(results[0].is_pass());
    }

    #[test]
    fn test_consistent_suffix_skips_on_repeated_delimiter() {
        let engine = RuleEngine::new(suffix_rule());
        let arn = format!("{}/detector/x", detector_arn(DETECTOR_ID));
        let results = engine.evaluate(&outputs_with(DETECTOR_ID, &arn));
        assert_eq!(results[0].outcome, CheckOutcome::Skipped);
    }

    #[test]
    fn test_one_of_is_case_insensitive() {
        let engine = RuleEngine::new(status_rule());
        for status in ["enabled", "ENABLED", "Enabled", "disabled"] {
            let results = engine.evaluate(&with_status(status));
            assert_eq!(results[0].outcome, CheckOutcome::Passed, "status {status}");
        }
    }

    #[test]
    fn test_one_of_rejects_unknown_value() {
        let engine = RuleEngine::new(status_rule());
        let results = engine.evaluate(&with_status("PENDING"));
        assert_eq!(results[0].outcome, CheckOutcome::Failed);
        assert!(results[0].message.contains("PENDING"));
    }

    #[test]
    fn test_optional_field_absent_is_skipped() {
        let mut rules = RuleSet::new("optional");
        rules.add(Rule::one_of(FieldRef::entry("detector", "frequency"), ["ONE_HOUR"]).optional());
        rules.add(Rule::one_of(FieldRef::entry("detector", "status"), ["ENABLED"]).optional());

        let results = RuleEngine::new(rules).evaluate(&with_status(""));
        assert_eq!(results[0].outcome, CheckOutcome::Skipped);
        assert_eq!(results[1].outcome, CheckOutcome::Skipped);
    }

    #[test]
    fn test_optional_field_present_must_pass() {
        let mut rules = RuleSet::new("optional");
        rules.add(Rule::prefix(FieldRef::entry("topic", "arn"), "arn:aws:sns:").optional());

        let mut set = OutputSet::new();
        set.insert("topic".into(), OutputValue::structured([("arn", "arn:aws:sqs:x")]));

        let results = RuleEngine::new(rules).evaluate(&set);
        assert_eq!(results[0].outcome, CheckOutcome::Failed);
        assert_eq!(results[0].fields, vec!["topic.arn"]);
    }

    #[test]
    fn test_prefix_is_byte_exact() {
        let mut rules = RuleSet::new("prefix");
        rules.add(Rule::prefix(FieldRef::output("arn"), "arn:aws:guardduty:"));

        let mut set = OutputSet::new();
        set.insert("arn".into(), OutputValue::scalar("ARN:AWS:GUARDDUTY:us-east-2"));

        let results = RuleEngine::new(rules).evaluate(&set);
        assert_eq!(results[0].outcome, CheckOutcome::Failed);
    }

    #[test]
    fn test_pattern_rule() {
        let mut rules = RuleSet::new("pattern");
        rules.add(Rule::pattern(FieldRef::output("id"), "^[0-9a-f]{32}$"));
        rules.add(Rule::pattern(FieldRef::output("id"), "(broken"));

        let mut set = OutputSet::new();
        set.insert("id".into(), OutputValue::scalar(DETECTOR_ID));

        let results = RuleEngine::new(rules).evaluate(&set);
        assert_eq!(results[0].outcome, CheckOutcome::Passed);
        assert_eq!(results[1].outcome, CheckOutcome::Failed);
        assert!(results[1].message.contains("invalid regex"));
    }

    #[test]
    fn test_missing_field_fails_only_its_rules() {
        let mut rules = RuleSet::new("independent");
        rules.add(Rule::exists(FieldRef::output("missing")));
        rules.add(Rule::exists(FieldRef::output("present")));
        rules.add(Rule::prefix(FieldRef::output("missing"), "x"));

        let mut set = OutputSet::new();
        set.insert("present".into(), OutputValue::scalar("yes"));

        let results = RuleEngine::new(rules).evaluate(&set);
        let outcomes: Vec<_> = results.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![CheckOutcome::Failed, CheckOutcome::Passed, CheckOutcome::Failed]
        );
        assert!(results[0].message.contains("missing"));
    }

    #[test]
    fn test_present_but_empty_status_is_checked() {
        let mut rules = RuleSet::new("status");
        rules.add(Rule::one_of(FieldRef::entry("detector", "status"), ["ENABLED"]).if_present());
        let engine = RuleEngine::new(rules);

        let results = engine.evaluate(&with_status(""));
        assert_eq!(results[0].outcome, CheckOutcome::Failed);

        let mut without = OutputSet::new();
        without.insert("detector".into(), OutputValue::structured([("id", DETECTOR_ID)]));
        let results = engine.evaluate(&without);
        assert_eq!(results[0].outcome, CheckOutcome::Skipped);
    }

    #[test]
    fn test_guardduty_rules_fail_empty_status() {
        let mut set = OutputSet::new();
        set.insert(
            "guardduty_detector".into(),
            OutputValue::structured([
                ("id", DETECTOR_ID.to_string()),
                ("arn", detector_arn(DETECTOR_ID)),
                ("status", String::new()),
                ("finding_publishing_frequency", String::new()),
            ]),
        );

        let results = RuleEngine::new(RuleSet::guardduty()).evaluate(&set);
        let outcome_of = |field: &str| {
            results
                .iter()
                .find(|r| r.fields == vec![field.to_string()])
                .map(|r| r.outcome)
        };

        assert_eq!(outcome_of("guardduty_detector.status"), Some(CheckOutcome::Failed));
        assert_eq!(
            outcome_of("guardduty_detector.finding_publishing_frequency"),
            Some(CheckOutcome::Skipped)
        );
    }

    #[test]
    fn test_panicking_check_fails_alone() {
        let mut rules = RuleSet::new("panics");
        rules.add(Rule::exists(FieldRef::output("first")));
        rules.add(Rule::exists(FieldRef::output("explodes")));
        rules.add(Rule::exists(FieldRef::output("last")));

        let mut set = OutputSet::new();
        set.insert("first".into(), OutputValue::scalar("a"));
        set.insert("explodes".into(), OutputValue::scalar("b"));
        set.insert("last".into(), OutputValue::scalar("c"));

        let results = RuleEngine::new(rules).evaluate_with(&set, |check, extractor| {
            if check.fields() == vec!["explodes".to_string()] {
                panic!("malformed output");
            }
            RuleEngine::run_check(check, extractor)
        });

        let outcomes: Vec<_> = results.iter().map(|r| r.outcome).collect();
        assert_eq!(
            outcomes,
            vec![CheckOutcome::Passed, CheckOutcome::Failed, CheckOutcome::Passed]
        );
        assert!(results[1].message.contains("check panicked: malformed output"));
    }
}
