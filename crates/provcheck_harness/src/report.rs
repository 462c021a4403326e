//! Run reports.

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::attribute::Attribute;
use crate::engine::{CheckOutcome, ValidationResult};

/// Overall classification of a run, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Destroy did not succeed; infrastructure may have been left behind.
    TeardownFailure,
    /// Apply did not succeed; no validation ran.
    ProvisioningFailure,
    /// At least one check failed.
    ValidationFailure,
    Passed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::TeardownFailure => "teardown_failure",
            RunOutcome::ProvisioningFailure => "provisioning_failure",
            RunOutcome::ValidationFailure => "validation_failure",
            RunOutcome::Passed => "passed",
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the apply phase ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProvisioningStatus {
    Succeeded { duration_ms: u64 },
    Failed { error: String },
    TimedOut { after_secs: u64 },
}

impl ProvisioningStatus {
    pub fn succeeded(&self) -> bool {
        matches!(self, ProvisioningStatus::Succeeded { .. })
    }
}

/// How the teardown obligation was discharged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeardownStatus {
    pub succeeded: bool,
    pub attempts: u32,
    /// Error of the last failed attempt
    pub error: Option<String>,
}

impl TeardownStatus {
    pub fn success(attempts: u32) -> Self {
        Self {
            succeeded: true,
            attempts,
            error: None,
        }
    }

    pub fn failure(attempts: u32, error: impl Into<String>) -> Self {
        Self {
            succeeded: false,
            attempts,
            error: Some(error.into()),
        }
    }
}

/// Counts over the validation results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Everything one provision / validate / teardown cycle produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub module: PathBuf,
    pub attribute: Attribute,
    pub rule_set: String,
    pub exclusive_kind: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub provisioning: ProvisioningStatus,
    pub results: Vec<ValidationResult>,
    pub teardown: TeardownStatus,
    pub outcome: RunOutcome,
    pub summary: ReportSummary,
}

impl RunReport {
    /// Classify a finished run; teardown failure outranks everything.
    pub fn classify(
        provisioning: &ProvisioningStatus,
        results: &[ValidationResult],
        teardown: &TeardownStatus,
    ) -> RunOutcome {
        if !teardown.succeeded {
            RunOutcome::TeardownFailure
        } else if !provisioning.succeeded() {
            RunOutcome::ProvisioningFailure
        } else if results.iter().any(|r| !r.is_pass()) {
            RunOutcome::ValidationFailure
        } else {
            RunOutcome::Passed
        }
    }

    pub fn summarize(results: &[ValidationResult]) -> ReportSummary {
        let count = |outcome: CheckOutcome| results.iter().filter(|r| r.outcome == outcome).count();
        ReportSummary {
            total: results.len(),
            passed: count(CheckOutcome::Passed),
            failed: count(CheckOutcome::Failed),
            skipped: count(CheckOutcome::Skipped),
        }
    }

    pub fn passed(&self) -> bool {
        self.outcome == RunOutcome::Passed
    }

    pub fn failures(&self) -> impl Iterator<Item = &ValidationResult> {
        self.results.iter().filter(|r| !r.is_pass())
    }

    /// Human-readable report listing every failed check.
    pub fn render(&self) -> String {
        let mut out = String::new();
        let status = if self.passed() { "✅ PASSED" } else { "❌ FAILED" };

        let _ = writeln!(out, "Run {} ({})", self.run_id, status);
        let _ = writeln!(out, "  Module:      {}", self.module.display());
        let _ = writeln!(out, "  Attribute:   {}", self.attribute);
        let _ = writeln!(out, "  Rule set:    {}", self.rule_set);
        if let Some(kind) = &self.exclusive_kind {
            let _ = writeln!(out, "  Exclusive:   {}", kind);
        }

        match &self.provisioning {
            ProvisioningStatus::Succeeded { duration_ms } => {
                let _ = writeln!(out, "  Provision:   ok ({} ms)", duration_ms);
            }
            ProvisioningStatus::Failed { error } => {
                let _ = writeln!(out, "  Provision:   FAILED: {}", error.trim());
            }
            ProvisioningStatus::TimedOut { after_secs } => {
                let _ = writeln!(out, "  Provision:   TIMED OUT after {}s", after_secs);
            }
        }

        if !self.results.is_empty() {
            let _ = writeln!(out);
            for result in &self.results {
                let icon = match result.outcome {
                    CheckOutcome::Passed => "✅",
                    CheckOutcome::Failed => "❌",
                    CheckOutcome::Skipped => "⏭️ ",
                };
                let _ = writeln!(out, "  {} {}", icon, result.check);
                if result.outcome != CheckOutcome::Passed {
                    let _ = writeln!(out, "      {}", result.message);
                }
            }
            let _ = writeln!(
                out,
                "\n  Checks:      {}/{} passed, {} skipped, {} failed",
                self.summary.passed, self.summary.total, self.summary.skipped, self.summary.failed
            );
        }

        if self.teardown.succeeded {
            let _ = writeln!(out, "  Teardown:    ok ({} attempt(s))", self.teardown.attempts);
        } else {
            let _ = writeln!(
                out,
                "  Teardown:    FAILED after {} attempt(s): {}",
                self.teardown.attempts,
                self.teardown.error.as_deref().unwrap_or("unknown error").trim()
            );
            let _ = writeln!(
                out,
                "  ⚠️  Resources for attribute {} may still exist in {}",
                self.attribute,
                self.module.display()
            );
        }

        let _ = writeln!(out, "  Outcome:     {}", self.outcome);
        out
    }
}
