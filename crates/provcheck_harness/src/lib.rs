//! # provcheck_harness
//!
//! Provision one infrastructure module, validate its outputs, and always
//! tear it down again.
//!
//! This crate provides:
//! - **Uniqueness generator**: per-run attributes that namespace resource names
//! - **Orchestrator**: apply, validate and a destroy that runs on every exit path
//! - **Exclusive gates**: serialize runs of account-singleton resource kinds
//! - **Output extractor**: typed access to scalar and structured outputs
//! - **Rule engine**: ordered, independent checks that report every failure
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use provcheck_harness::{Orchestrator, RuleSet, RunRequest};
//! use provcheck_runner::{TerraformBackend, TokioCommandRunner};
//!
//! # async fn example() {
//! let backend = TerraformBackend::new(Arc::new(TokioCommandRunner::new()));
//! let orchestrator = Orchestrator::new(Arc::new(backend));
//!
//! let request = RunRequest::new("examples/complete", RuleSet::guardduty())
//!     .var_file("fixtures.us-east-2.tfvars")
//!     .exclusive("guardduty-detector");
//!
//! let report = orchestrator.run(request).await;
//! println!("{}", report.render());
//! # }
//! ```

pub mod attribute;
pub mod engine;
pub mod error;
pub mod extract;
pub mod gate;
pub mod lifecycle;
pub mod report;
pub mod rules;
pub mod suite;

pub use attribute::{Attribute, UniquenessGenerator, ATTRIBUTE_SPACE, ATTRIBUTE_WIDTH};
pub use engine::{CheckOutcome, RuleEngine, ValidationResult};
pub use error::{ExtractionError, HarnessError, HarnessResult};
pub use extract::OutputExtractor;
pub use gate::{ExclusiveGates, GatePermit};
pub use lifecycle::{
    HarnessOptions, Orchestrator, ProvisionedUnit, RunRequest, TeardownObligation,
    INTERNAL_FAULT_CHECK,
};
pub use report::{ProvisioningStatus, ReportSummary, RunOutcome, RunReport, TeardownStatus};
pub use rules::{Check, FieldRef, Presence, Rule, RuleSet, BUILTIN_RULE_SETS};
pub use suite::{RulesSource, Suite};
