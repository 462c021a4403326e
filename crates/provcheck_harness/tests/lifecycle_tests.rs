//! Lifecycle tests for the orchestrator.
//!
//! These drive complete runs against the in-memory mock backend and check
//! the teardown, isolation and reporting guarantees.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use provcheck_harness::{
    CheckOutcome, ExclusiveGates, FieldRef, HarnessOptions, Orchestrator, ProvisioningStatus, Rule,
    RuleSet, RunOutcome, RunRequest, UniquenessGenerator,
};
use provcheck_runner::{
    BackendCall, MockBackend, OutputSet, OutputValue, ProvisioningBackend, RunConfig, RunnerResult,
};

const DETECTOR_ID: &str = "12abc34d567e8fa901bc2d34e56789f0";

fn detector_arn() -> String {
    format!("arn:aws:guardduty:us-east-2:111111111111:detector/{}", DETECTOR_ID)
}

fn guardduty_outputs() -> OutputSet {
    let mut outputs = OutputSet::new();
    outputs.insert(
        "guardduty_detector".into(),
        OutputValue::structured([
            ("id", DETECTOR_ID.to_string()),
            ("arn", detector_arn()),
            ("status", "Enabled".to_string()),
            ("finding_publishing_frequency", "SIX_HOURS".to_string()),
        ]),
    );
    outputs.insert(
        "sns_topic".into(),
        OutputValue::structured([
            ("id", "arn:aws:sns:us-east-2:111111111111:eg-test-guardduty-00042"),
            ("arn", "arn:aws:sns:us-east-2:111111111111:eg-test-guardduty-00042"),
            ("name", "eg-test-guardduty-00042"),
        ]),
    );
    outputs.insert("guardduty_detector_id".into(), OutputValue::scalar(DETECTOR_ID));
    outputs.insert("guardduty_detector_arn".into(), OutputValue::scalar(detector_arn()));
    outputs
}

fn fast_options() -> HarnessOptions {
    HarnessOptions::default()
        .apply_timeout(Duration::from_secs(5))
        .destroy_timeout(Duration::from_secs(5))
        .teardown_attempts(3)
        .teardown_backoff(Duration::from_millis(1))
}

fn orchestrator(backend: &MockBackend) -> Orchestrator {
    Orchestrator::new(Arc::new(backend.clone())).with_options(fast_options())
}

fn request() -> RunRequest {
    RunRequest::new("examples/complete", RuleSet::guardduty())
        .var_file("fixtures.us-east-2.tfvars")
        .var("region", "us-east-2")
}

/// A well-formed module passes every check and is destroyed once.
#[tokio::test]
async fn test_successful_run() {
    let backend = MockBackend::new().with_outputs(guardduty_outputs());

    let report = orchestrator(&backend).run(request()).await;

    assert_eq!(report.outcome, RunOutcome::Passed, "{}", report.render());
    assert_eq!(report.results.len(), RuleSet::guardduty().len());
    assert!(report.provisioning.succeeded());
    assert!(report.teardown.succeeded);
    assert_eq!(report.teardown.attempts, 1);
    assert_eq!(backend.call_count(BackendCall::Apply), 1);
    assert_eq!(backend.call_count(BackendCall::Destroy), 1);
    assert!(backend.live_units().is_empty());
}

/// The attribute is injected under `attributes` and destroy sees exactly the
/// configuration apply saw.
#[tokio::test]
async fn test_destroy_uses_apply_config() {
    let backend = MockBackend::new().with_outputs(guardduty_outputs());
    let generator = UniquenessGenerator::with_source(Arc::new(|| Some(42)));

    let report = orchestrator(&backend)
        .with_generator(generator)
        .run(request().var("attributes", serde_json::json!(["caller"])))
        .await;

    assert_eq!(report.attribute.as_str(), "00042");
    let calls = backend.get_calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].config, calls[1].config);
    assert_eq!(calls[0].config.attribute(), Some("00042"));
    assert_eq!(calls[0].config.var_files.len(), 1);
}

/// Apply failure: no validation, destroy still invoked exactly once.
#[tokio::test]
async fn test_apply_failure_still_destroys() {
    let backend = MockBackend::new().failing_apply("BadRequestException: detector already exists");

    let report = orchestrator(&backend).run(request()).await;

    assert_eq!(report.outcome, RunOutcome::ProvisioningFailure);
    assert!(report.results.is_empty());
    assert!(matches!(report.provisioning, ProvisioningStatus::Failed { .. }));
    assert_eq!(backend.call_count(BackendCall::Destroy), 1);
    assert!(report.teardown.succeeded);
}

/// Apply timeout is a provisioning failure and still triggers destroy.
#[tokio::test]
async fn test_apply_timeout_still_destroys() {
    let backend = MockBackend::new()
        .with_outputs(guardduty_outputs())
        .with_apply_delay(Duration::from_secs(2));
    let options = fast_options().apply_timeout(Duration::from_millis(50));

    let report = orchestrator(&backend).with_options(options).run(request()).await;

    assert_eq!(report.outcome, RunOutcome::ProvisioningFailure);
    assert!(matches!(report.provisioning, ProvisioningStatus::TimedOut { .. }));
    assert_eq!(backend.call_count(BackendCall::Destroy), 1);
}

/// One failing check does not stop the others, and destroy runs once.
#[tokio::test]
async fn test_validation_failure_reports_all_checks() {
    let mut outputs = guardduty_outputs();
    outputs.insert("guardduty_detector_id".into(), OutputValue::scalar("mismatched"));
    let backend = MockBackend::new().with_outputs(outputs);

    let report = orchestrator(&backend).run(request()).await;

    assert_eq!(report.outcome, RunOutcome::ValidationFailure);
    assert_eq!(report.results.len(), RuleSet::guardduty().len());
    let failed: Vec<_> = report.failures().map(|r| r.check.as_str()).collect();
    assert_eq!(failed, vec!["guardduty_detector_id matches guardduty_detector_arn"]);
    assert_eq!(backend.call_count(BackendCall::Destroy), 1);
}

/// Missing outputs fail only the checks that read them.
#[tokio::test]
async fn test_missing_output_is_isolated() {
    let mut outputs = guardduty_outputs();
    outputs.remove("sns_topic");
    let backend = MockBackend::new().with_outputs(outputs);

    let report = orchestrator(&backend).run(request()).await;

    assert_eq!(report.outcome, RunOutcome::ValidationFailure);
    for result in report.failures() {
        assert!(result.fields.iter().all(|f| f.starts_with("sns_topic")), "{:?}", result);
    }
    assert_eq!(report.summary.failed, 2);
}

/// A composite id without the delimiter skips that check only.
#[tokio::test]
async fn test_malformed_composite_is_skipped() {
    let mut outputs = guardduty_outputs();
    outputs.insert(
        "guardduty_detector_arn".into(),
        OutputValue::scalar("arn:aws:guardduty:us-east-2:111111111111:unexpected"),
    );
    let backend = MockBackend::new().with_outputs(outputs);

    let report = orchestrator(&backend).run(request()).await;

    let suffix = report
        .results
        .iter()
        .find(|r| r.check == "guardduty_detector_id matches guardduty_detector_arn")
        .unwrap();
    assert_eq!(suffix.outcome, CheckOutcome::Skipped);
    assert_eq!(report.outcome, RunOutcome::Passed);
}

/// Destroy failures surface as teardown failure even when validation passed.
#[tokio::test]
async fn test_teardown_failure_outranks_passing_validation() {
    let backend = MockBackend::new()
        .with_outputs(guardduty_outputs())
        .failing_destroys(10);

    let report = orchestrator(&backend).run(request()).await;

    assert_eq!(report.outcome, RunOutcome::TeardownFailure);
    assert_eq!(report.summary.failed, 0);
    assert!(!report.teardown.succeeded);
    assert_eq!(report.teardown.attempts, 3);
    assert_eq!(backend.call_count(BackendCall::Destroy), 3);
    assert!(report.render().contains("may still exist"));
}

/// A transient destroy failure is retried within the attempt budget.
#[tokio::test]
async fn test_teardown_retry_recovers() {
    let backend = MockBackend::new()
        .with_outputs(guardduty_outputs())
        .failing_destroys(1);

    let report = orchestrator(&backend).run(request()).await;

    assert_eq!(report.outcome, RunOutcome::Passed);
    assert_eq!(report.teardown.attempts, 2);
}

/// Destroy timeouts count as failed attempts.
#[tokio::test]
async fn test_destroy_timeout_is_teardown_failure() {
    let backend = MockBackend::new()
        .with_outputs(guardduty_outputs())
        .with_destroy_delay(Duration::from_secs(2));
    let options = fast_options()
        .destroy_timeout(Duration::from_millis(20))
        .teardown_attempts(2);

    let report = orchestrator(&backend).with_options(options).run(request()).await;

    assert_eq!(report.outcome, RunOutcome::TeardownFailure);
    assert!(report.teardown.error.as_deref().unwrap().contains("timed out"));
}

/// Two runs of an exclusive kind never overlap between apply and destroy.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exclusive_runs_never_overlap() {
    let backend = MockBackend::new()
        .with_outputs(guardduty_outputs())
        .with_apply_delay(Duration::from_millis(50))
        .with_destroy_delay(Duration::from_millis(20));
    let orchestrator = orchestrator(&backend);

    let requests = vec![
        request().exclusive("guardduty-detector"),
        request().exclusive("guardduty-detector"),
    ];
    let reports = orchestrator.run_all(requests, 2).await;

    assert_eq!(reports.len(), 2);
    assert!(reports.iter().all(|r| r.passed()));
    assert_eq!(backend.max_concurrent(), 1);
}

/// Exclusive gates shared between orchestrators still serialize runs.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exclusive_gate_shared_between_orchestrators() {
    let backend = MockBackend::new()
        .with_outputs(guardduty_outputs())
        .with_apply_delay(Duration::from_millis(50));
    let gates = ExclusiveGates::new();
    let a = orchestrator(&backend).with_gates(gates.clone());
    let b = orchestrator(&backend).with_gates(gates);

    let (ra, rb) = tokio::join!(
        a.run(request().exclusive("guardduty-detector")),
        b.run(request().exclusive("guardduty-detector")),
    );

    assert!(ra.passed() && rb.passed());
    assert_eq!(backend.max_concurrent(), 1);
}

/// Runs of a non-exclusive module may overlap.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_non_exclusive_runs_overlap() {
    let backend = MockBackend::new()
        .with_outputs(guardduty_outputs())
        .with_apply_delay(Duration::from_millis(200));
    let orchestrator = orchestrator(&backend);

    let reports = orchestrator.run_all(vec![request(), request()], 2).await;

    assert!(reports.iter().all(|r| r.passed()));
    assert_eq!(backend.max_concurrent(), 2);
}

/// Rule sets built in code go through the same pipeline.
#[tokio::test]
async fn test_custom_rule_set() {
    let mut outputs = OutputSet::new();
    outputs.insert("bucket_id".into(), OutputValue::scalar("eg-test-bucket-00042"));
    let backend = MockBackend::new().with_outputs(outputs);

    let mut rules = RuleSet::new("bucket");
    rules.add(Rule::pattern(FieldRef::output("bucket_id"), r"^eg-test-bucket-\d{5}$"));
    rules.add(Rule::exists(FieldRef::output("bucket_arn")));

    let report = orchestrator(&backend)
        .run(RunRequest::new("modules/bucket", rules))
        .await;

    assert_eq!(report.rule_set, "bucket");
    assert_eq!(report.summary.passed, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.outcome, RunOutcome::ValidationFailure);
}

/// Per-request options take precedence over the orchestrator's.
#[tokio::test]
async fn test_request_options_override_orchestrator() {
    let backend = MockBackend::new()
        .with_outputs(guardduty_outputs())
        .failing_destroys(10);

    let report = orchestrator(&backend)
        .run(request().options(fast_options().teardown_attempts(1)))
        .await;

    assert_eq!(report.outcome, RunOutcome::TeardownFailure);
    assert_eq!(report.teardown.attempts, 1);
    assert_eq!(backend.call_count(BackendCall::Destroy), 1);
}

/// Backend whose cancelled operations take a while to wind down. Counts
/// destroys that start while an earlier apply or destroy is still live.
#[derive(Clone, Default)]
struct SlowCancelBackend {
    hang_apply: bool,
    hang_first_destroy: bool,
    live: Arc<AtomicBool>,
    overlaps: Arc<AtomicUsize>,
    destroys: Arc<AtomicUsize>,
}

struct LiveGuard(Arc<AtomicBool>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        std::thread::sleep(Duration::from_millis(300));
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SlowCancelBackend {
    async fn hang(&self) {
        self.live.store(true, Ordering::SeqCst);
        let _guard = LiveGuard(self.live.clone());
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

#[async_trait]
impl ProvisioningBackend for SlowCancelBackend {
    fn name(&self) -> &str {
        "slow-cancel"
    }

    async fn apply(&self, _config: &RunConfig) -> RunnerResult<OutputSet> {
        if self.hang_apply {
            self.hang().await;
        }
        Ok(OutputSet::new())
    }

    async fn destroy(&self, _config: &RunConfig) -> RunnerResult<()> {
        if self.live.load(Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        let previous = self.destroys.fetch_add(1, Ordering::SeqCst);
        if self.hang_first_destroy && previous == 0 {
            self.hang().await;
        }
        Ok(())
    }
}

/// A timed-out apply has fully stopped before destroy starts.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_destroy_waits_for_cancelled_apply() {
    let backend = SlowCancelBackend {
        hang_apply: true,
        ..Default::default()
    };
    let options = fast_options().apply_timeout(Duration::from_millis(50));

    let report = Orchestrator::new(Arc::new(backend.clone()))
        .with_options(options)
        .run(request())
        .await;

    assert_eq!(report.outcome, RunOutcome::ProvisioningFailure);
    assert_eq!(backend.destroys.load(Ordering::SeqCst), 1);
    assert_eq!(backend.overlaps.load(Ordering::SeqCst), 0);
}

/// A timed-out destroy attempt has fully stopped before the next one starts.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_destroy_retry_waits_for_cancelled_attempt() {
    let backend = SlowCancelBackend {
        hang_first_destroy: true,
        ..Default::default()
    };
    let options = fast_options()
        .destroy_timeout(Duration::from_millis(50))
        .teardown_attempts(2);

    let report = Orchestrator::new(Arc::new(backend.clone()))
        .with_options(options)
        .run(RunRequest::new("examples/complete", RuleSet::new("none")))
        .await;

    assert_eq!(report.outcome, RunOutcome::Passed, "{}", report.render());
    assert_eq!(report.teardown.attempts, 2);
    assert_eq!(backend.destroys.load(Ordering::SeqCst), 2);
    assert_eq!(backend.overlaps.load(Ordering::SeqCst), 0);
}
