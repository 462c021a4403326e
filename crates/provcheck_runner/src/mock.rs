//! Mock provisioning for testing.
//!
//! [`MockCommandRunner`] scripts the output of external commands so the
//! Terraform backend can be exercised without terraform installed.
//! [`MockBackend`] stands in for the whole provisioning capability and
//! records every apply/destroy so lifecycle guarantees can be asserted.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};

use crate::backend::ProvisioningBackend;
use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::RunConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::outputs::OutputSet;

/// Predefined response for a command execution.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl MockResponse {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Command runner returning scripted responses in order.
#[derive(Clone, Default)]
pub struct MockCommandRunner {
    available: Arc<RwLock<bool>>,
    responses: Arc<RwLock<Vec<MockResponse>>>,
    response_index: Arc<AtomicUsize>,
    captured: Arc<RwLock<Vec<CommandSpec>>>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self {
            available: Arc::new(RwLock::new(true)),
            ..Default::default()
        }
    }

    pub fn set_available(self, available: bool) -> Self {
        *self.available.write() = available;
        self
    }

    /// Add a response for the next `run` call.
    pub fn add_response(self, response: MockResponse) -> Self {
        self.responses.write().push(response);
        self
    }

    pub fn with_responses(self, responses: Vec<MockResponse>) -> Self {
        *self.responses.write() = responses;
        self
    }

    /// All commands run so far.
    pub fn get_calls(&self) -> Vec<CommandSpec> {
        self.captured.read().clone()
    }

    /// Terraform subcommands run so far (first argument of each call).
    pub fn subcommands(&self) -> Vec<String> {
        self.captured
            .read()
            .iter()
            .filter_map(|c| c.args.first().cloned())
            .collect()
    }

    fn next_response(&self) -> MockResponse {
        let responses = self.responses.read();
        let index = self.response_index.fetch_add(1, Ordering::SeqCst);
        // Unscripted calls succeed silently.
        responses
            .get(index)
            .cloned()
            .unwrap_or_else(|| MockResponse::success(""))
    }
}

#[async_trait]
impl CommandRunner for MockCommandRunner {
    async fn is_available(&self, _program: &str) -> bool {
        *self.available.read()
    }

    async fn run(&self, spec: &CommandSpec) -> RunnerResult<CommandOutput> {
        self.captured.write().push(spec.clone());
        let response = self.next_response();
        Ok(CommandOutput {
            exit_code: response.exit_code,
            stdout: response.stdout,
            stderr: response.stderr,
            started_at: Utc::now(),
            duration_ms: 0,
        })
    }
}

/// Which backend operation a captured call was.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendCall {
    Apply,
    Destroy,
}

/// Captured backend call for verification.
#[derive(Debug, Clone)]
pub struct CapturedCall {
    pub call: BackendCall,
    pub config: RunConfig,
}

#[derive(Debug, Clone)]
enum ApplyBehaviour {
    Succeed(OutputSet),
    Fail(String),
}

/// In-memory provisioning backend.
///
/// Tracks which run attributes are between apply start and destroy end, so
/// tests can observe how many apply-through-destroy windows overlapped.
#[derive(Clone)]
pub struct MockBackend {
    apply: Arc<RwLock<ApplyBehaviour>>,
    apply_delay: Arc<RwLock<Duration>>,
    destroy_delay: Arc<RwLock<Duration>>,
    destroy_failures: Arc<AtomicUsize>,
    captured: Arc<RwLock<Vec<CapturedCall>>>,
    live: Arc<Mutex<BTreeSet<String>>>,
    max_live: Arc<AtomicUsize>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// A backend whose apply succeeds with no outputs.
    pub fn new() -> Self {
        Self {
            apply: Arc::new(RwLock::new(ApplyBehaviour::Succeed(OutputSet::new()))),
            apply_delay: Arc::new(RwLock::new(Duration::ZERO)),
            destroy_delay: Arc::new(RwLock::new(Duration::ZERO)),
            destroy_failures: Arc::new(AtomicUsize::new(0)),
            captured: Arc::new(RwLock::new(Vec::new())),
            live: Arc::new(Mutex::new(BTreeSet::new())),
            max_live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Apply succeeds and reports these outputs.
    pub fn with_outputs(self, outputs: OutputSet) -> Self {
        *self.apply.write() = ApplyBehaviour::Succeed(outputs);
        self
    }

    /// Apply fails with this message.
    pub fn failing_apply(self, message: impl Into<String>) -> Self {
        *self.apply.write() = ApplyBehaviour::Fail(message.into());
        self
    }

    pub fn with_apply_delay(self, delay: Duration) -> Self {
        *self.apply_delay.write() = delay;
        self
    }

    pub fn with_destroy_delay(self, delay: Duration) -> Self {
        *self.destroy_delay.write() = delay;
        self
    }

    /// The next `count` destroy calls fail.
    pub fn failing_destroys(self, count: usize) -> Self {
        self.destroy_failures.store(count, Ordering::SeqCst);
        self
    }

    pub fn get_calls(&self) -> Vec<CapturedCall> {
        self.captured.read().clone()
    }

    pub fn call_count(&self, call: BackendCall) -> usize {
        self.captured.read().iter().filter(|c| c.call == call).count()
    }

    /// Attributes currently inside an apply-through-destroy window.
    pub fn live_units(&self) -> Vec<String> {
        self.live.lock().iter().cloned().collect()
    }

    /// Highest number of simultaneously live units observed.
    pub fn max_concurrent(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    fn unit_key(config: &RunConfig) -> String {
        config
            .attribute()
            .map(str::to_string)
            .unwrap_or_else(|| config.module_dir.to_string_lossy().into_owned())
    }

    fn record(&self, call: BackendCall, config: &RunConfig) {
        self.captured.write().push(CapturedCall {
            call,
            config: config.clone(),
        });
    }
}

#[async_trait]
impl ProvisioningBackend for MockBackend {
    fn name(&self) -> &str {
        "mock"
    }

    async fn apply(&self, config: &RunConfig) -> RunnerResult<OutputSet> {
        self.record(BackendCall::Apply, config);
        {
            let mut live = self.live.lock();
            live.insert(Self::unit_key(config));
            self.max_live.fetch_max(live.len(), Ordering::SeqCst);
        }

        let delay = *self.apply_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let behaviour = self.apply.read().clone();
        match behaviour {
            ApplyBehaviour::Succeed(outputs) => Ok(outputs),
            ApplyBehaviour::Fail(message) => Err(RunnerError::ApplyFailed(message)),
        }
    }

    async fn destroy(&self, config: &RunConfig) -> RunnerResult<()> {
        self.record(BackendCall::Destroy, config);

        let delay = *self.destroy_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .destroy_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RunnerError::DestroyFailed("simulated destroy failure".to_string()));
        }

        self.live.lock().remove(&Self::unit_key(config));
        Ok(())
    }
}
