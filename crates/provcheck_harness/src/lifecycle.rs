//! Provision / validate / teardown lifecycle.
//!
//! ```text
//! generate attribute -> build RunConfig -> [exclusive gate]
//!   -> arm teardown obligation -> apply -> extract + validate
//!   -> destroy (always) -> [release gate] -> RunReport
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use provcheck_runner::{OutputSet, ProvisioningBackend, RunConfig, ATTRIBUTES_VAR};

use crate::attribute::{Attribute, UniquenessGenerator};
use crate::engine::{RuleEngine, ValidationResult};
use crate::extract::OutputExtractor;
use crate::gate::ExclusiveGates;
use crate::report::{ProvisioningStatus, RunReport, TeardownStatus};
use crate::rules::RuleSet;

/// Check name recorded when validation itself crashes.
pub const INTERNAL_FAULT_CHECK: &str = "internal-fault";

/// How long a cancelled apply or destroy may take to wind down.
const CANCEL_GRACE: Duration = Duration::from_secs(60);

type Evaluator = fn(&RuleEngine, &OutputSet) -> Vec<ValidationResult>;

/// Abort `task` and wait until it has actually stopped, so the step that
/// follows never overlaps it.
async fn cancel<T>(task: JoinHandle<T>, what: &str) {
    task.abort();
    if tokio::time::timeout(CANCEL_GRACE, task).await.is_err() {
        warn!(
            "Cancelled {} still running after {}s; continuing",
            what,
            CANCEL_GRACE.as_secs()
        );
    }
}

/// Timeouts and teardown retry policy. Durations are whole seconds in
/// suite files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessOptions {
    /// Upper bound for apply (including init and output)
    #[serde(with = "duration_secs")]
    pub apply_timeout: Duration,
    /// Upper bound for each destroy attempt
    #[serde(with = "duration_secs")]
    pub destroy_timeout: Duration,
    /// Destroy attempts before reporting a teardown failure
    pub teardown_attempts: u32,
    /// Base delay between destroy attempts; grows linearly
    #[serde(with = "duration_secs")]
    pub teardown_backoff: Duration,
}

impl Default for HarnessOptions {
    fn default() -> Self {
        Self {
            apply_timeout: Duration::from_secs(30 * 60),
            destroy_timeout: Duration::from_secs(30 * 60),
            teardown_attempts: 3,
            teardown_backoff: Duration::from_secs(10),
        }
    }
}

impl HarnessOptions {
    pub fn apply_timeout(mut self, timeout: Duration) -> Self {
        self.apply_timeout = timeout;
        self
    }

    pub fn destroy_timeout(mut self, timeout: Duration) -> Self {
        self.destroy_timeout = timeout;
        self
    }

    pub fn teardown_attempts(mut self, attempts: u32) -> Self {
        self.teardown_attempts = attempts.max(1);
        self
    }

    pub fn teardown_backoff(mut self, backoff: Duration) -> Self {
        self.teardown_backoff = backoff;
        self
    }
}

mod duration_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

/// What to provision and how to judge it.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub module_dir: PathBuf,
    pub var_files: Vec<PathBuf>,
    pub vars: BTreeMap<String, Value>,
    pub env: BTreeMap<String, String>,
    pub upgrade: bool,
    pub rules: RuleSet,
    /// Resource kind that allows one live instance per account, if any
    pub exclusive_kind: Option<String>,
    /// Timeouts and retries for this request; the orchestrator's otherwise
    pub options: Option<HarnessOptions>,
}

impl RunRequest {
    pub fn new(module_dir: impl Into<PathBuf>, rules: RuleSet) -> Self {
        Self {
            module_dir: module_dir.into(),
            var_files: Vec::new(),
            vars: BTreeMap::new(),
            env: BTreeMap::new(),
            upgrade: true,
            rules,
            exclusive_kind: None,
            options: None,
        }
    }

    pub fn var_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.var_files.push(path.into());
        self
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn exclusive(mut self, kind: impl Into<String>) -> Self {
        self.exclusive_kind = Some(kind.into());
        self
    }

    pub fn options(mut self, options: HarnessOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Build the run's configuration with `attribute` injected under
    /// `attributes`, replacing any caller-supplied value.
    pub fn config_for(&self, attribute: &Attribute) -> RunConfig {
        let mut vars = self.vars.clone();
        vars.insert(
            ATTRIBUTES_VAR.to_string(),
            Value::Array(vec![Value::String(attribute.to_string())]),
        );

        let mut config = RunConfig::new(&self.module_dir)
            .vars(vars)
            .var_files(self.var_files.iter().cloned())
            .upgrade(self.upgrade);
        config.env = self.env.clone();
        config
    }
}

/// A live module instance and the outputs it declared.
#[derive(Debug, Clone)]
pub struct ProvisionedUnit {
    config: Arc<RunConfig>,
    outputs: OutputSet,
}

impl ProvisionedUnit {
    pub fn new(config: Arc<RunConfig>, outputs: OutputSet) -> Self {
        Self { config, outputs }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn outputs(&self) -> &OutputSet {
        &self.outputs
    }

    pub fn extractor(&self) -> OutputExtractor<'_> {
        OutputExtractor::new(&self.outputs)
    }
}

/// The destroy attempt owed to a run once apply has been called.
///
/// [`discharge`](Self::discharge) runs destroy with bounded retries. If the
/// obligation is dropped without being discharged (the run future was
/// cancelled), a best-effort destroy is spawned on the current runtime.
pub struct TeardownObligation {
    backend: Arc<dyn ProvisioningBackend>,
    config: Arc<RunConfig>,
    options: HarnessOptions,
    armed: bool,
}

impl TeardownObligation {
    pub fn arm(
        backend: Arc<dyn ProvisioningBackend>,
        config: Arc<RunConfig>,
        options: HarnessOptions,
    ) -> Self {
        debug!("Teardown obligation armed for {:?}", config.module_dir);
        Self {
            backend,
            config,
            options,
            armed: true,
        }
    }

    /// Destroy the unit, retrying up to the configured number of attempts.
    pub async fn discharge(mut self) -> TeardownStatus {
        let attempts = self.options.teardown_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            info!(
                "Destroying {:?} (attempt {}/{})",
                self.config.module_dir, attempt, attempts
            );

            let backend = self.backend.clone();
            let config = self.config.clone();
            let mut task = tokio::spawn(async move { backend.destroy(&config).await });

            let finished = tokio::time::timeout(self.options.destroy_timeout, &mut task).await;
            match finished {
                Ok(Ok(Ok(()))) => {
                    self.armed = false;
                    return TeardownStatus::success(attempt);
                }
                Ok(Ok(Err(e))) => last_error = e.to_string(),
                Ok(Err(join)) => last_error = format!("destroy task failed: {}", join),
                Err(_) => {
                    cancel(task, "destroy").await;
                    last_error = format!(
                        "destroy timed out after {}s",
                        self.options.destroy_timeout.as_secs()
                    );
                }
            }

            warn!("Destroy attempt {} failed: {}", attempt, last_error.trim());
            if attempt < attempts {
                tokio::time::sleep(self.options.teardown_backoff * attempt).await;
            }
        }

        self.armed = false;
        error!(
            "Teardown failed after {} attempts; resources for {:?} may still exist",
            attempts, self.config.module_dir
        );
        TeardownStatus::failure(attempts, last_error)
    }
}

impl Drop for TeardownObligation {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        error!(
            "Run for {:?} (attribute {}) ended without teardown; attempting destroy in the background",
            self.config.module_dir,
            self.config.attribute().unwrap_or("-")
        );
        let backend = self.backend.clone();
        let config = self.config.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = backend.destroy(&config).await {
                        error!("Background destroy of {:?} failed: {}", config.module_dir, e);
                    }
                });
            }
            Err(_) => error!("No runtime available; destroy {:?} manually", config.module_dir),
        }
    }
}

/// Drives runs through the full lifecycle.
#[derive(Clone)]
pub struct Orchestrator {
    backend: Arc<dyn ProvisioningBackend>,
    generator: UniquenessGenerator,
    gates: ExclusiveGates,
    options: HarnessOptions,
    evaluator: Evaluator,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn ProvisioningBackend>) -> Self {
        Self {
            backend,
            generator: UniquenessGenerator::new(),
            gates: ExclusiveGates::new(),
            options: HarnessOptions::default(),
            evaluator: RuleEngine::evaluate,
        }
    }

    pub fn with_options(mut self, options: HarnessOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_generator(mut self, generator: UniquenessGenerator) -> Self {
        self.generator = generator;
        self
    }

    /// Share exclusive gates with other orchestrators.
    pub fn with_gates(mut self, gates: ExclusiveGates) -> Self {
        self.gates = gates;
        self
    }

    pub fn options(&self) -> &HarnessOptions {
        &self.options
    }

    pub fn gates(&self) -> &ExclusiveGates {
        &self.gates
    }

    /// Run one full provision / validate / teardown cycle.
    ///
    /// Never returns before destroy has been attempted and its outcome
    /// recorded.
    pub async fn run(&self, request: RunRequest) -> RunReport {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let attribute = self.generator.generate();
        let config = Arc::new(request.config_for(&attribute));

        info!(
            "Run {} starting: module {:?}, attribute {}, backend {}",
            run_id,
            config.module_dir,
            attribute,
            self.backend.name()
        );

        let permit = match &request.exclusive_kind {
            Some(kind) => Some(self.gates.acquire(kind).await),
            None => None,
        };

        let options = request.options.clone().unwrap_or_else(|| self.options.clone());
        let obligation =
            TeardownObligation::arm(self.backend.clone(), config.clone(), options.clone());

        let (provisioning, results) = match self.provision(&config, &options).await {
            Ok((unit, duration_ms)) => (
                ProvisioningStatus::Succeeded { duration_ms },
                self.validate(unit, &request.rules).await,
            ),
            Err(status) => (status, Vec::new()),
        };

        let teardown = obligation.discharge().await;
        drop(permit);

        let outcome = RunReport::classify(&provisioning, &results, &teardown);
        let summary = RunReport::summarize(&results);
        info!("Run {} finished: {}", run_id, outcome);

        RunReport {
            run_id,
            module: config.module_dir.clone(),
            attribute,
            rule_set: request.rules.name.clone(),
            exclusive_kind: request.exclusive_kind.clone(),
            started_at,
            finished_at: Utc::now(),
            provisioning,
            results,
            teardown,
            outcome,
            summary,
        }
    }

    /// Apply the module. Any failure, panic or timeout is returned as the
    /// provisioning status to report.
    async fn provision(
        &self,
        config: &Arc<RunConfig>,
        options: &HarnessOptions,
    ) -> Result<(ProvisionedUnit, u64), ProvisioningStatus> {
        let start = Instant::now();
        let backend = self.backend.clone();
        let apply_config = config.clone();
        let mut task = tokio::spawn(async move { backend.apply(&apply_config).await });

        let finished = tokio::time::timeout(options.apply_timeout, &mut task).await;
        let status = match finished {
            Ok(Ok(Ok(outputs))) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                info!(
                    "Provisioned {:?} in {} ms ({} outputs)",
                    config.module_dir,
                    duration_ms,
                    outputs.len()
                );
                return Ok((ProvisionedUnit::new(config.clone(), outputs), duration_ms));
            }
            Ok(Ok(Err(e))) => ProvisioningStatus::Failed {
                error: e.to_string(),
            },
            Ok(Err(join)) => ProvisioningStatus::Failed {
                error: format!("apply task failed: {}", join),
            },
            Err(_) => {
                cancel(task, "apply").await;
                ProvisioningStatus::TimedOut {
                    after_secs: options.apply_timeout.as_secs(),
                }
            }
        };

        error!("Provisioning {:?} failed: {:?}", config.module_dir, status);
        Err(status)
    }

    /// Run the rule engine off the async executor; a crash is recorded as a
    /// failed check rather than propagated.
    async fn validate(&self, unit: ProvisionedUnit, rules: &RuleSet) -> Vec<ValidationResult> {
        let engine = RuleEngine::new(rules.clone());
        let evaluate = self.evaluator;
        info!(
            "Validating {} outputs against rule set '{}' ({} rules)",
            unit.outputs().len(),
            rules.name,
            rules.len()
        );

        match tokio::task::spawn_blocking(move || evaluate(&engine, unit.outputs())).await {
            Ok(results) => {
                let failed = results.iter().filter(|r| !r.is_pass()).count();
                if failed > 0 {
                    warn!("{} of {} checks failed", failed, results.len());
                }
                results
            }
            Err(join) => {
                error!("Validation crashed: {}", join);
                vec![ValidationResult::failed(
                    INTERNAL_FAULT_CHECK,
                    format!("validation crashed: {}", join),
                    Vec::new(),
                )]
            }
        }
    }

    /// Run several requests concurrently, at most `parallelism` at a time.
    ///
    /// Exclusive gates still apply, so requests sharing a resource kind run
    /// one after another. Reports are returned in request order.
    pub async fn run_all(&self, requests: Vec<RunRequest>, parallelism: usize) -> Vec<RunReport> {
        let limit = Arc::new(Semaphore::new(parallelism.max(1)));
        let mut set = JoinSet::new();

        for (index, request) in requests.into_iter().enumerate() {
            let orchestrator = self.clone();
            let limit = limit.clone();
            set.spawn(async move {
                let _slot = limit.acquire_owned().await.ok();
                (index, orchestrator.run(request).await)
            });
        }

        let mut reports = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(entry) => reports.push(entry),
                Err(e) => error!("Run task failed: {}", e),
            }
        }
        reports.sort_by_key(|(index, _)| *index);
        reports.into_iter().map(|(_, report)| report).collect()
    }
}
