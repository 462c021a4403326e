//! Run command - provision, validate and tear down modules.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde_json::Value;
use tracing::{error, info, warn};

use provcheck_harness::{
    HarnessError, HarnessOptions, Orchestrator, RuleSet, RunOutcome, RunReport, RunRequest, Suite,
};
use provcheck_runner::{TerraformBackend, TokioCommandRunner};

use crate::ExitCodes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Suite file(s); several suites run concurrently
    #[arg(short, long)]
    suite: Vec<PathBuf>,

    /// Module directory (when no suite is given)
    #[arg(short, long, conflicts_with = "suite")]
    module: Option<PathBuf>,

    /// Variable file, relative to the module (repeatable)
    #[arg(long = "var-file", value_name = "FILE")]
    var_files: Vec<PathBuf>,

    /// Input variable NAME=VALUE; VALUE is parsed as JSON when possible
    #[arg(long = "var", value_name = "NAME=VALUE", value_parser = parse_var)]
    vars: Vec<(String, Value)>,

    /// Rule set: built-in name or YAML file
    #[arg(short, long)]
    rules: Option<String>,

    /// Resource kind allowing one live instance per account
    #[arg(long, value_name = "KIND")]
    exclusive: Option<String>,

    /// Skip provider/module upgrade during init
    #[arg(long)]
    no_upgrade: bool,

    /// Apply timeout in seconds
    #[arg(long, value_name = "SECS")]
    apply_timeout: Option<u64>,

    /// Timeout per destroy attempt in seconds
    #[arg(long, value_name = "SECS")]
    destroy_timeout: Option<u64>,

    /// Destroy attempts before reporting a teardown failure
    #[arg(long, value_name = "N")]
    teardown_attempts: Option<u32>,

    /// Base delay between destroy attempts in seconds
    #[arg(long, value_name = "SECS")]
    teardown_backoff: Option<u64>,

    /// Terraform binary
    #[arg(long, env = provcheck_runner::TERRAFORM_BIN_ENV, default_value = "terraform")]
    terraform: String,

    /// Maximum concurrent runs
    #[arg(long, default_value_t = 1)]
    parallel: usize,

    /// Report format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

/// Parse `NAME=VALUE`.
pub fn parse_var(raw: &str) -> Result<(String, Value), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{}'", raw))?;
    if name.is_empty() {
        return Err(format!("variable name missing in '{}'", raw));
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((name.to_string(), value))
}

impl RunArgs {
    /// Apply command-line overrides on top of suite (or default) options.
    fn options(&self, base: HarnessOptions) -> HarnessOptions {
        let mut options = base;
        if let Some(secs) = self.apply_timeout {
            options = options.apply_timeout(Duration::from_secs(secs));
        }
        if let Some(secs) = self.destroy_timeout {
            options = options.destroy_timeout(Duration::from_secs(secs));
        }
        if let Some(n) = self.teardown_attempts {
            options = options.teardown_attempts(n);
        }
        if let Some(secs) = self.teardown_backoff {
            options = options.teardown_backoff(Duration::from_secs(secs));
        }
        options
    }

    /// Apply command-line overrides to a request, its options included.
    fn customize(&self, mut request: RunRequest) -> Result<RunRequest> {
        let base = request.options.take().unwrap_or_default();
        request.options = Some(self.options(base));
        if let Some(reference) = &self.rules {
            request.rules = RuleSet::resolve(reference)
                .with_context(|| format!("Failed to load rule set '{}'", reference))?;
        }
        request.var_files.extend(self.var_files.iter().cloned());
        request
            .vars
            .extend(self.vars.iter().map(|(k, v)| (k.clone(), v.clone())));
        if self.exclusive.is_some() {
            request.exclusive_kind = self.exclusive.clone();
        }
        if self.no_upgrade {
            request.upgrade = false;
        }
        Ok(request)
    }

    /// Build run requests from suites or flags. Each request carries its
    /// own options.
    pub fn plan(&self) -> Result<Vec<RunRequest>> {
        if self.suite.is_empty() {
            let Some(module) = &self.module else {
                return Err(HarnessError::InvalidSuite(
                    "either --suite or --module is required".to_string(),
                )
                .into());
            };
            let request = self.customize(RunRequest::new(module, RuleSet::guardduty()))?;
            return Ok(vec![request]);
        }

        self.suite
            .iter()
            .map(|path| {
                let suite = Suite::load(path)
                    .with_context(|| format!("Failed to load suite {}", path.display()))?;
                self.customize(suite.to_request()?)
            })
            .collect()
    }
}

pub async fn execute(args: RunArgs) -> Result<u8> {
    let requests = args.plan()?;
    let expected = requests.len();

    let backend = TerraformBackend::new(Arc::new(TokioCommandRunner::new()))
        .with_binary(&args.terraform);
    backend
        .check_available()
        .await
        .context("Terraform is required to provision modules")?;

    spawn_interrupt_guard();

    let orchestrator = Orchestrator::new(Arc::new(backend));
    info!("Starting {} run(s)", expected);
    let reports = orchestrator.run_all(requests, args.parallel).await;

    println!("{}", render_reports(&reports, args.format)?);

    let outcomes: Vec<RunOutcome> = reports.iter().map(|r| r.outcome).collect();
    Ok(exit_code(&outcomes, expected))
}

/// Exit code for a batch: the worst outcome, or a general error when some
/// run produced no report at all.
fn exit_code(outcomes: &[RunOutcome], expected: usize) -> u8 {
    if outcomes.len() < expected {
        error!(
            "{} of {} runs ended without a report",
            expected - outcomes.len(),
            expected
        );
        return ExitCodes::GENERAL_ERROR;
    }
    outcomes
        .iter()
        .min()
        .copied()
        .map(ExitCodes::for_outcome)
        .unwrap_or(ExitCodes::GENERAL_ERROR)
}

fn render_reports(reports: &[RunReport], format: OutputFormat) -> Result<String> {
    match format {
        // Always an array, whatever the number of runs.
        OutputFormat::Json => {
            serde_json::to_string_pretty(reports).context("Failed to serialize report")
        }
        OutputFormat::Text => Ok(reports
            .iter()
            .map(RunReport::render)
            .collect::<Vec<_>>()
            .join("\n")),
    }
}

/// Keep teardown alive through Ctrl-C.
///
/// The first interrupt is logged and otherwise ignored so the running
/// destroy can finish; a second one exits immediately.
fn spawn_interrupt_guard() {
    tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupt received; waiting for teardown to finish (press Ctrl-C again to abort)");
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Aborting; provisioned resources may be left behind");
            std::process::exit(130);
        }
    });
}
