//! Terraform CLI backend.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::backend::ProvisioningBackend;
use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::RunConfig;
use crate::error::{RunnerError, RunnerResult};
use crate::outputs::{parse_terraform_outputs, OutputSet};

/// Environment variable overriding the terraform binary.
pub const TERRAFORM_BIN_ENV: &str = "PROVCHECK_TERRAFORM";

/// Drives the `terraform` binary through a [`CommandRunner`].
pub struct TerraformBackend {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    command_timeout: Option<Duration>,
}

impl TerraformBackend {
    /// Create a new Terraform backend using `terraform` from `PATH`, or the
    /// binary named by `PROVCHECK_TERRAFORM`.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let binary = std::env::var(TERRAFORM_BIN_ENV).unwrap_or_else(|_| "terraform".to_string());
        Self {
            runner,
            binary,
            command_timeout: None,
        }
    }

    /// Use a specific terraform binary.
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Bound every individual terraform invocation.
    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = Some(timeout);
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Check that the terraform binary can be executed.
    pub async fn check_available(&self) -> RunnerResult<()> {
        if self.runner.is_available(&self.binary).await {
            Ok(())
        } else {
            Err(RunnerError::ToolNotAvailable(format!(
                "'{}' could not be executed",
                self.binary
            )))
        }
    }

    /// Run terraform init.
    pub async fn init(&self, config: &RunConfig) -> RunnerResult<CommandOutput> {
        info!("Running terraform init in {:?}", config.module_dir);
        let mut args = vec!["init", "-input=false", "-no-color"];
        if config.upgrade {
            args.push("-upgrade");
        }
        let output = self.run_command(config, &args, false).await?;
        if !output.success() {
            return Err(RunnerError::InitFailed(output.combined_output()));
        }
        Ok(output)
    }

    /// Run terraform output -json and coerce the result.
    pub async fn output(&self, config: &RunConfig) -> RunnerResult<OutputSet> {
        let output = self
            .run_command(config, &["output", "-json", "-no-color"], false)
            .await?;
        if !output.success() {
            return Err(RunnerError::OutputFailed(output.combined_output()));
        }
        parse_terraform_outputs(&output.stdout)
    }

    fn check_module(&self, config: &RunConfig) -> RunnerResult<()> {
        if !config.module_dir.is_dir() {
            return Err(RunnerError::InvalidModule(format!(
                "{} is not a directory",
                config.module_dir.display()
            )));
        }
        Ok(())
    }

    /// Run a terraform subcommand inside the module directory.
    async fn run_command(
        &self,
        config: &RunConfig,
        args: &[&str],
        with_vars: bool,
    ) -> RunnerResult<CommandOutput> {
        let mut spec = CommandSpec::new(&self.binary)
            .args(args.iter().copied())
            .working_dir(&config.module_dir)
            .envs(&config.env);
        if !spec.env.contains_key("TF_IN_AUTOMATION") {
            spec.env.insert("TF_IN_AUTOMATION".to_string(), "1".to_string());
        }
        if with_vars {
            spec = spec.args(config.var_args());
        }
        if let Some(timeout) = self.command_timeout {
            spec = spec.timeout(timeout);
        }

        debug!("Executing {}", spec.display());
        self.runner.run(&spec).await
    }
}

#[async_trait]
impl ProvisioningBackend for TerraformBackend {
    fn name(&self) -> &str {
        "terraform"
    }

    async fn apply(&self, config: &RunConfig) -> RunnerResult<OutputSet> {
        self.check_module(config)?;
        self.init(config).await?;

        info!("Running terraform apply in {:?}", config.module_dir);
        let output = self
            .run_command(
                config,
                &["apply", "-auto-approve", "-input=false", "-no-color"],
                true,
            )
            .await?;
        if !output.success() {
            return Err(RunnerError::ApplyFailed(output.combined_output()));
        }

        self.output(config).await
    }

    async fn destroy(&self, config: &RunConfig) -> RunnerResult<()> {
        self.check_module(config)?;
        // A failed apply may have died before init finished; destroy needs
        // an initialised working directory either way.
        self.init(config).await?;

        info!("Running terraform destroy in {:?}", config.module_dir);
        let output = self
            .run_command(
                config,
                &["destroy", "-auto-approve", "-input=false", "-no-color"],
                true,
            )
            .await?;
        if !output.success() {
            return Err(RunnerError::DestroyFailed(output.combined_output()));
        }
        Ok(())
    }
}
