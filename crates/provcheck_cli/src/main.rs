//! provcheck CLI - Main entry point.
//!
//! Exit codes:
//! - 0: All checks passed and teardown succeeded
//! - 1: General error
//! - 2: Invalid arguments or suite
//! - 3: Validation failure
//! - 5: Provisioning failure
//! - 6: Teardown failure (infrastructure may have been left behind)

use std::process::ExitCode;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use provcheck_harness::{HarnessError, RunOutcome};

mod commands;

use commands::{Cli, Commands};

/// CI-friendly exit codes
pub struct ExitCodes;

impl ExitCodes {
    pub const SUCCESS: u8 = 0;
    pub const GENERAL_ERROR: u8 = 1;
    pub const INVALID_ARGS: u8 = 2;
    pub const VALIDATION_FAILURE: u8 = 3;
    pub const PROVISIONING_FAILURE: u8 = 5;
    pub const TEARDOWN_FAILURE: u8 = 6;

    /// Exit code for a finished run.
    pub fn for_outcome(outcome: RunOutcome) -> u8 {
        match outcome {
            RunOutcome::Passed => Self::SUCCESS,
            RunOutcome::ValidationFailure => Self::VALIDATION_FAILURE,
            RunOutcome::ProvisioningFailure => Self::PROVISIONING_FAILURE,
            RunOutcome::TeardownFailure => Self::TEARDOWN_FAILURE,
        }
    }
}

fn init_logging(cli: &Cli) {
    let default_filter = if cli.verbose {
        "provcheck=debug,provcheck_harness=debug,provcheck_runner=debug,warn"
    } else if cli.quiet {
        "warn"
    } else {
        "provcheck=info,provcheck_harness=info,provcheck_runner=info,warn"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    // Logs go to stderr; stdout is reserved for the report.
    let result = if cli.log_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .with(filter)
            .try_init()
    };

    if result.is_err() {
        // Logging already initialized, continue
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    let result = match cli.command {
        Commands::Run(args) => commands::run::execute(args).await,
        Commands::Rules(args) => commands::rules::execute(args).map(|()| ExitCodes::SUCCESS),
        Commands::Attribute(args) => commands::attribute::execute(args).map(|()| ExitCodes::SUCCESS),
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            let exit_code = categorize_error(&e);
            eprintln!("❌ Error: {:#}", e);
            ExitCode::from(exit_code)
        }
    }
}

/// Categorize error to determine exit code
fn categorize_error(e: &anyhow::Error) -> u8 {
    match e.downcast_ref::<HarnessError>() {
        Some(HarnessError::InvalidSuite(_))
        | Some(HarnessError::UnknownRuleSet(_))
        | Some(HarnessError::InvalidRule { .. })
        | Some(HarnessError::Yaml(_)) => ExitCodes::INVALID_ARGS,
        _ => ExitCodes::GENERAL_ERROR,
    }
}
