//! CLI command definitions.

use clap::{Parser, Subcommand};

pub mod attribute;
pub mod rules;
pub mod run;

/// provcheck - provision, validate and tear down infrastructure modules
#[derive(Parser)]
#[command(name = "provcheck")]
#[command(version, about = "Provision an infrastructure module, validate its outputs, tear it down")]
#[command(long_about = r#"
provcheck drives one Terraform module through a full lifecycle per run:
it applies the module under a unique attribute, checks the declared outputs
against a rule set, and always destroys what it created.

COMMANDS:
  run        → Provision, validate and tear down one or more modules
  rules      → Print a rule set
  attribute  → Print a freshly generated run attribute

EXIT CODES:
  0 - All checks passed and teardown succeeded
  1 - General error
  2 - Invalid arguments or suite
  3 - Validation failure
  5 - Provisioning failure
  6 - Teardown failure (resources may have been left behind)
"#)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Provision, validate and tear down a module
    Run(run::RunArgs),

    /// Print a rule set (built-in name or YAML file)
    Rules(rules::RulesArgs),

    /// Print a generated run attribute
    Attribute(attribute::AttributeArgs),
}
