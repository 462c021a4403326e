//! Rules command - print a resolved rule set.

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};

use provcheck_harness::{RuleSet, BUILTIN_RULE_SETS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RulesFormat {
    Yaml,
    Json,
}

#[derive(Args, Debug)]
pub struct RulesArgs {
    /// Built-in rule set name or YAML file
    #[arg(default_value = "guardduty")]
    rules: String,

    /// List built-in rule set names instead
    #[arg(long)]
    list: bool,

    #[arg(long, value_enum, default_value_t = RulesFormat::Yaml)]
    format: RulesFormat,
}

pub fn execute(args: RulesArgs) -> Result<()> {
    if args.list {
        for name in BUILTIN_RULE_SETS {
            println!("{}", name);
        }
        return Ok(());
    }

    let set = RuleSet::resolve(&args.rules)?;
    println!("{}", render(&set, args.format)?);
    Ok(())
}

fn render(set: &RuleSet, format: RulesFormat) -> Result<String> {
    match format {
        RulesFormat::Yaml => serde_yaml::to_string(set).context("Failed to serialize rule set"),
        RulesFormat::Json => {
            serde_json::to_string_pretty(set).context("Failed to serialize rule set")
        }
    }
}
