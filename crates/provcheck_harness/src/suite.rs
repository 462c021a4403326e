//! Suite files: one module, its inputs, and the rules to hold it to.
//!
//! ```yaml
//! module: ../examples/complete
//! var_files: [fixtures.us-east-2.tfvars]
//! vars:
//!   enabled: true
//! exclusive_kind: guardduty-detector
//! rules: guardduty
//! options:
//!   apply_timeout: 1800
//!   teardown_attempts: 3
//! ```
//!
//! `module` and rule file paths are relative to the suite file; var files
//! are passed to terraform as written, so they resolve against the module
//! directory.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::error::{HarnessError, HarnessResult};
use crate::lifecycle::{HarnessOptions, RunRequest};
use crate::rules::{RuleSet, BUILTIN_RULE_SETS};

/// Where a suite's rules come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RulesSource {
    /// Built-in rule set name or path to a rule file
    Reference(String),
    Inline(RuleSet),
}

impl Default for RulesSource {
    fn default() -> Self {
        RulesSource::Reference("guardduty".to_string())
    }
}

/// A suite file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suite {
    pub module: PathBuf,
    #[serde(default)]
    pub var_files: Vec<PathBuf>,
    #[serde(default)]
    pub vars: BTreeMap<String, Value>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub upgrade: bool,
    #[serde(default)]
    pub exclusive_kind: Option<String>,
    #[serde(default)]
    pub rules: RulesSource,
    #[serde(default)]
    pub options: HarnessOptions,
    /// Directory the suite was loaded from
    #[serde(skip)]
    pub base_dir: PathBuf,
}

fn default_true() -> bool {
    true
}

impl Suite {
    /// Load and check a suite file.
    pub fn load(path: &Path) -> HarnessResult<Self> {
        info!("Loading suite from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        let base_dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Self::from_yaml(&content, base_dir)
    }

    pub fn from_yaml(content: &str, base_dir: PathBuf) -> HarnessResult<Self> {
        let mut suite: Self = serde_yaml::from_str(content)?;
        suite.base_dir = base_dir;
        suite.validate()?;
        Ok(suite)
    }

    fn validate(&self) -> HarnessResult<()> {
        if self.module.as_os_str().is_empty() {
            return Err(HarnessError::InvalidSuite("module is required".to_string()));
        }
        if self.options.teardown_attempts == 0 {
            return Err(HarnessError::InvalidSuite(
                "options.teardown_attempts must be at least 1".to_string(),
            ));
        }
        if self.options.apply_timeout.is_zero() || self.options.destroy_timeout.is_zero() {
            return Err(HarnessError::InvalidSuite(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Module directory, resolved against the suite file.
    pub fn module_dir(&self) -> PathBuf {
        self.resolve_path(&self.module)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Load the suite's rule set.
    pub fn rule_set(&self) -> HarnessResult<RuleSet> {
        match &self.rules {
            RulesSource::Inline(set) => {
                set.validate()?;
                Ok(set.clone())
            }
            RulesSource::Reference(name) if BUILTIN_RULE_SETS.contains(&name.as_str()) => {
                RuleSet::builtin(name)
            }
            RulesSource::Reference(path) => RuleSet::from_file(&self.resolve_path(Path::new(path))),
        }
    }

    /// Turn the suite into a run request.
    pub fn to_request(&self) -> HarnessResult<RunRequest> {
        let mut request = RunRequest::new(self.module_dir(), self.rule_set()?);
        request.var_files = self.var_files.clone();
        request.vars = self.vars.clone();
        request.env = self.env.clone();
        request.upgrade = self.upgrade;
        request.exclusive_kind = self.exclusive_kind.clone();
        request.options = Some(self.options.clone());
        Ok(request)
    }
}
