//! Provisioning configuration types.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Parameter key the run attribute is injected under.
pub const ATTRIBUTES_VAR: &str = "attributes";

/// Everything the provisioning engine needs to apply or destroy one module
/// instance.
///
/// A `RunConfig` is built once per run and then only read; destroy must be
/// issued with exactly the configuration that was applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Directory holding the root module
    pub module_dir: PathBuf,
    /// Input variables (name -> value)
    pub vars: BTreeMap<String, Value>,
    /// Variable files, passed in order
    pub var_files: Vec<PathBuf>,
    /// Whether `init` should upgrade providers and modules
    pub upgrade: bool,
    /// Extra environment for the provisioning tool
    pub env: BTreeMap<String, String>,
}

impl RunConfig {
    pub fn new(module_dir: impl Into<PathBuf>) -> Self {
        Self {
            module_dir: module_dir.into(),
            vars: BTreeMap::new(),
            var_files: Vec::new(),
            upgrade: true,
            env: BTreeMap::new(),
        }
    }

    pub fn var(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }

    pub fn vars(mut self, vars: BTreeMap<String, Value>) -> Self {
        self.vars.extend(vars);
        self
    }

    pub fn var_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.var_files.push(path.into());
        self
    }

    pub fn var_files(mut self, paths: impl IntoIterator<Item = PathBuf>) -> Self {
        self.var_files.extend(paths);
        self
    }

    pub fn upgrade(mut self, enabled: bool) -> Self {
        self.upgrade = enabled;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    /// The run attribute, if one has been injected.
    pub fn attribute(&self) -> Option<&str> {
        match self.vars.get(ATTRIBUTES_VAR)? {
            Value::Array(items) => items.first().and_then(Value::as_str),
            Value::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Render `-var-file` and `-var` arguments.
    ///
    /// String values are passed raw; anything else is passed as JSON, which
    /// terraform accepts as HCL for lists, maps, numbers and booleans.
    pub fn var_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.var_files.len() + self.vars.len() * 2);

        for file in &self.var_files {
            args.push(format!("-var-file={}", file.to_string_lossy()));
        }

        for (name, value) in &self.vars {
            args.push("-var".to_string());
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            args.push(format!("{}={}", name, rendered));
        }

        args
    }
}
