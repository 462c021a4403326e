//! Declared module outputs and their coercion from terraform JSON.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::RunnerResult;

/// A single declared output value.
///
/// Outputs are either plain strings or flat string-keyed bundles (an
/// `id`/`arn`/`name`/`status` description of one resource, for instance).
/// No numeric or boolean interpretation is done here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutputValue {
    Scalar(String),
    Structured(BTreeMap<String, String>),
}

impl OutputValue {
    pub fn scalar(value: impl Into<String>) -> Self {
        OutputValue::Scalar(value.into())
    }

    pub fn structured<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        OutputValue::Structured(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            OutputValue::Scalar(s) => Some(s),
            OutputValue::Structured(_) => None,
        }
    }

    pub fn as_structured(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            OutputValue::Structured(map) => Some(map),
            OutputValue::Scalar(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            OutputValue::Scalar(s) => s.is_empty(),
            OutputValue::Structured(map) => map.is_empty(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutputValue::Scalar(_) => "scalar",
            OutputValue::Structured(_) => "structured",
        }
    }

    /// Coerce a raw JSON value into an output value.
    ///
    /// Objects become structured bundles whose members are rendered with
    /// [`leaf_string`]; every other value becomes a scalar.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Object(members) => OutputValue::Structured(
                members
                    .iter()
                    .map(|(k, v)| (k.clone(), leaf_string(v)))
                    .collect(),
            ),
            other => OutputValue::Scalar(leaf_string(other)),
        }
    }
}

/// Render a JSON leaf as text: strings as-is, null as empty, everything
/// else as compact JSON.
pub fn leaf_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// The full set of outputs a provisioned module reported.
pub type OutputSet = BTreeMap<String, OutputValue>;

#[derive(Debug, Deserialize)]
struct TerraformOutput {
    #[serde(default)]
    sensitive: bool,
    value: Value,
}

/// Parse the document printed by `terraform output -json`.
///
/// Sensitive outputs are kept; the harness never prints values it did not
/// ask for, so masking is left to the report layer.
pub fn parse_terraform_outputs(json: &str) -> RunnerResult<OutputSet> {
    let trimmed = json.trim();
    if trimmed.is_empty() {
        return Ok(OutputSet::new());
    }

    let raw: BTreeMap<String, TerraformOutput> = serde_json::from_str(trimmed)?;
    Ok(raw
        .into_iter()
        .map(|(name, output)| {
            if output.sensitive {
                debug!("Output {} is marked sensitive", name);
            }
            (name, OutputValue::from_json(&output.value))
        })
        .collect())
}
