//! Reading declared outputs in the shape a check expects.

use std::collections::BTreeMap;

use provcheck_runner::{OutputSet, OutputValue};

use crate::error::ExtractionError;

/// Typed view over an [`OutputSet`].
///
/// Every accessor either returns the value in the requested shape or an
/// [`ExtractionError`] naming the output; nothing is coerced further.
#[derive(Debug, Clone, Copy)]
pub struct OutputExtractor<'a> {
    outputs: &'a OutputSet,
}

impl<'a> OutputExtractor<'a> {
    pub fn new(outputs: &'a OutputSet) -> Self {
        Self { outputs }
    }

    /// Look up an output by name.
    pub fn extract(&self, name: &str) -> Result<&'a OutputValue, ExtractionError> {
        self.outputs
            .get(name)
            .ok_or_else(|| ExtractionError::Missing(name.to_string()))
    }

    /// Look up an output that must be present and non-empty.
    pub fn extract_non_empty(&self, name: &str) -> Result<&'a OutputValue, ExtractionError> {
        let value = self.extract(name)?;
        if value.is_empty() {
            return Err(ExtractionError::Empty(name.to_string()));
        }
        Ok(value)
    }

    /// A scalar output; empty strings are returned as-is.
    pub fn extract_scalar(&self, name: &str) -> Result<&'a str, ExtractionError> {
        self.extract(name)?
            .as_scalar()
            .ok_or_else(|| ExtractionError::NotScalar(name.to_string()))
    }

    /// A structured output.
    pub fn extract_structured(
        &self,
        name: &str,
    ) -> Result<&'a BTreeMap<String, String>, ExtractionError> {
        self.extract(name)?
            .as_structured()
            .ok_or_else(|| ExtractionError::NotStructured(name.to_string()))
    }

    /// One entry of a structured output.
    pub fn extract_field(&self, name: &str, key: &str) -> Result<&'a str, ExtractionError> {
        self.extract_structured(name)?
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| ExtractionError::MissingKey {
                output: name.to_string(),
                key: key.to_string(),
            })
    }

    /// Resolve `name` (and `key`, for structured outputs) to a non-empty
    /// string.
    pub fn extract_text(&self, name: &str, key: Option<&str>) -> Result<&'a str, ExtractionError> {
        match key {
            Some(key) => {
                let value = self.extract_field(name, key)?;
                if value.is_empty() {
                    return Err(ExtractionError::EmptyKey {
                        output: name.to_string(),
                        key: key.to_string(),
                    });
                }
                Ok(value)
            }
            None => {
                let value = self.extract_scalar(name)?;
                if value.is_empty() {
                    return Err(ExtractionError::Empty(name.to_string()));
                }
                Ok(value)
            }
        }
    }

    /// Like [`extract_text`](Self::extract_text) but absence is `Ok(None)`.
    /// A value of the wrong shape is still an error.
    pub fn optional_text(
        &self,
        name: &str,
        key: Option<&str>,
    ) -> Result<Option<&'a str>, ExtractionError> {
        match self.extract_text(name, key) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_absent() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Only a missing output or key is `Ok(None)`; an empty value is
    /// returned as `Some("")`.
    pub fn present_text(
        &self,
        name: &str,
        key: Option<&str>,
    ) -> Result<Option<&'a str>, ExtractionError> {
        let value = match key {
            Some(key) => self.extract_field(name, key),
            None => self.extract_scalar(name),
        };
        match value {
            Ok(value) => Ok(Some(value)),
            Err(ExtractionError::Missing(_) | ExtractionError::MissingKey { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
