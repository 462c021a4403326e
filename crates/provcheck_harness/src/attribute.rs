//! Run attributes used to namespace provisioned resource names.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

/// Number of distinct attributes.
pub const ATTRIBUTE_SPACE: u128 = 100_000;

/// Width of the zero-padded decimal token.
pub const ATTRIBUTE_WIDTH: usize = 5;

/// A per-run token, e.g. `"04217"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Attribute(String);

impl Attribute {
    fn from_number(n: u128) -> Self {
        Self(format!("{:0width$}", n % ATTRIBUTE_SPACE, width = ATTRIBUTE_WIDTH))
    }

    /// Accept an externally chosen attribute if it has the token format.
    pub fn parse(value: &str) -> Option<Self> {
        Self::is_valid(value).then(|| Self(value.to_string()))
    }

    pub fn is_valid(value: &str) -> bool {
        value.len() == ATTRIBUTE_WIDTH && value.bytes().all(|b| b.is_ascii_digit())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Attribute {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Source of randomness; `None` means the source is unavailable.
pub type RandomSource = Arc<dyn Fn() -> Option<u128> + Send + Sync>;

/// Produces run attributes.
///
/// Never fails: when the random source is unavailable the token is derived
/// from the wall clock instead.
#[derive(Clone)]
pub struct UniquenessGenerator {
    source: RandomSource,
}

impl Default for UniquenessGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl UniquenessGenerator {
    /// Generator backed by UUID v4 entropy.
    pub fn new() -> Self {
        Self::with_source(Arc::new(|| {
            std::panic::catch_unwind(|| Uuid::new_v4().as_u128()).ok()
        }))
    }

    pub fn with_source(source: RandomSource) -> Self {
        Self { source }
    }

    pub fn generate(&self) -> Attribute {
        match (self.source)() {
            Some(n) => Attribute::from_number(n),
            None => {
                warn!("Random source unavailable, deriving run attribute from the clock");
                Attribute::from_number(Self::clock_entropy())
            }
        }
    }

    fn clock_entropy() -> u128 {
        let now = Utc::now();
        now.timestamp_subsec_nanos() as u128 / 1_000 + now.timestamp() as u128
    }
}
