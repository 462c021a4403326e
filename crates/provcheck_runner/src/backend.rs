//! Provisioning backend trait.

use async_trait::async_trait;

use crate::config::RunConfig;
use crate::error::RunnerResult;
use crate::outputs::OutputSet;

/// The provisioning capability the harness drives.
///
/// The harness never looks inside the module; it only asks for the module
/// to be applied (getting its declared outputs back) and destroyed.
#[async_trait]
pub trait ProvisioningBackend: Send + Sync {
    /// Short backend name for logs and reports.
    fn name(&self) -> &str;

    /// Create (or converge) the module instance and return its outputs.
    async fn apply(&self, config: &RunConfig) -> RunnerResult<OutputSet>;

    /// Destroy everything the module instance created.
    async fn destroy(&self, config: &RunConfig) -> RunnerResult<()>;
}
