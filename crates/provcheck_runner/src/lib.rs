//! # provcheck_runner
//!
//! Provisioning capability for provcheck.
//!
//! This crate treats the infrastructure engine as a black box that can
//! `apply` a module (returning its declared outputs) and `destroy` it again.
//!
//! # Features
//!
//! - **Terraform backend**: `init` / `apply` / `output -json` / `destroy`
//!   through the local `terraform` binary
//! - **Typed outputs**: terraform JSON coerced into scalar and structured values
//! - **Bounded commands**: optional per-command timeouts, children killed on drop
//! - **Mocks**: scripted command runner and in-memory backend for tests
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use provcheck_runner::{ProvisioningBackend, RunConfig, TerraformBackend, TokioCommandRunner};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = TerraformBackend::new(Arc::new(TokioCommandRunner::new()));
//!     let config = RunConfig::new("examples/complete")
//!         .var_file("fixtures.us-east-2.tfvars")
//!         .var("attributes", serde_json::json!(["00042"]));
//!
//!     let outputs = backend.apply(&config).await?;
//!     println!("{} outputs", outputs.len());
//!     backend.destroy(&config).await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod command;
pub mod config;
pub mod error;
pub mod mock;
pub mod outputs;
pub mod terraform;

pub use backend::ProvisioningBackend;
pub use command::{CommandOutput, CommandRunner, CommandSpec, TokioCommandRunner};
pub use config::{RunConfig, ATTRIBUTES_VAR};
pub use error::{RunnerError, RunnerResult};
pub use mock::{BackendCall, CapturedCall, MockBackend, MockCommandRunner, MockResponse};
pub use outputs::{parse_terraform_outputs, OutputSet, OutputValue};
pub use terraform::{TerraformBackend, TERRAFORM_BIN_ENV};
