//! nvprep - provisions an Ubuntu host for GPU-accelerated containers
//!
//! Installs or repairs the NVIDIA driver, Docker and the NVIDIA Container
//! Toolkit as a sequence of idempotent detect / decide / apply steps, then
//! reports what the GPU can do for hardware transcoding.

pub mod config;
pub mod container;
pub mod context;
pub mod detect;
pub mod driver;
pub mod error;
pub mod exec;
pub mod fakes;
pub mod gpu;
pub mod logging;
pub mod net;
pub mod operator;
pub mod orchestrator;
pub mod packages;
pub mod preflight;
pub mod report;
pub mod step;
pub mod types;

pub use config::ProvisionConfig;
pub use context::RunContext;
pub use error::{ProvisionError, Result};
pub use orchestrator::{Orchestrator, RebootRequest, RunOutcome};
pub use report::{RunReport, StepStatus};
pub use step::{Decision, FailurePolicy, ProvisioningStep};
pub use types::{ExternalCommandResult, VersionSource, VersionSpec};
