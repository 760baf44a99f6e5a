//! pinforge CI - build, constrain and test packages one at a time
//!
//! Provides the async half of the orchestrator:
//! - streams subprocess output line by line with optional timeouts
//! - runs the runtime's rebuild, cache purge and bundled-package hooks
//! - builds each package in a fresh working runtime and writes its
//!   constraint file
//! - runs the package's declared tests under a fail-fast or fail-soft policy

pub mod config;
pub mod driver;
pub mod error;
pub mod pipeline;
pub mod report;
pub mod runner;
pub mod step;
pub mod test_runner;
pub mod toolchain;

// Re-export key types
pub use config::{BuildEnv, FailurePolicy, OrchestratorConfig};
pub use driver::{BuildDriver, BuildOutcome};
pub use error::{ConfigError, PipelineError, RunnerError};
pub use pipeline::{Orchestrator, PackageOutcome, PackageStatus, PipelineResult, PACKAGE_ENV_VAR};
pub use report::{PackageReport, RunReport};
pub use runner::{CapturedOutput, StepResult, StepRunner};
pub use step::{StepConfig, ToolchainStep};
pub use test_runner::{TestRecord, TestRunner};
pub use toolchain::Toolchain;
