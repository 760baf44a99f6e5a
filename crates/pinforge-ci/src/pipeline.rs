//! The per-package orchestration loop.

use std::fs;
use std::path::PathBuf;
use std::time::Instant;

use chrono::{DateTime, Utc};
use pinforge_core::{
    discover_packages, Console, ConstraintWriter, ExclusionSet, PackageDirectory, SandboxManager,
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::{FailurePolicy, OrchestratorConfig};
use crate::driver::{BuildDriver, BuildOutcome};
use crate::error::PipelineError;
use crate::test_runner::{TestRecord, TestRunner};
use crate::toolchain::Toolchain;

/// Set in every build and test subprocess to the package being processed.
pub const PACKAGE_ENV_VAR: &str = "PINFORGE_PACKAGE";

/// Where a package's processing ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    /// Built, constraints written, every declared test passed.
    Passed,
    /// The working runtime could not be recreated.
    SandboxFailed,
    BuildFailed,
    ConstraintsFailed,
    TestsFailed,
}

/// Everything recorded for one package.
#[derive(Debug, Clone)]
pub struct PackageOutcome {
    pub name: String,
    pub status: PackageStatus,
    /// `None` if the build never started.
    pub build: Option<BuildOutcome>,
    pub constraint_file: Option<PathBuf>,
    pub tests: Vec<TestRecord>,
}

impl PackageOutcome {
    fn new(name: &str, status: PackageStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            build: None,
            constraint_file: None,
            tests: Vec::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == PackageStatus::Passed
    }
}

/// Result of a complete orchestration run.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    /// One entry per processed package, in processing order.
    pub packages: Vec<PackageOutcome>,

    /// Whether a failure stopped the run before every package was processed.
    pub aborted: bool,

    pub policy: FailurePolicy,

    /// Names left out of every constraint file.
    pub excluded: ExclusionSet,

    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineResult {
    /// Number of packages that passed.
    pub fn passed_count(&self) -> usize {
        self.packages.iter().filter(|p| p.passed()).count()
    }

    /// Number of packages that failed at any step.
    pub fn failed_count(&self) -> usize {
        self.packages.iter().filter(|p| !p.passed()).count()
    }

    pub fn success(&self) -> bool {
        !self.aborted && self.failed_count() == 0
    }

    /// Process exit code: nonzero only when the run was aborted.
    pub fn exit_code(&self) -> i32 {
        if self.aborted {
            1
        } else {
            0
        }
    }
}

/// Drives every package under the platform's package root through reset,
/// rebuild, purge, build, constraints and tests.
pub struct Orchestrator {
    config: OrchestratorConfig,
    console: Console,
    sandbox: SandboxManager,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, console: Console) -> Self {
        let sandbox = SandboxManager::new(config.layout());
        Self::with_sandbox(config, console, sandbox)
    }

    /// Orchestrator with a caller-supplied sandbox manager.
    pub fn with_sandbox(
        config: OrchestratorConfig,
        console: Console,
        sandbox: SandboxManager,
    ) -> Self {
        Self {
            config,
            console,
            sandbox,
        }
    }

    /// Run every package in name order.
    ///
    /// Errors are environment problems found before the first package:
    /// unsupported host, missing runtime, missing package root, or an
    /// uncreatable constraints directory. Package failures are reported in
    /// the result instead.
    pub async fn run(&self) -> Result<PipelineResult, PipelineError> {
        let started_at = Utc::now();
        let start = Instant::now();
        let policy = self.config.policy;

        let packages_root = self.config.packages_root()?;
        let constraints_dir = self.config.constraints_dir();
        fs::create_dir_all(&constraints_dir).map_err(|source| PipelineError::CreateDir {
            path: constraints_dir.clone(),
            source,
        })?;

        let base_executable = self.sandbox.layout().base_executable();
        self.console
            .line(&format!("Runtime location: {}", base_executable.display()));
        self.sandbox.snapshot_pristine()?;

        let base = Toolchain::new(&base_executable, self.config.root())
            .with_env(self.config.env.clone());
        let excluded = base.bundled_packages().await;
        self.console
            .line(&format!("Excluding bundled packages: {excluded}"));

        let packages = discover_packages(&packages_root)?;
        info!(
            count = packages.len(),
            root = %packages_root.display(),
            policy = ?policy,
            "Starting orchestration"
        );

        let writer = ConstraintWriter::new(constraints_dir);
        let mut outcomes = Vec::with_capacity(packages.len());
        let mut aborted = false;

        for package in &packages {
            let span = info_span!("package", package = %package.name);
            let outcome = self
                .process_package(package, &writer, &excluded)
                .instrument(span)
                .await;
            let failed = !outcome.passed();
            outcomes.push(outcome);

            if failed && policy.aborts() {
                error!(package = %package.name, "Aborting run after failure");
                aborted = true;
                break;
            }
        }

        let result = PipelineResult {
            packages: outcomes,
            aborted,
            policy,
            excluded,
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            passed = result.passed_count(),
            failed = result.failed_count(),
            aborted = result.aborted,
            duration_ms = result.duration_ms,
            "Orchestration finished"
        );
        Ok(result)
    }

    async fn process_package(
        &self,
        package: &PackageDirectory,
        writer: &ConstraintWriter,
        excluded: &ExclusionSet,
    ) -> PackageOutcome {
        self.console.group(&format!("Building {}", package.name));
        let outcome = self.package_steps(package, writer, excluded).await;
        self.console.end_group();
        outcome
    }

    async fn package_steps(
        &self,
        package: &PackageDirectory,
        writer: &ConstraintWriter,
        excluded: &ExclusionSet,
    ) -> PackageOutcome {
        let name = package.name.as_str();
        let policy = self.config.policy;

        let reset = match self.sandbox.reset_working() {
            Ok(reset) => reset,
            Err(e) => {
                error!(step = "reset_sandbox", error = %e, "Working runtime could not be created");
                policy.annotate(
                    &self.console,
                    &format!("Sandbox reset failed for {name}: {e}"),
                );
                return PackageOutcome::new(name, PackageStatus::SandboxFailed);
            }
        };
        info!(
            step = "reset_sandbox",
            forced = reset.released.forced,
            quarantined = reset.released.quarantined.len(),
            "Working runtime ready"
        );

        let toolchain = Toolchain::new(reset.executable, self.config.root())
            .with_env(self.config.env.with(PACKAGE_ENV_VAR, name))
            .with_timeout(self.config.timeout_secs);
        toolchain.rebuild().await;
        toolchain.purge_caches().await;

        self.console.line(&format!("Building {name}..."));
        let build = BuildDriver::new(&self.console).build(&toolchain, name).await;
        if !build.success {
            policy.annotate(&self.console, &format!("Build failed for {name}"));
            return PackageOutcome {
                build: Some(build),
                ..PackageOutcome::new(name, PackageStatus::BuildFailed)
            };
        }
        self.console.line(&format!("Build successful for {name}"));

        let constraint_file = match writer.write(name, &build.manifest, excluded) {
            Ok(path) => path,
            Err(e) => {
                error!(step = "write_constraints", error = %e, "Constraint file not written");
                policy.annotate(
                    &self.console,
                    &format!("Constraint write failed for {name}: {e}"),
                );
                return PackageOutcome {
                    build: Some(build),
                    ..PackageOutcome::new(name, PackageStatus::ConstraintsFailed)
                };
            }
        };
        if let Some(path) = &constraint_file {
            self.console
                .line(&format!("Created constraint file: {}", path.display()));
        }

        let tests = TestRunner::new(&self.console, policy)
            .run(&toolchain, package)
            .await;
        let status = if tests.iter().all(|t| t.passed) {
            PackageStatus::Passed
        } else {
            warn!(step = "run_tests", "Package has failing tests");
            PackageStatus::TestsFailed
        };

        PackageOutcome {
            name: name.to_string(),
            status,
            build: Some(build),
            constraint_file,
            tests,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinforge_core::BuildManifest;

    fn outcome(name: &str, status: PackageStatus) -> PackageOutcome {
        PackageOutcome {
            build: Some(BuildOutcome {
                success: status != PackageStatus::BuildFailed,
                exit_code: if status == PackageStatus::BuildFailed { 1 } else { 0 },
                duration_ms: 10,
                manifest: BuildManifest::new(),
            }),
            ..PackageOutcome::new(name, status)
        }
    }

    fn result(packages: Vec<PackageOutcome>, aborted: bool) -> PipelineResult {
        let now = Utc::now();
        PipelineResult {
            packages,
            aborted,
            policy: FailurePolicy::Continue,
            excluded: ExclusionSet::default(),
            started_at: now,
            finished_at: now,
            duration_ms: 30,
        }
    }

    #[test]
    fn test_pipeline_result_counts() {
        let result = result(
            vec![
                outcome("numpy", PackageStatus::Passed),
                outcome("scipy", PackageStatus::BuildFailed),
                outcome("pillow", PackageStatus::TestsFailed),
            ],
            false,
        );

        assert_eq!(result.passed_count(), 1);
        assert_eq!(result.failed_count(), 2);
        assert!(!result.success());
        assert_eq!(result.exit_code(), 0);
    }

    #[test]
    fn test_aborted_run_exits_nonzero() {
        let result = result(vec![outcome("scipy", PackageStatus::BuildFailed)], true);
        assert_eq!(result.exit_code(), 1);
        assert!(!result.success());
    }

    #[test]
    fn test_empty_run_succeeds() {
        let result = result(vec![], false);
        assert!(result.success());
        assert_eq!(result.exit_code(), 0);
    }

    #[test]
    fn test_package_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PackageStatus::BuildFailed).unwrap(),
            "\"build_failed\""
        );
    }
}
