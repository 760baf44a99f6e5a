//! Declared test execution against the working runtime.

use pinforge_core::{Console, PackageDirectory};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::config::FailurePolicy;
use crate::runner::StepRunner;
use crate::step::ToolchainStep;
use crate::toolchain::Toolchain;

/// Result of running one declared test file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestRecord {
    /// Path as declared in the manifest, relative to the package dir.
    pub file: String,
    pub passed: bool,
    pub exit_code: i32,
    pub duration_ms: u64,
}

/// Runs the tests a package's manifest declares.
pub struct TestRunner<'a> {
    console: &'a Console,
    policy: FailurePolicy,
}

impl<'a> TestRunner<'a> {
    pub fn new(console: &'a Console, policy: FailurePolicy) -> Self {
        Self { console, policy }
    }

    /// Run every declared test that exists on disk, in manifest order.
    ///
    /// Missing files are skipped. Under [`FailurePolicy::AbortOnFailure`]
    /// the first failing test stops the remaining ones.
    pub async fn run(&self, toolchain: &Toolchain, package: &PackageDirectory) -> Vec<TestRecord> {
        let manifest = package.test_manifest();
        let mut records = Vec::new();

        for test_file in &manifest.tests {
            let path = package.path.join(test_file);
            if !path.exists() {
                debug!(package = %package.name, test = %test_file, "Declared test not found, skipping");
                continue;
            }

            self.console.line(&format!("Running test: {test_file}"));
            let step = toolchain.step(&ToolchainStep::RunTest { path });
            let record = match StepRunner::run_streaming(&step, |line| self.console.line(line)).await
            {
                Ok(result) => TestRecord {
                    file: test_file.clone(),
                    passed: result.passed(),
                    exit_code: result.exit_code,
                    duration_ms: result.duration_ms,
                },
                Err(e) => {
                    error!(package = %package.name, test = %test_file, error = %e, "Test could not complete");
                    self.console.eline(&format!("Test error: {e}"));
                    TestRecord {
                        file: test_file.clone(),
                        passed: false,
                        exit_code: -1,
                        duration_ms: 0,
                    }
                }
            };

            let passed = record.passed;
            records.push(record);

            if passed {
                info!(package = %package.name, test = %test_file, "Test passed");
                self.console
                    .line(&format!("Test passed for {}/{test_file}", package.name));
            } else {
                self.policy.annotate(
                    self.console,
                    &format!("Test failed for {}/{test_file}", package.name),
                );
                if self.policy.aborts() {
                    break;
                }
            }
        }

        records
    }
}
