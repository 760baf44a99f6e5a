//! Package builds with live output parsing.

use std::time::Instant;

use pinforge_core::{BuildManifest, Console, OutputParser};
use tracing::{error, info};

use crate::error::RunnerError;
use crate::runner::StepRunner;
use crate::step::ToolchainStep;
use crate::toolchain::Toolchain;

/// Result of one package build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Exactly "the install process exited with code 0".
    pub success: bool,
    /// Exit code, `-1` if the process never ran or was killed.
    pub exit_code: i32,
    pub duration_ms: u64,
    /// Resolved `name -> version` pins seen in the build output. May be
    /// partially filled even when the build failed.
    pub manifest: BuildManifest,
}

impl BuildOutcome {
    fn not_run() -> Self {
        Self {
            success: false,
            exit_code: -1,
            duration_ms: 0,
            manifest: BuildManifest::new(),
        }
    }
}

/// Runs the install step, echoing and parsing its output line by line.
pub struct BuildDriver<'a> {
    console: &'a Console,
    parser: OutputParser,
}

impl<'a> BuildDriver<'a> {
    pub fn new(console: &'a Console) -> Self {
        Self {
            console,
            parser: OutputParser::new(),
        }
    }

    /// Build `package` with `toolchain`.
    ///
    /// A process that cannot be started is reported like a failed build,
    /// with an empty manifest. A build killed by the timeout keeps the pins
    /// it printed before it was killed.
    pub async fn build(&self, toolchain: &Toolchain, package: &str) -> BuildOutcome {
        let step = toolchain.step(&ToolchainStep::Install {
            package: package.to_string(),
        });

        let start = Instant::now();
        let mut manifest = BuildManifest::new();
        let result = StepRunner::run_streaming(&step, |line| {
            self.console.line(line);
            manifest.extend(self.parser.parse_line(line));
        })
        .await;

        match result {
            Ok(result) => {
                info!(
                    package = %package,
                    exit_code = result.exit_code,
                    duration_ms = result.duration_ms,
                    resolved = manifest.len(),
                    "Build finished"
                );
                BuildOutcome {
                    success: result.passed(),
                    exit_code: result.exit_code,
                    duration_ms: result.duration_ms,
                    manifest,
                }
            }
            Err(e @ RunnerError::TimedOut { .. }) => {
                error!(
                    package = %package,
                    error = %e,
                    resolved = manifest.len(),
                    "Build timed out"
                );
                self.console.eline(&format!("Build error: {e}"));
                BuildOutcome {
                    success: false,
                    exit_code: -1,
                    duration_ms: start.elapsed().as_millis() as u64,
                    manifest,
                }
            }
            Err(e) => {
                error!(package = %package, error = %e, "Build could not complete");
                self.console.eline(&format!("Build error: {e}"));
                BuildOutcome::not_run()
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn fake_pip(dir: &Path, body: &str) -> PathBuf {
        let exe = dir.join("python");
        fs::write(&exe, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        exe
    }

    #[tokio::test]
    async fn test_build_echoes_and_resolves() {
        let dir = tempdir().unwrap();
        let exe = fake_pip(
            dir.path(),
            r#"echo "Collecting $5"
echo "  Downloading foo-1.0.0-py3-none-any.whl (10 kB)"
echo "  Using cached Foo_Bar-3.1.0.tar.gz" >&2
echo "Successfully installed foo-1.2.0 foo-bar-3.1.0""#,
        );
        let (console, captured) = Console::capture();
        let outcome = BuildDriver::new(&console)
            .build(&Toolchain::new(exe, dir.path()), "foo")
            .await;

        assert!(outcome.success);
        assert_eq!(outcome.exit_code, 0);
        assert_eq!(
            outcome.manifest.iter().collect::<Vec<_>>(),
            vec![("foo", "1.2.0"), ("foo-bar", "3.1.0")]
        );
        let echoed = captured.contents();
        assert!(echoed.contains("Collecting foo\n"));
        assert!(echoed.contains("Successfully installed foo-1.2.0 foo-bar-3.1.0\n"));
    }

    #[tokio::test]
    async fn test_failed_build_keeps_partial_manifest() {
        let dir = tempdir().unwrap();
        let exe = fake_pip(
            dir.path(),
            "echo 'Downloading alpha-1.0.0-py3-none-any.whl'\necho 'error: compiler missing'\nexit 1",
        );
        let (console, _captured) = Console::capture();
        let outcome = BuildDriver::new(&console)
            .build(&Toolchain::new(exe, dir.path()), "alpha")
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.manifest.get("alpha"), Some("1.0.0"));
    }

    #[tokio::test]
    async fn test_timed_out_build_keeps_partial_manifest() {
        let dir = tempdir().unwrap();
        let exe = fake_pip(
            dir.path(),
            "echo '  Downloading alpha-1.0.0-py3-none-any.whl'\nsleep 5",
        );
        let (console, captured) = Console::capture();
        let toolchain = Toolchain::new(exe, dir.path()).with_timeout(1);
        let outcome = BuildDriver::new(&console).build(&toolchain, "alpha").await;

        assert!(!outcome.success);
        assert_eq!(outcome.exit_code, -1);
        assert_eq!(outcome.manifest.get("alpha"), Some("1.0.0"));
        assert!(outcome.duration_ms >= 1000);
        let echoed = captured.contents();
        assert!(echoed.contains("  Downloading alpha-1.0.0-py3-none-any.whl\n"));
        assert!(echoed.contains("Build error: "));
    }

    #[tokio::test]
    async fn test_launch_failure_is_empty_failure() {
        let dir = tempdir().unwrap();
        let (console, captured) = Console::capture();
        let outcome = BuildDriver::new(&console)
            .build(&Toolchain::new(dir.path().join("missing"), dir.path()), "x")
            .await;

        assert!(!outcome.success);
        assert!(outcome.manifest.is_empty());
        assert!(captured.contents().starts_with("Build error: "));
    }
}
