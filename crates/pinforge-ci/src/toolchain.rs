//! The runtime interpreter as seen by the orchestrator.
//!
//! A [`Toolchain`] pins one interpreter path together with the working
//! directory and environment every step against it uses, plus the timeout
//! applied to its build and test steps.

use std::path::PathBuf;

use pinforge_core::ExclusionSet;
use tracing::{debug, warn};

use crate::config::BuildEnv;
use crate::runner::StepRunner;
use crate::step::{StepConfig, ToolchainStep};

#[derive(Debug, Clone)]
pub struct Toolchain {
    executable: PathBuf,
    cwd: PathBuf,
    env: BuildEnv,
    timeout_secs: u64,
}

impl Toolchain {
    pub fn new(executable: impl Into<PathBuf>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            executable: executable.into(),
            cwd: cwd.into(),
            env: BuildEnv::default(),
            timeout_secs: 0,
        }
    }

    pub fn with_env(mut self, env: BuildEnv) -> Self {
        self.env = env;
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Step configuration for `step` against this interpreter.
    pub fn step(&self, step: &ToolchainStep) -> StepConfig {
        let timeout_secs = if step.honours_timeout() {
            self.timeout_secs
        } else {
            0
        };
        StepConfig::from_toolchain(&self.executable, step)
            .with_env(self.env.clone())
            .with_cwd(&self.cwd)
            .with_timeout(timeout_secs)
    }

    /// Run the runtime's self-rebuild hook. Failures are logged and
    /// otherwise ignored; the copy is used as-is.
    pub async fn rebuild(&self) -> bool {
        self.run_hook(&ToolchainStep::Rebuild).await
    }

    /// Purge the runtime's package cache. Failures are logged and
    /// otherwise ignored.
    pub async fn purge_caches(&self) -> bool {
        self.run_hook(&ToolchainStep::PurgeCache).await
    }

    async fn run_hook(&self, step: &ToolchainStep) -> bool {
        let config = self.step(step);
        match StepRunner::run_captured(&config).await {
            Ok(out) if out.result.passed() => {
                debug!(step = %config.name, duration_ms = out.result.duration_ms, "Hook finished");
                true
            }
            Ok(out) => {
                warn!(
                    step = %config.name,
                    exit_code = out.result.exit_code,
                    stderr = %out.stderr.trim(),
                    "Hook failed, continuing"
                );
                false
            }
            Err(e) => {
                warn!(step = %config.name, error = %e, "Hook could not run, continuing");
                false
            }
        }
    }

    /// Names of the packages the runtime bundles. Any failure yields an
    /// empty set.
    pub async fn bundled_packages(&self) -> ExclusionSet {
        let config = self.step(&ToolchainStep::BundledPackages);
        match StepRunner::run_captured(&config).await {
            Ok(out) if out.result.passed() => ExclusionSet::from_lines(&out.stdout),
            Ok(out) => {
                warn!(exit_code = out.result.exit_code, "Bundled package query failed");
                ExclusionSet::default()
            }
            Err(e) => {
                warn!(error = %e, "Bundled package query could not run");
                ExclusionSet::default()
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;
    use tempfile::tempdir;

    fn fake_interpreter(dir: &Path, body: &str) -> PathBuf {
        let exe = dir.join("python");
        fs::write(&exe, format!("#!/bin/sh\n{body}\n")).unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        exe
    }

    #[tokio::test]
    async fn test_bundled_packages_from_query() {
        let dir = tempdir().unwrap();
        let exe = fake_interpreter(
            dir.path(),
            r#"if [ "$1" = "-c" ]; then echo pip; echo Setuptools; fi"#,
        );
        let set = Toolchain::new(exe, dir.path()).bundled_packages().await;
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["pip", "setuptools"]);
    }

    #[tokio::test]
    async fn test_bundled_packages_failure_is_empty() {
        let dir = tempdir().unwrap();
        let exe = fake_interpreter(dir.path(), "echo pip; exit 1");
        assert!(Toolchain::new(exe, dir.path())
            .bundled_packages()
            .await
            .is_empty());

        let missing = Toolchain::new(dir.path().join("nope"), dir.path());
        assert!(missing.bundled_packages().await.is_empty());
    }

    #[test]
    fn test_timeout_only_bounds_build_and_test_steps() {
        let toolchain = Toolchain::new("/rt/bin/python3.13", "/work").with_timeout(900);
        let install = toolchain.step(&ToolchainStep::Install {
            package: "scipy".to_string(),
        });
        let test = toolchain.step(&ToolchainStep::RunTest {
            path: PathBuf::from("/work/packages/scipy/test.py"),
        });
        assert_eq!(install.timeout_secs, 900);
        assert_eq!(test.timeout_secs, 900);
        assert_eq!(toolchain.step(&ToolchainStep::Rebuild).timeout_secs, 0);
        assert_eq!(toolchain.step(&ToolchainStep::PurgeCache).timeout_secs, 0);
        assert_eq!(toolchain.step(&ToolchainStep::BundledPackages).timeout_secs, 0);
    }

    #[tokio::test]
    async fn test_slow_hook_is_not_killed_by_build_timeout() {
        let dir = tempdir().unwrap();
        let exe = fake_interpreter(dir.path(), "sleep 2; exit 0");
        let toolchain = Toolchain::new(exe, dir.path()).with_timeout(1);
        assert!(toolchain.rebuild().await);
    }

    #[tokio::test]
    async fn test_hooks_report_but_tolerate_failure() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("calls.log");
        let exe = fake_interpreter(
            dir.path(),
            &format!(
                "echo \"$@\" >> {}\n[ \"$2\" = rebuildpython ] && exit 1\nexit 0",
                log.display()
            ),
        );
        let toolchain = Toolchain::new(exe, dir.path());

        assert!(!toolchain.rebuild().await);
        assert!(toolchain.purge_caches().await);

        let calls = fs::read_to_string(&log).unwrap();
        assert_eq!(calls, "-m rebuildpython\n-m pip cache purge\n");
    }
}
