//! Subprocess step definitions and configuration.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use tokio::process::Command;

use crate::config::BuildEnv;

/// Prints the package names the runtime bundles for bootstrapping pip,
/// one per line.
pub const BUNDLED_PACKAGES_QUERY: &str =
    "import ensurepip; print('\\n'.join(ensurepip._PACKAGE_NAMES))";

/// Invocations of the runtime interpreter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolchainStep {
    /// `-m pip install --verbose <package>`
    Install { package: String },

    /// `-m rebuildpython`
    Rebuild,

    /// `-m pip cache purge`
    PurgeCache,

    /// `-c <query>` listing the bundled package names
    BundledPackages,

    /// `<test file>`
    RunTest { path: PathBuf },
}

impl ToolchainStep {
    /// Get the step name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            ToolchainStep::Install { .. } => "build",
            ToolchainStep::Rebuild => "rebuild",
            ToolchainStep::PurgeCache => "purge_cache",
            ToolchainStep::BundledPackages => "bundled_packages",
            ToolchainStep::RunTest { .. } => "run_tests",
        }
    }

    /// Whether a configured timeout applies. Only builds and tests are
    /// bounded; the hooks and the bundled-package query always run to the end.
    pub fn honours_timeout(&self) -> bool {
        matches!(
            self,
            ToolchainStep::Install { .. } | ToolchainStep::RunTest { .. }
        )
    }

    /// Arguments passed to the interpreter.
    pub fn args(&self) -> Vec<OsString> {
        match self {
            ToolchainStep::Install { package } => vec![
                "-m".into(),
                "pip".into(),
                "install".into(),
                "--verbose".into(),
                package.into(),
            ],
            ToolchainStep::Rebuild => vec!["-m".into(), "rebuildpython".into()],
            ToolchainStep::PurgeCache => {
                vec!["-m".into(), "pip".into(), "cache".into(), "purge".into()]
            }
            ToolchainStep::BundledPackages => vec!["-c".into(), BUNDLED_PACKAGES_QUERY.into()],
            ToolchainStep::RunTest { path } => vec![path.as_os_str().to_os_string()],
        }
    }
}

/// Configuration for one subprocess invocation.
#[derive(Debug, Clone)]
pub struct StepConfig {
    /// Human-readable step name.
    pub name: String,

    /// Executable to launch.
    pub program: PathBuf,

    /// Arguments after the executable.
    pub args: Vec<OsString>,

    /// Variables layered over the inherited environment.
    pub env: BuildEnv,

    /// Working directory; inherited if unset.
    pub cwd: Option<PathBuf>,

    /// Timeout in seconds (`0` = none).
    pub timeout_secs: u64,
}

impl StepConfig {
    /// Create a step that runs the interpreter at `executable`.
    pub fn from_toolchain(executable: &Path, step: &ToolchainStep) -> Self {
        Self {
            name: step.name().to_string(),
            program: executable.to_path_buf(),
            args: step.args(),
            env: BuildEnv::default(),
            cwd: None,
            timeout_secs: 0,
        }
    }

    /// Create a custom step; the first element of `command` is the program.
    pub fn custom(name: impl Into<String>, command: Vec<String>, timeout_secs: u64) -> Self {
        let mut parts = command.into_iter();
        let program = parts.next().map(PathBuf::from).unwrap_or_default();
        Self {
            name: name.into(),
            program,
            args: parts.map(OsString::from).collect(),
            env: BuildEnv::default(),
            cwd: None,
            timeout_secs,
        }
    }

    pub fn with_env(mut self, env: BuildEnv) -> Self {
        self.env = env;
        self
    }

    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Render as a shell-like string for logs.
    pub fn display_command(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        parts.extend(self.args.iter().map(|a| a.to_string_lossy().into_owned()));
        parts.join(" ")
    }

    /// Build the process command. Stdio is left to the caller.
    pub(crate) fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args).envs(self.env.iter());
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }
        command
    }
}
