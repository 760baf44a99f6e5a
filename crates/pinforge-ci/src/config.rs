//! Orchestrator configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use pinforge_core::sandbox::default_interpreter;
use pinforge_core::{Console, HostPlatform, RuntimeLayout};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Directory under the root holding one sub-directory per platform tag.
pub const PACKAGES_DIR: &str = "packages";

/// Directory under the root receiving constraint files.
pub const CONSTRAINTS_DIR: &str = "constraints";

/// What happens after a build or test failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the run at the first failure and exit nonzero.
    #[default]
    AbortOnFailure,
    /// Warn and move on; the run always exits zero.
    Continue,
}

impl FailurePolicy {
    pub fn from_abort_flag(abort_on_failure: bool) -> Self {
        if abort_on_failure {
            FailurePolicy::AbortOnFailure
        } else {
            FailurePolicy::Continue
        }
    }

    pub fn aborts(&self) -> bool {
        matches!(self, FailurePolicy::AbortOnFailure)
    }

    /// Report a failure with the marker this policy calls for.
    pub fn annotate(&self, console: &Console, message: &str) {
        match self {
            FailurePolicy::AbortOnFailure => console.error(message),
            FailurePolicy::Continue => console.warning(message),
        }
    }
}

/// Extra environment for build and test subprocesses.
///
/// Layered over the inherited process environment. Values are never
/// mutated in place; [`BuildEnv::with`] returns a new map, so whatever one
/// package build adds cannot reach the next.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildEnv {
    vars: BTreeMap<String, String>,
}

impl BuildEnv {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Parse `KEY=VALUE`. The value may itself contain `=`.
    pub fn parse_assignment(raw: &str) -> Result<(String, String), ConfigError> {
        match raw.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(ConfigError::InvalidAssignment(raw.to_string())),
        }
    }

    /// Copy of this map with one more variable set.
    pub fn with(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut vars = self.vars.clone();
        vars.insert(key.into(), value.into());
        Self { vars }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

/// Everything a run needs, gathered once at startup.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Layout root; all subprocesses run here.
    pub root: PathBuf,
    /// Overrides host platform detection.
    pub platform_tag: Option<String>,
    /// Interpreter relative to a runtime directory; host default if unset.
    pub interpreter: Option<PathBuf>,
    pub policy: FailurePolicy,
    /// Per-subprocess timeout for build and test steps. `0` disables it.
    pub timeout_secs: u64,
    pub env: BuildEnv,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            platform_tag: None,
            interpreter: None,
            policy: FailurePolicy::default(),
            timeout_secs: 0,
            env: BuildEnv::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn for_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Platform tag from the override or host detection.
    pub fn platform_tag(&self) -> pinforge_core::Result<String> {
        match &self.platform_tag {
            Some(tag) => Ok(tag.clone()),
            None => Ok(HostPlatform::detect()?.tag()),
        }
    }

    pub fn packages_root(&self) -> pinforge_core::Result<PathBuf> {
        Ok(self.root.join(PACKAGES_DIR).join(self.platform_tag()?))
    }

    pub fn constraints_dir(&self) -> PathBuf {
        self.root.join(CONSTRAINTS_DIR)
    }

    pub fn layout(&self) -> RuntimeLayout {
        let interpreter = self
            .interpreter
            .clone()
            .unwrap_or_else(default_interpreter);
        RuntimeLayout::under(&self.root, interpreter)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
