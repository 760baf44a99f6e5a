//! Package directories and their test manifests.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{CoreError, Result};

/// File name of the per-package test manifest.
pub const TEST_MANIFEST_FILE: &str = "index.json";

/// Prefix shared by all platform tags of the current runtime line.
pub const PLATFORM_TAG_PREFIX: &str = "mp313";

/// Host platforms that have a package root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Windows,
    MacOs,
}

impl HostPlatform {
    /// Detect the current host. Returns an error on hosts without a
    /// package root.
    pub fn detect() -> Result<Self> {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Result<Self> {
        match os {
            "windows" => Ok(HostPlatform::Windows),
            "macos" => Ok(HostPlatform::MacOs),
            other => Err(CoreError::UnsupportedPlatform(other.to_string())),
        }
    }

    /// Package directory tag, e.g. `mp313-windows`.
    pub fn tag(&self) -> String {
        let suffix = match self {
            HostPlatform::Windows => "windows",
            HostPlatform::MacOs => "macos",
        };
        format!("{PLATFORM_TAG_PREFIX}-{suffix}")
    }
}

/// One unit of work: a directory under `packages/<platform-tag>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageDirectory {
    pub name: String,
    pub path: PathBuf,
}

impl PackageDirectory {
    pub fn manifest_path(&self) -> PathBuf {
        self.path.join(TEST_MANIFEST_FILE)
    }

    /// Load the test manifest. Missing or malformed manifests yield an
    /// empty one.
    pub fn test_manifest(&self) -> TestManifest {
        TestManifest::load(&self.manifest_path())
    }
}

/// Ordered list of relative test-file paths declared by a package.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TestManifest {
    #[serde(default)]
    pub tests: Vec<String>,
}

impl TestManifest {
    /// Read `path`, treating absence or unparseable content as no tests.
    pub fn load(path: &Path) -> Self {
        let Ok(raw) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&raw) {
            Ok(manifest) => manifest,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Ignoring unreadable test manifest");
                Self::default()
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }
}

/// List package directories under `root`, sorted by name.
///
/// Plain files are ignored. A missing root is an error.
pub fn discover_packages(root: &Path) -> Result<Vec<PackageDirectory>> {
    if !root.is_dir() {
        return Err(CoreError::PackageRootMissing(root.to_path_buf()));
    }

    let mut packages = Vec::new();
    for entry in fs::read_dir(root).map_err(|e| CoreError::io(root, e))? {
        let entry = entry.map_err(|e| CoreError::io(root, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        packages.push(PackageDirectory {
            name: entry.file_name().to_string_lossy().into_owned(),
            path,
        });
    }
    packages.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(packages)
}
