//! Constraint file generation.
//!
//! One file per successfully built package, `<package>-constraint.txt`,
//! holding `name<=version` lines sorted by name. Names bundled with the
//! runtime itself are left out.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{CoreError, Result};
use crate::manifest::BuildManifest;

/// Package names shipped with the runtime. Matching is case-insensitive.
///
/// Computed once per run and shared by every package build.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionSet {
    names: BTreeSet<String>,
}

impl ExclusionSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            names: names
                .into_iter()
                .map(|n| n.as_ref().trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .collect(),
        }
    }

    /// Build from newline-separated output, as printed by the runtime's
    /// bundled-package query.
    pub fn from_lines(text: &str) -> Self {
        Self::new(text.lines())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(&name.to_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

impl std::fmt::Display for ExclusionSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("{")?;
        for (i, name) in self.names.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "'{name}'")?;
        }
        f.write_str("}")
    }
}

/// Writes upper-bound pins into a constraints directory.
#[derive(Debug, Clone)]
pub struct ConstraintWriter {
    output_dir: PathBuf,
}

impl ConstraintWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Path the constraint file for `package` is written to.
    pub fn path_for(&self, package: &str) -> PathBuf {
        self.output_dir.join(format!("{package}-constraint.txt"))
    }

    /// Write the constraint file for `package`.
    ///
    /// Returns `Ok(None)` without touching the filesystem when the manifest
    /// is empty. The file is always rewritten from scratch.
    pub fn write(
        &self,
        package: &str,
        manifest: &BuildManifest,
        excluded: &ExclusionSet,
    ) -> Result<Option<PathBuf>> {
        if manifest.is_empty() {
            debug!(package = %package, "Empty manifest, no constraint file written");
            return Ok(None);
        }

        let path = self.path_for(package);
        let contents = render_constraints(manifest, excluded);
        fs::write(&path, contents).map_err(|e| CoreError::io(&path, e))?;

        info!(package = %package, path = %path.display(), "Wrote constraint file");
        Ok(Some(path))
    }
}

/// Render `name<=version` lines in name order, skipping excluded names.
pub fn render_constraints(manifest: &BuildManifest, excluded: &ExclusionSet) -> String {
    let mut out = String::new();
    for (name, version) in manifest.iter() {
        if excluded.contains(name) {
            continue;
        }
        // writing to a String cannot fail
        let _ = writeln!(out, "{name}<={version}");
    }
    out
}
