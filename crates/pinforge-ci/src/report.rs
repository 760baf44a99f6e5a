//! JSON run report.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use pinforge_core::BuildManifest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::FailurePolicy;
use crate::pipeline::{PackageStatus, PipelineResult};
use crate::test_runner::TestRecord;

/// Per-package entry of a [`RunReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageReport {
    pub name: String,
    pub status: PackageStatus,
    pub build_exit_code: Option<i32>,
    pub build_duration_ms: Option<u64>,
    /// Every pin seen in the build output, excluded names included.
    pub resolved: BuildManifest,
    pub constraint_file: Option<PathBuf>,
    /// SHA-256 of the constraint file as written, hex encoded.
    pub constraint_sha256: Option<String>,
    pub tests: Vec<TestRecord>,
}

/// Machine-readable summary of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub policy: FailurePolicy,
    pub aborted: bool,
    pub excluded: Vec<String>,
    pub packages: Vec<PackageReport>,
}

impl RunReport {
    /// Build the report for a finished run. Constraint files are read back
    /// to digest them; an unreadable file gets no digest.
    pub fn from_result(result: &PipelineResult) -> Self {
        let packages = result
            .packages
            .iter()
            .map(|outcome| {
                let build = outcome.build.as_ref();
                PackageReport {
                    name: outcome.name.clone(),
                    status: outcome.status,
                    build_exit_code: build.map(|b| b.exit_code),
                    build_duration_ms: build.map(|b| b.duration_ms),
                    resolved: build.map(|b| b.manifest.clone()).unwrap_or_default(),
                    constraint_file: outcome.constraint_file.clone(),
                    constraint_sha256: outcome.constraint_file.as_deref().and_then(file_digest),
                    tests: outcome.tests.clone(),
                }
            })
            .collect();

        Self {
            started_at: result.started_at,
            finished_at: result.finished_at,
            duration_ms: result.duration_ms,
            policy: result.policy,
            aborted: result.aborted,
            excluded: result.excluded.iter().map(str::to_string).collect(),
            packages,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the report as pretty-printed JSON.
    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = self.to_json()?;
        fs::write(path, json)
    }
}

fn file_digest(path: &Path) -> Option<String> {
    let bytes = fs::read(path).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Some(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::BuildOutcome;
    use crate::pipeline::PackageOutcome;
    use pinforge_core::{ExclusionSet, PackageObservation};
    use tempfile::tempdir;

    fn sample(constraint: Option<PathBuf>) -> PipelineResult {
        let manifest: BuildManifest = vec![
            PackageObservation::new("alpha", "1.0.0"),
            PackageObservation::new("pip", "24.0"),
        ]
        .into_iter()
        .collect();
        let now = Utc::now();
        PipelineResult {
            packages: vec![
                PackageOutcome {
                    name: "pkgA".to_string(),
                    status: PackageStatus::Passed,
                    build: Some(BuildOutcome {
                        success: true,
                        exit_code: 0,
                        duration_ms: 1200,
                        manifest,
                    }),
                    constraint_file: constraint,
                    tests: vec![TestRecord {
                        file: "test_basic.py".to_string(),
                        passed: true,
                        exit_code: 0,
                        duration_ms: 40,
                    }],
                },
                PackageOutcome {
                    name: "pkgB".to_string(),
                    status: PackageStatus::SandboxFailed,
                    build: None,
                    constraint_file: None,
                    tests: vec![],
                },
            ],
            aborted: true,
            policy: FailurePolicy::AbortOnFailure,
            excluded: ExclusionSet::new(["pip", "setuptools"]),
            started_at: now,
            finished_at: now,
            duration_ms: 1500,
        }
    }

    #[test]
    fn test_report_from_result() {
        let dir = tempdir().unwrap();
        let constraint = dir.path().join("pkgA-constraint.txt");
        fs::write(&constraint, "alpha<=1.0.0\n").unwrap();

        let report = RunReport::from_result(&sample(Some(constraint.clone())));

        assert!(report.aborted);
        assert_eq!(report.excluded, vec!["pip", "setuptools"]);
        assert_eq!(report.packages.len(), 2);

        let a = &report.packages[0];
        assert_eq!(a.build_exit_code, Some(0));
        assert_eq!(a.resolved.get("pip"), Some("24.0"));
        assert_eq!(a.constraint_file.as_deref(), Some(constraint.as_path()));
        let digest = a.constraint_sha256.as_deref().unwrap();
        assert_eq!(digest.len(), 64);
        let mut hasher = Sha256::new();
        hasher.update(b"alpha<=1.0.0\n");
        assert_eq!(digest, hex::encode(hasher.finalize()));

        let b = &report.packages[1];
        assert_eq!(b.build_exit_code, None);
        assert!(b.resolved.is_empty());
        assert_eq!(b.constraint_sha256, None);
    }

    #[test]
    fn test_missing_constraint_file_has_no_digest() {
        let dir = tempdir().unwrap();
        let report = RunReport::from_result(&sample(Some(dir.path().join("gone.txt"))));
        assert!(report.packages[0].constraint_file.is_some());
        assert_eq!(report.packages[0].constraint_sha256, None);
    }

    #[test]
    fn test_write_round_trips_json() {
        let dir = tempdir().unwrap();
        let report = RunReport::from_result(&sample(None));
        let path = dir.path().join("report.json");
        report.write(&path).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["policy"], "abort_on_failure");
        assert_eq!(value["packages"][0]["status"], "passed");
        assert_eq!(value["packages"][0]["resolved"]["alpha"], "1.0.0");
        assert_eq!(value["packages"][1]["status"], "sandbox_failed");
    }
}
