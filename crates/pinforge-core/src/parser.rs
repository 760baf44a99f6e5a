//! Streaming extraction of `(package, version)` observations from build logs.
//!
//! The parser is line-oriented and stateless: every call looks at exactly
//! one line, so it can be fed while the build is still running.

use regex::Regex;
use std::sync::OnceLock;

/// A `(normalized name, raw version)` pair seen in one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageObservation {
    pub name: String,
    pub version: String,
}

impl PackageObservation {
    pub fn new(name: &str, version: &str) -> Self {
        Self {
            name: normalize_name(name),
            version: version.to_string(),
        }
    }
}

/// Lowercase and replace underscores with hyphens.
pub fn normalize_name(name: &str) -> String {
    name.to_lowercase().replace('_', "-")
}

const INSTALL_MARKER: &str = "Successfully installed";

struct Patterns {
    wheel_ref: Regex,
    wheel_name: Regex,
    archive_ref: Regex,
    name_version: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        // "Downloading foo-1.0-py3-none-any.whl", "Using cached https://.../foo-1.0-...whl"
        wheel_ref: Regex::new(r"(?:Downloading|Using cached)\s+(\S+\.whl)").expect("static regex"),
        // wheel distribution names never contain '-'
        wheel_name: Regex::new(r"^([A-Za-z0-9_][A-Za-z0-9._]*)-(\d+[A-Za-z0-9._]*)-")
            .expect("static regex"),
        archive_ref: Regex::new(
            r"(?:Downloading|Using cached)\s+(?:\S*/)?([A-Za-z0-9_][A-Za-z0-9._-]*)-(\d+[A-Za-z0-9._]*)\.(?:tar\.gz|zip)",
        )
        .expect("static regex"),
        name_version: Regex::new(r"([A-Za-z0-9_][A-Za-z0-9._-]*)-(\d+[A-Za-z0-9._]*)")
            .expect("static regex"),
    })
}

/// Line parser for build output.
///
/// Three shapes are recognised independently, so a single line may yield
/// observations from more than one of them:
///
/// 1. wheel downloads / cache hits (`name-version-tags.whl`)
/// 2. source archive downloads / cache hits (`name-version.tar.gz|.zip`)
/// 3. the `Successfully installed a-1 b-2 ...` summary
///
/// Malformed filenames are skipped. Duplicates are kept; resolution happens
/// in [`crate::BuildManifest`].
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputParser;

impl OutputParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse one line and return every observation it contains.
    pub fn parse_line(&self, line: &str) -> Vec<PackageObservation> {
        let p = patterns();
        let mut found = Vec::new();

        if let Some(caps) = p.wheel_ref.captures(line) {
            let reference = &caps[1];
            let filename = reference.rsplit('/').next().unwrap_or(reference);
            if let Some(parts) = p.wheel_name.captures(filename) {
                found.push(PackageObservation::new(&parts[1], &parts[2]));
            }
        }

        if let Some(caps) = p.archive_ref.captures(line) {
            found.push(PackageObservation::new(&caps[1], &caps[2]));
        }

        if line.contains(INSTALL_MARKER) {
            for caps in p.name_version.captures_iter(line) {
                found.push(PackageObservation::new(&caps[1], &caps[2]));
            }
        }

        found
    }
}
