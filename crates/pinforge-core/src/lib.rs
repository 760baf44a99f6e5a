//! pinforge core library
//!
//! Synchronous domain logic for per-package build orchestration:
//! - version keys and max-version resolution
//! - streaming build-log parsing into a per-build manifest
//! - constraint file rendering with a bundled-package exclusion set
//! - package discovery and test manifests
//! - pristine/working runtime sandboxes with escalating teardown
//! - the CI console protocol and tracing setup

pub mod console;
pub mod constraints;
pub mod error;
pub mod manifest;
pub mod package;
pub mod parser;
pub mod sandbox;
pub mod telemetry;
pub mod version;

pub use console::{Captured, Console};
pub use constraints::{render_constraints, ConstraintWriter, ExclusionSet};
pub use error::{CoreError, Result};
pub use manifest::BuildManifest;
pub use package::{
    discover_packages, HostPlatform, PackageDirectory, TestManifest, TEST_MANIFEST_FILE,
};
pub use parser::{normalize_name, OutputParser, PackageObservation};
pub use sandbox::{RuntimeLayout, SandboxError, SandboxManager, WorkingReset};
pub use telemetry::init_tracing;
pub use version::{max_version, Segment, VersionKey};
