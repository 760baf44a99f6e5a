//! Per-build resolution of observed package versions.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::parser::PackageObservation;
use crate::version::VersionKey;

/// Normalized package name -> single resolved version for one build.
///
/// Observations are folded as they arrive; for each name the version with
/// the greatest [`VersionKey`] is kept. On equal keys the first one seen
/// stays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildManifest {
    entries: BTreeMap<String, String>,
}

impl BuildManifest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one observation into the manifest.
    pub fn observe(&mut self, observation: PackageObservation) {
        match self.entries.get_mut(&observation.name) {
            Some(current) => {
                if VersionKey::parse(&observation.version) > VersionKey::parse(current) {
                    *current = observation.version;
                }
            }
            None => {
                self.entries.insert(observation.name, observation.version);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<PackageObservation> for BuildManifest {
    fn from_iter<T: IntoIterator<Item = PackageObservation>>(iter: T) -> Self {
        let mut manifest = BuildManifest::new();
        for observation in iter {
            manifest.observe(observation);
        }
        manifest
    }
}

impl Extend<PackageObservation> for BuildManifest {
    fn extend<T: IntoIterator<Item = PackageObservation>>(&mut self, iter: T) {
        for observation in iter {
            self.observe(observation);
        }
    }
}
