//! Directory teardown that degrades instead of failing.
//!
//! [`release_tree`] escalates through three stages per entry:
//!
//! 1. plain delete
//! 2. make the entry and its parent writable, delete again
//! 3. move the entry into a quarantine directory under a fresh name
//!
//! The policy depends only on the path, the [`ReleaseCapabilities`] and the
//! [`TreeOps`] it is handed, so platform quirks live in the ops
//! implementation rather than in the callers.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Filesystem primitives used during teardown.
///
/// Every method defaults to the host filesystem; tests override individual
/// methods to simulate locked or read-only entries.
pub trait TreeOps: Send + Sync {
    fn remove_tree(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn remove_dir(&self, path: &Path) -> io::Result<()> {
        fs::remove_dir(path)
    }

    fn make_writable(&self, path: &Path) -> io::Result<()> {
        make_writable(path)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostFs;

impl TreeOps for HostFs {}

/// What the release policy is allowed to do beyond a plain delete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseCapabilities {
    /// Retry failed deletes after clearing read-only bits.
    pub force_writable: bool,
    /// Where undeletable entries are moved. `None` disables quarantine.
    pub quarantine_dir: Option<PathBuf>,
}

impl ReleaseCapabilities {
    /// Full escalation, quarantining into `trash`.
    pub fn with_quarantine(trash: impl Into<PathBuf>) -> Self {
        Self {
            force_writable: true,
            quarantine_dir: Some(trash.into()),
        }
    }
}

/// Summary of a teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseOutcome {
    /// Entries removed (the whole tree counts as one on the fast path).
    pub removed: usize,
    /// Entries that needed their permissions forced first.
    pub forced: usize,
    /// Destinations of entries moved into quarantine.
    pub quarantined: Vec<PathBuf>,
    /// The path still exists after every stage was tried.
    pub residual: bool,
}

impl ReleaseOutcome {
    pub fn is_clean(&self) -> bool {
        !self.residual
    }
}

fn exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

/// Remove `path` and everything under it, escalating per entry.
///
/// Never returns an error; anything that survives is reported through
/// [`ReleaseOutcome::residual`].
pub fn release_tree(path: &Path, caps: &ReleaseCapabilities, ops: &dyn TreeOps) -> ReleaseOutcome {
    let mut outcome = ReleaseOutcome::default();
    if !exists(path) {
        return outcome;
    }

    match ops.remove_tree(path) {
        Ok(()) => {
            outcome.removed = 1;
            return outcome;
        }
        Err(e) => debug!(path = %path.display(), error = %e, "Plain delete failed, escalating"),
    }

    let entries: Vec<(PathBuf, bool)> = WalkDir::new(path)
        .follow_links(false)
        .contents_first(true)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| (entry.path().to_path_buf(), entry.file_type().is_dir()))
        .collect();

    for (entry, is_dir) in &entries {
        release_entry(entry, *is_dir, caps, ops, &mut outcome);
    }

    // the root comes last with contents_first, but it may not have been
    // listed at all if it could not be read
    if exists(path) {
        let is_dir = fs::symlink_metadata(path)
            .map(|m| m.is_dir())
            .unwrap_or(true);
        release_entry(path, is_dir, caps, ops, &mut outcome);
    }

    outcome.residual = exists(path);
    if outcome.residual {
        warn!(path = %path.display(), "Directory could not be fully released");
    }
    outcome
}

fn remove_entry(path: &Path, is_dir: bool, ops: &dyn TreeOps) -> io::Result<()> {
    if is_dir {
        ops.remove_dir(path)
    } else {
        ops.remove_file(path)
    }
}

fn release_entry(
    path: &Path,
    is_dir: bool,
    caps: &ReleaseCapabilities,
    ops: &dyn TreeOps,
    outcome: &mut ReleaseOutcome,
) {
    if !exists(path) {
        return;
    }

    if remove_entry(path, is_dir, ops).is_ok() {
        outcome.removed += 1;
        return;
    }

    if caps.force_writable {
        let _ = ops.make_writable(path);
        if let Some(parent) = path.parent() {
            let _ = ops.make_writable(parent);
        }
        if remove_entry(path, is_dir, ops).is_ok() {
            outcome.forced += 1;
            return;
        }
    }

    if let Some(quarantine) = &caps.quarantine_dir {
        let dest = quarantine.join(Uuid::new_v4().simple().to_string());
        let moved = fs::create_dir_all(quarantine).and_then(|_| ops.rename(path, &dest));
        match moved {
            Ok(()) => {
                debug!(from = %path.display(), to = %dest.display(), "Quarantined entry");
                outcome.quarantined.push(dest);
                return;
            }
            Err(e) => debug!(path = %path.display(), error = %e, "Quarantine move failed"),
        }
    }

    debug!(path = %path.display(), "Entry left in place");
}

/// Clear read-only bits on `path`.
#[cfg(unix)]
pub fn make_writable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = fs::symlink_metadata(path)?;
    if metadata.file_type().is_symlink() {
        return Ok(());
    }
    let mut perms = metadata.permissions();
    let extra = if metadata.is_dir() { 0o700 } else { 0o600 };
    perms.set_mode(perms.mode() | extra);
    fs::set_permissions(path, perms)
}

/// Clear read-only bits on `path`.
#[cfg(not(unix))]
pub fn make_writable(path: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    let mut perms = metadata.permissions();
    if perms.readonly() {
        perms.set_readonly(false);
        fs::set_permissions(path, perms)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Refuses to delete files with a locked name, like a file held open
    /// by another process on Windows.
    struct LockedFs {
        locked: HashSet<String>,
        allow_rename: bool,
    }

    impl LockedFs {
        fn new(names: &[&str], allow_rename: bool) -> Self {
            Self {
                locked: names.iter().map(|s| s.to_string()).collect(),
                allow_rename,
            }
        }

        fn is_locked(&self, path: &Path) -> bool {
            path.file_name()
                .map(|n| self.locked.contains(&*n.to_string_lossy()))
                .unwrap_or(false)
        }
    }

    impl TreeOps for LockedFs {
        fn remove_tree(&self, _path: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "tree busy"))
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            if self.is_locked(path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            fs::remove_file(path)
        }

        fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
            if !self.allow_rename {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "no rename"));
            }
            fs::rename(from, to)
        }
    }

    /// Deletes succeed only after `make_writable` was called on the path.
    #[derive(Default)]
    struct ReadOnlyFs {
        unlocked: Mutex<HashSet<PathBuf>>,
    }

    impl TreeOps for ReadOnlyFs {
        fn remove_tree(&self, _path: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"))
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            if !self.unlocked.lock().unwrap().contains(path) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only"));
            }
            fs::remove_file(path)
        }

        fn make_writable(&self, path: &Path) -> io::Result<()> {
            self.unlocked.lock().unwrap().insert(path.to_path_buf());
            Ok(())
        }
    }

    fn populate(root: &Path) {
        fs::create_dir_all(root.join("lib/site-packages")).unwrap();
        fs::write(root.join("lib/site-packages/mod.py"), "x = 1").unwrap();
        fs::write(root.join("lib/site-packages/ext.pyd"), "binary").unwrap();
        fs::write(root.join("python.exe"), "exe").unwrap();
    }

    #[test]
    fn test_plain_delete_fast_path() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("work");
        populate(&target);

        let caps = ReleaseCapabilities::with_quarantine(dir.path().join(".trash"));
        let outcome = release_tree(&target, &caps, &HostFs);

        assert_eq!(outcome.removed, 1);
        assert!(outcome.is_clean());
        assert!(!target.exists());
        assert!(!dir.path().join(".trash").exists());
    }

    #[test]
    fn test_missing_path_is_a_no_op() {
        let dir = tempdir().unwrap();
        let caps = ReleaseCapabilities::with_quarantine(dir.path().join(".trash"));
        let outcome = release_tree(&dir.path().join("absent"), &caps, &HostFs);
        assert_eq!(outcome, ReleaseOutcome::default());
    }

    #[test]
    fn test_read_only_entries_are_forced() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("work");
        populate(&target);

        let caps = ReleaseCapabilities::with_quarantine(dir.path().join(".trash"));
        let outcome = release_tree(&target, &caps, &ReadOnlyFs::default());

        assert_eq!(outcome.forced, 3);
        assert!(outcome.quarantined.is_empty());
        assert!(outcome.is_clean());
        assert!(!target.exists());
    }

    #[test]
    fn test_locked_file_is_quarantined() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("work");
        let trash = dir.path().join(".trash");
        populate(&target);

        let caps = ReleaseCapabilities::with_quarantine(&trash);
        let outcome = release_tree(&target, &caps, &LockedFs::new(&["ext.pyd"], true));

        assert!(outcome.is_clean());
        assert!(!target.exists());
        assert_eq!(outcome.quarantined.len(), 1);
        let moved = &outcome.quarantined[0];
        assert!(moved.starts_with(&trash));
        assert_eq!(fs::read_to_string(moved).unwrap(), "binary");
    }

    #[test]
    fn test_without_quarantine_reports_residual() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("work");
        populate(&target);

        let caps = ReleaseCapabilities {
            force_writable: true,
            quarantine_dir: None,
        };
        let outcome = release_tree(&target, &caps, &LockedFs::new(&["ext.pyd"], true));

        assert!(outcome.residual);
        assert!(target.join("lib/site-packages/ext.pyd").exists());
        assert!(!target.join("lib/site-packages/mod.py").exists());
    }
}
