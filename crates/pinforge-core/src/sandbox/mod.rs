//! Disposable runtime copies.
//!
//! The base runtime is snapshotted once into a pristine copy. Before every
//! package build the working copy is torn down and recreated from that
//! snapshot, so nothing one build installs can leak into the next.
//!
//! Only filesystem work lives here; the runtime's own rebuild and cache
//! hooks are run by the CI layer against [`SandboxManager::working_executable`].

pub mod error;
pub mod release;

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use walkdir::WalkDir;

pub use error::{SandboxError, SandboxResult};
pub use release::{
    make_writable, release_tree, HostFs, ReleaseCapabilities, ReleaseOutcome, TreeOps,
};

/// Directory names under the layout root.
pub const BASE_DIR: &str = "monolithpy";
pub const PRISTINE_DIR: &str = "monolithpy_pristine";
pub const WORKING_DIR: &str = "monolithpy_work";
pub const TRASH_DIR: &str = ".trash";

/// Interpreter path relative to a runtime directory on this host.
pub fn default_interpreter() -> PathBuf {
    if cfg!(windows) {
        PathBuf::from("python.exe")
    } else {
        Path::new("bin").join("python3.13")
    }
}

/// Where the base, pristine, working and trash trees live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeLayout {
    pub base: PathBuf,
    pub pristine: PathBuf,
    pub working: PathBuf,
    pub trash: PathBuf,
    /// Interpreter path relative to any of the runtime trees.
    pub interpreter: PathBuf,
}

impl RuntimeLayout {
    /// Standard layout under `root` with the given relative interpreter.
    pub fn under(root: &Path, interpreter: impl Into<PathBuf>) -> Self {
        Self {
            base: root.join(BASE_DIR),
            pristine: root.join(PRISTINE_DIR),
            working: root.join(WORKING_DIR),
            trash: root.join(TRASH_DIR),
            interpreter: interpreter.into(),
        }
    }

    pub fn base_executable(&self) -> PathBuf {
        self.base.join(&self.interpreter)
    }

    pub fn working_executable(&self) -> PathBuf {
        self.working.join(&self.interpreter)
    }
}

/// Result of resetting the working copy.
#[derive(Debug, Clone)]
pub struct WorkingReset {
    /// Interpreter inside the fresh working copy.
    pub executable: PathBuf,
    /// How the previous working copy was torn down.
    pub released: ReleaseOutcome,
}

/// Owns the lifecycle of the pristine and working runtime copies.
pub struct SandboxManager {
    layout: RuntimeLayout,
    caps: ReleaseCapabilities,
    ops: Box<dyn TreeOps>,
}

impl std::fmt::Debug for SandboxManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxManager")
            .field("layout", &self.layout)
            .field("caps", &self.caps)
            .finish_non_exhaustive()
    }
}

impl SandboxManager {
    /// Manager on the host filesystem, quarantining into the layout's trash.
    pub fn new(layout: RuntimeLayout) -> Self {
        Self::with_ops(layout, Box::new(HostFs))
    }

    /// Manager with custom teardown primitives.
    pub fn with_ops(layout: RuntimeLayout, ops: Box<dyn TreeOps>) -> Self {
        let caps = ReleaseCapabilities::with_quarantine(layout.trash.clone());
        Self { layout, caps, ops }
    }

    pub fn layout(&self) -> &RuntimeLayout {
        &self.layout
    }

    pub fn working_executable(&self) -> PathBuf {
        self.layout.working_executable()
    }

    /// Check that the base runtime has its interpreter.
    pub fn ensure_base_runtime(&self) -> SandboxResult<PathBuf> {
        let exe = self.layout.base_executable();
        if !exe.exists() {
            return Err(SandboxError::RuntimeNotFound(exe));
        }
        Ok(exe)
    }

    /// Copy the base runtime into the pristine location, merging into any
    /// existing snapshot.
    pub fn snapshot_pristine(&self) -> SandboxResult<PathBuf> {
        self.ensure_base_runtime()?;
        info!(
            from = %self.layout.base.display(),
            to = %self.layout.pristine.display(),
            "Snapshotting pristine runtime"
        );
        copy_tree(&self.layout.base, &self.layout.pristine)?;
        Ok(self.layout.pristine.clone())
    }

    /// Tear down the working copy and recreate it from the pristine one.
    ///
    /// Teardown problems never surface: undeletable entries are forced or
    /// quarantined, and any residue is overwritten by the fresh copy. Only
    /// a failure to copy the pristine tree is an error.
    pub fn reset_working(&self) -> SandboxResult<WorkingReset> {
        let released = release_tree(&self.layout.working, &self.caps, self.ops.as_ref());
        if !released.quarantined.is_empty() {
            info!(
                count = released.quarantined.len(),
                trash = %self.layout.trash.display(),
                "Moved undeletable entries out of the working runtime"
            );
        }

        copy_tree(&self.layout.pristine, &self.layout.working)?;
        debug!(path = %self.layout.working.display(), "Working runtime ready");

        Ok(WorkingReset {
            executable: self.layout.working_executable(),
            released,
        })
    }
}

/// Recursively copy `src` into `dst`, creating directories as needed and
/// overwriting files that already exist. Symlinks are recreated on Unix.
pub fn copy_tree(src: &Path, dst: &Path) -> SandboxResult<()> {
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|source| SandboxError::Walk {
            path: src.to_path_buf(),
            source,
        })?;
        let rel = match entry.path().strip_prefix(src) {
            Ok(rel) => rel,
            Err(_) => continue,
        };
        let target = dst.join(rel);
        let copy_err = |source| SandboxError::Copy {
            from: entry.path().to_path_buf(),
            to: target.clone(),
            source,
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(copy_err)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target).map_err(copy_err)?;
        } else {
            fs::copy(entry.path(), &target).map_err(copy_err)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    let link = fs::read_link(src)?;
    if fs::symlink_metadata(dst).is_ok() {
        fs::remove_file(dst)?;
    }
    std::os::unix::fs::symlink(link, dst)
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    let meta = fs::metadata(src)?;
    if meta.is_dir() {
        copy_tree(src, dst).map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))
    } else {
        fs::copy(src, dst).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use tempfile::tempdir;

    struct LockedFs(&'static str);

    impl TreeOps for LockedFs {
        fn remove_tree(&self, _path: &Path) -> io::Result<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "busy"))
        }

        fn remove_file(&self, path: &Path) -> io::Result<()> {
            if path.file_name().map(|n| n == self.0).unwrap_or(false) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"));
            }
            fs::remove_file(path)
        }
    }

    fn base_runtime(root: &Path) -> RuntimeLayout {
        let layout = RuntimeLayout::under(root, default_interpreter());
        let exe = layout.base_executable();
        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, "interpreter").unwrap();
        fs::create_dir_all(layout.base.join("lib")).unwrap();
        fs::write(layout.base.join("lib/os.py"), "# stdlib").unwrap();
        layout
    }

    #[test]
    fn test_snapshot_requires_interpreter() {
        let dir = tempdir().unwrap();
        let layout = RuntimeLayout::under(dir.path(), default_interpreter());
        let manager = SandboxManager::new(layout);
        let err = manager.snapshot_pristine().unwrap_err();
        assert!(matches!(err, SandboxError::RuntimeNotFound(_)));
    }

    #[test]
    fn test_snapshot_and_reset() {
        let dir = tempdir().unwrap();
        let layout = base_runtime(dir.path());
        let manager = SandboxManager::new(layout.clone());

        manager.snapshot_pristine().unwrap();
        assert!(layout.pristine.join("lib/os.py").exists());

        let reset = manager.reset_working().unwrap();
        assert_eq!(reset.executable, layout.working_executable());
        assert!(reset.executable.exists());

        // simulate a build polluting the working copy
        fs::write(layout.working.join("lib/leaked.py"), "oops").unwrap();
        manager.reset_working().unwrap();
        assert!(!layout.working.join("lib/leaked.py").exists());
        assert!(layout.working.join("lib/os.py").exists());
    }

    #[test]
    fn test_reset_survives_locked_files() {
        let dir = tempdir().unwrap();
        let layout = base_runtime(dir.path());
        let manager = SandboxManager::with_ops(layout.clone(), Box::new(LockedFs("held.dll")));

        manager.snapshot_pristine().unwrap();
        manager.reset_working().unwrap();
        fs::write(layout.working.join("lib/held.dll"), "locked").unwrap();

        let reset = manager.reset_working().unwrap();

        assert!(reset.released.is_clean());
        assert_eq!(reset.released.quarantined.len(), 1);
        assert!(reset.released.quarantined[0].starts_with(&layout.trash));
        assert!(!layout.working.join("lib/held.dll").exists());
        let walked: Vec<_> = WalkDir::new(&layout.working)
            .into_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(walked.len() >= 3);
        assert!(layout.working_executable().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_tree_preserves_symlinks_and_modes() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        fs::create_dir_all(src.join("bin")).unwrap();
        let exe = src.join("bin/python3.13");
        fs::write(&exe, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&exe, fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("python3.13", src.join("bin/python3")).unwrap();

        let dst = dir.path().join("dst");
        copy_tree(&src, &dst).unwrap();
        // copying again over an existing tree merges
        copy_tree(&src, &dst).unwrap();

        let link = fs::read_link(dst.join("bin/python3")).unwrap();
        assert_eq!(link, PathBuf::from("python3.13"));
        let mode = fs::metadata(dst.join("bin/python3.13"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}
