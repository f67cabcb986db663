//! Mirroring host files and directories into the new root.
//!
//! A mirror exposes a host path at the same (or an overridden) location
//! under the new root, either through a bind mount or, for files, a plain
//! copy. The destination always ends up with the source's mode and owner.

use std::fs::{self, DirBuilder, OpenOptions, Permissions};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use monroot_common::paths::under_root;
use monroot_common::{MonrootError, MonrootResult};
use rustix::mount::{mount_bind, mount_bind_recursive, mount_remount};

use super::flags::{MS_REMOUNT, MountFlags, needs_remount};
use super::propagation::{PropagationMode, set_propagation};

/// How a host path is brought into the new root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorKind {
    /// Bind mount a directory onto a created directory.
    Directory,
    /// Bind mount a file onto a created empty file.
    File,
    /// Copy file contents.
    Copy,
}

/// A host path to mirror into the new root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostMirror {
    /// Path on the host.
    pub host_path: PathBuf,
    /// Location inside the new root; defaults to `host_path`.
    pub target: Option<PathBuf>,
    /// Mount flags for the bind mount and the follow-up remount.
    pub flags: MountFlags,
    /// Propagation applied to the bind mount afterwards.
    pub propagation: Option<PropagationMode>,
    /// Copy files instead of bind mounting them.
    pub copy: bool,
}

impl HostMirror {
    /// Mirror `host_path` at the same location with bind flags.
    pub fn new(host_path: impl Into<PathBuf>) -> Self {
        Self {
            host_path: host_path.into(),
            target: None,
            flags: MountFlags::BIND,
            propagation: None,
            copy: false,
        }
    }

    /// Place the mirror at `target` inside the new root.
    #[must_use]
    pub fn at(mut self, target: impl Into<PathBuf>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Use `flags` for the mount.
    #[must_use]
    pub const fn with_flags(mut self, flags: MountFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Change the bind mount's propagation to `mode`.
    #[must_use]
    pub const fn with_propagation(mut self, mode: PropagationMode) -> Self {
        self.propagation = Some(mode);
        self
    }

    /// Copy instead of bind mounting when the source is a file.
    #[must_use]
    pub const fn copied(mut self, copy: bool) -> Self {
        self.copy = copy;
        self
    }

    /// Destination path under `new_root`.
    #[must_use]
    pub fn destination(&self, new_root: &Path) -> PathBuf {
        under_root(new_root, self.target.as_deref().unwrap_or(&self.host_path))
    }

    /// Mirror into `new_root` and return the destination.
    ///
    /// # Errors
    ///
    /// Returns an error if the source cannot be stat'ed, or any mkdir, mount,
    /// copy, chmod or chown fails. A missing source surfaces as a not-found
    /// error so that callers can tolerate optional paths.
    pub fn apply(&self, new_root: &Path) -> MonrootResult<PathBuf> {
        let meta = fs::metadata(&self.host_path)
            .map_err(|e| MonrootError::fs("stat", &self.host_path, e))?;
        let dst = self.destination(new_root);

        let kind = if meta.is_dir() {
            MirrorKind::Directory
        } else if self.copy {
            MirrorKind::Copy
        } else {
            MirrorKind::File
        };

        match kind {
            MirrorKind::Directory => {
                create_dir(&dst)?;
                self.bind(&dst)?;
            }
            MirrorKind::File => {
                if let Some(parent) = dst.parent() {
                    create_dir(parent)?;
                }
                OpenOptions::new()
                    .append(true)
                    .create(true)
                    .mode(meta.mode() & 0o7777)
                    .open(&dst)
                    .map_err(|e| MonrootError::fs("create file", &dst, e))?;
                self.bind(&dst)?;
            }
            MirrorKind::Copy => {
                if let Some(parent) = dst.parent() {
                    create_dir(parent)?;
                }
                fs::copy(&self.host_path, &dst).map_err(|e| MonrootError::fs("copy", &dst, e))?;
            }
        }

        // Bind mounts do not carry metadata over.
        fs::set_permissions(&dst, Permissions::from_mode(meta.mode() & 0o7777))
            .map_err(|e| MonrootError::fs("chmod", &dst, e))?;
        std::os::unix::fs::chown(&dst, Some(meta.uid()), Some(meta.gid()))
            .map_err(|e| MonrootError::fs("chown", &dst, e))?;

        if kind != MirrorKind::Copy {
            self.remount(&dst)?;
        }

        tracing::debug!(
            source = %self.host_path.display(),
            target = %dst.display(),
            ?kind,
            flags = ?self.flags,
            "Host path mirrored"
        );
        Ok(dst)
    }

    fn bind(&self, dst: &Path) -> MonrootResult<()> {
        let result = if self.flags.contains(MountFlags::REC) {
            mount_bind_recursive(&self.host_path, dst)
        } else {
            mount_bind(&self.host_path, dst)
        };
        result.map_err(|e| MonrootError::syscall("bind mount", dst, e.into()))
    }

    /// Apply attribute and propagation flags the initial bind ignored.
    fn remount(&self, dst: &Path) -> MonrootResult<()> {
        if needs_remount(self.flags) {
            let flags = self.flags.difference(MS_REMOUNT).union(MountFlags::BIND);
            mount_remount(dst, flags, "")
                .map_err(|e| MonrootError::syscall("remount", dst, e.into()))?;
        }

        if let Some(mode) = self.propagation {
            set_propagation(dst, mode)?;
        }
        Ok(())
    }
}

fn create_dir(path: &Path) -> MonrootResult<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(path)
        .map_err(|e| MonrootError::fs("create directory", path, e))
}

/// Mirror `host_path` into `new_root`.
///
/// `target` overrides the location inside the new root. With `copy`, files
/// are copied rather than bind mounted; directories are always bind mounted.
///
/// # Errors
///
/// See [`HostMirror::apply`].
pub fn mirror(
    new_root: &Path,
    host_path: &Path,
    target: Option<&Path>,
    flags: MountFlags,
    copy: bool,
) -> MonrootResult<PathBuf> {
    let mut request = HostMirror::new(host_path).with_flags(flags).copied(copy);
    request.target = target.map(Path::to_path_buf);
    request.apply(new_root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destination_defaults_to_host_path() {
        let lib = HostMirror::new("/usr/lib");
        assert_eq!(
            lib.destination(Path::new("/newroot")),
            PathBuf::from("/newroot/usr/lib")
        );

        let data = HostMirror::new("/opt/qemu/share").at("/usr/share/qemu");
        assert_eq!(
            data.destination(Path::new("/newroot")),
            PathBuf::from("/newroot/usr/share/qemu")
        );
    }

    #[test]
    fn missing_source_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let err = mirror(
            root.path(),
            Path::new("/monroot-missing/lib64"),
            None,
            MountFlags::BIND,
            false,
        )
        .unwrap_err();
        assert!(err.is_not_found());
        assert!(!root.path().join("monroot-missing").exists());
    }

    #[test]
    fn copy_preserves_contents_and_mode() {
        let host = tempfile::tempdir().unwrap();
        let binary = host.path().join("bin/firecracker");
        fs::create_dir_all(binary.parent().unwrap()).unwrap();
        fs::write(&binary, b"\x7fELF").unwrap();
        fs::set_permissions(&binary, Permissions::from_mode(0o751)).unwrap();

        let root = tempfile::tempdir().unwrap();
        // A copy is never remounted, so neither flags nor propagation apply.
        let dst = HostMirror::new(&binary)
            .at("/usr/bin/firecracker")
            .with_flags(MountFlags::BIND | MountFlags::RDONLY)
            .with_propagation(PropagationMode::Private)
            .copied(true)
            .apply(root.path())
            .unwrap();

        assert_eq!(dst, root.path().join("usr/bin/firecracker"));
        assert_eq!(fs::read(&dst).unwrap(), b"\x7fELF");
        let meta = fs::metadata(&dst).unwrap();
        assert_eq!(meta.mode() & 0o7777, 0o751);
        assert_eq!(meta.uid(), fs::metadata(&binary).unwrap().uid());
    }
}
