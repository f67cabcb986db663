//! Switching the process root to the assembled rootfs.

use std::fmt;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};

use monroot_common::paths::OLD_ROOT;
use monroot_common::{MonrootError, MonrootResult};
use rustix::mount::{MountPropagationFlags, UnmountFlags, mount_change, unmount};

/// How the process root is changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RootSwitch {
    /// `pivot_root(2)`, then detach the old root. Needs a private mount
    /// namespace.
    #[default]
    Pivot,
    /// `chroot(2)`. The old root stays reachable to anything holding a
    /// reference into it.
    Chroot,
}

impl RootSwitch {
    /// Pivot when the container has its own mount namespace.
    #[must_use]
    pub const fn for_namespace(has_mount_namespace: bool) -> Self {
        if has_mount_namespace {
            Self::Pivot
        } else {
            Self::Chroot
        }
    }
}

impl fmt::Display for RootSwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pivot => f.write_str("pivot_root"),
            Self::Chroot => f.write_str("chroot"),
        }
    }
}

/// Make `rootfs` the process root and move to its `/`.
///
/// Failures after the root changed are not rolled back. A `pivot_root` that
/// is refused, as on a tree that was already pivoted into, removes the
/// `old_root` directory it created.
///
/// # Errors
///
/// Returns the first failing operation.
pub fn change_root(rootfs: &Path, switch: RootSwitch) -> MonrootResult<()> {
    chdir(rootfs)?;

    match switch {
        RootSwitch::Pivot => pivot_root(rootfs)?,
        RootSwitch::Chroot => rustix::process::chroot(".")
            .map_err(|e| MonrootError::syscall("chroot", rootfs, e.into()))?,
    }

    chdir(Path::new("/"))?;
    tracing::info!(rootfs = %rootfs.display(), %switch, "Process root switched");
    Ok(())
}

fn chdir(path: &Path) -> MonrootResult<()> {
    std::env::set_current_dir(path).map_err(|e| MonrootError::fs("chdir", path, e))
}

/// Pivot into the current directory, which must be `rootfs`.
fn pivot_root(rootfs: &Path) -> MonrootResult<()> {
    let put_old = rootfs.join(OLD_ROOT);
    DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(OLD_ROOT)
        .map_err(|e| MonrootError::fs("create directory", &put_old, e))?;

    if let Err(e) = rustix::process::pivot_root(".", OLD_ROOT) {
        if let Err(rm) = fs::remove_dir(OLD_ROOT) {
            tracing::warn!(path = %put_old.display(), error = %rm, "Failed to remove old_root");
        }
        return Err(MonrootError::syscall("pivot_root", rootfs, e.into()));
    }
    chdir(Path::new("/"))?;

    let old_root = PathBuf::from("/").join(OLD_ROOT);
    // Unmount events on the old root must not reach the host, where live
    // mounts may still reference it.
    mount_change(
        &old_root,
        MountPropagationFlags::DOWNSTREAM | MountPropagationFlags::REC,
    )
    .map_err(|e| MonrootError::syscall("make old root slave", &old_root, e.into()))?;

    // MNT_DETACH allows unmounting the previous working directory.
    unmount(&old_root, UnmountFlags::DETACH)
        .map_err(|e| MonrootError::syscall("umount2", &old_root, e.into()))?;
    fs::remove_dir(&old_root).map_err(|e| MonrootError::fs("remove", &old_root, e))?;

    tracing::debug!(rootfs = %rootfs.display(), "Old root detached and removed");
    Ok(())
}
