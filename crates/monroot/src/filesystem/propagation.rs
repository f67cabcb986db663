//! Mount propagation control.
//!
//! Before anything is mounted into a new rootfs, the mount tree is hardened so
//! that no event in this namespace reaches the host:
//!
//! 1. `/` is remounted with the requested propagation (default `rslave`).
//! 2. The closest mount point at or above the rootfs is made private.
//!    `pivot_root` refuses a shared parent, and a shared parent would also
//!    leak the following bind mount to the host.
//! 3. The rootfs is recursively bind mounted onto itself so that it is a
//!    mount point `pivot_root` accepts.
//!
//! The order is fixed. Running step 3 before step 2 leaks the bind mount.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use monroot_common::{MonrootError, MonrootResult};
use rustix::io::Errno;
use rustix::mount::{MountPropagationFlags, mount_bind_recursive, mount_change};

/// A rootfs or mount-point propagation mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PropagationMode {
    /// `private`
    Private,
    /// `rprivate`
    RPrivate,
    /// `slave`
    Slave,
    /// `rslave`
    #[default]
    RSlave,
    /// `shared`
    Shared,
    /// `rshared`
    RShared,
    /// `unbindable`
    Unbindable,
    /// `runbindable`
    RUnbindable,
}

const PROPAGATION_TABLE: &[(&str, PropagationMode)] = &[
    ("private", PropagationMode::Private),
    ("rprivate", PropagationMode::RPrivate),
    ("slave", PropagationMode::Slave),
    ("rslave", PropagationMode::RSlave),
    ("shared", PropagationMode::Shared),
    ("rshared", PropagationMode::RShared),
    ("unbindable", PropagationMode::Unbindable),
    ("runbindable", PropagationMode::RUnbindable),
];

impl PropagationMode {
    /// Look up a propagation keyword.
    #[must_use]
    pub fn lookup(value: &str) -> Option<Self> {
        PROPAGATION_TABLE
            .iter()
            .find(|(name, _)| *name == value)
            .map(|(_, mode)| *mode)
    }

    /// Every supported mode.
    pub fn all() -> impl Iterator<Item = Self> {
        PROPAGATION_TABLE.iter().map(|(_, mode)| *mode)
    }

    /// The OCI keyword for this mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        PROPAGATION_TABLE
            .iter()
            .find(|(_, mode)| *mode == self)
            .map_or("rslave", |(name, _)| *name)
    }

    /// Whether the mode applies to the whole subtree.
    #[must_use]
    pub const fn is_recursive(self) -> bool {
        matches!(
            self,
            Self::RPrivate | Self::RSlave | Self::RShared | Self::RUnbindable
        )
    }

    /// Kernel flags for a propagation-only `mount(2)`.
    #[must_use]
    pub const fn flags(self) -> MountPropagationFlags {
        let base = match self {
            Self::Private | Self::RPrivate => MountPropagationFlags::PRIVATE,
            Self::Slave | Self::RSlave => MountPropagationFlags::DOWNSTREAM,
            Self::Shared | Self::RShared => MountPropagationFlags::SHARED,
            Self::Unbindable | Self::RUnbindable => MountPropagationFlags::UNBINDABLE,
        };
        if self.is_recursive() {
            base.union(MountPropagationFlags::REC)
        } else {
            base
        }
    }
}

impl FromStr for PropagationMode {
    type Err = MonrootError;

    fn from_str(value: &str) -> MonrootResult<Self> {
        Self::lookup(value).ok_or_else(|| {
            MonrootError::config(format!("rootfsPropagation={value} is not supported"))
        })
    }
}

impl fmt::Display for PropagationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map a `rootfsPropagation` value to its kernel flags.
///
/// # Errors
///
/// Returns a configuration error for an unsupported value.
pub fn map_rootfs_propagation_flag(value: &str) -> MonrootResult<MountPropagationFlags> {
    value.parse::<PropagationMode>().map(PropagationMode::flags)
}

/// Change the propagation type of the mount at `target`.
///
/// # Errors
///
/// Returns an error if `mount(2)` fails.
pub fn set_propagation(target: &Path, mode: PropagationMode) -> MonrootResult<()> {
    tracing::debug!(target = %target.display(), %mode, "Setting mount propagation");
    mount_change(target, mode.flags())
        .map_err(|e| MonrootError::syscall("set propagation", target, e.into()))
}

/// Outcome of trying to make one directory private.
enum PrivateRemount {
    Done,
    NotMountPoint,
}

fn try_make_private(path: &Path) -> Result<PrivateRemount, Errno> {
    match mount_change(path, MountPropagationFlags::PRIVATE) {
        Ok(()) => Ok(PrivateRemount::Done),
        Err(Errno::INVAL) => Ok(PrivateRemount::NotMountPoint),
        Err(e) => Err(e),
    }
}

/// Make the mount containing `path` private.
///
/// Walks from `path` towards `/`. `EINVAL` means the directory is not a
/// mount point and the walk continues with its parent; any other error
/// aborts. Reaching `/` without success is an error.
///
/// # Errors
///
/// Returns an error if a remount fails for a reason other than `EINVAL`, or
/// if no mount point could be made private.
pub fn make_parent_mount_private(path: &Path) -> MonrootResult<()> {
    let start = absolute(path)?;
    let mut current = start.as_path();
    loop {
        match try_make_private(current) {
            Ok(PrivateRemount::Done) => {
                tracing::debug!(
                    rootfs = %start.display(),
                    mount = %current.display(),
                    "Parent mount made private"
                );
                return Ok(());
            }
            Ok(PrivateRemount::NotMountPoint) => match current.parent() {
                Some(parent) => current = parent,
                None => break,
            },
            Err(e) => {
                return Err(MonrootError::syscall(
                    "make parent mount private",
                    current,
                    e.into(),
                ));
            }
        }
    }

    Err(MonrootError::syscall(
        "make parent mount private",
        &start,
        io::Error::from(Errno::INVAL),
    ))
}

fn absolute(path: &Path) -> MonrootResult<PathBuf> {
    std::path::absolute(path).map_err(|e| MonrootError::fs("resolve", path, e))
}

/// Harden mount propagation around `rootfs` before it is populated.
///
/// `propagation` overrides the mode applied to `/`; `None` means `rslave`.
/// The override is validated before any syscall is issued.
///
/// # Errors
///
/// Returns a configuration error for an unsupported override, or the first
/// failing syscall.
pub fn secure_propagation(rootfs: &Path, propagation: Option<&str>) -> MonrootResult<()> {
    let mode = match propagation {
        Some(value) => value.parse()?,
        None => PropagationMode::default(),
    };

    set_propagation(Path::new("/"), mode)?;
    make_parent_mount_private(rootfs)?;

    mount_bind_recursive(rootfs, rootfs)
        .map_err(|e| MonrootError::syscall("bind mount rootfs onto itself", rootfs, e.into()))?;

    tracing::info!(rootfs = %rootfs.display(), %mode, "Rootfs propagation secured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_modes_map_to_flags() {
        let expected = [
            ("private", MountPropagationFlags::PRIVATE),
            ("rprivate", MountPropagationFlags::PRIVATE | MountPropagationFlags::REC),
            ("slave", MountPropagationFlags::DOWNSTREAM),
            ("rslave", MountPropagationFlags::DOWNSTREAM | MountPropagationFlags::REC),
            ("shared", MountPropagationFlags::SHARED),
            ("rshared", MountPropagationFlags::SHARED | MountPropagationFlags::REC),
            ("unbindable", MountPropagationFlags::UNBINDABLE),
            ("runbindable", MountPropagationFlags::UNBINDABLE | MountPropagationFlags::REC),
        ];
        for (name, flags) in expected {
            assert_eq!(map_rootfs_propagation_flag(name).unwrap(), flags, "{name}");
        }
    }

    #[test]
    fn unsupported_mode_is_config_error() {
        for value in ["", "rbind", "Private", "r", "slaves"] {
            let err = map_rootfs_propagation_flag(value).unwrap_err();
            assert!(matches!(err, MonrootError::Config { .. }), "{value}");
        }
    }

    #[test]
    fn unsupported_override_fails_before_any_syscall() {
        // A bogus rootfs path would surface as a syscall error if anything
        // had been attempted.
        let err = secure_propagation(Path::new("/nonexistent/rootfs"), Some("bogus")).unwrap_err();
        assert!(matches!(err, MonrootError::Config { .. }));
    }

    #[test]
    fn rslave_matches_kernel_bits() {
        let bits = u64::from(PropagationMode::RSlave.flags().bits());
        assert_eq!(bits, u64::from(libc::MS_SLAVE | libc::MS_REC));
    }

    #[test]
    fn non_mount_point_is_not_private_remounted() {
        // EINVAL (not a mount point) when privileged, EPERM otherwise; neither
        // may be reported as success.
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("sub");
        std::fs::create_dir(&sub).unwrap();
        match try_make_private(&sub) {
            Ok(PrivateRemount::NotMountPoint) | Err(Errno::PERM) => {}
            Ok(PrivateRemount::Done) => panic!("{} is not a mount point", sub.display()),
            Err(e) => panic!("unexpected errno {e}"),
        }
    }

    #[test]
    fn default_is_rslave() {
        assert_eq!(PropagationMode::default(), PropagationMode::RSlave);
        assert!(PropagationMode::default().is_recursive());
    }

    #[test]
    fn names_round_trip() {
        for mode in PropagationMode::all() {
            assert_eq!(mode.as_str().parse::<PropagationMode>().unwrap(), mode);
        }
        assert_eq!(PropagationMode::all().count(), 8);
    }
}
