//! Monitor rootfs assembly.
//!
//! The rootfs is built in two phases. [`RootfsPlan::for_monitor`] turns a
//! [`MonitorSetup`] into an ordered list of [`RootfsStep`]s without touching
//! the filesystem; [`RootfsPlan::execute`] then runs the steps in order and
//! stops at the first failure. Steps marked optional are skipped when the
//! host resource they need does not exist.
//!
//! ## Step order
//!
//! | # | Step | Condition |
//! |---|------|-----------|
//! | 1 | monitor binary | always |
//! | 2 | `/lib`, `/lib64` (optional), `/usr/lib` | dynamically linked monitor |
//! | 3 | QEMU data dir, SeaBIOS dir (optional) | QEMU |
//! | 4 | `/proc` | always |
//! | 5 | tmpfs `/dev`, `/tmp` | always |
//! | 6 | `/dev/null`, `/dev/urandom` | always |
//! | 7 | `/dev/net/tun` | TAP requested or Firecracker |
//! | 8 | block device | when supplied |
//! | 9 | `/dev/kvm` | KVM requested |

use std::ffi::{CStr, CString};
use std::fmt;
use std::fs::{self, DirBuilder, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use monroot_common::paths::{self, under_root};
use monroot_common::{MonrootError, MonrootResult};
use rustix::mount::mount;

use super::device::replicate_device;
use super::flags::MountFlags;
use super::mirror::HostMirror;
use super::propagation::{PropagationMode, set_propagation};
use crate::monitor::MonitorSetup;

/// Private bind mount of a host path, as used for everything the assembler
/// mirrors.
fn host_mirror(host_path: impl Into<PathBuf>) -> HostMirror {
    HostMirror::new(host_path).with_propagation(PropagationMode::Private)
}

/// One step of rootfs assembly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RootfsStep {
    /// Mirror a host path.
    Mirror {
        /// What to mirror.
        mirror: HostMirror,
        /// Skip when the host path does not exist.
        optional: bool,
    },
    /// Locate a share directory by basename, then mirror it at `target`.
    DataDir {
        /// Basename searched in the share roots.
        name: String,
        /// Location inside the rootfs.
        target: PathBuf,
        /// Skip when the directory does not exist.
        optional: bool,
    },
    /// Mount a fresh `proc` at `/proc`.
    Proc,
    /// Mount a size-capped tmpfs.
    Tmpfs {
        /// Location inside the rootfs.
        path: PathBuf,
        /// Mount flags.
        flags: MountFlags,
        /// Root directory mode.
        mode: u32,
    },
    /// Replicate a host device node.
    Device {
        /// Host device path.
        path: PathBuf,
    },
}

impl RootfsStep {
    /// Whether a missing host resource is tolerated.
    #[must_use]
    pub const fn is_optional(&self) -> bool {
        match self {
            Self::Mirror { optional, .. } | Self::DataDir { optional, .. } => *optional,
            _ => false,
        }
    }

    fn mirror(host_path: &str, optional: bool) -> Self {
        Self::Mirror {
            mirror: host_mirror(host_path),
            optional,
        }
    }

    fn data_dir(name: &str, target: &str, optional: bool) -> Self {
        Self::DataDir {
            name: name.to_string(),
            target: PathBuf::from(target),
            optional,
        }
    }

    fn tmpfs(path: &str, flags: MountFlags, mode: u32) -> Self {
        Self::Tmpfs {
            path: PathBuf::from(path),
            flags,
            mode,
        }
    }

    fn device(path: impl Into<PathBuf>) -> Self {
        Self::Device { path: path.into() }
    }

    /// Run this step against `new_root`.
    ///
    /// # Errors
    ///
    /// Returns the underlying failure without step context.
    pub fn run(&self, new_root: &Path) -> MonrootResult<()> {
        match self {
            Self::Mirror { mirror, .. } => mirror.apply(new_root).map(drop),
            Self::DataDir { name, target, .. } => {
                let host_dir = find_qemu_data_dir(name)?;
                host_mirror(host_dir).at(target).apply(new_root).map(drop)
            }
            Self::Proc => mount_proc(new_root),
            Self::Tmpfs { path, flags, mode } => mount_tmpfs(new_root, path, *flags, *mode),
            Self::Device { path } => replicate_device(new_root, path).map(drop),
        }
    }
}

impl fmt::Display for RootfsStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Mirror { mirror, .. } => write!(f, "mirror {}", mirror.host_path.display()),
            Self::DataDir { name, .. } => write!(f, "mirror {name} data directory"),
            Self::Proc => f.write_str("mount /proc"),
            Self::Tmpfs { path, .. } => write!(f, "mount tmpfs {}", path.display()),
            Self::Device { path } => write!(f, "replicate {}", path.display()),
        }
    }
}

/// Ordered rootfs assembly steps for one monitor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RootfsPlan {
    steps: Vec<RootfsStep>,
}

impl RootfsPlan {
    /// Compute the steps for `monitor`.
    #[must_use]
    pub fn for_monitor(monitor: &MonitorSetup) -> Self {
        let mut steps = vec![RootfsStep::Mirror {
            mirror: host_mirror(&monitor.binary).copied(monitor.copy_binary),
            optional: false,
        }];

        if !monitor.kind.is_static() {
            steps.push(RootfsStep::mirror(paths::LIB_DIR, false));
            steps.push(RootfsStep::mirror(paths::LIB64_DIR, true));
            steps.push(RootfsStep::mirror(paths::USR_LIB_DIR, false));
        }

        if monitor.kind.needs_data_dirs() {
            steps.push(RootfsStep::data_dir("qemu", paths::QEMU_DATA_TARGET, false));
            steps.push(RootfsStep::data_dir("seabios", paths::SEABIOS_TARGET, true));
        }

        steps.push(RootfsStep::Proc);
        steps.push(RootfsStep::tmpfs(
            "/dev",
            MountFlags::NOSUID | MountFlags::STRICTATIME,
            0o755,
        ));
        steps.push(RootfsStep::tmpfs(
            "/tmp",
            MountFlags::NOSUID | MountFlags::NOEXEC | MountFlags::STRICTATIME,
            0o1777,
        ));

        steps.push(RootfsStep::device(paths::DEV_NULL));
        steps.push(RootfsStep::device(paths::DEV_URANDOM));
        if monitor.wants_tun() {
            steps.push(RootfsStep::device(paths::DEV_TUN));
        }
        if let Some(block) = &monitor.block_device {
            steps.push(RootfsStep::device(block));
        }
        if monitor.needs_kvm {
            steps.push(RootfsStep::device(paths::DEV_KVM));
        }

        Self { steps }
    }

    /// The planned steps, in execution order.
    #[must_use]
    pub fn steps(&self) -> &[RootfsStep] {
        &self.steps
    }

    /// Whether the plan replicates the host device at `path`.
    #[must_use]
    pub fn replicates(&self, path: &Path) -> bool {
        self.steps
            .iter()
            .any(|s| matches!(s, RootfsStep::Device { path: p } if p == path))
    }

    /// Run every step against `new_root`.
    ///
    /// Optional steps are skipped when the host path they mirror does not
    /// exist. Any other failure, including a missing path inside the rootfs,
    /// aborts. Nothing is rolled back.
    ///
    /// # Errors
    ///
    /// Returns the first failing step, wrapped with the step name.
    pub fn execute(&self, new_root: &Path) -> MonrootResult<()> {
        for step in &self.steps {
            match step.run(new_root) {
                Ok(()) => tracing::debug!(%step, "Rootfs step done"),
                Err(e) if step.is_optional() && e.is_missing_source() => {
                    tracing::debug!(%step, error = %e, "Optional host resource missing, skipped");
                }
                Err(e) => return Err(e.in_step(step.to_string())),
            }
        }
        Ok(())
    }
}

/// Populate `new_root` with everything the monitor needs.
///
/// # Errors
///
/// Returns the first failing step. The partially built tree is left behind.
pub fn build_monitor_rootfs(
    new_root: &Path,
    monitor_binary: &Path,
    block_device: Option<&Path>,
    needs_kvm: bool,
    needs_tap: bool,
) -> MonrootResult<()> {
    let mut monitor = MonitorSetup::new(monitor_binary);
    monitor.block_device = block_device.map(Path::to_path_buf);
    monitor.needs_kvm = needs_kvm;
    monitor.needs_tap = needs_tap;
    build_rootfs(new_root, &monitor)
}

/// Plan and execute the rootfs for `monitor`.
///
/// # Errors
///
/// See [`RootfsPlan::execute`].
pub fn build_rootfs(new_root: &Path, monitor: &MonitorSetup) -> MonrootResult<()> {
    let plan = RootfsPlan::for_monitor(monitor);
    plan.execute(new_root)?;
    tracing::info!(
        rootfs = %new_root.display(),
        monitor = %monitor.kind,
        steps = plan.steps().len(),
        "Monitor rootfs built"
    );
    Ok(())
}

fn create_dir(path: &Path, mode: u32) -> MonrootResult<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(mode)
        .create(path)
        .map_err(|e| MonrootError::fs("create directory", path, e))
}

fn mount_proc(new_root: &Path) -> MonrootResult<()> {
    let target = new_root.join("proc");
    create_dir(&target, 0o555)?;
    mount("proc", &target, "proc", MountFlags::empty(), None::<&CStr>)
        .map_err(|e| MonrootError::syscall("mount proc", &target, e.into()))
}

fn mount_tmpfs(new_root: &Path, path: &Path, flags: MountFlags, mode: u32) -> MonrootResult<()> {
    let target = under_root(new_root, path);
    let data = format!("mode={mode:o},size={}", paths::TMPFS_SIZE);

    let data_c = CString::new(data.as_str())
        .map_err(|e| MonrootError::fs("mount tmpfs", &target, e.into()))?;

    create_dir(&target, 0o755)?;
    mount("tmpfs", &target, "tmpfs", flags, data_c.as_c_str())
        .map_err(|e| MonrootError::syscall("mount tmpfs", &target, e.into()))?;
    set_propagation(&target, PropagationMode::Private)?;

    // Reassert the root mode, sticky bit included.
    fs::set_permissions(&target, Permissions::from_mode(mode))
        .map_err(|e| MonrootError::fs("chmod", &target, e))?;

    tracing::debug!(target = %target.display(), %data, "tmpfs mounted");
    Ok(())
}

/// Locate `basename` in the share directory search roots.
///
/// See [`find_data_dir_in`].
///
/// # Errors
///
/// Returns an error if a search root cannot be inspected.
pub fn find_qemu_data_dir(basename: &str) -> MonrootResult<PathBuf> {
    find_data_dir_in(&paths::SHARE_DIRS, basename)
}

/// Locate `basename` under `roots`, in order.
///
/// The first existing entry wins. A symbolic link is resolved one level
/// (the raw link target, which may be relative). When no earlier root has
/// the entry, the last root's candidate is returned without checking that
/// it exists; callers find out when they try to use it.
///
/// # Errors
///
/// Returns an error if an entry cannot be inspected for a reason other than
/// not existing, or a link cannot be read.
pub fn find_data_dir_in(roots: &[PathBuf], basename: &str) -> MonrootResult<PathBuf> {
    let Some((last, earlier)) = roots.split_last() else {
        return Err(MonrootError::config("no share directories to search"));
    };

    for root in earlier {
        let candidate = root.join(basename);
        match fs::symlink_metadata(&candidate) {
            Ok(meta) if meta.file_type().is_symlink() => {
                return fs::read_link(&candidate)
                    .map_err(|e| MonrootError::fs("read link", &candidate, e));
            }
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(MonrootError::fs("stat", &candidate, e)),
        }
    }

    Ok(last.join(basename))
}
