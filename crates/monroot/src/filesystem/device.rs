//! Device node replication.
//!
//! The monitor needs a handful of host devices (`/dev/kvm`, `/dev/net/tun`,
//! a snapshotter block device, ...). Each one is recreated inside the new
//! root with the host's class, major/minor and owner. Permission bits gain
//! `o+rw` so that a non-root monitor can open them without any group setup.

use std::fs::{self, DirBuilder, Permissions};
use std::io;
use std::os::unix::fs::{DirBuilderExt, FileTypeExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use monroot_common::paths::under_root;
use monroot_common::{MonrootError, MonrootResult};
use rustix::fs::{FileType, Mode, makedev, major, minor, mknodat};

/// Permission bits added for "others" on every replicated node.
pub const OTHER_RW: u32 = 0o006;

/// Character or block device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    /// Character device.
    Char,
    /// Block device.
    Block,
}

impl DeviceClass {
    fn file_type(self) -> FileType {
        match self {
            Self::Char => FileType::CharacterDevice,
            Self::Block => FileType::BlockDevice,
        }
    }
}

/// A host device node as seen by `stat(2)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceNode {
    /// Host path.
    pub path: PathBuf,
    /// Device class.
    pub class: DeviceClass,
    /// Major number.
    pub major: u32,
    /// Minor number.
    pub minor: u32,
    /// Permission bits (`0o7777` mask).
    pub mode: u32,
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
}

impl DeviceNode {
    /// Stat a host device node.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` cannot be stat'ed or is neither a character
    /// nor a block device.
    pub fn from_host(path: &Path) -> MonrootResult<Self> {
        let meta = fs::metadata(path).map_err(|e| MonrootError::fs("stat device", path, e))?;
        let file_type = meta.file_type();
        let class = if file_type.is_char_device() {
            DeviceClass::Char
        } else if file_type.is_block_device() {
            DeviceClass::Block
        } else {
            return Err(MonrootError::fs(
                "replicate",
                path,
                io::Error::new(io::ErrorKind::InvalidInput, "not a device node"),
            ));
        };

        let rdev = meta.rdev();
        Ok(Self {
            path: path.to_path_buf(),
            class,
            major: major(rdev),
            minor: minor(rdev),
            mode: meta.mode() & 0o7777,
            uid: meta.uid(),
            gid: meta.gid(),
        })
    }

    /// Permission bits of the replicated node.
    #[must_use]
    pub const fn replicated_mode(&self) -> u32 {
        self.mode | OTHER_RW
    }

    /// Create this node at `target` and copy ownership.
    ///
    /// # Errors
    ///
    /// Returns an error if `mknod`, `chmod` or `chown` fails.
    pub fn create_at(&self, target: &Path) -> MonrootResult<()> {
        mknodat(
            rustix::fs::CWD,
            target,
            self.class.file_type(),
            Mode::from_raw_mode(self.mode),
            makedev(self.major, self.minor),
        )
        .map_err(|e| MonrootError::syscall("mknod", target, e.into()))?;

        // mknod is subject to the umask; chmod is not.
        fs::set_permissions(target, Permissions::from_mode(self.replicated_mode()))
            .map_err(|e| MonrootError::fs("chmod", target, e))?;
        std::os::unix::fs::chown(target, Some(self.uid), Some(self.gid))
            .map_err(|e| MonrootError::fs("chown", target, e))?;
        Ok(())
    }
}

/// Replicate the host device at `host_device` under `new_root`.
///
/// The target keeps the host path relative to `/`. Intermediate directories
/// are created when the device does not live directly under `/dev`.
///
/// # Errors
///
/// Returns an error if the host node cannot be read or the new node cannot
/// be created.
pub fn replicate_device(new_root: &Path, host_device: &Path) -> MonrootResult<PathBuf> {
    let node = DeviceNode::from_host(host_device)?;
    let target = under_root(new_root, host_device);

    if host_device.parent() != Some(Path::new("/dev")) {
        if let Some(dir) = target.parent() {
            DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(dir)
                .map_err(|e| MonrootError::fs("create directory", dir, e))?;
        }
    }

    node.create_at(&target)?;

    tracing::debug!(
        device = %host_device.display(),
        target = %target.display(),
        major = node.major,
        minor = node.minor,
        mode = format_args!("{:o}", node.replicated_mode()),
        "Device replicated"
    );
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn can_mknod() -> bool {
        caps::has_cap(None, caps::CapSet::Effective, caps::Capability::CAP_MKNOD).unwrap_or(false)
    }

    #[test]
    fn regular_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("plain");
        fs::write(&file, b"x").unwrap();

        let err = DeviceNode::from_host(&file).unwrap_err();
        assert!(err.to_string().contains("not a device node"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn missing_device_is_not_found() {
        let root = tempfile::tempdir().unwrap();
        let err = replicate_device(root.path(), Path::new("/dev/monroot-missing")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn host_null_is_a_char_device() {
        let node = DeviceNode::from_host(Path::new("/dev/null")).unwrap();
        assert_eq!(node.class, DeviceClass::Char);
        assert_eq!((node.major, node.minor), (1, 3));
        assert_eq!(node.replicated_mode() & OTHER_RW, OTHER_RW);
    }

    #[test]
    fn replicates_synthetic_null() {
        if !can_mknod() {
            eprintln!("skipping: CAP_MKNOD required");
            return;
        }

        let host = tempfile::tempdir().unwrap();
        let host_dev = host.path().join("devices/null0");
        fs::create_dir_all(host_dev.parent().unwrap()).unwrap();
        // CAP_MKNOD is not honoured inside a non-initial user namespace.
        if let Err(e) = mknodat(
            rustix::fs::CWD,
            &host_dev,
            FileType::CharacterDevice,
            Mode::from_raw_mode(0o660),
            makedev(1, 3),
        ) {
            eprintln!("skipping: mknod not permitted ({e})");
            return;
        }
        fs::set_permissions(&host_dev, Permissions::from_mode(0o660)).unwrap();
        let original = DeviceNode::from_host(&host_dev).unwrap();
        assert_eq!(original.mode, 0o660);

        let new_root = tempfile::tempdir().unwrap();
        let target = replicate_device(new_root.path(), &host_dev).unwrap();
        assert_eq!(target, under_root(new_root.path(), &host_dev));

        let replica = DeviceNode::from_host(&target).unwrap();
        assert_eq!(replica.class, DeviceClass::Char);
        assert_eq!((replica.major, replica.minor), (1, 3));
        assert_eq!(replica.mode, 0o666);
        assert_eq!((replica.uid, replica.gid), (original.uid, original.gid));
    }
}
