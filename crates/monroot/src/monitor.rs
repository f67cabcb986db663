//! Monitor identification.
//!
//! The monitor type is implied by the basename of its binary. It decides
//! which host resources the rootfs needs beyond the common device set.

use std::fmt;
use std::path::{Path, PathBuf};

/// Hypervisor family, derived from the binary basename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorKind {
    /// Any binary whose basename starts with `qemu`.
    Qemu,
    /// `firecracker`, statically linked.
    Firecracker,
    /// Anything else, by basename.
    Other(String),
}

impl MonitorKind {
    /// Classify a monitor binary.
    #[must_use]
    pub fn from_path(binary: &Path) -> Self {
        let name = binary
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        if name == "firecracker" {
            Self::Firecracker
        } else if name.starts_with("qemu") {
            Self::Qemu
        } else {
            Self::Other(name)
        }
    }

    /// Statically linked monitors need no host libraries.
    #[must_use]
    pub const fn is_static(&self) -> bool {
        matches!(self, Self::Firecracker)
    }

    /// Whether `/dev/net/tun` is needed regardless of the TAP request.
    #[must_use]
    pub const fn needs_tun(&self) -> bool {
        matches!(self, Self::Firecracker)
    }

    /// Whether the QEMU data and firmware directories are needed.
    #[must_use]
    pub const fn needs_data_dirs(&self) -> bool {
        matches!(self, Self::Qemu)
    }
}

impl fmt::Display for MonitorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Qemu => f.write_str("qemu"),
            Self::Firecracker => f.write_str("firecracker"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

/// Everything the rootfs assembler needs to know about the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSetup {
    /// Absolute path of the monitor binary on the host.
    pub binary: PathBuf,
    /// Monitor type.
    pub kind: MonitorKind,
    /// Snapshotter block device backing the guest disk.
    pub block_device: Option<PathBuf>,
    /// Replicate `/dev/kvm`.
    pub needs_kvm: bool,
    /// Replicate `/dev/net/tun`.
    pub needs_tap: bool,
    /// Copy the binary instead of bind mounting it.
    pub copy_binary: bool,
}

impl MonitorSetup {
    /// Setup for `binary` with no optional devices.
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        let binary = binary.into();
        Self {
            kind: MonitorKind::from_path(&binary),
            binary,
            block_device: None,
            needs_kvm: false,
            needs_tap: false,
            copy_binary: false,
        }
    }

    /// Whether `/dev/net/tun` ends up in the rootfs.
    #[must_use]
    pub const fn wants_tun(&self) -> bool {
        self.needs_tap || self.kind.needs_tun()
    }
}
