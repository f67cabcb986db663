//! Standard host paths and sizes used when assembling a monitor rootfs.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;

/// Environment variable overriding the share directory search roots.
pub const SHARE_DIRS_ENV: &str = "MONROOT_SHARE_DIRS";

/// Directories searched, in order, for monitor data and firmware files.
pub const DEFAULT_SHARE_DIRS: &[&str] = &["/usr/local/share", "/usr/share"];

/// Host library directories mirrored for dynamically linked monitors.
pub const LIB_DIR: &str = "/lib";
/// 64-bit library directory. Absent on some distributions.
pub const LIB64_DIR: &str = "/lib64";
/// `/usr/lib`.
pub const USR_LIB_DIR: &str = "/usr/lib";

/// Where the QEMU data directory lands inside the monitor rootfs.
pub const QEMU_DATA_TARGET: &str = "/usr/share/qemu";
/// Where the SeaBIOS directory lands inside the monitor rootfs.
pub const SEABIOS_TARGET: &str = "/usr/share/seabios";

/// Name of the directory that receives the old root during `pivot_root`.
pub const OLD_ROOT: &str = "old_root";

/// Size cap for the `/dev` and `/tmp` tmpfs mounts.
pub const TMPFS_SIZE: &str = "65536k";

/// Device nodes every monitor needs.
pub const DEV_NULL: &str = "/dev/null";
/// Entropy source.
pub const DEV_URANDOM: &str = "/dev/urandom";
/// TAP networking.
pub const DEV_TUN: &str = "/dev/net/tun";
/// Hardware virtualization.
pub const DEV_KVM: &str = "/dev/kvm";

/// Share directory search roots, honouring [`SHARE_DIRS_ENV`].
pub static SHARE_DIRS: Lazy<Vec<PathBuf>> = Lazy::new(|| {
    std::env::var(SHARE_DIRS_ENV)
        .ok()
        .map(|value| parse_search_path(&value))
        .filter(|dirs| !dirs.is_empty())
        .unwrap_or_else(|| DEFAULT_SHARE_DIRS.iter().map(PathBuf::from).collect())
});

/// Split a colon separated search path, dropping empty entries.
#[must_use]
pub fn parse_search_path(value: &str) -> Vec<PathBuf> {
    value
        .split(':')
        .filter(|s| !s.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Path of `host_path` relative to `/`, joined under `new_root`.
///
/// `host_path` is expected to be absolute; a relative path is joined as is.
#[must_use]
pub fn under_root(new_root: &Path, host_path: &Path) -> PathBuf {
    let relative = host_path.strip_prefix("/").unwrap_or(host_path);
    new_root.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn under_root_strips_leading_slash() {
        assert_eq!(
            under_root(Path::new("/newroot"), Path::new("/dev/net/tun")),
            PathBuf::from("/newroot/dev/net/tun")
        );
        assert_eq!(
            under_root(Path::new("/newroot"), Path::new("data")),
            PathBuf::from("/newroot/data")
        );
    }

    #[test]
    fn search_path_parsing() {
        assert_eq!(
            parse_search_path("/opt/share::/usr/share"),
            vec![PathBuf::from("/opt/share"), PathBuf::from("/usr/share")]
        );
        assert!(parse_search_path("").is_empty());
    }
}
