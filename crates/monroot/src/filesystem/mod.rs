//! Filesystem operations for the monitor rootfs.
//!
//! This module handles:
//! - Mount propagation hardening
//! - Mount option translation
//! - Host file, directory and device mirroring
//! - Caller-supplied bind mounts
//! - Rootfs assembly and the final root switch

pub mod device;
pub mod flags;
pub mod mirror;
pub mod pivot;
pub mod propagation;
pub mod rootfs;
pub mod volume;

pub use device::{DeviceClass, DeviceNode, replicate_device};
pub use flags::{FlagMapping, MountFlags, MountOptions, Polarity, map_mount_flag, needs_remount};
pub use mirror::{HostMirror, MirrorKind, mirror};
pub use pivot::{RootSwitch, change_root};
pub use propagation::{
    PropagationMode, make_parent_mount_private, map_rootfs_propagation_flag, secure_propagation,
    set_propagation,
};
pub use rootfs::{
    RootfsPlan, RootfsStep, build_monitor_rootfs, build_rootfs, find_data_dir_in,
    find_qemu_data_dir,
};
pub use volume::{VolumeMount, apply_volumes, plan_volumes};
