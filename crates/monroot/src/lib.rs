//! # Monroot
//!
//! Builds the isolated root filesystem a hypervisor monitor runs in, inside
//! an OCI container, and switches the process root into it.
//!
//! ## Features
//!
//! - **Propagation hardening**: no mount made while assembling reaches the host
//! - **Host mirroring**: monitor binary, libraries and data files by bind mount or copy
//! - **Device replication**: `/dev/kvm`, `/dev/net/tun` and block devices with host major/minor
//! - **Root switch**: `pivot_root` with a detached old root, or `chroot`
//!
//! ## Usage
//!
//! ```no_run
//! use monroot::prepare::MonitorRootfs;
//! use monroot_oci::Spec;
//! use std::path::Path;
//!
//! # fn example() -> monroot_common::MonrootResult<()> {
//! let bundle = Path::new("/run/containers/c1");
//! let spec = Spec::load(bundle)?;
//!
//! MonitorRootfs::from_spec(bundle.join("rootfs"), "/usr/bin/firecracker", &spec)
//!     .with_kvm(true)
//!     .prepare()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

#[cfg(not(target_os = "linux"))]
compile_error!("monroot only supports Linux");

pub mod cli;
pub mod filesystem;
pub mod monitor;
pub mod namespace;
pub mod prepare;

pub use monitor::{MonitorKind, MonitorSetup};
pub use prepare::MonitorRootfs;
