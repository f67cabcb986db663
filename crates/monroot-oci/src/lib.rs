//! # monroot-oci
//!
//! OCI (Open Container Initiative) runtime specification types for monroot.
//!
//! Only the slice of `config.json` that decides how a monitor rootfs is
//! built is modelled here: mounts, namespaces and rootfs propagation.

#![warn(missing_docs)]

pub mod runtime;

pub use runtime::Spec;
