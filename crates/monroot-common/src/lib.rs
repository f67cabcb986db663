//! # monroot-common
//!
//! Shared types for the monroot crates:
//! - The [`MonrootError`] taxonomy used by every rootfs operation
//! - Standard host paths, device nodes and tmpfs sizing

#![warn(missing_docs)]

pub mod error;
pub mod paths;

pub use error::{MonrootError, MonrootResult};
