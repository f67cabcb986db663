//! Mount namespace handling.
//!
//! Only the mount namespace matters for rootfs assembly: with one, the
//! process root is switched with `pivot_root`; without one, `chroot` is the
//! fallback.

use monroot_common::{MonrootError, MonrootResult};
use monroot_oci::Spec;
use monroot_oci::runtime::NamespaceType;
use rustix::thread::{UnshareFlags, unshare_unsafe};

use crate::filesystem::RootSwitch;

/// Root switch strategy implied by the namespaces `spec` requests.
#[must_use]
pub fn root_switch(spec: &Spec) -> RootSwitch {
    RootSwitch::for_namespace(spec.has_namespace(NamespaceType::Mount))
}

/// Detach the calling thread into a private mount namespace.
///
/// Runtimes that already cloned the process into one do not need this.
///
/// # Errors
///
/// Returns an error if `unshare(2)` fails, usually for lack of
/// `CAP_SYS_ADMIN` or because the process is multithreaded.
#[allow(unsafe_code)]
pub fn enter_mount_namespace() -> MonrootResult<()> {
    // SAFETY: CLONE_NEWNS only copies the mount table; no file descriptor
    // table is unshared.
    unsafe { unshare_unsafe(UnshareFlags::NEWNS) }
        .map_err(|e| MonrootError::syscall("unshare(CLONE_NEWNS)", "/", e.into()))?;
    tracing::debug!("Entered private mount namespace");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use monroot_oci::runtime::{Linux, Namespace};

    fn spec_with(namespaces: &[NamespaceType]) -> Spec {
        Spec {
            linux: Some(Linux {
                namespaces: namespaces
                    .iter()
                    .map(|ns_type| Namespace { ns_type: *ns_type })
                    .collect(),
                ..Linux::default()
            }),
            ..Spec::default()
        }
    }

    #[test]
    fn mount_namespace_selects_pivot() {
        let spec = spec_with(&[NamespaceType::Pid, NamespaceType::Mount]);
        assert_eq!(root_switch(&spec), RootSwitch::Pivot);
    }

    #[test]
    fn no_mount_namespace_falls_back_to_chroot() {
        let spec = spec_with(&[NamespaceType::Network, NamespaceType::User]);
        assert_eq!(root_switch(&spec), RootSwitch::Chroot);
        assert_eq!(root_switch(&Spec::default()), RootSwitch::Chroot);
    }
}
