//! Caller-specified bind mounts from the OCI mount list.
//!
//! Only `bind` entries are handled. Each entry's options are reduced into
//! mount flags plus propagation keywords; the source is mirrored onto the
//! destination and then every propagation keyword is applied with its own
//! propagation-only `mount(2)`, because the kernel does not accept
//! propagation changes combined with other remount flags.

use std::path::{Path, PathBuf};

use monroot_common::paths::under_root;
use monroot_common::{MonrootError, MonrootResult};
use monroot_oci::runtime::Mount;

use super::flags::MountOptions;
use super::mirror::HostMirror;
use super::propagation::set_propagation;

/// A bind mount ready to be applied to a rootfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    /// Host source.
    pub source: PathBuf,
    /// Destination inside the rootfs.
    pub destination: PathBuf,
    /// Reduced options.
    pub options: MountOptions,
}

impl VolumeMount {
    /// Build from an OCI mount entry.
    ///
    /// Returns `Ok(None)` for non-bind entries.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a bind entry without a source.
    pub fn from_oci(mount: &Mount) -> MonrootResult<Option<Self>> {
        if !mount.is_bind() {
            return Ok(None);
        }
        let source = mount.source.clone().ok_or_else(|| {
            MonrootError::config(format!(
                "bind mount for {} has no source",
                mount.destination.display()
            ))
        })?;

        let options = MountOptions::parse(&mount.options);
        if !options.ignored.is_empty() {
            tracing::debug!(
                destination = %mount.destination.display(),
                ignored = ?options.ignored,
                "Ignoring unsupported mount options"
            );
        }

        Ok(Some(Self {
            source,
            destination: mount.destination.clone(),
            options,
        }))
    }

    /// Mirror the source into `rootfs`, then apply propagation keywords.
    ///
    /// # Errors
    ///
    /// Returns the first failing mirror or propagation step.
    pub fn apply(&self, rootfs: &Path) -> MonrootResult<()> {
        let dst = HostMirror::new(&self.source)
            .at(&self.destination)
            .with_flags(self.options.flags)
            .apply(rootfs)?;

        for mode in &self.options.propagation {
            set_propagation(&dst, *mode)?;
        }

        tracing::debug!(
            source = %self.source.display(),
            target = %dst.display(),
            flags = ?self.options.flags,
            "Volume mounted"
        );
        Ok(())
    }

    /// Destination path under `rootfs`.
    #[must_use]
    pub fn target(&self, rootfs: &Path) -> PathBuf {
        under_root(rootfs, &self.destination)
    }
}

/// Reduce the OCI mount list to the bind mounts that will be applied.
///
/// # Errors
///
/// Returns a configuration error for a bind entry without a source.
pub fn plan_volumes(mounts: &[Mount]) -> MonrootResult<Vec<VolumeMount>> {
    mounts
        .iter()
        .filter_map(|m| VolumeMount::from_oci(m).transpose())
        .collect()
}

/// Apply every bind mount in `mounts` to `rootfs`, in order.
///
/// Non-bind entries are skipped. The whole list is validated before the
/// first mount is issued.
///
/// # Errors
///
/// Returns the first failing entry.
pub fn apply_volumes(rootfs: &Path, mounts: &[Mount]) -> MonrootResult<()> {
    let volumes = plan_volumes(mounts)?;
    for volume in &volumes {
        volume.apply(rootfs)?;
    }
    tracing::debug!(
        count = volumes.len(),
        skipped = mounts.len() - volumes.len(),
        "Volumes applied"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::flags::MountFlags;
    use crate::filesystem::propagation::PropagationMode;

    fn volume(mount_type: &str) -> Mount {
        Mount {
            destination: "/data".into(),
            mount_type: Some(mount_type.to_string()),
            source: Some("/host/data".into()),
            options: vec!["rbind".to_string()],
        }
    }

    #[test]
    fn non_bind_entries_are_skipped() {
        let mounts = [volume("volume"), volume("tmpfs"), volume("proc")];
        assert!(plan_volumes(&mounts).unwrap().is_empty());
    }

    #[test_log::test]
    fn non_bind_entries_do_not_touch_rootfs() {
        let rootfs = tempfile::tempdir().unwrap();
        apply_volumes(rootfs.path(), &[volume("volume")]).unwrap();
        assert!(!rootfs.path().join("data").exists());
    }

    #[test]
    fn bind_entry_is_reduced() {
        let mounts = [Mount::bind("/host/data", "/data", ["rbind", "ro", "noexec"])];
        let planned = plan_volumes(&mounts).unwrap();
        assert_eq!(planned.len(), 1);

        let data = &planned[0];
        assert_eq!(data.source, PathBuf::from("/host/data"));
        assert_eq!(
            data.options.flags,
            MountFlags::BIND | MountFlags::REC | MountFlags::RDONLY | MountFlags::NOEXEC
        );
        assert_eq!(
            data.target(Path::new("/newroot")),
            PathBuf::from("/newroot/data")
        );
    }

    #[test]
    fn propagation_keywords_are_kept_in_order() {
        let mounts = [Mount::bind("/a", "/b", ["bind", "rshared", "private"])];
        let planned = plan_volumes(&mounts).unwrap();
        assert_eq!(
            planned[0].options.propagation,
            vec![PropagationMode::RShared, PropagationMode::Private]
        );
    }

    #[test]
    fn bind_without_source_is_rejected() {
        let mut mount = Mount::bind("/a", "/b", ["bind"]);
        mount.source = None;
        let err = plan_volumes(&[mount]).unwrap_err();
        assert!(matches!(err, MonrootError::Config { .. }));
    }
}
