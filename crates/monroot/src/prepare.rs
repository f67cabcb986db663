//! End-to-end monitor rootfs preparation.
//!
//! [`MonitorRootfs`] gathers everything needed to turn an empty directory
//! into the monitor's root and runs the fixed sequence:
//!
//! 1. harden mount propagation around the rootfs
//! 2. populate it for the monitor
//! 3. apply the caller's bind mounts
//! 4. switch the process root into it
//!
//! The first failure aborts. Whatever was already mounted or created stays
//! in place and has to be torn down with the container.
//!
//! ```no_run
//! use monroot::prepare::MonitorRootfs;
//!
//! # fn example() -> monroot_common::MonrootResult<()> {
//! MonitorRootfs::new("/run/containers/c1/rootfs", "/usr/bin/qemu-system-x86_64")
//!     .with_kvm(true)
//!     .with_tap(true)
//!     .prepare()?;
//! # Ok(())
//! # }
//! ```

use std::path::{Path, PathBuf};

use monroot_common::MonrootResult;
use monroot_oci::Spec;
use monroot_oci::runtime::Mount;

use crate::filesystem::{
    PropagationMode, RootSwitch, RootfsPlan, VolumeMount, apply_volumes, build_rootfs,
    change_root, plan_volumes, secure_propagation,
};
use crate::monitor::MonitorSetup;
use crate::namespace;

/// Builder for a monitor rootfs.
#[derive(Debug, Clone)]
pub struct MonitorRootfs {
    rootfs: PathBuf,
    monitor: MonitorSetup,
    propagation: Option<String>,
    switch: RootSwitch,
    mounts: Vec<Mount>,
}

impl MonitorRootfs {
    /// Rootfs at `rootfs` for the monitor binary at `monitor_binary`.
    pub fn new(rootfs: impl Into<PathBuf>, monitor_binary: impl Into<PathBuf>) -> Self {
        Self {
            rootfs: rootfs.into(),
            monitor: MonitorSetup::new(monitor_binary),
            propagation: None,
            switch: RootSwitch::default(),
            mounts: Vec::new(),
        }
    }

    /// Take propagation, root switch and mounts from an OCI spec.
    #[must_use]
    pub fn from_spec(
        rootfs: impl Into<PathBuf>,
        monitor_binary: impl Into<PathBuf>,
        spec: &Spec,
    ) -> Self {
        Self::new(rootfs, monitor_binary)
            .with_propagation(spec.rootfs_propagation().map(str::to_string))
            .with_switch(namespace::root_switch(spec))
            .with_mounts(spec.mounts.clone())
    }

    /// Replicate a snapshotter block device.
    #[must_use]
    pub fn with_block_device(mut self, device: impl Into<PathBuf>) -> Self {
        self.monitor.block_device = Some(device.into());
        self
    }

    /// Replicate `/dev/kvm`.
    #[must_use]
    pub const fn with_kvm(mut self, needs_kvm: bool) -> Self {
        self.monitor.needs_kvm = needs_kvm;
        self
    }

    /// Replicate `/dev/net/tun`.
    #[must_use]
    pub const fn with_tap(mut self, needs_tap: bool) -> Self {
        self.monitor.needs_tap = needs_tap;
        self
    }

    /// Copy the monitor binary instead of bind mounting it.
    #[must_use]
    pub const fn with_copy_binary(mut self, copy: bool) -> Self {
        self.monitor.copy_binary = copy;
        self
    }

    /// Propagation applied to `/`; `None` means `rslave`.
    #[must_use]
    pub fn with_propagation(mut self, propagation: Option<String>) -> Self {
        self.propagation = propagation;
        self
    }

    /// Root switch strategy.
    #[must_use]
    pub const fn with_switch(mut self, switch: RootSwitch) -> Self {
        self.switch = switch;
        self
    }

    /// Caller bind mounts, applied after the rootfs is populated.
    #[must_use]
    pub fn with_mounts(mut self, mounts: Vec<Mount>) -> Self {
        self.mounts = mounts;
        self
    }

    /// Rootfs directory.
    #[must_use]
    pub fn rootfs(&self) -> &Path {
        &self.rootfs
    }

    /// Monitor settings.
    #[must_use]
    pub const fn monitor(&self) -> &MonitorSetup {
        &self.monitor
    }

    /// Root switch strategy.
    #[must_use]
    pub const fn switch(&self) -> RootSwitch {
        self.switch
    }

    /// Propagation that will be applied to `/`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unsupported value.
    pub fn propagation(&self) -> MonrootResult<PropagationMode> {
        self.propagation
            .as_deref()
            .map_or_else(|| Ok(PropagationMode::default()), str::parse)
    }

    /// Assembly steps, without running them.
    #[must_use]
    pub fn plan(&self) -> RootfsPlan {
        RootfsPlan::for_monitor(&self.monitor)
    }

    /// Bind mounts that will be applied, without applying them.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for a bind entry without a source.
    pub fn volumes(&self) -> MonrootResult<Vec<VolumeMount>> {
        plan_volumes(&self.mounts)
    }

    /// Harden propagation, populate the rootfs and apply bind mounts.
    ///
    /// # Errors
    ///
    /// Returns the first failure, wrapped with the failing step.
    pub fn assemble(&self) -> MonrootResult<()> {
        secure_propagation(&self.rootfs, self.propagation.as_deref())
            .map_err(|e| e.in_step("secure propagation"))?;
        build_rootfs(&self.rootfs, &self.monitor)?;
        apply_volumes(&self.rootfs, &self.mounts).map_err(|e| e.in_step("bind mounts"))?;
        Ok(())
    }

    /// [`assemble`](Self::assemble), then switch the process root.
    ///
    /// # Errors
    ///
    /// Returns the first failure, wrapped with the failing step.
    pub fn prepare(&self) -> MonrootResult<()> {
        self.assemble()?;
        change_root(&self.rootfs, self.switch).map_err(|e| e.in_step(self.switch.to_string()))?;
        tracing::info!(
            monitor = %self.monitor.binary.display(),
            rootfs = %self.rootfs.display(),
            "Monitor rootfs ready"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use monroot_common::MonrootError;
    use monroot_oci::runtime::{Linux, Namespace, NamespaceType};

    #[test]
    fn from_spec_takes_namespace_propagation_and_mounts() {
        let spec = Spec {
            mounts: vec![
                Mount::bind("/host/data", "/data", ["rbind", "ro"]),
                Mount {
                    destination: "/cache".into(),
                    mount_type: Some("volume".into()),
                    source: None,
                    options: Vec::new(),
                },
            ],
            linux: Some(Linux {
                namespaces: vec![Namespace {
                    ns_type: NamespaceType::Mount,
                }],
                rootfs_propagation: Some("rprivate".into()),
            }),
            ..Spec::default()
        };

        let rootfs = MonitorRootfs::from_spec("/newroot", "/usr/bin/firecracker", &spec);
        assert_eq!(rootfs.switch(), RootSwitch::Pivot);
        assert_eq!(rootfs.propagation().unwrap(), PropagationMode::RPrivate);
        assert_eq!(rootfs.volumes().unwrap().len(), 1);
        assert_eq!(rootfs.rootfs(), Path::new("/newroot"));
    }

    #[test]
    fn empty_spec_means_chroot_and_default_propagation() {
        let rootfs =
            MonitorRootfs::from_spec("/newroot", "/usr/bin/qemu-system-x86_64", &Spec::default());
        assert_eq!(rootfs.switch(), RootSwitch::Chroot);
        assert_eq!(rootfs.propagation().unwrap(), PropagationMode::RSlave);
        assert!(rootfs.volumes().unwrap().is_empty());
    }

    #[test]
    fn builder_flags_reach_the_plan() {
        let rootfs = MonitorRootfs::new("/newroot", "/usr/bin/solo5-hvt")
            .with_kvm(true)
            .with_block_device("/dev/dm-3");
        let plan = rootfs.plan();
        assert!(plan.replicates(Path::new("/dev/kvm")));
        assert!(plan.replicates(Path::new("/dev/dm-3")));
        assert!(!plan.replicates(Path::new("/dev/net/tun")));
        assert!(rootfs.monitor().needs_kvm);
    }

    #[test]
    fn bad_propagation_aborts_before_any_mount() {
        let rootfs = tempfile::tempdir().unwrap();
        let err = MonitorRootfs::new(rootfs.path(), "/usr/bin/firecracker")
            .with_propagation(Some("bogus".into()))
            .assemble()
            .unwrap_err();

        let MonrootError::Step { step, source } = err else {
            panic!("expected a step error");
        };
        assert_eq!(step, "secure propagation");
        assert!(matches!(*source, MonrootError::Config { .. }));
        assert_eq!(std::fs::read_dir(rootfs.path()).unwrap().count(), 0);
    }
}
