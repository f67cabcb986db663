//! OCI Runtime Specification types.
//!
//! Only the parts of `config.json` that shape the monitor rootfs are modelled:
//! the root, the mount list, the namespace list and `rootfsPropagation`.
//! Every other field is ignored on load.
//!
//! Based on the OCI Runtime Specification v1.2.0:
//! <https://github.com/opencontainers/runtime-spec/blob/main/config.md>

use std::path::{Path, PathBuf};

use monroot_common::{MonrootError, MonrootResult};
use serde::{Deserialize, Serialize};

/// Name of the runtime configuration inside an OCI bundle.
pub const CONFIG_FILE: &str = "config.json";

/// OCI Runtime Specification (config.json).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    /// OCI version.
    #[serde(default = "default_oci_version")]
    pub oci_version: String,

    /// Container's root filesystem.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub root: Option<Root>,

    /// Additional mounts, in the order they must be applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<Mount>,

    /// Linux-specific configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linux: Option<Linux>,
}

fn default_oci_version() -> String {
    "1.2.0".to_string()
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            oci_version: default_oci_version(),
            root: None,
            mounts: Vec::new(),
            linux: None,
        }
    }
}

impl Spec {
    /// Load `config.json` from an OCI bundle directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid JSON.
    pub fn load(bundle: &Path) -> MonrootResult<Self> {
        let path = bundle.join(CONFIG_FILE);
        let content =
            std::fs::read_to_string(&path).map_err(|e| MonrootError::fs("read", &path, e))?;
        let spec = serde_json::from_str(&content)?;
        tracing::debug!(path = %path.display(), "Loaded OCI runtime spec");
        Ok(spec)
    }

    /// Whether the spec requests a namespace of the given type.
    #[must_use]
    pub fn has_namespace(&self, ns_type: NamespaceType) -> bool {
        self.linux
            .as_ref()
            .is_some_and(|linux| linux.namespaces.iter().any(|ns| ns.ns_type == ns_type))
    }

    /// The requested rootfs propagation, if any and non-empty.
    #[must_use]
    pub fn rootfs_propagation(&self) -> Option<&str> {
        self.linux
            .as_ref()
            .and_then(|linux| linux.rootfs_propagation.as_deref())
            .filter(|value| !value.is_empty())
    }

    /// Root filesystem path resolved against the bundle directory.
    #[must_use]
    pub fn rootfs_in(&self, bundle: &Path) -> Option<PathBuf> {
        self.root.as_ref().map(|root| bundle.join(&root.path))
    }
}

/// Root filesystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Root {
    /// Path to the root filesystem.
    pub path: PathBuf,
}

/// Mount configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mount {
    /// Mount destination path (inside container).
    pub destination: PathBuf,
    /// Mount type (e.g., "bind", "tmpfs", "proc").
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub mount_type: Option<String>,
    /// Mount source path (outside container).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
    /// Mount options, order significant.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl Mount {
    /// Create a bind mount entry.
    pub fn bind(
        source: impl Into<PathBuf>,
        destination: impl Into<PathBuf>,
        options: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            destination: destination.into(),
            mount_type: Some("bind".to_string()),
            source: Some(source.into()),
            options: options.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether this entry is a bind mount.
    #[must_use]
    pub fn is_bind(&self) -> bool {
        self.mount_type.as_deref() == Some("bind")
    }
}

/// Linux-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    /// Namespaces to create/join.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<Namespace>,
    /// Rootfs propagation mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rootfs_propagation: Option<String>,
}

/// Namespace configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    /// Namespace type.
    #[serde(rename = "type")]
    pub ns_type: NamespaceType,
}

/// Namespace types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceType {
    /// PID namespace.
    Pid,
    /// Network namespace.
    Network,
    /// Mount namespace.
    Mount,
    /// IPC namespace.
    Ipc,
    /// UTS namespace.
    Uts,
    /// User namespace.
    User,
    /// Cgroup namespace.
    Cgroup,
    /// Time namespace.
    Time,
}
