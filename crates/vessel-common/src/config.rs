//! Immutable container specification.
//!
//! A [`ContainerConfig`] is produced by the frontend, read by the parent
//! orchestrator, and shipped to the namespaced child over the sync pipe.
//! The core never mutates it.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// One UID or GID mapping table entry for a user namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMap {
    /// First ID inside the container.
    pub container_id: u32,
    /// First ID on the host it maps to.
    pub host_id: u32,
    /// Number of consecutive IDs covered by this entry.
    pub size: u32,
}

/// One network to materialize for the container.
///
/// `type_` selects a strategy by name; the remaining fields are interpreted
/// by the selected strategy and ignored by the others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// Strategy name (`loopback`, `veth`).
    #[serde(rename = "type")]
    pub type_: String,
    /// Host bridge to attach the host-side interface to.
    #[serde(default)]
    pub bridge: String,
    /// CIDR address assigned inside the container.
    #[serde(default)]
    pub address: String,
    /// Default gateway inside the container.
    #[serde(default)]
    pub gateway: String,
    /// Prefix for generated veth interface names.
    #[serde(default)]
    pub veth_prefix: String,
    /// MTU for the created interfaces; 0 keeps the kernel default.
    #[serde(default)]
    pub mtu: u32,
}

/// Cgroup resource specification.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CgroupSpec {
    /// Cgroup directory name for this container.
    pub name: String,
    /// Parent directory under each controller mount; empty means the root.
    #[serde(default)]
    pub parent: String,
    /// CPU shares (relative weight); `None` leaves the controller default.
    #[serde(default)]
    pub cpu_shares: Option<u64>,
    /// Memory limit in bytes.
    #[serde(default)]
    pub memory: Option<u64>,
    /// Memory+swap limit in bytes.
    #[serde(default)]
    pub memory_swap: Option<u64>,
    /// CPU set (`cpuset.cpus` syntax, e.g. `"0-2"`).
    #[serde(default)]
    pub cpuset_cpus: Option<String>,
}

/// A bind mount to establish inside the container's mount namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindMount {
    /// Source path on the host.
    pub source: PathBuf,
    /// Destination path relative to the container root.
    pub destination: PathBuf,
    /// Whether the mount is writable; read-only otherwise.
    #[serde(default)]
    pub writable: bool,
}

/// Mount-namespace parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountConfig {
    /// Use `chroot` semantics instead of `pivot_root(2)`.
    #[serde(default)]
    pub no_pivot_root: bool,
    /// Remount the root filesystem read-only after setup.
    #[serde(default)]
    pub readonly_fs: bool,
    /// Additional bind mounts.
    #[serde(default)]
    pub mounts: Vec<BindMount>,
}

/// Immutable specification of a container.
///
/// Namespace names follow the kernel clone-flag spelling without the
/// `CLONE_` prefix: `NEWNS`, `NEWUTS`, `NEWIPC`, `NEWPID`, `NEWNET`,
/// `NEWUSER`. Unknown names are carried but ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Absolute path used as the new root after pivot.
    pub rootfs: PathBuf,
    /// Enabled namespaces by name.
    #[serde(default)]
    pub namespaces: BTreeMap<String, bool>,
    /// UID mapping table for `NEWUSER`; at most 5 entries.
    #[serde(default)]
    pub uid_mappings: Vec<IdMap>,
    /// GID mapping table for `NEWUSER`; at most 5 entries.
    #[serde(default)]
    pub gid_mappings: Vec<IdMap>,
    /// Networks to materialize, in order.
    #[serde(default)]
    pub networks: Vec<Network>,
    /// Cgroup resources; `None` skips cgroup placement entirely.
    #[serde(default)]
    pub cgroups: Option<CgroupSpec>,
    /// Mount-namespace parameters.
    #[serde(default)]
    pub mounts: MountConfig,
    /// AppArmor profile to apply before exec; empty disables.
    #[serde(default)]
    pub apparmor_profile: String,
    /// SELinux process label to apply before exec; empty disables.
    #[serde(default)]
    pub process_label: String,
    /// Hostname inside the UTS namespace; empty keeps the host's.
    #[serde(default)]
    pub hostname: String,
    /// Environment for the user process, `KEY=value` entries.
    #[serde(default)]
    pub env: Vec<String>,
    /// Make sensitive proc/sys paths read-only inside the container.
    #[serde(default)]
    pub restrict_sys: bool,
    /// Allocate and wire a pseudo-terminal for the user process.
    #[serde(default)]
    pub tty: bool,
}

impl ContainerConfig {
    /// Returns whether the named namespace is enabled.
    #[must_use]
    pub fn namespace_enabled(&self, name: &str) -> bool {
        self.namespaces.get(name).copied().unwrap_or(false)
    }

    /// Returns whether a user namespace with mappings is requested.
    #[must_use]
    pub fn wants_user_namespace(&self) -> bool {
        self.namespace_enabled("NEWUSER")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_enabled_false_for_absent_name() {
        let config = ContainerConfig::default();
        assert!(!config.namespace_enabled("NEWNS"));
    }

    #[test]
    fn namespace_enabled_respects_disabled_entry() {
        let mut config = ContainerConfig::default();
        config.namespaces.insert("NEWNET".into(), false);
        assert!(!config.namespace_enabled("NEWNET"));
        config.namespaces.insert("NEWNET".into(), true);
        assert!(config.namespace_enabled("NEWNET"));
    }

    #[test]
    fn config_roundtrips_through_json() {
        let mut config = ContainerConfig {
            rootfs: "/var/lib/vessel/rootfs/web".into(),
            hostname: "web".into(),
            env: vec!["PATH=/usr/bin:/bin".into()],
            restrict_sys: true,
            ..ContainerConfig::default()
        };
        config.namespaces.insert("NEWNS".into(), true);
        config.namespaces.insert("NEWUTS".into(), true);
        config.uid_mappings.push(IdMap {
            container_id: 0,
            host_id: 1000,
            size: 1,
        });
        config.networks.push(Network {
            type_: "loopback".into(),
            ..Network::default()
        });

        let json = serde_json::to_string(&config).expect("serialize");
        let back: ContainerConfig = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, config);
    }

    #[test]
    fn network_type_field_serializes_as_type() {
        let network = Network {
            type_: "veth".into(),
            bridge: "vessel0".into(),
            ..Network::default()
        };
        let json = serde_json::to_string(&network).expect("serialize");
        assert!(json.contains(r#""type":"veth""#));
    }

    #[test]
    fn minimal_json_fills_defaults() {
        let config: ContainerConfig =
            serde_json::from_str(r#"{"rootfs": "/r"}"#).expect("deserialize");
        assert_eq!(config.rootfs, PathBuf::from("/r"));
        assert!(config.networks.is_empty());
        assert!(config.cgroups.is_none());
        assert!(!config.restrict_sys);
    }
}
