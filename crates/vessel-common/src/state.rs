//! Runtime state shared between the parent, the child, and join processes.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Network facts recorded by the host-side strategies and consumed by the
/// child-side setup inside the namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkState {
    /// Host-side veth interface name; empty when no veth network exists.
    #[serde(default)]
    pub veth_host: String,
    /// Container-side veth interface name; empty when no veth network exists.
    #[serde(default)]
    pub veth_child: String,
    /// Path to the container's network namespace file.
    #[serde(default)]
    pub ns_path: String,
}

/// Persisted runtime state of a container, written to `state.json` by the
/// parent orchestrator just before the child is unblocked.
///
/// `init_pid` is only meaningful together with `init_start_time`: a PID can
/// be reused, the pair cannot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerState {
    /// Kernel PID of the container's pid-1.
    pub init_pid: i32,
    /// Field 22 of `/proc/<pid>/stat` at spawn time.
    pub init_start_time: String,
    /// Cgroup subsystem → absolute cgroupfs path used for this container.
    #[serde(default)]
    pub cgroup_paths: BTreeMap<String, PathBuf>,
    /// Network facts for the child-side setup and for diagnostics.
    #[serde(default)]
    pub network_state: NetworkState,
}

/// The single record the parent sends through the sync pipe to unblock the
/// child: the container specification plus the network facts gathered
/// during host-side setup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapPayload {
    /// Full container specification for the in-namespace setup.
    pub config: crate::config::ContainerConfig,
    /// Network facts recorded by the host-side strategies.
    #[serde(default)]
    pub network_state: NetworkState,
}

/// Structured error a failing child sends over the sync pipe before exiting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitError {
    /// Numeric error kind; see [`InitErrorKind`].
    pub kind: i32,
    /// Human-readable message.
    pub message: String,
}

/// Well-known [`InitError::kind`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum InitErrorKind {
    /// Failure before the bootstrap payload arrived.
    Bootstrap = 1,
    /// Failure during in-namespace finalization.
    Finalize = 2,
    /// `execve` of the user command failed.
    Exec = 3,
}

impl InitError {
    /// Creates an init error with the given kind.
    #[must_use]
    pub fn new(kind: InitErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind: kind as i32,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_state_default_is_zero_valued() {
        let state = NetworkState::default();
        assert!(state.veth_host.is_empty());
        assert!(state.veth_child.is_empty());
        assert!(state.ns_path.is_empty());
    }

    #[test]
    fn container_state_roundtrips_through_json() {
        let mut state = ContainerState {
            init_pid: 4321,
            init_start_time: "12345678".into(),
            ..ContainerState::default()
        };
        state
            .cgroup_paths
            .insert("cpu".into(), "/sys/fs/cgroup/cpu/vessel/web".into());
        state.network_state.veth_host = "veth1234".into();

        let json = serde_json::to_string(&state).expect("serialize");
        let back: ContainerState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, state);
    }

    #[test]
    fn init_error_kind_maps_to_stable_numbers() {
        let err = InitError::new(InitErrorKind::Finalize, "pivot_root failed");
        assert_eq!(err.kind, 2);
        assert_eq!(err.message, "pivot_root failed");
    }
}
