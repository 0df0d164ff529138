//! Unified error types for the Vessel workspace.
//!
//! Setup-time failures in the orchestrators are all expressed through this
//! enum so that a single `terminate` path can report them uniformly. Exit
//! statuses of the user program are never errors — they travel back to the
//! caller as plain integers.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum VesselError {
    /// The container init process could not be started.
    #[error("failed to spawn container init: {reason}")]
    SpawnFailed {
        /// Description of the spawn failure.
        reason: String,
    },

    /// Sync-pipe allocation or I/O failed.
    #[error("sync pipe: {source}")]
    Pipe {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The peer closed its pipe end before the message could be delivered.
    #[error("sync pipe peer is gone")]
    PipeClosed,

    /// Cgroup creation, limit write, or task attachment failed.
    #[error("cgroup {controller}: {message}")]
    CgroupFailed {
        /// Controller the failure occurred in (`cpu`, `memory`, ...).
        controller: String,
        /// Description of the failure.
        message: String,
    },

    /// More UID or GID mapping entries than the kernel accepts.
    #[error("{count} id mappings requested, kernel limit is 5")]
    MappingLimit {
        /// Number of entries that were requested.
        count: usize,
    },

    /// Writing a `/proc/<pid>/{uid,gid}_map` file failed.
    #[error("writing id map {file}: errno {errno}")]
    MapWrite {
        /// Map file that could not be written.
        file: PathBuf,
        /// Raw OS error number.
        errno: i32,
    },

    /// A network strategy failed or an unknown strategy was requested.
    #[error("network {kind}: {message}")]
    NetworkFailed {
        /// Network type string from the configuration.
        kind: String,
        /// Description of the failure.
        message: String,
    },

    /// The persisted state file exists but could not be read or parsed.
    #[error("reading container state {path}: {message}")]
    StateRead {
        /// Path of the state file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The persisted state file could not be written.
    #[error("writing container state {path}: {message}")]
    StateWrite {
        /// Path of the state file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// The child reported a structured init error over the sync pipe.
    #[error("container init failed (kind {kind}): {message}")]
    ChildReported {
        /// Numeric error kind from the child.
        kind: i32,
        /// Message from the child.
        message: String,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A syscall failed in a way no dedicated variant describes.
    #[error("{syscall} failed: errno {errno}")]
    Unexpected {
        /// Name of the failing syscall.
        syscall: &'static str,
        /// Raw OS error number.
        errno: i32,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, VesselError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mapping_limit_display_mentions_count() {
        let err = VesselError::MappingLimit { count: 6 };
        let msg = format!("{err}");
        assert!(msg.contains('6'));
    }

    #[test]
    fn cgroup_failed_display_controller_and_message() {
        let err = VesselError::CgroupFailed {
            controller: "cpu".into(),
            message: "cgroup.procs: permission denied".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("cpu"));
        assert!(msg.contains("permission denied"));
    }

    #[test]
    fn child_reported_display_kind_and_message() {
        let err = VesselError::ChildReported {
            kind: 2,
            message: "pivot_root failed".into(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("kind 2"));
        assert!(msg.contains("pivot_root failed"));
    }

    #[test]
    fn serialization_error_from_serde_json() {
        let serde_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: VesselError = serde_err.into();
        assert!(matches!(err, VesselError::Serialization { .. }));
    }
}
