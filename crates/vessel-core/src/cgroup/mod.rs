//! Cgroup placement for container processes.
//!
//! The applier puts the freshly cloned init into per-controller cgroups
//! before the child is unblocked, so no descendant can escape the
//! accounting. Driver selection mirrors the host: a systemd-styled layout
//! when a systemd instance is running, the plain cgroupfs layout otherwise.

pub mod fs;
pub mod systemd;

use std::collections::BTreeMap;
use std::path::PathBuf;

use vessel_common::config::CgroupSpec;
use vessel_common::error::{Result, VesselError};

/// Subsystem name → absolute cgroupfs path map returned by [`apply`].
pub type CgroupPaths = BTreeMap<String, PathBuf>;

/// A cgroup driver: creates hierarchies, writes limits, attaches the PID.
pub trait CgroupDriver {
    /// Places `pid` into cgroups per `spec` and returns the paths used.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::CgroupFailed`] naming the failing controller.
    fn apply(&self, spec: &CgroupSpec, pid: i32) -> Result<CgroupPaths>;
}

/// Places `pid` into the configured cgroups.
///
/// `None` means the container runs without resource accounting and yields
/// an empty path map.
///
/// # Errors
///
/// Returns an error if any controller cannot be set up or joined.
pub fn apply(spec: Option<&CgroupSpec>, pid: i32) -> Result<CgroupPaths> {
    let Some(spec) = spec else {
        return Ok(CgroupPaths::new());
    };
    let paths = if systemd::is_running() {
        systemd::SystemdDriver::default().apply(spec, pid)?
    } else {
        fs::FsDriver::default().apply(spec, pid)?
    };
    tracing::info!(pid, controllers = paths.len(), "cgroups applied");
    Ok(paths)
}

/// Attaches `pid` to every previously recorded cgroup path.
///
/// Used by the join orchestrator so an entered process lands in the same
/// accounting as the container's init.
///
/// # Errors
///
/// Returns [`VesselError::CgroupFailed`] on the first path that cannot be
/// joined, including paths that no longer exist.
pub fn enter(paths: &CgroupPaths, pid: i32) -> Result<()> {
    for (subsystem, path) in paths {
        let procs = path.join("cgroup.procs");
        std::fs::write(&procs, pid.to_string()).map_err(|err| VesselError::CgroupFailed {
            controller: subsystem.clone(),
            message: format!("joining {}: {err}", procs.display()),
        })?;
        tracing::debug!(pid, subsystem, "entered cgroup");
    }
    Ok(())
}

/// Best-effort removal of every path in the map.
///
/// A path that is already gone is fine; anything else is logged and
/// otherwise ignored, matching the cleanup-on-exit contract.
pub fn remove(paths: &CgroupPaths) {
    for (subsystem, path) in paths {
        match std::fs::remove_dir(path) {
            Ok(()) => tracing::debug!(subsystem, path = %path.display(), "cgroup removed"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(subsystem, path = %path.display(), error = %err, "cgroup removal failed");
            }
        }
    }
}
