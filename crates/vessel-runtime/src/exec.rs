//! First-boot orchestration.
//!
//! `exec` runs the whole parent-side protocol: clone the init into fresh
//! namespaces, establish cgroups, UID/GID maps, and networking from the
//! outside, persist state, release the child through the sync pipe, and
//! wait for the user command. The child stays parked on the pipe until
//! every outside-visible resource exists, so ordering is enforced by
//! construction rather than by timing.

use std::path::{Path, PathBuf};

use nix::unistd::Pid;
use vessel_common::config::ContainerConfig;
use vessel_common::constants::MAX_ID_MAPPINGS;
use vessel_common::error::{Result, VesselError};
use vessel_common::state::{BootstrapPayload, ContainerState, InitError, NetworkState};
use vessel_core::idmap::IdMapWriter;
use vessel_core::sync::SyncPipe;
use vessel_core::{cgroup, network};

use crate::{process, state};

/// Runs a container to completion and returns the user command's exit code.
///
/// `console` is the pseudo-terminal slave path to hand the child (empty for
/// none); `start_cb` fires once the child is released, before the final
/// wait. A nonzero exit of the user program is a normal `Ok`; errors mean
/// the container never ran, and by then the child is reaped and cgroups
/// and state are cleaned up.
///
/// # Errors
///
/// Returns the first setup failure, or the child's [`InitError`] as
/// [`VesselError::ChildReported`].
pub fn exec(
    config: &ContainerConfig,
    console: &str,
    data_path: &Path,
    args: &[String],
    start_cb: Option<&dyn Fn()>,
) -> Result<i32> {
    // Mapping tables are checked before anything exists to clean up.
    for table in [&config.uid_mappings, &config.gid_mappings] {
        if table.len() > MAX_ID_MAPPINGS {
            return Err(VesselError::MappingLimit { count: table.len() });
        }
    }

    let (mut parent_pipe, mut child_pipe) = SyncPipe::new()?;
    let command = process::ChildCommand::first_boot(config, console, data_path, args)?;

    let child_fd = child_pipe.as_raw_fd().ok_or(VesselError::PipeClosed)?;
    let pid = match command.spawn(child_fd) {
        Ok(pid) => pid,
        Err(err) => {
            child_pipe.close();
            return Err(err);
        }
    };
    // The child holds the only live copy of its end now.
    child_pipe.close();
    tracing::info!(pid = pid.as_raw(), "container init spawned");

    let mut guard = ExecGuard::new(pid, data_path);

    let init_start_time = process::start_time(pid.as_raw())?;

    // Cgroups first: nothing the child ever forks may escape them.
    guard.cgroup_paths = cgroup::apply(config.cgroups.as_ref(), pid.as_raw())?;

    if config.wants_user_namespace()
        && !(config.uid_mappings.is_empty() && config.gid_mappings.is_empty())
    {
        IdMapWriter::default().write_maps(
            pid.as_raw(),
            &config.uid_mappings,
            &config.gid_mappings,
        )?;
    }

    let mut network_state = NetworkState::default();
    network::initialize(&config.networks, pid.as_raw(), &mut network_state)?;

    let container_state = ContainerState {
        init_pid: pid.as_raw(),
        init_start_time,
        cgroup_paths: guard.cgroup_paths.clone(),
        network_state: network_state.clone(),
    };
    state::save(data_path, &container_state)?;
    guard.state_saved = true;

    // Everything outside-visible exists; release the child.
    let payload = BootstrapPayload {
        config: config.clone(),
        network_state,
    };
    parent_pipe.send(&payload)?;
    parent_pipe.half_close_write()?;

    // EOF here is the success signal: the child closed its end on execve.
    if let Some(report) = parent_pipe.recv::<InitError>()? {
        return Err(VesselError::ChildReported {
            kind: report.kind,
            message: report.message,
        });
    }

    if let Some(cb) = start_cb {
        cb();
    }

    let code = guard.wait()?;
    tracing::info!(pid = pid.as_raw(), code, "container exited");
    Ok(code)
}

/// Cleanup that must run on every exit path: reap the child, remove its
/// cgroups, delete the state file. An early `?` drops the guard with the
/// child unreaped, which is exactly the kill-and-wait `terminate` case.
struct ExecGuard {
    pid: Pid,
    data_path: PathBuf,
    cgroup_paths: cgroup::CgroupPaths,
    state_saved: bool,
    reaped: bool,
}

impl ExecGuard {
    fn new(pid: Pid, data_path: &Path) -> Self {
        Self {
            pid,
            data_path: data_path.to_path_buf(),
            cgroup_paths: cgroup::CgroupPaths::new(),
            state_saved: false,
            reaped: false,
        }
    }

    fn wait(&mut self) -> Result<i32> {
        let code = process::wait(self.pid);
        self.reaped = true;
        code
    }
}

impl Drop for ExecGuard {
    fn drop(&mut self) {
        if !self.reaped {
            tracing::warn!(pid = self.pid.as_raw(), "terminating container init");
            process::kill(self.pid);
            let _ = process::wait(self.pid);
        }
        cgroup::remove(&self.cgroup_paths);
        if self.state_saved {
            if let Err(err) = state::delete(&self.data_path) {
                tracing::warn!(error = %err, "state cleanup failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vessel_common::config::IdMap;

    fn mappings(count: usize) -> Vec<IdMap> {
        (0..count)
            .map(|i| IdMap {
                container_id: u32::try_from(i).expect("small"),
                host_id: 1000,
                size: 1,
            })
            .collect()
    }

    #[test]
    fn six_uid_mappings_fail_before_any_spawn() {
        let config = ContainerConfig {
            rootfs: "/".into(),
            uid_mappings: mappings(6),
            ..ContainerConfig::default()
        };
        let dir = tempfile::tempdir().expect("tempdir");

        let err = exec(&config, "", dir.path(), &["/bin/true".into()], None).unwrap_err();
        assert!(matches!(err, VesselError::MappingLimit { count: 6 }));
        // Nothing was created: no state file, no cgroup entry.
        assert!(state::load(dir.path()).expect("load").is_none());
    }

    #[test]
    fn six_gid_mappings_fail_before_any_spawn() {
        let config = ContainerConfig {
            rootfs: "/".into(),
            gid_mappings: mappings(6),
            ..ContainerConfig::default()
        };
        let dir = tempfile::tempdir().expect("tempdir");

        let err = exec(&config, "", dir.path(), &["/bin/true".into()], None).unwrap_err();
        assert!(matches!(err, VesselError::MappingLimit { count: 6 }));
    }
}
