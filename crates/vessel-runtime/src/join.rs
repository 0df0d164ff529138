//! Join orchestration: run an additional process inside a live container.
//!
//! The host binary is re-executed with argv[0] rewritten to
//! `nsenter-<action>`, which the pre-main hook recognizes and uses to call
//! `setns(2)` while the process is still single-threaded. The parent side
//! here only has to enter the recorded cgroups and ship the configuration
//! down the pipe.

use std::path::{Path, PathBuf};

use nix::unistd::Pid;
use vessel_common::config::ContainerConfig;
use vessel_common::error::{Result, VesselError};
use vessel_common::state::{BootstrapPayload, ContainerState};
use vessel_core::cgroup;
use vessel_core::sync::SyncPipe;

use crate::process;

/// Attaches a new process running `user_args` to the container described
/// by `state` and returns its exit code.
///
/// `init_path` names the binary to re-execute (a bare name is resolved on
/// PATH); `action` tags the helper's argv[0]; `start_cb` receives the
/// helper's PID once setup is done.
///
/// # Errors
///
/// Returns an error if the helper cannot be spawned, the container's
/// cgroups cannot be entered, or the pipe handoff fails.
pub fn exec_in(
    config: &ContainerConfig,
    state: &ContainerState,
    user_args: &[String],
    init_path: &str,
    action: &str,
    console: &str,
    start_cb: Option<&dyn Fn(i32)>,
) -> Result<i32> {
    let init_path = resolve_init_path(init_path)?;
    let command = process::ChildCommand::nsenter(
        &init_path,
        action,
        state.init_pid,
        console,
        user_args,
    )?;

    let (mut parent_pipe, mut child_pipe) = SyncPipe::new()?;
    let child_fd = child_pipe.as_raw_fd().ok_or(VesselError::PipeClosed)?;
    let pid = match command.spawn(child_fd) {
        Ok(pid) => pid,
        Err(err) => {
            child_pipe.close();
            return Err(err);
        }
    };
    child_pipe.close();
    tracing::info!(pid = pid.as_raw(), target = state.init_pid, "nsenter helper spawned");

    let mut guard = JoinGuard { pid, reaped: false };

    // Same accounting as the container's init, before the helper runs
    // anything.
    cgroup::enter(&state.cgroup_paths, pid.as_raw())?;

    let payload = BootstrapPayload {
        config: config.clone(),
        network_state: state.network_state.clone(),
    };
    parent_pipe.send(&payload)?;
    parent_pipe.half_close_write()?;

    if let Some(cb) = start_cb {
        cb(pid.as_raw());
    }

    let code = guard.wait()?;
    tracing::info!(pid = pid.as_raw(), code, "joined process exited");
    Ok(code)
}

fn resolve_init_path(init_path: &str) -> Result<PathBuf> {
    let path = Path::new(init_path);
    if path.components().count() > 1 {
        return Ok(path.to_path_buf());
    }
    which::which(init_path).map_err(|err| VesselError::SpawnFailed {
        reason: format!("resolving {init_path} on PATH: {err}"),
    })
}

struct JoinGuard {
    pid: Pid,
    reaped: bool,
}

impl JoinGuard {
    fn wait(&mut self) -> Result<i32> {
        let code = process::wait(self.pid);
        self.reaped = true;
        code
    }
}

impl Drop for JoinGuard {
    fn drop(&mut self) {
        if !self.reaped {
            tracing::warn!(pid = self.pid.as_raw(), "terminating nsenter helper");
            process::kill(self.pid);
            let _ = process::wait(self.pid);
        }
    }
}
