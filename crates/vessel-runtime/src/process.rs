//! Child process construction and reaping.
//!
//! The container init is this same binary re-executed with an `init`
//! argument, cloned directly with the namespace flags so the new PID
//! namespace applies to the init itself. Everything the callback does
//! between `clone(2)` and `execve(2)` is plain syscalls on data prepared
//! beforehand.

use std::ffi::CString;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::sched::CloneFlags;
use nix::sys::signal::{self, Signal};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use vessel_common::config::ContainerConfig;
use vessel_common::constants::{CHILD_PIPE_FD, ENV_CONSOLE, ENV_DATA_PATH, ENV_PIPE};
use vessel_common::error::{Result, VesselError};
use vessel_core::namespace;

const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Exit status when the child fails before reaching `execve`.
const CHILD_SETUP_EXIT: isize = 127;

/// A fully prepared child invocation.
///
/// All strings are converted up front so the post-clone callback performs
/// no allocation, only `dup2`/`prctl`/`chdir`/`execve`.
pub struct ChildCommand {
    program: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    cwd: Option<PathBuf>,
    flags: CloneFlags,
    parent_death_signal: bool,
}

impl ChildCommand {
    /// Builds the first-boot invocation: `<self> init -- <args…>`, run in
    /// the container's rootfs with the configured namespace flags and the
    /// boot parameters in its environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the current executable cannot be resolved or an
    /// argument contains an interior NUL byte.
    pub fn first_boot(
        config: &ContainerConfig,
        console: &str,
        data_path: &Path,
        args: &[String],
    ) -> Result<Self> {
        let self_exe = std::env::current_exe().map_err(|err| VesselError::SpawnFailed {
            reason: format!("resolving own binary: {err}"),
        })?;

        let mut argv = vec![
            os_cstring(self_exe.as_os_str())?,
            cstring("init")?,
            cstring("--")?,
        ];
        for arg in args {
            argv.push(cstring(arg)?);
        }

        let overrides = [
            (ENV_CONSOLE, console.to_string()),
            (ENV_PIPE, CHILD_PIPE_FD.to_string()),
            (ENV_DATA_PATH, data_path.display().to_string()),
        ];
        Ok(Self {
            program: os_cstring(self_exe.as_os_str())?,
            argv,
            envp: inherited_env(&overrides)?,
            cwd: Some(config.rootfs.clone()),
            flags: namespace::clone_flags(&config.namespaces),
            parent_death_signal: true,
        })
    }

    /// Builds the nsenter-helper invocation used by the join orchestrator:
    /// argv[0] is rewritten to `nsenter-<action>` so the helper path in the
    /// binary detects itself before anything else runs.
    ///
    /// # Errors
    ///
    /// Returns an error if an argument contains an interior NUL byte.
    pub fn nsenter(
        init_path: &Path,
        action: &str,
        nspid: i32,
        console: &str,
        user_args: &[String],
    ) -> Result<Self> {
        let mut argv = vec![
            cstring(&format!("nsenter-{action}"))?,
            cstring("--nspid")?,
            cstring(&nspid.to_string())?,
        ];
        if !console.is_empty() {
            argv.push(cstring("--console")?);
            argv.push(cstring(console)?);
        }
        argv.push(cstring("--")?);
        for arg in user_args {
            argv.push(cstring(arg)?);
        }

        Ok(Self {
            program: os_cstring(init_path.as_os_str())?,
            argv,
            envp: inherited_env(&[])?,
            cwd: None,
            flags: CloneFlags::empty(),
            parent_death_signal: false,
        })
    }

    /// Clones the child, handing it `pipe_fd` as the well-known sync-pipe
    /// descriptor, and returns its PID.
    ///
    /// # Errors
    ///
    /// Returns [`VesselError::SpawnFailed`] if the clone itself fails;
    /// failures inside the child surface as exit status 127.
    pub fn spawn(&self, pipe_fd: RawFd) -> Result<Pid> {
        let mut stack = vec![0u8; CHILD_STACK_SIZE];
        // SAFETY: the callback only runs in the cloned child and touches
        // pre-built CStrings plus raw syscalls; the parent is single-threaded
        // around this call.
        let pid = unsafe {
            nix::sched::clone(
                Box::new(|| self.child_entry(pipe_fd)),
                &mut stack,
                self.flags,
                Some(libc::SIGCHLD),
            )
        }
        .map_err(|errno| VesselError::SpawnFailed {
            reason: format!("clone: {errno}"),
        })?;
        tracing::debug!(pid = pid.as_raw(), flags = ?self.flags, "child spawned");
        Ok(pid)
    }

    fn child_entry(&self, pipe_fd: RawFd) -> isize {
        if pipe_fd == CHILD_PIPE_FD {
            // Already at the right number; just undo close-on-exec.
            // SAFETY: pipe_fd is the inherited socketpair end.
            if unsafe { libc::fcntl(pipe_fd, libc::F_SETFD, 0) } < 0 {
                return CHILD_SETUP_EXIT;
            }
        } else {
            // dup2 clears close-on-exec on the duplicate.
            // SAFETY: both descriptors are owned by this process.
            if unsafe { libc::dup2(pipe_fd, CHILD_PIPE_FD) } < 0 {
                return CHILD_SETUP_EXIT;
            }
        }

        if self.parent_death_signal
            && nix::sys::prctl::set_pdeathsig(Signal::SIGKILL).is_err()
        {
            return CHILD_SETUP_EXIT;
        }
        if let Some(cwd) = &self.cwd {
            // Best effort: a missing rootfs is caught by the finalizer,
            // which can still report the failure over the pipe.
            let _ = nix::unistd::chdir(cwd.as_path());
        }

        let _ = nix::unistd::execve(&self.program, &self.argv, &self.envp);
        CHILD_SETUP_EXIT
    }
}

/// Reads a process start time from field 22 of `/proc/<pid>/stat`.
///
/// Paired with the PID this disambiguates PID reuse: a recycled PID gets a
/// different start time.
///
/// # Errors
///
/// Returns an error if the stat file cannot be read or parsed.
pub fn start_time(pid: i32) -> Result<String> {
    let path = PathBuf::from(format!("/proc/{pid}/stat"));
    let content = std::fs::read_to_string(&path).map_err(|err| VesselError::Io {
        path: path.clone(),
        source: err,
    })?;
    parse_start_time(&content).ok_or_else(|| VesselError::Io {
        path,
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, "malformed stat line"),
    })
}

// The comm field may contain spaces and parentheses, so fields are counted
// from the last ')': state is field 3, start time field 22.
fn parse_start_time(stat: &str) -> Option<String> {
    let after_comm = &stat[stat.rfind(')')? + 1..];
    after_comm
        .split_ascii_whitespace()
        .nth(19)
        .map(ToString::to_string)
}

/// Waits for `pid` to terminate and maps the status to an exit code;
/// signal deaths use the shell convention of 128 plus the signal number.
///
/// # Errors
///
/// Returns an error if `waitpid` fails for a reason other than EINTR.
pub fn wait(pid: Pid) -> Result<i32> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => return Ok(code),
            Ok(WaitStatus::Signaled(_, sig, _)) => return Ok(128 + sig as i32),
            Ok(_) => continue,
            Err(Errno::EINTR) => continue,
            Err(errno) => {
                return Err(VesselError::Unexpected {
                    syscall: "waitpid",
                    errno: errno as i32,
                })
            }
        }
    }
}

/// Sends SIGKILL to `pid`; a process that is already gone is fine.
pub fn kill(pid: Pid) {
    if let Err(errno) = signal::kill(pid, Signal::SIGKILL) {
        if errno != Errno::ESRCH {
            tracing::warn!(pid = pid.as_raw(), %errno, "kill failed");
        }
    }
}

fn inherited_env(overrides: &[(&str, String)]) -> Result<Vec<CString>> {
    let mut envp = Vec::new();
    for (key, value) in std::env::vars_os() {
        if overrides.iter().any(|(name, _)| key.to_str() == Some(*name)) {
            continue;
        }
        let mut entry = key;
        entry.push("=");
        entry.push(&value);
        envp.push(os_cstring(&entry)?);
    }
    for (key, value) in overrides {
        envp.push(cstring(&format!("{key}={value}"))?);
    }
    Ok(envp)
}

fn cstring(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| VesselError::Config {
        message: format!("argument contains NUL byte: {value:?}"),
    })
}

fn os_cstring(value: &std::ffi::OsStr) -> Result<CString> {
    use std::os::unix::ffi::OsStrExt;
    CString::new(value.as_bytes()).map_err(|_| VesselError::Config {
        message: format!("argument contains NUL byte: {value:?}"),
    })
}
