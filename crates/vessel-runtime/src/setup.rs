//! In-namespace finalization.
//!
//! Everything that must happen between "the parent released us" and
//! "`execve` the user command": environment replacement, network
//! interface bring-up, the mount namespace switch, kernel-interface
//! masking, hostname, and LSM labels. Failures here are reported back
//! over the sync pipe as a structured [`InitError`]; `execve` is never
//! reached on a failed setup.

use std::convert::Infallible;
use std::ffi::CString;
use std::os::fd::RawFd;
use std::path::PathBuf;

use nix::unistd::{setresgid, setresuid, sethostname, Gid, Uid};
use vessel_common::config::ContainerConfig;
use vessel_common::constants::{ENV_CONSOLE, ENV_DATA_PATH, ENV_PIPE};
use vessel_common::error::{Result, VesselError};
use vessel_common::state::NetworkState;
use vessel_core::{idmap, label, mounts, network, restrict};

use crate::state;

/// Boot parameters the re-exec'd child decodes from its environment.
///
/// The environment is the one channel that survives `execve` transparently;
/// this struct is decoded once at entry so the rest of the child never
/// touches `std::env` for configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootParams {
    /// Pseudo-terminal slave path, empty for none.
    pub console: String,
    /// Inherited sync-pipe descriptor, when one was handed down.
    pub pipe: Option<RawFd>,
    /// Directory holding `state.json`.
    pub data_path: PathBuf,
}

impl BootParams {
    /// Decodes the boot parameters from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the pipe variable is present but not a number.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pipe = match lookup(ENV_PIPE) {
            None => None,
            Some(raw) => Some(raw.parse::<RawFd>().map_err(|_| VesselError::Config {
                message: format!("pipe fd is not a number: {raw}"),
            })?),
        };
        let data_path = lookup(ENV_DATA_PATH)
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        Ok(Self {
            console: lookup(ENV_CONSOLE).unwrap_or_default(),
            pipe,
            data_path,
        })
    }
}

/// First-boot finalization, run by the cloned init after the bootstrap
/// payload arrives.
///
/// `network_state` comes from the bootstrap payload; when it is
/// zero-valued the persisted state (if any) is consulted instead.
/// `restrict_paths` is the kernel-interface mask set for this variant —
/// joined setups also mask `sys`, first boots do not.
///
/// # Errors
///
/// Returns the first failing step; nothing is rolled back, the parent
/// tears the container down on report.
pub fn setup_container(
    config: &ContainerConfig,
    boot: &BootParams,
    network_state: &NetworkState,
    restrict_paths: &[&str],
) -> Result<()> {
    let rootfs = config.rootfs.canonicalize().map_err(|err| VesselError::Io {
        path: config.rootfs.clone(),
        source: err,
    })?;

    replace_environment(&config.env);

    let network_state = if *network_state == NetworkState::default() {
        state::load(&boot.data_path)?
            .map(|loaded| loaded.network_state)
            .unwrap_or_default()
    } else {
        network_state.clone()
    };
    network::setup_network(config, &network_state)?;
    network::setup_route(config)?;

    label::init();

    // Past the pipe barrier the parent has written our ID maps, so the
    // configured root credentials inside the user namespace are valid now.
    if config.wants_user_namespace() {
        become_namespace_root()?;
    }
    let root_uid = idmap::host_root_uid(config)?;

    if config.namespace_enabled("NEWNS") {
        mounts::init_mount_namespace(&rootfs, &boot.console, root_uid, &config.mounts)?;
    }
    if config.restrict_sys {
        restrict::restrict(restrict_paths)?;
    }
    if !config.hostname.is_empty() {
        sethostname(&config.hostname).map_err(|errno| VesselError::Unexpected {
            syscall: "sethostname",
            errno: errno as i32,
        })?;
    }

    label::apply_apparmor_profile(&config.apparmor_profile)?;
    label::set_process_label(&config.process_label)?;
    Ok(())
}

/// Finalization for a process that joined existing namespaces via setns:
/// only environment and labels apply — mounts and networking already
/// belong to the container — then the user command replaces this process.
///
/// # Errors
///
/// Returns an error if a label cannot be applied or `execve` fails;
/// success never returns.
pub fn finalize_setns(config: &ContainerConfig, args: &[String]) -> Result<Infallible> {
    replace_environment(&config.env);
    label::apply_apparmor_profile(&config.apparmor_profile)?;
    label::set_process_label(&config.process_label)?;
    exec_user_command(args)
}

/// Replaces this process's environment with the user command's environment
/// as `execve` will see it.
pub fn exec_user_command(args: &[String]) -> Result<Infallible> {
    let first = args.first().ok_or_else(|| VesselError::Config {
        message: "no command to execute".into(),
    })?;
    let program = cstring(first)?;
    let argv: Vec<CString> = args.iter().map(|arg| cstring(arg)).collect::<Result<_>>()?;
    nix::unistd::execvp(&program, &argv).map_err(|errno| VesselError::Unexpected {
        syscall: "execvp",
        errno: errno as i32,
    })
}

fn become_namespace_root() -> Result<()> {
    let unexpected = |syscall: &'static str| {
        move |errno: nix::errno::Errno| VesselError::Unexpected {
            syscall,
            errno: errno as i32,
        }
    };
    setresgid(Gid::from_raw(0), Gid::from_raw(0), Gid::from_raw(0))
        .map_err(unexpected("setresgid"))?;
    setresuid(Uid::from_raw(0), Uid::from_raw(0), Uid::from_raw(0))
        .map_err(unexpected("setresuid"))
}

// Wholesale replacement, not merging: the container must not see stray
// host variables.
fn replace_environment(env: &[String]) {
    let current: Vec<_> = std::env::vars_os().map(|(key, _)| key).collect();
    for key in current {
        std::env::remove_var(key);
    }
    for entry in env {
        match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => std::env::set_var(key, value),
            _ => tracing::warn!(entry, "skipping malformed environment entry"),
        }
    }
}

fn cstring(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| VesselError::Config {
        message: format!("argument contains NUL byte: {value:?}"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup<'a>(entries: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            entries
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_string())
        }
    }

    #[test]
    fn boot_params_decode_all_fields() {
        let params = BootParams::from_lookup(lookup(&[
            ("console", "/dev/pts/4"),
            ("pipe", "3"),
            ("data_path", "/var/lib/vessel/web"),
        ]))
        .expect("params");

        assert_eq!(params.console, "/dev/pts/4");
        assert_eq!(params.pipe, Some(3));
        assert_eq!(params.data_path, PathBuf::from("/var/lib/vessel/web"));
    }

    #[test]
    fn boot_params_tolerate_missing_console_and_pipe() {
        let params =
            BootParams::from_lookup(lookup(&[("data_path", "/tmp/c1")])).expect("params");
        assert_eq!(params.console, "");
        assert_eq!(params.pipe, None);
    }

    #[test]
    fn boot_params_default_data_path_is_cwd() {
        let params = BootParams::from_lookup(lookup(&[])).expect("params");
        assert_eq!(params.data_path, PathBuf::from("."));
    }

    #[test]
    fn boot_params_reject_non_numeric_pipe() {
        let err = BootParams::from_lookup(lookup(&[("pipe", "three")])).unwrap_err();
        assert!(matches!(err, VesselError::Config { .. }));
    }

    #[test]
    fn exec_user_command_requires_a_command() {
        let err = exec_user_command(&[]).unwrap_err();
        assert!(matches!(err, VesselError::Config { .. }));
    }
}
