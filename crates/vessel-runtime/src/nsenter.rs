//! Pre-main nsenter hook.
//!
//! `setns(CLONE_NEWPID)` only takes effect for children, and several of the
//! joins require a single-threaded caller, so the join orchestrator
//! re-executes this binary with argv[0] rewritten to `nsenter-<action>`.
//! [`maybe_enter`] must therefore be the very first call in `main` —
//! before the tracing subscriber, before clap, before anything that could
//! spawn a thread.

use std::path::Path;

use nix::unistd::{fork, ForkResult};
use vessel_common::constants::{CHILD_PIPE_FD, NSENTER_ARGV0_PREFIX};
use vessel_common::error::{Result, VesselError};
use vessel_common::state::BootstrapPayload;
use vessel_core::namespace;
use vessel_core::sync::SyncPipe;

use crate::{process, setup};

/// Detects the nsenter-helper invocation from argv[0] and, when detected,
/// runs the full join sequence and exits. Returns quietly for every other
/// invocation.
pub fn maybe_enter() {
    let args: Vec<String> = std::env::args().collect();
    let Some(arg0) = args.first() else { return };
    let base = Path::new(arg0)
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    if !base.starts_with(NSENTER_ARGV0_PREFIX) {
        return;
    }

    let code = match run_helper(&args) {
        Ok(code) => code,
        Err(err) => {
            // No tracing subscriber exists this early; stderr is all we have.
            eprintln!("vsl: nsenter: {err}");
            1
        }
    };
    std::process::exit(code);
}

fn run_helper(args: &[String]) -> Result<i32> {
    let helper = HelperArgs::parse(&args[1..])?;

    namespace::join(helper.nspid, &namespace::NSENTER_JOIN_ORDER)?;

    // SAFETY: the parent orchestrator handed us this end at the well-known
    // descriptor and holds no other copy.
    let mut pipe = unsafe { SyncPipe::from_raw_fd(CHILD_PIPE_FD) };
    let payload: BootstrapPayload = pipe.recv()?.ok_or_else(|| VesselError::Config {
        message: "no bootstrap payload received".into(),
    })?;
    pipe.close();

    // The joined PID namespace applies to children only.
    // SAFETY: still single-threaded; nothing ran before this hook.
    match unsafe { fork() }.map_err(|errno| VesselError::Unexpected {
        syscall: "fork",
        errno: errno as i32,
    })? {
        ForkResult::Parent { child } => process::wait(child),
        ForkResult::Child => {
            let result = helper
                .attach_console()
                .and_then(|()| setup::finalize_setns(&payload.config, &helper.user_args));
            // Only reachable on error: success replaced this process.
            let err = match result {
                Err(err) => err,
                Ok(never) => match never {},
            };
            eprintln!("vsl: nsenter: {err}");
            std::process::exit(1);
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
struct HelperArgs {
    nspid: i32,
    console: String,
    user_args: Vec<String>,
}

impl HelperArgs {
    fn parse(args: &[String]) -> Result<Self> {
        let invalid = |message: String| VesselError::Config { message };

        let mut nspid = 0;
        let mut console = String::new();
        let mut user_args = Vec::new();
        let mut iter = args.iter();
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--nspid" => {
                    let value = iter
                        .next()
                        .ok_or_else(|| invalid("--nspid needs a value".into()))?;
                    nspid = value
                        .parse()
                        .map_err(|_| invalid(format!("--nspid is not a pid: {value}")))?;
                }
                "--console" => {
                    console = iter
                        .next()
                        .ok_or_else(|| invalid("--console needs a value".into()))?
                        .clone();
                }
                "--" => {
                    user_args = iter.cloned().collect();
                    break;
                }
                other => return Err(invalid(format!("unknown nsenter argument: {other}"))),
            }
        }

        if nspid <= 0 {
            return Err(invalid("cannot enter namespaces without a valid --nspid".into()));
        }
        if user_args.is_empty() {
            return Err(invalid("no command after --".into()));
        }
        Ok(Self {
            nspid,
            console,
            user_args,
        })
    }

    // Wires the pseudo-terminal slave up as the controlling terminal and
    // as stdio, the way a login shell would see it.
    fn attach_console(&self) -> Result<()> {
        if self.console.is_empty() {
            return Ok(());
        }
        let unexpected = |syscall: &'static str| {
            move |errno: nix::errno::Errno| VesselError::Unexpected {
                syscall,
                errno: errno as i32,
            }
        };

        let console = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.console)
            .map_err(|err| VesselError::Io {
                path: self.console.clone().into(),
                source: err,
            })?;
        nix::unistd::setsid().map_err(unexpected("setsid"))?;
        for target in 0..=2 {
            nix::unistd::dup2(std::os::fd::AsRawFd::as_raw_fd(&console), target)
                .map_err(unexpected("dup2"))?;
        }
        // SAFETY: fd 0 is the console we just dup'd; TIOCSCTTY only reads it.
        if unsafe { libc::ioctl(0, libc::TIOCSCTTY, 0) } < 0 {
            return Err(VesselError::Unexpected {
                syscall: "ioctl(TIOCSCTTY)",
                errno: std::io::Error::last_os_error().raw_os_error().unwrap_or(0),
            });
        }
        Ok(())
    }
}
