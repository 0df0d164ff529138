//! `vsl init` — the container's pid-1 entry point after clone.
//!
//! Runs inside the fresh namespaces with the sync pipe inherited at a
//! well-known descriptor. The first pipe read doubles as the barrier: it
//! blocks until the parent has finished cgroups, ID maps, networking, and
//! state, then delivers the bootstrap payload. Failures are reported back
//! as one structured record before exiting.

use clap::Args;
use vessel_common::error::VesselError;
use vessel_common::state::{BootstrapPayload, InitError, InitErrorKind};
use vessel_core::restrict::FIRST_BOOT_PATHS;
use vessel_core::sync::SyncPipe;
use vessel_runtime::setup::{self, BootParams};

/// Arguments for the hidden `init` command.
#[derive(Args, Debug)]
pub struct InitArgs {
    /// User command and arguments, as passed by the parent.
    #[arg(last = true, required = true)]
    pub args: Vec<String>,
}

/// Executes the `init` command. Does not return on success — the user
/// command replaces this process.
///
/// # Errors
///
/// Returns an error after reporting it to the parent over the sync pipe.
pub fn execute(args: InitArgs) -> anyhow::Result<()> {
    let boot = BootParams::from_env()?;
    let pipe_fd = boot
        .pipe
        .ok_or_else(|| anyhow::anyhow!("init invoked without an inherited pipe"))?;
    // SAFETY: the parent handed this descriptor down for us alone.
    let mut pipe = unsafe { SyncPipe::from_raw_fd(pipe_fd) };

    // Barrier: blocks until the parent finished all external setup.
    let payload: BootstrapPayload = match pipe.recv() {
        Ok(Some(payload)) => payload,
        Ok(None) => {
            return Err(report(
                &mut pipe,
                InitErrorKind::Bootstrap,
                "parent closed the pipe before sending a bootstrap payload".into(),
            ));
        }
        Err(err) => {
            return Err(report(&mut pipe, InitErrorKind::Bootstrap, err.to_string()));
        }
    };

    if let Err(err) = setup::setup_container(
        &payload.config,
        &boot,
        &payload.network_state,
        &FIRST_BOOT_PATHS,
    ) {
        return Err(report(&mut pipe, InitErrorKind::Finalize, err.to_string()));
    }

    // Re-arm close-on-exec: a successful execve closes our pipe end and the
    // parent reads that EOF as success, while an execve failure leaves the
    // pipe open for the error report below.
    // SAFETY: pipe_fd is still the inherited pipe end.
    unsafe { libc::fcntl(pipe_fd, libc::F_SETFD, libc::FD_CLOEXEC) };

    let err = match setup::exec_user_command(&args.args) {
        Err(err) => err,
        Ok(never) => match never {},
    };
    Err(report(&mut pipe, InitErrorKind::Exec, err.to_string()))
}

fn report(pipe: &mut SyncPipe, kind: InitErrorKind, message: String) -> anyhow::Error {
    tracing::error!(error = %message, "container init failed");
    pipe.report_error(&InitError::new(kind, message.clone()));
    pipe.close();
    VesselError::ChildReported {
        kind: kind as i32,
        message,
    }
    .into()
}
