//! `vsl setup` — in-namespace setup helper.
//!
//! Joins the ipc/net/uts/mnt namespaces of an existing container's init
//! and performs the container setup from inside. Unlike first boot, the
//! joined variant also masks `sys`, because the mount namespace it enters
//! kept its sysfs writable.

use std::path::PathBuf;

use clap::Args;
use vessel_common::constants::DEFAULT_DATA_DIR;
use vessel_core::namespace::{self, SETUP_JOIN_ORDER};
use vessel_core::restrict::JOIN_PATHS;
use vessel_runtime::setup::{self, BootParams};

/// Arguments for the hidden `setup` command.
#[derive(Args, Debug)]
pub struct SetupArgs {
    /// Path to the container configuration JSON.
    #[arg(long, default_value = "container.json")]
    pub config: PathBuf,

    /// Directory holding the container's runtime state.
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_path: PathBuf,
}

/// Executes the `setup` command.
///
/// # Errors
///
/// Returns an error if no container state exists, a namespace cannot be
/// joined, or the in-namespace setup fails.
pub fn execute(args: SetupArgs) -> anyhow::Result<()> {
    let config = super::load_config(&args.config)?;
    let state = vessel_runtime::state::load(&args.data_path)?
        .ok_or_else(|| anyhow::anyhow!("no container at {}", args.data_path.display()))?;

    namespace::join(state.init_pid, &SETUP_JOIN_ORDER)?;

    let mut boot = BootParams::from_env()?;
    boot.data_path = args.data_path;
    setup::setup_container(&config, &boot, &state.network_state, &JOIN_PATHS)?;
    Ok(())
}
