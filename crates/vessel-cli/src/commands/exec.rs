//! `vsl exec` — run an additional command inside a running container.

use std::path::PathBuf;

use clap::Args;
use vessel_common::constants::DEFAULT_DATA_DIR;

/// Arguments for the `exec` command.
#[derive(Args, Debug)]
pub struct ExecArgs {
    /// Path to the container configuration JSON.
    #[arg(long, default_value = "container.json")]
    pub config: PathBuf,

    /// Directory holding the container's runtime state.
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_path: PathBuf,

    /// Pseudo-terminal slave path for the joined process.
    #[arg(long, default_value = "")]
    pub console: String,

    /// Command and arguments to run inside the container.
    #[arg(last = true, required = true)]
    pub args: Vec<String>,
}

/// Executes the `exec` command.
///
/// # Errors
///
/// Returns an error if no container state exists at the data path, or if
/// joining fails.
pub fn execute(args: ExecArgs) -> anyhow::Result<()> {
    let config = super::load_config(&args.config)?;
    let state = vessel_runtime::state::load(&args.data_path)?
        .ok_or_else(|| anyhow::anyhow!("no container at {}", args.data_path.display()))?;

    let init_path = std::env::current_exe()?;
    let code = vessel_runtime::join::exec_in(
        &config,
        &state,
        &args.args,
        &init_path.to_string_lossy(),
        "exec",
        &args.console,
        None,
    )?;
    std::process::exit(code);
}
