//! `vsl run` — boot a container and wait for its user command.

use std::path::PathBuf;

use clap::Args;
use vessel_common::constants::DEFAULT_DATA_DIR;

/// Arguments for the `run` command.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Path to the container configuration JSON.
    #[arg(default_value = "container.json")]
    pub config: PathBuf,

    /// Directory for this container's runtime state.
    #[arg(long, default_value = DEFAULT_DATA_DIR)]
    pub data_path: PathBuf,

    /// Pseudo-terminal slave path to hand the container.
    #[arg(long, default_value = "")]
    pub console: String,

    /// User command and arguments to run inside the container.
    #[arg(last = true, required = true)]
    pub args: Vec<String>,
}

/// Executes the `run` command.
///
/// The process exits with the user command's own exit code, so shells and
/// supervisors observe the container exactly as they would the command.
///
/// # Errors
///
/// Returns an error if configuration loading or container setup fails.
pub fn execute(args: RunArgs) -> anyhow::Result<()> {
    let config = super::load_config(&args.config)?;

    let code = vessel_runtime::exec::exec(
        &config,
        &args.console,
        &args.data_path,
        &args.args,
        None,
    )?;
    std::process::exit(code);
}
