//! CLI command definitions and dispatch.

pub mod exec;
pub mod init;
pub mod run;
pub mod setup;

use clap::{Parser, Subcommand};

/// Vessel — daemon-less container runtime.
#[derive(Parser, Debug)]
#[command(name = "vsl", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Boot a container from a configuration file and wait for it.
    Run(run::RunArgs),
    /// Execute an additional command inside a running container.
    Exec(exec::ExecArgs),
    /// Container init entry point; only ever invoked by `run` re-exec.
    #[command(hide = true)]
    Init(init::InitArgs),
    /// In-namespace setup helper joining an existing container's init.
    #[command(hide = true)]
    Setup(setup::SetupArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => run::execute(args),
        Command::Exec(args) => exec::execute(args),
        Command::Init(args) => init::execute(args),
        Command::Setup(args) => setup::execute(args),
    }
}

/// Loads a container configuration from a JSON file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<vessel_common::config::ContainerConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("reading container config {}: {err}", path.display()))?;
    serde_json::from_str(&content)
        .map_err(|err| anyhow::anyhow!("parsing container config {}: {err}", path.display()))
}
