//! # vsl — Vessel CLI
//!
//! Daemon-less container runtime: boots a process into fresh kernel
//! namespaces, or joins one to a running container. The binary re-executes
//! itself for the in-namespace entry points (`init`, `setup`, and the
//! `nsenter-*` helper).

#![allow(clippy::print_stderr)]

mod commands;

use clap::Parser;

use crate::commands::Cli;

fn main() -> anyhow::Result<()> {
    // Must run before anything else: a re-exec'd nsenter helper has to call
    // setns while this process is still single-threaded, so not even the
    // tracing subscriber may come first.
    vessel_runtime::nsenter::maybe_enter();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    commands::execute(cli)
}
