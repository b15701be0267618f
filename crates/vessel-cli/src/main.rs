//! # vessel — educational Linux container runtime
//!
//! Daemon-less: every command runs to completion in the foreground.
//! Single binary for running, inspecting, and removing containers; it is
//! also re-executed as the bootstrap child of its own containers.

#![allow(clippy::print_stdout, clippy::print_stderr)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

mod commands;
mod output;

use clap::Parser;
use vessel_core::namespace::reexec::strip_sentinel;

use crate::commands::{Cli, LogFormat};

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args_os()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();
    let cli = Cli::parse_from(strip_sentinel(&args));
    init_logging(cli.log_format);

    match commands::execute(cli)? {
        0 => Ok(()),
        code => std::process::exit(code),
    }
}

fn init_logging(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
