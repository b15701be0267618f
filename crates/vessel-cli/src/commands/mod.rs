//! CLI command definitions and dispatch.

pub mod child;
pub mod ps;
pub mod rm;
pub mod run;
pub mod seccomp;
pub mod stop;
pub mod unshare;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use vessel_common::config::RuntimeConfig;

/// vessel — educational Linux container runtime.
#[derive(Parser, Debug)]
#[command(name = "vessel", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Base directory for state, mount points, and overlay scratch space.
    #[arg(long, global = true, env = "VESSEL_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log output format on stderr.
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a command in a new container and wait for it.
    Run(run::RunArgs),
    /// Bootstrap a container from inside its namespaces.
    #[command(hide = true)]
    Child(child::ChildArgs),
    /// Re-execute vessel in new namespaces and run a command there.
    Unshare(unshare::UnshareArgs),
    /// List containers.
    Ps(ps::PsArgs),
    /// Stop running containers.
    Stop(stop::StopArgs),
    /// Remove containers and their leftovers.
    Rm(rm::RmArgs),
    /// Inspect and export seccomp profiles.
    Seccomp(seccomp::SeccompArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// Returns the process exit code.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<i32> {
    let runtime = cli
        .data_dir
        .map_or_else(RuntimeConfig::default, RuntimeConfig::with_data_dir);
    match cli.command {
        Command::Run(args) => run::execute(args, runtime),
        Command::Child(args) => Ok(child::execute(&args)),
        Command::Unshare(args) => unshare::execute(args),
        Command::Ps(args) => ps::execute(&args, runtime).map(|()| 0),
        Command::Stop(args) => stop::execute(&args, runtime).map(|()| 0),
        Command::Rm(args) => rm::execute(&args, runtime).map(|()| 0),
        Command::Seccomp(args) => seccomp::execute(args).map(|()| 0),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn child_is_hidden() {
        let cmd = Cli::command();
        let child = cmd
            .get_subcommands()
            .find(|c| c.get_name() == "child")
            .expect("child subcommand");
        assert!(child.is_hide_set());
    }

    #[test]
    fn global_flags_apply_to_subcommands() {
        let cli = Cli::parse_from(["vessel", "ps", "--data-dir", "/tmp/v", "--log-format", "json"]);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/v")));
        assert_eq!(cli.log_format, LogFormat::Json);
    }
}
