//! `vessel child` — Bootstrap side of run-with-setup.
//!
//! Not meant to be typed by hand: the runtime re-executes the binary with
//! this subcommand inside fresh namespaces and the bootstrap variables set.

use clap::Args;

/// Arguments for the hidden `child` command.
#[derive(Args, Debug)]
pub struct ChildArgs {
    /// Command to exec once the container is set up.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    pub command: Vec<String>,
}

/// Executes the `child` command.
///
/// Only returns when setup or exec failed, with the exit status to use.
pub fn execute(args: &ChildArgs) -> i32 {
    vessel_runtime::bootstrap::run(&args.command)
}
