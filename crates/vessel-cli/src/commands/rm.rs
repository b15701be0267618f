//! `vessel rm` — Remove containers and clean up their resources.

use clap::Args;
use vessel_common::config::RuntimeConfig;
use vessel_runtime::engine::Engine;

use crate::output::report_error;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Container IDs, ID prefixes, or names.
    #[arg(required = true)]
    pub containers: Vec<String>,

    /// Kill running containers before removing them.
    #[arg(short, long)]
    pub force: bool,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if any container could not be removed.
pub fn execute(args: &RmArgs, runtime: RuntimeConfig) -> anyhow::Result<()> {
    let engine = Engine::new(runtime);
    let mut failed = 0usize;
    for reference in &args.containers {
        match engine.remove(reference, args.force) {
            Ok(container) => println!("{}", container.id),
            Err(e) => {
                report_error(&e);
                failed += 1;
            }
        }
    }
    anyhow::ensure!(failed == 0, "{failed} container(s) could not be removed");
    Ok(())
}
