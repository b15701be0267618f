//! `vessel stop` — Stop running containers.

use std::time::Duration;

use clap::Args;
use vessel_common::config::RuntimeConfig;
use vessel_runtime::container::DEFAULT_STOP_GRACE;
use vessel_runtime::engine::Engine;

use crate::output::report_error;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Container IDs, ID prefixes, or names.
    #[arg(required = true)]
    pub containers: Vec<String>,

    /// Seconds between SIGTERM and SIGKILL.
    #[arg(short, long, default_value_t = DEFAULT_STOP_GRACE.as_secs())]
    pub time: u64,
}

/// Executes the `stop` command.
///
/// Every container is attempted; failures are reported individually.
///
/// # Errors
///
/// Returns an error if any container could not be stopped.
pub fn execute(args: &StopArgs, runtime: RuntimeConfig) -> anyhow::Result<()> {
    let engine = Engine::new(runtime);
    let grace = Duration::from_secs(args.time);
    let mut failed = 0usize;
    for reference in &args.containers {
        match engine.stop(reference, grace) {
            Ok(container) => println!("{}", container.id),
            Err(e) => {
                report_error(&e);
                failed += 1;
            }
        }
    }
    anyhow::ensure!(failed == 0, "{failed} container(s) could not be stopped");
    Ok(())
}
