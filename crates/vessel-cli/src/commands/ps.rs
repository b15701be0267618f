//! `vessel ps` — List containers.

use clap::Args;
use vessel_common::config::RuntimeConfig;
use vessel_common::constants::HOSTNAME_ID_LEN;
use vessel_common::types::ContainerState;
use vessel_runtime::container::Container;
use vessel_runtime::engine::Engine;

use crate::output::{format_timestamp, or_dash, truncate};

/// Arguments for the `ps` command.
#[derive(Args, Debug)]
pub struct PsArgs {
    /// Show all containers (including stopped and exited).
    #[arg(short, long, conflicts_with = "state")]
    pub all: bool,

    /// Only show containers in this state.
    #[arg(long)]
    pub state: Option<ContainerState>,

    /// Print the records as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Executes the `ps` command.
///
/// Reads the state index and displays containers in a tabular format.
///
/// # Errors
///
/// Returns an error if the state index cannot be read.
pub fn execute(args: &PsArgs, runtime: RuntimeConfig) -> anyhow::Result<()> {
    let engine = Engine::new(runtime);
    let filter = match (args.all, args.state) {
        (true, _) => None,
        (false, Some(state)) => Some(state),
        (false, None) => Some(ContainerState::Running),
    };
    let containers = engine.list(filter)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&containers)?);
        return Ok(());
    }
    if containers.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    println!(
        "{:<14} {:<16} {:<9} {:<8} {:<6} {:<20} {:<30}",
        "CONTAINER ID", "NAME", "STATE", "PID", "EXIT", "CREATED", "COMMAND"
    );
    for c in &containers {
        println!("{}", row(c));
    }
    Ok(())
}

fn row(c: &Container) -> String {
    format!(
        "{:<14} {:<16} {:<9} {:<8} {:<6} {:<20} {:<30}",
        c.id.short(HOSTNAME_ID_LEN),
        truncate(&c.name, 16),
        c.state,
        or_dash(c.pid),
        or_dash(c.exit_code),
        format_timestamp(&c.created_at),
        truncate(&c.command.join(" "), 30)
    )
}

#[cfg(test)]
mod tests {
    use vessel_common::types::ContainerId;

    use super::*;

    #[test]
    fn row_shows_short_id_and_placeholders() {
        let c = Container::new(
            ContainerId::new("0123456789abcdef0123"),
            "web".into(),
            vec!["sh".into(), "-c".into(), "echo hi".into()],
        );
        let line = row(&c);
        assert!(line.starts_with("0123456789ab "));
        assert!(line.contains("created"));
        assert!(line.contains("sh -c echo hi"));
        assert!(line.contains(" - "));
    }
}
