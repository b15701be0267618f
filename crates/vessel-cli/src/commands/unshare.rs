//! `vessel unshare` — Run a command with vessel re-executed in new namespaces.
//!
//! The first invocation clones `vessel init unshare …` into the requested
//! namespaces and forwards its exit status. The re-executed copy makes the
//! mount tree private, remounts `/proc` for the new PID namespace, sets the
//! hostname, and replaces itself with the command.

use std::os::unix::process::CommandExt;
use std::path::Path;

use anyhow::Context;
use clap::Args;
use vessel_core::filesystem::mount::{make_rprivate, mount_proc};
use vessel_core::namespace::reexec::{ReexecOutcome, reexec};
use vessel_core::namespace::uts::set_hostname;
use vessel_core::namespace::{NamespaceKind, NamespaceSet, parse_set};

/// Arguments for the `unshare` command.
#[derive(Args, Debug)]
pub struct UnshareArgs {
    /// Comma-separated namespaces: uts, ipc, pid, mount, network, user.
    #[arg(long = "ns", default_value = "uts,pid,mount", value_parser = parse_namespaces)]
    pub namespaces: NamespaceSet,

    /// Hostname set inside a new UTS namespace.
    #[arg(long)]
    pub hostname: Option<String>,

    /// Command and arguments.
    #[arg(
        trailing_var_arg = true,
        allow_hyphen_values = true,
        required = true,
        value_name = "COMMAND"
    )]
    pub command: Vec<String>,
}

fn parse_namespaces(list: &str) -> Result<NamespaceSet, String> {
    parse_set(list).map_err(|e| e.to_string())
}

/// Executes the `unshare` command.
///
/// Returns the exit status of the command.
///
/// # Errors
///
/// Returns an error if the re-exec fails or the namespace setup in the
/// re-executed process fails.
pub fn execute(args: UnshareArgs) -> anyhow::Result<i32> {
    match reexec(args.namespaces)? {
        ReexecOutcome::Exited(code) => Ok(code),
        ReexecOutcome::AlreadyReexeced => {
            prepare(&args)?;
            let err = std::process::Command::new(&args.command[0])
                .args(&args.command[1..])
                .exec();
            Err(err).with_context(|| format!("exec {}", args.command[0]))
        }
    }
}

fn prepare(args: &UnshareArgs) -> anyhow::Result<()> {
    let ns = args.namespaces;
    if ns.contains(NamespaceKind::Mount) {
        make_rprivate(Path::new("/"))?;
        if ns.contains(NamespaceKind::Pid) {
            mount_proc(Path::new("/"))?;
        }
    }
    if let Some(hostname) = &args.hostname {
        anyhow::ensure!(
            ns.contains(NamespaceKind::Uts),
            "--hostname needs the uts namespace"
        );
        set_hostname(hostname)?;
    }
    tracing::debug!(namespaces = %ns, "re-executed process prepared");
    Ok(())
}
