//! `vessel seccomp` — Export the built-in profile and check profile files.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args, Subcommand};
use vessel_core::security::seccomp::{Arch, SeccompAction, SeccompProfile, compile};

/// Arguments for the `seccomp` command.
#[derive(Args, Debug)]
pub struct SeccompArgs {
    /// Seccomp action to perform.
    #[command(subcommand)]
    pub action: SeccompCommand,
}

/// Seccomp subcommands.
#[derive(Subcommand, Debug)]
pub enum SeccompCommand {
    /// Print the built-in default profile as JSON.
    Default {
        /// Write to a file instead of stdout.
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
    /// Validate a profile and compile it for the host architecture.
    Check {
        /// Profile JSON file.
        file: PathBuf,
    },
}

/// Executes the `seccomp` command.
///
/// # Errors
///
/// Returns an error if the profile cannot be written, read, or compiled.
pub fn execute(args: SeccompArgs) -> anyhow::Result<()> {
    match args.action {
        SeccompCommand::Default { output: Some(path) } => {
            SeccompProfile::default_profile().save(&path)?;
            tracing::info!(path = %path.display(), "default seccomp profile written");
            Ok(())
        }
        SeccompCommand::Default { output: None } => {
            println!("{}", serde_json::to_string_pretty(&SeccompProfile::default_profile())?);
            Ok(())
        }
        SeccompCommand::Check { file } => check(&file),
    }
}

fn check(file: &Path) -> anyhow::Result<()> {
    let profile = SeccompProfile::load(file)
        .with_context(|| format!("loading {}", file.display()))?;
    println!("profile:        {}", file.display());
    println!("default action: {}", profile.default_action);
    for action in [
        SeccompAction::Allow,
        SeccompAction::Errno,
        SeccompAction::Kill,
        SeccompAction::Trap,
        SeccompAction::Trace,
        SeccompAction::Log,
    ] {
        let count = profile.count_action(action);
        if count > 0 {
            println!("  {:<16} {count} syscall(s)", action.to_string());
        }
    }
    if profile.disabled {
        println!("disabled:       yes, nothing is installed");
        return Ok(());
    }

    let arch = Arch::host()
        .with_context(|| format!("no seccomp backend for {}", std::env::consts::ARCH))?;
    let compiled = compile(&profile, arch)?;
    println!(
        "compiled:       {} filter(s), {} syscall(s) for {arch:?}",
        compiled.programs.len(),
        compiled.syscalls
    );
    if !compiled.skipped.is_empty() {
        println!("skipped:        {}", compiled.skipped.join(", "));
    }
    Ok(())
}
