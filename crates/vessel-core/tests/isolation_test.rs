//! Tests that exercise kernel primitives in a forked child.
//!
//! Each test does its allocating setup in the parent, forks, and reports the
//! child's verdict through its exit status so a failed step never leaks
//! state into the test harness.

#![allow(unsafe_code, clippy::expect_used, clippy::unwrap_used)]

use std::path::Path;

use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, fork};
use vessel_core::filesystem::mount::{bind_mount, make_rprivate};
use vessel_core::filesystem::pivot_root::{PUT_OLD, pivot_root};
use vessel_core::security::seccomp::{
    ArgOp, Arch, CompiledFilters, SeccompAction, SeccompProfile, SyscallRule, compile,
    is_available,
};

/// Runs `body` in a forked child and returns its exit status.
fn in_child(body: impl FnOnce() -> i32) -> i32 {
    // SAFETY: the child only runs `body` and then `_exit`s without returning
    // into the test harness.
    match unsafe { fork() }.expect("fork") {
        ForkResult::Child => {
            let code = body();
            // SAFETY: terminating the forked child immediately.
            unsafe { libc::_exit(code) }
        }
        ForkResult::Parent { child } => match waitpid(child, None).expect("waitpid") {
            WaitStatus::Exited(_, code) => code,
            other => panic!("child ended abnormally: {other:?}"),
        },
    }
}

// ── Seccomp ──────────────────────────────────────────────────────────

/// Compiles an allow-by-default profile for the host, or `None` when the
/// host cannot filter.
fn compile_allow_by_default(syscalls: Vec<SyscallRule>) -> Option<CompiledFilters> {
    let arch = Arch::host()?;
    if !is_available() {
        return None;
    }
    let profile = SeccompProfile {
        default_action: SeccompAction::Allow,
        default_errno_ret: None,
        architectures: Vec::new(),
        syscalls,
        disabled: false,
    };
    Some(compile(&profile, arch).expect("compile"))
}

/// Installs `compiled` on the calling process. Returns a non-zero step
/// code on failure.
fn install(compiled: &CompiledFilters) -> i32 {
    // SAFETY: PR_SET_NO_NEW_PRIVS takes no pointer arguments.
    if unsafe { libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) } != 0 {
        return 2;
    }
    for program in &compiled.programs {
        if seccompiler::apply_filter(program).is_err() {
            return 3;
        }
    }
    0
}

/// Raw `syscall(2)` so the filter's errno is observed directly rather than
/// through a libc wrapper.
fn raw_errno(nr: libc::c_long, arg: libc::c_long) -> Option<i32> {
    // SAFETY: the syscalls used here take integer arguments only.
    let rc = unsafe { libc::syscall(nr, arg) };
    if rc == -1 {
        std::io::Error::last_os_error().raw_os_error()
    } else {
        if nr == libc::SYS_dup {
            // SAFETY: closing the descriptor dup just returned.
            let _ = unsafe { libc::close(libc::c_int::try_from(rc).unwrap_or(-1)) };
        }
        None
    }
}

#[test]
fn errno_rule_denies_syscall_in_child() {
    let Some(compiled) =
        compile_allow_by_default(vec![SyscallRule::new(SeccompAction::Errno, ["getppid"])])
    else {
        return;
    };
    assert_eq!(compiled.programs.len(), 1);

    let code = in_child(|| {
        let step = install(&compiled);
        if step != 0 {
            return step;
        }
        if raw_errno(libc::SYS_getppid, 0) == Some(libc::EPERM) { 0 } else { 1 }
    });
    assert_eq!(code, 0, "getppid was not denied with EPERM");
}

#[test]
fn first_matching_rule_decides_in_child() {
    let Some(compiled) = compile_allow_by_default(vec![
        SyscallRule::new(SeccompAction::Allow, ["dup"]).with_arg(0, ArgOp::Equal, 0),
        SyscallRule::new(SeccompAction::Errno, ["dup"]),
    ]) else {
        return;
    };

    let code = in_child(|| {
        let step = install(&compiled);
        if step != 0 {
            return step;
        }
        if raw_errno(libc::SYS_dup, 0).is_some() {
            return 10;
        }
        if raw_errno(libc::SYS_dup, 1) != Some(libc::EPERM) {
            return 11;
        }
        0
    });
    assert_eq!(code, 0, "dup(0) must be allowed and dup(1) denied, step {code}");
}

#[test]
fn overlapping_conditional_rules_keep_table_order_in_child() {
    let Some(compiled) = compile_allow_by_default(vec![
        SyscallRule::new(SeccompAction::Allow, ["dup"]).with_arg(0, ArgOp::LessOrEqual, 1),
        SyscallRule::new(SeccompAction::Errno, ["dup"]).with_arg(0, ArgOp::LessOrEqual, 2),
    ]) else {
        return;
    };

    let code = in_child(|| {
        let step = install(&compiled);
        if step != 0 {
            return step;
        }
        if raw_errno(libc::SYS_dup, 1).is_some() {
            return 10;
        }
        if raw_errno(libc::SYS_dup, 2) != Some(libc::EPERM) {
            return 11;
        }
        0
    });
    assert_eq!(code, 0, "dup(1) must be allowed and dup(2) denied, step {code}");
}

// ── Root switching ───────────────────────────────────────────────────

#[test]
#[ignore = "requires root"]
fn pivot_root_switches_to_bound_directory() {
    let dir = tempfile::tempdir().expect("tempdir");
    let new_root = dir.path().to_path_buf();
    std::fs::write(new_root.join("marker"), b"inside").expect("write marker");

    let code = in_child(|| {
        if nix::sched::unshare(nix::sched::CloneFlags::CLONE_NEWNS).is_err() {
            return 2;
        }
        if make_rprivate(Path::new("/")).is_err() {
            return 3;
        }
        if bind_mount(&new_root, &new_root, true).is_err() {
            return 4;
        }
        if pivot_root(&new_root).is_err() {
            return 5;
        }
        let marker = Path::new("/marker").is_file();
        let put_old_gone = !Path::new("/").join(PUT_OLD).exists();
        if marker && put_old_gone { 0 } else { 1 }
    });
    assert_eq!(code, 0, "pivot failed at step {code}");
    // The host view is untouched.
    assert!(dir.path().join("marker").is_file());
    assert!(!dir.path().join(PUT_OLD).exists());
}
