//! # vessel-core
//!
//! Low-level Linux isolation primitives for the vessel runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: UTS, IPC, PID, Mount, Network, and User isolation,
//!   the `clone(2)` spawn primitive, and the self re-exec bootstrap.
//! - **Filesystem**: bind and `OverlayFS` roots, `pivot_root`, and the
//!   `/proc`, `/sys`, `/dev` pseudo-filesystems.
//! - **Security**: LSM confinement, seccomp filters, and capability
//!   dropping, applied in that order.
//!
//! Unsafe system calls are confined to small wrappers documented with
//! `// SAFETY:` comments.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod filesystem;
pub mod namespace;
pub mod security;
