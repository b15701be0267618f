//! Filesystem management for container isolation.
//!
//! Provides the container root (bind or `OverlayFS`), `pivot_root` for secure
//! root filesystem switching, and mount utilities.

pub mod mount;
pub mod overlayfs;
pub mod pivot_root;
pub mod rootfs;

pub use rootfs::{RootFs, RootFsStrategy};
