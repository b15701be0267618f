//! Container orchestration for the vessel runtime.
//!
//! Turns a [`spec::ContainerConfig`] into a resolved
//! [`spec::IsolationSpec`], creates the container process with one of the
//! [`orchestrator`] strategies, builds and hardens the container on the
//! child side in [`bootstrap`], and tracks lifecycle state in a JSON index.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod bootstrap;
pub mod container;
pub mod engine;
pub mod handoff;
pub mod orchestrator;
pub mod process;
pub mod spec;
pub mod state;
