//! # vessel-core
//!
//! Low-level Linux isolation primitives for the Vessel runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: clone-flag derivation and `setns(2)` joining.
//! - **UID/GID maps**: writing `/proc/<pid>/{uid,gid}_map` from the outside.
//! - **Cgroups**: per-controller hierarchies, limits, and task attachment.
//! - **Networking**: host-side strategies and in-namespace interface setup.
//! - **Sync pipe**: the framed parent↔child bootstrap channel.
//! - **Mounts**: mount-namespace initialization and `pivot_root`.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! proper error handling and `// SAFETY:` documentation.

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod cgroup;
pub mod idmap;
pub mod label;
pub mod mounts;
pub mod namespace;
pub mod network;
pub mod restrict;
pub mod sync;
