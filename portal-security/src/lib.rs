//! Credential and capability handling for namespace workers
//!
//! A worker that borrows a user namespace assumes the target's uid/gid
//! instead of calling setns(2) on it. This crate provides:
//! - The plain uid/gid switch
//! - The same switch keeping the permitted capabilities effective

#![warn(missing_docs, clippy::all, clippy::pedantic)]

pub mod caps;
pub mod credentials;

pub use caps::{CapabilitySets, raise_effective, read_capabilities};
pub use credentials::{switch_credentials, switch_credentials_keep_caps};
