//! Temporary entry into the Linux namespaces of another process
//!
//! A [`Session`] opens descriptors for the caller's own namespaces and for
//! those of a target process, joins the target namespaces with setns(2),
//! runs a work unit (in a forked worker when a PID or user namespace is
//! involved) and then returns to the original namespaces.
//!
//! ```no_run
//! use portal_core::ProcessId;
//! use portal_namespace::{NamespaceSet, Session, SessionConfig};
//!
//! # fn main() -> portal_core::Result<()> {
//! let mut session = Session::new(
//!     ProcessId::from_raw(1),
//!     NamespaceSet::MNT | NamespaceSet::NET,
//!     SessionConfig::new(),
//! )?;
//!
//! let outcome = session.enter(|_| {
//!     println!("{}", std::fs::read_to_string("/proc/self/mountinfo").unwrap_or_default());
//!     0
//! })?;
//! assert_eq!(outcome.status(), Some(0));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]

pub mod backend;
pub mod config;
pub mod descriptor;
pub mod kind;
pub mod procfs;
pub mod session;

pub use backend::{ForkRole, MockBackend, NamespaceBackend, SystemBackend, Terminated};
pub use config::SessionConfig;
pub use descriptor::{DescriptorTable, Tables, build_tables, open_descriptor};
pub use kind::{NamespaceKind, NamespaceSet, describe};
pub use procfs::{NamespaceLinks, ProcFs, namespace_links};
pub use session::{Outcome, Session, SessionReport, SessionState, UserNamespaceWarning};
