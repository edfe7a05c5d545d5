//! Session configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::procfs::{DEFAULT_PROC_ROOT, ProcFs};

/// Session configuration
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// UID to assume in the user namespace. Defaults to the target's owner
    pub target_uid: Option<u32>,

    /// GID to assume in the user namespace. Defaults to the target's group
    pub target_gid: Option<u32>,

    /// Run the work unit in a forked worker even when no kind requires it
    pub fork: bool,

    /// Enter the user namespace with setns(2) instead of only switching
    /// uid/gid. There is no way back: the process must terminate afterwards
    pub true_user: bool,

    /// Keep capabilities across the uid/gid switch
    pub keep_caps: bool,

    /// Where procfs is mounted
    pub proc_root: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            target_uid: None,
            target_gid: None,
            fork: false,
            true_user: false,
            keep_caps: false,
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
        }
    }
}

impl SessionConfig {
    /// Create a new session configuration
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the UID to assume in the user namespace
    #[must_use]
    pub const fn with_uid(mut self, uid: u32) -> Self {
        self.target_uid = Some(uid);
        self
    }

    /// Set the GID to assume in the user namespace
    #[must_use]
    pub const fn with_gid(mut self, gid: u32) -> Self {
        self.target_gid = Some(gid);
        self
    }

    /// Always run the work unit in a forked worker
    #[must_use]
    pub const fn with_fork(mut self, enable: bool) -> Self {
        self.fork = enable;
        self
    }

    /// Enter the user namespace irreversibly
    #[must_use]
    pub const fn with_true_user(mut self, enable: bool) -> Self {
        self.true_user = enable;
        self
    }

    /// Keep capabilities across the uid/gid switch
    #[must_use]
    pub const fn with_keep_caps(mut self, enable: bool) -> Self {
        self.keep_caps = enable;
        self
    }

    /// Use a procfs mounted somewhere other than `/proc`
    #[must_use]
    pub fn with_proc_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.proc_root = root.into();
        self
    }

    /// The configured procfs
    #[must_use]
    pub fn procfs(&self) -> ProcFs {
        ProcFs::new(&self.proc_root)
    }
}
