//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get the current process ID
    #[must_use]
    pub fn current() -> Self {
        Self(nix::unistd::getpid().as_raw())
    }

    /// Convert to `nix::unistd::Pid`
    #[must_use]
    pub const fn as_nix_pid(self) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(self.0)
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let pid: i32 = s.trim().parse().map_err(|_| Error::InvalidConfig {
            message: format!("Invalid process ID: {s:?}"),
        })?;

        if pid <= 0 {
            return Err(Error::InvalidConfig {
                message: format!("Process ID must be positive, got {pid}"),
            });
        }

        Ok(Self(pid))
    }
}

impl From<nix::unistd::Pid> for ProcessId {
    fn from(pid: nix::unistd::Pid) -> Self {
        Self(pid.as_raw())
    }
}

impl From<ProcessId> for nix::unistd::Pid {
    fn from(pid: ProcessId) -> Self {
        nix::unistd::Pid::from_raw(pid.0)
    }
}

/// A process entry under `/proc`: the caller itself or a numbered process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcEntry {
    /// `/proc/self`
    Current,
    /// `/proc/<pid>`
    Pid(ProcessId),
}

impl fmt::Display for ProcEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => f.write_str("self"),
            Self::Pid(pid) => write!(f, "{pid}"),
        }
    }
}

impl From<ProcessId> for ProcEntry {
    fn from(pid: ProcessId) -> Self {
        Self::Pid(pid)
    }
}
