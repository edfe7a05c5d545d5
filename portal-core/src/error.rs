//! Error types for Portal

use nix::errno::Errno;
use thiserror::Error;

/// Portal error types
///
/// Per-kind entry failures are not errors: they are recorded in the session's
/// error map and the session carries on with the remaining namespaces.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The requested namespace mask holds no known namespace kind
    #[error("Invalid namespace types: {bits:#x}")]
    InvalidNamespaces {
        /// Raw mask passed by the caller
        bits: u32,
    },

    /// Target process does not exist
    #[error("No such process: {pid}")]
    ProcessNotFound {
        /// Target process ID
        pid: i32,
    },

    /// Switching to the target credentials failed in the worker process
    #[error("Failed to switch credentials to {uid}:{gid}: {source}")]
    Credentials {
        /// Target user ID
        uid: u32,
        /// Target group ID
        gid: u32,
        /// Underlying OS error
        source: Errno,
    },

    /// Returning to an original namespace failed.
    ///
    /// The process is left straddling namespaces and must not do any
    /// further namespace work.
    #[error("{source} when exiting from \"{namespace}\" namespace. Further work is impossible!")]
    Restore {
        /// Name of the namespace that could not be restored
        namespace: &'static str,
        /// Underlying OS error
        source: Errno,
    },

    /// A previous restoration failure left the session in an unknown state
    #[error("Session is in an indeterminate namespace state")]
    Indeterminate,

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        /// Error message
        message: String,
    },

    /// System error from nix
    #[error("System error: {0}")]
    System(#[from] nix::Error),
}

impl Error {
    /// OS error number best describing this error.
    ///
    /// Command-line callers use it as the process exit status.
    #[must_use]
    pub fn errno(&self) -> Errno {
        match self {
            Self::Io(e) => e.raw_os_error().map_or(Errno::EIO, Errno::from_raw),
            Self::InvalidNamespaces { .. } | Self::InvalidConfig { .. } => Errno::EINVAL,
            Self::ProcessNotFound { .. } => Errno::ESRCH,
            Self::Credentials { source, .. } | Self::Restore { source, .. } => *source,
            Self::Indeterminate => Errno::ENOTRECOVERABLE,
            Self::System(errno) => *errno,
        }
    }

    /// Raw errno value, see [`Error::errno`]
    #[must_use]
    pub fn code(&self) -> i32 {
        self.errno() as i32
    }

    /// Whether the process may keep running after this error
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Restore { .. } | Self::Indeterminate)
    }
}

/// Result type alias for Portal operations
pub type Result<T> = std::result::Result<T, Error>;
