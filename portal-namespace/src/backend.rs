//! Kernel operations used by a session
//!
//! This module uses `unsafe` for fork() which is inherently unsafe
//! but necessary to run work in namespaces that cannot be left again.

#![allow(unsafe_code)]

use nix::errno::Errno;
use nix::sched::setns;
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{ForkResult, Pid, fork};
use std::collections::HashMap;
use std::os::fd::BorrowedFd;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::kind::NamespaceKind;

/// Which side of a fork the caller is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkRole {
    /// The original process, with the child's PID
    Parent(Pid),
    /// The newly created worker process
    Child,
}

/// Trait for the kernel operations a session needs
///
/// This allows for different implementations:
/// - [`SystemBackend`] - Real syscalls through `nix`
/// - [`MockBackend`] - Testing without privileges or namespaces
pub trait NamespaceBackend {
    /// Associate the calling thread with the namespace behind `fd`
    ///
    /// # Errors
    /// Returns the OS error if setns(2) fails
    fn enter(&self, fd: BorrowedFd<'_>, kind: NamespaceKind) -> nix::Result<()>;

    /// Fork a worker process
    ///
    /// # Errors
    /// Returns the OS error if fork(2) fails
    fn fork(&self) -> nix::Result<ForkRole>;

    /// Block until `child` terminates and decode its exit status
    ///
    /// # Errors
    /// Returns the OS error if waitpid(2) fails
    fn wait(&self, child: Pid) -> nix::Result<i32>;

    /// Switch to the target credentials, optionally keeping capabilities
    ///
    /// # Errors
    /// Returns the OS error of the failing credential call
    fn switch_credentials(&self, uid: u32, gid: u32, keep_caps: bool) -> nix::Result<()>;

    /// Terminate the current process immediately
    fn terminate(&self, code: i32) -> !;
}

/// Real kernel backend
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemBackend;

impl NamespaceBackend for SystemBackend {
    fn enter(&self, fd: BorrowedFd<'_>, kind: NamespaceKind) -> nix::Result<()> {
        setns(fd, kind.clone_flags())
    }

    fn fork(&self) -> nix::Result<ForkRole> {
        // SAFETY: the session is single-threaded by contract; the child only
        // runs the caller's work unit and then calls _exit.
        match unsafe { fork() }? {
            ForkResult::Parent { child } => Ok(ForkRole::Parent(child)),
            ForkResult::Child => Ok(ForkRole::Child),
        }
    }

    fn wait(&self, child: Pid) -> nix::Result<i32> {
        loop {
            match waitpid(child, None) {
                Ok(WaitStatus::Exited(_, exit_code)) => {
                    debug!(%child, exit_code, "Worker exited");
                    return Ok(exit_code);
                }
                Ok(WaitStatus::Signaled(_, signal, _)) => {
                    warn!(%child, ?signal, "Worker terminated by signal");
                    // Exit codes for signals: 128 + signal number
                    return Ok(128 + signal as i32);
                }
                Ok(status) => {
                    debug!(?status, "Worker status changed, still waiting");
                }
                Err(Errno::EINTR) => {
                    debug!("Wait interrupted by signal, continuing...");
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn switch_credentials(&self, uid: u32, gid: u32, keep_caps: bool) -> nix::Result<()> {
        if keep_caps {
            portal_security::switch_credentials_keep_caps(uid, gid)
        } else {
            portal_security::switch_credentials(uid, gid)
        }
    }

    fn terminate(&self, code: i32) -> ! {
        // SAFETY: _exit never returns and skips atexit handlers and stdio
        // buffers that belong to the parent's copy of the address space.
        unsafe { libc::_exit(code) }
    }
}

/// Panic payload used by [`MockBackend::terminate`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminated(pub i32);

/// Mock backend for testing (doesn't touch the kernel)
///
/// Failures are scripted per namespace kind: the first setns(2) for a kind is
/// its entry, the second its restoration. [`NamespaceBackend::terminate`]
/// panics with a [`Terminated`] payload instead of ending the process.
///
/// # Example
/// ```
/// use nix::errno::Errno;
/// use portal_namespace::{MockBackend, NamespaceKind};
///
/// let backend = MockBackend::new();
/// backend.fail_enter(NamespaceKind::Net, Errno::EPERM);
/// backend.set_child_status(Errno::EAGAIN as i32);
///
/// assert!(backend.setns_calls().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    setns_calls: Vec<NamespaceKind>,
    attempts: HashMap<NamespaceKind, usize>,
    failures: HashMap<(NamespaceKind, usize), Errno>,
    fork_role: Option<ForkRole>,
    fork_error: Option<Errno>,
    forks: usize,
    child_status: i32,
    wait_error: Option<Errno>,
    waited: Vec<Pid>,
    credentials_error: Option<Errno>,
    credentials: Option<(u32, u32, bool)>,
}

impl MockBackend {
    /// PID reported for the forked worker
    pub const CHILD_PID: i32 = 31337;

    /// Create a new mock backend
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the entry into `kind` fail
    pub fn fail_enter(&self, kind: NamespaceKind, errno: Errno) {
        self.state().failures.insert((kind, 0), errno);
    }

    /// Make the restoration of `kind` fail
    pub fn fail_restore(&self, kind: NamespaceKind, errno: Errno) {
        self.state().failures.insert((kind, 1), errno);
    }

    /// Choose which side of the fork the session continues on
    pub fn set_fork_role(&self, role: ForkRole) {
        self.state().fork_role = Some(role);
    }

    /// Make fork(2) fail
    pub fn fail_fork(&self, errno: Errno) {
        self.state().fork_error = Some(errno);
    }

    /// Exit status reported for the worker
    pub fn set_child_status(&self, status: i32) {
        self.state().child_status = status;
    }

    /// Make waitpid(2) fail
    pub fn fail_wait(&self, errno: Errno) {
        self.state().wait_error = Some(errno);
    }

    /// Make the credential switch fail
    pub fn fail_credentials(&self, errno: Errno) {
        self.state().credentials_error = Some(errno);
    }

    /// Every setns(2) call in order, failed ones included
    #[must_use]
    pub fn setns_calls(&self) -> Vec<NamespaceKind> {
        self.state().setns_calls.clone()
    }

    /// Number of fork(2) calls
    #[must_use]
    pub fn forks(&self) -> usize {
        self.state().forks
    }

    /// Children waited for
    #[must_use]
    pub fn waited(&self) -> Vec<Pid> {
        self.state().waited.clone()
    }

    /// Last credentials switched to, as `(uid, gid, keep_caps)`
    #[must_use]
    pub fn credentials(&self) -> Option<(u32, u32, bool)> {
        self.state().credentials
    }
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend").finish_non_exhaustive()
    }
}

impl NamespaceBackend for MockBackend {
    fn enter(&self, _fd: BorrowedFd<'_>, kind: NamespaceKind) -> nix::Result<()> {
        let mut state = self.state();
        state.setns_calls.push(kind);

        let attempt = state.attempts.entry(kind).or_default();
        let key = (kind, *attempt);
        *attempt += 1;

        match state.failures.get(&key) {
            Some(errno) => {
                debug!(%kind, %errno, "Mock: setns failed");
                Err(*errno)
            }
            None => {
                debug!(%kind, "Mock: setns");
                Ok(())
            }
        }
    }

    fn fork(&self) -> nix::Result<ForkRole> {
        let mut state = self.state();
        state.forks += 1;

        if let Some(errno) = state.fork_error {
            return Err(errno);
        }

        Ok(state
            .fork_role
            .unwrap_or(ForkRole::Parent(Pid::from_raw(Self::CHILD_PID))))
    }

    fn wait(&self, child: Pid) -> nix::Result<i32> {
        let mut state = self.state();
        state.waited.push(child);

        match state.wait_error {
            Some(errno) => Err(errno),
            None => Ok(state.child_status),
        }
    }

    fn switch_credentials(&self, uid: u32, gid: u32, keep_caps: bool) -> nix::Result<()> {
        let mut state = self.state();

        if let Some(errno) = state.credentials_error {
            return Err(errno);
        }

        state.credentials = Some((uid, gid, keep_caps));
        Ok(())
    }

    fn terminate(&self, code: i32) -> ! {
        debug!(code, "Mock: terminate");
        std::panic::panic_any(Terminated(code))
    }
}
