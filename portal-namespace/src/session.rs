//! Namespace sessions
//!
//! A [`Session`] borrows the namespaces of another process for the duration
//! of one work unit:
//!
//! 1. descriptors for our own and the target's namespaces are opened up front
//! 2. `enter` joins the target namespaces in registry order, forks a worker
//!    when a PID or user namespace is involved, and runs the work unit
//! 3. `exit` reaps the worker, returns to our own namespaces in reverse order
//!    and closes every descriptor
//!
//! Entering the user namespace with [`SessionConfig::true_user`] cannot be
//! undone; the session then reports [`Outcome::UserNamespaceRetained`] and the
//! process is expected to terminate.

use nix::errno::Errno;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, error, info, warn};

use portal_core::{Error, ProcEntry, ProcessId, Result};

use crate::backend::{ForkRole, NamespaceBackend, SystemBackend};
use crate::config::SessionConfig;
use crate::descriptor::{DescriptorTable, Tables, build_tables};
use crate::kind::{NamespaceKind, NamespaceSet};

/// Status reported when the work unit panics
pub const PANIC_STATUS: i32 = 101;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Descriptors are open, nothing has been entered yet
    Ready,
    /// Target namespaces have been entered
    Entered,
    /// Original namespaces are back and every descriptor is closed
    Exited,
    /// Returning to an original namespace failed. No further namespace work
    /// may be done by this process
    Indeterminate,
}

/// The process now lives in the target's user namespace for good
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserNamespaceWarning {
    /// GID assumed in the namespace
    pub gid: u32,
    /// UID assumed in the namespace
    pub uid: u32,
    /// Process whose user namespace was entered
    pub pid: ProcessId,
}

impl fmt::Display for UserNamespaceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Further work will be under the *USER* namespace with rights of the user {}:{} of pid {}!",
            self.gid, self.uid, self.pid
        )
    }
}

/// How a session ended
#[must_use = "a retained user namespace requires the process to terminate"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Our own namespaces are back in place
    Restored {
        /// Status of the work unit, or of the worker process
        status: i32,
    },
    /// The user namespace was entered with setns(2) and cannot be left.
    /// The caller must terminate the process
    UserNamespaceRetained(UserNamespaceWarning),
}

impl Outcome {
    /// Status of the work unit, if the namespaces were restored
    #[must_use]
    pub const fn status(&self) -> Option<i32> {
        match self {
            Self::Restored { status } => Some(*status),
            Self::UserNamespaceRetained(_) => None,
        }
    }

    /// Whether the process has to terminate
    #[must_use]
    pub const fn must_terminate(&self) -> bool {
        matches!(self, Self::UserNamespaceRetained(_))
    }
}

/// Snapshot of a session for logging or JSON output
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionReport {
    /// Target process
    pub target_pid: ProcessId,
    /// Namespaces that are (or were) active
    pub namespaces: Vec<NamespaceKind>,
    /// Namespaces that could not be entered, with the OS error
    pub errors: BTreeMap<NamespaceKind, String>,
    /// Whether the worker asked for a retry
    pub retry: bool,
}

/// A session in the namespaces of another process
pub struct Session<B: NamespaceBackend = SystemBackend> {
    backend: B,
    config: SessionConfig,
    target_pid: ProcessId,
    target_uid: u32,
    target_gid: u32,
    tables: Tables,
    worker: Option<ForkRole>,
    errors: BTreeMap<NamespaceKind, Errno>,
    retry: bool,
    state: SessionState,
    outcome: Option<Outcome>,
}

impl Session<SystemBackend> {
    /// Open a session on the namespaces of `target_pid`
    ///
    /// # Errors
    /// Returns [`Error::InvalidNamespaces`] if `kinds` holds no known
    /// namespace, [`Error::ProcessNotFound`] if the target does not exist
    pub fn new(target_pid: ProcessId, kinds: NamespaceSet, config: SessionConfig) -> Result<Self> {
        Self::with_backend(target_pid, kinds, config, SystemBackend)
    }
}

impl<B: NamespaceBackend> Session<B> {
    /// Open a session using a custom backend
    ///
    /// # Errors
    /// See [`Session::new`]
    pub fn with_backend(
        target_pid: ProcessId,
        kinds: NamespaceSet,
        config: SessionConfig,
        backend: B,
    ) -> Result<Self> {
        let requested = kinds.known();
        if requested.is_empty() {
            return Err(Error::InvalidNamespaces { bits: kinds.bits() });
        }

        let procfs = config.procfs();
        let target = ProcEntry::Pid(target_pid);
        let (owner_uid, owner_gid) = procfs.owner(target)?;
        let tables = build_tables(&procfs, target, requested)?;

        if ignored_credentials(requested, tables.active, &config) {
            info!(
                pid = %target_pid,
                "User namespace is not active, requested credentials will not be applied"
            );
        }

        info!(
            pid = %target_pid,
            requested = %requested,
            active = %tables.active,
            "Namespace session opened"
        );

        Ok(Self {
            target_uid: config.target_uid.unwrap_or(owner_uid),
            target_gid: config.target_gid.unwrap_or(owner_gid),
            backend,
            config,
            target_pid,
            tables,
            worker: None,
            errors: BTreeMap::new(),
            retry: false,
            state: SessionState::Ready,
            outcome: None,
        })
    }

    /// Target process
    #[must_use]
    pub const fn target_pid(&self) -> ProcessId {
        self.target_pid
    }

    /// UID assumed in the user namespace
    #[must_use]
    pub const fn target_uid(&self) -> u32 {
        self.target_uid
    }

    /// GID assumed in the user namespace
    #[must_use]
    pub const fn target_gid(&self) -> u32 {
        self.target_gid
    }

    /// Active namespaces
    #[must_use]
    pub const fn namespaces(&self) -> NamespaceSet {
        self.tables.active
    }

    /// Namespaces that failed, with the OS error
    #[must_use]
    pub const fn errors(&self) -> &BTreeMap<NamespaceKind, Errno> {
        &self.errors
    }

    /// Whether the worker exited with `EAGAIN`.
    ///
    /// A narrower session (usually one without `mnt`) may succeed.
    #[must_use]
    pub const fn retry(&self) -> bool {
        self.retry
    }

    /// Lifecycle state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Configuration the session was opened with
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether the work unit would run in a forked worker
    #[must_use]
    pub const fn forks(&self) -> bool {
        self.config.fork
            || self
                .tables
                .active
                .intersects(NamespaceSet::from_bits(NamespaceSet::USER.bits() | NamespaceSet::PID.bits()))
    }

    /// Whether this is the forked worker process
    #[must_use]
    pub fn is_worker(&self) -> bool {
        self.worker == Some(ForkRole::Child)
    }

    /// Descriptors of our own namespaces
    #[must_use]
    pub const fn parent_descriptors(&self) -> &DescriptorTable {
        &self.tables.parent
    }

    /// Descriptors of the target's namespaces
    #[must_use]
    pub const fn target_descriptors(&self) -> &DescriptorTable {
        &self.tables.target
    }

    /// Snapshot for logging or JSON output
    #[must_use]
    pub fn report(&self) -> SessionReport {
        SessionReport {
            target_pid: self.target_pid,
            namespaces: self.tables.active.kinds().collect(),
            errors: self
                .errors
                .iter()
                .map(|(kind, errno)| (*kind, errno.to_string()))
                .collect(),
            retry: self.retry,
        }
    }

    /// Run `work` inside the target namespaces.
    ///
    /// Namespaces that cannot be entered are recorded in [`Session::errors`]
    /// and skipped; `work` runs as long as at least one namespace remains.
    /// When a worker is forked, the parent returns without running `work` and
    /// the outcome carries the worker's exit status. `work` may call
    /// [`Session::exit`] itself to leave early.
    ///
    /// # Errors
    /// Returns [`Error::Restore`] if returning to one of our own namespaces
    /// failed; the process must not do any further namespace work then.
    ///
    /// # Panics
    /// A panic in `work` is resumed after the namespaces have been restored.
    pub fn enter<F>(&mut self, work: F) -> Result<Outcome>
    where
        F: FnOnce(&mut Self) -> i32,
    {
        self.ensure_ready()?;
        self.state = SessionState::Entered;
        self.enter_namespaces();

        if self.tables.active.is_empty() {
            info!(pid = %self.target_pid, "No namespace could be entered, skipping work");
            return self.exit(0);
        }

        if self.forks() {
            match self.backend.fork() {
                Ok(ForkRole::Parent(child)) => {
                    debug!(%child, "Forked namespace worker");
                    self.worker = Some(ForkRole::Parent(child));
                    return self.exit(0);
                }
                Ok(ForkRole::Child) => {
                    self.worker = Some(ForkRole::Child);
                    if self.tables.active.has(NamespaceKind::User) {
                        self.assume_user();
                    }
                }
                Err(errno) => {
                    error!(%errno, "Failed to fork namespace worker");
                    return match self.exit(0)? {
                        Outcome::Restored { .. } => Err(Error::System(errno)),
                        retained => Ok(retained),
                    };
                }
            }
        }

        match panic::catch_unwind(AssertUnwindSafe(|| work(self))) {
            Ok(status) => self.exit(status),
            Err(payload) => {
                warn!(pid = %self.target_pid, "Work unit panicked, leaving namespaces");
                match self.exit(PANIC_STATUS)? {
                    Outcome::Restored { .. } => panic::resume_unwind(payload),
                    retained => Ok(retained),
                }
            }
        }
    }

    /// Leave the target namespaces and close every descriptor.
    ///
    /// In a forked worker this terminates the process with `code`. In the
    /// parent it waits for the worker first and sets [`Session::retry`] if the
    /// worker exited with `EAGAIN`. Calling `exit` again returns the same
    /// outcome.
    ///
    /// # Errors
    /// Returns [`Error::Restore`] if returning to one of our own namespaces
    /// failed, [`Error::Indeterminate`] after such a failure, or the wait
    /// error if the worker could not be reaped.
    pub fn exit(&mut self, code: i32) -> Result<Outcome> {
        match self.state {
            SessionState::Exited => {
                return Ok(self
                    .outcome
                    .clone()
                    .unwrap_or(Outcome::Restored { status: code }));
            }
            SessionState::Indeterminate => return Err(Error::Indeterminate),
            SessionState::Ready | SessionState::Entered => {}
        }

        let mut status = code;
        let mut wait_error = None;
        match self.worker {
            Some(ForkRole::Child) => self.terminate_worker(code),
            Some(ForkRole::Parent(child)) => {
                self.worker = None;
                match self.backend.wait(child) {
                    Ok(child_status) => {
                        debug!(%child, status = child_status, "Namespace worker finished");
                        status = child_status;
                        if child_status == Errno::EAGAIN as i32 {
                            info!(%child, "Worker asked for a retry");
                            self.retry = true;
                        }
                    }
                    Err(errno) => {
                        error!(%child, %errno, "Failed to wait for namespace worker");
                        wait_error = Some(errno);
                    }
                }
            }
            None => {}
        }

        let entered = self.state == SessionState::Entered;
        let retained =
            entered && self.config.true_user && self.tables.active.has(NamespaceKind::User);

        if entered && !retained {
            if let Err(err) = self.restore() {
                self.tables.close_all();
                self.state = SessionState::Indeterminate;
                return Err(err);
            }
        }

        self.tables.close_all();
        self.state = SessionState::Exited;

        let outcome = if retained {
            let warning = self.warning();
            warn!(%warning, "User namespace cannot be left");
            Outcome::UserNamespaceRetained(warning)
        } else {
            Outcome::Restored { status }
        };
        self.outcome = Some(outcome.clone());

        match wait_error {
            Some(errno) if !retained => Err(Error::System(errno)),
            _ => Ok(outcome),
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state {
            SessionState::Ready => Ok(()),
            SessionState::Indeterminate => Err(Error::Indeterminate),
            SessionState::Entered | SessionState::Exited => Err(Error::InvalidConfig {
                message: "Session has already been entered".to_string(),
            }),
        }
    }

    fn enter_namespaces(&mut self) {
        for kind in self.tables.target.open_kinds() {
            // Without true_user the user namespace is only assumed through
            // uid/gid in the worker
            if kind == NamespaceKind::User && !self.config.true_user {
                continue;
            }
            let Some(fd) = self.tables.target.fd(kind) else {
                continue;
            };

            match self.backend.enter(fd, kind) {
                Ok(()) => debug!(%kind, pid = %self.target_pid, "Entered namespace"),
                Err(errno) => {
                    warn!(%kind, %errno, pid = %self.target_pid, "Failed to enter namespace");
                    self.errors.insert(kind, errno);
                    self.tables.close(kind);
                    self.tables.active.remove(kind);
                    if kind != NamespaceKind::User {
                        self.tables.target.remove(kind);
                        self.tables.parent.remove(kind);
                    }
                }
            }
        }
    }

    fn restore(&mut self) -> Result<()> {
        for kind in self.tables.parent.open_kinds().into_iter().rev() {
            if kind == NamespaceKind::User {
                continue;
            }
            let Some(fd) = self.tables.parent.fd(kind) else {
                continue;
            };

            if let Err(errno) = self.backend.enter(fd, kind) {
                error!(
                    %kind,
                    %errno,
                    "Failed to return to original namespace, further work is impossible"
                );
                self.tables.parent.close(kind);
                self.tables.active.remove(kind);
                return Err(Error::Restore {
                    namespace: kind.name(),
                    source: errno,
                });
            }
            debug!(%kind, "Restored namespace");
        }
        Ok(())
    }

    fn assume_user(&mut self) {
        let (uid, gid) = (self.target_uid, self.target_gid);

        if let Err(errno) = self
            .backend
            .switch_credentials(uid, gid, self.config.keep_caps)
        {
            let err = Error::Credentials {
                uid,
                gid,
                source: errno,
            };
            error!(error = %err, "Namespace worker cannot continue");
            self.errors.insert(NamespaceKind::User, errno);
            self.terminate_worker(err.code());
        }
        debug!(uid, gid, "Namespace worker switched credentials");
    }

    fn terminate_worker(&mut self, code: i32) -> ! {
        debug!(code, "Namespace worker exiting");
        self.tables.close_all();
        self.backend.terminate(code)
    }

    fn warning(&self) -> UserNamespaceWarning {
        UserNamespaceWarning {
            gid: self.target_gid,
            uid: self.target_uid,
            pid: self.target_pid,
        }
    }
}

/// Whether uid/gid or keep-caps were asked for but no worker will switch to
/// them, because the user namespace was requested yet is not active
fn ignored_credentials(requested: NamespaceSet, active: NamespaceSet, config: &SessionConfig) -> bool {
    requested.has(NamespaceKind::User)
        && !active.has(NamespaceKind::User)
        && (config.target_uid.is_some() || config.target_gid.is_some() || config.keep_caps)
}

impl<B: NamespaceBackend> Drop for Session<B> {
    fn drop(&mut self) {
        if let Some(ForkRole::Parent(child)) = self.worker.take() {
            warn!(%child, "Session dropped with a running worker, reaping it");
            if let Err(errno) = self.backend.wait(child) {
                error!(%child, %errno, "Failed to reap namespace worker");
            }
        }
    }
}

impl<B: NamespaceBackend> fmt::Debug for Session<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("target_pid", &self.target_pid)
            .field("namespaces", &self.tables.active)
            .field("state", &self.state)
            .field("errors", &self.errors)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MockBackend, Terminated};
    use crate::descriptor::tests::{FAKE_PID, fake_proc};
    use std::cell::Cell;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    use crate::kind::NamespaceKind::{Cgroup, Ipc, Mnt, Net, Pid, Time, User, Uts};

    fn open(kinds: NamespaceSet, config: SessionConfig) -> (TempDir, MockBackend, Session<MockBackend>) {
        open_with(NamespaceSet::ALL, false, kinds, config)
    }

    fn open_with(
        target_kinds: NamespaceSet,
        shared_user: bool,
        kinds: NamespaceSet,
        config: SessionConfig,
    ) -> (TempDir, MockBackend, Session<MockBackend>) {
        let (dir, procfs) = fake_proc(target_kinds, shared_user);
        let backend = MockBackend::new();
        let config = config.with_proc_root(procfs.root());
        let session = Session::with_backend(FAKE_PID, kinds, config, backend.clone()).unwrap();
        (dir, backend, session)
    }

    fn assert_closed(session: &Session<MockBackend>) {
        assert!(session.parent_descriptors().is_closed());
        assert!(session.target_descriptors().is_closed());
    }

    fn terminated(result: std::thread::Result<Result<Outcome>>) -> i32 {
        let payload = result.unwrap_err();
        payload
            .downcast_ref::<Terminated>()
            .expect("worker should terminate")
            .0
    }

    #[test]
    fn test_empty_mask_fails_before_touching_procfs() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("no-proc-here");
        let config = SessionConfig::new().with_proc_root(&missing);

        let err = Session::with_backend(FAKE_PID, NamespaceSet::NONE, config, MockBackend::new())
            .unwrap_err();

        assert!(matches!(err, Error::InvalidNamespaces { bits: 0 }));
        assert!(!missing.exists());
    }

    #[test]
    fn test_credentials_ignored_without_user_namespace() {
        let wanted = NamespaceSet::USER | NamespaceSet::NET;
        let with_uid = SessionConfig::new().with_uid(65534);

        let (_dir, _backend, shared) =
            open_with(NamespaceSet::ALL, true, wanted, with_uid.clone());
        assert!(ignored_credentials(wanted, shared.namespaces(), shared.config()));

        let (_dir, _backend, separate) = open(wanted, with_uid);
        assert!(!ignored_credentials(wanted, separate.namespaces(), separate.config()));

        let (_dir, _backend, defaults) =
            open_with(NamespaceSet::ALL, true, wanted, SessionConfig::new());
        assert!(!ignored_credentials(wanted, defaults.namespaces(), defaults.config()));

        let keep_caps = SessionConfig::new().with_keep_caps(true);
        assert!(ignored_credentials(wanted, NamespaceSet::NET, &keep_caps));
        assert!(!ignored_credentials(NamespaceSet::NET, NamespaceSet::NET, &keep_caps));
    }

    #[test]
    fn test_empty_mask_is_rejected() {
        let (_dir, procfs) = fake_proc(NamespaceSet::ALL, false);
        let config = SessionConfig::new().with_proc_root(procfs.root());

        for bits in [0, 0x1, 0x8000_0000] {
            let err = Session::with_backend(
                FAKE_PID,
                NamespaceSet::from_bits(bits),
                config.clone(),
                MockBackend::new(),
            )
            .unwrap_err();
            assert!(matches!(err, Error::InvalidNamespaces { .. }));
        }
    }

    #[test]
    fn test_missing_process() {
        let (_dir, procfs) = fake_proc(NamespaceSet::ALL, false);
        let config = SessionConfig::new().with_proc_root(procfs.root());

        let err = Session::with_backend(
            ProcessId::from_raw(999_999),
            NamespaceSet::ALL,
            config,
            MockBackend::new(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::ProcessNotFound { pid: 999_999 }));
    }

    #[test]
    fn test_credentials_default_to_target_owner() {
        let (dir, _backend, session) = open(NamespaceSet::NET, SessionConfig::new());
        let meta = std::fs::metadata(dir.path().join("4242")).unwrap();

        assert_eq!(session.target_uid(), meta.uid());
        assert_eq!(session.target_gid(), meta.gid());

        let (_dir, _backend, session) = open(
            NamespaceSet::NET,
            SessionConfig::new().with_uid(1000).with_gid(1001),
        );
        assert_eq!(session.target_uid(), 1000);
        assert_eq!(session.target_gid(), 1001);
    }

    #[test]
    fn test_restore_order_is_reverse_of_entry() {
        let (_dir, backend, mut session) =
            open(NamespaceSet::ALL - NamespaceSet::USER, SessionConfig::new());

        let outcome = session.enter(|_| 0).unwrap();

        assert_eq!(outcome, Outcome::Restored { status: 0 });
        assert_eq!(
            backend.setns_calls(),
            [
                Cgroup, Ipc, Uts, Net, Pid, Mnt, Time, // entry
                Time, Mnt, Pid, Net, Uts, Ipc, Cgroup, // restoration
            ]
        );
    }

    #[test]
    fn test_in_process_work_sees_active_namespaces() {
        let (_dir, backend, mut session) = open(
            NamespaceSet::MNT | NamespaceSet::NET | NamespaceSet::UTS | NamespaceSet::IPC,
            SessionConfig::new(),
        );
        backend.fail_enter(Net, Errno::EPERM);
        backend.fail_enter(Uts, Errno::EINVAL);

        let seen = Cell::new(None);
        let outcome = session
            .enter(|s| {
                seen.set(Some(s.namespaces()));
                assert!(!s.is_worker());
                42
            })
            .unwrap();

        assert_eq!(outcome.status(), Some(42));
        assert_eq!(seen.get(), Some(NamespaceSet::MNT | NamespaceSet::IPC));
        assert_eq!(session.errors().keys().copied().collect::<Vec<_>>(), [Uts, Net]);
        assert_eq!(session.errors()[&Net], Errno::EPERM);
        assert!(!session.namespaces().has(Net));
        assert!(!session.namespaces().has(Uts));
        assert_eq!(backend.forks(), 0);
        assert_closed(&session);
    }

    #[test]
    fn test_failed_kinds_are_not_restored() {
        let (_dir, backend, mut session) =
            open(NamespaceSet::NET | NamespaceSet::MNT, SessionConfig::new());
        backend.fail_enter(Mnt, Errno::EPERM);

        let _ = session.enter(|_| 0).unwrap();

        assert_eq!(backend.setns_calls(), [Net, Mnt, Net]);
        assert!(!session.parent_descriptors().contains(Mnt));
        assert!(!session.target_descriptors().contains(Mnt));
    }

    #[test]
    fn test_work_skipped_when_nothing_entered() {
        let (_dir, backend, mut session) =
            open(NamespaceSet::NET | NamespaceSet::PID, SessionConfig::new());
        backend.fail_enter(Net, Errno::EPERM);
        backend.fail_enter(Pid, Errno::EPERM);

        let called = Cell::new(false);
        let outcome = session
            .enter(|_| {
                called.set(true);
                0
            })
            .unwrap();

        assert!(!called.get());
        assert_eq!(outcome, Outcome::Restored { status: 0 });
        assert!(session.namespaces().is_empty());
        assert_eq!(session.errors().len(), 2);
        assert_eq!(backend.forks(), 0);
        assert_eq!(session.state(), SessionState::Exited);
        assert_closed(&session);
    }

    #[test]
    fn test_exit_closes_everything_and_is_idempotent() {
        let (_dir, _backend, mut session) = open(
            NamespaceSet::NET | NamespaceSet::UTS,
            SessionConfig::new(),
        );
        assert_eq!(session.parent_descriptors().open_count(), 2);
        assert_eq!(session.target_descriptors().open_count(), 2);

        let first = session.enter(|_| 3).unwrap();
        assert_closed(&session);

        let second = session.exit(9).unwrap();
        assert_eq!(first, second);
        assert_closed(&session);
    }

    #[test]
    fn test_exit_before_enter_only_closes() {
        let (_dir, backend, mut session) = open(NamespaceSet::NET, SessionConfig::new());

        let outcome = session.exit(0).unwrap();

        assert_eq!(outcome, Outcome::Restored { status: 0 });
        assert!(backend.setns_calls().is_empty());
        assert_closed(&session);
        assert!(session.enter(|_| 0).is_err());
    }

    #[test]
    fn test_early_exit_from_work() {
        let (_dir, backend, mut session) = open(NamespaceSet::NET, SessionConfig::new());

        let outcome = session
            .enter(|s| {
                let early = s.exit(3).unwrap();
                assert_eq!(early.status(), Some(3));
                5
            })
            .unwrap();

        assert_eq!(outcome.status(), Some(3));
        assert_eq!(backend.setns_calls(), [Net, Net]);
    }

    #[test]
    fn test_panicking_work_still_restores() {
        let (_dir, backend, mut session) =
            open(NamespaceSet::NET | NamespaceSet::IPC, SessionConfig::new());

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            session.enter(|_| panic!("work unit failed"))
        }));

        assert!(result.is_err());
        assert_eq!(session.state(), SessionState::Exited);
        assert_eq!(backend.setns_calls(), [Ipc, Net, Net, Ipc]);
        assert_closed(&session);
    }

    #[test]
    fn test_parent_waits_and_sets_retry_on_eagain() {
        let (_dir, backend, mut session) =
            open(NamespaceSet::MNT | NamespaceSet::PID, SessionConfig::new());
        backend.set_child_status(Errno::EAGAIN as i32);

        let called = Cell::new(false);
        let outcome = session
            .enter(|_| {
                called.set(true);
                0
            })
            .unwrap();

        assert!(!called.get(), "parent must not run the work unit");
        assert_eq!(outcome.status(), Some(Errno::EAGAIN as i32));
        assert!(session.retry());
        assert_eq!(backend.forks(), 1);
        assert_eq!(
            backend.waited(),
            [nix::unistd::Pid::from_raw(MockBackend::CHILD_PID)]
        );
        assert_closed(&session);
    }

    #[test]
    fn test_parent_without_retry() {
        let (_dir, backend, mut session) =
            open(NamespaceSet::PID, SessionConfig::new());
        backend.set_child_status(Errno::ENOENT as i32);

        let outcome = session.enter(|_| 0).unwrap();

        assert_eq!(outcome.status(), Some(Errno::ENOENT as i32));
        assert!(!session.retry());
    }

    #[test]
    fn test_explicit_fork() {
        let (_dir, backend, mut session) =
            open(NamespaceSet::NET, SessionConfig::new().with_fork(true));

        assert!(session.forks());
        let _ = session.enter(|_| 0).unwrap();
        assert_eq!(backend.forks(), 1);
    }

    #[test]
    fn test_worker_runs_work_and_terminates() {
        let (_dir, backend, mut session) = open(
            NamespaceSet::USER | NamespaceSet::NET,
            SessionConfig::new().with_uid(1000).with_gid(100).with_keep_caps(true),
        );
        backend.set_fork_role(ForkRole::Child);

        let seen_worker = Cell::new(false);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            session.enter(|s| {
                seen_worker.set(s.is_worker());
                7
            })
        }));

        assert_eq!(terminated(result), 7);
        assert!(seen_worker.get());
        assert_eq!(backend.credentials(), Some((1000, 100, true)));
        // user is only assumed through uid/gid, never with setns(2)
        assert_eq!(backend.setns_calls(), [Net]);
        assert_closed(&session);
    }

    #[test]
    fn test_worker_credential_failure_terminates_with_errno() {
        let (_dir, backend, mut session) =
            open(NamespaceSet::USER | NamespaceSet::MNT, SessionConfig::new());
        backend.set_fork_role(ForkRole::Child);
        backend.fail_credentials(Errno::EPERM);

        let called = Cell::new(false);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            session.enter(|_| {
                called.set(true);
                0
            })
        }));

        assert_eq!(terminated(result), Errno::EPERM as i32);
        assert!(!called.get());
        assert_eq!(session.errors().get(&User), Some(&Errno::EPERM));
        assert_closed(&session);
    }

    #[test]
    fn test_parent_sees_worker_credential_failure() {
        let (_dir, backend, mut session) =
            open(NamespaceSet::USER | NamespaceSet::MNT, SessionConfig::new());
        backend.set_child_status(Errno::EPERM as i32);

        let outcome = session.enter(|_| 0).unwrap();

        assert_eq!(outcome.status(), Some(Errno::EPERM as i32));
        assert!(!session.retry());
        assert_closed(&session);
    }

    #[test]
    fn test_true_user_cannot_be_left() {
        let (_dir, backend, mut session) = open(
            NamespaceSet::USER | NamespaceSet::NET,
            SessionConfig::new().with_true_user(true).with_uid(0).with_gid(0),
        );

        let outcome = session.enter(|_| 0).unwrap();

        assert!(outcome.must_terminate());
        assert_eq!(outcome.status(), None);
        let Outcome::UserNamespaceRetained(warning) = outcome else {
            unreachable!()
        };
        assert_eq!(warning.pid, FAKE_PID);
        assert!(warning.to_string().contains("*USER*"));
        // no restoration at all
        assert_eq!(backend.setns_calls(), [Net, User]);
        assert_closed(&session);
    }

    #[test]
    fn test_true_user_entry_failure_degrades() {
        let (_dir, backend, mut session) = open(
            NamespaceSet::USER | NamespaceSet::NET,
            SessionConfig::new().with_true_user(true),
        );
        backend.fail_enter(User, Errno::EPERM);

        let outcome = session.enter(|_| 0).unwrap();

        assert_eq!(outcome, Outcome::Restored { status: 0 });
        assert_eq!(session.errors().get(&User), Some(&Errno::EPERM));
        assert!(session.parent_descriptors().contains(User));
        assert!(!session.parent_descriptors().is_open(User));
        assert_eq!(backend.forks(), 0);
        assert_eq!(backend.setns_calls(), [Net, User, Net]);
    }

    #[test]
    fn test_shared_user_namespace_is_skipped() {
        let (_dir, backend, mut session) = open_with(
            NamespaceSet::ALL,
            true,
            NamespaceSet::USER | NamespaceSet::NET,
            SessionConfig::new(),
        );

        assert_eq!(session.namespaces(), NamespaceSet::NET);
        assert!(session.errors().is_empty());
        assert!(!session.forks());

        let _ = session.enter(|_| 0).unwrap();
        assert_eq!(backend.forks(), 0);
    }

    #[test]
    fn test_restore_failure_aborts_and_poisons() {
        let (_dir, backend, mut session) = open(
            NamespaceSet::CGROUP | NamespaceSet::IPC | NamespaceSet::NET | NamespaceSet::MNT,
            SessionConfig::new(),
        );
        backend.fail_restore(Net, Errno::EINVAL);

        let err = session.enter(|_| 0).unwrap_err();

        assert!(matches!(
            err,
            Error::Restore {
                namespace: "net",
                source: Errno::EINVAL
            }
        ));
        assert!(err.to_string().contains("Further work is impossible!"));
        // ipc and cgroup are never attempted
        assert_eq!(backend.setns_calls(), [Cgroup, Ipc, Net, Mnt, Mnt, Net]);
        assert_eq!(session.state(), SessionState::Indeterminate);
        assert!(!session.namespaces().has(Net));
        assert_closed(&session);

        assert!(matches!(session.exit(0), Err(Error::Indeterminate)));
        assert!(matches!(session.enter(|_| 0), Err(Error::Indeterminate)));
    }

    #[test]
    fn test_fork_failure_restores() {
        let (_dir, backend, mut session) =
            open(NamespaceSet::PID | NamespaceSet::NET, SessionConfig::new());
        backend.fail_fork(Errno::EAGAIN);

        let err = session.enter(|_| 0).unwrap_err();

        assert!(matches!(err, Error::System(Errno::EAGAIN)));
        assert_eq!(backend.setns_calls(), [Net, Pid, Pid, Net]);
        assert_eq!(session.state(), SessionState::Exited);
        assert_closed(&session);
    }

    #[test]
    fn test_wait_failure_still_restores() {
        let (_dir, backend, mut session) = open(NamespaceSet::PID, SessionConfig::new());
        backend.fail_wait(Errno::ECHILD);

        let err = session.enter(|_| 0).unwrap_err();

        assert!(matches!(err, Error::System(Errno::ECHILD)));
        assert_eq!(backend.setns_calls(), [Pid, Pid]);
        assert_closed(&session);
    }

    #[test]
    fn test_mount_probe_retry_scenario() {
        // The worker finds no /proc and asks for a retry only when mnt was requested
        fn probe(namespaces: NamespaceSet) -> i32 {
            if namespaces.has(Mnt) {
                Errno::EAGAIN as i32
            } else {
                Errno::ENOENT as i32
            }
        }

        let wide = NamespaceSet::MNT | NamespaceSet::PID | NamespaceSet::USER;
        let (_dir, backend, mut session) = open(wide, SessionConfig::new());
        backend.set_fork_role(ForkRole::Child);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            session.enter(|s| probe(s.namespaces()))
        }));
        let worker_status = terminated(result);
        assert_eq!(worker_status, Errno::EAGAIN as i32);

        let (_dir, backend, mut session) = open(wide, SessionConfig::new());
        backend.set_child_status(worker_status);
        let _ = session.enter(|s| probe(s.namespaces())).unwrap();
        assert!(session.retry());

        let narrow = wide - NamespaceSet::MNT;
        let (_dir, backend, mut session) = open(narrow, SessionConfig::new());
        backend.set_child_status(probe(narrow));
        let _ = session.enter(|s| probe(s.namespaces())).unwrap();
        assert!(!session.retry());
    }

    #[test]
    fn test_report() {
        let (_dir, backend, mut session) =
            open(NamespaceSet::NET | NamespaceSet::UTS, SessionConfig::new());
        backend.fail_enter(Uts, Errno::EPERM);
        let _ = session.enter(|_| 0).unwrap();

        let report = session.report();
        assert_eq!(report.target_pid, FAKE_PID);
        assert_eq!(report.namespaces, [Net]);
        assert!(report.errors[&Uts].contains("EPERM"));
        assert!(!report.retry);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["namespaces"][0], "net");
        assert!(json["errors"]["uts"].is_string());
        assert_eq!(json["target_pid"], 4242);
    }

    #[test]
    fn test_drop_reaps_unwaited_worker() {
        let (_dir, backend, mut session) = open(NamespaceSet::PID, SessionConfig::new());
        session.worker = Some(ForkRole::Parent(nix::unistd::Pid::from_raw(77)));

        drop(session);

        assert_eq!(backend.waited(), [nix::unistd::Pid::from_raw(77)]);
    }
}
