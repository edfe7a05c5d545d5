//! Namespace file descriptors
//!
//! A session holds two tables: the caller's own namespaces ("parent") and the
//! target process's namespaces. They are kept in lockstep so that every kind
//! that gets entered can also be restored.

use std::fs::OpenOptions;
use std::os::fd::{AsFd, BorrowedFd, OwnedFd};
use std::os::unix::fs::OpenOptionsExt;

use portal_core::{Error, ProcEntry, Result};
use tracing::debug;

use crate::kind::{NamespaceKind, NamespaceSet};
use crate::procfs::ProcFs;

/// Open a namespace file read-only, non-blocking and close-on-exec.
///
/// Any OS failure yields `None`; callers decide whether a missing kind matters.
#[must_use]
pub fn open_descriptor(procfs: &ProcFs, entry: ProcEntry, kind: NamespaceKind) -> Option<OwnedFd> {
    let path = procfs.ns_path(entry, kind);

    // std always adds O_CLOEXEC
    match OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK | libc::O_NOCTTY)
        .open(&path)
    {
        Ok(file) => Some(OwnedFd::from(file)),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Cannot open namespace file");
            None
        }
    }
}

/// Ordered mapping from namespace kind to an optional descriptor
///
/// Slots stay in registry order. A slot holding `None` is a kind whose
/// descriptor failed to open or has been closed.
#[derive(Debug, Default)]
pub struct DescriptorTable {
    slots: Vec<(NamespaceKind, Option<OwnedFd>)>,
}

impl DescriptorTable {
    /// Create an empty table
    #[must_use]
    pub const fn new() -> Self {
        Self { slots: Vec::new() }
    }

    /// Insert or replace the slot for `kind`, keeping registry order
    pub fn insert(&mut self, kind: NamespaceKind, fd: Option<OwnedFd>) {
        match self.slots.binary_search_by_key(&kind, |(k, _)| *k) {
            Ok(i) => self.slots[i].1 = fd,
            Err(i) => self.slots.insert(i, (kind, fd)),
        }
    }

    /// Whether the table has a slot for `kind`, open or not
    #[must_use]
    pub fn contains(&self, kind: NamespaceKind) -> bool {
        self.slots.iter().any(|(k, _)| *k == kind)
    }

    /// Whether the slot for `kind` holds an open descriptor
    #[must_use]
    pub fn is_open(&self, kind: NamespaceKind) -> bool {
        self.fd(kind).is_some()
    }

    /// Borrow the descriptor for `kind`
    #[must_use]
    pub fn fd(&self, kind: NamespaceKind) -> Option<BorrowedFd<'_>> {
        self.slots
            .iter()
            .find(|(k, _)| *k == kind)
            .and_then(|(_, fd)| fd.as_ref())
            .map(AsFd::as_fd)
    }

    /// Close the descriptor for `kind`, keeping an empty slot.
    ///
    /// Closing an empty or missing slot is a no-op.
    pub fn close(&mut self, kind: NamespaceKind) {
        if let Some((_, fd)) = self.slots.iter_mut().find(|(k, _)| *k == kind) {
            drop(fd.take());
        }
    }

    /// Close the descriptor for `kind` and drop its slot
    pub fn remove(&mut self, kind: NamespaceKind) {
        self.slots.retain(|(k, _)| *k != kind);
    }

    /// Close every descriptor, keeping the slots
    pub fn close_all(&mut self) {
        for (_, fd) in &mut self.slots {
            drop(fd.take());
        }
    }

    /// Kinds with a slot, in registry order
    pub fn kinds(&self) -> impl DoubleEndedIterator<Item = NamespaceKind> + '_ {
        self.slots.iter().map(|(kind, _)| *kind)
    }

    /// Kinds with an open descriptor, in registry order
    #[must_use]
    pub fn open_kinds(&self) -> Vec<NamespaceKind> {
        self.slots
            .iter()
            .filter(|(_, fd)| fd.is_some())
            .map(|(kind, _)| *kind)
            .collect()
    }

    /// Number of open descriptors
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.slots.iter().filter(|(_, fd)| fd.is_some()).count()
    }

    /// Whether every slot is closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.open_count() == 0
    }

    /// Number of slots
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the table has no slots
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Parent and target descriptor tables for one session
#[derive(Debug, Default)]
pub struct Tables {
    /// The caller's own namespaces
    pub parent: DescriptorTable,
    /// The target process's namespaces
    pub target: DescriptorTable,
    /// Kinds for which both descriptors were obtained
    pub active: NamespaceSet,
}

impl Tables {
    /// Close both descriptors for `kind`, keeping the slots
    pub fn close(&mut self, kind: NamespaceKind) {
        self.target.close(kind);
        self.parent.close(kind);
    }

    /// Close every descriptor in both tables
    pub fn close_all(&mut self) {
        self.parent.close_all();
        self.target.close_all();
    }

    /// Whether both tables are fully closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.parent.is_closed() && self.target.is_closed()
    }
}

/// Whether setns(2) may be used for the target's user namespace.
///
/// Re-entering the caller's current user namespace is refused by the kernel,
/// so identical namespaces (or ones that cannot be inspected) are disallowed.
fn user_namespace_enterable(procfs: &ProcFs, target: ProcEntry) -> Result<bool> {
    if !procfs.exists(ProcEntry::Current) {
        return Err(Error::System(nix::errno::Errno::ESRCH));
    }
    if !procfs.exists(target) {
        return Err(process_not_found(target));
    }

    let ours = procfs.ns_identity(ProcEntry::Current, NamespaceKind::User);
    let theirs = procfs.ns_identity(target, NamespaceKind::User);

    match (ours, theirs) {
        (Ok(ours), Ok(theirs)) => Ok(ours != theirs),
        _ => Ok(false),
    }
}

fn process_not_found(target: ProcEntry) -> Error {
    match target {
        ProcEntry::Pid(pid) => Error::ProcessNotFound { pid: pid.as_raw() },
        ProcEntry::Current => Error::System(nix::errno::Errno::ESRCH),
    }
}

/// Open parent and target descriptors for every requested kind.
///
/// Fails before opening anything if the target process does not exist.
pub fn build_tables(procfs: &ProcFs, target: ProcEntry, requested: NamespaceSet) -> Result<Tables> {
    if !procfs.exists(ProcEntry::Current) {
        return Err(process_not_found(ProcEntry::Current));
    }
    if !procfs.exists(target) {
        return Err(process_not_found(target));
    }

    let mut tables = Tables::default();

    for kind in requested.kinds() {
        tables
            .parent
            .insert(kind, open_descriptor(procfs, ProcEntry::Current, kind));
    }

    if requested.has(NamespaceKind::User) && !user_namespace_enterable(procfs, target)? {
        debug!(%target, "Target shares our user namespace, skipping it");
        tables.parent.remove(NamespaceKind::User);
    }

    let candidates: Vec<_> = tables.parent.kinds().collect();
    for kind in candidates {
        if !tables.parent.is_open(kind) {
            tables.target.insert(kind, None);
            continue;
        }

        match open_descriptor(procfs, target, kind) {
            Some(fd) => {
                tables.target.insert(kind, Some(fd));
                tables.active.insert(kind);
            }
            None => {
                tables.target.insert(kind, None);
                tables.parent.close(kind);
            }
        }
    }

    debug!(
        %target,
        requested = %requested,
        active = %tables.active,
        "Namespace descriptors opened"
    );

    Ok(tables)
}
