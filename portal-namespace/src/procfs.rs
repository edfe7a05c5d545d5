//! Paths and lookups under `/proc`

use std::fmt;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use portal_core::{Error, ProcEntry, Result};

use crate::kind::NamespaceKind;

/// Default procfs mount point
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// A procfs mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcFs {
    root: PathBuf,
}

impl Default for ProcFs {
    fn default() -> Self {
        Self::new(DEFAULT_PROC_ROOT)
    }
}

impl ProcFs {
    /// Use a procfs mounted at `root`
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Mount point
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `/proc/<pid>`
    #[must_use]
    pub fn process_dir(&self, entry: ProcEntry) -> PathBuf {
        self.root.join(entry.to_string())
    }

    /// `/proc/<pid>/ns/<kind>`
    #[must_use]
    pub fn ns_path(&self, entry: ProcEntry, kind: NamespaceKind) -> PathBuf {
        self.process_dir(entry).join("ns").join(kind.name())
    }

    /// Whether `/proc/<pid>` exists
    #[must_use]
    pub fn exists(&self, entry: ProcEntry) -> bool {
        self.process_dir(entry).is_dir()
    }

    /// Owner (uid, gid) of `/proc/<pid>`
    pub fn owner(&self, entry: ProcEntry) -> Result<(u32, u32)> {
        let meta = fs::metadata(self.process_dir(entry)).map_err(|e| match (e.kind(), entry) {
            (std::io::ErrorKind::NotFound, ProcEntry::Pid(pid)) => Error::ProcessNotFound {
                pid: pid.as_raw(),
            },
            _ => Error::Io(e),
        })?;

        Ok((meta.uid(), meta.gid()))
    }

    /// Identity (device, inode) of a namespace file
    pub fn ns_identity(&self, entry: ProcEntry, kind: NamespaceKind) -> Result<(u64, u64)> {
        let meta = fs::metadata(self.ns_path(entry, kind))?;
        Ok((meta.dev(), meta.ino()))
    }
}

/// Read the `ns/<kind>` links of a process, e.g. `net:[4026531840]`
///
/// Kinds the kernel does not expose come back as `None`.
#[must_use]
pub fn namespace_links(procfs: &ProcFs, entry: ProcEntry) -> NamespaceLinks {
    let links = NamespaceKind::REGISTRY
        .into_iter()
        .map(|kind| {
            let link = fs::read_link(procfs.ns_path(entry, kind))
                .map(|p| p.to_string_lossy().into_owned())
                .ok();
            (kind, link)
        })
        .collect();

    NamespaceLinks { links }
}

/// Namespace identities of one process, in registry order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceLinks {
    links: Vec<(NamespaceKind, Option<String>)>,
}

impl NamespaceLinks {
    /// Link text for one kind
    #[must_use]
    pub fn get(&self, kind: NamespaceKind) -> Option<&str> {
        self.links
            .iter()
            .find(|(k, _)| *k == kind)
            .and_then(|(_, link)| link.as_deref())
    }

    /// All kinds with their link text
    pub fn iter(&self) -> impl Iterator<Item = (NamespaceKind, Option<&str>)> {
        self.links.iter().map(|(kind, link)| (*kind, link.as_deref()))
    }

    /// Kinds whose identity differs from `other`
    #[must_use]
    pub fn differing(&self, other: &Self) -> Vec<NamespaceKind> {
        self.iter()
            .filter(|(kind, link)| link.is_some() && *link != other.get(*kind))
            .map(|(kind, _)| kind)
            .collect()
    }
}

impl fmt::Display for NamespaceLinks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Namespace Info:")?;
        for (kind, link) in self.iter() {
            if let Some(link) = link {
                let label = format!("{}:", kind.name().to_ascii_uppercase());
                writeln!(f, "  {label:<8}{link}")?;
            }
        }
        Ok(())
    }
}
