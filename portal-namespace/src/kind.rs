//! Namespace kinds and masks
//!
//! The registry order is load-bearing: entering a user namespace changes how
//! every later permission check is made, so `user` always comes last on entry
//! and first on restoration.

use nix::sched::CloneFlags;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use portal_core::{Error, Result};

/// A Linux namespace kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NamespaceKind {
    /// cgroup namespace (since Linux 4.6)
    Cgroup,
    /// IPC namespace (since Linux 3.0)
    Ipc,
    /// UTS namespace (since Linux 3.0)
    Uts,
    /// Network namespace (since Linux 3.0)
    Net,
    /// PID namespace (since Linux 3.8)
    Pid,
    /// Mount namespace (since Linux 3.8)
    Mnt,
    /// Time namespace (since Linux 5.8)
    Time,
    /// User namespace (since Linux 3.8)
    User,
}

impl NamespaceKind {
    /// Every kind in entry order. `User` must stay last.
    pub const REGISTRY: [Self; 8] = [
        Self::Cgroup,
        Self::Ipc,
        Self::Uts,
        Self::Net,
        Self::Pid,
        Self::Mnt,
        Self::Time,
        Self::User,
    ];

    /// File name under `/proc/<pid>/ns/`
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Cgroup => "cgroup",
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::Net => "net",
            Self::Pid => "pid",
            Self::Mnt => "mnt",
            Self::Time => "time",
            Self::User => "user",
        }
    }

    /// The `CLONE_NEW*` bit for this kind
    #[must_use]
    pub const fn bit(self) -> u32 {
        match self {
            Self::Cgroup => 0x0200_0000,
            Self::Ipc => 0x0800_0000,
            Self::Uts => 0x0400_0000,
            Self::Net => 0x4000_0000,
            Self::Pid => 0x2000_0000,
            Self::Mnt => 0x0002_0000,
            Self::Time => 0x0000_0080,
            Self::User => 0x1000_0000,
        }
    }

    /// Flags to pass to setns(2)
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub fn clone_flags(self) -> CloneFlags {
        CloneFlags::from_bits_retain(self.bit() as libc::c_int)
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for NamespaceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_ascii_lowercase();
        let alias = match wanted.as_str() {
            "mount" => "mnt",
            "network" => "net",
            other => other,
        };

        Self::REGISTRY
            .into_iter()
            .find(|kind| kind.name() == alias)
            .ok_or_else(|| Error::InvalidConfig {
                message: format!("Unknown namespace type: {s:?}"),
            })
    }
}

/// Bitmask of namespace kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NamespaceSet(u32);

impl NamespaceSet {
    /// cgroup namespace
    pub const CGROUP: Self = Self(NamespaceKind::Cgroup.bit());
    /// IPC namespace
    pub const IPC: Self = Self(NamespaceKind::Ipc.bit());
    /// UTS namespace
    pub const UTS: Self = Self(NamespaceKind::Uts.bit());
    /// Network namespace
    pub const NET: Self = Self(NamespaceKind::Net.bit());
    /// PID namespace
    pub const PID: Self = Self(NamespaceKind::Pid.bit());
    /// Mount namespace
    pub const MNT: Self = Self(NamespaceKind::Mnt.bit());
    /// Time namespace
    pub const TIME: Self = Self(NamespaceKind::Time.bit());
    /// User namespace
    pub const USER: Self = Self(NamespaceKind::User.bit());

    /// All namespaces
    pub const ALL: Self = Self(
        Self::CGROUP.0
            | Self::IPC.0
            | Self::UTS.0
            | Self::NET.0
            | Self::PID.0
            | Self::MNT.0
            | Self::TIME.0
            | Self::USER.0,
    );
    /// No namespaces
    pub const NONE: Self = Self(0);

    /// Create from raw value. Unknown bits are kept until [`Self::known`]
    #[must_use]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Get raw value
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Drop bits that do not name a namespace kind
    #[must_use]
    pub const fn known(self) -> Self {
        Self(self.0 & Self::ALL.0)
    }

    /// Check if no flag is set
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Check if flag is set
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    /// Check if any flag of `other` is set
    #[must_use]
    pub const fn intersects(self, other: Self) -> bool {
        (self.0 & other.0) != 0
    }

    /// Check if a single kind is set
    #[must_use]
    pub const fn has(self, kind: NamespaceKind) -> bool {
        self.0 & kind.bit() != 0
    }

    /// Add a kind
    pub const fn insert(&mut self, kind: NamespaceKind) {
        self.0 |= kind.bit();
    }

    /// Remove a kind
    pub const fn remove(&mut self, kind: NamespaceKind) {
        self.0 &= !kind.bit();
    }

    /// Kinds present in the set, in registry order
    pub fn kinds(self) -> impl DoubleEndedIterator<Item = NamespaceKind> {
        NamespaceKind::REGISTRY
            .into_iter()
            .filter(move |kind| self.has(*kind))
    }
}

impl From<NamespaceKind> for NamespaceSet {
    fn from(kind: NamespaceKind) -> Self {
        Self(kind.bit())
    }
}

impl FromIterator<NamespaceKind> for NamespaceSet {
    fn from_iter<I: IntoIterator<Item = NamespaceKind>>(iter: I) -> Self {
        let mut set = Self::NONE;
        for kind in iter {
            set.insert(kind);
        }
        set
    }
}

impl std::ops::BitOr for NamespaceSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitAnd for NamespaceSet {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl std::ops::Sub for NamespaceSet {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 & !rhs.0)
    }
}

impl fmt::Display for NamespaceSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&describe(*self))
    }
}

impl FromStr for NamespaceSet {
    type Err = Error;

    /// Parses `mnt|pid`, `mnt,pid` or `all`
    fn from_str(s: &str) -> Result<Self> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(Self::ALL);
        }

        s.split(['|', ','])
            .filter(|part| !part.trim().is_empty())
            .map(NamespaceKind::from_str)
            .collect()
    }
}

/// Render the kinds present in `set` as `cgroup|net|user`, in registry order
#[must_use]
pub fn describe(set: NamespaceSet) -> String {
    set.kinds()
        .map(NamespaceKind::name)
        .collect::<Vec<_>>()
        .join("|")
}
