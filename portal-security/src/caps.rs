//! Raw capget(2)/capset(2) for the calling thread

#![allow(unsafe_code)]

use nix::errno::Errno;
use tracing::debug;

const LINUX_CAPABILITY_VERSION_3: u32 = 0x2008_0522;

#[repr(C)]
struct CapUserHeader {
    version: u32,
    pid: libc::c_int,
}

#[repr(C)]
#[derive(Clone, Copy, Default)]
struct CapUserData {
    effective: u32,
    permitted: u32,
    inheritable: u32,
}

/// Capability sets of the calling thread, 64 bits each
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySets {
    /// Capabilities in effect
    pub effective: u64,
    /// Capabilities the thread may make effective
    pub permitted: u64,
    /// Capabilities preserved across execve(2)
    pub inheritable: u64,
}

impl CapabilitySets {
    fn from_raw(data: [CapUserData; 2]) -> Self {
        let join = |low: u32, high: u32| u64::from(low) | (u64::from(high) << 32);
        Self {
            effective: join(data[0].effective, data[1].effective),
            permitted: join(data[0].permitted, data[1].permitted),
            inheritable: join(data[0].inheritable, data[1].inheritable),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn into_raw(self) -> [CapUserData; 2] {
        let split = |set: u64| (set as u32, (set >> 32) as u32);
        let (e0, e1) = split(self.effective);
        let (p0, p1) = split(self.permitted);
        let (i0, i1) = split(self.inheritable);
        [
            CapUserData { effective: e0, permitted: p0, inheritable: i0 },
            CapUserData { effective: e1, permitted: p1, inheritable: i1 },
        ]
    }
}

fn header() -> CapUserHeader {
    CapUserHeader {
        version: LINUX_CAPABILITY_VERSION_3,
        pid: 0,
    }
}

/// Read the capability sets of the calling thread
///
/// # Errors
/// Returns the OS error of capget(2)
pub fn read_capabilities() -> nix::Result<CapabilitySets> {
    let mut header = header();
    let mut data = [CapUserData::default(); 2];

    // SAFETY: header and data are valid for the v3 layout (two data structs)
    let res = unsafe {
        libc::syscall(
            libc::SYS_capget,
            &raw mut header,
            data.as_mut_ptr(),
        )
    };
    Errno::result(res)?;

    Ok(CapabilitySets::from_raw(data))
}

fn write_capabilities(sets: CapabilitySets) -> nix::Result<()> {
    let mut header = header();
    let data = sets.into_raw();

    // SAFETY: header and data are valid for the v3 layout (two data structs)
    let res = unsafe {
        libc::syscall(
            libc::SYS_capset,
            &raw mut header,
            data.as_ptr(),
        )
    };
    Errno::result(res).map(drop)
}

/// Make every permitted capability effective
///
/// # Errors
/// Returns the OS error of capget(2) or capset(2)
pub fn raise_effective() -> nix::Result<CapabilitySets> {
    let mut sets = read_capabilities()?;
    if sets.effective != sets.permitted {
        sets.effective = sets.permitted;
        write_capabilities(sets)?;
        debug!(effective = format_args!("{:#x}", sets.effective), "Raised effective capabilities");
    }
    Ok(sets)
}
