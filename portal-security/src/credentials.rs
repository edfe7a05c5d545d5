//! Assuming the credentials of a target process

use nix::sys::prctl;
use nix::unistd::{Gid, Uid, setgid, setuid};
use tracing::{debug, warn};

use crate::caps;

/// Switch to `gid` then `uid`
///
/// Capabilities are lost on the way, as usual for a uid change away from 0.
///
/// # Errors
/// Returns the OS error of the failing setgid(2)/setuid(2)
pub fn switch_credentials(uid: u32, gid: u32) -> nix::Result<()> {
    setgid(Gid::from_raw(gid))?;
    setuid(Uid::from_raw(uid))?;
    debug!(uid, gid, "Switched credentials");
    Ok(())
}

/// Switch to `gid` then `uid`, keeping the permitted capabilities and making
/// them effective again
///
/// # Errors
/// Returns the OS error of the failing prctl(2), setgid(2), setuid(2) or
/// capset(2)
pub fn switch_credentials_keep_caps(uid: u32, gid: u32) -> nix::Result<()> {
    prctl::set_keepcaps(true)?;
    let switched = switch_credentials(uid, gid);

    if let Err(errno) = prctl::set_keepcaps(false) {
        warn!(%errno, "Failed to reset keep-capabilities flag");
    }
    switched?;

    let sets = caps::raise_effective()?;
    debug!(uid, gid, permitted = format_args!("{:#x}", sets.permitted), "Kept capabilities");
    Ok(())
}
