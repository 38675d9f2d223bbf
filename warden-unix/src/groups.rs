//! Supplementary group lookup and installation.

use std::ffi::{CStr, CString};

use nix::unistd::{Gid, Uid, User};

/// Supplementary groups of the user that owns `uid`, primary `gid` included.
///
/// A uid without a passwd entry (a bare numeric `user:`) yields an empty
/// list; the caller then keeps only the primary gid.
pub fn groups_for_uid(uid: u32, gid: u32) -> Vec<u32> {
    let Ok(Some(user)) = User::from_uid(Uid::from_raw(uid)) else {
        return Vec::new();
    };
    let Ok(name) = CString::new(user.name) else {
        return Vec::new();
    };
    member_of(&name, Gid::from_raw(gid))
}

#[cfg(not(target_vendor = "apple"))]
fn member_of(name: &CStr, gid: Gid) -> Vec<u32> {
    nix::unistd::getgrouplist(name, gid)
        .map(|groups| groups.into_iter().map(Gid::as_raw).collect())
        .unwrap_or_default()
}

// nix does not expose getgrouplist on Apple targets.
#[cfg(target_vendor = "apple")]
fn member_of(_name: &CStr, gid: Gid) -> Vec<u32> {
    vec![gid.as_raw()]
}

/// Install `gids` as the supplementary groups of the calling process.
///
/// Makes no allocation, so it may run between `fork` and `exec`.
pub fn setgroups(gids: &[u32]) -> std::io::Result<()> {
    // gid_t is a u32 on every supported target.
    let ret = unsafe { libc::setgroups(gids.len() as _, gids.as_ptr().cast()) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}
