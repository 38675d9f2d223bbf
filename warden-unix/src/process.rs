/// Set the group ID of the calling process.
pub fn setgid(gid: u32) -> std::io::Result<()> {
    let ret = unsafe { libc::setgid(gid) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Set the user ID of the calling process.
pub fn setuid(uid: u32) -> std::io::Result<()> {
    let ret = unsafe { libc::setuid(uid) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Switch the calling process to another identity.
///
/// Order matters: supplementary groups and the gid can only be changed while
/// the process still has the privileges it is about to give up, so the uid
/// goes last.
///
/// Only async-signal-safe calls are made, so this may run between `fork`
/// and `exec` (e.g. from `CommandExt::pre_exec`). All name lookups must have
/// happened in the parent beforehand.
pub fn switch_identity(uid: u32, gid: u32, groups: &[u32]) -> std::io::Result<()> {
    if !groups.is_empty() {
        crate::groups::setgroups(groups)?;
    }
    setgid(gid)?;
    setuid(uid)
}
