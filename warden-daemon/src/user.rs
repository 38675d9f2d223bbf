//! User resolution for services that run under another identity (Unix only).

use crate::errors::{Result, SupervisorError};

/// Identity a child process switches to before exec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedUser {
    pub uid: u32,
    pub gid: u32,
    /// Supplementary groups, looked up in the parent (empty for unknown uids).
    pub groups: Vec<u32>,
}

/// Resolve a `user:` setting.
///
/// Supported formats:
/// - `"username"`: passwd lookup, primary gid from the entry
/// - `"1000"`: numeric uid, gid defaults to the same value
/// - `"1000:1000"`: explicit uid:gid
pub fn resolve_user(user: &str) -> Result<ResolvedUser> {
    let (uid, gid) = if let Some((uid_str, gid_str)) = user.split_once(':') {
        let uid = uid_str
            .parse::<u32>()
            .map_err(|_| SupervisorError::UserNotFound(user.to_string()))?;
        let gid = gid_str
            .parse::<u32>()
            .map_err(|_| SupervisorError::GroupNotFound(gid_str.to_string()))?;
        (uid, gid)
    } else if let Ok(uid) = user.parse::<u32>() {
        (uid, uid)
    } else {
        lookup_user_by_name(user)?
    };

    Ok(ResolvedUser {
        uid,
        gid,
        groups: warden_unix::groups::groups_for_uid(uid, gid),
    })
}

fn lookup_user_by_name(username: &str) -> Result<(u32, u32)> {
    match nix::unistd::User::from_name(username) {
        Ok(Some(user)) => Ok((user.uid.as_raw(), user.gid.as_raw())),
        _ => Err(SupervisorError::UserNotFound(username.to_string())),
    }
}
