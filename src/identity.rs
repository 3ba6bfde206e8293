/*!
 * uid/gid to user/group name resolution
 *
 * The backing store identifies owners by name, while filesystem requests
 * carry numeric ids.
 */

use crate::error::{MountError, Result};

/// Resolves numeric ids to the names the backing store understands
pub trait IdentityResolver: Send + Sync {
    fn user_name(&self, uid: u32) -> Result<String>;

    fn group_name(&self, gid: u32) -> Result<String>;
}

/// Resolution through the local user and group databases
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

#[cfg(unix)]
impl IdentityResolver for SystemIdentity {
    fn user_name(&self, uid: u32) -> Result<String> {
        use nix::unistd::{Uid, User};

        User::from_uid(Uid::from_raw(uid))
            .map_err(|e| MountError::Identity(format!("uid {}: {}", uid, e)))?
            .map(|user| user.name)
            .ok_or_else(|| MountError::Identity(format!("unknown uid {}", uid)))
    }

    fn group_name(&self, gid: u32) -> Result<String> {
        use nix::unistd::{Gid, Group};

        Group::from_gid(Gid::from_raw(gid))
            .map_err(|e| MountError::Identity(format!("gid {}: {}", gid, e)))?
            .map(|group| group.name)
            .ok_or_else(|| MountError::Identity(format!("unknown gid {}", gid)))
    }
}

#[cfg(not(unix))]
impl IdentityResolver for SystemIdentity {
    fn user_name(&self, uid: u32) -> Result<String> {
        Err(MountError::Identity(format!("uid {}: no user database on this platform", uid)))
    }

    fn group_name(&self, gid: u32) -> Result<String> {
        Err(MountError::Identity(format!("gid {}: no group database on this platform", gid)))
    }
}
