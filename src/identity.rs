use std::ffi::CString;

use nix::unistd::{self, Gid, Uid};

use crate::error::{LaunchError, LaunchResult};

/// A system user, given by name or numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User(pub String);

/// A system group, given by name or numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group(pub String);

impl From<&str> for User {
    fn from(s: &str) -> Self {
        User(s.to_owned())
    }
}
impl From<u32> for User {
    fn from(id: u32) -> Self {
        User(id.to_string())
    }
}
impl From<&str> for Group {
    fn from(s: &str) -> Self {
        Group(s.to_owned())
    }
}
impl From<u32> for Group {
    fn from(id: u32) -> Self {
        Group(id.to_string())
    }
}

/// Numeric identity the launcher switches to before touching any stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub uid: Option<Uid>,
    pub gid: Gid,
    /// Database name of the target user, used to load its supplementary groups.
    pub user_name: Option<CString>,
}

impl Credentials {
    /// Resolves names through the user/group database.
    ///
    /// Without an explicit group, the user's primary group is used. A numeric
    /// user with no database entry has no primary group, so it needs one.
    pub fn resolve(user: Option<&User>, group: Option<&Group>) -> LaunchResult<Option<Self>> {
        let entry = match user {
            Some(user) => Some(match user.0.parse::<u32>() {
                Ok(id) => {
                    let uid = Uid::from_raw(id);
                    let entry = unistd::User::from_uid(uid).map_err(|e| lookup_failed("user", &user.0, e))?;
                    (uid, entry)
                }
                Err(_) => {
                    let entry = unistd::User::from_name(&user.0)
                        .map_err(|e| lookup_failed("user", &user.0, e))?
                        .ok_or_else(|| LaunchError::Config(format!("unknown user `{}'", user.0)))?;
                    (entry.uid, Some(entry))
                }
            }),
            None => None,
        };

        let gid = match (group, &entry) {
            (Some(group), _) => match group.0.parse::<u32>() {
                Ok(id) => Gid::from_raw(id),
                Err(_) => unistd::Group::from_name(&group.0)
                    .map_err(|e| lookup_failed("group", &group.0, e))?
                    .map(|entry| entry.gid)
                    .ok_or_else(|| LaunchError::Config(format!("unknown group `{}'", group.0)))?,
            },
            (None, Some((_, Some(found)))) => found.gid,
            (None, Some((uid, None))) => {
                return Err(LaunchError::Config(format!(
                    "user {} has no passwd entry; name a group with --group",
                    uid
                )));
            }
            (None, None) => return Ok(None),
        };

        let (uid, user_name) = match entry {
            Some((uid, Some(found))) => {
                let name = CString::new(found.name)
                    .map_err(|_| LaunchError::Config(format!("user name of uid {} contains a NUL byte", uid)))?;
                (Some(uid), Some(name))
            }
            Some((uid, None)) => (Some(uid), None),
            None => (None, None),
        };

        Ok(Some(Credentials { uid, gid, user_name }))
    }

    /// Supplementary groups, then group, then user: once the uid is dropped
    /// none of them can change any more.
    pub fn switch(&self) -> LaunchResult<()> {
        if Uid::effective().is_root() {
            self.reset_groups()?;
        }
        unistd::setgid(self.gid).map_err(|e| LaunchError::syscall_on("setgid", self.gid.to_string(), e.into()))?;
        if let Some(uid) = self.uid {
            unistd::setuid(uid).map_err(|e| LaunchError::syscall_on("setuid", uid.to_string(), e.into()))?;
        }
        tracing::debug!(uid = ?self.uid, gid = %self.gid, "switched identity");
        Ok(())
    }

    /// A known user gets its own group list; otherwise only the target group is kept.
    #[cfg(not(any(target_vendor = "apple", target_os = "haiku", target_os = "redox")))]
    fn reset_groups(&self) -> LaunchResult<()> {
        match (&self.user_name, self.uid) {
            (Some(name), Some(_)) => unistd::initgroups(name, self.gid)
                .map_err(|e| LaunchError::syscall_on("initgroups", name.to_string_lossy().into_owned(), e.into())),
            _ => unistd::setgroups(&[self.gid])
                .map_err(|e| LaunchError::syscall_on("setgroups", self.gid.to_string(), e.into())),
        }
    }

    #[cfg(any(target_vendor = "apple", target_os = "haiku", target_os = "redox"))]
    fn reset_groups(&self) -> LaunchResult<()> {
        let gids = [self.gid.as_raw()];
        if unsafe { libc::setgroups(1, gids.as_ptr()) } < 0 {
            return Err(LaunchError::syscall_on("setgroups", self.gid.to_string(), std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

fn lookup_failed(kind: &str, name: &str, err: nix::Error) -> LaunchError {
    LaunchError::Config(format!("cannot look up {} `{}': {}", kind, name, err))
}
