//! Username and group resolution
//!
//! Per-user groups are named `user-<uid>.slice`. Mapping a uid to a name
//! goes through the system's passwd database (`getpwuid_r`/`getpwnam_r`),
//! so accounts served by SSSD or LDAP resolve the same as local ones.

use std::collections::HashMap;

use nix::unistd::{Uid, User};

use crate::{Error, Result, UserSlice};

/// Maps numeric user ids to usernames and back
pub trait IdentityResolver: Send + Sync {
    /// Look up the username for a uid
    ///
    /// # Errors
    /// Returns [`Error::UnknownUser`] if the uid has no entry, or
    /// [`Error::System`] if the lookup itself fails
    fn username(&self, uid: u32) -> Result<String>;

    /// Look up the uid for a username
    ///
    /// # Errors
    /// Returns [`Error::UnknownUser`] if the user has no entry, or
    /// [`Error::System`] if the lookup itself fails
    fn uid(&self, username: &str) -> Result<u32>;

    /// Username owning a group path or unit name containing `user-<uid>.slice`
    ///
    /// # Errors
    /// Returns [`Error::MalformedTarget`] if no uid is encoded in the group,
    /// or the lookup error
    fn username_for_group(&self, group: &str) -> Result<String> {
        let slice = UserSlice::find_in(group).ok_or_else(|| Error::MalformedTarget {
            message: format!("cannot determine uid from '{group}'"),
        })?;
        self.username(slice.uid())
    }

    /// Per-user slice of a username
    ///
    /// # Errors
    /// Returns the lookup error if the user is unknown
    fn slice_for_username(&self, username: &str) -> Result<UserSlice> {
        self.uid(username).map(UserSlice::from_uid)
    }
}

/// Resolver backed by the system passwd database
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

impl IdentityResolver for SystemIdentity {
    fn username(&self, uid: u32) -> Result<String> {
        User::from_uid(Uid::from_raw(uid))?
            .map(|user| user.name)
            .ok_or_else(|| unknown(uid))
    }

    fn uid(&self, username: &str) -> Result<u32> {
        User::from_name(username)?
            .map(|user| user.uid.as_raw())
            .ok_or_else(|| unknown(username))
    }
}

fn unknown(user: impl ToString) -> Error {
    Error::UnknownUser {
        user: user.to_string(),
    }
}

/// Fixed uid table, for tests and isolated deployments
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    users: HashMap<u32, String>,
}

impl StaticIdentity {
    /// Create an empty table
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a user
    #[must_use]
    pub fn with_user(mut self, uid: u32, username: impl Into<String>) -> Self {
        self.users.insert(uid, username.into());
        self
    }
}

impl IdentityResolver for StaticIdentity {
    fn username(&self, uid: u32) -> Result<String> {
        self.users.get(&uid).cloned().ok_or_else(|| unknown(uid))
    }

    fn uid(&self, username: &str) -> Result<u32> {
        self.users
            .iter()
            .find_map(|(uid, name)| (name == username).then_some(*uid))
            .ok_or_else(|| unknown(username))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_identity_round_trip() {
        let identity = StaticIdentity::new().with_user(1000, "alice");

        assert_eq!(identity.username(1000).unwrap(), "alice");
        assert_eq!(identity.uid("alice").unwrap(), 1000);
        assert!(identity.username(1001).is_err());
        assert!(matches!(
            identity.uid("bob"),
            Err(Error::UnknownUser { ref user }) if user == "bob"
        ));
    }

    #[test]
    fn username_for_group_path() {
        let identity = StaticIdentity::new().with_user(1000, "alice");

        let name = identity
            .username_for_group("/user.slice/user-1000.slice")
            .unwrap();
        assert_eq!(name, "alice");

        let err = identity.username_for_group("/system.slice").unwrap_err();
        assert!(err.is_input_error());
    }

    #[test]
    fn slice_for_username() {
        let identity = StaticIdentity::new().with_user(42, "carol");
        let slice = identity.slice_for_username("carol").unwrap();
        assert_eq!(slice.to_string(), "user-42.slice");
    }

    #[test]
    fn system_identity_resolves_root() {
        let identity = SystemIdentity;
        assert_eq!(identity.username(0).unwrap(), "root");
        assert_eq!(identity.uid("root").unwrap(), 0);

        let err = identity.uid("no-such-user-on-this-host").unwrap_err();
        assert!(err.is_input_error());
    }
}
