//! Core type definitions with strong typing and validation

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Kernel resource-control ABI in use on this host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HierarchyMode {
    /// cgroup v1, one hierarchy per controller
    Legacy,
    /// cgroup v1 controllers alongside a v2 mount
    Hybrid,
    /// cgroup v2 single hierarchy
    Unified,
}

impl HierarchyMode {
    /// Whether the legacy accessor serves this mode
    ///
    /// Hybrid hosts keep their controllers on v1 mounts, so they are read
    /// through the legacy files.
    #[must_use]
    pub const fn is_legacy(self) -> bool {
        matches!(self, Self::Legacy | Self::Hybrid)
    }
}

impl fmt::Display for HierarchyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Legacy => "legacy",
            Self::Hybrid => "hybrid",
            Self::Unified => "unified",
        };
        f.write_str(name)
    }
}

/// One resource-control group, identified by its path below the hierarchy
/// root (e.g. `/user.slice/user-1000.slice`) and the mode it was read under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupHandle {
    name: String,
    mode: HierarchyMode,
}

impl GroupHandle {
    /// Create a new `GroupHandle` with validation
    ///
    /// # Errors
    /// Returns error if the name is not an absolute, normalized group path
    pub fn new(name: impl Into<String>, mode: HierarchyMode) -> Result<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self { name, mode })
    }

    /// Derive the group a process belongs to from its kernel-reported group
    /// path, keeping only the first `depth` segments
    ///
    /// `/user.slice/user-1000.slice/session-3.scope` at depth 2 becomes
    /// `/user.slice/user-1000.slice`. Paths shallower than `depth` have no
    /// group at that depth and yield `None`.
    #[must_use]
    pub fn from_process_path(path: &str, depth: usize, mode: HierarchyMode) -> Option<Self> {
        if depth == 0 {
            return None;
        }

        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        if segments.len() < depth {
            return None;
        }

        let name = format!("/{}", segments[..depth].join("/"));
        Self::new(name, mode).ok()
    }

    fn validate(name: &str) -> Result<()> {
        let Some(rest) = name.strip_prefix('/') else {
            return Err(Error::MalformedTarget {
                message: format!("group path must be absolute: '{name}'"),
            });
        };

        if rest.is_empty() {
            return Ok(());
        }

        for segment in rest.split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(Error::MalformedTarget {
                    message: format!("invalid group path segment in '{name}'"),
                });
            }
        }

        Ok(())
    }

    /// Get the group path as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Get the mode this group was read under
    #[must_use]
    pub const fn mode(&self) -> HierarchyMode {
        self.mode
    }

    /// Path relative to a hierarchy mount (no leading slash)
    #[must_use]
    pub fn relative(&self) -> &str {
        self.name.trim_start_matches('/')
    }

    /// Last path segment, which is the systemd unit name for slices
    #[must_use]
    pub fn unit_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or_default()
    }

    /// The per-user slice encoded in this group path, if any
    #[must_use]
    pub fn user_slice(&self) -> Option<UserSlice> {
        UserSlice::find_in(&self.name)
    }
}

impl fmt::Display for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A systemd per-user slice, `user-<uid>.slice`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UserSlice {
    uid: u32,
}

impl UserSlice {
    /// Create from a numeric user id
    #[must_use]
    pub const fn from_uid(uid: u32) -> Self {
        Self { uid }
    }

    /// Get the numeric user id
    #[must_use]
    pub const fn uid(self) -> u32 {
        self.uid
    }

    /// Find the innermost `user-<uid>.slice` segment in a group path
    #[must_use]
    pub fn find_in(path: &str) -> Option<Self> {
        path.rsplit('/').find_map(|segment| segment.parse().ok())
    }
}

impl fmt::Display for UserSlice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user-{}.slice", self.uid)
    }
}

impl FromStr for UserSlice {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let uid = s
            .strip_prefix("user-")
            .and_then(|rest| rest.strip_suffix(".slice"))
            .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|digits| digits.parse().ok())
            .ok_or_else(|| Error::MalformedTarget {
                message: format!("cannot determine uid from '{s}'"),
            })?;

        Ok(Self { uid })
    }
}

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(transparent)]
#[serde(transparent)]
pub struct ProcessId(i32);

impl ProcessId {
    /// Create from raw PID
    #[must_use]
    pub const fn from_raw(pid: i32) -> Self {
        Self(pid)
    }

    /// Get raw PID value
    #[must_use]
    pub const fn as_raw(self) -> i32 {
        self.0
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().parse::<i32>() {
            Ok(pid) if pid > 0 => Ok(Self(pid)),
            _ => Err(Error::process(format!("invalid pid '{s}'"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_handle_validation() {
        assert!(GroupHandle::new("/user.slice/user-1000.slice", HierarchyMode::Unified).is_ok());
        assert!(GroupHandle::new("/", HierarchyMode::Unified).is_ok());
        assert!(GroupHandle::new("user.slice", HierarchyMode::Unified).is_err());
        assert!(GroupHandle::new("/user.slice//x", HierarchyMode::Unified).is_err());
        assert!(GroupHandle::new("/user.slice/../etc", HierarchyMode::Legacy).is_err());
    }

    #[test]
    fn test_group_from_process_path() {
        let group = GroupHandle::from_process_path(
            "/user.slice/user-1000.slice/session-3.scope",
            2,
            HierarchyMode::Unified,
        )
        .unwrap();
        assert_eq!(group.as_str(), "/user.slice/user-1000.slice");
        assert_eq!(group.unit_name(), "user-1000.slice");
        assert_eq!(group.relative(), "user.slice/user-1000.slice");

        let deeper = GroupHandle::from_process_path(
            "/user.slice/user-1000.slice/session-3.scope",
            3,
            HierarchyMode::Legacy,
        )
        .unwrap();
        assert_eq!(deeper.as_str(), "/user.slice/user-1000.slice/session-3.scope");

        assert!(GroupHandle::from_process_path("/init.scope", 2, HierarchyMode::Unified).is_none());
        assert!(GroupHandle::from_process_path("/", 1, HierarchyMode::Unified).is_none());
    }

    #[test]
    fn test_user_slice_parse() {
        let slice: UserSlice = "user-1000.slice".parse().unwrap();
        assert_eq!(slice.uid(), 1000);
        assert_eq!(slice.to_string(), "user-1000.slice");

        assert!("user-.slice".parse::<UserSlice>().is_err());
        assert!("user-12a.slice".parse::<UserSlice>().is_err());
        assert!("system.slice".parse::<UserSlice>().is_err());
    }

    #[test]
    fn test_user_slice_find_in_path() {
        let found = UserSlice::find_in("/user.slice/user-42.slice/session-1.scope");
        assert_eq!(found, Some(UserSlice::from_uid(42)));
        assert_eq!(UserSlice::find_in("/system.slice/sshd.service"), None);
    }

    #[test]
    fn test_process_id_parse() {
        assert_eq!("123\n".parse::<ProcessId>().unwrap().as_raw(), 123);
        assert!("0".parse::<ProcessId>().is_err());
        assert!("abc".parse::<ProcessId>().is_err());
    }

    #[test]
    fn test_hybrid_served_by_legacy() {
        assert!(HierarchyMode::Hybrid.is_legacy());
        assert!(HierarchyMode::Legacy.is_legacy());
        assert!(!HierarchyMode::Unified.is_legacy());
    }
}
