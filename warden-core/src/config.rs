//! Runtime configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, HierarchyMode, Result};

/// Default cgroup filesystem mount point
pub const DEFAULT_CGROUP_MOUNT: &str = "/sys/fs/cgroup";

/// Default procfs mount point
pub const DEFAULT_PROC_ROOT: &str = "/proc";

/// Default group under which per-user groups live
pub const DEFAULT_ROOT_GROUP: &str = "/user.slice";

/// Default number of path segments that name a per-user group
pub const DEFAULT_GROUP_DEPTH: usize = 2;

/// Default headroom kept above live usage when clamping a memory ceiling
pub const DEFAULT_MEMORY_MARGIN_BYTES: u64 = 1000;

/// Default swap ceiling as a fraction of the memory ceiling
pub const DEFAULT_SWAP_RATIO: f64 = 0.1;

/// How the hierarchy mode is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeSetting {
    /// Detect from the mount table
    #[default]
    Auto,
    /// Force the legacy accessor
    Legacy,
    /// Force the unified accessor
    Unified,
}

impl ModeSetting {
    /// The forced mode, if any
    #[must_use]
    pub const fn forced(self) -> Option<HierarchyMode> {
        match self {
            Self::Auto => None,
            Self::Legacy => Some(HierarchyMode::Legacy),
            Self::Unified => Some(HierarchyMode::Unified),
        }
    }
}

/// Warden configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    /// Where the cgroup filesystem is mounted
    pub cgroup_mount: PathBuf,

    /// Where procfs is mounted
    pub proc_root: PathBuf,

    /// Group whose descendants are enumerated
    pub root_group: String,

    /// Number of leading path segments that name a group.
    ///
    /// Deployment specific: `/user.slice/user-1000.slice` is depth 2.
    pub group_depth: usize,

    /// Headroom above live usage when a memory ceiling is clamped
    pub memory_margin_bytes: u64,

    /// Swap ceiling as a fraction of the memory ceiling
    pub swap_ratio: f64,

    /// Hierarchy mode selection
    pub mode: ModeSetting,
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            cgroup_mount: PathBuf::from(DEFAULT_CGROUP_MOUNT),
            proc_root: PathBuf::from(DEFAULT_PROC_ROOT),
            root_group: DEFAULT_ROOT_GROUP.to_string(),
            group_depth: DEFAULT_GROUP_DEPTH,
            memory_margin_bytes: DEFAULT_MEMORY_MARGIN_BYTES,
            swap_ratio: DEFAULT_SWAP_RATIO,
            mode: ModeSetting::Auto,
        }
    }
}

impl WardenConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed, or fails validation
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content).map_err(|e| Error::InvalidConfig {
            message: format!("{}: {e}", path.display()),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration for values the accessors cannot work with
    ///
    /// # Errors
    /// Returns [`Error::InvalidConfig`] describing the first problem found
    pub fn validate(&self) -> Result<()> {
        if !self.cgroup_mount.is_absolute() {
            return Err(invalid(format!(
                "cgroup mount must be absolute: {}",
                self.cgroup_mount.display()
            )));
        }

        if !self.proc_root.is_absolute() {
            return Err(invalid(format!(
                "proc root must be absolute: {}",
                self.proc_root.display()
            )));
        }

        if !self.root_group.starts_with('/') || self.root_group.split('/').any(|s| s == "..") {
            return Err(invalid(format!("invalid root group '{}'", self.root_group)));
        }

        if self.group_depth == 0 {
            return Err(invalid("group depth must be at least 1".to_string()));
        }

        if !self.swap_ratio.is_finite() || self.swap_ratio < 0.0 {
            return Err(invalid(format!("invalid swap ratio {}", self.swap_ratio)));
        }

        Ok(())
    }
}

fn invalid(message: String) -> Error {
    Error::InvalidConfig { message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = WardenConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.group_depth, 2);
        assert_eq!(config.root_group, "/user.slice");
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = WardenConfig::default();
        config.group_depth = 0;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.swap_ratio = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.root_group = "user.slice".into();
        assert!(config.validate().is_err());

        let mut config = WardenConfig::default();
        config.proc_root = PathBuf::from("proc");
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"group_depth": 3, "mode": "legacy"}}"#).unwrap();

        let config = WardenConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.group_depth, 3);
        assert_eq!(config.mode, ModeSetting::Legacy);
        assert_eq!(config.swap_ratio, DEFAULT_SWAP_RATIO);
    }

    #[test]
    fn mode_setting_forced() {
        assert_eq!(ModeSetting::Auto.forced(), None);
        assert_eq!(ModeSetting::Unified.forced(), Some(HierarchyMode::Unified));
    }
}
