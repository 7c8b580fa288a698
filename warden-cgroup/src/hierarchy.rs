//! Kernel ABI detection and accessor selection

use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::info;
use warden_core::{Error, HierarchyMode, IdentityResolver, Result, WardenConfig};

use crate::accessor::GroupAccessor;
use crate::legacy::LegacyAccessor;
use crate::unified::UnifiedAccessor;

/// Determine the hierarchy mode from a mount table (`/proc/self/mounts`)
///
/// # Errors
/// Returns [`Error::CGroup`] if no cgroup filesystem is mounted
pub fn detect_mode(mounts: &str) -> Result<HierarchyMode> {
    let mut v1_controllers = BTreeSet::new();
    let mut has_v2 = false;

    for line in mounts.lines() {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            continue;
        }
        match parts[2] {
            "cgroup" => {
                for opt in parts[3].split(',') {
                    if matches!(opt, "cpu" | "cpuacct" | "memory") {
                        v1_controllers.insert(opt);
                    }
                }
            }
            "cgroup2" => has_v2 = true,
            _ => {}
        }
    }

    match (v1_controllers.is_empty(), has_v2) {
        (true, true) => Ok(HierarchyMode::Unified),
        (false, true) => Ok(HierarchyMode::Hybrid),
        (false, false) => Ok(HierarchyMode::Legacy),
        (true, false) => Err(Error::cgroup("no cgroup filesystem mounted")),
    }
}

/// Holds the accessor selected for the process lifetime
#[derive(Clone)]
pub struct HierarchyProvider {
    mode: HierarchyMode,
    accessor: Arc<dyn GroupAccessor>,
}

impl HierarchyProvider {
    /// Detect the mode (unless forced by configuration) and build the
    /// matching accessor
    ///
    /// # Errors
    /// Returns error if the mount table cannot be read or names no cgroup
    /// filesystem
    pub async fn detect(config: &WardenConfig, identity: Arc<dyn IdentityResolver>) -> Result<Self> {
        let mode = match config.mode.forced() {
            Some(mode) => mode,
            None => {
                let path = config.proc_root.join("self").join("mounts");
                let mounts = tokio::fs::read_to_string(&path)
                    .await
                    .map_err(|e| Error::cgroup(format!("read {}: {e}", path.display())))?;
                detect_mode(&mounts)?
            }
        };

        info!(mode = %mode, forced = config.mode.forced().is_some(), "Hierarchy mode selected");
        Ok(Self::for_mode(mode, config, identity))
    }

    /// Build the accessor for a known mode
    #[must_use]
    pub fn for_mode(
        mode: HierarchyMode,
        config: &WardenConfig,
        identity: Arc<dyn IdentityResolver>,
    ) -> Self {
        let accessor: Arc<dyn GroupAccessor> = if mode.is_legacy() {
            Arc::new(LegacyAccessor::new(config, identity))
        } else {
            Arc::new(UnifiedAccessor::new(config, identity))
        };
        Self { mode, accessor }
    }

    /// Wrap an existing accessor
    #[must_use]
    pub fn from_accessor(accessor: Arc<dyn GroupAccessor>) -> Self {
        Self {
            mode: accessor.mode(),
            accessor,
        }
    }

    /// Detected mode; hybrid is reported as such even though it is served
    /// by the legacy accessor
    #[must_use]
    pub const fn mode(&self) -> HierarchyMode {
        self.mode
    }

    /// The selected accessor
    #[must_use]
    pub fn accessor(&self) -> Arc<dyn GroupAccessor> {
        Arc::clone(&self.accessor)
    }
}

impl std::fmt::Debug for HierarchyProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchyProvider")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::{ModeSetting, StaticIdentity};

    const UNIFIED: &str = "sysfs /sys sysfs rw,nosuid 0 0
cgroup2 /sys/fs/cgroup cgroup2 rw,nosuid,nodev,noexec,relatime,nsdelegate 0 0
proc /proc proc rw 0 0";

    const LEGACY: &str = "tmpfs /sys/fs/cgroup tmpfs ro,nosuid 0 0
cgroup /sys/fs/cgroup/cpu,cpuacct cgroup rw,nosuid,cpu,cpuacct 0 0
cgroup /sys/fs/cgroup/memory cgroup rw,nosuid,memory 0 0";

    const HYBRID: &str = "cgroup2 /sys/fs/cgroup/unified cgroup2 rw,nosuid 0 0
cgroup /sys/fs/cgroup/memory cgroup rw,nosuid,memory 0 0";

    #[test]
    fn detects_each_mode() {
        assert_eq!(detect_mode(UNIFIED).unwrap(), HierarchyMode::Unified);
        assert_eq!(detect_mode(LEGACY).unwrap(), HierarchyMode::Legacy);
        assert_eq!(detect_mode(HYBRID).unwrap(), HierarchyMode::Hybrid);
        assert!(detect_mode("proc /proc proc rw 0 0").is_err());
    }

    #[test]
    fn v1_without_resource_controllers_is_not_legacy() {
        let mounts = "cgroup /sys/fs/cgroup/systemd cgroup rw,name=systemd 0 0
cgroup2 /sys/fs/cgroup/unified cgroup2 rw 0 0";
        assert_eq!(detect_mode(mounts).unwrap(), HierarchyMode::Unified);
    }

    #[test]
    fn hybrid_uses_legacy_accessor() {
        let provider = HierarchyProvider::for_mode(
            HierarchyMode::Hybrid,
            &WardenConfig::default(),
            Arc::new(StaticIdentity::new()),
        );
        assert_eq!(provider.mode(), HierarchyMode::Hybrid);
        assert_eq!(provider.accessor().mode(), HierarchyMode::Legacy);
    }

    #[tokio::test]
    async fn detect_reads_proc_mounts() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("self")).unwrap();
        std::fs::write(dir.path().join("self/mounts"), LEGACY).unwrap();

        let config = WardenConfig {
            proc_root: dir.path().to_path_buf(),
            ..WardenConfig::default()
        };
        let provider = HierarchyProvider::detect(&config, Arc::new(StaticIdentity::new()))
            .await
            .unwrap();
        assert_eq!(provider.mode(), HierarchyMode::Legacy);
    }

    #[tokio::test]
    async fn forced_mode_skips_detection() {
        let config = WardenConfig {
            proc_root: "/nonexistent".into(),
            mode: ModeSetting::Unified,
            ..WardenConfig::default()
        };
        let provider = HierarchyProvider::detect(&config, Arc::new(StaticIdentity::new()))
            .await
            .unwrap();
        assert_eq!(provider.mode(), HierarchyMode::Unified);
    }
}
