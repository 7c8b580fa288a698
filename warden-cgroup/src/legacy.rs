//! cgroup v1 accessor
//!
//! Each controller has its own hierarchy under the cgroup mount:
//! `cpuacct` for accumulated CPU time, `cpu` for CFS quota, and `memory`
//! for usage and ceilings.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};
use warden_core::resources::NSEC_PER_SEC;
use warden_core::{
    Ceiling, CpuQuota, Error, GroupHandle, HierarchyMode, IdentityResolver, MemorySize, Result,
    UsageSnapshot, WardenConfig,
};

use crate::accessor::{clamp, clamp_swap, AppliedLimit, GroupAccessor, GroupMap};
use crate::common::{self, PathSelector};

/// Accessor for the legacy (v1) hierarchy
pub struct LegacyAccessor {
    mount: PathBuf,
    proc_root: PathBuf,
    depth: usize,
    margin: u64,
    swap_ratio: f64,
    identity: Arc<dyn IdentityResolver>,
}

impl LegacyAccessor {
    /// Create an accessor from configuration
    #[must_use]
    pub fn new(config: &WardenConfig, identity: Arc<dyn IdentityResolver>) -> Self {
        Self {
            mount: config.cgroup_mount.clone(),
            proc_root: config.proc_root.clone(),
            depth: config.group_depth,
            margin: config.memory_margin_bytes,
            swap_ratio: config.swap_ratio,
            identity,
        }
    }

    fn controller_dir(&self, controller: &str, group: &str) -> PathBuf {
        self.mount
            .join(controller)
            .join(group.trim_start_matches('/'))
    }

    #[allow(clippy::cast_precision_loss)]
    async fn cpu_seconds(&self, group: &GroupHandle) -> Result<f64> {
        let path = self
            .controller_dir("cpuacct", group.as_str())
            .join("cpuacct.usage");
        let nanos: u64 = common::read_parsed(&path).await?;
        Ok(nanos as f64 / NSEC_PER_SEC as f64)
    }

    async fn cpu_quota(&self, group: &GroupHandle) -> Result<CpuQuota> {
        let dir = self.controller_dir("cpu", group.as_str());
        let quota_path = dir.join("cpu.cfs_quota_us");
        if !fs::try_exists(&quota_path).await? {
            warn!(group = %group, "No CFS quota file, reporting unconstrained");
            return Ok(CpuQuota::UNCONSTRAINED);
        }

        let quota: i64 = common::read_parsed(&quota_path).await?;
        let period: u64 = common::read_parsed(&dir.join("cpu.cfs_period_us")).await?;
        Ok(CpuQuota::from_quota_period(quota, period))
    }

    async fn memory_ceiling(&self, group: &GroupHandle) -> Result<Ceiling> {
        let path = self
            .controller_dir("memory", group.as_str())
            .join("memory.limit_in_bytes");
        common::read_parsed(&path).await.map(Ceiling::from_legacy_bytes)
    }

    fn swap_bytes(&self, limit: u64) -> u64 {
        if limit >= Ceiling::LEGACY_UNLIMITED {
            return Ceiling::LEGACY_UNLIMITED;
        }
        #[allow(
            clippy::cast_precision_loss,
            clippy::cast_possible_truncation,
            clippy::cast_sign_loss
        )]
        let extra = (limit as f64 * self.swap_ratio) as u64;
        limit.saturating_add(extra).min(Ceiling::LEGACY_UNLIMITED)
    }

    /// Write memory and memory+swap ceilings in the order the kernel
    /// accepts: memsw must never drop below the memory limit
    async fn write_limits(&self, dir: &Path, limit: u64, current: u64) -> Result<()> {
        let limit_path = dir.join("memory.limit_in_bytes");
        let memsw_path = dir.join("memory.memsw.limit_in_bytes");
        let memsw = fs::try_exists(&memsw_path)
            .await?
            .then(|| self.swap_bytes(limit));

        if limit > current {
            if let Some(memsw) = memsw {
                common::write_value(&memsw_path, memsw).await?;
            }
            common::write_value(&limit_path, limit).await?;
        } else {
            common::write_value(&limit_path, limit).await?;
            if let Some(memsw) = memsw {
                common::write_value(&memsw_path, memsw).await?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LegacyAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LegacyAccessor")
            .field("mount", &self.mount)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GroupAccessor for LegacyAccessor {
    fn mode(&self) -> HierarchyMode {
        HierarchyMode::Legacy
    }

    async fn enumerate(&self, root: &str) -> Result<GroupMap> {
        common::enumerate_groups(
            &self.controller_dir("cpuacct", root),
            &self.proc_root,
            self.depth,
            HierarchyMode::Legacy,
            PathSelector::Controller("cpuacct"),
        )
        .await
    }

    async fn snapshot(&self, group: &GroupHandle) -> Result<UsageSnapshot> {
        let cpu_seconds_total = self.cpu_seconds(group).await?;
        let cpu_quota_per_second = self.cpu_quota(group).await?;
        let memory_usage_bytes = self.memory_usage(group).await?;
        let memory_ceiling_bytes = self.memory_ceiling(group).await?;
        let owner_username = common::owner_of(&self.identity, group).await?;

        Ok(UsageSnapshot {
            cpu_seconds_total,
            cpu_quota_per_second,
            memory_usage_bytes,
            memory_ceiling_bytes,
            owner_username,
        })
    }

    async fn memory_usage(&self, group: &GroupHandle) -> Result<MemorySize> {
        let path = self
            .controller_dir("memory", group.as_str())
            .join("memory.stat");
        let stat = common::read_trimmed(&path).await?;

        common::flat_keyed(&stat, "total_rss")
            .or_else(|| common::flat_keyed(&stat, "rss"))
            .map(MemorySize::from_bytes)
            .ok_or_else(|| Error::cgroup(format!("no rss in {}", path.display())))
    }

    async fn set_memory_limits(
        &self,
        group: &GroupHandle,
        requested: Ceiling,
    ) -> Result<AppliedLimit> {
        let usage = self.memory_usage(group).await?;
        let applied = clamp(requested, usage, self.margin);

        let dir = self.controller_dir("memory", group.as_str());
        let current: u64 = common::read_parsed(&dir.join("memory.limit_in_bytes")).await?;
        let limit = applied
            .effective
            .as_bytes()
            .unwrap_or(Ceiling::LEGACY_UNLIMITED);

        self.write_limits(&dir, limit, current).await?;

        info!(
            group = %group,
            requested = %requested,
            effective = %applied.effective,
            fallback = applied.fallback,
            "Memory limits applied"
        );
        Ok(applied)
    }

    async fn set_swap_limit(
        &self,
        group: &GroupHandle,
        requested: Ceiling,
    ) -> Result<AppliedLimit> {
        let dir = self.controller_dir("memory", group.as_str());
        let memsw_path = dir.join("memory.memsw.limit_in_bytes");
        if !fs::try_exists(&memsw_path).await? {
            return Err(Error::Unsupported {
                operation: format!("swap ceiling on {group}: swap accounting is disabled"),
            });
        }

        let usage = self.memory_usage(group).await?;
        let memory_limit = self.memory_ceiling(group).await?;
        let applied = clamp_swap(requested, memory_limit, usage, self.margin);
        let memsw = applied
            .effective
            .as_bytes()
            .unwrap_or(Ceiling::LEGACY_UNLIMITED);

        common::write_value(&memsw_path, memsw).await?;

        info!(
            group = %group,
            requested = %requested,
            effective = %applied.effective,
            fallback = applied.fallback,
            "Swap limit applied"
        );
        Ok(applied)
    }

    async fn set_soft_limit(
        &self,
        group: &GroupHandle,
        requested: Ceiling,
    ) -> Result<AppliedLimit> {
        let usage = self.memory_usage(group).await?;
        let applied = clamp(requested, usage, self.margin);
        let soft = applied
            .effective
            .as_bytes()
            .unwrap_or(Ceiling::LEGACY_UNLIMITED);

        let path = self
            .controller_dir("memory", group.as_str())
            .join("memory.soft_limit_in_bytes");
        common::write_value(&path, soft).await?;

        info!(
            group = %group,
            requested = %requested,
            effective = %applied.effective,
            fallback = applied.fallback,
            "Soft limit applied"
        );
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::StaticIdentity;

    fn accessor(mount: &Path) -> LegacyAccessor {
        let config = WardenConfig {
            cgroup_mount: mount.to_path_buf(),
            ..WardenConfig::default()
        };
        LegacyAccessor::new(&config, Arc::new(StaticIdentity::new()))
    }

    #[test]
    fn swap_bytes_proportional() {
        let dir = tempfile::tempdir().unwrap();
        let legacy = accessor(dir.path());
        assert_eq!(legacy.swap_bytes(1000), 1100);
        assert_eq!(
            legacy.swap_bytes(Ceiling::LEGACY_UNLIMITED),
            Ceiling::LEGACY_UNLIMITED
        );
        assert_eq!(
            legacy.swap_bytes(Ceiling::LEGACY_UNLIMITED - 1),
            Ceiling::LEGACY_UNLIMITED
        );
    }

    #[test]
    fn controller_paths() {
        let legacy = accessor(Path::new("/sys/fs/cgroup"));
        assert_eq!(
            legacy.controller_dir("memory", "/user.slice/user-1.slice"),
            PathBuf::from("/sys/fs/cgroup/memory/user.slice/user-1.slice")
        );
    }
}
