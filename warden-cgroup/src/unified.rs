//! cgroup v2 accessor

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::debug;
use warden_core::resources::USEC_PER_SEC;
use warden_core::{
    Ceiling, CpuQuota, Error, GroupHandle, HierarchyMode, IdentityResolver, MemorySize, Result,
    UsageSnapshot, WardenConfig,
};

use crate::accessor::{AppliedLimit, GroupAccessor, GroupMap};
use crate::common::{self, PathSelector};

/// Accessor for the unified (v2) hierarchy
///
/// Read-only: memory ceilings on v2 hosts are changed through the unit
/// manager so its view of the slice stays authoritative.
pub struct UnifiedAccessor {
    mount: PathBuf,
    proc_root: PathBuf,
    depth: usize,
    identity: Arc<dyn IdentityResolver>,
}

impl UnifiedAccessor {
    /// Create an accessor from configuration
    #[must_use]
    pub fn new(config: &WardenConfig, identity: Arc<dyn IdentityResolver>) -> Self {
        Self {
            mount: config.cgroup_mount.clone(),
            proc_root: config.proc_root.clone(),
            depth: config.group_depth,
            identity,
        }
    }

    fn group_dir(&self, group: &str) -> PathBuf {
        self.mount.join(group.trim_start_matches('/'))
    }

    #[allow(clippy::cast_precision_loss)]
    async fn cpu_seconds(&self, group: &GroupHandle) -> Result<f64> {
        let path = self.group_dir(group.as_str()).join("cpu.stat");
        let stat = common::read_trimmed(&path).await?;
        let usec = common::flat_keyed(&stat, "usage_usec")
            .ok_or_else(|| Error::cgroup(format!("no usage_usec in {}", path.display())))?;
        Ok(usec as f64 / USEC_PER_SEC as f64)
    }

    async fn cpu_quota(&self, group: &GroupHandle) -> Result<CpuQuota> {
        let path = self.group_dir(group.as_str()).join("cpu.max");
        if !fs::try_exists(&path).await? {
            // cpu controller not enabled for this subtree
            debug!(group = %group, "No cpu.max, reporting unconstrained");
            return Ok(CpuQuota::UNCONSTRAINED);
        }

        let value = common::read_trimmed(&path).await?;
        parse_cpu_max(&value)
            .ok_or_else(|| Error::cgroup(format!("unexpected cpu.max '{value}' for {group}")))
    }

    async fn memory_ceiling(&self, group: &GroupHandle) -> Result<Ceiling> {
        let path = self.group_dir(group.as_str()).join("memory.max");
        if !fs::try_exists(&path).await? {
            return Ok(Ceiling::Unbounded);
        }

        let value = common::read_trimmed(&path).await?;
        parse_memory_max(&value)
            .ok_or_else(|| Error::cgroup(format!("unexpected memory.max '{value}' for {group}")))
    }
}

/// Parse `cpu.max`: `<quota|max> <period>`
fn parse_cpu_max(value: &str) -> Option<CpuQuota> {
    let mut parts = value.split_whitespace();
    let quota = parts.next()?;
    let period: u64 = parts.next().map_or(Some(100_000), |p| p.parse().ok())?;

    if quota == "max" {
        return Some(CpuQuota::UNCONSTRAINED);
    }
    Some(CpuQuota::from_quota_period(quota.parse().ok()?, period))
}

/// Parse `memory.max`: `max` or a byte count
fn parse_memory_max(value: &str) -> Option<Ceiling> {
    if value == "max" {
        Some(Ceiling::Unbounded)
    } else {
        value.parse().ok().map(Ceiling::Bytes)
    }
}

impl std::fmt::Debug for UnifiedAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnifiedAccessor")
            .field("mount", &self.mount)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GroupAccessor for UnifiedAccessor {
    fn mode(&self) -> HierarchyMode {
        HierarchyMode::Unified
    }

    async fn enumerate(&self, root: &str) -> Result<GroupMap> {
        common::enumerate_groups(
            &self.group_dir(root),
            &self.proc_root,
            self.depth,
            HierarchyMode::Unified,
            PathSelector::Unified,
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
        let path = self.group_dir(group.as_str()).join("memory.current");
        common::read_parsed(&path).await.map(MemorySize::from_bytes)
    }

    async fn set_memory_limits(
        &self,
        _group: &GroupHandle,
        _requested: Ceiling,
    ) -> Result<AppliedLimit> {
        Err(Error::Unsupported {
            operation: "set_memory_limits on unified hierarchy".to_string(),
        })
    }

    async fn set_swap_limit(
        &self,
        _group: &GroupHandle,
        _requested: Ceiling,
    ) -> Result<AppliedLimit> {
        Err(Error::Unsupported {
            operation: "set_swap_limit on unified hierarchy".to_string(),
        })
    }

    async fn set_soft_limit(
        &self,
        _group: &GroupHandle,
        _requested: Ceiling,
    ) -> Result<AppliedLimit> {
        Err(Error::Unsupported {
            operation: "set_soft_limit on unified hierarchy".to_string(),
        })
    }
}
