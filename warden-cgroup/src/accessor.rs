//! Group accessor trait for the two hierarchy generations

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;
use warden_core::{
    Ceiling, CpuQuota, Error, GroupHandle, HierarchyMode, MemorySize, ProcessId, Result,
    UsageSnapshot,
};

/// Groups found below a root, each with its live PIDs
pub type GroupMap = HashMap<GroupHandle, BTreeSet<ProcessId>>;

/// Memory ceiling actually written by a limit mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedLimit {
    /// Ceiling written
    pub effective: Ceiling,
    /// Whether `effective` differs from the request
    pub fallback: bool,
}

/// Raise a requested ceiling to at least `usage + margin`
///
/// Removing the ceiling is never clamped.
#[must_use]
pub fn clamp(requested: Ceiling, usage: MemorySize, margin: u64) -> AppliedLimit {
    match requested {
        Ceiling::Unbounded => AppliedLimit {
            effective: Ceiling::Unbounded,
            fallback: false,
        },
        Ceiling::Bytes(bytes) => {
            let floor = usage.as_bytes().saturating_add(margin);
            let effective = bytes.max(floor);
            AppliedLimit {
                effective: Ceiling::Bytes(effective),
                fallback: effective != bytes,
            }
        }
    }
}

/// Raise a requested memory+swap ceiling to at least the group's memory
/// ceiling and `usage + margin`
///
/// The kernel rejects a memory+swap ceiling below the memory ceiling, so
/// an unbounded memory ceiling forces an unbounded memory+swap ceiling.
#[must_use]
pub fn clamp_swap(
    requested: Ceiling,
    memory_limit: Ceiling,
    usage: MemorySize,
    margin: u64,
) -> AppliedLimit {
    let applied = clamp(requested, usage, margin);
    match (applied.effective, memory_limit) {
        (Ceiling::Bytes(_), Ceiling::Unbounded) => AppliedLimit {
            effective: Ceiling::Unbounded,
            fallback: true,
        },
        (Ceiling::Bytes(bytes), Ceiling::Bytes(limit)) if bytes < limit => AppliedLimit {
            effective: Ceiling::Bytes(limit),
            fallback: true,
        },
        _ => applied,
    }
}

/// Uniform access to resource-control groups regardless of kernel ABI
///
/// Implementations:
/// - [`LegacyAccessor`](crate::LegacyAccessor) - cgroup v1 per-controller hierarchies
/// - [`UnifiedAccessor`](crate::UnifiedAccessor) - cgroup v2
/// - [`MockAccessor`] - in-memory, for tests
///
/// All implementations must be `Send + Sync`; one accessor is shared by
/// every per-group task of a collection pass.
#[async_trait]
pub trait GroupAccessor: Send + Sync {
    /// ABI this accessor reads
    fn mode(&self) -> HierarchyMode;

    /// Find every group below `root` with its live PIDs
    ///
    /// PIDs that exit during the scan are skipped.
    async fn enumerate(&self, root: &str) -> Result<GroupMap>;

    /// Read usage, quota and owner of one group
    async fn snapshot(&self, group: &GroupHandle) -> Result<UsageSnapshot>;

    /// Read resident memory usage of one group
    async fn memory_usage(&self, group: &GroupHandle) -> Result<MemorySize>;

    /// Write a memory ceiling (and proportional swap ceiling), clamped
    /// against live usage
    async fn set_memory_limits(
        &self,
        group: &GroupHandle,
        requested: Ceiling,
    ) -> Result<AppliedLimit>;

    /// Write the memory+swap ceiling alone, clamped with [`clamp_swap`]
    async fn set_swap_limit(&self, group: &GroupHandle, requested: Ceiling)
    -> Result<AppliedLimit>;

    /// Write the reclaim threshold, clamped against live usage
    async fn set_soft_limit(&self, group: &GroupHandle, requested: Ceiling)
    -> Result<AppliedLimit>;
}

/// Mock accessor for testing (doesn't touch the filesystem)
#[derive(Clone)]
pub struct MockAccessor {
    mode: HierarchyMode,
    margin: u64,
    state: Arc<Mutex<MockState>>,
}

#[derive(Default)]
struct MockState {
    groups: GroupMap,
    snapshots: HashMap<String, UsageSnapshot>,
    failing: BTreeSet<String>,
    limits: HashMap<String, Ceiling>,
    swap_limits: HashMap<String, Ceiling>,
    soft_limits: HashMap<String, Ceiling>,
    call_count: usize,
}

impl MockAccessor {
    /// Create an empty mock for `mode`
    #[must_use]
    pub fn new(mode: HierarchyMode) -> Self {
        Self {
            mode,
            margin: warden_core::config::DEFAULT_MEMORY_MARGIN_BYTES,
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Add a group with its PIDs and snapshot
    pub async fn add_group(&self, name: &str, pids: &[i32], snapshot: UsageSnapshot) -> Result<()> {
        let handle = GroupHandle::new(name, self.mode)?;
        let mut state = self.state.lock().await;
        state.groups.insert(
            handle,
            pids.iter().copied().map(ProcessId::from_raw).collect(),
        );
        state.snapshots.insert(name.to_string(), snapshot);
        Ok(())
    }

    /// Remove a group, as if its last process exited
    pub async fn remove_group(&self, name: &str) {
        let mut state = self.state.lock().await;
        state.groups.retain(|g, _| g.as_str() != name);
        state.snapshots.remove(name);
    }

    /// Make snapshots of `name` fail
    pub async fn fail_snapshot(&self, name: &str) {
        self.state.lock().await.failing.insert(name.to_string());
    }

    /// Ceiling last written to `name`
    pub async fn limit(&self, name: &str) -> Option<Ceiling> {
        self.state.lock().await.limits.get(name).copied()
    }

    /// Memory+swap ceiling last written to `name`
    pub async fn swap_limit(&self, name: &str) -> Option<Ceiling> {
        self.state.lock().await.swap_limits.get(name).copied()
    }

    /// Reclaim threshold last written to `name`
    pub async fn soft_limit(&self, name: &str) -> Option<Ceiling> {
        self.state.lock().await.soft_limits.get(name).copied()
    }

    fn require_legacy(&self, operation: &str) -> Result<()> {
        if self.mode.is_legacy() {
            Ok(())
        } else {
            Err(Error::Unsupported {
                operation: format!("{operation} on unified hierarchy"),
            })
        }
    }

    /// Number of accessor calls made
    pub async fn call_count(&self) -> usize {
        self.state.lock().await.call_count
    }
}

impl std::fmt::Debug for MockAccessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockAccessor")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl GroupAccessor for MockAccessor {
    fn mode(&self) -> HierarchyMode {
        self.mode
    }

    async fn enumerate(&self, root: &str) -> Result<GroupMap> {
        let mut state = self.state.lock().await;
        state.call_count += 1;
        Ok(state
            .groups
            .iter()
            .filter(|(g, _)| g.as_str().starts_with(root))
            .map(|(g, p)| (g.clone(), p.clone()))
            .collect())
    }

    async fn snapshot(&self, group: &GroupHandle) -> Result<UsageSnapshot> {
        let mut state = self.state.lock().await;
        state.call_count += 1;
        if state.failing.contains(group.as_str()) {
            return Err(Error::cgroup(format!("mock failure for {group}")));
        }
        state
            .snapshots
            .get(group.as_str())
            .cloned()
            .ok_or_else(|| Error::cgroup(format!("no such group {group}")))
    }

    async fn memory_usage(&self, group: &GroupHandle) -> Result<MemorySize> {
        self.snapshot(group).await.map(|s| s.memory_usage_bytes)
    }

    async fn set_memory_limits(
        &self,
        group: &GroupHandle,
        requested: Ceiling,
    ) -> Result<AppliedLimit> {
        self.require_legacy("set_memory_limits")?;

        let usage = self.memory_usage(group).await?;
        let applied = clamp(requested, usage, self.margin);

        let mut state = self.state.lock().await;
        state.call_count += 1;
        state.limits.insert(group.to_string(), applied.effective);

        tracing::debug!(group = %group, effective = %applied.effective, "Mock: Set memory limits");
        Ok(applied)
    }

    async fn set_swap_limit(
        &self,
        group: &GroupHandle,
        requested: Ceiling,
    ) -> Result<AppliedLimit> {
        self.require_legacy("set_swap_limit")?;

        let snapshot = self.snapshot(group).await?;
        let mut state = self.state.lock().await;
        state.call_count += 1;
        let memory_limit = state
            .limits
            .get(group.as_str())
            .copied()
            .unwrap_or(snapshot.memory_ceiling_bytes);
        let applied = clamp_swap(requested, memory_limit, snapshot.memory_usage_bytes, self.margin);
        state.swap_limits.insert(group.to_string(), applied.effective);

        tracing::debug!(group = %group, effective = %applied.effective, "Mock: Set swap limit");
        Ok(applied)
    }

    async fn set_soft_limit(
        &self,
        group: &GroupHandle,
        requested: Ceiling,
    ) -> Result<AppliedLimit> {
        self.require_legacy("set_soft_limit")?;

        let usage = self.memory_usage(group).await?;
        let applied = clamp(requested, usage, self.margin);

        let mut state = self.state.lock().await;
        state.call_count += 1;
        state.soft_limits.insert(group.to_string(), applied.effective);

        tracing::debug!(group = %group, effective = %applied.effective, "Mock: Set soft limit");
        Ok(applied)
    }
}

/// Snapshot with the given usage, for tests
#[must_use]
pub fn test_snapshot(owner: &str, cpu_seconds: f64, memory_bytes: u64) -> UsageSnapshot {
    UsageSnapshot {
        cpu_seconds_total: cpu_seconds,
        cpu_quota_per_second: CpuQuota::UNCONSTRAINED,
        memory_usage_bytes: MemorySize::from_bytes(memory_bytes),
        memory_ceiling_bytes: Ceiling::Unbounded,
        owner_username: owner.to_string(),
    }
}
