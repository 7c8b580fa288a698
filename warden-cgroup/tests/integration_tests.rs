use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;
use warden_cgroup::*;
use warden_core::*;
use warden_proc::{ProcessSampler, ProcfsReader};

const GROUP: &str = "/user.slice/user-1000.slice";

/// Fake cgroup mount and procfs under one temporary directory
struct Fixture {
    _dir: TempDir,
    cgroup: PathBuf,
    proc_root: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cgroup = dir.path().join("cgroup");
        let proc_root = dir.path().join("proc");
        std::fs::create_dir_all(&cgroup).unwrap();
        std::fs::create_dir_all(&proc_root).unwrap();
        Self {
            _dir: dir,
            cgroup,
            proc_root,
        }
    }

    fn write(&self, base: &Path, rel: &str, content: &str) {
        let path = base.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    fn cg(&self, rel: &str, content: &str) {
        self.write(&self.cgroup, rel, content);
    }

    fn process(&self, pid: i32, comm: &str, utime: u64, rss_pages: u64, cgroup: &str) {
        self.write(&self.proc_root, &format!("{pid}/cgroup"), cgroup);
        self.write(&self.proc_root, &format!("{pid}/comm"), &format!("{comm}\n"));
        self.write(
            &self.proc_root,
            &format!("{pid}/stat"),
            &format!(
                "{pid} ({comm}) S 1 {pid} {pid} 0 -1 0 0 0 0 0 {utime} 0 0 0 20 0 1 0 0 0 {rss_pages} 0"
            ),
        );
    }

    fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.cgroup.join(rel)).unwrap()
    }

    fn config(&self) -> WardenConfig {
        WardenConfig {
            cgroup_mount: self.cgroup.clone(),
            proc_root: self.proc_root.clone(),
            ..WardenConfig::default()
        }
    }

    fn identity() -> Arc<dyn IdentityResolver> {
        Arc::new(StaticIdentity::new().with_user(1000, "alice"))
    }

    fn unified() -> Self {
        let fx = Self::new();
        fx.cg("user.slice/cgroup.procs", "");
        fx.cg("user.slice/user-1000.slice/cgroup.procs", "");
        fx.cg(
            "user.slice/user-1000.slice/session-1.scope/cgroup.procs",
            "100\n101\n",
        );
        fx.cg(
            "user.slice/user-1000.slice/cpu.stat",
            "usage_usec 2500000\nuser_usec 2000000\nsystem_usec 500000\n",
        );
        fx.cg("user.slice/user-1000.slice/memory.current", "4096\n");
        fx.cg("user.slice/user-1000.slice/memory.max", "max\n");
        fx.cg("user.slice/user-1000.slice/cpu.max", "50000 100000\n");
        // PID 101 exited between the procs read and the lookup
        fx.process(
            100,
            "python",
            250,
            2,
            "0::/user.slice/user-1000.slice/session-1.scope\n",
        );
        fx
    }

    fn legacy() -> Self {
        let fx = Self::new();
        let g = "user.slice/user-1000.slice";
        fx.cg(&format!("cpuacct/{g}/cgroup.procs"), "200\n");
        fx.cg(&format!("cpuacct/{g}/cpuacct.usage"), "3000000000\n");
        fx.cg(&format!("cpu/{g}/cpu.cfs_quota_us"), "-1\n");
        fx.cg(&format!("cpu/{g}/cpu.cfs_period_us"), "100000\n");
        fx.cg(
            &format!("memory/{g}/memory.stat"),
            "cache 0\nrss 100\ntotal_rss 8192\n",
        );
        fx.cg(
            &format!("memory/{g}/memory.limit_in_bytes"),
            "9223372036854771712\n",
        );
        fx.cg(
            &format!("memory/{g}/memory.memsw.limit_in_bytes"),
            "9223372036854771712\n",
        );
        fx.cg(
            &format!("memory/{g}/memory.soft_limit_in_bytes"),
            "9223372036854771712\n",
        );
        fx.process(
            200,
            "bash",
            100,
            1,
            "5:memory:/user.slice/user-1000.slice\n4:cpu,cpuacct:/user.slice/user-1000.slice/session-4.scope\n",
        );
        fx
    }
}

fn group(mode: HierarchyMode) -> GroupHandle {
    GroupHandle::new(GROUP, mode).unwrap()
}

#[tokio::test]
async fn test_unified_enumerate_skips_vanished_pids() {
    let fx = Fixture::unified();
    let accessor = UnifiedAccessor::new(&fx.config(), Fixture::identity());

    let groups = accessor.enumerate("/user.slice").await.unwrap();
    assert_eq!(groups.len(), 1);

    let pids = &groups[&group(HierarchyMode::Unified)];
    assert_eq!(pids.iter().map(|p| p.as_raw()).collect::<Vec<_>>(), vec![100]);
}

#[tokio::test]
async fn test_unified_snapshot() {
    let fx = Fixture::unified();
    let accessor = UnifiedAccessor::new(&fx.config(), Fixture::identity());

    let snapshot = accessor.snapshot(&group(HierarchyMode::Unified)).await.unwrap();
    assert_eq!(snapshot.cpu_seconds_total, 2.5);
    assert_eq!(snapshot.cpu_quota_per_second.as_usec_per_sec(), 500_000);
    assert_eq!(snapshot.memory_usage_bytes.as_bytes(), 4096);
    assert!(snapshot.memory_ceiling_bytes.is_unbounded());
    assert_eq!(snapshot.owner_username, "alice");
}

#[tokio::test]
async fn test_unified_unknown_owner_fails_snapshot() {
    let fx = Fixture::unified();
    let accessor = UnifiedAccessor::new(&fx.config(), Arc::new(StaticIdentity::new()));

    let err = accessor
        .snapshot(&group(HierarchyMode::Unified))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::UnknownUser { .. }));
}

#[tokio::test]
async fn test_unified_direct_mutation_unsupported() {
    let fx = Fixture::unified();
    let accessor = UnifiedAccessor::new(&fx.config(), Fixture::identity());

    let err = accessor
        .set_memory_limits(&group(HierarchyMode::Unified), Ceiling::Bytes(1 << 20))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
    assert_eq!(fx.read("user.slice/user-1000.slice/memory.max"), "max\n");
}

#[tokio::test]
async fn test_legacy_enumerate_and_snapshot() {
    let fx = Fixture::legacy();
    let accessor = LegacyAccessor::new(&fx.config(), Fixture::identity());

    let groups = accessor.enumerate("/user.slice").await.unwrap();
    let handle = group(HierarchyMode::Legacy);
    assert!(groups[&handle].contains(&ProcessId::from_raw(200)));

    let snapshot = accessor.snapshot(&handle).await.unwrap();
    assert_eq!(snapshot.cpu_seconds_total, 3.0);
    assert_eq!(snapshot.cpu_quota_per_second, CpuQuota::UNCONSTRAINED);
    assert_eq!(snapshot.memory_usage_bytes.as_bytes(), 8192);
    assert!(snapshot.memory_ceiling_bytes.is_unbounded());
    assert_eq!(snapshot.owner_username, "alice");
}

#[tokio::test]
async fn test_legacy_cpu_quota_normalized() {
    let fx = Fixture::legacy();
    fx.cg("cpu/user.slice/user-1000.slice/cpu.cfs_quota_us", "150000\n");
    let accessor = LegacyAccessor::new(&fx.config(), Fixture::identity());

    let snapshot = accessor.snapshot(&group(HierarchyMode::Legacy)).await.unwrap();
    assert_eq!(snapshot.cpu_quota_per_second.as_usec_per_sec(), 1_500_000);
}

#[tokio::test]
async fn test_legacy_clamps_below_usage() {
    let fx = Fixture::legacy();
    let accessor = LegacyAccessor::new(&fx.config(), Fixture::identity());

    let applied = accessor
        .set_memory_limits(&group(HierarchyMode::Legacy), Ceiling::Bytes(1024))
        .await
        .unwrap();

    // usage 8192 + margin 1000
    assert_eq!(applied.effective, Ceiling::Bytes(9192));
    assert!(applied.fallback);
    assert_eq!(
        fx.read("memory/user.slice/user-1000.slice/memory.limit_in_bytes"),
        "9192"
    );
    assert_eq!(
        fx.read("memory/user.slice/user-1000.slice/memory.memsw.limit_in_bytes"),
        "10111"
    );
}

#[tokio::test]
async fn test_legacy_applies_request_above_usage() {
    let fx = Fixture::legacy();
    let accessor = LegacyAccessor::new(&fx.config(), Fixture::identity());

    let applied = accessor
        .set_memory_limits(&group(HierarchyMode::Legacy), Ceiling::Bytes(1 << 20))
        .await
        .unwrap();

    assert_eq!(applied.effective, Ceiling::Bytes(1 << 20));
    assert!(!applied.fallback);
    assert_eq!(
        fx.read("memory/user.slice/user-1000.slice/memory.memsw.limit_in_bytes"),
        "1153433"
    );
}

#[tokio::test]
async fn test_legacy_unbounded_request() {
    let fx = Fixture::legacy();
    fx.cg("memory/user.slice/user-1000.slice/memory.limit_in_bytes", "65536\n");
    let accessor = LegacyAccessor::new(&fx.config(), Fixture::identity());

    let applied = accessor
        .set_memory_limits(&group(HierarchyMode::Legacy), Ceiling::Unbounded)
        .await
        .unwrap();

    assert!(applied.effective.is_unbounded());
    assert!(!applied.fallback);
    assert_eq!(
        fx.read("memory/user.slice/user-1000.slice/memory.limit_in_bytes"),
        Ceiling::LEGACY_UNLIMITED.to_string()
    );
    assert_eq!(
        fx.read("memory/user.slice/user-1000.slice/memory.memsw.limit_in_bytes"),
        Ceiling::LEGACY_UNLIMITED.to_string()
    );
}

#[tokio::test]
async fn test_legacy_without_swap_accounting() {
    let fx = Fixture::legacy();
    let memsw = fx
        .cgroup
        .join("memory/user.slice/user-1000.slice/memory.memsw.limit_in_bytes");
    std::fs::remove_file(&memsw).unwrap();
    let accessor = LegacyAccessor::new(&fx.config(), Fixture::identity());

    accessor
        .set_memory_limits(&group(HierarchyMode::Legacy), Ceiling::Bytes(1 << 20))
        .await
        .unwrap();

    assert!(!memsw.exists());
    assert_eq!(
        fx.read("memory/user.slice/user-1000.slice/memory.limit_in_bytes"),
        (1u64 << 20).to_string()
    );
}

#[tokio::test]
async fn test_legacy_swap_limit_raised_to_memory_limit() {
    let fx = Fixture::legacy();
    fx.cg("memory/user.slice/user-1000.slice/memory.limit_in_bytes", "1048576\n");
    let accessor = LegacyAccessor::new(&fx.config(), Fixture::identity());
    let handle = group(HierarchyMode::Legacy);

    let applied = accessor
        .set_swap_limit(&handle, Ceiling::Bytes(65536))
        .await
        .unwrap();
    assert_eq!(applied.effective, Ceiling::Bytes(1 << 20));
    assert!(applied.fallback);
    assert_eq!(
        fx.read("memory/user.slice/user-1000.slice/memory.memsw.limit_in_bytes"),
        "1048576"
    );

    let applied = accessor
        .set_swap_limit(&handle, Ceiling::Bytes(2 << 20))
        .await
        .unwrap();
    assert_eq!(applied.effective, Ceiling::Bytes(2 << 20));
    assert!(!applied.fallback);
    assert_eq!(
        fx.read("memory/user.slice/user-1000.slice/memory.memsw.limit_in_bytes"),
        (2u64 << 20).to_string()
    );
    // memory ceiling untouched
    assert_eq!(
        fx.read("memory/user.slice/user-1000.slice/memory.limit_in_bytes"),
        "1048576\n"
    );
}

#[tokio::test]
async fn test_legacy_swap_limit_without_swap_accounting() {
    let fx = Fixture::legacy();
    std::fs::remove_file(
        fx.cgroup
            .join("memory/user.slice/user-1000.slice/memory.memsw.limit_in_bytes"),
    )
    .unwrap();
    let accessor = LegacyAccessor::new(&fx.config(), Fixture::identity());

    let err = accessor
        .set_swap_limit(&group(HierarchyMode::Legacy), Ceiling::Bytes(1 << 20))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
    assert!(!err.is_input_error());
}

#[tokio::test]
async fn test_legacy_soft_limit_clamped() {
    let fx = Fixture::legacy();
    let accessor = LegacyAccessor::new(&fx.config(), Fixture::identity());
    let handle = group(HierarchyMode::Legacy);

    let applied = accessor
        .set_soft_limit(&handle, Ceiling::Bytes(1024))
        .await
        .unwrap();
    assert_eq!(applied.effective, Ceiling::Bytes(9192));
    assert!(applied.fallback);
    assert_eq!(
        fx.read("memory/user.slice/user-1000.slice/memory.soft_limit_in_bytes"),
        "9192"
    );
    // hard ceilings untouched
    assert_eq!(
        fx.read("memory/user.slice/user-1000.slice/memory.limit_in_bytes"),
        "9223372036854771712\n"
    );

    accessor
        .set_soft_limit(&handle, Ceiling::Unbounded)
        .await
        .unwrap();
    assert_eq!(
        fx.read("memory/user.slice/user-1000.slice/memory.soft_limit_in_bytes"),
        Ceiling::LEGACY_UNLIMITED.to_string()
    );
}

#[tokio::test]
async fn test_unified_swap_and_soft_limit_unsupported() {
    let fx = Fixture::unified();
    let accessor = UnifiedAccessor::new(&fx.config(), Fixture::identity());
    let handle = group(HierarchyMode::Unified);

    let err = accessor
        .set_swap_limit(&handle, Ceiling::Bytes(1 << 20))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
    let err = accessor
        .set_soft_limit(&handle, Ceiling::Bytes(1 << 20))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unsupported { .. }));
}

#[tokio::test]
async fn test_collection_pass_and_pruning() {
    let fx = Fixture::unified();
    let provider = HierarchyProvider::for_mode(HierarchyMode::Unified, &fx.config(), Fixture::identity());
    let reader = ProcfsReader::with_params(&fx.proc_root, 100.0, 4096);
    let collector = UsageCollector::new(provider.accessor(), ProcessSampler::new(Arc::new(reader)));

    let report = collector.collect_usage("/user.slice").await.unwrap();
    assert_eq!(report.groups.len(), 1);
    let usage = &report.groups[0];
    assert_eq!(usage.group.as_str(), GROUP);
    assert!(usage.snapshot.is_ok());
    assert_eq!(usage.processes.len(), 1);
    assert_eq!(usage.processes[0].command, "python");
    assert_eq!(usage.processes[0].cpu_seconds_total, 2.5);
    assert_eq!(usage.processes[0].memory_bytes_total, 8192);
    assert!(report.pruned.is_empty());

    // every process of the group leaves
    fx.cg("user.slice/user-1000.slice/session-1.scope/cgroup.procs", "");
    let report = collector.collect_usage("/user.slice").await.unwrap();
    assert!(report.groups.is_empty());
    assert_eq!(report.pruned, vec![GROUP.to_string()]);
    assert_eq!(collector.sampler().cache().group_count().await, 0);
}

#[tokio::test]
async fn test_enumerate_missing_root_fails() {
    let fx = Fixture::new();
    let accessor = UnifiedAccessor::new(&fx.config(), Fixture::identity());
    assert!(accessor.enumerate("/user.slice").await.is_err());
}
