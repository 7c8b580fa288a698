//! File helpers shared by the legacy and unified accessors

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, trace};
use warden_core::{Error, GroupHandle, HierarchyMode, IdentityResolver, ProcessId, Result};

use crate::accessor::GroupMap;

/// Selects the line of `/proc/<pid>/cgroup` that names the group
#[derive(Debug, Clone, Copy)]
pub(crate) enum PathSelector {
    /// `0::<path>`
    Unified,
    /// `<id>:<controllers>:<path>` where controllers include this one
    Controller(&'static str),
}

/// Extract the group path from the contents of `/proc/<pid>/cgroup`
pub(crate) fn parse_proc_cgroup(content: &str, selector: PathSelector) -> Option<&str> {
    content.lines().find_map(|line| {
        let mut parts = line.splitn(3, ':');
        let id = parts.next()?;
        let controllers = parts.next()?;
        let path = parts.next()?;

        let matches = match selector {
            PathSelector::Unified => id == "0" && controllers.is_empty(),
            PathSelector::Controller(name) => controllers.split(',').any(|c| c == name),
        };
        matches.then_some(path)
    })
}

/// Read `cgroup.procs` of `dir` and every directory below it
///
/// Directories removed mid-walk are skipped.
pub(crate) async fn walk_procs(dir: &Path) -> Result<Vec<ProcessId>> {
    if !fs::try_exists(dir).await? {
        return Err(Error::cgroup(format!("no such group: {}", dir.display())));
    }

    let mut pids = Vec::new();
    let mut pending: Vec<PathBuf> = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        match fs::read_to_string(current.join("cgroup.procs")).await {
            Ok(content) => pids.extend(content.lines().filter_map(|l| l.parse::<ProcessId>().ok())),
            Err(e) => trace!(path = %current.display(), error = %e, "Skipping group"),
        }

        let Ok(mut entries) = fs::read_dir(&current).await else {
            continue;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            if entry.file_type().await.is_ok_and(|t| t.is_dir()) {
                pending.push(entry.path());
            }
        }
    }

    Ok(pids)
}

/// Owner of a group, resolved off the async workers since passwd lookups
/// may go to SSSD or LDAP
pub(crate) async fn owner_of(
    identity: &Arc<dyn IdentityResolver>,
    group: &GroupHandle,
) -> Result<String> {
    let identity = Arc::clone(identity);
    let group = group.as_str().to_string();
    tokio::task::spawn_blocking(move || identity.username_for_group(&group)).await?
}

/// Map every PID under `procs_dir` to its group, truncated to `depth`
/// path segments
pub(crate) async fn enumerate_groups(
    procs_dir: &Path,
    proc_root: &Path,
    depth: usize,
    mode: HierarchyMode,
    selector: PathSelector,
) -> Result<GroupMap> {
    let mut groups = GroupMap::new();

    for pid in walk_procs(procs_dir).await? {
        let path = proc_root.join(pid.to_string()).join("cgroup");
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) => {
                trace!(pid = %pid, error = %e, "Process exited during scan");
                continue;
            }
        };

        let Some(group_path) = parse_proc_cgroup(&content, selector) else {
            debug!(pid = %pid, "Process has no matching group line");
            continue;
        };
        let Some(group) = GroupHandle::from_process_path(group_path, depth, mode) else {
            trace!(pid = %pid, path = group_path, "Group shallower than configured depth");
            continue;
        };

        groups.entry(group).or_default().insert(pid);
    }

    debug!(groups = groups.len(), root = %procs_dir.display(), "Enumerated groups");
    Ok(groups)
}

/// Read a control file, trimmed
pub(crate) async fn read_trimmed(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path)
        .await
        .map_err(|e| Error::cgroup(format!("read {}: {e}", path.display())))?;
    trace!(path = %path.display(), value = content.trim(), "Read control file");
    Ok(content.trim().to_string())
}

/// Read a control file holding one integer
pub(crate) async fn read_parsed<T: std::str::FromStr>(path: &Path) -> Result<T> {
    let value = read_trimmed(path).await?;
    value
        .parse()
        .map_err(|_| Error::cgroup(format!("unexpected value '{value}' in {}", path.display())))
}

/// Find `key` in a flat-keyed file such as `memory.stat` or `cpu.stat`
pub(crate) fn flat_keyed(content: &str, key: &str) -> Option<u64> {
    content.lines().find_map(|line| {
        let (k, v) = line.split_once(' ')?;
        (k == key).then(|| v.trim().parse().ok()).flatten()
    })
}

/// Write a value to a control file
pub(crate) async fn write_value(path: &Path, value: impl std::fmt::Display) -> Result<()> {
    let value = value.to_string();
    debug!(path = %path.display(), value = %value, "Writing control file");
    fs::write(path, &value)
        .await
        .map_err(|e| Error::cgroup(format!("write '{value}' to {}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROC_CGROUP_V1: &str = "12:pids:/user.slice/user-1000.slice/session-2.scope
11:memory:/user.slice/user-1000.slice/session-2.scope
4:cpu,cpuacct:/user.slice/user-1000.slice/session-2.scope
1:name=systemd:/user.slice/user-1000.slice/session-2.scope
0::/user.slice/user-1000.slice/session-2.scope";

    #[test]
    fn selects_cpuacct_line() {
        assert_eq!(
            parse_proc_cgroup(PROC_CGROUP_V1, PathSelector::Controller("cpuacct")),
            Some("/user.slice/user-1000.slice/session-2.scope")
        );
        assert_eq!(
            parse_proc_cgroup("3:cpu:/x\n", PathSelector::Controller("cpuacct")),
            None
        );
    }

    #[test]
    fn selects_unified_line() {
        assert_eq!(
            parse_proc_cgroup("0::/user.slice/user-7.slice\n", PathSelector::Unified),
            Some("/user.slice/user-7.slice")
        );
        assert_eq!(parse_proc_cgroup("", PathSelector::Unified), None);
    }

    #[test]
    fn flat_keyed_lookup() {
        let stat = "cache 4096\nrss 8192\ntotal_rss 16384\n";
        assert_eq!(flat_keyed(stat, "total_rss"), Some(16384));
        assert_eq!(flat_keyed(stat, "rss"), Some(8192));
        assert_eq!(flat_keyed(stat, "swap"), None);
    }

    #[tokio::test]
    async fn walk_collects_nested_procs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("user-1.slice/session-1.scope");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("cgroup.procs"), "").unwrap();
        std::fs::write(dir.path().join("user-1.slice/cgroup.procs"), "5\n").unwrap();
        std::fs::write(nested.join("cgroup.procs"), "6\n7\n").unwrap();

        let mut pids = walk_procs(dir.path()).await.unwrap();
        pids.sort();
        assert_eq!(
            pids,
            [5, 6, 7].map(ProcessId::from_raw).to_vec()
        );
    }

    #[tokio::test]
    async fn owner_resolved_on_blocking_pool() {
        let identity: Arc<dyn IdentityResolver> =
            Arc::new(warden_core::StaticIdentity::new().with_user(7, "eve"));
        let group = GroupHandle::new("/user.slice/user-7.slice", HierarchyMode::Unified).unwrap();
        assert_eq!(owner_of(&identity, &group).await.unwrap(), "eve");

        let stranger =
            GroupHandle::new("/user.slice/user-8.slice", HierarchyMode::Unified).unwrap();
        let err = owner_of(&identity, &stranger).await.unwrap_err();
        assert!(matches!(err, Error::UnknownUser { .. }));
    }

    #[tokio::test]
    async fn walk_missing_root_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(walk_procs(&dir.path().join("absent")).await.is_err());
    }
}
