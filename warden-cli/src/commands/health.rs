use anyhow::Result;
use std::path::Path;
use warden_cgroup::detect_mode;
use warden_core::{HierarchyMode, WardenConfig};

/// Execute health check command
pub async fn execute(config: &WardenConfig) -> Result<()> {
    println!("\n🏥 Warden Health Check\n");
    println!("{:-<60}", "");

    let mode = check_mode(config)?;
    check_mounts(config, mode)?;
    check_procfs(&config.proc_root)?;

    println!("{:-<60}", "");
    println!("\n✅ All systems operational!\n");

    Ok(())
}

/// Report the hierarchy mode, detected or forced
fn check_mode(config: &WardenConfig) -> Result<HierarchyMode> {
    print!("Checking cgroup hierarchy... ");

    if let Some(mode) = config.mode.forced() {
        println!("✅ {mode} (forced)");
        return Ok(mode);
    }

    let mounts_path = config.proc_root.join("self").join("mounts");
    let mounts = match std::fs::read_to_string(&mounts_path) {
        Ok(mounts) => mounts,
        Err(e) => {
            println!("❌ UNREADABLE");
            anyhow::bail!("Could not read {}: {e}", mounts_path.display());
        }
    };

    match detect_mode(&mounts) {
        Ok(mode) => {
            println!("✅ {mode}");
            Ok(mode)
        }
        Err(e) => {
            println!("❌ NOT FOUND");
            anyhow::bail!(
                "{e}\n\
                 \n\
                 To check your cgroup configuration:\n\
                 $ mount | grep cgroup"
            );
        }
    }
}

/// Check the controllers the accessor reads are mounted
fn check_mounts(config: &WardenConfig, mode: HierarchyMode) -> Result<()> {
    print!("Checking cgroup mounts... ");

    let mount = &config.cgroup_mount;
    let relative = config.root_group.trim_start_matches('/');

    let required: Vec<_> = if mode.is_legacy() {
        ["cpuacct", "cpu", "memory"]
            .iter()
            .map(|controller| mount.join(controller).join(relative))
            .collect()
    } else {
        vec![mount.join(relative)]
    };

    let missing: Vec<String> = required
        .iter()
        .filter(|path| !path.is_dir())
        .map(|path| path.display().to_string())
        .collect();

    if !missing.is_empty() {
        println!("❌ MISSING");
        for path in &missing {
            println!("   Not found: {path}");
        }
        anyhow::bail!("Root group {} is not present in the hierarchy", config.root_group);
    }

    println!("✅ OK ({})", mount.display());
    Ok(())
}

/// Check process statistics can be read
fn check_procfs(proc_root: &Path) -> Result<()> {
    print!("Checking procfs... ");

    let stat = proc_root.join("self").join("stat");
    if let Err(e) = std::fs::read_to_string(&stat) {
        println!("❌ UNREADABLE");
        anyhow::bail!("Could not read {}: {e}", stat.display());
    }

    println!("✅ OK ({})", proc_root.display());
    Ok(())
}
