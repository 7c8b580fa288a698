//! CLI argument definitions

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use warden_core::{ModeSetting, WardenConfig};

#[derive(Parser)]
#[command(name = "warden")]
#[command(about = "Per-user cgroup accounting and limits", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub config: ConfigArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one collection pass and print per-group usage
    Collect {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Collect periodically until interrupted
    Watch {
        /// Seconds between passes
        #[arg(short, long, default_value = "15")]
        interval: u64,

        /// Print JSON lines instead of tables
        #[arg(long)]
        json: bool,
    },

    /// Set a resource property on a user's slice
    Limit {
        /// Unit name (user-1000.slice) or group path
        #[arg(short, long)]
        unit: Option<String>,

        /// Owner of the unit
        #[arg(long)]
        username: Option<String>,

        /// Property name, e.g. MemoryMax
        #[arg(short, long)]
        property: String,

        /// Value: true/false, an integer, or -1 for no limit
        #[arg(long, allow_hyphen_values = true)]
        value: String,

        /// Do not persist the change across reboots
        #[arg(long)]
        runtime: bool,
    },

    /// Resolve a unit to its owner, or a user to their unit
    Resolve {
        /// Unit name or group path
        #[arg(short, long)]
        unit: Option<String>,

        /// Username
        #[arg(long)]
        username: Option<String>,
    },

    /// Check the host can be monitored
    Health,
}

/// Hierarchy mode on the command line
#[derive(Clone, Copy, ValueEnum)]
pub enum ModeArg {
    Auto,
    Legacy,
    Unified,
}

impl From<ModeArg> for ModeSetting {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Auto => Self::Auto,
            ModeArg::Legacy => Self::Legacy,
            ModeArg::Unified => Self::Unified,
        }
    }
}

/// Configuration overrides; each flag beats the config file
#[derive(Args)]
pub struct ConfigArgs {
    /// JSON configuration file
    #[arg(long, global = true, env = "WARDEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// cgroup filesystem mount point
    #[arg(long, global = true, env = "WARDEN_CGROUP_MOUNT")]
    pub cgroup_mount: Option<PathBuf>,

    /// procfs mount point
    #[arg(long, global = true, env = "WARDEN_PROC_ROOT")]
    pub proc_root: Option<PathBuf>,

    /// Group whose per-user descendants are monitored
    #[arg(long, global = true, env = "WARDEN_ROOT_GROUP")]
    pub root_group: Option<String>,

    /// Path segments that name a per-user group
    #[arg(long, global = true, env = "WARDEN_GROUP_DEPTH")]
    pub group_depth: Option<usize>,

    /// Bytes kept above live usage when clamping memory ceilings
    #[arg(long, global = true, env = "WARDEN_MEMORY_MARGIN")]
    pub memory_margin: Option<u64>,

    /// Swap ceiling as a fraction of the memory ceiling
    #[arg(long, global = true, env = "WARDEN_SWAP_RATIO")]
    pub swap_ratio: Option<f64>,

    /// Hierarchy mode
    #[arg(long, global = true, value_enum, env = "WARDEN_MODE")]
    pub mode: Option<ModeArg>,
}

impl ConfigArgs {
    /// Merge the file (if any), then flags, and validate
    pub fn load(&self) -> Result<WardenConfig> {
        let mut config = match &self.config {
            Some(path) => WardenConfig::from_json_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => WardenConfig::default(),
        };

        if let Some(ref mount) = self.cgroup_mount {
            config.cgroup_mount.clone_from(mount);
        }
        if let Some(ref root) = self.proc_root {
            config.proc_root.clone_from(root);
        }
        if let Some(ref group) = self.root_group {
            config.root_group.clone_from(group);
        }
        if let Some(depth) = self.group_depth {
            config.group_depth = depth;
        }
        if let Some(margin) = self.memory_margin {
            config.memory_margin_bytes = margin;
        }
        if let Some(ratio) = self.swap_ratio {
            config.swap_ratio = ratio;
        }
        if let Some(mode) = self.mode {
            config.mode = mode.into();
        }

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }
}
