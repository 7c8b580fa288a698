use crate::cli::Commands;
use anyhow::{Context, Result};
use std::sync::Arc;
use warden_cgroup::HierarchyProvider;
use warden_core::{IdentityResolver, SystemIdentity, WardenConfig};

pub mod collect;
pub mod health;
pub mod limit;
pub mod resolve;
pub mod watch;

/// Dispatch command to appropriate handler
pub async fn dispatch(command: Commands, config: WardenConfig) -> Result<()> {
    match command {
        Commands::Collect { json } => collect::execute(&config, json).await,

        Commands::Watch { interval, json } => watch::execute(&config, interval, json).await,

        Commands::Limit {
            unit,
            username,
            property,
            value,
            runtime,
        } => {
            limit::execute(
                &config,
                unit.as_deref(),
                username.as_deref(),
                &property,
                &value,
                runtime,
            )
            .await
        }

        Commands::Resolve { unit, username } => {
            resolve::execute(&config, unit.as_deref(), username.as_deref()).await
        }

        Commands::Health => health::execute(&config).await,
    }
}

fn identity() -> Arc<dyn IdentityResolver> {
    Arc::new(SystemIdentity)
}

/// Detect the hierarchy (unless forced) and build its accessor
async fn provider(config: &WardenConfig) -> Result<HierarchyProvider> {
    HierarchyProvider::detect(config, identity())
        .await
        .context("Failed to select cgroup hierarchy")
}
