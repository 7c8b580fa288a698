//! Resolve command implementation

use anyhow::Result;
use std::sync::Arc;
use warden_control::{LimitController, SystemdChannel};
use warden_core::WardenConfig;

pub async fn execute(
    config: &WardenConfig,
    unit: Option<&str>,
    username: Option<&str>,
) -> Result<()> {
    let provider = super::provider(config).await?;
    let controller = LimitController::new(
        config,
        provider.accessor(),
        Arc::new(SystemdChannel::new()),
        super::identity(),
    );

    let target = controller.resolve_target(unit, username)?;

    println!("Unit:     {}", target.unit);
    println!("Group:    {}", target.group);
    println!("Username: {}", target.username);
    Ok(())
}
