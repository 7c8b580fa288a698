//! Limit command implementation

use anyhow::Result;
use std::sync::Arc;
use warden_control::{LimitController, LimitRequest, RawValue, SystemdChannel};
use warden_core::WardenConfig;

pub async fn execute(
    config: &WardenConfig,
    unit: Option<&str>,
    username: Option<&str>,
    property: &str,
    value: &str,
    runtime: bool,
) -> Result<()> {
    let request = LimitRequest {
        unit: unit.map(str::to_string),
        username: username.map(str::to_string),
        property: property.to_string(),
        value: RawValue::parse_arg(value),
        runtime,
    };

    let provider = super::provider(config).await?;
    let controller = LimitController::new(
        config,
        provider.accessor(),
        Arc::new(SystemdChannel::new()),
        super::identity(),
    );

    tracing::debug!(?request, "Applying limit");
    let result = controller.apply_limit(&request).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
