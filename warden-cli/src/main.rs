//! Warden CLI
//!
//! Per-user resource accounting and limit control for cgroup hosts.

use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;
use warden_control::ControlError;

mod cli;
mod commands;

use cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.config.load() {
        Ok(config) => commands::dispatch(cli.command, config).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e:#}");
        process::exit(exit_code(&e));
    }
}

/// 2 when the caller asked for something invalid, 1 for everything else
fn exit_code(err: &anyhow::Error) -> i32 {
    let input = err.chain().any(|cause| {
        cause
            .downcast_ref::<ControlError>()
            .is_some_and(|e| matches!(e, ControlError::Input(_)))
            || cause
                .downcast_ref::<warden_core::Error>()
                .is_some_and(warden_core::Error::is_input_error)
    });

    if input { 2 } else { 1 }
}
