//! ## bmpbridge-cli
//! **Operational interface for the BMP bridge**
//!
//! - `consume`: join a consumer group on the BMP topics and print every record
//! - `publish-peer`: send one peer up/down event to Kafka
//! - `demo`: run publisher and dispatcher against an in-memory broker

use std::sync::Arc;

use anyhow::Context;
use bmpbridge_telemetry::{EventLogger, MetricsRecorder};
use clap::Parser;

mod commands;

use commands::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::resolve_config(&cli)?;

    EventLogger::init_with_level(&config.telemetry.log_level);
    let metrics = Arc::new(MetricsRecorder::new().context("registering metrics")?);

    commands::run_command(cli.command, config, metrics).await
}
