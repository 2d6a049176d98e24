use std::io::Write;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::info;
use validator::Validate;

use bmpbridge_config::{BridgeConfig, ConsumerProfile};
use bmpbridge_core::events::PeerSession;
use bmpbridge_engine::{run_consumer, run_demo, run_publish_peer};
use bmpbridge_telemetry::MetricsRecorder;

#[derive(Parser, Debug)]
#[command(name = "bmpbridge", version, about)]
pub struct Cli {
    /// Configuration file layered over the defaults
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Consume routing events from Kafka and print them
    Consume(ConsumeArgs),
    /// Publish a single peer up or peer down event
    PublishPeer(PublishPeerArgs),
    /// Publish a scripted session through an in-memory broker and print it back
    Demo(DemoArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Profile {
    /// Pre-policy, post-policy and mirroring topics from the newest offset
    All,
    /// Mirroring topic only, from the oldest offset
    Mirroring,
}

impl From<Profile> for ConsumerProfile {
    fn from(profile: Profile) -> Self {
        match profile {
            Profile::All => ConsumerProfile::All,
            Profile::Mirroring => ConsumerProfile::Mirroring,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConsumeArgs {
    #[arg(long, value_enum)]
    pub profile: Option<Profile>,
    /// Overrides the consumer group id
    #[arg(long)]
    pub group: Option<String>,
    /// Comma-separated bootstrap brokers
    #[arg(long, value_delimiter = ',')]
    pub brokers: Vec<String>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PeerState {
    Up,
    Down,
}

#[derive(Args, Debug, Clone)]
pub struct PublishPeerArgs {
    #[arg(long, value_enum)]
    pub state: PeerState,
    #[arg(long)]
    pub router: IpAddr,
    #[arg(long)]
    pub local: IpAddr,
    #[arg(long)]
    pub neighbor: IpAddr,
    #[arg(long)]
    pub local_as: u32,
    #[arg(long)]
    pub remote_as: u32,
    /// Logged with peer down events
    #[arg(long, default_value = "administratively shut down")]
    pub reason: String,
    #[arg(long, value_delimiter = ',')]
    pub brokers: Vec<String>,
    /// Overrides the publish topic
    #[arg(long)]
    pub topic: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
    /// Print the Prometheus exposition after the run
    #[arg(long)]
    pub metrics: bool,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<BridgeConfig> {
    match path {
        Some(path) => BridgeConfig::load_from_path(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => BridgeConfig::load().context("loading configuration"),
    }
}

/// Applies command-line overrides and validates the result again.
fn apply_overrides(config: &mut BridgeConfig, command: &Commands) -> anyhow::Result<()> {
    match command {
        Commands::Consume(args) => {
            if let Some(profile) = args.profile {
                ConsumerProfile::from(profile).apply(&mut config.consumer);
            }
            if let Some(group) = &args.group {
                config.consumer.group_id = group.clone();
            }
            if !args.brokers.is_empty() {
                config.broker.brokers = args.brokers.clone();
            }
        }
        Commands::PublishPeer(args) => {
            if !args.brokers.is_empty() {
                config.broker.brokers = args.brokers.clone();
            }
            if let Some(topic) = &args.topic {
                config.publisher.topic = topic.clone();
            }
        }
        Commands::Demo(_) => {}
    }
    config.validate().context("invalid command-line overrides")
}

/// Loads configuration for `cli`, applying its overrides.
pub fn resolve_config(cli: &Cli) -> anyhow::Result<BridgeConfig> {
    let mut config = load_config(cli.config.as_ref())?;
    apply_overrides(&mut config, &cli.command)?;
    Ok(config)
}

pub async fn run_command(
    command: Commands,
    config: BridgeConfig,
    metrics: Arc<MetricsRecorder>,
) -> anyhow::Result<()> {
    match command {
        Commands::Consume(_) => run_consumer(&config, metrics)
            .await
            .context("consumer failed"),
        Commands::PublishPeer(args) => {
            let peer = PeerSession::new(
                args.router,
                args.local,
                args.neighbor,
                args.local_as,
                args.remote_as,
            );
            run_publish_peer(
                &config,
                metrics,
                peer,
                args.state == PeerState::Up,
                args.reason,
            )
            .await
            .context("publishing peer event")?;
            info!(topic = %config.publisher.topic, "Peer event published");
            Ok(())
        }
        Commands::Demo(args) => {
            let rendered = run_demo(&config, Arc::clone(&metrics), Vec::new())
                .await
                .context("demo run failed")?;

            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&rendered)?;
            if args.metrics {
                stdout.write_all(metrics.gather_metrics()?.as_bytes())?;
            }
            stdout.flush()?;
            Ok(())
        }
    }
}
