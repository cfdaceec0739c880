use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use live_mux::LiveClient;
use tracing::info;
use tracing_subscriber::prelude::*;

use mission_control::config::{FileConfig, load_config};
use mission_control::{hub, publish, watch};

#[derive(Parser)]
#[command(name = "mc")]
#[command(about = "Mission control for live topics")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (missing is fine)
    #[arg(long, global = true, default_value = "mc.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every frame on the given topics as JSON lines
    Watch(WatchArgs),

    /// Run a development push hub
    Hub(HubArgs),

    /// Push one frame through a running hub
    Publish(PublishArgs),
}

#[derive(Parser)]
struct WatchArgs {
    /// Topic to follow (repeatable)
    #[arg(short, long = "topic", required = true)]
    topics: Vec<String>,
}

#[derive(Parser)]
struct HubArgs {
    /// Port to listen on (overrides [hub].port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Host to bind to (overrides [hub].host)
    #[arg(short = 'b', long)]
    host: Option<String>,
}

#[derive(Parser)]
struct PublishArgs {
    topic: String,

    /// JSON payload
    data: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_directive = if cli.debug {
        "mission_control=debug,live_mux=debug,tower_http=debug,info"
    } else {
        "mission_control=info,live_mux=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let config: FileConfig = load_config(&cli.config)
        .extract()
        .with_context(|| format!("failed to load config from {}", cli.config.display()))?;

    match cli.command {
        Commands::Watch(args) => run_watch(&config, &args.topics).await,
        Commands::Hub(args) => run_hub(config, args).await,
        Commands::Publish(args) => run_publish(&config, args).await,
    }
}

async fn run_watch(config: &FileConfig, topics: &[String]) -> Result<()> {
    let url = config.origin.live_url()?;
    info!(%url, ?topics, "watching live topics");

    let client = LiveClient::connect(config.live.clone(), url);
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    watch::tail(&client, topics, std::io::stdout(), shutdown).await?;
    Ok(())
}

async fn run_hub(mut config: FileConfig, args: HubArgs) -> Result<()> {
    if let Some(port) = args.port {
        config.hub.port = port;
    }
    if let Some(host) = args.host {
        config.hub.host = host;
    }
    let addr = config.hub.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    let hub = Arc::new(hub::Hub::new(config.hub.queue_size));
    tokio::select! {
        result = hub::serve(listener, hub) => result.context("hub server failed")?,
        _ = tokio::signal::ctrl_c() => info!("shutting down hub"),
    }
    Ok(())
}

async fn run_publish(config: &FileConfig, args: PublishArgs) -> Result<()> {
    let data: serde_json::Value =
        serde_json::from_str(&args.data).context("payload is not valid JSON")?;
    let base = config.origin.api_base()?;
    let delivered = publish::publish(&base, &args.topic, &data).await?;
    println!("{}", serde_json::json!({ "delivered": delivered }));
    Ok(())
}
