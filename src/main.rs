use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::Level;

use tether_llm::gemini::DEFAULT_BASE_URL;
use tether_server::ServerConfig;
use tether_telemetry::TelemetryConfig;

#[derive(Parser)]
#[command(author, version, about = "Suspendable tool-using agent server")]
struct Cli {
    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, default_value_t = 9091)]
    port: u16,

    /// Model used for objective runs
    #[arg(long, default_value = tether_engine::DEFAULT_MODEL)]
    model: String,

    /// Base URL of the streaming completion service
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    upstream_url: String,

    /// Cut a run off after this many rounds
    #[arg(long)]
    max_rounds: Option<u32>,

    /// Pause between scripted scenario steps, in milliseconds
    #[arg(long, default_value_t = 500)]
    scenario_delay_ms: u64,

    /// Default log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "info")]
    log_level: Level,

    /// Emit JSON log lines instead of compact text
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tether_telemetry::init_telemetry(&TelemetryConfig {
        log_level: cli.log_level,
        module_levels: Vec::new(),
        json: cli.json_logs,
    })?;

    let mut config = ServerConfig {
        host: cli.host,
        port: cli.port,
        model: cli.model,
        max_rounds: cli.max_rounds,
        scenario_delay: Duration::from_millis(cli.scenario_delay_ms),
        ..Default::default()
    };
    config.upstream.base_url = cli.upstream_url;

    let client = tether_server::build_client(&config).context("failed to build model client")?;
    let handle = tether_server::start(config, client)
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "tether server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown();
    Ok(())
}
