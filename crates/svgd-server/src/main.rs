//! svgd - metric chart service
//!
//! Serves SVG charts of collectd archives over HTTP.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use svgd_server::config::DEFAULT_CONFIG_PATH;
use svgd_server::{
    serve, shutdown_signal, AppState, Query, QueryHandler, ServiceConfig, DEFAULT_PERIOD, MAX_PERIOD,
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "svgd")]
#[command(about = "Metric chart service")]
#[command(version)]
struct Cli {
    /// Log as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chart server
    Run {
        /// Path to config file
        #[arg(short, long, env = "SVGD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Listen port, overriding the config file
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Load the config, compile the chart script and print the metric catalog
    CheckConfig {
        /// Path to config file
        #[arg(short, long, env = "SVGD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Render one chart without starting the server
    Render {
        /// Path to config file
        #[arg(short, long, env = "SVGD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Endpoint, e.g. cpu/process/nginx
        endpoint: String,

        /// Look-back window in seconds
        #[arg(
            long,
            default_value_t = DEFAULT_PERIOD,
            value_parser = clap::value_parser!(u64).range(1..=MAX_PERIOD)
        )]
        period: u64,

        /// Write the SVG here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::from_default_env().add_directive("svgd=info".parse()?);
    tracing_subscriber::registry()
        .with(filter)
        .with(cli.log_json.then(|| fmt::layer().json()))
        .with((!cli.log_json).then(fmt::layer))
        .init();

    match cli.command {
        Commands::Run { config, port } => run_server(config, port).await?,
        Commands::CheckConfig { config } => check_config(config)?,
        Commands::Render {
            config,
            endpoint,
            period,
            output,
        } => render_once(config, endpoint, period, output).await?,
    }

    Ok(())
}

async fn run_server(config_path: PathBuf, port: Option<u16>) -> anyhow::Result<()> {
    info!(config = %config_path.display(), "starting svgd");

    let config = ServiceConfig::load(&config_path)?;
    let handler = QueryHandler::from_config(&config)?;
    if let Err(e) = handler.renderer().preload() {
        error!(error = %e, "chart script unusable");
        return Err(e.into());
    }

    let port = port.unwrap_or_else(|| config.listen_port());
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(
        metrics = config.registry.len(),
        workers = config.renderer.workers,
        timeout_secs = config.request_timeout.as_secs(),
        "configuration ready"
    );

    serve(Arc::new(AppState::new(handler)), addr, shutdown_signal()).await?;
    Ok(())
}

fn check_config(config_path: PathBuf) -> anyhow::Result<()> {
    let config = ServiceConfig::load(&config_path)?;
    let handler = QueryHandler::from_config(&config)?;
    handler.renderer().preload()?;

    let settings = config.registry.settings();
    println!("config:        {}", config_path.display());
    println!("port:          {}", settings.listen_port);
    println!("archive base:  {}", settings.archive_base.display());
    println!(
        "cache daemon:  {}",
        settings.cache_daemon.as_deref().unwrap_or("(none)")
    );
    println!("chart script:  {}", settings.renderer_script.display());
    println!("metrics:");
    println!("{}", serde_json::to_string_pretty(&handler.catalog())?);
    Ok(())
}

async fn render_once(
    config_path: PathBuf,
    endpoint: String,
    period: u64,
    output: Option<PathBuf>,
) -> anyhow::Result<()> {
    let config = ServiceConfig::load(&config_path)?;
    let handler = QueryHandler::from_config(&config)?;

    let query = Query::new(endpoint, period);
    let svg = handler.handle(&query).await?;

    match output {
        Some(path) => {
            std::fs::write(&path, &svg)?;
            info!(path = %path.display(), bytes = svg.len(), "chart written");
        }
        None => std::io::stdout().write_all(svg.as_bytes())?,
    }
    Ok(())
}
