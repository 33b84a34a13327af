//! HQS - Hosted Queue Service
//!
//! Serves in-memory message queues with at-least-once delivery, visibility
//! timeouts and signed receipt handles over a JSON HTTP protocol.

mod config;
mod router;

use clap::Parser;
use hqs_queue::{Capabilities, NoopJournal, QueueService, SystemClock, UuidIds};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "hqs")]
#[command(about = "Hosted queue service", long_about = None)]
struct Args {
    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "HQS_PORT")]
    port: Option<u16>,

    /// Host to bind to (overrides the config file)
    #[arg(long, env = "HQS_HOST")]
    host: Option<String>,

    /// Configuration file; `hqs.toml` in the working directory is read if present
    #[arg(short, long, env = "HQS_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "HQS_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!(
                    "hqs={level},hqs_queue={level},tower_http=debug",
                    level = args.log_level
                )
                .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = config::Config::load(args.config.as_deref())?;
    let port = args.port.unwrap_or(config.server.port);
    let host = args.host.clone().unwrap_or_else(|| config.server.host.clone());
    let settings = config.service_settings(port)?;

    let caps = Capabilities {
        clock: Arc::new(SystemClock::new()),
        ids: Arc::new(UuidIds),
        codec: Arc::new(config.receipts.codec()?),
        journal: Arc::new(NoopJournal),
    };

    info!("Starting HQS...");
    info!("  Queue URLs: {}/{}", settings.base_url, settings.account_id);
    info!(
        "  Receipt secret: {}",
        if config.receipts.secret.is_some() { "configured" } else { "random" }
    );

    let service = Arc::new(QueueService::new(caps, settings));
    let app = router::create_router(service);

    // Start server
    let addr: SocketAddr = format!("{host}:{port}").parse()?;
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
