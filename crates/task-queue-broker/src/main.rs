use task_queue_broker::{Broker, BrokerConfig, BrokerMetrics};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use axum::{extract::State, http::StatusCode, routing::get, Router};

#[derive(Parser, Debug)]
#[command(name = "tq-broker")]
#[command(about = "Task queue broker with a plain-text TCP protocol")]
#[command(long_about = "Task queue broker with a plain-text TCP protocol.\n\n\
    -c/--config names the YAML configuration file, not the snapshot. \
    Pass the snapshot path with -s/--snapshot.")]
struct Args {
    /// Path to the YAML configuration file (optional). The snapshot path is -s
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Listen address
    #[arg(short = 'i', long)]
    host: Option<String>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Snapshot file used by SAVE and at startup (JSON)
    #[arg(short, long)]
    snapshot: Option<PathBuf>,

    /// Lease visibility timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Background lease sweep interval in seconds (0 = only on incoming commands)
    #[arg(long)]
    sweep_interval: Option<u64>,

    /// Serve Prometheus metrics on this port
    #[arg(long)]
    prometheus_port: Option<u16>,

    /// Write a snapshot on shutdown
    #[arg(long)]
    save_on_shutdown: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration
    let config_found = args.config.exists();
    let mut config = if config_found {
        BrokerConfig::from_file(&args.config)?
    } else {
        BrokerConfig::default()
    };

    // Override with CLI args
    if let Some(host) = args.host {
        config.broker.host = host;
    }
    if let Some(port) = args.port {
        config.broker.port = port;
    }
    if let Some(snapshot) = args.snapshot {
        config.persistence.snapshot_path = snapshot;
    }
    if let Some(timeout) = args.timeout {
        config.lease.visibility_timeout_secs = timeout;
    }
    if let Some(interval) = args.sweep_interval {
        config.lease.sweep_interval_secs = interval;
    }
    if let Some(port) = args.prometheus_port {
        config.monitoring.prometheus_port = Some(port);
    }
    if args.save_on_shutdown {
        config.persistence.save_on_shutdown = true;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if !config_found {
        tracing::warn!("Config file {:?} not found, using defaults", args.config);
    }

    tracing::info!("Starting broker with config: {:?}", config);

    // Create broker
    let broker = Arc::new(Broker::new(config.clone())?);

    // Start metrics server
    if let Some(port) = config.monitoring.prometheus_port {
        let metrics = broker.metrics();
        let host = config.broker.host.clone();
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(metrics, &host, port).await {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    // Stop on Ctrl-C
    let signal_broker = broker.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                tracing::info!("Interrupt received");
                signal_broker.shutdown();
            }
            Err(e) => tracing::error!("Failed to listen for interrupt: {}", e),
        }
    });

    // Run broker
    broker.run().await?;

    tracing::info!("Done");
    Ok(())
}

async fn start_metrics_server(metrics: Arc<BrokerMetrics>, host: &str, port: u16) -> anyhow::Result<()> {
    async fn metrics_handler(State(metrics): State<Arc<BrokerMetrics>>) -> Result<String, StatusCode> {
        metrics.render().map_err(|e| {
            tracing::error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
    }

    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metrics);

    let addr = format!("{}:{}", host, port);
    tracing::info!("Metrics server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
