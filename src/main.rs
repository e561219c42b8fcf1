//! Kawka - WebSocket to Kafka bridge
//!
//! Usage:
//!   kawka [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>     Configuration file path
//!   -B, --brokers <LIST>    Kafka brokers, comma-separated (required)
//!   -b, --bind <ADDR>       WebSocket bind address (default: 0.0.0.0:5987)
//!   -p, --path <PATH>       WebSocket request path (default: /ws)
//!   -m, --mode <MODE>       Publish mode: sync or async (default: sync)
//!   -l, --log-level         Log level (error, warn, info, debug, trace)
//!   -h, --help              Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use kawka::config::{parse_brokers, Config};
use kawka::publisher::{KafkaClient, PublishMode, Publisher};
use kawka::transform::EnvelopeTransform;
use kawka::{Bridge, Metrics, MetricsServer};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    Warn,
    /// Informational messages
    #[default]
    Info,
    /// Debug messages
    Debug,
    /// Trace messages (very verbose)
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Level {
        match self {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }

    fn from_config(level: &str) -> Self {
        match level.to_lowercase().as_str() {
            "error" => LogLevel::Error,
            "warn" => LogLevel::Warn,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Info,
        }
    }
}

/// Kawka - WebSocket to Kafka bridge
#[derive(Parser, Debug)]
#[command(name = "kawka")]
#[command(author = "Kawka Contributors")]
#[command(version)]
#[command(about = "Bridge persistent WebSocket connections to Kafka topics")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Kafka brokers, comma-separated (host:port,host:port)
    #[arg(short = 'B', long)]
    brokers: Option<String>,

    /// WebSocket bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// WebSocket request path
    #[arg(short, long)]
    path: Option<String>,

    /// Publish mode
    #[arg(short, long, value_enum)]
    mode: Option<PublishMode>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

/// Config file (or environment), then CLI overrides, then validation
fn resolve_config(args: &Args) -> Result<Config, kawka::config::ConfigError> {
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };

    if let Some(brokers) = &args.brokers {
        config.kafka.brokers = parse_brokers(brokers);
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(path) = &args.path {
        config.server.path = path.clone();
    }
    if let Some(mode) = args.mode {
        config.publisher.mode = mode;
    }

    config.validate()?;
    config.require_brokers()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match resolve_config(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // CLI overrides config
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&config.log.level));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level.to_tracing_level())
        .with_target(false)
        .with_thread_ids(true)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    if let Some(path) = &args.config {
        info!("Loaded configuration from {:?}", path);
    }

    info!("Starting Kawka");
    info!("  Bind address: ws://{}{}", config.server.bind, config.server.path);
    info!("  Brokers: {}", config.kafka.brokers.join(","));
    info!("  Publish mode: {}", config.publisher.mode);
    info!("  Payload: {:?}", config.transform.payload);
    info!(
        "  Max message size: {} bytes",
        config.session.max_message_size
    );
    info!("  Idle timeout: {:?}", config.session.idle_timeout);
    if config.server.max_connections == 0 {
        info!("  Max connections: unlimited");
    } else {
        info!("  Max connections: {}", config.server.max_connections);
    }

    let client = match KafkaClient::new(&config.kafka) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to create Kafka client: {}", e);
            std::process::exit(1);
        }
    };

    let (metrics_shutdown, _) = broadcast::channel(1);
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new());
        match MetricsServer::bind(metrics.clone(), config.metrics.bind).await {
            Ok(server) => {
                info!("  Metrics: enabled (http://{})", config.metrics.bind);
                let shutdown = metrics_shutdown.subscribe();
                tokio::spawn(async move {
                    if let Err(e) = server.run(shutdown).await {
                        error!("Metrics server error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Failed to bind metrics server {}: {}", config.metrics.bind, e);
                std::process::exit(1);
            }
        }
        Some(metrics)
    } else {
        info!("  Metrics: disabled");
        None
    };

    let publisher = Publisher::from_config(client, &config.publisher, metrics.clone());
    let bridge = Arc::new(
        Bridge::builder(publisher)
            .config(config.bridge_config())
            .transform(Arc::new(EnvelopeTransform::new(config.transform.payload)))
            .metrics(metrics)
            .build(),
    );

    let grace = config.publisher.shutdown_grace;
    let addr = config.server.bind;
    let runner = bridge.clone();
    let mut server = tokio::spawn(async move { runner.serve(addr).await });

    tokio::select! {
        served = &mut server => {
            // The accept loop only ends on its own when binding fails
            match served {
                Ok(Err(e)) => error!("{}", e),
                Ok(Ok(())) => error!("Accept loop ended unexpectedly"),
                Err(e) => error!("Accept loop panicked: {}", e),
            }
            std::process::exit(1);
        }
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                error!("Failed to listen for Ctrl+C: {}", e);
            }
            info!("Shutting down");
            bridge.stop(grace).await;
            if let Ok(Err(e)) = server.await {
                error!("{}", e);
            }
        }
    }
    let _ = metrics_shutdown.send(());

    info!("Kawka stopped");
    Ok(())
}
