//! VibeGate receptionist
//!
//! Usage:
//!   vibegate [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>      Configuration file path
//!   -b, --bind <ADDR>        Receptionist bind address (default: 127.0.0.1:50051)
//!   --buffer-size <N>        Replies buffered per session (default: 1000)
//!   --echo <PATH>            Register an echo service at PATH (repeatable)
//!   -l, --log-level          Log level (error, warn, info, debug, trace)
//!   -h, --help               Print help

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use vibegate::config::Config;
use vibegate::{
    CodecRegistry, EchoService, GatewayMetrics, GatewayServer, LocalMediator, MetricsServer,
    ServerSettings,
};

/// Log level for CLI
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum LogLevel {
    /// Only errors
    Error,
    /// Warnings and errors
    #[default]
    Warn,
    /// Informational messages
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
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    }
}

/// VibeGate - cluster client gateway
#[derive(Parser, Debug)]
#[command(name = "vibegate")]
#[command(author = "VibeGate Contributors")]
#[command(version = "0.1.0")]
#[command(about = "Receptionist relaying external client sessions into a cluster")]
struct Args {
    /// Configuration file path (TOML format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Receptionist bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Replies buffered per session before the oldest is dropped
    #[arg(long)]
    buffer_size: Option<usize>,

    /// Register an echo service at this path (repeatable)
    #[arg(long = "echo", value_name = "PATH")]
    echo: Vec<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, value_enum)]
    log_level: Option<LogLevel>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration file if specified, otherwise environment and defaults
    let file_config = match &args.config {
        Some(config_path) => Config::load(config_path),
        None => Config::from_env(),
    };
    let file_config = match file_config {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Error loading configuration: {}", e);
            std::process::exit(1);
        }
    };

    // CLI overrides config, config overrides default (warn)
    let log_level = args
        .log_level
        .unwrap_or_else(|| LogLevel::from_config(&file_config.log.level));

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

    let mut settings = ServerSettings::from(&file_config.receptionist);
    if let Some(bind) = args.bind {
        settings.bind_addr = bind;
    }
    if let Some(buffer_size) = args.buffer_size {
        settings.buffer_size = buffer_size;
    }

    info!("Starting VibeGate receptionist");
    info!("  Bind address: {}", settings.bind_addr);
    info!("  Session buffer: {} replies", settings.buffer_size);
    info!("  Ask timeout: {:?}", settings.ask_send_timeout);
    info!("  Max frame size: {} bytes", settings.max_frame_size);

    let metrics = if file_config.metrics.enabled {
        info!("  Metrics: enabled (http://{})", file_config.metrics.bind);
        Some(Arc::new(GatewayMetrics::new()))
    } else {
        info!("  Metrics: disabled");
        None
    };

    let mediator = Arc::new(LocalMediator::new(
        file_config.receptionist.reply_on_no_match,
    ));
    let server = GatewayServer::new(
        settings,
        mediator,
        Arc::new(CodecRegistry::with_defaults()),
        metrics.clone(),
    );

    for path in &args.echo {
        match server.register_service(EchoService::spawn(path.as_str())) {
            Ok(()) => info!("  Echo service: {}", path),
            Err(e) => {
                eprintln!("Cannot register echo service '{}': {}", path, e);
                std::process::exit(1);
            }
        }
    }

    if let Some(metrics) = metrics {
        let metrics_server = MetricsServer::new(metrics, file_config.metrics.bind);
        let scope = server.scope().clone();
        tokio::spawn(async move {
            if let Err(e) = metrics_server.run(scope).await {
                error!("Metrics server error: {}", e);
            }
        });
    }

    let shutdown = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down");
            shutdown.shutdown();
        }
    });

    server.run().await?;

    Ok(())
}
