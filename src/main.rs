//! fetchfox-mcp: MCP server exposing FetchFox crawl, extract and scrape jobs
//!
//! Serves the tools over stdio by default, or over streamable HTTP with
//! `--transport http`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use fetchfox_mcp::config::{self, Config, TransportKind};
use fetchfox_mcp::fetchfox::FetchFoxClient;
use fetchfox_mcp::invocation::ToolController;
use fetchfox_mcp::mcp::http;
use fetchfox_mcp::mcp::server::McpServer;

/// MCP server exposing FetchFox web extraction jobs as tools.
///
/// Set `FETCHFOX_API_KEY`, or have clients send their key as a bearer token.
#[derive(Parser, Debug)]
#[command(name = "fetchfox-mcp")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Transport to serve (overrides the config file)
    #[arg(short, long, value_enum)]
    transport: Option<TransportKind>,

    /// Port for the HTTP transport (overrides the config file and PORT)
    #[arg(short, long)]
    port: Option<u16>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Determines the log level from CLI arguments.
#[allow(clippy::match_same_arms)] // Explicit "warn" arm for clarity
fn get_log_level(verbose: u8, quiet: bool, config_level: &str) -> Level {
    if quiet {
        return Level::ERROR;
    }

    match verbose {
        0 => match config_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::WARN, // Default to warn for unknown levels
        },
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// Initialises the tracing subscriber for logging.
///
/// Logs go to stderr; stdout carries MCP messages on the stdio transport.
fn init_tracing(level: Level) {
    let filter = EnvFilter::from_default_env().add_directive(level.into());

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Loads the config file, then applies environment and CLI overrides.
fn load(args: &Args) -> Result<Config, fetchfox_mcp::error::ConfigError> {
    let mut cfg = config::load_config(args.config.as_deref())?;
    cfg.apply_env()?;
    if let Some(transport) = args.transport {
        cfg.server.transport = transport;
    }
    if let Some(port) = args.port {
        cfg.server.port = port;
    }
    cfg.validate()?;
    Ok(cfg)
}

/// Resolves when the process is asked to stop.
#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let (Ok(mut sigint), Ok(mut sigterm)) = (
        signal(SignalKind::interrupt()),
        signal(SignalKind::terminate()),
    ) else {
        warn!("Could not install signal handlers");
        return std::future::pending().await;
    };

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT, initiating graceful shutdown"),
        _ = sigterm.recv() => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}

/// Resolves when the process is asked to stop.
#[cfg(windows)]
async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Received Ctrl+C, initiating graceful shutdown");
    } else {
        warn!("Could not install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

/// Entry point for the fetchfox-mcp server.
fn main() -> ExitCode {
    let args = Args::parse();

    let cfg = match load(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            if args.config.is_none() {
                if let Some(default_path) = config::default_config_path() {
                    eprintln!("\nConfig is read from: {}", default_path.display());
                    eprintln!("See config/example-config.json for the format");
                }
            }
            return ExitCode::FAILURE;
        }
    };

    // Initialise logging
    let log_level = get_log_level(args.verbose, args.quiet, &cfg.logging.level);
    init_tracing(log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        transport = ?cfg.server.transport,
        "Starting fetchfox-mcp server"
    );

    // Validated by load()
    let host = match cfg.fetchfox.host_url() {
        Ok(host) => host,
        Err(e) => {
            error!(error = %e, "Invalid FetchFox host");
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(async {
        let client = FetchFoxClient::new(
            host,
            cfg.fetchfox.poll_interval(),
            cfg.fetchfox.request_timeout(),
        )
        .map_err(std::io::Error::other)?;

        info!(host = %client.host(), "FetchFox client ready");

        let controller = ToolController::new(Arc::new(client), cfg.fetchfox.api_key.clone());
        if !controller.has_default_credential() {
            warn!("No FETCHFOX_API_KEY set; every call must carry a bearer token");
        }
        let server = Arc::new(McpServer::new(controller));

        match cfg.server.transport {
            TransportKind::Stdio => {
                info!("MCP server ready, waiting for client connection...");
                server.run_stdio().await
            }
            TransportKind::Http => {
                http::serve(
                    server,
                    cfg.server.socket_addr(),
                    cfg.server.session_idle_timeout(),
                    shutdown_signal(),
                )
                .await
            }
        }
    });

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}
