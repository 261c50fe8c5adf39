//! outbound-groups: Outbound group runner
//!
//! Loads a configuration, builds every outbound and group, starts URL test
//! probing and reports group selections until interrupted.
//!
//! # Usage
//!
//! ```bash
//! # Run with default configuration
//! ./outbound-groups
//!
//! # Run with custom configuration
//! ./outbound-groups -c /path/to/config.json
//!
//! # Run with environment overrides
//! OUTBOUND_GROUPS_LOG_LEVEL=debug ./outbound-groups
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use outbound_groups::config::{load_config_with_env, Config};
use outbound_groups::outbound::{OutboundManager, OutboundManagerBuilder};

/// Interval between group status reports
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Generate default configuration
    generate_config: bool,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/outbound-groups/config.json");
        let mut generate_config = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("outbound-groups v{}", outbound_groups::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r"outbound-groups v{}

Selector, URL test and load balance outbound groups.

USAGE:
    outbound-groups [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: /etc/outbound-groups/config.json]
    -g, --generate-config   Generate default configuration and exit
    --check                 Check configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    OUTBOUND_GROUPS_LOG_LEVEL    Override log level (trace, debug, info, warn, error)
    OUTBOUND_GROUPS_LOG_FORMAT   Override log format (json, text)
    RUST_LOG                     Additional tracing directives
",
        outbound_groups::VERSION
    );
}

/// Initialize logging
fn init_logging(config: &Config) -> Result<()> {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?)
        .add_directive("tokio=warn".parse()?);

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(config.log.target);

    match (config.log.format.as_str(), config.log.timestamps) {
        ("json", true) => subscriber.json().init(),
        ("json", false) => subscriber.json().without_time().init(),
        (_, true) => subscriber.init(),
        (_, false) => subscriber.without_time().init(),
    }
    Ok(())
}

/// Build outbound manager from configuration
fn build_outbound_manager(config: &Config) -> Result<Arc<OutboundManager>> {
    let mut builder = OutboundManagerBuilder::new();
    builder
        .add_all_from_config(&config.outbounds)
        .context("Failed to build outbounds")?;
    let manager = builder.build();

    info!(
        "Initialized {} outbounds ({} groups): {:?}",
        manager.len(),
        manager.groups().len(),
        manager.tags()
    );

    Ok(Arc::new(manager))
}

/// Main application entry point
#[tokio::main]
async fn main() -> Result<()> {
    let start_time = Instant::now();

    // Parse arguments
    let args = Args::parse();

    // Handle generate-config
    if args.generate_config {
        outbound_groups::config::create_default_config(&args.config_path)?;
        println!("Generated default configuration at {:?}", args.config_path);
        return Ok(());
    }

    // Load configuration
    let config = load_config_with_env(&args.config_path).with_context(|| {
        format!("Failed to load configuration from {:?}", args.config_path)
    })?;

    // Handle check-config
    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config)?;

    info!("outbound-groups v{}", outbound_groups::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    let manager = build_outbound_manager(&config)?;
    manager
        .start_groups()
        .context("Failed to start outbound groups")?;

    info!(
        "Startup complete in {:.2}ms",
        start_time.elapsed().as_secs_f64() * 1000.0
    );

    // Report selections until a signal arrives
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    let mut status = tokio::time::interval(STATUS_INTERVAL);
    loop {
        tokio::select! {
            _ = status.tick() => manager.log_status(),
            result = &mut shutdown => {
                info!("Received {}, initiating shutdown...", result?);
                break;
            }
        }
    }

    info!("Shutting down...");
    manager.close_groups().await;
    manager.log_status();
    info!("Shutdown complete");

    Ok(())
}

/// Wait for SIGINT or SIGTERM, returning the signal name
async fn shutdown_signal() -> Result<&'static str> {
    tokio::select! {
        result = signal::ctrl_c() => {
            result.context("Failed to listen for SIGINT")?;
            Ok("SIGINT")
        }
        result = wait_for_sigterm() => {
            result?;
            Ok("SIGTERM")
        }
    }
}

/// Wait for SIGTERM signal
#[cfg(unix)]
async fn wait_for_sigterm() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    sigterm.recv().await;
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> Result<()> {
    // On non-Unix platforms, just wait forever
    std::future::pending::<()>().await;
    Ok(())
}
