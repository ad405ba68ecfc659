use clap::{Parser, ValueEnum};
use std::net::{Ipv4Addr, SocketAddr};
use std::panic::{self, PanicHookInfo};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vand::{Config, PrometheusRegistry, RunError, app, parse_duration, radio};

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, about, version)]
struct Options {
    /// Path to the JSON configuration file.
    config_path: PathBuf,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(long)]
    debug: bool,

    /// Log output format.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override how long the discovery scan runs.
    /// Accepts duration with suffix: 3s, 1m, 500ms, 2h.
    /// Without suffix, value is interpreted as seconds.
    #[arg(long, value_parser = parse_duration)]
    scan_time: Option<Duration>,

    /// Override the interval between metric refreshes.
    #[arg(long, value_parser = parse_duration)]
    refresh_interval: Option<Duration>,

    /// Override the Prometheus exporter port.
    #[arg(long)]
    port: Option<u16>,
}

fn init_logging(options: &Options) {
    let level = if options.debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match options.log_format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

/// Resolve once Ctrl+C or SIGTERM is received.
async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM, only Ctrl+C will stop");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received Ctrl+C, shutting down");
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C, shutting down");
    }
}

/// Load the configuration, start the exporter and monitor every device until
/// a shutdown signal arrives.
///
/// # Errors
/// Returns `RunError` if the configuration is invalid, Bluetooth cannot be
/// initialized, or the exporter port cannot be bound.
async fn run(options: Options) -> Result<(), RunError> {
    let config = Config::load(&options.config_path)?.with_overrides(
        options.scan_time,
        options.refresh_interval,
        options.port,
    )?;
    info!(
        path = %options.config_path.display(),
        li3 = config.li3.len(),
        govee = config.govee.len(),
        "Loaded configuration"
    );

    let radio = radio::default_radio().await?;
    let registry = Arc::new(PrometheusRegistry::new());
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.process.exporter_port));

    app::serve(config, radio, registry, addr, wait_for_signal()).await
}

#[tokio::main]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_logging(&options);

    match run(options).await {
        Ok(_) => std::process::exit(EXIT_SUCCESS),
        Err(why) => {
            error!(error = %why, "Exiting");
            std::process::exit(EXIT_ERROR);
        }
    }
}
