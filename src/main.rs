use std::path::PathBuf;

use clap::Parser;
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use pacer::config::{LoggingConfig, PacerConfig};
use pacer::ratelimit::RateLimiter;
use pacer::task::{TaskQueue, Unit};
use pacer::timer::IntervalTimerSource;

/// Pace simulated DNS NOTIFY messages through a rate limiter.
#[derive(Debug, Parser)]
#[command(name = "pacer", version, about)]
struct Args {
    /// Configuration file (format follows the extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of secondaries to notify
    #[arg(short = 'n', long, default_value_t = 5)]
    count: u32,

    /// Override the configured interval, in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Zone whose secondaries are notified
    #[arg(long, default_value = "example.com")]
    zone: String,

    /// Zone serial carried in the notifications
    #[arg(long, default_value_t = 1)]
    serial: u32,

    /// Emit JSON log lines
    #[arg(long)]
    json: bool,
}

/// A NOTIFY for one secondary server.
#[derive(Debug)]
struct Notify {
    zone: String,
    serial: u32,
    secondary: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PacerConfig::load(path)?,
        None => PacerConfig::default(),
    };
    if let Some(interval_ms) = args.interval_ms {
        config.limiter.interval_ms = interval_ms;
    }
    if args.json {
        config.logging.json = true;
    }
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting pacer");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));
    info!(
        limiter = %config.limiter.name,
        interval_ms = config.limiter.interval_ms,
        "Configuration loaded"
    );

    let (delivered_tx, mut delivered_rx) = mpsc::unbounded_channel();
    let (task, worker) = TaskQueue::spawn(config.limiter.name.clone(), move |unit: Unit<Notify>| {
        let canceled = unit.is_canceled();
        let notify = unit.into_inner();
        if canceled {
            warn!(zone = %notify.zone, serial = notify.serial, secondary = %notify.secondary, "NOTIFY canceled");
        } else {
            info!(zone = %notify.zone, serial = notify.serial, secondary = %notify.secondary, "Sending NOTIFY");
        }
        let _ = delivered_tx.send(());
    });

    let timers = IntervalTimerSource::current()?;
    let limiter = RateLimiter::from_config(&config.limiter, &timers, task.clone())?;
    info!(limiter = %limiter.name(), "Rate limiter initialized");

    for i in 0..args.count {
        let notify = Notify {
            zone: args.zone.clone(),
            serial: args.serial,
            secondary: format!("192.0.2.{}", i + 1),
        };
        if let Err(e) = limiter.enqueue(Unit::new(notify)) {
            warn!(error = %e, "NOTIFY was not throttled");
        }
    }

    let count = args.count;
    let released = async move {
        let mut seen = 0;
        while seen < count && delivered_rx.recv().await.is_some() {
            seen += 1;
        }
    };

    tokio::select! {
        _ = released => {
            info!("All NOTIFY messages released");
        }
        _ = shutdown_signal() => {
            info!(pending = limiter.pending_len(), "Shutdown requested, canceling queued NOTIFY messages");
        }
    }

    limiter.shutdown();
    limiter.destroy().wait().await?;
    drop(task);
    worker.await?;

    info!("pacer stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG wins over the configured level.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }
}
