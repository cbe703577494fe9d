//! dsync - DICOM archive synchronization
//!
//! Pulls series that are incomplete on the local archive from one configured
//! remote archive. Runs continuously over a rolling window, or once for a
//! single calendar day with `--download-day`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

use dsync::completion::CompletionPolicy;
use dsync::executor::{ExecutorSettings, TransferExecutor};
use dsync::netaddr::{self, DEFAULT_ROUTE_TARGET};
use dsync::scheduler::{CycleScheduler, SchedulerSettings, SyncNodes};
use dsync::selection::SelectionMode;
use dsync::services::{DcmtkClient, InventoryQuery, NetworkTransfer};
use dsync::stability::{JsonFileStore, StabilityTracker};
use dsync_common::config::{resolve_config_path, SyncSettings, TomlConfig, MAX_LOOKBACK_HOURS};
use dsync_common::time::{self as dtime, Clock, SystemClock};

/// Command-line arguments for dsync
#[derive(Parser, Debug)]
#[command(name = "dsync")]
#[command(about = "Synchronize incomplete DICOM series from a remote archive")]
#[command(version)]
struct Args {
    /// Short name of the remote node to pull from
    #[arg(short, long, required_unless_present = "list_nodes")]
    node: Option<String>,

    /// Rolling window in hours (default from config)
    #[arg(
        long,
        value_name = "HOURS",
        value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_LOOKBACK_HOURS))
    )]
    hours: Option<u32>,

    /// Single pass over one day: today, yesterday or YYYYMMDD
    #[arg(long, value_name = "DAY")]
    download_day: Option<String>,

    /// Only series with at most N images; single missing images are transferred too
    #[arg(long, value_name = "N", conflicts_with_all = ["bounded", "all_series"])]
    max_images: Option<i64>,

    /// Only series up to the configured default image bound
    #[arg(long, conflicts_with = "all_series")]
    bounded: bool,

    /// Every incomplete series instead of the smallest per study
    #[arg(long)]
    all_series: bool,

    /// Request only missing images for mostly-complete series
    #[arg(long)]
    image_level: bool,

    /// Keep the configured local IP address
    #[arg(long)]
    no_auto_ip: bool,

    /// Configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// List configured remote nodes and exit
    #[arg(long)]
    list_nodes: bool,
}

impl Args {
    fn selection_mode(&self, sync: &SyncSettings) -> SelectionMode {
        if let Some(max_images) = self.max_images {
            SelectionMode::Bounded {
                max_images,
                explicit: true,
            }
        } else if self.bounded {
            SelectionMode::Bounded {
                max_images: i64::from(sync.default_max_images),
                explicit: false,
            }
        } else if self.all_series || self.download_day.is_some() {
            SelectionMode::All
        } else {
            SelectionMode::SmallestOnly
        }
    }
}

fn load_config(args: &Args) -> Result<TomlConfig> {
    let path = resolve_config_path(args.config.as_deref())?;
    if !path.exists() {
        anyhow::bail!(
            "Configuration file not found at {} (use --config or DSYNC_CONFIG)",
            path.display()
        );
    }
    TomlConfig::load(&path).with_context(|| format!("Failed to load {}", path.display()))
}

/// Handle for swapping in the configured log level once the config is read
type LevelHandle = reload::Handle<EnvFilter, Registry>;

/// Filter layer starting at `RUST_LOG` if set, otherwise `info`.
///
/// The handle is returned only when `RUST_LOG` is absent, since an explicit
/// environment filter wins over the config file.
fn filter_layer(from_env: Option<EnvFilter>) -> (reload::Layer<EnvFilter, Registry>, Option<LevelHandle>) {
    let env_set = from_env.is_some();
    let (layer, handle) = reload::Layer::new(from_env.unwrap_or_else(|| EnvFilter::new("info")));
    (layer, (!env_set).then_some(handle))
}

fn init_tracing() -> Option<LevelHandle> {
    let (filter, handle) = filter_layer(EnvFilter::try_from_default_env().ok());
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    handle
}

fn apply_config_level(handle: Option<LevelHandle>, level: &str) {
    if let Some(handle) = handle {
        if let Err(e) = handle.reload(EnvFilter::new(level)) {
            warn!(level, error = %e, "Could not apply configured log level");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Installed before loading so config notices (e.g. legacy migration) are logged
    let level_handle = init_tracing();
    let mut config = load_config(&args)?;
    apply_config_level(level_handle, &config.logging.level);

    if args.list_nodes {
        for name in config.remote_names() {
            if let Ok(node) = config.remote(&name) {
                println!("{:<16} {}", name, node);
            }
        }
        return Ok(());
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Validate the day before touching the network
    let day = args
        .download_day
        .as_deref()
        .map(|keyword| dtime::parse_day_keyword(keyword, clock.local_now().date()))
        .transpose()
        .context("Invalid --download-day")?;

    let remote_name = args.node.clone().unwrap_or_default();
    let remote = config
        .remote(&remote_name)
        .context("Unknown remote node")?
        .clone();

    if !args.no_auto_ip {
        if let Some(ip) = netaddr::detect_local_ip(DEFAULT_ROUTE_TARGET) {
            let ip = ip.to_string();
            if ip != config.local.ip_address {
                info!(
                    configured = %config.local.ip_address,
                    detected = %ip,
                    "Local IP address changed; using detected address"
                );
                config.local.ip_address = ip;
            }
        }
    }

    let nodes = SyncNodes {
        remote_name,
        remote,
        local: config.local.clone(),
    };
    let mode = args.selection_mode(&config.sync);

    info!("Starting dsync {}", env!("CARGO_PKG_VERSION"));
    info!(remote = %nodes.remote, local = %nodes.local, "Nodes");
    info!(
        destination = %nodes.destination(),
        transfer_syntax = nodes.remote.transfer_syntax.name(),
        "C-MOVE destination"
    );
    info!(mode = %mode, image_level = args.image_level, "Selection");

    let client = Arc::new(DcmtkClient::new(
        config.dcmtk.clone(),
        config.calling_ae_title.clone(),
    ));
    let query: Arc<dyn InventoryQuery> = client.clone();
    let transfer: Arc<dyn NetworkTransfer> = client;

    let executor = TransferExecutor::new(
        query.clone(),
        transfer,
        clock.clone(),
        ExecutorSettings {
            image_level: args.image_level,
            image_level_threshold: config.sync.image_level_threshold,
            completion: CompletionPolicy::from(&config.sync),
        },
    );
    let tracker = StabilityTracker::new(
        Box::new(JsonFileStore::new(config.state_file_path())),
        clock.clone(),
    );
    let mut scheduler = CycleScheduler::new(
        query,
        executor,
        tracker,
        clock,
        nodes,
        mode,
        SchedulerSettings::from(&config.sync),
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));

    match day {
        Some(day) => {
            let report = scheduler.run_single_day(day, &cancel).await;
            info!(
                studies = report.studies_found,
                transferred = report.statistics.transferred_series,
                failed = report.statistics.failed_series,
                images = report.images_transferred(),
                "Download complete"
            );
        }
        None => {
            let hours = args.hours.unwrap_or(config.sync.lookback_hours);
            info!(
                hours,
                state_file = %config.state_file_path().display(),
                "Starting continuous synchronization (Ctrl+C to stop)"
            );
            scheduler.run_continuous(hours, cancel).await;
        }
    }

    Ok(())
}

/// Cancel `token` on Ctrl+C or SIGTERM
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, stopping after the current transfer");
        },
        _ = terminate => {
            info!("Received terminate signal, stopping after the current transfer");
        },
    }
    token.cancel();
}
