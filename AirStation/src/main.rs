//! AirStation : génération des diffusions et pilotage des moteurs audio
//! des stations.

use anyhow::{anyhow, bail};
use chrono::{Datelike, Local, Months, NaiveDate};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use airconfig::{Config, init_config};
use airmodels::{PlanningMode, Station, Store, StoreConfigExt, planning, slugify};
use airmonitor::{Monitor, MonitorConfigExt, MonitorSettings};
use airstreamer::{Streamer, StreamerConfigExt, StreamerSettings};

#[derive(Parser, Debug)]
#[command(name = "airstation", version)]
#[command(about = "Radio scheduling and playback monitoring")]
struct Cli {
    /// Configuration directory
    #[arg(long, global = true, env = "AIRSTATION_CONFIG")]
    config_dir: Option<String>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate engine files, run the engines and monitor the stations
    Streamer(StreamerArgs),
    /// Generate and clean up the diffusions of a month
    Diffusions(DiffusionsArgs),
    /// List the stations, or register a new one
    Stations(StationsArgs),
}

#[derive(Args, Debug)]
struct StreamerArgs {
    /// Generate the engine script and playlists of the stations
    #[arg(short, long)]
    config: bool,

    /// Monitor the scheduled diffusions and log what happens
    #[arg(short, long)]
    monitor: bool,

    /// Run the engines of the stations
    #[arg(short, long)]
    run: bool,

    /// Restrict to this station (name or slug); can be repeated
    #[arg(short, long = "station")]
    stations: Vec<String>,

    /// Milliseconds between two monitoring passes
    #[arg(short, long)]
    delay: Option<u64>,

    /// Minutes after which a diffusion that did not start is canceled
    #[arg(short, long)]
    timeout: Option<u64>,
}

#[derive(Args, Debug)]
struct DiffusionsArgs {
    /// Generate the diffusions of the month from the schedules
    #[arg(short, long)]
    update: bool,

    /// Remove unconfirmed diffusions before the month
    #[arg(long)]
    clean: bool,

    /// Remove unconfirmed diffusions after the month start that no schedule
    /// matches anymore
    #[arg(long)]
    check: bool,

    #[arg(short, long)]
    year: Option<i32>,

    #[arg(short, long)]
    month: Option<u32>,

    /// Work on the month after the selected one
    #[arg(short, long)]
    next_month: bool,

    /// `manual` leaves generated diffusions unconfirmed, `auto` confirms
    /// those without conflict
    #[arg(long, default_value_t = PlanningMode::Manual)]
    mode: PlanningMode,
}

#[derive(Args, Debug)]
struct StationsArgs {
    /// Register a station; its working directory is created under the
    /// configured stations directory
    #[arg(short, long)]
    add: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = init_config(cli.config_dir.as_deref().unwrap_or(""))?;
    init_tracing(cli.log_level.as_deref(), &config)?;

    let store = Arc::new(config.open_store()?);
    info!(database = %config.database_path().display(), "Database opened");

    match cli.command {
        Command::Streamer(args) => run_streamer(args, &config, store).await,
        Command::Diffusions(args) => run_diffusions(&args, &store),
        Command::Stations(args) => run_stations(&args, &config, &store),
    }
}

/// `RUST_LOG` l'emporte sur `--log-level`, qui l'emporte sur la
/// configuration.
fn init_tracing(flag: Option<&str>, config: &Config) -> anyhow::Result<()> {
    let level = match flag {
        Some(level) => level.to_string(),
        None => config.get_log_min_level()?,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
    Ok(())
}

// ============================================================================
// streamer
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Actions {
    config: bool,
    monitor: bool,
    run: bool,
}

async fn run_streamer(args: StreamerArgs, config: &Config, store: Arc<Store>) -> anyhow::Result<()> {
    let actions = Actions {
        config: args.config,
        monitor: args.monitor,
        run: args.run,
    };
    if !(actions.config || actions.monitor || actions.run) {
        bail!("nothing to do: use --config, --monitor or --run");
    }

    let stations = select_stations(&store, &args.stations)?;
    if stations.is_empty() {
        warn!("No station to handle");
        return Ok(());
    }

    let streamer_settings = config.streamer_settings();
    let mut monitor_settings = config.monitor_settings();
    if let Some(delay) = args.delay {
        monitor_settings.delay = Duration::from_millis(delay);
    }
    if let Some(timeout) = args.timeout {
        monitor_settings.cancel_timeout = airmonitor::monitor::minutes(timeout)
            .ok_or_else(|| anyhow!("timeout too large: {timeout} minutes"))?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        flag.store(true, Ordering::Relaxed);
    });

    let mut tasks = Vec::with_capacity(stations.len());
    for station in stations {
        let store = store.clone();
        let shutdown = shutdown.clone();
        let streamer_settings = streamer_settings.clone();
        let monitor_settings = monitor_settings.clone();
        let name = station.name.clone();
        let task = tokio::task::spawn_blocking(move || {
            handle_station(
                station,
                &store,
                streamer_settings,
                monitor_settings,
                actions,
                &shutdown,
            )
        });
        tasks.push((name, task));
    }

    for (name, task) in tasks {
        if let Err(err) = task.await? {
            error!(station = %name, "{:#}", err);
        }
    }
    Ok(())
}

fn select_stations(store: &Store, names: &[String]) -> anyhow::Result<Vec<Station>> {
    if names.is_empty() {
        return Ok(store.stations()?);
    }
    let mut stations = Vec::with_capacity(names.len());
    for name in names {
        match store.station_by_name(name)? {
            Some(station) => stations.push(station),
            None => warn!(station = %name, "Unknown station"),
        }
    }
    Ok(stations)
}

fn handle_station(
    station: Station,
    store: &Arc<Store>,
    streamer_settings: StreamerSettings,
    monitor_settings: MonitorSettings,
    actions: Actions,
    shutdown: &AtomicBool,
) -> anyhow::Result<()> {
    let mut streamer = Streamer::from_store(store, station, streamer_settings)?;
    if actions.config {
        streamer.make_config(store)?;
    }
    if actions.run {
        streamer.run_process()?;
    }

    if actions.monitor {
        let mut monitor = Monitor::new(streamer, store.clone(), monitor_settings);
        monitor.run(shutdown, actions.run);
    } else if actions.run {
        while !shutdown.load(Ordering::Relaxed) && streamer.is_running() {
            std::thread::sleep(monitor_settings.delay);
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl+C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Cannot listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}

// ============================================================================
// diffusions
// ============================================================================

fn run_diffusions(args: &DiffusionsArgs, store: &Store) -> anyhow::Result<()> {
    if !(args.update || args.clean || args.check) {
        bail!("nothing to do: use --update, --clean or --check");
    }

    let today = Local::now().date_naive();
    let year = args.year.unwrap_or(today.year());
    let month = args.month.unwrap_or(today.month());
    let mut first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| anyhow!("invalid month {year}-{month}"))?;
    if args.next_month {
        first = first
            .checked_add_months(Months::new(1))
            .ok_or_else(|| anyhow!("no month after {first}"))?;
    }
    let date = first.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc();

    if args.update {
        let count = planning::update(store, first, args.mode)?;
        info!(month = %first.format("%Y-%m"), mode = %args.mode, "{} diffusion(s) generated", count);
    }
    if args.clean {
        let count = planning::clean(store, date)?;
        info!("{} unconfirmed diffusion(s) removed before {}", count, first);
    }
    if args.check {
        let count = planning::check(store, date)?;
        info!("{} orphan diffusion(s) removed after {}", count, first);
    }
    Ok(())
}

// ============================================================================
// stations
// ============================================================================

fn run_stations(args: &StationsArgs, config: &Config, store: &Store) -> anyhow::Result<()> {
    if let Some(name) = &args.add {
        if store.station_by_name(name)?.is_some() {
            bail!("station {name:?} already exists");
        }
        let path = config.stations_dir()?.join(slugify(name));
        std::fs::create_dir_all(&path)?;
        let station = store.insert_station(name, &path)?;
        info!(station = %station.name, "Station registered in {}", path.display());
    }

    for station in store.stations()? {
        println!("{}\t{}\t{}", station.slug, station.name, station.path.display());
    }
    Ok(())
}
