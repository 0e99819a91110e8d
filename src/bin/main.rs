use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use fleet_supervisor::cli::Cli;
use fleet_supervisor::config::loader::{FleetConfigStore, FleetConfigStoreFile};
use fleet_supervisor::context::Context;
use fleet_supervisor::event::channel::bounded;
use fleet_supervisor::event::event::Event;
use fleet_supervisor::fleet::{FleetError, FleetManager};
use fleet_supervisor::logging::Logging;
use fleet_supervisor::metrics::store::MetricsStore;

use tracing::{error, info};

const EVENT_DRAIN_INTERVAL: Duration = Duration::from_millis(300);
const LOG_DIR: &str = "logs";
const METRICS_DB: &str = "metrics.db";

fn main() {
    let cli = Cli::init_fleet_cli();

    if cli.print_debug_info() {
        if let Err(e) = Logging::try_init() {
            eprintln!("failed to init logging: {e}");
        }
        print_debug_info(&cli);
        return;
    }

    let log_dir = PathBuf::from(LOG_DIR);
    let _guard = match Logging::try_init_with_file(&log_dir) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("failed to init logging: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli, log_dir) {
        error!(error = %e, "fleet supervisor exited with an error");
        std::process::exit(1);
    }
}

fn run(cli: Cli, log_dir: PathBuf) -> Result<(), FleetError> {
    info!("starting fleet supervisor");

    let shutdown: Context<bool> = Context::new();
    create_shutdown_signal_handler(shutdown.clone());

    let metrics = Arc::new(
        MetricsStore::open(METRICS_DB).expect("failed to open metrics store"),
    );
    let (publisher, consumer) = bounded(fleet_supervisor::event::channel::DEFAULT_CAPACITY);

    let store = Box::new(FleetConfigStoreFile::new(&cli.get_config_path()));
    let mut fleet = FleetManager::new(store, metrics, publisher, log_dir);
    fleet.load()?;

    info!(hosts = fleet.host_names().count(), "fleet loaded");
    fleet.start_all();

    loop {
        for event in consumer.drain() {
            log_event(&event);
        }

        if shutdown.wait_timeout_cancelled(EVENT_DRAIN_INTERVAL) {
            break;
        }
    }

    info!("shutdown requested, stopping fleet");
    fleet.shutdown_all();
    for event in consumer.drain() {
        log_event(&event);
    }

    Ok(())
}

fn log_event(event: &Event) {
    match event {
        Event::StateChanged { host_name, state } => {
            info!(host = %host_name, status = ?state.status, error = ?state.last_error, "state changed");
        }
        Event::LogLine { host_name, line, .. } => {
            info!(host = %host_name, "{line}");
        }
        Event::Metrics { host_name, sample } => {
            tracing::debug!(host = %host_name, cpu = ?sample.cpu_pct, "metrics sample");
        }
    }
}

fn create_shutdown_signal_handler(ctx: Context<bool>) {
    let result = ctrlc::set_handler(move || {
        info!("received interrupt signal, shutting down");
        let _ = ctx.cancel_all(true);
    });
    if let Err(e) = result {
        error!(error = %e, "could not set Ctrl+C handler");
    }
}

fn print_debug_info(cli: &Cli) {
    println!("Printing debug info");
    println!("config path: {}", cli.get_config_path().display());

    let store = FleetConfigStoreFile::new(&cli.get_config_path());
    match store.load() {
        Ok(config) => {
            println!("servers configured: {}", config.servers.len());
            for spec in &config.servers {
                println!("{spec:#?}");
            }
        }
        Err(e) => println!("failed to load config: {e}"),
    }
}
