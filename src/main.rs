pub mod models {
    pub mod chart;
    pub mod openweather;
}

pub mod client;
pub mod config;
pub mod db {
    pub mod models;
    pub mod store;
}
pub mod logging;
pub mod schema;
pub mod sensors;
pub mod utils;
pub mod services {
    pub mod migrate;
    pub mod replay;
    pub mod sampling;
}

use crate::client::chart::{ChannelSpec, PlotlyClient};
use crate::client::weather::OpenWeatherClient;
use crate::config::{Config, SensorBackend, SensorsConfig, Units, DEFAULT_SENSOR_TIMEOUT_SECS};
use crate::db::store::ReadingStore;
use crate::logging::{LogConfig, DEFAULT_MAX_BYTES};
use crate::services::sampling::{run_loop, Sampler, SensorChannel};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const WEATHER_TRACE_NAME: &str = "Outside";
const HISTORY_FILE_NAME: &str = "history.db";

#[derive(Debug, Parser)]
#[command(name = "tempmon", version, about = "Samples USB temperature probes and local weather into a live chart")]
struct Cli {
    /// YAML configuration file
    #[arg(short = 'c', long, default_value_os_t = default_app_path("tempmon.yaml"))]
    config_file: PathBuf,

    /// Rotating log file
    #[arg(short = 'l', long, default_value_os_t = default_app_path("tempmon.log"))]
    log_file: PathBuf,

    /// Size at which the log file is rotated
    #[arg(long, default_value_t = DEFAULT_MAX_BYTES)]
    log_max_bytes: u64,

    /// Write the process id here once started
    #[arg(short = 'p', long)]
    pid_file: Option<PathBuf>,

    /// History store; defaults to history.db next to the config file
    #[arg(long)]
    history_file: Option<PathBuf>,

    /// Also log debug output to the console
    #[arg(short = 'v', long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Import a legacy YAML history file into a history store
    Migrate { infile: PathBuf, outfile: PathBuf },
    /// List attached sensors with one reading each
    Sensors {
        #[arg(long, value_enum, default_value = "temper")]
        backend: SensorBackend,
        #[arg(long, value_enum, default_value = "fahrenheit")]
        units: Units,
    },
}

fn default_app_path(name: &str) -> PathBuf {
    dirs::home_dir().unwrap_or_default().join(".tempmon").join(name)
}

fn default_history_file(config_file: &Path) -> PathBuf {
    match config_file.parent() {
        Some(dir) => dir.join(HISTORY_FILE_NAME),
        None => PathBuf::from(HISTORY_FILE_NAME),
    }
}

fn write_pid_file(path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| format!("cannot create {}: {}", parent.display(), e))?;
    }
    fs::write(path, format!("{}\n", std::process::id()))
        .map_err(|e| format!("cannot write pid file {}: {}", path.display(), e))?;
    info!("Wrote pid {} to {}", std::process::id(), path.display());
    Ok(())
}

fn run(cli: &Cli) -> Result<(), String> {
    // 1) Load config
    let cfg = Config::from_file(&cli.config_file)?;
    info!(
        "Config loaded from {} (frequency={}m, retention={}d, units={}, sensors={:?}, max_points={})",
        cli.config_file.display(),
        cfg.frequency_minutes,
        cfg.retention_days,
        cfg.units,
        cfg.sensors.backend,
        cfg.max_points()
    );

    if let Some(pid_file) = &cli.pid_file {
        write_pid_file(pid_file)?;
    }

    // 2) Discover probes and bind them to chart channels
    let found = sensors::discover(&cfg.sensors, cfg.sensor_timeout).map_err(|e| e.to_string())?;
    let channels = SensorChannel::bind_all(found, &cfg.remote_chart.sensor_channel_ids)?;

    // 3) Resolve the weather location once
    let weather_client = OpenWeatherClient::new(&cfg.weather, cfg.units, cfg.http_timeout);
    let location = weather_client
        .resolve(&cfg.weather.place)
        .map_err(|e| format!("Weather location lookup for {:?} failed: {}", cfg.weather.place, e))?;
    let weather = weather_client.located(location);
    let here = weather.location();
    info!("Weather location: {} ({:.4}, {:.4})", here.name, here.lat, here.lon);

    // 4) Set up the chart and open every channel
    let chart = PlotlyClient::new(&cfg.remote_chart, cfg.http_timeout);
    chart
        .authenticate()
        .map_err(|e| format!("Chart login failed: {}", e))?;
    info!("Authenticated to chart service as {}", cfg.remote_chart.username);

    let weather_channel = cfg.remote_chart.weather_channel_id.clone();
    let mut specs = vec![ChannelSpec {
        token: weather_channel.clone(),
        name: WEATHER_TRACE_NAME.to_string(),
    }];
    specs.extend(channels.iter().map(|c| ChannelSpec {
        token: c.token.clone(),
        name: c.name.clone(),
    }));
    let url = chart
        .create_channels(&specs, &cfg.graph_title, cfg.units.label(), cfg.max_points())
        .map_err(|e| format!("Creating chart {:?} failed: {}", cfg.graph_title, e))?;
    for spec in &specs {
        chart
            .open(&spec.token)
            .map_err(|e| format!("Opening channel {} ({}) failed: {}", spec.token, spec.name, e))?;
    }
    info!("Output graph visible at {}", url);

    // 5) Open the history store
    let history_file = cli
        .history_file
        .clone()
        .unwrap_or_else(|| default_history_file(&cli.config_file));
    let (store, weather_points) = ReadingStore::open(&history_file).map_err(|e| e.to_string())?;
    info!(
        "History store {} holds {} weather point(s)",
        store.path().display(),
        weather_points
    );

    let mut sampler = Sampler::new(store, weather, chart, weather_channel, channels, cfg.units);

    // 6) Mirror stored history into the fresh chart
    if weather_points > 0 {
        sampler
            .replay()
            .map_err(|e| format!("Replaying history failed: {}", e))?;
    }

    // 7) Poll forever
    info!(
        "Starting sampling loop: interval={}s",
        cfg.interval().as_secs()
    );
    run_loop(&mut sampler, cfg.interval())
}

fn list_sensors(backend: SensorBackend, units: Units) -> Result<(), String> {
    let cfg = SensorsConfig {
        backend,
        ..SensorsConfig::default()
    };
    let found = sensors::discover(&cfg, Duration::from_secs(DEFAULT_SENSOR_TIMEOUT_SECS))
        .map_err(|e| e.to_string())?;
    let names = sensors::sensor_names(&found.iter().map(|s| s.address()).collect::<Vec<_>>());

    for (mut sensor, name) in found.into_iter().zip(names) {
        match sensor.read(units) {
            Ok(value) => println!("{}\t{}\t{:.2}{}", name, sensor.address(), value, units.label()),
            Err(e) => {
                warn!("Could not read {}: {}", name, e);
                println!("{}\t{}\tn/a", name, sensor.address());
            }
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let log_cfg = match cli.command {
        Some(_) => LogConfig::console(),
        None => LogConfig::daemon(cli.log_file.clone(), cli.log_max_bytes, cli.verbose),
    };
    if let Err(e) = log_cfg.init() {
        eprintln!("fatal: {}", e);
        std::process::exit(1);
    }

    info!(
        "tempmon {} (git {}) starting",
        env!("CARGO_PKG_VERSION"),
        env!("BUILD_TIME_GIT_HASH")
    );

    let result = match &cli.command {
        None => run(&cli),
        Some(Command::Migrate { infile, outfile }) => services::migrate::run(infile, outfile).map(|_| ()),
        Some(Command::Sensors { backend, units }) => list_sensors(*backend, *units),
    };
    if let Err(e) = result {
        error!("fatal: {}", e);
        // The daemon logs only to its file unless verbose.
        if cli.command.is_none() && !cli.verbose {
            eprintln!("fatal: {}", e);
        }
        std::process::exit(1);
    }
}
